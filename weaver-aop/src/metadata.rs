//! 切面元数据
//!
//! 解析切面的实例化模型（per-clause），解析失败即为配置错误

use std::fmt;
use std::sync::Arc;

use crate::aspect::AspectClass;
use crate::error::ConfigError;
use crate::pointcut::Pointcut;

/// 切面实例化模型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PerClauseKind {
    /// 每个容器一个实例
    Singleton,
    /// 每个被通知的目标对象一个实例
    PerTarget,
    /// 每个代理对象一个实例
    PerThis,
}

impl PerClauseKind {
    /// 是否需要延迟实例化
    pub fn is_lazy(&self) -> bool {
        !matches!(self, PerClauseKind::Singleton)
    }
}

impl fmt::Display for PerClauseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerClauseKind::Singleton => f.write_str("singleton"),
            PerClauseKind::PerTarget => f.write_str("pertarget"),
            PerClauseKind::PerThis => f.write_str("perthis"),
        }
    }
}

/// 控制流相关的实例化模型不受支持
const UNSUPPORTED_CLAUSES: [&str; 3] = ["percflowbelow", "percflow", "pertypewithin"];

/// 解析实例化声明
///
/// - 空串或 `singleton` / `issingleton()` 为单例
/// - `pertarget(expr)` / `perthis(expr)` 带有实例化切点
pub fn parse_per_clause(
    class: &str,
    clause: &str,
) -> Result<(PerClauseKind, Option<Pointcut>), ConfigError> {
    let clause = clause.trim();
    if clause.is_empty() || clause == "singleton" || clause == "issingleton()" {
        return Ok((PerClauseKind::Singleton, None));
    }

    let malformed = || ConfigError::MalformedPerClause {
        class: class.to_string(),
        clause: clause.to_string(),
    };
    let (keyword, rest) = clause.split_once('(').ok_or_else(malformed)?;
    let keyword = keyword.trim();
    if UNSUPPORTED_CLAUSES.contains(&keyword) {
        return Err(ConfigError::UnsupportedPerClause {
            class: class.to_string(),
            clause: clause.to_string(),
        });
    }

    let kind = match keyword {
        "pertarget" => PerClauseKind::PerTarget,
        "perthis" => PerClauseKind::PerThis,
        _ => return Err(malformed()),
    };
    let expression = rest
        .trim_end()
        .strip_suffix(')')
        .map(str::trim)
        .filter(|e| !e.is_empty() && balanced(e))
        .ok_or_else(malformed)?;
    Ok((kind, Some(Pointcut::new(expression))))
}

fn balanced(expression: &str) -> bool {
    let mut depth = 0i32;
    for c in expression.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return false;
        }
    }
    depth == 0
}

/// 切面元数据
///
/// 一个切面类型的不可变描述：类型、名称、实例化模型以及实例化切点
#[derive(Debug, Clone)]
pub struct AspectMetadata {
    aspect_class: Arc<AspectClass>,
    aspect_name: String,
    per_clause_kind: PerClauseKind,
    per_clause_pointcut: Option<Pointcut>,
}

impl AspectMetadata {
    pub fn new(
        aspect_class: Arc<AspectClass>,
        aspect_name: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let (per_clause_kind, per_clause_pointcut) =
            parse_per_clause(aspect_class.type_name(), aspect_class.per_clause())?;
        Ok(Self {
            aspect_class,
            aspect_name: aspect_name.into(),
            per_clause_kind,
            per_clause_pointcut,
        })
    }

    pub fn aspect_class(&self) -> &Arc<AspectClass> {
        &self.aspect_class
    }

    pub fn aspect_name(&self) -> &str {
        &self.aspect_name
    }

    pub fn per_clause_kind(&self) -> PerClauseKind {
        self.per_clause_kind
    }

    /// 实例化切点；单例切面没有
    pub fn per_clause_pointcut(&self) -> Option<&Pointcut> {
        self.per_clause_pointcut.as_ref()
    }

    /// 是否需要延迟实例化
    pub fn is_lazily_instantiated(&self) -> bool {
        self.per_clause_kind.is_lazy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Audit;

    fn class_with(clause: &str) -> Arc<AspectClass> {
        Arc::new(AspectClass::builder::<Audit>().per_clause(clause).build())
    }

    #[test]
    fn test_singleton_clauses() {
        for clause in ["", "  ", "singleton", "issingleton()"] {
            let (kind, pointcut) = parse_per_clause("Audit", clause).unwrap();
            assert_eq!(kind, PerClauseKind::Singleton);
            assert!(pointcut.is_none());
        }
    }

    #[test]
    fn test_per_target_and_per_this() {
        let metadata =
            AspectMetadata::new(class_with("pertarget(within(*Service))"), "audit").unwrap();
        assert_eq!(metadata.per_clause_kind(), PerClauseKind::PerTarget);
        assert_eq!(
            metadata.per_clause_pointcut().unwrap().expression(),
            "within(*Service)"
        );
        assert!(metadata.is_lazily_instantiated());
        assert_eq!(metadata.aspect_name(), "audit");

        let (kind, pointcut) = parse_per_clause("Audit", "perthis( within(A) )").unwrap();
        assert_eq!(kind, PerClauseKind::PerThis);
        assert_eq!(pointcut.unwrap().expression(), "within(A)");
    }

    #[test]
    fn test_control_flow_clauses_are_rejected() {
        for clause in [
            "percflow(execution(* *.*(..)))",
            "percflowbelow(within(A))",
            "pertypewithin(A)",
        ] {
            let err = AspectMetadata::new(class_with(clause), "audit").unwrap_err();
            assert!(matches!(err, ConfigError::UnsupportedPerClause { .. }), "{}", clause);
        }
    }

    #[test]
    fn test_malformed_clauses() {
        for clause in ["pertarget", "pertarget()", "perthis(within(A)", "perinstance(A)"] {
            let err = parse_per_clause("Audit", clause).unwrap_err();
            assert!(matches!(err, ConfigError::MalformedPerClause { .. }), "{}", clause);
        }
    }
}
