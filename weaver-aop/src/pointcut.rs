//! 切点（Pointcut）表达式系统
//!
//! 支持的语法：
//! - `execution(* UserService.get_user(..))`，返回类型部分可省略
//! - `within(*Service)`
//! - `&&`、`||`、`!` 以及括号
//!
//! 类型模式同时匹配完整类型路径（`app::service::UserService`）与最后一段（`UserService`），
//! `*` 为通配符

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;

/// 切点
///
/// 只保存表达式文本；匹配由 [`PointcutEvaluator`] 负责
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pointcut {
    expression: String,
}

impl Pointcut {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
        }
    }

    /// 获取切点表达式
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 与另一个切点组合
    pub fn and(&self, other: &Pointcut) -> Pointcut {
        Pointcut::new(format!("({}) && ({})", self.expression, other.expression))
    }
}

impl fmt::Display for Pointcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// 切点求值器
pub trait PointcutEvaluator: Send + Sync {
    /// 表达式是否匹配目标类型上的方法
    fn matches(&self, expression: &str, target_class: &str, method: &str) -> bool;

    /// 类型模式是否匹配目标类型（用于引入）
    fn matches_type(&self, type_pattern: &str, target_class: &str) -> bool;
}

/// 名称模式（支持 * 通配符）
#[derive(Clone)]
struct NamePattern {
    raw: String,
    regex: Option<Regex>,
}

impl NamePattern {
    fn compile(raw: &str) -> Result<Self, String> {
        let raw = raw.trim().trim_end_matches('+').to_string();
        if raw.is_empty() {
            return Err("empty name pattern".to_string());
        }
        if raw == "*" || !raw.contains('*') {
            return Ok(Self { raw, regex: None });
        }

        // 将 * 转换为正则表达式
        let body = raw
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^{}$", body)).map_err(|e| e.to_string())?;
        Ok(Self {
            raw,
            regex: Some(regex),
        })
    }

    fn is_match(&self, target: &str) -> bool {
        match &self.regex {
            _ if self.raw == "*" => true,
            Some(regex) => regex.is_match(target),
            None => self.raw == target,
        }
    }

    /// 类型模式匹配完整路径或最后一段
    fn matches_type(&self, class_name: &str) -> bool {
        self.is_match(class_name) || self.is_match(simple_name(class_name))
    }
}

impl fmt::Debug for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// 类型路径的最后一段，`a::b::Foo<T>` 得到 `Foo<T>`
pub(crate) fn simple_name(class_name: &str) -> &str {
    let head = class_name.split('<').next().unwrap_or(class_name);
    match head.rfind("::") {
        Some(index) => &class_name[index + 2..],
        None => class_name,
    }
}

/// 解析后的切点表达式
#[derive(Debug, Clone)]
enum PointcutExpression {
    /// 匹配特定类型的特定方法
    Execution {
        type_pattern: NamePattern,
        method_pattern: NamePattern,
    },

    /// 匹配特定类型的所有方法
    Within(NamePattern),

    /// 与运算（AND）
    And(Box<PointcutExpression>, Box<PointcutExpression>),

    /// 或运算（OR）
    Or(Box<PointcutExpression>, Box<PointcutExpression>),

    /// 非运算（NOT）
    Not(Box<PointcutExpression>),
}

impl PointcutExpression {
    fn matches(&self, target_class: &str, method: &str) -> bool {
        match self {
            PointcutExpression::Execution {
                type_pattern,
                method_pattern,
            } => type_pattern.matches_type(target_class) && method_pattern.is_match(method),
            PointcutExpression::Within(type_pattern) => type_pattern.matches_type(target_class),
            PointcutExpression::And(left, right) => {
                left.matches(target_class, method) && right.matches(target_class, method)
            }
            PointcutExpression::Or(left, right) => {
                left.matches(target_class, method) || right.matches(target_class, method)
            }
            PointcutExpression::Not(expr) => !expr.matches(target_class, method),
        }
    }

    /// 解析 execution 表达式的内容
    ///
    /// 格式：[返回类型] 类型名.方法名(参数)
    fn execution(body: &str) -> Result<Self, String> {
        let signature = body.trim();
        let signature = match signature.find('(') {
            Some(index) => &signature[..index],
            None => signature,
        };
        // 去掉返回类型部分
        let signature = signature
            .split_whitespace()
            .last()
            .ok_or_else(|| "empty execution pattern".to_string())?;

        let (type_pattern, method_pattern) = match signature.rsplit_once('.') {
            Some((type_pattern, method_pattern)) => (type_pattern, method_pattern),
            None => ("*", signature),
        };
        Ok(PointcutExpression::Execution {
            type_pattern: NamePattern::compile(type_pattern)?,
            method_pattern: NamePattern::compile(method_pattern)?,
        })
    }
}

/// 递归下降解析器
///
/// expr    := or
/// or      := and ('||' and)*
/// and     := unary ('&&' unary)*
/// unary   := '!' unary | primary
/// primary := '(' expr ')' | designator '(' body ')'
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn parse(input: &'a str) -> Result<PointcutExpression, String> {
        let mut parser = Parser { input, pos: 0 };
        let expr = parser.or()?;
        parser.skip_whitespace();
        if parser.pos < parser.input.len() {
            return Err(format!(
                "unexpected trailing input '{}'",
                &parser.input[parser.pos..]
            ));
        }
        Ok(expr)
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_whitespace();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Result<PointcutExpression, String> {
        let mut left = self.and()?;
        while self.eat("||") {
            let right = self.and()?;
            left = PointcutExpression::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<PointcutExpression, String> {
        let mut left = self.unary()?;
        while self.eat("&&") {
            let right = self.unary()?;
            left = PointcutExpression::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<PointcutExpression, String> {
        if self.eat("!") {
            return Ok(PointcutExpression::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<PointcutExpression, String> {
        if self.eat("(") {
            let expr = self.or()?;
            if !self.eat(")") {
                return Err("missing ')'".to_string());
            }
            return Ok(expr);
        }

        self.skip_whitespace();
        let designator: String = self
            .rest()
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if designator.is_empty() {
            return Err(format!("expected a pointcut designator at '{}'", self.rest()));
        }
        self.pos += designator.len();
        if !self.eat("(") {
            return Err(format!("expected '(' after '{}'", designator));
        }
        let body = self.balanced_body()?;
        match designator.as_str() {
            "execution" => PointcutExpression::execution(body),
            "within" => Ok(PointcutExpression::Within(NamePattern::compile(body)?)),
            other => Err(format!("unsupported pointcut designator '{}'", other)),
        }
    }

    /// 读取到与已消费的 '(' 匹配的 ')' 为止
    fn balanced_body(&mut self) -> Result<&'a str, String> {
        let start = self.pos;
        let mut depth = 1usize;
        for (offset, c) in self.rest().char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        let body = &self.input[start..start + offset];
                        self.pos = start + offset + 1;
                        return Ok(body);
                    }
                }
                _ => {}
            }
        }
        Err("unbalanced parentheses".to_string())
    }
}

/// 默认切点求值器
///
/// 解析结果按表达式文本缓存；无法解析的表达式记录一次警告，之后一律不匹配
#[derive(Default)]
pub struct ExpressionPointcutEvaluator {
    cache: RwLock<HashMap<String, Option<Arc<PointcutExpression>>>>,
    type_patterns: RwLock<HashMap<String, Option<NamePattern>>>,
}

impl ExpressionPointcutEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 校验表达式能否解析
    pub fn validate(expression: &str) -> Result<(), String> {
        Parser::parse(expression).map(|_| ())
    }

    fn compiled(&self, expression: &str) -> Option<Arc<PointcutExpression>> {
        if let Some(cached) = self.cache.read().get(expression) {
            return cached.clone();
        }
        let parsed = match Parser::parse(expression) {
            Ok(expr) => Some(Arc::new(expr)),
            Err(reason) => {
                tracing::warn!("Cannot parse pointcut '{}': {}", expression, reason);
                None
            }
        };
        self.cache
            .write()
            .entry(expression.to_string())
            .or_insert(parsed)
            .clone()
    }
}

impl PointcutEvaluator for ExpressionPointcutEvaluator {
    fn matches(&self, expression: &str, target_class: &str, method: &str) -> bool {
        self.compiled(expression)
            .map(|expr| expr.matches(target_class, method))
            .unwrap_or(false)
    }

    fn matches_type(&self, type_pattern: &str, target_class: &str) -> bool {
        if let Some(cached) = self.type_patterns.read().get(type_pattern) {
            return cached
                .as_ref()
                .map(|p| p.matches_type(target_class))
                .unwrap_or(false);
        }
        let compiled = match NamePattern::compile(type_pattern) {
            Ok(pattern) => Some(pattern),
            Err(reason) => {
                tracing::warn!("Cannot parse type pattern '{}': {}", type_pattern, reason);
                None
            }
        };
        let matched = compiled
            .as_ref()
            .map(|p| p.matches_type(target_class))
            .unwrap_or(false);
        self.type_patterns
            .write()
            .insert(type_pattern.to_string(), compiled);
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASS: &str = "app::service::UserService";

    #[test]
    fn test_execution_matches_type_and_method() {
        let evaluator = ExpressionPointcutEvaluator::new();
        assert!(evaluator.matches("execution(* UserService.get_user(..))", CLASS, "get_user"));
        assert!(evaluator.matches("execution(* *Service.*(..))", CLASS, "delete"));
        assert!(evaluator.matches("execution(UserService.get_*)", CLASS, "get_all"));
        assert!(!evaluator.matches("execution(* UserService.get_user(..))", CLASS, "delete"));
        assert!(!evaluator.matches("execution(* OrderService.*(..))", CLASS, "get_user"));
    }

    #[test]
    fn test_full_path_type_pattern() {
        let evaluator = ExpressionPointcutEvaluator::new();
        assert!(evaluator.matches("execution(* app::service::*.*(..))", CLASS, "get_user"));
        assert!(evaluator.matches("within(app::*)", CLASS, "x"));
    }

    #[test]
    fn test_boolean_operators() {
        let evaluator = ExpressionPointcutEvaluator::new();
        let expr = "within(*Service) && !execution(* *.internal_*(..))";
        assert!(evaluator.matches(expr, CLASS, "get_user"));
        assert!(!evaluator.matches(expr, CLASS, "internal_reset"));

        let expr = "(execution(* *.a(..)) || execution(* *.b(..))) && within(UserService)";
        assert!(evaluator.matches(expr, CLASS, "a"));
        assert!(evaluator.matches(expr, CLASS, "b"));
        assert!(!evaluator.matches(expr, CLASS, "c"));
    }

    #[test]
    fn test_invalid_expression_never_matches() {
        let evaluator = ExpressionPointcutEvaluator::new();
        assert!(!evaluator.matches("execution(* *.*(..)", CLASS, "a"));
        assert!(!evaluator.matches("cflow(* *.*(..))", CLASS, "a"));
        assert!(!evaluator.matches("", CLASS, "a"));
        assert!(ExpressionPointcutEvaluator::validate("within(*) &&").is_err());
        assert!(ExpressionPointcutEvaluator::validate("within(*) && within(A)").is_ok());
    }

    #[test]
    fn test_matches_type() {
        let evaluator = ExpressionPointcutEvaluator::new();
        assert!(evaluator.matches_type("*Service+", CLASS));
        assert!(evaluator.matches_type("UserService", CLASS));
        assert!(!evaluator.matches_type("Order*", CLASS));
    }

    #[test]
    fn test_simple_name() {
        assert_eq!(simple_name("a::b::Foo"), "Foo");
        assert_eq!(simple_name("Foo"), "Foo");
        assert_eq!(simple_name("a::Foo<b::Bar>"), "Foo<b::Bar>");
    }

    #[test]
    fn test_pointcut_and() {
        let combined = Pointcut::new("within(A)").and(&Pointcut::new("within(B)"));
        assert_eq!(combined.expression(), "(within(A)) && (within(B))");
    }
}
