//! 通知器工厂
//!
//! 把切面类型描述转换为通知器列表：校验、延迟实例化包装、方法排序、逐个构建通知器、
//! 为延迟实例化的切面插入实例化通知器，最后追加引入通知器

use std::collections::HashMap;
use std::sync::Arc;

use weaver_core::Instance;

use crate::advice::{classify, Advice, AdviceHandler, AdviceKind};
use crate::advisor::{Advisor, IntroductionAdvisor, PointcutAdvisor};
use crate::aspect::{AspectCatalog, AspectClass, AspectField, AspectMethod, DeclareParents};
use crate::error::{AopResult, ConfigError};
use crate::instance_factory::{
    AspectInstanceFactory, LazySingletonInstanceFactoryDecorator, SingletonInstanceFactory,
};
use crate::joinpoint::JoinPoint;
use crate::metadata::{parse_per_clause, AspectMetadata};
use crate::pointcut::Pointcut;

/// 命名切点展开的最大嵌套深度
const MAX_POINTCUT_NESTING: usize = 8;

/// 实例化通知器对应的方法名
pub const INSTANTIATION_METHOD: &str = "<instantiate>";

/// 通知器工厂
pub struct AdvisorFactory {
    catalog: Arc<AspectCatalog>,
}

impl AdvisorFactory {
    pub fn new(catalog: Arc<AspectCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<AspectCatalog> {
        &self.catalog
    }

    /// 类型是否为切面
    pub fn is_aspect(&self, class_name: &str) -> bool {
        self.catalog.is_aspect(class_name)
    }

    /// 校验切面类型
    pub fn validate(&self, class: &AspectClass) -> AopResult<()> {
        if !class.is_aspect() {
            let error = match class.methods().iter().find(|m| classify(m).is_some()) {
                Some(method) => ConfigError::AdviceOutsideAspect {
                    class: class.type_name().to_string(),
                    method: method.name().to_string(),
                },
                None => ConfigError::UnknownAspectType {
                    name: class.name().to_string(),
                    class: class.type_name().to_string(),
                },
            };
            return Err(error.into());
        }

        parse_per_clause(class.type_name(), class.per_clause())?;

        for method in class.methods() {
            if let Some(kind) = classify(method) {
                advice_handler(class, method, kind)?;
            }
        }
        Ok(())
    }

    /// 为切面实例工厂构建全部通知器
    pub fn get_advisors(
        &self,
        factory: Arc<dyn AspectInstanceFactory>,
    ) -> AopResult<Vec<Advisor>> {
        let metadata = Arc::clone(factory.metadata());
        let class = metadata.aspect_class();
        self.validate(class)?;

        // 同一次解析中切面实例最多创建一次
        let lazy: Arc<dyn AspectInstanceFactory> =
            Arc::new(LazySingletonInstanceFactoryDecorator::new(factory));

        let mut advisors = Vec::new();
        for method in advisor_methods(class) {
            if let Some(advisor) = self.get_advisor(method, &lazy, advisors.len())? {
                advisors.push(advisor);
            }
        }

        if !advisors.is_empty() && metadata.is_lazily_instantiated() {
            if let Some(advisor) = instantiation_advisor(&metadata, &lazy) {
                advisors.insert(0, advisor);
            }
        }

        for field in class.fields() {
            if let Some(parents) = field.declare_parents() {
                advisors.push(introduction_advisor(&metadata, field, parents, lazy.order())?);
            }
        }

        tracing::debug!(
            "Built {} advisors for aspect '{}' ({})",
            advisors.len(),
            metadata.aspect_name(),
            metadata.per_clause_kind()
        );
        Ok(advisors)
    }

    /// 为已有的切面实例构建通知器
    pub fn get_advisors_for_instance(
        &self,
        instance: Instance,
        class: Arc<AspectClass>,
        aspect_name: impl Into<String>,
    ) -> AopResult<Vec<Advisor>> {
        let metadata = Arc::new(AspectMetadata::new(class, aspect_name)?);
        self.get_advisors(Arc::new(SingletonInstanceFactory::new(instance, metadata)))
    }

    /// 为单个方法构建通知器；没有通知注解的方法返回 `None`
    pub fn get_advisor(
        &self,
        method: &AspectMethod,
        factory: &Arc<dyn AspectInstanceFactory>,
        declaration_order: usize,
    ) -> AopResult<Option<Advisor>> {
        let metadata = factory.metadata();
        let class = metadata.aspect_class();
        self.validate(class)?;

        let Some(advice) = build_advice(class, method, factory, declaration_order)? else {
            return Ok(None);
        };
        let per_clause = if metadata.is_lazily_instantiated() {
            metadata.per_clause_pointcut().cloned()
        } else {
            None
        };
        Ok(Some(PointcutAdvisor::new(advice, per_clause).into()))
    }
}

/// 构建方法对应的通知；没有通知注解的方法返回 `None`
pub fn build_advice(
    class: &AspectClass,
    method: &AspectMethod,
    factory: &Arc<dyn AspectInstanceFactory>,
    declaration_order: usize,
) -> AopResult<Option<Advice>> {
    let (Some(kind), Some(annotation)) = (classify(method), method.annotation()) else {
        return Ok(None);
    };
    let handler = advice_handler(class, method, kind)?;
    let expression = expand_named_pointcuts(
        &class.named_pointcuts(),
        annotation.pointcut_expression(),
        0,
    );
    Ok(Some(Advice::new(
        kind,
        factory.metadata().aspect_name(),
        method.name(),
        Pointcut::new(expression),
        handler.clone(),
        annotation.binding().cloned(),
        declaration_order,
        Arc::clone(factory),
    )))
}

fn advice_handler<'a>(
    class: &AspectClass,
    method: &'a AspectMethod,
    kind: AdviceKind,
) -> Result<&'a AdviceHandler, ConfigError> {
    method
        .handler()
        .filter(|handler| handler.fits(kind))
        .ok_or_else(|| ConfigError::AdviceSignatureMismatch {
            class: class.type_name().to_string(),
            method: method.name().to_string(),
            annotation: kind.annotation_name().to_string(),
        })
}

/// 候选方法：排除命名切点，按通知类型再按方法名排序，非通知方法排在最后
pub fn advisor_methods(class: &AspectClass) -> Vec<&AspectMethod> {
    let mut methods: Vec<&AspectMethod> =
        class.methods().iter().filter(|m| !m.is_pointcut()).collect();
    methods.sort_by(|a, b| {
        let (ka, kb) = (classify(a), classify(b));
        (ka.is_none(), ka, a.name()).cmp(&(kb.is_none(), kb, b.name()))
    });
    methods
}

fn materialize(_aspect: &Instance, _jp: &JoinPoint<'_>) -> anyhow::Result<()> {
    Ok(())
}

/// 延迟实例化切面的实例化通知器：前置通知，绑定在实例化切点上
fn instantiation_advisor(
    metadata: &AspectMetadata,
    factory: &Arc<dyn AspectInstanceFactory>,
) -> Option<Advisor> {
    let pointcut = metadata.per_clause_pointcut()?.clone();
    let advice = Advice::new(
        AdviceKind::Before,
        metadata.aspect_name(),
        INSTANTIATION_METHOD,
        pointcut,
        AdviceHandler::Plain(Arc::new(materialize)),
        None,
        0,
        Arc::clone(factory),
    );
    Some(PointcutAdvisor::synthetic(advice).into())
}

fn introduction_advisor(
    metadata: &AspectMetadata,
    field: &AspectField,
    parents: &DeclareParents,
    order: i32,
) -> Result<Advisor, ConfigError> {
    let default_impl = parents.default_impl_factory().cloned().ok_or_else(|| {
        ConfigError::MissingDefaultImpl {
            class: metadata.aspect_class().type_name().to_string(),
            field: field.name().to_string(),
        }
    })?;
    Ok(IntroductionAdvisor::new(
        metadata.aspect_name(),
        field.name(),
        parents.interface(),
        parents.types_matching(),
        default_impl,
        order,
    )
    .into())
}

/// 展开 `name()` 形式的命名切点引用
///
/// 紧跟在 `.`、`:`、`*` 之后的标识符是方法或类型模式的一部分，不展开
pub fn expand_named_pointcuts(
    named: &HashMap<&str, &str>,
    expression: &str,
    depth: usize,
) -> String {
    if named.is_empty() || depth > MAX_POINTCUT_NESTING {
        return expression.to_string();
    }

    let is_ident_start = |c: char| c.is_ascii_alphabetic() || c == '_';
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';

    let mut out = String::with_capacity(expression.len());
    let mut rest = expression;
    while let Some(start) = rest.find(is_ident_start) {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let end = tail.find(|c: char| !is_ident(c)).unwrap_or(tail.len());
        let (ident, after) = tail.split_at(end);

        let qualified = out.ends_with(['.', ':', '*']);
        let reference = after.trim_start().strip_prefix("()");
        match (named.get(ident), reference) {
            (Some(referenced), Some(remaining)) if !qualified => {
                out.push('(');
                out.push_str(&expand_named_pointcuts(named, referenced, depth + 1));
                out.push(')');
                rest = remaining;
            }
            _ => {
                out.push_str(ident);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PerClauseKind;

    struct Tracing;
    struct Plain;

    fn ok(_: &Tracing, _: &JoinPoint<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn tracing_class(per_clause: &str) -> AspectClass {
        AspectClass::builder::<Tracing>()
            .per_clause(per_clause)
            .order(1)
            .pointcut("services", "within(*Service)")
            .after("z_after", "services()", ok)
            .before("b_before", "services()", ok)
            .around("around", "services()", |_: &Tracing, pjp| pjp.proceed())
            .before("a_before", "services() && execution(* *.find(..))", ok)
            .after_throwing("thrown", "services()", |_: &Tracing, _, _| Ok(()))
            .method("helper")
            .build()
    }

    fn factory() -> AdvisorFactory {
        AdvisorFactory::new(Arc::new(AspectCatalog::new()))
    }

    fn advisors(class: AspectClass) -> AopResult<Vec<Advisor>> {
        factory().get_advisors_for_instance(Arc::new(Tracing), Arc::new(class), "tracing")
    }

    fn describe(advisors: &[Advisor]) -> Vec<(Option<AdviceKind>, String, bool)> {
        advisors
            .iter()
            .map(|a| {
                let method = a.advice().map(|x| x.method_name().to_string()).unwrap_or_default();
                (a.kind(), method, a.is_synthetic())
            })
            .collect()
    }

    #[test]
    fn test_methods_sorted_by_kind_then_name() {
        let class = tracing_class("");
        let names: Vec<_> = advisor_methods(&class).iter().map(|m| m.name()).collect();
        assert_eq!(
            names,
            vec!["around", "a_before", "b_before", "z_after", "thrown", "helper"]
        );
    }

    #[test]
    fn test_singleton_aspect_advisors() {
        let advisors = advisors(tracing_class("")).unwrap();
        assert_eq!(
            describe(&advisors),
            vec![
                (Some(AdviceKind::Around), "around".to_string(), false),
                (Some(AdviceKind::Before), "a_before".to_string(), false),
                (Some(AdviceKind::Before), "b_before".to_string(), false),
                (Some(AdviceKind::After), "z_after".to_string(), false),
                (Some(AdviceKind::AfterThrowing), "thrown".to_string(), false),
            ]
        );
        let orders: Vec<_> = advisors.iter().map(|a| a.declaration_order()).collect();
        assert_eq!(orders, vec![Some(0), Some(1), Some(2), Some(3), Some(4)]);
        assert!(advisors.iter().all(|a| a.order() == 1));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let first = describe(&advisors(tracing_class("")).unwrap());
        for _ in 0..10 {
            assert_eq!(describe(&advisors(tracing_class("")).unwrap()), first);
        }
    }

    #[test]
    fn test_per_target_gets_synthetic_advisor_first() {
        let advisors = advisors(tracing_class("pertarget(within(*Service))")).unwrap();
        assert_eq!(advisors.len(), 6);
        assert!(advisors[0].is_synthetic());
        assert_eq!(advisors[0].kind(), Some(AdviceKind::Before));
        assert_eq!(
            advisors[0].advice().unwrap().pointcut().expression(),
            "within(*Service)"
        );
        assert!(advisors[1..].iter().all(|a| !a.is_synthetic()));
        assert!(advisors[1..].iter().all(|a| a.as_pointcut().unwrap().is_lazy()));
    }

    #[test]
    fn test_synthetic_advisor_needs_advice_methods() {
        let class = AspectClass::builder::<Tracing>()
            .per_clause("pertarget(within(*Service))")
            .method("helper")
            .build();
        assert!(advisors(class).unwrap().is_empty());
    }

    #[test]
    fn test_lazy_factory_shared_by_all_advisors() {
        let advisors = advisors(tracing_class("perthis(within(*Service))")).unwrap();
        let first = advisors[0].aspect_instance().unwrap().unwrap();
        for advisor in &advisors[1..] {
            let instance = advisor.aspect_instance().unwrap().unwrap();
            assert!(Arc::ptr_eq(&first, &instance));
        }
    }

    #[test]
    fn test_named_pointcuts_are_expanded() {
        let advisors = advisors(tracing_class("")).unwrap();
        let a_before = advisors
            .iter()
            .find(|a| a.advice().unwrap().method_name() == "a_before")
            .unwrap();
        assert_eq!(
            a_before.advice().unwrap().pointcut().expression(),
            "(within(*Service)) && execution(* *.find(..))"
        );
    }

    #[test]
    fn test_expand_skips_qualified_names() {
        let named: HashMap<&str, &str> =
            [("audit", "within(A)"), ("all", "audit() || within(B)")].into_iter().collect();
        assert_eq!(
            expand_named_pointcuts(&named, "all() && execution(* *.audit())", 0),
            "((within(A)) || within(B)) && execution(* *.audit())"
        );
        assert_eq!(expand_named_pointcuts(&named, "missing()", 0), "missing()");
    }

    #[test]
    fn test_recursive_pointcut_stops() {
        let named: HashMap<&str, &str> = [("a", "a()")].into_iter().collect();
        let expanded = expand_named_pointcuts(&named, "a()", 0);
        assert!(expanded.starts_with("((((("));
    }

    #[test]
    fn test_control_flow_per_clause_is_fatal() {
        let err = advisors(tracing_class("percflow(within(A))")).unwrap_err();
        assert!(matches!(
            err.as_config(),
            Some(ConfigError::UnsupportedPerClause { .. })
        ));
    }

    #[test]
    fn test_advice_outside_aspect_is_fatal() {
        let class = AspectClass::builder::<Plain>()
            .not_aspect()
            .method("plain")
            .before("sneaky", "within(*)", |_: &Plain, _| Ok(()))
            .build();
        let err = factory()
            .get_advisors_for_instance(Arc::new(Plain), Arc::new(class), "plain")
            .unwrap_err();
        assert!(matches!(
            err.as_config(),
            Some(ConfigError::AdviceOutsideAspect { method, .. }) if method == "sneaky"
        ));
    }

    #[test]
    fn test_handler_mismatch_is_fatal() {
        let class = AspectClass::builder::<Tracing>()
            .raw_method(
                AspectMethod::new("broken")
                    .with_annotation(crate::aspect::AspectAnnotation::Around("within(*)".into()))
                    .with_handler(AdviceHandler::Plain(Arc::new(materialize))),
            )
            .build();
        let err = advisors(class).unwrap_err();
        assert!(matches!(
            err.as_config(),
            Some(ConfigError::AdviceSignatureMismatch { method, annotation, .. })
                if method == "broken" && annotation == "around"
        ));
    }

    #[test]
    fn test_introductions_come_last() {
        let class = AspectClass::builder::<Tracing>()
            .per_clause("pertarget(within(*Service))")
            .declare_parents("audit", DeclareParents::new("Auditable", "*Service").default_impl(|| 1u32))
            .before("a_before", "within(*Service)", ok)
            .build();
        let advisors = advisors(class).unwrap();
        assert_eq!(advisors.len(), 3);
        assert!(advisors[0].is_synthetic());
        assert!(advisors[2].is_introduction());
        let intro = advisors[2].as_introduction().unwrap();
        assert_eq!(intro.interface(), "Auditable");
        assert_eq!(intro.create_delegate().downcast_ref::<u32>(), Some(&1));
        assert_eq!(advisors[2].declaration_order(), None);
    }

    #[test]
    fn test_missing_default_impl_is_fatal() {
        let class = AspectClass::builder::<Tracing>()
            .declare_parents("audit", DeclareParents::new("Auditable", "*Service"))
            .build();
        let err = advisors(class).unwrap_err();
        assert!(matches!(
            err.as_config(),
            Some(ConfigError::MissingDefaultImpl { field, .. }) if field == "audit"
        ));
    }

    #[test]
    fn test_metadata_reports_kind() {
        let metadata = AspectMetadata::new(Arc::new(tracing_class("perthis(within(A))")), "t").unwrap();
        assert_eq!(metadata.per_clause_kind(), PerClauseKind::PerThis);
    }
}
