//! AOP Plugin - 把织入引擎接入容器
//!
//! 读取 [`AopProperties`]，注册（或升级为）注解驱动的自动代理创建器，
//! 并把它安装为容器的组件后置处理器

use std::sync::Arc;

use weaver_core::{ComponentDefinitionRegistry, DefaultComponentFactory, Environment};

use crate::advisor_factory::AdvisorFactory;
use crate::aspect::{global_catalog, AspectCatalog};
use crate::auto_proxy::{
    force_expose_proxy, register_annotation_aware_auto_proxy_creator_if_necessary,
    registered_kind, AutoProxyCreator, AutoProxyCreatorKind, AUTO_PROXY_CREATOR_COMPONENT_NAME,
    EXPOSE_PROXY_ATTRIBUTE,
};
use crate::error::AopResult;
use crate::pointcut::{ExpressionPointcutEvaluator, PointcutEvaluator};
use crate::properties::AopProperties;
use crate::proxy::ProxyFactory;
use crate::registry::AdvisorRegistry;
use crate::target::TargetClassCatalog;

/// AOP 插件
///
/// ```ignore
/// use weaver_aop::prelude::*;
///
/// let container = Arc::new(DefaultComponentFactory::new());
/// container.register_singleton("loggingAspect", || Ok(LoggingAspect::default()))?;
/// container.register_singleton("orderService", || Ok(OrderService::new()))?;
///
/// AopPlugin::new()
///     .with_target_classes(targets)
///     .configure(&container, &Environment::new())?;
/// container.preinstantiate_singletons()?;
/// ```
pub struct AopPlugin {
    name: String,
    enabled: bool,
    aspects: Arc<AspectCatalog>,
    target_classes: Arc<TargetClassCatalog>,
    evaluator: Arc<dyn PointcutEvaluator>,
}

impl AopPlugin {
    /// 使用全局切面目录创建插件
    pub fn new() -> Self {
        Self {
            name: "AopPlugin".to_string(),
            enabled: true,
            aspects: Arc::clone(global_catalog()),
            target_classes: Arc::new(TargetClassCatalog::new()),
            evaluator: Arc::new(ExpressionPointcutEvaluator::new()),
        }
    }

    /// 创建禁用的插件
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 替换切面目录
    pub fn with_aspects(mut self, aspects: Arc<AspectCatalog>) -> Self {
        self.aspects = aspects;
        self
    }

    /// 可被代理的目标类型
    pub fn with_target_classes(mut self, target_classes: Arc<TargetClassCatalog>) -> Self {
        self.target_classes = target_classes;
        self
    }

    /// 替换切点求值器
    pub fn with_evaluator(mut self, evaluator: Arc<dyn PointcutEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 配置容器
    ///
    /// 自动代理关闭时返回 `None`
    pub fn configure(
        &self,
        container: &Arc<DefaultComponentFactory>,
        env: &Environment,
    ) -> AopResult<Option<Arc<AutoProxyCreator>>> {
        if !self.enabled {
            tracing::info!("AOP plugin '{}' is disabled, skipping initialization", self.name);
            return Ok(None);
        }

        let props = AopProperties::from_environment(env);
        if !props.auto {
            tracing::info!("Auto-proxying is disabled by 'aop.auto'");
            return Ok(None);
        }

        register_annotation_aware_auto_proxy_creator_if_necessary(container.as_ref())?;
        if props.expose_proxy {
            force_expose_proxy(container.as_ref())?;
        }
        let kind = registered_kind(container.as_ref())?
            .unwrap_or(AutoProxyCreatorKind::AnnotationAware);
        let expose_proxy = container
            .definition(AUTO_PROXY_CREATOR_COMPONENT_NAME)
            .and_then(|definition| definition.bool_attribute(EXPOSE_PROXY_ATTRIBUTE))
            .unwrap_or(false);

        let registry = AdvisorRegistry::new(
            container.clone(),
            Arc::new(AdvisorFactory::new(Arc::clone(&self.aspects))),
        )
        .with_include_patterns(&props.include_patterns)?;
        let materializer =
            ProxyFactory::new(Arc::clone(&self.evaluator)).with_expose_proxy(expose_proxy);

        let creator = Arc::new(
            AutoProxyCreator::new(
                kind,
                Arc::clone(&self.evaluator),
                Arc::new(materializer),
                Arc::clone(&self.target_classes),
            )
            .with_advisor_registry(Arc::new(registry))
            .with_definitions(container.clone()),
        );
        container.add_post_processor(creator.clone());

        tracing::info!(
            "AOP support initialized: {} auto-proxy creator, {} aspect type(s), expose-proxy={}",
            kind,
            self.aspects.len(),
            expose_proxy
        );
        Ok(Some(creator))
    }
}

impl Default for AopPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auto_proxy::register_auto_proxy_creator_if_necessary;
    use weaver_core::{ConfigValue, MapPropertySource};

    #[test]
    fn test_plugin_creation() {
        let plugin = AopPlugin::new();
        assert_eq!(plugin.name(), "AopPlugin");
        assert!(plugin.is_enabled());
        assert!(!AopPlugin::disabled().is_enabled());
        assert_eq!(AopPlugin::new().with_name("custom").name(), "custom");
    }

    #[test]
    fn test_disabled_plugin_leaves_container_untouched() {
        let container = Arc::new(DefaultComponentFactory::new());
        let creator = AopPlugin::disabled()
            .configure(&container, &Environment::new())
            .unwrap();
        assert!(creator.is_none());
        assert_eq!(container.post_processor_count(), 0);
        assert!(!container.contains_definition(AUTO_PROXY_CREATOR_COMPONENT_NAME));
    }

    #[test]
    fn test_auto_off() {
        let container = Arc::new(DefaultComponentFactory::new());
        let env = Environment::new();
        env.add_property_source(Box::new(
            MapPropertySource::new("test").with_property("aop.auto", ConfigValue::Bool(false)),
        ));
        assert!(AopPlugin::new().configure(&container, &env).unwrap().is_none());
        assert_eq!(container.post_processor_count(), 0);
    }

    #[test]
    fn test_configure_escalates_existing_registration() {
        let container = Arc::new(DefaultComponentFactory::new());
        register_auto_proxy_creator_if_necessary(container.as_ref()).unwrap();

        let env = Environment::new();
        env.add_property_source(Box::new(
            MapPropertySource::new("test")
                .with_property("aop.expose-proxy", ConfigValue::Bool(true)),
        ));
        let creator = AopPlugin::new()
            .with_aspects(Arc::new(AspectCatalog::new()))
            .configure(&container, &env)
            .unwrap()
            .unwrap();

        assert_eq!(creator.kind(), AutoProxyCreatorKind::AnnotationAware);
        assert_eq!(container.post_processor_count(), 1);
        let definition = container
            .definition(AUTO_PROXY_CREATOR_COMPONENT_NAME)
            .unwrap();
        assert_eq!(definition.bool_attribute(EXPOSE_PROXY_ATTRIBUTE), Some(true));
    }

    #[test]
    fn test_invalid_include_pattern() {
        let container = Arc::new(DefaultComponentFactory::new());
        let env = Environment::new();
        env.add_property_source(Box::new(MapPropertySource::new("test").with_property(
            "aop.include-patterns",
            ConfigValue::Array(vec![ConfigValue::String("(".to_string())]),
        )));
        let err = AopPlugin::new().configure(&container, &env).unwrap_err();
        assert!(err.is_config());
    }
}
