//! 自动代理创建器
//!
//! 每个容器只有一个自动代理基础设施组件。注册时按能力升级：
//! `Infrastructure < AspectAware < AnnotationAware`，降级请求被忽略

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use weaver_core::{
    ComponentDefinition, ComponentDefinitionRegistry, ComponentPostProcessor, ConfigValue,
    ContainerError, ContainerResult, Instance, Role,
};

use crate::advisor::{find_advisors_that_can_apply, Advisor};
use crate::error::{AopResult, ConfigError};
use crate::instance_factory::LOWEST_PRECEDENCE;
use crate::pointcut::PointcutEvaluator;
use crate::proxy::{AopProxy, ProxyMaterializer};
use crate::registry::AdvisorRegistry;
use crate::target::{TargetClass, TargetClassCatalog};

/// 自动代理创建器的组件名称
pub const AUTO_PROXY_CREATOR_COMPONENT_NAME: &str = "weaver.aop.internalAutoProxyCreator";

/// 暴露代理的定义属性
pub const EXPOSE_PROXY_ATTRIBUTE: &str = "expose_proxy";

/// 自动代理创建器的能力等级，声明顺序即优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AutoProxyCreatorKind {
    /// 只使用基础设施角色的通知器
    Infrastructure,
    /// 使用所有显式登记的通知器
    AspectAware,
    /// 另外解析容器中所有带注解的切面
    AnnotationAware,
}

impl AutoProxyCreatorKind {
    pub const ALL: [AutoProxyCreatorKind; 3] = [
        AutoProxyCreatorKind::Infrastructure,
        AutoProxyCreatorKind::AspectAware,
        AutoProxyCreatorKind::AnnotationAware,
    ];

    /// 组件定义中记录的类名
    pub fn class_name(self) -> &'static str {
        match self {
            AutoProxyCreatorKind::Infrastructure => {
                "weaver_aop::InfrastructureAdvisorAutoProxyCreator"
            }
            AutoProxyCreatorKind::AspectAware => "weaver_aop::AspectAwareAdvisorAutoProxyCreator",
            AutoProxyCreatorKind::AnnotationAware => {
                "weaver_aop::AnnotationAwareAspectAutoProxyCreator"
            }
        }
    }

    /// 由类名还原能力等级
    pub fn from_class_name(class_name: &str) -> Result<Self, ConfigError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.class_name() == class_name)
            .ok_or_else(|| ConfigError::UnknownAutoProxyCreator(class_name.to_string()))
    }
}

impl fmt::Display for AutoProxyCreatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutoProxyCreatorKind::Infrastructure => write!(f, "infrastructure"),
            AutoProxyCreatorKind::AspectAware => write!(f, "aspect-aware"),
            AutoProxyCreatorKind::AnnotationAware => write!(f, "annotation-aware"),
        }
    }
}

/// 注册或升级自动代理创建器
///
/// 返回是否新注册了组件；已有组件时只会原地升级，不会降级
pub fn register_or_escalate_auto_proxy_creator(
    registry: &dyn ComponentDefinitionRegistry,
    kind: AutoProxyCreatorKind,
) -> AopResult<bool> {
    if let Some(existing) = registry.definition(AUTO_PROXY_CREATOR_COMPONENT_NAME) {
        let current = AutoProxyCreatorKind::from_class_name(&existing.class_name)?;
        if current < kind {
            registry.modify_definition(AUTO_PROXY_CREATOR_COMPONENT_NAME, &mut |definition| {
                definition.class_name = kind.class_name().to_string();
            })?;
            tracing::info!("Escalated auto-proxy creator from {} to {}", current, kind);
        } else {
            tracing::debug!(
                "Auto-proxy creator already registered as {}, ignoring request for {}",
                current,
                kind
            );
        }
        return Ok(false);
    }

    registry.register_definition(
        ComponentDefinition::metadata_only(AUTO_PROXY_CREATOR_COMPONENT_NAME, kind.class_name())
            .with_role(Role::Infrastructure),
    )?;
    tracing::info!("Registered {} auto-proxy creator", kind);
    Ok(true)
}

pub fn register_auto_proxy_creator_if_necessary(
    registry: &dyn ComponentDefinitionRegistry,
) -> AopResult<bool> {
    register_or_escalate_auto_proxy_creator(registry, AutoProxyCreatorKind::Infrastructure)
}

pub fn register_aspect_aware_auto_proxy_creator_if_necessary(
    registry: &dyn ComponentDefinitionRegistry,
) -> AopResult<bool> {
    register_or_escalate_auto_proxy_creator(registry, AutoProxyCreatorKind::AspectAware)
}

pub fn register_annotation_aware_auto_proxy_creator_if_necessary(
    registry: &dyn ComponentDefinitionRegistry,
) -> AopResult<bool> {
    register_or_escalate_auto_proxy_creator(registry, AutoProxyCreatorKind::AnnotationAware)
}

/// 要求已注册的自动代理创建器暴露代理；未注册时不做任何事
pub fn force_expose_proxy(registry: &dyn ComponentDefinitionRegistry) -> AopResult<()> {
    if registry.contains_definition(AUTO_PROXY_CREATOR_COMPONENT_NAME) {
        registry.modify_definition(AUTO_PROXY_CREATOR_COMPONENT_NAME, &mut |definition| {
            definition
                .attributes
                .insert(EXPOSE_PROXY_ATTRIBUTE.to_string(), ConfigValue::Bool(true));
        })?;
    }
    Ok(())
}

/// 当前注册的能力等级
pub fn registered_kind(
    registry: &dyn ComponentDefinitionRegistry,
) -> AopResult<Option<AutoProxyCreatorKind>> {
    registry
        .definition(AUTO_PROXY_CREATOR_COMPONENT_NAME)
        .map(|definition| AutoProxyCreatorKind::from_class_name(&definition.class_name))
        .transpose()
        .map_err(Into::into)
}

/// 自动代理创建器
///
/// 作为组件后置处理器运行：为每个新创建的组件选出可应用的通知器，
/// 非空时交给代理生成器包装。切面组件与基础设施组件不会被代理
pub struct AutoProxyCreator {
    kind: AutoProxyCreatorKind,
    evaluator: Arc<dyn PointcutEvaluator>,
    materializer: Arc<dyn ProxyMaterializer>,
    target_classes: Arc<TargetClassCatalog>,
    advisor_registry: Option<Arc<AdvisorRegistry>>,
    definitions: Option<Arc<dyn ComponentDefinitionRegistry>>,
    explicit_advisors: RwLock<Vec<(Advisor, Role)>>,
    skipped: RwLock<HashSet<String>>,
    order: i32,
}

impl AutoProxyCreator {
    pub fn new(
        kind: AutoProxyCreatorKind,
        evaluator: Arc<dyn PointcutEvaluator>,
        materializer: Arc<dyn ProxyMaterializer>,
        target_classes: Arc<TargetClassCatalog>,
    ) -> Self {
        Self {
            kind,
            evaluator,
            materializer,
            target_classes,
            advisor_registry: None,
            definitions: None,
            explicit_advisors: RwLock::new(Vec::new()),
            skipped: RwLock::new(HashSet::new()),
            order: LOWEST_PRECEDENCE,
        }
    }

    /// 解析容器切面所用的注册表（仅 AnnotationAware 使用）
    pub fn with_advisor_registry(mut self, registry: Arc<AdvisorRegistry>) -> Self {
        self.advisor_registry = Some(registry);
        self
    }

    /// 用于识别基础设施组件的定义注册表
    pub fn with_definitions(mut self, definitions: Arc<dyn ComponentDefinitionRegistry>) -> Self {
        self.definitions = Some(definitions);
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn kind(&self) -> AutoProxyCreatorKind {
        self.kind
    }

    /// 显式登记一个通知器
    pub fn add_advisor(&self, advisor: Advisor, role: Role) {
        self.explicit_advisors.write().push((advisor, role));
    }

    /// 按能力等级收集候选通知器
    pub fn candidate_advisors(&self) -> AopResult<Vec<Advisor>> {
        let mut candidates: Vec<Advisor> = self
            .explicit_advisors
            .read()
            .iter()
            .filter(|(_, role)| {
                self.kind != AutoProxyCreatorKind::Infrastructure || *role == Role::Infrastructure
            })
            .map(|(advisor, _)| advisor.clone())
            .collect();

        if self.kind == AutoProxyCreatorKind::AnnotationAware {
            if let Some(registry) = &self.advisor_registry {
                candidates.extend(registry.build_all_advisors()?);
            }
        }
        Ok(candidates)
    }

    /// 适用于目标类型的通知器
    pub fn advisors_for(&self, class: &TargetClass) -> AopResult<Vec<Advisor>> {
        let candidates = self.candidate_advisors()?;
        Ok(find_advisors_that_can_apply(
            &candidates,
            self.evaluator.as_ref(),
            class,
        ))
    }

    /// 组件是否不参与代理
    pub fn should_skip(&self, name: &str, class_name: &str) -> AopResult<bool> {
        if self.skipped.read().contains(name) {
            return Ok(true);
        }
        if AutoProxyCreatorKind::from_class_name(class_name).is_ok() {
            return Ok(true);
        }
        let infrastructure = self
            .definitions
            .as_ref()
            .and_then(|definitions| definitions.definition(name))
            .map(|definition| definition.role == Role::Infrastructure)
            .unwrap_or(false);
        if infrastructure {
            return Ok(true);
        }
        match &self.advisor_registry {
            Some(registry) => Ok(registry.advisor_factory().is_aspect(class_name)
                || registry.aspect_names()?.iter().any(|aspect| aspect == name)),
            None => Ok(false),
        }
    }

    /// 指定组件永不代理
    pub fn skip(&self, name: impl Into<String>) {
        self.skipped.write().insert(name.into());
    }

    fn wrap_if_necessary(
        &self,
        component: Instance,
        name: &str,
        class_name: &str,
    ) -> AopResult<Instance> {
        if component.is::<AopProxy>() || self.should_skip(name, class_name)? {
            return Ok(component);
        }
        let Some(class) = self.target_classes.get(class_name) else {
            tracing::trace!("No target class registered for '{}' ({})", name, class_name);
            return Ok(component);
        };

        let advisors = self.advisors_for(&class)?;
        if advisors.is_empty() {
            return Ok(component);
        }
        tracing::debug!(
            "Proxying component '{}' with {} advisors",
            name,
            advisors.len()
        );
        Ok(self
            .materializer
            .wrap_with_interceptors(component, class, advisors))
    }
}

impl ComponentPostProcessor for AutoProxyCreator {
    fn name(&self) -> &str {
        self.kind.class_name()
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn post_process_after_initialization(
        &self,
        component: Instance,
        name: &str,
        class_name: &str,
    ) -> ContainerResult<Instance> {
        self.wrap_if_necessary(component, name, class_name)
            .map_err(|e| ContainerError::PostProcessingFailed {
                name: name.to_string(),
                processor: self.kind.class_name().to_string(),
                source: anyhow::Error::new(e),
            })
    }
}

impl fmt::Debug for AutoProxyCreator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoProxyCreator")
            .field("kind", &self.kind)
            .field("explicit_advisors", &self.explicit_advisors.read().len())
            .field("order", &self.order)
            .finish()
    }
}
