//! Weaver AOP - 运行时织入引擎
//!
//! 提供：
//! - 切面描述与解析（通知分类、命名切点、declare-parents 引入）
//! - 三种切面实例生命周期：单例、延迟单例、原型
//! - 按组件缓存的通知器注册表
//! - 自动代理创建器的注册升级协议
//! - 拦截器链调度（before / after / around / after-returning / after-throwing）
//! - `#[aspect]` 宏（`weaver-aop-macros`）通过 inventory 自动登记切面

pub mod advice;
pub mod advisor;
pub mod advisor_factory;
pub mod aspect;
pub mod auto_proxy;
pub mod error;
pub mod instance_factory;
pub mod interceptor;
pub mod joinpoint;
pub mod metadata;
pub mod plugin;
pub mod pointcut;
pub mod properties;
pub mod proxy;
pub mod registry;
pub mod target;

// 重新导出核心类型
pub use advice::{classify, Advice, AdviceHandler, AdviceKind, ParamBinding};
pub use advisor::{find_advisors_that_can_apply, Advisor, IntroductionAdvisor, PointcutAdvisor};
pub use advisor_factory::AdvisorFactory;
pub use aspect::{
    global_catalog, AspectAnnotation, AspectCatalog, AspectClass, AspectClassBuilder,
    AspectMethod, AspectRegistration, AspectType, DeclareParents,
};
pub use auto_proxy::{
    force_expose_proxy, register_annotation_aware_auto_proxy_creator_if_necessary,
    register_aspect_aware_auto_proxy_creator_if_necessary,
    register_auto_proxy_creator_if_necessary, register_or_escalate_auto_proxy_creator,
    registered_kind, AutoProxyCreator, AutoProxyCreatorKind, AUTO_PROXY_CREATOR_COMPONENT_NAME,
};
pub use error::{AdviceInvocationError, AopError, AopResult, ConfigError, NoSuchMethodError};
pub use instance_factory::{
    AspectInstanceFactory, ContainerAspectInstanceFactory, LazySingletonInstanceFactoryDecorator,
    PrototypeInstanceFactory, SingletonInstanceFactory, LOWEST_PRECEDENCE,
};
pub use interceptor::{
    AdviceInterceptor, InterceptorChain, InvocationState, MethodInterceptor, MethodInvocation,
};
pub use joinpoint::{JoinPoint, ProceedingJoinPoint};
pub use metadata::{AspectMetadata, PerClauseKind};
pub use plugin::AopPlugin;
pub use pointcut::{ExpressionPointcutEvaluator, Pointcut, PointcutEvaluator};
pub use properties::AopProperties;
pub use proxy::{AopContext, AopProxy, ProxyFactory, ProxyMaterializer};
pub use registry::AdvisorRegistry;
pub use target::{TargetClass, TargetClassCatalog, TargetMethod};

pub use weaver_core::Instance;

// 导出 inventory 供宏使用
pub use inventory;

/// 预导入模块
pub mod prelude {
    pub use crate::advice::AdviceKind;
    pub use crate::advisor::Advisor;
    pub use crate::aspect::{AspectCatalog, AspectClass, AspectType, DeclareParents};
    pub use crate::auto_proxy::{AutoProxyCreator, AutoProxyCreatorKind};
    pub use crate::error::{AdviceInvocationError, AopError, AopResult, ConfigError};
    pub use crate::joinpoint::{JoinPoint, ProceedingJoinPoint};
    pub use crate::plugin::AopPlugin;
    pub use crate::pointcut::{ExpressionPointcutEvaluator, PointcutEvaluator};
    pub use crate::proxy::{AopContext, AopProxy};
    pub use crate::registry::AdvisorRegistry;
    pub use crate::target::{TargetClass, TargetClassCatalog};
    pub use weaver_core::prelude::*;
    pub use std::sync::Arc;
}
