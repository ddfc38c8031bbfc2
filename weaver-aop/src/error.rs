//! 错误类型
//!
//! 配置错误在解析阶段一律致命；调用阶段的错误原样透传

use thiserror::Error;
use weaver_core::ContainerError;

/// 切面配置错误
///
/// 在解析（容器启动或首次代理决策）时同步返回，从不重试或降级为警告
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 不支持的实例化模型（例如 percflow / percflowbelow）
    #[error("Aspect class [{class}] declares per-clause '{clause}', which is not supported")]
    UnsupportedPerClause { class: String, clause: String },

    /// 无法解析的实例化声明
    #[error("Aspect class [{class}] declares a malformed per-clause '{clause}'")]
    MalformedPerClause { class: String, clause: String },

    /// 通知声明在非切面类型上
    #[error("Advice must be declared inside an aspect type: offending method '{method}' in class [{class}]")]
    AdviceOutsideAspect { class: String, method: String },

    /// 通知方法的处理函数与注解类型不一致
    #[error("Advice method '{method}' in class [{class}] is annotated as {annotation} but its handler does not fit that advice kind")]
    AdviceSignatureMismatch {
        class: String,
        method: String,
        annotation: String,
    },

    /// declare-parents 缺少默认实现
    #[error("'default_impl' must be set on declare-parents field '{field}' in class [{class}]")]
    MissingDefaultImpl { class: String, field: String },

    /// 单例组件声明了非单例的实例化模型
    #[error("Component with name '{name}' is a singleton, but aspect instantiation model is not singleton")]
    SingletonContradiction { name: String },

    /// 原型实例工厂要求原型作用域组件
    #[error("Cannot use a prototype aspect instance factory for component '{name}': it is not prototype-scoped")]
    PrototypeRequiresNonSingleton { name: String },

    /// 组件类型不是已知的切面类型
    #[error("Component '{name}' of type [{class}] is not a known aspect type")]
    UnknownAspectType { name: String, class: String },

    /// 未知的自动代理创建器类名
    #[error("Class name [{0}] is not a known auto-proxy creator class")]
    UnknownAutoProxyCreator(String),

    /// 非法的组件名过滤规则
    #[error("Invalid include pattern '{pattern}': {reason}")]
    InvalidIncludePattern { pattern: String, reason: String },
}

/// AOP 操作错误
#[derive(Debug, Error)]
pub enum AopError {
    /// 配置错误
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 容器错误（例如切面组件创建失败）
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// 切面实例无法获取
    #[error("Failed to obtain aspect instance for '{aspect}'")]
    AspectInstantiation {
        aspect: String,
        #[source]
        source: anyhow::Error,
    },
}

impl AopError {
    /// 是否为配置错误
    pub fn is_config(&self) -> bool {
        matches!(self, AopError::Config(_))
    }

    /// 获取配置错误
    pub fn as_config(&self) -> Option<&ConfigError> {
        match self {
            AopError::Config(e) => Some(e),
            _ => None,
        }
    }
}

/// AOP 操作结果
pub type AopResult<T> = Result<T, AopError>;

/// 通知调用错误
///
/// 包装目标方法或通知体抛出的错误；Display 与 source 都委托给原始错误
#[derive(Debug, Error)]
#[error(transparent)]
pub struct AdviceInvocationError(#[from] anyhow::Error);

impl AdviceInvocationError {
    /// 获取原始错误
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    /// 取出原始错误
    pub fn into_inner(self) -> anyhow::Error {
        self.0
    }

    /// 尝试将原始错误转换为具体类型
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }
}

/// 代理上不存在的方法
#[derive(Debug, Error)]
#[error("No method '{method}' on proxied class [{class}]")]
pub struct NoSuchMethodError {
    pub class: String,
    pub method: String,
}
