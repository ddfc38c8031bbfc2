use thiserror::Error;

/// 容器错误
///
/// 组件注册、查找与创建过程中可能出现的错误
#[derive(Debug, Error)]
pub enum ContainerError {
    /// 找不到指定名称的组件
    #[error("No component named '{0}' is defined")]
    ComponentNotFound(String),

    /// 重复注册组件定义
    #[error("Component definition '{0}' is already registered")]
    DuplicateDefinition(String),

    /// 组件定义没有可用的创建函数（例如仅用于元数据的基础设施定义）
    #[error("Component definition '{0}' has no creator")]
    NoCreator(String),

    /// 组件创建失败
    #[error("Failed to create component '{name}'")]
    CreationFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// 后置处理器处理组件失败
    #[error("Post-processor '{processor}' failed on component '{name}'")]
    PostProcessingFailed {
        name: String,
        processor: String,
        #[source]
        source: anyhow::Error,
    },

    /// 配置错误
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ContainerError {
    /// 创建组件创建失败错误
    pub fn creation_failed(name: impl Into<String>, source: anyhow::Error) -> Self {
        Self::CreationFailed {
            name: name.into(),
            source,
        }
    }
}

/// 容器操作结果
pub type ContainerResult<T> = Result<T, ContainerError>;
