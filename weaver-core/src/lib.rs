// weaver-core: 织入引擎所依赖的容器边界
//
// 提供：
// - 组件定义与单例/原型作用域
// - 可列举的组件工厂与组件定义注册表
// - 组件后置处理器（自动代理的挂载点）
// - 分层配置（TOML / 环境变量 / 内存）与日志初始化

pub mod component;
pub mod config;
pub mod error;
pub mod factory;
pub mod logging;
pub mod scope;

pub use component::{ComponentCreator, ComponentDefinition, Instance};
pub use config::{
    ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PropertySource,
    TomlPropertySource,
};
pub use error::{ContainerError, ContainerResult};
pub use factory::{
    ComponentDefinitionRegistry, ComponentFactory, ComponentPostProcessor, CreationMutex,
    DefaultComponentFactory, ListableComponentFactory,
};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use scope::{Role, Scope};

/// Prelude 模块，包含常用的 traits 和类型
pub mod prelude {
    pub use crate::component::{ComponentDefinition, Instance};
    pub use crate::config::{ConfigValue, Environment, MapPropertySource, TomlPropertySource};
    pub use crate::error::{ContainerError, ContainerResult};
    pub use crate::factory::{
        ComponentDefinitionRegistry, ComponentFactory, ComponentPostProcessor,
        DefaultComponentFactory, ListableComponentFactory,
    };
    pub use crate::logging::LoggingConfig;
    pub use crate::scope::{Role, Scope};
    pub use anyhow::{anyhow, Context};
}
