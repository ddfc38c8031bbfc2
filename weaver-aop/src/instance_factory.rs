//! 切面实例工厂
//!
//! - [`SingletonInstanceFactory`]：持有一个现成的实例
//! - [`ContainerAspectInstanceFactory`]：按名称从容器获取
//! - [`PrototypeInstanceFactory`]：容器中的原型组件，每次调用都可能得到新实例
//! - [`LazySingletonInstanceFactoryDecorator`]：包装任意工厂，首次调用时创建并缓存实例

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::ReentrantMutex;
use weaver_core::{CreationMutex, Instance, ListableComponentFactory};

use crate::error::{AopError, AopResult, ConfigError};
use crate::metadata::AspectMetadata;

/// 最低优先级（未声明排序值的切面）
pub const LOWEST_PRECEDENCE: i32 = i32::MAX;

/// 切面实例工厂
pub trait AspectInstanceFactory: Send + Sync {
    /// 获取切面实例
    fn get_instance(&self) -> AopResult<Instance>;

    /// 排序值，数值越小优先级越高
    fn order(&self) -> i32;

    /// 创建实例时应持有的锁；`None` 表示工厂本身保证单例语义
    fn creation_mutex(&self) -> Option<CreationMutex>;

    /// 切面元数据
    fn metadata(&self) -> &Arc<AspectMetadata>;

    /// 实例是否已经创建
    fn is_materialized(&self) -> bool {
        true
    }
}

fn declared_order(metadata: &AspectMetadata) -> i32 {
    metadata
        .aspect_class()
        .order()
        .unwrap_or(LOWEST_PRECEDENCE)
}

/// 持有现成实例的工厂
pub struct SingletonInstanceFactory {
    instance: Instance,
    metadata: Arc<AspectMetadata>,
}

impl SingletonInstanceFactory {
    pub fn new(instance: Instance, metadata: Arc<AspectMetadata>) -> Self {
        Self { instance, metadata }
    }
}

impl AspectInstanceFactory for SingletonInstanceFactory {
    fn get_instance(&self) -> AopResult<Instance> {
        Ok(Arc::clone(&self.instance))
    }

    fn order(&self) -> i32 {
        declared_order(&self.metadata)
    }

    fn creation_mutex(&self) -> Option<CreationMutex> {
        None
    }

    fn metadata(&self) -> &Arc<AspectMetadata> {
        &self.metadata
    }
}

impl fmt::Debug for SingletonInstanceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingletonInstanceFactory")
            .field("aspect", &self.metadata.aspect_name())
            .finish()
    }
}

/// 从容器获取切面组件的工厂
pub struct ContainerAspectInstanceFactory {
    container: Arc<dyn ListableComponentFactory>,
    name: String,
    metadata: Arc<AspectMetadata>,
}

impl ContainerAspectInstanceFactory {
    pub fn new(
        container: Arc<dyn ListableComponentFactory>,
        name: impl Into<String>,
        metadata: Arc<AspectMetadata>,
    ) -> Self {
        Self {
            container,
            name: name.into(),
            metadata,
        }
    }

    /// 组件名称
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AspectInstanceFactory for ContainerAspectInstanceFactory {
    fn get_instance(&self) -> AopResult<Instance> {
        Ok(self.container.get_component(&self.name)?)
    }

    fn order(&self) -> i32 {
        declared_order(&self.metadata)
    }

    fn creation_mutex(&self) -> Option<CreationMutex> {
        if self.container.is_singleton(&self.name) {
            // 容器已保证单例语义
            None
        } else {
            Some(self.container.creation_mutex())
        }
    }

    fn metadata(&self) -> &Arc<AspectMetadata> {
        &self.metadata
    }
}

impl fmt::Debug for ContainerAspectInstanceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerAspectInstanceFactory")
            .field("name", &self.name)
            .finish()
    }
}

/// 原型切面工厂
///
/// 只接受原型作用域的组件
pub struct PrototypeInstanceFactory {
    inner: ContainerAspectInstanceFactory,
}

impl PrototypeInstanceFactory {
    pub fn new(
        container: Arc<dyn ListableComponentFactory>,
        name: impl Into<String>,
        metadata: Arc<AspectMetadata>,
    ) -> AopResult<Self> {
        let name = name.into();
        if !container.is_prototype(&name) {
            return Err(ConfigError::PrototypeRequiresNonSingleton { name }.into());
        }
        Ok(Self {
            inner: ContainerAspectInstanceFactory::new(container, name, metadata),
        })
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }
}

impl AspectInstanceFactory for PrototypeInstanceFactory {
    fn get_instance(&self) -> AopResult<Instance> {
        self.inner.get_instance()
    }

    fn order(&self) -> i32 {
        self.inner.order()
    }

    fn creation_mutex(&self) -> Option<CreationMutex> {
        self.inner.creation_mutex()
    }

    fn metadata(&self) -> &Arc<AspectMetadata> {
        self.inner.metadata()
    }
}

impl fmt::Debug for PrototypeInstanceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrototypeInstanceFactory")
            .field("name", &self.inner.name)
            .finish()
    }
}

/// 延迟单例装饰器
///
/// 首次调用时通过被装饰的工厂创建实例，之后所有调用返回同一个实例。
/// 创建过程在被装饰工厂提供的锁（若有）或装饰器自己的锁下进行双重检查
pub struct LazySingletonInstanceFactoryDecorator {
    delegate: Arc<dyn AspectInstanceFactory>,
    materialized: OnceCell<Instance>,
    monitor: CreationMutex,
}

impl LazySingletonInstanceFactoryDecorator {
    pub fn new(delegate: Arc<dyn AspectInstanceFactory>) -> Self {
        Self {
            delegate,
            materialized: OnceCell::new(),
            monitor: Arc::new(ReentrantMutex::new(())),
        }
    }

    pub fn delegate(&self) -> &Arc<dyn AspectInstanceFactory> {
        &self.delegate
    }
}

impl AspectInstanceFactory for LazySingletonInstanceFactoryDecorator {
    fn get_instance(&self) -> AopResult<Instance> {
        if let Some(instance) = self.materialized.get() {
            return Ok(Arc::clone(instance));
        }

        let mutex = self
            .delegate
            .creation_mutex()
            .unwrap_or_else(|| Arc::clone(&self.monitor));
        let _guard = mutex.lock();
        if let Some(instance) = self.materialized.get() {
            return Ok(Arc::clone(instance));
        }

        let aspect = self.delegate.metadata().aspect_name().to_string();
        let instance = self
            .delegate
            .get_instance()
            .map_err(|e| match e {
                AopError::Container(source) => AopError::AspectInstantiation {
                    aspect,
                    source: source.into(),
                },
                other => other,
            })?;
        tracing::debug!(
            "Materialized aspect instance for '{}'",
            self.delegate.metadata().aspect_name()
        );
        Ok(Arc::clone(self.materialized.get_or_init(|| instance)))
    }

    fn order(&self) -> i32 {
        self.delegate.order()
    }

    fn creation_mutex(&self) -> Option<CreationMutex> {
        self.delegate.creation_mutex()
    }

    fn metadata(&self) -> &Arc<AspectMetadata> {
        self.delegate.metadata()
    }

    fn is_materialized(&self) -> bool {
        self.materialized.get().is_some()
    }
}

impl fmt::Debug for LazySingletonInstanceFactoryDecorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazySingletonInstanceFactoryDecorator")
            .field("aspect", &self.delegate.metadata().aspect_name())
            .field("materialized", &self.is_materialized())
            .finish()
    }
}
