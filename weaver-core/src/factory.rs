//! 组件工厂 - 核心容器接口
//!
//! 织入引擎只通过这里定义的 trait 与容器交互：列举组件、查询作用域、按名称获取实例，
//! 以及注册/修改基础设施组件定义

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};

use crate::component::{ComponentDefinition, Instance};
use crate::error::{ContainerError, ContainerResult};
use crate::scope::Scope;

/// 创建锁
///
/// 可重入：持有锁的线程在创建过程中再次进入容器不会死锁
pub type CreationMutex = Arc<ReentrantMutex<()>>;

/// ComponentFactory - 最基础的容器接口
pub trait ComponentFactory: Send + Sync {
    /// 通过名称获取组件
    fn get_component(&self, name: &str) -> ContainerResult<Instance>;

    /// 检查是否包含指定名称的组件
    fn contains_component(&self, name: &str) -> bool;
}

/// ListableComponentFactory - 可列举的组件工厂
pub trait ListableComponentFactory: ComponentFactory {
    /// 按注册顺序返回所有组件名称
    fn component_names(&self) -> Vec<String>;

    /// 获取组件类型名称
    fn component_type(&self, name: &str) -> Option<String>;

    /// 组件是否为单例作用域
    fn is_singleton(&self, name: &str) -> bool;

    /// 组件是否为原型作用域
    fn is_prototype(&self, name: &str) -> bool;

    /// 单例创建锁
    fn creation_mutex(&self) -> CreationMutex;
}

/// ComponentDefinitionRegistry - 组件定义注册表
pub trait ComponentDefinitionRegistry: Send + Sync {
    /// 注册组件定义
    fn register_definition(&self, definition: ComponentDefinition) -> ContainerResult<()>;

    /// 检查是否包含指定的组件定义
    fn contains_definition(&self, name: &str) -> bool;

    /// 获取组件定义副本
    fn definition(&self, name: &str) -> Option<ComponentDefinition>;

    /// 原地修改组件定义
    fn modify_definition(
        &self,
        name: &str,
        modifier: &mut dyn FnMut(&mut ComponentDefinition),
    ) -> ContainerResult<()>;
}

/// 组件后置处理器
///
/// 在组件实例创建完成后调用，可以返回包装后的实例（例如代理）
pub trait ComponentPostProcessor: Send + Sync {
    /// 处理器名称
    fn name(&self) -> &str;

    /// 执行顺序，数值越小越先执行
    fn order(&self) -> i32 {
        0
    }

    /// 初始化后处理
    fn post_process_after_initialization(
        &self,
        component: Instance,
        name: &str,
        class_name: &str,
    ) -> ContainerResult<Instance>;
}

/// DefaultComponentFactory - 所有容器接口的默认实现
pub struct DefaultComponentFactory {
    /// 组件定义
    definitions: RwLock<HashMap<String, ComponentDefinition>>,

    /// 注册顺序
    names: RwLock<Vec<String>>,

    /// 单例缓存
    singletons: RwLock<HashMap<String, Instance>>,

    /// 单例创建锁
    creation_mutex: CreationMutex,

    /// 后置处理器（按 order 排序）
    post_processors: RwLock<Vec<Arc<dyn ComponentPostProcessor>>>,
}

impl DefaultComponentFactory {
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
            names: RwLock::new(Vec::new()),
            singletons: RwLock::new(HashMap::new()),
            creation_mutex: Arc::new(ReentrantMutex::new(())),
            post_processors: RwLock::new(Vec::new()),
        }
    }

    /// 注册单例组件
    pub fn register_singleton<T, F>(&self, name: impl Into<String>, creator: F) -> ContainerResult<()>
    where
        T: std::any::Any + Send + Sync,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register_definition(ComponentDefinition::new(name, creator).with_scope(Scope::Singleton))
    }

    /// 注册原型组件
    pub fn register_prototype<T, F>(&self, name: impl Into<String>, creator: F) -> ContainerResult<()>
    where
        T: std::any::Any + Send + Sync,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register_definition(ComponentDefinition::new(name, creator).with_scope(Scope::Prototype))
    }

    /// 添加后置处理器
    pub fn add_post_processor(&self, processor: Arc<dyn ComponentPostProcessor>) {
        let mut processors = self.post_processors.write();
        tracing::debug!("Adding component post-processor '{}'", processor.name());
        processors.push(processor);
        processors.sort_by_key(|p| p.order());
    }

    /// 获取后置处理器数量
    pub fn post_processor_count(&self) -> usize {
        self.post_processors.read().len()
    }

    /// 预实例化所有非延迟单例
    pub fn preinstantiate_singletons(&self) -> ContainerResult<()> {
        for name in self.component_names() {
            let eager = self
                .definitions
                .read()
                .get(&name)
                .map(|d| d.scope.is_singleton() && !d.lazy && d.creator.is_some())
                .unwrap_or(false);
            if eager {
                self.get_component(&name)?;
            }
        }
        Ok(())
    }

    fn create_component(&self, definition: &ComponentDefinition) -> ContainerResult<Instance> {
        let creator = definition
            .creator
            .as_ref()
            .ok_or_else(|| ContainerError::NoCreator(definition.name.clone()))?;
        let mut instance = creator()
            .map_err(|e| ContainerError::creation_failed(&definition.name, e))?;

        // 克隆列表，允许处理器在执行过程中再次访问容器
        let processors: Vec<_> = self.post_processors.read().clone();
        for processor in processors {
            instance = processor.post_process_after_initialization(
                instance,
                &definition.name,
                &definition.class_name,
            )?;
        }
        tracing::trace!("Created component '{}' ({})", definition.name, definition.scope);
        Ok(instance)
    }
}

impl Default for DefaultComponentFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentFactory for DefaultComponentFactory {
    fn get_component(&self, name: &str) -> ContainerResult<Instance> {
        let definition = self
            .definitions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ContainerError::ComponentNotFound(name.to_string()))?;

        if definition.scope.is_prototype() {
            return self.create_component(&definition);
        }

        if let Some(instance) = self.singletons.read().get(name) {
            return Ok(Arc::clone(instance));
        }

        let _guard = self.creation_mutex.lock();
        if let Some(instance) = self.singletons.read().get(name) {
            return Ok(Arc::clone(instance));
        }
        let instance = self.create_component(&definition)?;
        self.singletons
            .write()
            .insert(name.to_string(), Arc::clone(&instance));
        Ok(instance)
    }

    fn contains_component(&self, name: &str) -> bool {
        self.definitions.read().contains_key(name)
    }
}

impl ListableComponentFactory for DefaultComponentFactory {
    fn component_names(&self) -> Vec<String> {
        self.names.read().clone()
    }

    fn component_type(&self, name: &str) -> Option<String> {
        self.definitions.read().get(name).map(|d| d.class_name.clone())
    }

    fn is_singleton(&self, name: &str) -> bool {
        self.definitions
            .read()
            .get(name)
            .map(|d| d.scope.is_singleton())
            .unwrap_or(false)
    }

    fn is_prototype(&self, name: &str) -> bool {
        self.definitions
            .read()
            .get(name)
            .map(|d| d.scope.is_prototype())
            .unwrap_or(false)
    }

    fn creation_mutex(&self) -> CreationMutex {
        Arc::clone(&self.creation_mutex)
    }
}

impl ComponentDefinitionRegistry for DefaultComponentFactory {
    fn register_definition(&self, definition: ComponentDefinition) -> ContainerResult<()> {
        let mut definitions = self.definitions.write();
        if definitions.contains_key(&definition.name) {
            return Err(ContainerError::DuplicateDefinition(definition.name));
        }
        tracing::debug!(
            "Registering component '{}' ({}, {})",
            definition.name,
            definition.class_name,
            definition.scope
        );
        self.names.write().push(definition.name.clone());
        definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    fn contains_definition(&self, name: &str) -> bool {
        self.definitions.read().contains_key(name)
    }

    fn definition(&self, name: &str) -> Option<ComponentDefinition> {
        self.definitions.read().get(name).cloned()
    }

    fn modify_definition(
        &self,
        name: &str,
        modifier: &mut dyn FnMut(&mut ComponentDefinition),
    ) -> ContainerResult<()> {
        let mut definitions = self.definitions.write();
        let definition = definitions
            .get_mut(name)
            .ok_or_else(|| ContainerError::ComponentNotFound(name.to_string()))?;
        modifier(definition);
        Ok(())
    }
}
