//! 组件定义
//!
//! 描述容器如何创建和管理一个组件

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::ConfigValue;
use crate::scope::{Role, Scope};

/// 类型擦除后的组件实例
pub type Instance = Arc<dyn Any + Send + Sync>;

/// 组件创建函数
pub type ComponentCreator = Arc<dyn Fn() -> anyhow::Result<Instance> + Send + Sync>;

/// 组件定义 - 描述如何创建和管理组件
#[derive(Clone)]
pub struct ComponentDefinition {
    /// 组件名称
    pub name: String,

    /// 组件类型名称（`std::any::type_name` 的结果，或基础设施组件的逻辑类名）
    pub class_name: String,

    /// 组件作用域
    pub scope: Scope,

    /// 组件角色
    pub role: Role,

    /// 是否延迟初始化（仅对单例有效）
    pub lazy: bool,

    /// 附加属性
    pub attributes: HashMap<String, ConfigValue>,

    /// 创建函数；仅承载元数据的定义没有创建函数
    pub creator: Option<ComponentCreator>,
}

impl ComponentDefinition {
    /// 使用类型化的创建函数构建定义，类名取自 `T`
    pub fn new<T, F>(name: impl Into<String>, creator: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let creator: ComponentCreator = Arc::new(move || {
            let instance = creator()?;
            Ok(Arc::new(instance) as Instance)
        });
        Self {
            name: name.into(),
            class_name: std::any::type_name::<T>().to_string(),
            scope: Scope::default(),
            role: Role::default(),
            lazy: false,
            attributes: HashMap::new(),
            creator: Some(creator),
        }
    }

    /// 构建只包含类名的定义（不可实例化）
    pub fn metadata_only(name: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class_name: class_name.into(),
            scope: Scope::default(),
            role: Role::default(),
            lazy: false,
            attributes: HashMap::new(),
            creator: None,
        }
    }

    /// 设置作用域
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// 设置角色
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// 设置延迟初始化
    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// 设置附加属性
    pub fn with_attribute(mut self, key: impl Into<String>, value: ConfigValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// 读取布尔属性
    pub fn bool_attribute(&self, key: &str) -> Option<bool> {
        self.attributes.get(key).and_then(ConfigValue::as_bool)
    }
}

impl fmt::Debug for ComponentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDefinition")
            .field("name", &self.name)
            .field("class_name", &self.class_name)
            .field("scope", &self.scope)
            .field("role", &self.role)
            .field("lazy", &self.lazy)
            .field("attributes", &self.attributes)
            .field("has_creator", &self.creator.is_some())
            .finish()
    }
}
