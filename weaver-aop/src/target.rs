//! 目标类型描述
//!
//! 代理通过方法名分派调用，因此目标类型需要以名称登记其可被拦截的方法

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::RwLock;
use weaver_core::Instance;

use crate::pointcut::simple_name;

/// 类型擦除后的方法调用函数
pub type MethodInvoker =
    Arc<dyn Fn(&Instance, &[Instance]) -> anyhow::Result<Instance> + Send + Sync>;

/// 可被拦截的方法
pub struct TargetMethod {
    name: String,
    invoker: MethodInvoker,
}

impl TargetMethod {
    pub fn new(name: impl Into<String>, invoker: MethodInvoker) -> Self {
        Self {
            name: name.into(),
            invoker,
        }
    }

    /// 由闭包直接构建
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Instance, &[Instance]) -> anyhow::Result<Instance> + Send + Sync + 'static,
    {
        Self::new(name, invoker(f))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 在目标对象上执行方法
    pub fn invoke(&self, target: &Instance, args: &[Instance]) -> anyhow::Result<Instance> {
        (self.invoker)(target, args)
    }
}

impl fmt::Debug for TargetMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetMethod").field("name", &self.name).finish()
    }
}

/// 目标类型
pub struct TargetClass {
    name: String,
    methods: Vec<Arc<TargetMethod>>,
}

impl TargetClass {
    /// 为类型 `T` 创建描述，类名取自 `std::any::type_name::<T>()`
    pub fn builder<T: Any + Send + Sync>() -> TargetClassBuilder<T> {
        TargetClassBuilder {
            name: std::any::type_name::<T>().to_string(),
            methods: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// 完整类型名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 类型名最后一段
    pub fn simple_name(&self) -> &str {
        simple_name(&self.name)
    }

    pub fn methods(&self) -> &[Arc<TargetMethod>] {
        &self.methods
    }

    pub fn method(&self, name: &str) -> Option<&Arc<TargetMethod>> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|m| m.name.as_str())
    }
}

impl fmt::Debug for TargetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetClass")
            .field("name", &self.name)
            .field("methods", &self.method_names().collect::<Vec<_>>())
            .finish()
    }
}

/// 目标类型构建器
pub struct TargetClassBuilder<T> {
    name: String,
    methods: Vec<Arc<TargetMethod>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> TargetClassBuilder<T> {
    /// 覆盖类名（用于无法由 `type_name` 表达的逻辑类型）
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 登记一个方法
    pub fn method<R, F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        R: Any + Send + Sync,
        F: Fn(&T, &[Instance]) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let invoker = erase::<T, R, F>(method);
        self.methods.push(Arc::new(TargetMethod::new(name, invoker)));
        self
    }

    pub fn build(self) -> TargetClass {
        TargetClass {
            name: self.name,
            methods: self.methods,
        }
    }
}

fn erase<T, R, F>(method: F) -> MethodInvoker
where
    T: Any + Send + Sync,
    R: Any + Send + Sync,
    F: Fn(&T, &[Instance]) -> anyhow::Result<R> + Send + Sync + 'static,
{
    invoker(move |target, args| {
        let target = target.downcast_ref::<T>().ok_or_else(|| {
            anyhow!("target is not an instance of {}", std::any::type_name::<T>())
        })?;
        let value = method(target, args)?;
        Ok(Arc::new(value) as Instance)
    })
}

fn invoker<F>(f: F) -> MethodInvoker
where
    F: Fn(&Instance, &[Instance]) -> anyhow::Result<Instance> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// 目标类型目录
///
/// 以类名为键，自动代理创建器通过组件定义中的类名查找方法表
#[derive(Default)]
pub struct TargetClassCatalog {
    classes: RwLock<HashMap<String, Arc<TargetClass>>>,
}

impl TargetClassCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记目标类型
    pub fn register(&self, class: TargetClass) -> Arc<TargetClass> {
        let class = Arc::new(class);
        tracing::debug!("Registering target class '{}'", class.name());
        self.classes
            .write()
            .insert(class.name().to_string(), Arc::clone(&class));
        class
    }

    pub fn get(&self, class_name: &str) -> Option<Arc<TargetClass>> {
        self.classes.read().get(class_name).cloned()
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.classes.read().contains_key(class_name)
    }
}
