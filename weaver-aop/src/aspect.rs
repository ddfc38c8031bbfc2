//! 切面（Aspect）定义
//!
//! [`AspectClass`] 是切面类型的结构化描述：实例化模型、排序值、带注解的方法以及
//! declare-parents 字段。描述可以手写（[`AspectClass::builder`]），也可以由 `#[aspect]`
//! 宏在编译期生成并通过 inventory 自动登记

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use weaver_core::Instance;

use crate::advice::{
    AdviceHandler, AroundAdviceFn, ParamBinding, PlainAdviceFn, ReturningAdviceFn,
    ThrowingAdviceFn,
};
use crate::joinpoint::{JoinPoint, ProceedingJoinPoint};
use crate::pointcut::simple_name;

/// 方法上的切面注解
#[derive(Debug, Clone)]
pub enum AspectAnnotation {
    /// 命名切点，可在通知表达式中以 `name()` 引用
    Pointcut(String),
    Before(String),
    After(String),
    Around(String),
    AfterReturning {
        pointcut: String,
        returning: Option<ParamBinding>,
    },
    AfterThrowing {
        pointcut: String,
        throwing: Option<ParamBinding>,
    },
}

impl AspectAnnotation {
    /// 注解中的切点表达式
    pub fn pointcut_expression(&self) -> &str {
        match self {
            AspectAnnotation::Pointcut(expr)
            | AspectAnnotation::Before(expr)
            | AspectAnnotation::After(expr)
            | AspectAnnotation::Around(expr) => expr,
            AspectAnnotation::AfterReturning { pointcut, .. }
            | AspectAnnotation::AfterThrowing { pointcut, .. } => pointcut,
        }
    }

    /// 注解名称
    pub fn name(&self) -> &'static str {
        match self {
            AspectAnnotation::Pointcut(_) => "pointcut",
            AspectAnnotation::Before(_) => "before",
            AspectAnnotation::After(_) => "after",
            AspectAnnotation::Around(_) => "around",
            AspectAnnotation::AfterReturning { .. } => "after_returning",
            AspectAnnotation::AfterThrowing { .. } => "after_throwing",
        }
    }

    /// 返回值 / 异常参数绑定
    pub fn binding(&self) -> Option<&ParamBinding> {
        match self {
            AspectAnnotation::AfterReturning { returning, .. } => returning.as_ref(),
            AspectAnnotation::AfterThrowing { throwing, .. } => throwing.as_ref(),
            _ => None,
        }
    }
}

/// 切面类型上的方法
#[derive(Debug, Clone)]
pub struct AspectMethod {
    name: String,
    annotation: Option<AspectAnnotation>,
    handler: Option<AdviceHandler>,
}

impl AspectMethod {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotation: None,
            handler: None,
        }
    }

    pub fn with_annotation(mut self, annotation: AspectAnnotation) -> Self {
        self.annotation = Some(annotation);
        self
    }

    pub fn with_handler(mut self, handler: AdviceHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn annotation(&self) -> Option<&AspectAnnotation> {
        self.annotation.as_ref()
    }

    pub fn handler(&self) -> Option<&AdviceHandler> {
        self.handler.as_ref()
    }

    /// 是否为命名切点方法
    pub fn is_pointcut(&self) -> bool {
        matches!(self.annotation, Some(AspectAnnotation::Pointcut(_)))
    }
}

/// 引入的默认实现工厂，每个被代理的目标创建一个实例
pub type DelegateFactory = Arc<dyn Fn() -> Instance + Send + Sync>;

/// declare-parents 声明：让匹配的类型额外实现某个接口
#[derive(Clone)]
pub struct DeclareParents {
    interface: String,
    types_matching: String,
    default_impl: Option<DelegateFactory>,
}

impl DeclareParents {
    pub fn new(interface: impl Into<String>, types_matching: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            types_matching: types_matching.into(),
            default_impl: None,
        }
    }

    /// 设置默认实现
    pub fn default_impl<D, F>(mut self, factory: F) -> Self
    where
        D: Any + Send + Sync,
        F: Fn() -> D + Send + Sync + 'static,
    {
        self.default_impl = Some(Arc::new(move || Arc::new(factory()) as Instance));
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn types_matching(&self) -> &str {
        &self.types_matching
    }

    pub fn default_impl_factory(&self) -> Option<&DelegateFactory> {
        self.default_impl.as_ref()
    }
}

impl fmt::Debug for DeclareParents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeclareParents")
            .field("interface", &self.interface)
            .field("types_matching", &self.types_matching)
            .field("has_default_impl", &self.default_impl.is_some())
            .finish()
    }
}

/// 切面类型上的字段
#[derive(Debug, Clone)]
pub struct AspectField {
    name: String,
    declare_parents: Option<DeclareParents>,
}

impl AspectField {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declare_parents(&self) -> Option<&DeclareParents> {
        self.declare_parents.as_ref()
    }
}

/// 切面类型描述
#[derive(Debug, Clone)]
pub struct AspectClass {
    type_name: String,
    name: String,
    is_aspect: bool,
    per_clause: String,
    order: Option<i32>,
    methods: Vec<AspectMethod>,
    fields: Vec<AspectField>,
}

impl AspectClass {
    /// 为类型 `A` 创建描述
    pub fn builder<A: Any + Send + Sync>() -> AspectClassBuilder<A> {
        let type_name = type_name::<A>();
        AspectClassBuilder {
            class: AspectClass {
                type_name: type_name.to_string(),
                name: simple_name(type_name).to_string(),
                is_aspect: true,
                per_clause: String::new(),
                order: None,
                methods: Vec::new(),
                fields: Vec::new(),
            },
            _marker: PhantomData,
        }
    }

    /// 完整类型名（目录键，与组件定义中的类名一致）
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// 简短名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 是否带有切面标记
    pub fn is_aspect(&self) -> bool {
        self.is_aspect
    }

    /// 实例化模型声明，空字符串表示单例
    pub fn per_clause(&self) -> &str {
        &self.per_clause
    }

    /// 声明的排序值
    pub fn order(&self) -> Option<i32> {
        self.order
    }

    pub fn methods(&self) -> &[AspectMethod] {
        &self.methods
    }

    pub fn method(&self, name: &str) -> Option<&AspectMethod> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn fields(&self) -> &[AspectField] {
        &self.fields
    }

    /// 命名切点：方法名 -> 表达式
    pub fn named_pointcuts(&self) -> HashMap<&str, &str> {
        self.methods
            .iter()
            .filter_map(|m| match &m.annotation {
                Some(AspectAnnotation::Pointcut(expr)) => Some((m.name.as_str(), expr.as_str())),
                _ => None,
            })
            .collect()
    }
}

/// 切面描述构建器
pub struct AspectClassBuilder<A> {
    class: AspectClass,
    _marker: PhantomData<fn() -> A>,
}

impl<A: Any + Send + Sync> AspectClassBuilder<A> {
    /// 覆盖简短名称
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.class.name = name.into();
        self
    }

    /// 实例化模型，例如 `pertarget(within(*Service))`
    pub fn per_clause(mut self, clause: impl Into<String>) -> Self {
        self.class.per_clause = clause.into();
        self
    }

    pub fn order(mut self, order: i32) -> Self {
        self.class.order = Some(order);
        self
    }

    /// 去掉切面标记（描述一个普通类型）
    pub fn not_aspect(mut self) -> Self {
        self.class.is_aspect = false;
        self
    }

    /// 无注解的普通方法
    pub fn method(self, name: impl Into<String>) -> Self {
        self.raw_method(AspectMethod::new(name))
    }

    /// 直接添加方法描述
    pub fn raw_method(mut self, method: AspectMethod) -> Self {
        self.class.methods.push(method);
        self
    }

    /// 命名切点
    pub fn pointcut(self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.raw_method(
            AspectMethod::new(name).with_annotation(AspectAnnotation::Pointcut(expression.into())),
        )
    }

    /// 前置通知
    pub fn before<F>(self, name: impl Into<String>, pointcut: impl Into<String>, advice: F) -> Self
    where
        F: Fn(&A, &JoinPoint<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.advice(
            name,
            AspectAnnotation::Before(pointcut.into()),
            AdviceHandler::Plain(plain::<A, F>(advice)),
        )
    }

    /// 后置通知
    pub fn after<F>(self, name: impl Into<String>, pointcut: impl Into<String>, advice: F) -> Self
    where
        F: Fn(&A, &JoinPoint<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.advice(
            name,
            AspectAnnotation::After(pointcut.into()),
            AdviceHandler::Plain(plain::<A, F>(advice)),
        )
    }

    /// 环绕通知
    pub fn around<F>(self, name: impl Into<String>, pointcut: impl Into<String>, advice: F) -> Self
    where
        F: Fn(&A, ProceedingJoinPoint<'_>) -> anyhow::Result<Instance> + Send + Sync + 'static,
    {
        let handler = around_fn(move |aspect, pjp| advice(aspect_ref::<A>(aspect)?, pjp));
        self.advice(
            name,
            AspectAnnotation::Around(pointcut.into()),
            AdviceHandler::Around(handler),
        )
    }

    /// 返回后通知（不绑定返回值）
    pub fn after_returning<F>(
        self,
        name: impl Into<String>,
        pointcut: impl Into<String>,
        advice: F,
    ) -> Self
    where
        F: Fn(&A, &JoinPoint<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler = returning_fn(move |aspect, jp, _value| advice(aspect_ref::<A>(aspect)?, jp));
        self.advice(
            name,
            AspectAnnotation::AfterReturning {
                pointcut: pointcut.into(),
                returning: None,
            },
            AdviceHandler::Returning(handler),
        )
    }

    /// 返回后通知，返回值以类型 `R` 绑定到参数 `returning`；类型不符时通知不执行
    pub fn after_returning_bound<R, F>(
        self,
        name: impl Into<String>,
        pointcut: impl Into<String>,
        returning: impl Into<String>,
        advice: F,
    ) -> Self
    where
        R: Any + Send + Sync,
        F: Fn(&A, &JoinPoint<'_>, &R) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler = returning_fn(move |aspect, jp, value| match value.downcast_ref::<R>() {
            Some(value) => advice(aspect_ref::<A>(aspect)?, jp, value),
            None => Ok(()),
        });
        self.advice(
            name,
            AspectAnnotation::AfterReturning {
                pointcut: pointcut.into(),
                returning: Some(ParamBinding::returning::<R>(returning)),
            },
            AdviceHandler::Returning(handler),
        )
    }

    /// 异常通知（不限定错误类型）
    pub fn after_throwing<F>(
        self,
        name: impl Into<String>,
        pointcut: impl Into<String>,
        advice: F,
    ) -> Self
    where
        F: Fn(&A, &JoinPoint<'_>, &anyhow::Error) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler = throwing_fn(move |aspect, jp, error| advice(aspect_ref::<A>(aspect)?, jp, error));
        self.advice(
            name,
            AspectAnnotation::AfterThrowing {
                pointcut: pointcut.into(),
                throwing: None,
            },
            AdviceHandler::Throwing(handler),
        )
    }

    /// 异常通知，只在错误类型为 `E` 时执行
    pub fn after_throwing_bound<E, F>(
        self,
        name: impl Into<String>,
        pointcut: impl Into<String>,
        throwing: impl Into<String>,
        advice: F,
    ) -> Self
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
        F: Fn(&A, &JoinPoint<'_>, &E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler = throwing_fn(move |aspect, jp, error| match error.downcast_ref::<E>() {
            Some(error) => advice(aspect_ref::<A>(aspect)?, jp, error),
            None => Ok(()),
        });
        self.advice(
            name,
            AspectAnnotation::AfterThrowing {
                pointcut: pointcut.into(),
                throwing: Some(ParamBinding::throwing::<E>(throwing)),
            },
            AdviceHandler::Throwing(handler),
        )
    }

    /// declare-parents 字段
    pub fn declare_parents(mut self, field: impl Into<String>, parents: DeclareParents) -> Self {
        self.class.fields.push(AspectField {
            name: field.into(),
            declare_parents: Some(parents),
        });
        self
    }

    fn advice(
        self,
        name: impl Into<String>,
        annotation: AspectAnnotation,
        handler: AdviceHandler,
    ) -> Self {
        self.raw_method(
            AspectMethod::new(name)
                .with_annotation(annotation)
                .with_handler(handler),
        )
    }

    pub fn build(self) -> AspectClass {
        self.class
    }
}

fn aspect_ref<A: Any>(aspect: &Instance) -> anyhow::Result<&A> {
    aspect
        .downcast_ref::<A>()
        .ok_or_else(|| anyhow!("aspect instance is not a {}", type_name::<A>()))
}

fn plain<A, F>(advice: F) -> PlainAdviceFn
where
    A: Any + Send + Sync,
    F: Fn(&A, &JoinPoint<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    plain_fn(move |aspect, jp| advice(aspect_ref::<A>(aspect)?, jp))
}

fn plain_fn<F>(f: F) -> PlainAdviceFn
where
    F: Fn(&Instance, &JoinPoint<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn returning_fn<F>(f: F) -> ReturningAdviceFn
where
    F: Fn(&Instance, &JoinPoint<'_>, &Instance) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn throwing_fn<F>(f: F) -> ThrowingAdviceFn
where
    F: Fn(&Instance, &JoinPoint<'_>, &anyhow::Error) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn around_fn<F>(f: F) -> AroundAdviceFn
where
    F: Fn(&Instance, ProceedingJoinPoint<'_>) -> anyhow::Result<Instance> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// 由 `#[aspect]` 宏实现的切面类型
pub trait AspectType: Any + Send + Sync {
    fn aspect_class() -> AspectClass;
}

/// 切面注册器
///
/// 用于 inventory 自动收集切面描述
pub struct AspectRegistration {
    class: fn() -> AspectClass,
}

impl AspectRegistration {
    pub const fn new(class: fn() -> AspectClass) -> Self {
        Self { class }
    }

    /// 生成切面描述
    pub fn aspect_class(&self) -> AspectClass {
        (self.class)()
    }
}

// 使用 inventory 收集所有切面注册器
inventory::collect!(AspectRegistration);

/// 切面目录
///
/// 以完整类型名为键保存切面描述，相当于运行时的结构化反射
#[derive(Default)]
pub struct AspectCatalog {
    classes: RwLock<HashMap<String, Arc<AspectClass>>>,
}

impl AspectCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加载所有通过 inventory 登记的切面
    pub fn from_inventory() -> Self {
        let catalog = Self::new();
        for registration in inventory::iter::<AspectRegistration>() {
            catalog.register(registration.aspect_class());
        }
        catalog
    }

    /// 登记描述，同名描述会被替换
    pub fn register(&self, class: AspectClass) -> Arc<AspectClass> {
        let class = Arc::new(class);
        tracing::debug!(
            "Registering aspect class '{}' ({} methods)",
            class.type_name(),
            class.methods().len()
        );
        self.classes
            .write()
            .insert(class.type_name().to_string(), Arc::clone(&class));
        class
    }

    /// 登记实现了 [`AspectType`] 的类型
    pub fn register_type<A: AspectType>(&self) -> Arc<AspectClass> {
        self.register(A::aspect_class())
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<AspectClass>> {
        self.classes.read().get(type_name).cloned()
    }

    /// 类型是否为已登记的切面
    pub fn is_aspect(&self, type_name: &str) -> bool {
        self.classes
            .read()
            .get(type_name)
            .map(|c| c.is_aspect())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }
}

/// 全局切面目录
///
/// 首次访问时加载所有通过 inventory 登记的切面
static GLOBAL_ASPECT_CATALOG: Lazy<Arc<AspectCatalog>> =
    Lazy::new(|| Arc::new(AspectCatalog::from_inventory()));

/// 获取全局切面目录
pub fn global_catalog() -> &'static Arc<AspectCatalog> {
    &GLOBAL_ASPECT_CATALOG
}
