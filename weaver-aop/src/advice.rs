//! 通知（Advice）定义
//!
//! 通知种类、通知处理函数以及绑定了切面实例工厂的通知对象

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use weaver_core::Instance;

use crate::aspect::{AspectAnnotation, AspectMethod};
use crate::error::AopResult;
use crate::instance_factory::AspectInstanceFactory;
use crate::joinpoint::{JoinPoint, ProceedingJoinPoint};
use crate::pointcut::Pointcut;

/// 通知类型
///
/// 声明顺序即排序优先级：Around < Before < After < AfterReturning < AfterThrowing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AdviceKind {
    /// 环绕通知（可以控制方法执行）
    Around,
    /// 前置通知
    Before,
    /// 后置通知（无论成功还是失败都执行）
    After,
    /// 返回后通知（成功返回时执行）
    AfterReturning,
    /// 异常通知（抛出异常时执行）
    AfterThrowing,
}

impl AdviceKind {
    /// 对应的注解名称
    pub fn annotation_name(&self) -> &'static str {
        match self {
            AdviceKind::Around => "around",
            AdviceKind::Before => "before",
            AdviceKind::After => "after",
            AdviceKind::AfterReturning => "after_returning",
            AdviceKind::AfterThrowing => "after_throwing",
        }
    }
}

impl fmt::Display for AdviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.annotation_name())
    }
}

/// 根据方法上的注解确定通知类型
///
/// 没有注解或只声明切点的方法返回 `None`
pub fn classify(method: &AspectMethod) -> Option<AdviceKind> {
    match method.annotation()? {
        AspectAnnotation::Pointcut(_) => None,
        AspectAnnotation::Before(_) => Some(AdviceKind::Before),
        AspectAnnotation::After(_) => Some(AdviceKind::After),
        AspectAnnotation::Around(_) => Some(AdviceKind::Around),
        AspectAnnotation::AfterReturning { .. } => Some(AdviceKind::AfterReturning),
        AspectAnnotation::AfterThrowing { .. } => Some(AdviceKind::AfterThrowing),
    }
}

/// 前置 / 后置通知处理函数
pub type PlainAdviceFn =
    Arc<dyn Fn(&Instance, &JoinPoint<'_>) -> anyhow::Result<()> + Send + Sync>;

/// 返回后通知处理函数（第三个参数为返回值）
pub type ReturningAdviceFn =
    Arc<dyn Fn(&Instance, &JoinPoint<'_>, &Instance) -> anyhow::Result<()> + Send + Sync>;

/// 异常通知处理函数（第三个参数为目标抛出的错误）
pub type ThrowingAdviceFn =
    Arc<dyn Fn(&Instance, &JoinPoint<'_>, &anyhow::Error) -> anyhow::Result<()> + Send + Sync>;

/// 环绕通知处理函数
pub type AroundAdviceFn =
    Arc<dyn Fn(&Instance, ProceedingJoinPoint<'_>) -> anyhow::Result<Instance> + Send + Sync>;

/// 通知方法的可调用形态
#[derive(Clone)]
pub enum AdviceHandler {
    Plain(PlainAdviceFn),
    Returning(ReturningAdviceFn),
    Throwing(ThrowingAdviceFn),
    Around(AroundAdviceFn),
}

impl AdviceHandler {
    /// 处理函数能否承载指定类型的通知
    pub fn fits(&self, kind: AdviceKind) -> bool {
        matches!(
            (self, kind),
            (AdviceHandler::Plain(_), AdviceKind::Before)
                | (AdviceHandler::Plain(_), AdviceKind::After)
                | (AdviceHandler::Returning(_), AdviceKind::AfterReturning)
                | (AdviceHandler::Throwing(_), AdviceKind::AfterThrowing)
                | (AdviceHandler::Around(_), AdviceKind::Around)
        )
    }

    fn shape(&self) -> &'static str {
        match self {
            AdviceHandler::Plain(_) => "Plain",
            AdviceHandler::Returning(_) => "Returning",
            AdviceHandler::Throwing(_) => "Throwing",
            AdviceHandler::Around(_) => "Around",
        }
    }
}

impl fmt::Debug for AdviceHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AdviceHandler::{}", self.shape())
    }
}

#[derive(Clone, Copy)]
enum BindingCheck {
    Value(TypeId),
    AnyValue,
    Error(fn(&anyhow::Error) -> bool),
}

/// 返回值 / 异常参数绑定
///
/// 记录参数名以及参数声明的类型，用于在调用时判断通知是否适用
#[derive(Clone)]
pub struct ParamBinding {
    name: String,
    type_name: &'static str,
    check: BindingCheck,
}

impl ParamBinding {
    /// 绑定类型为 `R` 的返回值
    pub fn returning<R: Any>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: std::any::type_name::<R>(),
            check: BindingCheck::Value(TypeId::of::<R>()),
        }
    }

    /// 绑定任意类型的返回值
    pub fn returning_any(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: "any",
            check: BindingCheck::AnyValue,
        }
    }

    /// 绑定类型为 `E` 的错误
    pub fn throwing<E>(name: impl Into<String>) -> Self
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        fn is<E: fmt::Display + fmt::Debug + Send + Sync + 'static>(e: &anyhow::Error) -> bool {
            e.is::<E>()
        }
        Self {
            name: name.into(),
            type_name: std::any::type_name::<E>(),
            check: BindingCheck::Error(is::<E>),
        }
    }

    /// 参数名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 声明的参数类型
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// 返回值是否匹配声明的类型
    pub fn accepts_value(&self, value: &Instance) -> bool {
        match self.check {
            BindingCheck::Value(type_id) => value.as_ref().type_id() == type_id,
            BindingCheck::AnyValue => true,
            BindingCheck::Error(_) => false,
        }
    }

    /// 错误是否匹配声明的类型
    pub fn accepts_error(&self, error: &anyhow::Error) -> bool {
        match self.check {
            BindingCheck::Error(check) => check(error),
            _ => false,
        }
    }
}

impl fmt::Debug for ParamBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamBinding")
            .field("name", &self.name)
            .field("type", &self.type_name)
            .finish()
    }
}

/// 通知
///
/// 绑定到一个切面方法、一个切点以及（延迟）切面实例工厂
pub struct Advice {
    kind: AdviceKind,
    aspect_name: String,
    method_name: String,
    pointcut: Pointcut,
    handler: AdviceHandler,
    binding: Option<ParamBinding>,
    declaration_order: usize,
    instance_factory: Arc<dyn AspectInstanceFactory>,
}

impl Advice {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        kind: AdviceKind,
        aspect_name: impl Into<String>,
        method_name: impl Into<String>,
        pointcut: Pointcut,
        handler: AdviceHandler,
        binding: Option<ParamBinding>,
        declaration_order: usize,
        instance_factory: Arc<dyn AspectInstanceFactory>,
    ) -> Self {
        Self {
            kind,
            aspect_name: aspect_name.into(),
            method_name: method_name.into(),
            pointcut,
            handler,
            binding,
            declaration_order,
            instance_factory,
        }
    }

    pub fn kind(&self) -> AdviceKind {
        self.kind
    }

    pub fn aspect_name(&self) -> &str {
        &self.aspect_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn pointcut(&self) -> &Pointcut {
        &self.pointcut
    }

    pub fn handler(&self) -> &AdviceHandler {
        &self.handler
    }

    /// 返回值 / 异常参数绑定
    pub fn binding(&self) -> Option<&ParamBinding> {
        self.binding.as_ref()
    }

    pub fn declaration_order(&self) -> usize {
        self.declaration_order
    }

    pub fn instance_factory(&self) -> &Arc<dyn AspectInstanceFactory> {
        &self.instance_factory
    }

    /// 获取（必要时创建）切面实例
    pub fn aspect_instance(&self) -> AopResult<Instance> {
        self.instance_factory.get_instance()
    }

    /// 切面排序值
    pub fn order(&self) -> i32 {
        self.instance_factory.order()
    }
}

impl fmt::Debug for Advice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Advice")
            .field("kind", &self.kind)
            .field("aspect", &self.aspect_name)
            .field("method", &self.method_name)
            .field("pointcut", &self.pointcut.expression())
            .field("declaration_order", &self.declaration_order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("io failed")]
    struct IoFailure;

    #[derive(Debug, thiserror::Error)]
    #[error("other")]
    struct Other;

    #[test]
    fn test_kind_ordering() {
        let mut kinds = vec![
            AdviceKind::AfterThrowing,
            AdviceKind::Before,
            AdviceKind::AfterReturning,
            AdviceKind::Around,
            AdviceKind::After,
        ];
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                AdviceKind::Around,
                AdviceKind::Before,
                AdviceKind::After,
                AdviceKind::AfterReturning,
                AdviceKind::AfterThrowing,
            ]
        );
    }

    #[test]
    fn test_returning_binding_checks_type() {
        let binding = ParamBinding::returning::<u32>("count");
        let value: Instance = Arc::new(7u32);
        let other: Instance = Arc::new("seven");
        assert!(binding.accepts_value(&value));
        assert!(!binding.accepts_value(&other));
        assert!(ParamBinding::returning_any("anything").accepts_value(&other));
        assert_eq!(binding.name(), "count");
    }

    #[test]
    fn test_throwing_binding_checks_type() {
        let binding = ParamBinding::throwing::<IoFailure>("ex");
        assert!(binding.accepts_error(&anyhow::Error::new(IoFailure)));
        assert!(!binding.accepts_error(&anyhow::Error::new(Other)));
        assert!(!binding.accepts_value(&(Arc::new(1u8) as Instance)));
    }

    fn noop(_: &Instance, _: &JoinPoint<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn test_handler_fits_kind() {
        let plain = AdviceHandler::Plain(Arc::new(noop));
        assert!(plain.fits(AdviceKind::Before));
        assert!(plain.fits(AdviceKind::After));
        assert!(!plain.fits(AdviceKind::Around));
        assert!(!plain.fits(AdviceKind::AfterReturning));
    }
}
