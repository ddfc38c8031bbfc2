//! 拦截器链
//!
//! 每次代理调用创建一个 [`MethodInvocation`]，按顺序驱动拦截器链，链的末端执行目标方法。
//! 链中第一个拦截器位于最外层，后置类通知按相反顺序（栈式）展开

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use weaver_core::Instance;

use crate::advice::{Advice, AdviceHandler, AdviceKind};
use crate::joinpoint::{JoinPoint, ProceedingJoinPoint};
use crate::target::TargetMethod;

/// 方法拦截器
pub trait MethodInterceptor: Send + Sync {
    /// 执行拦截逻辑，通常会调用 `invocation.proceed()` 继续调用链
    fn invoke(&self, invocation: &mut MethodInvocation) -> anyhow::Result<Instance>;
}

/// 某个方法上的拦截器链
pub type InterceptorChain = Arc<[Arc<dyn MethodInterceptor>]>;

/// 调用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    /// 正在执行第 i 个拦截器
    Pending(usize),
    /// 正在执行目标方法
    InvokingTarget,
    /// 最近一步正常返回
    Returned,
    /// 最近一步以错误结束
    Threw,
}

/// 一次方法调用
pub struct MethodInvocation {
    target: Instance,
    target_class: String,
    method: Arc<TargetMethod>,
    args: Vec<Instance>,
    chain: InterceptorChain,
    cursor: usize,
    state: InvocationState,
    target_calls: usize,
    started_at: Instant,
}

impl MethodInvocation {
    pub fn new(
        target: Instance,
        target_class: impl Into<String>,
        method: Arc<TargetMethod>,
        args: Vec<Instance>,
        chain: InterceptorChain,
    ) -> Self {
        Self {
            target,
            target_class: target_class.into(),
            method,
            args,
            chain,
            cursor: 0,
            state: InvocationState::Pending(0),
            target_calls: 0,
            started_at: Instant::now(),
        }
    }

    /// 继续执行下一个拦截器；链走完后执行目标方法
    pub fn proceed(&mut self) -> anyhow::Result<Instance> {
        let result = if self.cursor < self.chain.len() {
            let index = self.cursor;
            self.cursor += 1;
            self.state = InvocationState::Pending(index);
            let interceptor = Arc::clone(&self.chain[index]);
            interceptor.invoke(self)
        } else {
            self.state = InvocationState::InvokingTarget;
            self.target_calls += 1;
            tracing::trace!(
                "Invoking target {}.{}",
                self.target_class,
                self.method.name()
            );
            self.method.invoke(&self.target, &self.args)
        };
        self.state = match &result {
            Ok(_) => InvocationState::Returned,
            Err(_) => InvocationState::Threw,
        };
        result
    }

    /// 连接点视图
    pub fn join_point(&self) -> JoinPoint<'_> {
        JoinPoint::new(
            &self.target,
            &self.target_class,
            self.method.name(),
            &self.args,
            self.started_at,
        )
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    /// 目标方法被执行的次数
    pub fn target_calls(&self) -> usize {
        self.target_calls
    }

    pub fn method_name(&self) -> &str {
        self.method.name()
    }

    pub fn target_class(&self) -> &str {
        &self.target_class
    }

    pub fn args(&self) -> &[Instance] {
        &self.args
    }

    pub(crate) fn set_args(&mut self, args: Vec<Instance>) {
        self.args = args;
    }
}

impl fmt::Debug for MethodInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodInvocation")
            .field("class", &self.target_class)
            .field("method", &self.method.name())
            .field("chain", &self.chain.len())
            .field("cursor", &self.cursor)
            .field("state", &self.state)
            .finish()
    }
}

/// 将一个通知适配为拦截器
pub struct AdviceInterceptor {
    advice: Arc<Advice>,
}

impl AdviceInterceptor {
    pub fn new(advice: Arc<Advice>) -> Self {
        Self { advice }
    }

    pub fn advice(&self) -> &Arc<Advice> {
        &self.advice
    }

    fn aspect(&self) -> anyhow::Result<Instance> {
        Ok(self.advice.aspect_instance()?)
    }
}

impl MethodInterceptor for AdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation) -> anyhow::Result<Instance> {
        let advice = &self.advice;
        tracing::trace!(
            "{} advice {}.{} on {}",
            advice.kind(),
            advice.aspect_name(),
            advice.method_name(),
            invocation.join_point()
        );

        match (advice.kind(), advice.handler()) {
            (AdviceKind::Before, AdviceHandler::Plain(handler)) => {
                let aspect = self.aspect()?;
                handler(&aspect, &invocation.join_point())?;
                invocation.proceed()
            }
            (AdviceKind::After, AdviceHandler::Plain(handler)) => {
                let outcome = invocation.proceed();
                let aspect = self.aspect()?;
                handler(&aspect, &invocation.join_point())?;
                outcome
            }
            (AdviceKind::AfterReturning, AdviceHandler::Returning(handler)) => {
                let value = invocation.proceed()?;
                let applies = advice
                    .binding()
                    .map(|binding| binding.accepts_value(&value))
                    .unwrap_or(true);
                if applies {
                    let aspect = self.aspect()?;
                    handler(&aspect, &invocation.join_point(), &value)?;
                }
                Ok(value)
            }
            (AdviceKind::AfterThrowing, AdviceHandler::Throwing(handler)) => {
                match invocation.proceed() {
                    Ok(value) => Ok(value),
                    Err(error) => {
                        let applies = advice
                            .binding()
                            .map(|binding| binding.accepts_error(&error))
                            .unwrap_or(true);
                        if applies {
                            let aspect = self.aspect()?;
                            handler(&aspect, &invocation.join_point(), &error)?;
                        }
                        Err(error)
                    }
                }
            }
            (AdviceKind::Around, AdviceHandler::Around(handler)) => {
                let aspect = self.aspect()?;
                handler(&aspect, ProceedingJoinPoint::new(invocation))
            }
            (kind, handler) => Err(anyhow!(
                "advice {}.{} of kind {} cannot run {:?}",
                advice.aspect_name(),
                advice.method_name(),
                kind,
                handler
            )),
        }
    }
}

impl fmt::Debug for AdviceInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AdviceInterceptor").field(&self.advice).finish()
    }
}
