//! 连接点（JoinPoint）定义
//!
//! 连接点表示一次被拦截的方法调用；通知通过它读取目标、方法名与参数

use std::any::Any;
use std::fmt;
use std::time::{Duration, Instant};

use weaver_core::Instance;

use crate::interceptor::MethodInvocation;

/// 连接点信息
///
/// 借用自正在执行的 [`MethodInvocation`]，只在通知执行期间有效
#[derive(Clone, Copy)]
pub struct JoinPoint<'a> {
    target: &'a Instance,
    target_class: &'a str,
    method_name: &'a str,
    args: &'a [Instance],
    started_at: Instant,
}

impl<'a> JoinPoint<'a> {
    pub(crate) fn new(
        target: &'a Instance,
        target_class: &'a str,
        method_name: &'a str,
        args: &'a [Instance],
        started_at: Instant,
    ) -> Self {
        Self {
            target,
            target_class,
            method_name,
            args,
            started_at,
        }
    }

    /// 获取完整的方法签名
    pub fn signature(&self) -> String {
        format!("{}.{}", self.target_class, self.method_name)
    }

    /// 目标类型名称
    pub fn target_class(&self) -> &'a str {
        self.target_class
    }

    /// 方法名称
    pub fn method_name(&self) -> &'a str {
        self.method_name
    }

    /// 原始目标对象
    pub fn target_instance(&self) -> &'a Instance {
        self.target
    }

    /// 尝试将目标对象转换为具体类型
    pub fn target<T: Any>(&self) -> Option<&'a T> {
        self.target.downcast_ref::<T>()
    }

    /// 全部参数
    pub fn args(&self) -> &'a [Instance] {
        self.args
    }

    /// 尝试获取指定位置的参数
    pub fn arg<T: Any>(&self, index: usize) -> Option<&'a T> {
        self.args.get(index)?.downcast_ref::<T>()
    }

    /// 调用开始至今的耗时
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl fmt::Debug for JoinPoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinPoint")
            .field("signature", &self.signature())
            .field("args", &self.args.len())
            .finish()
    }
}

impl fmt::Display for JoinPoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target_class, self.method_name)
    }
}

/// 环绕通知的执行链
///
/// `proceed` 消耗自身，因此一个环绕通知最多推进调用链一次
pub struct ProceedingJoinPoint<'a> {
    invocation: &'a mut MethodInvocation,
}

impl<'a> ProceedingJoinPoint<'a> {
    pub(crate) fn new(invocation: &'a mut MethodInvocation) -> Self {
        Self { invocation }
    }

    /// 获取连接点信息
    pub fn join_point(&self) -> JoinPoint<'_> {
        self.invocation.join_point()
    }

    /// 继续执行调用链中的下一个拦截器，或在末端执行目标方法
    pub fn proceed(self) -> anyhow::Result<Instance> {
        self.invocation.proceed()
    }

    /// 用新的参数继续执行
    pub fn proceed_with_args(self, args: Vec<Instance>) -> anyhow::Result<Instance> {
        self.invocation.set_args(args);
        self.invocation.proceed()
    }
}

impl fmt::Debug for ProceedingJoinPoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProceedingJoinPoint")
            .field("join_point", &self.join_point())
            .field("state", &self.invocation.state())
            .finish()
    }
}
