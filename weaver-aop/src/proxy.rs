//! 代理
//!
//! [`AopProxy`] 包装一个目标对象：每个方法在创建时预先计算好拦截器链，
//! 调用时按方法名分派；引入的接口在每个代理上各有一个委托实例

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use weaver_core::Instance;

use crate::advisor::Advisor;
use crate::error::{AdviceInvocationError, NoSuchMethodError};
use crate::interceptor::{AdviceInterceptor, InterceptorChain, MethodInterceptor, MethodInvocation};
use crate::pointcut::PointcutEvaluator;
use crate::target::TargetClass;

thread_local! {
    static CURRENT_PROXY: RefCell<Option<Arc<AopProxy>>> = const { RefCell::new(None) };
}

/// 当前正在执行的代理
///
/// 只有开启 expose-proxy 的代理才会在调用期间登记自己
pub struct AopContext;

impl AopContext {
    /// 当前线程上正在执行的代理
    pub fn current_proxy() -> Option<Arc<AopProxy>> {
        CURRENT_PROXY.with(|current| current.borrow().clone())
    }

    fn expose(proxy: Arc<AopProxy>) -> ExposureGuard {
        let previous = CURRENT_PROXY.with(|current| current.borrow_mut().replace(proxy));
        ExposureGuard { previous }
    }
}

/// 调用结束时恢复外层代理
struct ExposureGuard {
    previous: Option<Arc<AopProxy>>,
}

impl Drop for ExposureGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_PROXY.with(|current| *current.borrow_mut() = previous);
    }
}

/// 按顺序把适用于方法的通知器转换为拦截器
pub fn interceptors_for(
    advisors: &[Advisor],
    evaluator: &dyn PointcutEvaluator,
    class: &TargetClass,
    method: &str,
) -> InterceptorChain {
    advisors
        .iter()
        .filter_map(Advisor::as_pointcut)
        .filter(|advisor| advisor.matches(evaluator, class.name(), method))
        .map(|advisor| {
            Arc::new(AdviceInterceptor::new(Arc::clone(advisor.advice()))) as Arc<dyn MethodInterceptor>
        })
        .collect::<Vec<_>>()
        .into()
}

/// AOP 代理
pub struct AopProxy {
    target: Instance,
    class: Arc<TargetClass>,
    advisors: Vec<Advisor>,
    chains: HashMap<String, InterceptorChain>,
    introductions: HashMap<String, Instance>,
    expose_proxy: bool,
    this: Weak<AopProxy>,
}

impl AopProxy {
    /// 目标对象
    pub fn target(&self) -> &Instance {
        &self.target
    }

    /// 尝试将目标对象转换为具体类型
    pub fn target_as<T: std::any::Any>(&self) -> Option<&T> {
        self.target.downcast_ref::<T>()
    }

    pub fn target_class(&self) -> &Arc<TargetClass> {
        &self.class
    }

    /// 应用到该代理的通知器
    pub fn advisors(&self) -> &[Advisor] {
        &self.advisors
    }

    /// 方法上的拦截器数量
    pub fn interceptor_count(&self, method: &str) -> usize {
        self.chains.get(method).map(|chain| chain.len()).unwrap_or(0)
    }

    /// 代理是否实现了引入的接口
    pub fn implements(&self, interface: &str) -> bool {
        self.introductions.contains_key(interface)
    }

    /// 引入接口的委托实例
    pub fn introduction(&self, interface: &str) -> Option<&Instance> {
        self.introductions.get(interface)
    }

    /// 引入接口的委托实例（具体类型）
    pub fn introduction_as<T: std::any::Any>(&self, interface: &str) -> Option<&T> {
        self.introductions.get(interface)?.downcast_ref::<T>()
    }

    pub fn is_exposed(&self) -> bool {
        self.expose_proxy
    }

    /// 调用方法
    pub fn invoke(&self, method: &str, args: Vec<Instance>) -> Result<Instance, AdviceInvocationError> {
        let target_method = self.class.method(method).ok_or_else(|| {
            anyhow::Error::new(NoSuchMethodError {
                class: self.class.name().to_string(),
                method: method.to_string(),
            })
        })?;

        let _exposure = if self.expose_proxy {
            self.this.upgrade().map(AopContext::expose)
        } else {
            None
        };

        let chain = match self.chains.get(method) {
            Some(chain) if !chain.is_empty() => Arc::clone(chain),
            // 没有拦截器时直接调用目标
            _ => return Ok(target_method.invoke(&self.target, &args)?),
        };

        tracing::trace!(
            "Dispatching {}.{} through {} interceptors",
            self.class.name(),
            method,
            chain.len()
        );
        let mut invocation = MethodInvocation::new(
            Arc::clone(&self.target),
            self.class.name(),
            Arc::clone(target_method),
            args,
            chain,
        );
        Ok(invocation.proceed()?)
    }
}

impl fmt::Debug for AopProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AopProxy")
            .field("class", &self.class.name())
            .field("advisors", &self.advisors.len())
            .field("introductions", &self.introductions.keys().collect::<Vec<_>>())
            .field("expose_proxy", &self.expose_proxy)
            .finish()
    }
}

/// 代理生成器
pub trait ProxyMaterializer: Send + Sync {
    /// 用通知器包装目标对象
    fn wrap_with_interceptors(
        &self,
        target: Instance,
        class: Arc<TargetClass>,
        advisors: Vec<Advisor>,
    ) -> Instance;
}

/// 默认代理工厂
pub struct ProxyFactory {
    evaluator: Arc<dyn PointcutEvaluator>,
    expose_proxy: bool,
}

impl ProxyFactory {
    pub fn new(evaluator: Arc<dyn PointcutEvaluator>) -> Self {
        Self {
            evaluator,
            expose_proxy: false,
        }
    }

    /// 调用期间通过 [`AopContext::current_proxy`] 暴露代理
    pub fn with_expose_proxy(mut self, expose: bool) -> Self {
        self.expose_proxy = expose;
        self
    }

    /// 创建代理
    pub fn create_proxy(
        &self,
        target: Instance,
        class: Arc<TargetClass>,
        advisors: Vec<Advisor>,
    ) -> Arc<AopProxy> {
        let chains: HashMap<String, InterceptorChain> = class
            .method_names()
            .map(|method| {
                let chain = interceptors_for(&advisors, self.evaluator.as_ref(), &class, method);
                (method.to_string(), chain)
            })
            .collect();

        let introductions: HashMap<String, Instance> = advisors
            .iter()
            .filter_map(Advisor::as_introduction)
            .filter(|intro| intro.matches_class(self.evaluator.as_ref(), class.name()))
            .map(|intro| (intro.interface().to_string(), intro.create_delegate()))
            .collect();

        tracing::debug!(
            "Creating proxy for '{}' with {} advisors",
            class.name(),
            advisors.len()
        );
        Arc::new_cyclic(|this| AopProxy {
            target,
            class,
            advisors,
            chains,
            introductions,
            expose_proxy: self.expose_proxy,
            this: this.clone(),
        })
    }
}

impl ProxyMaterializer for ProxyFactory {
    fn wrap_with_interceptors(
        &self,
        target: Instance,
        class: Arc<TargetClass>,
        advisors: Vec<Advisor>,
    ) -> Instance {
        self.create_proxy(target, class, advisors)
    }
}
