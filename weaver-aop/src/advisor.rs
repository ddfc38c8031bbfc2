//! 通知器（Advisor）
//!
//! 通知器 = 切点 + 通知。引入通知器为匹配的类型附加一个接口实现

use std::fmt;
use std::sync::Arc;

use weaver_core::Instance;

use crate::advice::{Advice, AdviceKind};
use crate::aspect::DelegateFactory;
use crate::error::AopResult;
use crate::pointcut::{Pointcut, PointcutEvaluator};
use crate::target::TargetClass;

/// 切点通知器
pub struct PointcutAdvisor {
    advice: Arc<Advice>,
    per_clause_pointcut: Option<Pointcut>,
    synthetic: bool,
}

impl PointcutAdvisor {
    pub(crate) fn new(advice: Advice, per_clause_pointcut: Option<Pointcut>) -> Self {
        Self {
            advice: Arc::new(advice),
            per_clause_pointcut,
            synthetic: false,
        }
    }

    /// 实例化通知器：唯一的作用是创建切面实例
    pub(crate) fn synthetic(advice: Advice) -> Self {
        Self {
            advice: Arc::new(advice),
            per_clause_pointcut: None,
            synthetic: true,
        }
    }

    pub fn advice(&self) -> &Arc<Advice> {
        &self.advice
    }

    /// 声明的切点
    pub fn pointcut(&self) -> &Pointcut {
        self.advice.pointcut()
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    /// 是否为延迟实例化切面的通知器
    pub fn is_lazy(&self) -> bool {
        self.per_clause_pointcut.is_some()
    }

    /// 方法是否匹配
    ///
    /// 延迟实例化的切面在实例创建前还要求实例化切点匹配
    pub fn matches(&self, evaluator: &dyn PointcutEvaluator, target_class: &str, method: &str) -> bool {
        if !evaluator.matches(self.pointcut().expression(), target_class, method) {
            return false;
        }
        match &self.per_clause_pointcut {
            None => true,
            Some(per_clause) => {
                self.advice.instance_factory().is_materialized()
                    || evaluator.matches(per_clause.expression(), target_class, method)
            }
        }
    }
}

impl fmt::Debug for PointcutAdvisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointcutAdvisor")
            .field("advice", &self.advice)
            .field("synthetic", &self.synthetic)
            .finish()
    }
}

/// 引入通知器
pub struct IntroductionAdvisor {
    aspect_name: String,
    field_name: String,
    interface: String,
    types_matching: String,
    default_impl: DelegateFactory,
    order: i32,
}

impl IntroductionAdvisor {
    pub(crate) fn new(
        aspect_name: impl Into<String>,
        field_name: impl Into<String>,
        interface: impl Into<String>,
        types_matching: impl Into<String>,
        default_impl: DelegateFactory,
        order: i32,
    ) -> Self {
        Self {
            aspect_name: aspect_name.into(),
            field_name: field_name.into(),
            interface: interface.into(),
            types_matching: types_matching.into(),
            default_impl,
            order,
        }
    }

    pub fn aspect_name(&self) -> &str {
        &self.aspect_name
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// 引入的接口名
    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn types_matching(&self) -> &str {
        &self.types_matching
    }

    /// 类型是否匹配
    pub fn matches_class(&self, evaluator: &dyn PointcutEvaluator, target_class: &str) -> bool {
        evaluator.matches_type(&self.types_matching, target_class)
    }

    /// 为一个目标创建接口委托
    pub fn create_delegate(&self) -> Instance {
        (self.default_impl)()
    }
}

impl fmt::Debug for IntroductionAdvisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntroductionAdvisor")
            .field("aspect", &self.aspect_name)
            .field("field", &self.field_name)
            .field("interface", &self.interface)
            .field("types_matching", &self.types_matching)
            .finish()
    }
}

/// 通知器
#[derive(Clone, Debug)]
pub enum Advisor {
    Pointcut(Arc<PointcutAdvisor>),
    Introduction(Arc<IntroductionAdvisor>),
}

impl Advisor {
    /// 通知类型；引入通知器没有
    pub fn kind(&self) -> Option<AdviceKind> {
        self.advice().map(|advice| advice.kind())
    }

    pub fn aspect_name(&self) -> &str {
        match self {
            Advisor::Pointcut(advisor) => advisor.advice.aspect_name(),
            Advisor::Introduction(advisor) => &advisor.aspect_name,
        }
    }

    /// 声明顺序；引入通知器与实例化通知器没有
    pub fn declaration_order(&self) -> Option<usize> {
        match self {
            Advisor::Pointcut(advisor) if !advisor.synthetic => {
                Some(advisor.advice.declaration_order())
            }
            _ => None,
        }
    }

    /// 切面排序值
    pub fn order(&self) -> i32 {
        match self {
            Advisor::Pointcut(advisor) => advisor.advice.order(),
            Advisor::Introduction(advisor) => advisor.order,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, Advisor::Pointcut(advisor) if advisor.synthetic)
    }

    pub fn is_introduction(&self) -> bool {
        matches!(self, Advisor::Introduction(_))
    }

    pub fn advice(&self) -> Option<&Arc<Advice>> {
        match self {
            Advisor::Pointcut(advisor) => Some(&advisor.advice),
            Advisor::Introduction(_) => None,
        }
    }

    pub fn as_pointcut(&self) -> Option<&Arc<PointcutAdvisor>> {
        match self {
            Advisor::Pointcut(advisor) => Some(advisor),
            Advisor::Introduction(_) => None,
        }
    }

    pub fn as_introduction(&self) -> Option<&Arc<IntroductionAdvisor>> {
        match self {
            Advisor::Introduction(advisor) => Some(advisor),
            Advisor::Pointcut(_) => None,
        }
    }

    /// 获取通知器所属的切面实例（必要时创建）
    pub fn aspect_instance(&self) -> AopResult<Option<Instance>> {
        self.advice()
            .map(|advice| advice.aspect_instance())
            .transpose()
    }

    /// 通知器能否应用到目标类型
    ///
    /// 引入按类型模式判断；切点通知器要求至少一个方法匹配
    pub fn can_apply(&self, evaluator: &dyn PointcutEvaluator, class: &TargetClass) -> bool {
        match self {
            Advisor::Introduction(advisor) => advisor.matches_class(evaluator, class.name()),
            Advisor::Pointcut(advisor) => class
                .method_names()
                .any(|method| advisor.matches(evaluator, class.name(), method)),
        }
    }
}

impl From<PointcutAdvisor> for Advisor {
    fn from(advisor: PointcutAdvisor) -> Self {
        Advisor::Pointcut(Arc::new(advisor))
    }
}

impl From<IntroductionAdvisor> for Advisor {
    fn from(advisor: IntroductionAdvisor) -> Self {
        Advisor::Introduction(Arc::new(advisor))
    }
}

/// 从候选通知器中选出适用于目标类型的通知器
///
/// 引入先于切点通知器判断，结果按切面排序值稳定排序
pub fn find_advisors_that_can_apply(
    candidates: &[Advisor],
    evaluator: &dyn PointcutEvaluator,
    class: &TargetClass,
) -> Vec<Advisor> {
    let mut eligible: Vec<Advisor> = candidates
        .iter()
        .filter(|advisor| advisor.is_introduction() && advisor.can_apply(evaluator, class))
        .cloned()
        .collect();
    eligible.extend(
        candidates
            .iter()
            .filter(|advisor| !advisor.is_introduction() && advisor.can_apply(evaluator, class))
            .cloned(),
    );
    eligible.sort_by_key(Advisor::order);
    eligible
}
