//! `#[aspect]` 宏生成的切面描述与 inventory 登记

use std::sync::Arc;

use parking_lot::Mutex;
use weaver_aop::{
    global_catalog, AdviceKind, AdvisorFactory, AopPlugin, AopProxy, AspectCatalog, AspectType,
    Instance, JoinPoint, ProceedingJoinPoint, TargetClass, TargetClassCatalog,
};
use weaver_aop_macros::aspect;
use weaver_core::{ComponentFactory, DefaultComponentFactory, Environment};

#[derive(Debug, thiserror::Error)]
#[error("payment declined")]
struct Declined;

struct PaymentService;

fn payment_service_class() -> TargetClass {
    TargetClass::builder::<PaymentService>()
        .method("charge", |_: &PaymentService, args| {
            let cents = args
                .first()
                .and_then(|arg| arg.downcast_ref::<u64>())
                .copied()
                .unwrap_or(0);
            Ok(cents)
        })
        .method("refund", |_: &PaymentService, _| -> anyhow::Result<u64> {
            Err(Declined.into())
        })
        .build()
}

#[derive(Default)]
struct PaymentAspect {
    seen: Mutex<Vec<String>>,
}

#[aspect(name = "payments", order = 3)]
impl PaymentAspect {
    #[pointcut("execution(* PaymentService.*(..))")]
    fn payments(&self) {}

    #[before("payments()")]
    fn log_entry(&self, jp: &JoinPoint<'_>) {
        self.seen.lock().push(format!("before {}", jp.method_name()));
    }

    #[around("execution(* PaymentService.charge(..))")]
    fn with_fee(&self, pjp: ProceedingJoinPoint<'_>) -> anyhow::Result<Instance> {
        let charged = pjp.proceed()?;
        let cents = charged.downcast_ref::<u64>().copied().unwrap_or(0);
        Ok(Arc::new(cents + 30))
    }

    #[after_returning(pointcut = "payments()", returning = "cents")]
    fn log_charged(&self, _jp: &JoinPoint<'_>, cents: &u64) -> anyhow::Result<()> {
        self.seen.lock().push(format!("charged {}", cents));
        Ok(())
    }

    #[after_throwing(pointcut = "payments()", throwing = "error")]
    fn log_declined(&self, jp: &JoinPoint<'_>, error: &Declined) {
        self.seen
            .lock()
            .push(format!("{} {}", jp.method_name(), error));
    }

    #[after("payments()")]
    fn log_exit(&self) {
        self.seen.lock().push("after".to_string());
    }
}

#[derive(Default)]
struct TracingAspect;

#[aspect(per = "pertarget(execution(* PaymentService.*(..)))")]
impl TracingAspect {
    #[after_throwing("execution(* PaymentService.refund(..))")]
    fn on_error(&self, _jp: &JoinPoint<'_>, error: &anyhow::Error) {
        tracing::debug!("refund failed: {}", error);
    }
}

#[test]
fn test_generated_aspect_class() {
    let class = PaymentAspect::aspect_class();
    assert_eq!(class.name(), "payments");
    assert_eq!(class.order(), Some(3));
    assert!(class.is_aspect());
    assert_eq!(
        class.named_pointcuts().get("payments"),
        Some(&"execution(* PaymentService.*(..))")
    );
    assert_eq!(class.methods().len(), 6);

    let tracing_class = TracingAspect::aspect_class();
    assert_eq!(
        tracing_class.per_clause(),
        "pertarget(execution(* PaymentService.*(..)))"
    );
}

#[test]
fn test_aspects_are_registered_through_inventory() {
    let catalog = global_catalog();
    assert!(catalog.is_aspect(std::any::type_name::<PaymentAspect>()));
    assert!(catalog.is_aspect(std::any::type_name::<TracingAspect>()));
}

#[test]
fn test_generated_advisors_follow_kind_order() {
    let catalog = Arc::new(AspectCatalog::new());
    let class = catalog.register_type::<PaymentAspect>();
    let advisors = AdvisorFactory::new(catalog)
        .get_advisors_for_instance(Arc::new(PaymentAspect::default()), class, "paymentAspect")
        .unwrap();

    let kinds: Vec<_> = advisors.iter().filter_map(|a| a.kind()).collect();
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
    let orders: Vec<_> = advisors.iter().filter_map(|a| a.declaration_order()).collect();
    assert_eq!(orders, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_macro_aspect_end_to_end() {
    let container = Arc::new(DefaultComponentFactory::new());
    container
        .register_singleton("paymentAspect", || Ok(PaymentAspect::default()))
        .unwrap();
    container
        .register_singleton("paymentService", || Ok(PaymentService))
        .unwrap();

    let aspects = Arc::new(AspectCatalog::new());
    aspects.register_type::<PaymentAspect>();
    let targets = Arc::new(TargetClassCatalog::new());
    targets.register(payment_service_class());
    AopPlugin::new()
        .with_aspects(aspects)
        .with_target_classes(targets)
        .configure(&container, &Environment::new())
        .unwrap();

    let service = container
        .get_component("paymentService")
        .unwrap()
        .downcast::<AopProxy>()
        .unwrap();
    let charged = service
        .invoke("charge", vec![Arc::new(100u64) as Instance])
        .unwrap();
    assert_eq!(charged.downcast_ref::<u64>(), Some(&130));

    let err = service.invoke("refund", Vec::new()).unwrap_err();
    assert!(err.downcast_ref::<Declined>().is_some());

    let aspect = container.get_component("paymentAspect").unwrap();
    let aspect = aspect.downcast_ref::<PaymentAspect>().unwrap();
    assert_eq!(
        *aspect.seen.lock(),
        vec![
            "before charge",
            "charged 100",
            "after",
            "before refund",
            "refund payment declined",
            "after",
        ]
    );
}
