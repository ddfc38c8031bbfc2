//! 容器 + 插件 + 自动代理的端到端织入测试

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use weaver_aop::{
    AdviceKind, AopPlugin, AopProxy, AspectCatalog, AspectClass, Instance, JoinPoint,
    ProceedingJoinPoint, TargetClass, TargetClassCatalog,
};
use weaver_core::{ComponentFactory, DefaultComponentFactory, Environment, LogLevel, LoggingConfig};

#[derive(Default)]
struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.entries.lock())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("out of stock: {0}")]
struct OutOfStock(String);

struct OrderService {
    journal: Arc<Journal>,
}

fn order_service_class() -> TargetClass {
    TargetClass::builder::<OrderService>()
        .method("place", |service: &OrderService, args| {
            service.journal.push("target");
            let amount = args
                .first()
                .and_then(|arg| arg.downcast_ref::<u64>())
                .copied()
                .unwrap_or(0);
            Ok(amount * 2)
        })
        .method("cancel", |_: &OrderService, _| -> anyhow::Result<u64> {
            Err(OutOfStock("widget".to_string()).into())
        })
        .build()
}

struct Outer {
    journal: Arc<Journal>,
}

struct Inner {
    journal: Arc<Journal>,
}

fn outer_class(order: Option<i32>) -> AspectClass {
    let builder = AspectClass::builder::<Outer>().around(
        "wrap",
        "execution(* OrderService.place(..))",
        |aspect: &Outer, pjp: ProceedingJoinPoint<'_>| {
            aspect.journal.push("outer:before");
            let result = pjp.proceed();
            aspect.journal.push("outer:after");
            result
        },
    );
    match order {
        Some(order) => builder.order(order).build(),
        None => builder.build(),
    }
}

fn inner_class(order: Option<i32>) -> AspectClass {
    let builder = AspectClass::builder::<Inner>().around(
        "wrap",
        "execution(* OrderService.place(..))",
        |aspect: &Inner, pjp: ProceedingJoinPoint<'_>| {
            aspect.journal.push("inner:before");
            let result = pjp.proceed();
            aspect.journal.push("inner:after");
            result
        },
    );
    match order {
        Some(order) => builder.order(order).build(),
        None => builder.build(),
    }
}

struct Monitor {
    journal: Arc<Journal>,
}

fn monitor_class() -> AspectClass {
    AspectClass::builder::<Monitor>()
        .pointcut("orders", "execution(* OrderService.*(..))")
        .after_returning_bound(
            "on_placed",
            "orders()",
            "total",
            |aspect: &Monitor, _: &JoinPoint<'_>, total: &u64| {
                aspect.journal.push(format!("placed {}", total));
                Ok(())
            },
        )
        .after_throwing_bound(
            "on_out_of_stock",
            "orders()",
            "error",
            |aspect: &Monitor, jp: &JoinPoint<'_>, error: &OutOfStock| {
                aspect.journal.push(format!("{} failed: {}", jp.method_name(), error.0));
                Ok(())
            },
        )
        .build()
}

struct Fixture {
    container: Arc<DefaultComponentFactory>,
    aspects: Arc<AspectCatalog>,
    targets: Arc<TargetClassCatalog>,
    journal: Arc<Journal>,
}

fn init_tracing() {
    let _ = LoggingConfig::new()
        .level(LogLevel::Debug)
        .filter("weaver_aop=debug")
        .test_writer(true)
        .init();
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        let journal = Arc::new(Journal::default());
        let container = Arc::new(DefaultComponentFactory::new());
        let j = Arc::clone(&journal);
        container
            .register_singleton("orderService", move || {
                Ok(OrderService {
                    journal: Arc::clone(&j),
                })
            })
            .unwrap();

        let targets = Arc::new(TargetClassCatalog::new());
        targets.register(order_service_class());
        Self {
            container,
            aspects: Arc::new(AspectCatalog::new()),
            targets,
            journal,
        }
    }

    fn register_outer(&self, order: Option<i32>) {
        let j = Arc::clone(&self.journal);
        self.container
            .register_singleton("outerAspect", move || {
                Ok(Outer {
                    journal: Arc::clone(&j),
                })
            })
            .unwrap();
        self.aspects.register(outer_class(order));
    }

    fn register_inner(&self, order: Option<i32>) {
        let j = Arc::clone(&self.journal);
        self.container
            .register_singleton("innerAspect", move || {
                Ok(Inner {
                    journal: Arc::clone(&j),
                })
            })
            .unwrap();
        self.aspects.register(inner_class(order));
    }

    fn register_monitor(&self) {
        let j = Arc::clone(&self.journal);
        self.container
            .register_singleton("monitorAspect", move || {
                Ok(Monitor {
                    journal: Arc::clone(&j),
                })
            })
            .unwrap();
        self.aspects.register(monitor_class());
    }

    fn start(&self) {
        self.start_with(&Environment::new());
    }

    fn start_with(&self, env: &Environment) {
        AopPlugin::new()
            .with_aspects(Arc::clone(&self.aspects))
            .with_target_classes(Arc::clone(&self.targets))
            .configure(&self.container, env)
            .unwrap()
            .unwrap();
    }

    fn service(&self) -> Arc<AopProxy> {
        self.container
            .get_component("orderService")
            .unwrap()
            .downcast::<AopProxy>()
            .unwrap()
    }
}

fn amount(value: u64) -> Vec<Instance> {
    vec![Arc::new(value) as Instance]
}

#[test]
fn test_around_advice_unwinds_as_stack() {
    let fixture = Fixture::new();
    fixture.register_outer(None);
    fixture.register_inner(None);
    fixture.start();

    let total = fixture.service().invoke("place", amount(21)).unwrap();
    assert_eq!(total.downcast_ref::<u64>(), Some(&42));
    assert_eq!(
        fixture.journal.take(),
        vec![
            "outer:before",
            "inner:before",
            "target",
            "inner:after",
            "outer:after"
        ]
    );
}

#[test]
fn test_declared_order_wins_over_registration_order() {
    let fixture = Fixture::new();
    fixture.register_inner(Some(2));
    fixture.register_outer(Some(1));
    fixture.start();

    fixture.service().invoke("place", amount(1)).unwrap();
    assert_eq!(
        fixture.journal.take(),
        vec![
            "outer:before",
            "inner:before",
            "target",
            "inner:after",
            "outer:after"
        ]
    );
}

#[test]
fn test_after_throwing_never_swallows() {
    let fixture = Fixture::new();
    fixture.register_monitor();
    fixture.start();

    let service = fixture.service();
    let err = service.invoke("cancel", Vec::new()).unwrap_err();
    assert_eq!(err.downcast_ref::<OutOfStock>().unwrap().0, "widget");
    assert_eq!(err.to_string(), "out of stock: widget");
    assert_eq!(fixture.journal.take(), vec!["cancel failed: widget"]);

    let total = service.invoke("place", amount(5)).unwrap();
    assert_eq!(total.downcast_ref::<u64>(), Some(&10));
    assert_eq!(fixture.journal.take(), vec!["target", "placed 10"]);
}

#[test]
fn test_aspects_are_not_proxied() {
    let fixture = Fixture::new();
    fixture.register_monitor();
    fixture.start();

    let monitor = fixture.container.get_component("monitorAspect").unwrap();
    assert!(monitor.is::<Monitor>());
    let service = fixture.service();
    assert_eq!(service.interceptor_count("place"), 2);
    assert!(service
        .advisors()
        .iter()
        .all(|advisor| advisor.aspect_name() == "monitorAspect"));
}

#[test]
fn test_expose_proxy_from_environment_variables() {
    std::env::set_var("WEAVER_WEAVING_TEST_AOP_EXPOSE_PROXY", "true");
    let fixture = Fixture::new();
    fixture.register_monitor();
    fixture.start_with(&Environment::with_env_prefix("WEAVER_WEAVING_TEST_"));
    std::env::remove_var("WEAVER_WEAVING_TEST_AOP_EXPOSE_PROXY");

    let service = fixture.service();
    assert!(service.is_exposed());
    let total = service.invoke("place", amount(3)).unwrap();
    assert_eq!(total.downcast_ref::<u64>(), Some(&6));
}

#[test]
fn test_unadvised_component_is_not_proxied() {
    let fixture = Fixture::new();
    fixture.start();
    let service = fixture.container.get_component("orderService").unwrap();
    assert!(service.is::<OrderService>());
}

struct Audit {
    id: usize,
    journal: Arc<Journal>,
}

fn audit_class() -> AspectClass {
    AspectClass::builder::<Audit>()
        .per_clause("pertarget(execution(* OrderService.*(..)))")
        .after(
            "record",
            "execution(* OrderService.place(..))",
            |aspect: &Audit, _: &JoinPoint<'_>| {
                aspect.journal.push(format!("audit#{}", aspect.id));
                Ok(())
            },
        )
        .build()
}

#[test]
fn test_per_target_aspect_instance_per_proxy() {
    init_tracing();
    let journal = Arc::new(Journal::default());
    let container = Arc::new(DefaultComponentFactory::new());

    let j = Arc::clone(&journal);
    container
        .register_prototype("orderService", move || {
            Ok(OrderService {
                journal: Arc::clone(&j),
            })
        })
        .unwrap();
    let created = Arc::new(AtomicUsize::new(0));
    let (j, counter) = (Arc::clone(&journal), Arc::clone(&created));
    container
        .register_prototype("auditAspect", move || {
            Ok(Audit {
                id: counter.fetch_add(1, Ordering::SeqCst) + 1,
                journal: Arc::clone(&j),
            })
        })
        .unwrap();

    let aspects = Arc::new(AspectCatalog::new());
    aspects.register(audit_class());
    let targets = Arc::new(TargetClassCatalog::new());
    targets.register(order_service_class());
    AopPlugin::new()
        .with_aspects(aspects)
        .with_target_classes(targets)
        .configure(&container, &Environment::new())
        .unwrap();

    let first = container
        .get_component("orderService")
        .unwrap()
        .downcast::<AopProxy>()
        .unwrap();
    let second = container
        .get_component("orderService")
        .unwrap()
        .downcast::<AopProxy>()
        .unwrap();

    let kinds: Vec<_> = first.advisors().iter().map(|a| a.kind()).collect();
    assert_eq!(kinds, vec![Some(AdviceKind::Before), Some(AdviceKind::After)]);
    assert!(first.advisors()[0].is_synthetic());
    // 解析时不创建切面实例
    assert_eq!(created.load(Ordering::SeqCst), 0);

    first.invoke("place", amount(1)).unwrap();
    first.invoke("place", amount(1)).unwrap();
    second.invoke("place", amount(1)).unwrap();

    assert_eq!(created.load(Ordering::SeqCst), 2);
    let audits: Vec<String> = journal
        .take()
        .into_iter()
        .filter(|entry| entry.starts_with("audit"))
        .collect();
    assert_eq!(audits, vec!["audit#1", "audit#1", "audit#2"]);
}
