use beanery::{
    instance, ApplicationContext, BeanDefinition, ContextErrorKind, Environment, Inject, InstantiateErrorKind,
    PropertySource, ResolveErrorKind, Scope, ScopeContext, Value,
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

trait Storage: Send + Sync {
    fn kind(&self) -> &'static str;
}

#[derive(Clone)]
struct Disk;

impl Storage for Disk {
    fn kind(&self) -> &'static str {
        "disk"
    }
}

#[derive(Clone)]
struct Memory;

impl Storage for Memory {
    fn kind(&self) -> &'static str {
        "memory"
    }
}

struct A(#[allow(dead_code)] Arc<B>);
struct B(#[allow(dead_code)] Arc<C>);
struct C;

fn chain(log: &Arc<Mutex<Vec<&'static str>>>) -> ApplicationContext {
    fn destroyed<T: 'static>(
        log: &Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    ) -> impl Fn(&T) -> Result<(), InstantiateErrorKind> + Clone + Send + Sync + 'static {
        let log = log.clone();
        move |_: &T| {
            log.lock().push(name);
            Ok(())
        }
    }

    let mut context = ApplicationContext::new();
    context
        .register(BeanDefinition::builder("A", |Inject(b): Inject<B>| Ok(A(b))).destroy("close", destroyed(log, "A")))
        .unwrap();
    context
        .register(BeanDefinition::builder("B", |Inject(c): Inject<C>| Ok(B(c))).destroy("close", destroyed(log, "B")))
        .unwrap();
    context
        .register(BeanDefinition::builder("C", || Ok(C)).destroy("close", destroyed(log, "C")))
        .unwrap();
    context
}

#[test]
fn test_acyclic_graph_resolves() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut context = chain(&log);
    context.refresh().unwrap();

    let a = context.get_bean_typed::<A>("A").unwrap();
    let b = context.get_bean_typed::<B>("B").unwrap();
    assert!(Arc::ptr_eq(&a.0, &b));
}

#[test]
fn test_singleton_identity() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut context = chain(&log);
    context.refresh().unwrap();

    let first = context.get_bean("A").unwrap();
    let second = context.get_bean("A").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_prototype_distinctness() {
    let mut context = ApplicationContext::new();
    context
        .register(BeanDefinition::builder("C", || Ok(C)).scope(Scope::Prototype))
        .unwrap();
    context.refresh().unwrap();

    let first = context.get_bean("C").unwrap();
    let second = context.get_bean("C").unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(context.stats().singletons, 0);
}

#[test]
fn test_cycle_detected_with_chain() {
    struct First(#[allow(dead_code)] Arc<Second>);
    struct Second(#[allow(dead_code)] Arc<First>);

    let mut context = ApplicationContext::new();
    context
        .register(BeanDefinition::builder("A", |Inject(second): Inject<Second>| Ok(First(second))).lazy())
        .unwrap();
    context
        .register(BeanDefinition::builder("B", |Inject(first): Inject<First>| Ok(Second(first))).lazy())
        .unwrap();

    match context.get_bean("A") {
        Err(ContextErrorKind::Resolve(ResolveErrorKind::CircularDependency { chain })) => {
            assert_eq!(chain, ["A", "B", "A"]);
        }
        _ => panic!("expected a circular dependency"),
    }

    let validation = context.validate();
    assert_eq!(validation.len(), 2);
}

#[test]
fn test_ambiguity_resolved_by_primary() {
    let mut context = ApplicationContext::new();
    context
        .register(BeanDefinition::builder("disk", instance(Disk)).implements::<dyn Storage>(|disk| disk))
        .unwrap();
    context
        .register(BeanDefinition::builder("memory", instance(Memory)).implements::<dyn Storage>(|memory| memory))
        .unwrap();
    context.refresh().unwrap();

    match context.get_bean_by_type::<dyn Storage>() {
        Err(ContextErrorKind::Resolve(ResolveErrorKind::AmbiguousDependency { candidates, .. })) => {
            assert_eq!(candidates, ["disk", "memory"]);
        }
        _ => panic!("expected an ambiguous dependency"),
    }
    assert_eq!(
        context.get_bean_by_type_qualified::<dyn Storage>("memory").unwrap().kind(),
        "memory"
    );

    let mut context = ApplicationContext::new();
    context
        .register(BeanDefinition::builder("disk", instance(Disk)).implements::<dyn Storage>(|disk| disk))
        .unwrap();
    context
        .register(
            BeanDefinition::builder("memory", instance(Memory))
                .primary()
                .implements::<dyn Storage>(|memory| memory),
        )
        .unwrap();
    context.refresh().unwrap();

    assert_eq!(context.get_bean_by_type::<dyn Storage>().unwrap().kind(), "memory");
}

#[test]
fn test_missing_bean() {
    let mut context = ApplicationContext::new();
    context
        .register(BeanDefinition::builder("userRepository", instance(Disk)))
        .unwrap();
    context.refresh().unwrap();

    match context.get_bean("nonexistent") {
        Err(ContextErrorKind::Resolve(ResolveErrorKind::NoSuchBeanDefinition { name, suggestions })) => {
            assert_eq!(name, "nonexistent");
            assert!(suggestions.is_empty());
        }
        _ => panic!("expected a missing bean"),
    }
    match context.get_bean("userRepo") {
        Err(ContextErrorKind::Resolve(ResolveErrorKind::NoSuchBeanDefinition { suggestions, .. })) => {
            assert_eq!(suggestions, ["userRepository"]);
        }
        _ => panic!("expected a missing bean"),
    }
}

#[test]
fn test_destroy_order_on_close() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut context = chain(&log);
    context.refresh().unwrap();
    context.close().unwrap();

    assert_eq!(*log.lock(), ["C", "B", "A"]);
}

#[test]
fn test_failed_construction_retried() {
    let attempts = Arc::new(AtomicU8::new(0));

    let mut context = ApplicationContext::new();
    context
        .register(
            BeanDefinition::builder("X", {
                let attempts = attempts.clone();
                move || {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(anyhow::anyhow!("not yet").into());
                    }
                    Ok(C)
                }
            })
            .lazy(),
        )
        .unwrap();
    context.refresh().unwrap();

    assert!(matches!(
        context.get_bean("X"),
        Err(ContextErrorKind::Resolve(ResolveErrorKind::BeanCreation { .. }))
    ));
    context.get_bean("X").unwrap();
    context.get_bean("X").unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn test_property_constructor_arguments() {
    struct Pool {
        size: u16,
        url: String,
    }

    let mut environment = Environment::new();
    environment.add_property_source(PropertySource::new("defaults").with("db.url", "postgres://localhost"));

    let mut context = ApplicationContext::with_environment(environment);
    context.set_property("db.pool.size", "16");
    context
        .register(
            BeanDefinition::builder("pool", |Value(size): Value<u16>, Value(url): Value<String>| {
                Ok(Pool { size, url })
            })
            .property(0, "db.pool.size")
            .property(1, "db.url"),
        )
        .unwrap();
    context.refresh().unwrap();

    let pool = context.get_bean_typed::<Pool>("pool").unwrap();
    assert_eq!(pool.size, 16);
    assert_eq!(pool.url, "postgres://localhost");
}

#[test]
fn test_singleton_dependency_destroyed_before_request_bean() {
    struct Pool;
    struct Cart(#[allow(dead_code)] Arc<Pool>);

    let log = Arc::new(Mutex::new(Vec::new()));
    let mut context = ApplicationContext::new();
    context
        .register(BeanDefinition::builder("pool", || Ok(Pool)).destroy("close", {
            let log = log.clone();
            move |_: &Pool| {
                log.lock().push("pool");
                Ok::<_, InstantiateErrorKind>(())
            }
        }))
        .unwrap();
    context
        .register(
            BeanDefinition::builder("cart", |Inject(pool): Inject<Pool>| Ok(Cart(pool)))
                .scope(Scope::Request)
                .destroy("clear", {
                    let log = log.clone();
                    move |_: &Cart| {
                        log.lock().push("cart");
                        Ok::<_, InstantiateErrorKind>(())
                    }
                }),
        )
        .unwrap();
    context.refresh().unwrap();

    context.get_bean_in("cart", &ScopeContext::request("r1")).unwrap();
    context.close().unwrap();

    assert_eq!(*log.lock(), ["pool", "cart"]);
}

#[test]
fn test_singleton_cannot_capture_request_bean() {
    struct Cart;
    struct Shop(#[allow(dead_code)] Arc<Cart>);

    let built = Arc::new(AtomicU8::new(0));
    let mut context = ApplicationContext::new();
    context
        .register(BeanDefinition::builder("cart", || Ok(Cart)).scope(Scope::Request))
        .unwrap();
    context
        .register(
            BeanDefinition::builder("shop", {
                let built = built.clone();
                move |Inject(cart): Inject<Cart>| {
                    built.fetch_add(1, Ordering::SeqCst);
                    Ok(Shop(cart))
                }
            })
            .lazy(),
        )
        .unwrap();
    context.refresh().unwrap();

    match context.get_bean_in("shop", &ScopeContext::request("r1")) {
        Err(ContextErrorKind::Resolve(ResolveErrorKind::ScopeMismatch {
            name,
            scope,
            dependency,
            dependency_scope,
        })) => {
            assert_eq!(name, "shop");
            assert_eq!(scope, "singleton");
            assert_eq!(dependency, "cart");
            assert_eq!(dependency_scope, "request");
        }
        _ => panic!("expected a scope mismatch"),
    }
    assert_eq!(built.load(Ordering::SeqCst), 0);
    assert_eq!(context.validate().len(), 1);
}
