use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use masna::prelude::*;

// ═══════════════════════════════════════════
// Fixtures
// ═══════════════════════════════════════════

#[derive(Default, Component)]
struct Limits {
    #[masna(value = "10", expose)]
    max: u32,
}

#[derive(Default, Component)]
struct Pool {
    #[masna(value = "${limits.max * 2}")]
    size: u32,
}

trait Quota: Send + Sync {
    fn remaining(&self) -> u32;
}

struct Fixed(u32);

impl Quota for Fixed {
    fn remaining(&self) -> u32 {
        self.0
    }
}

struct QuotaView(Arc<dyn Quota>);

impl Properties for QuotaView {
    fn property(&self, path: &str) -> Option<ExprValue> {
        match path {
            "remaining" => Some(ExprValue::Int(i64::from(self.0.remaining()))),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Component)]
struct Throttle {
    #[masna(value = "${quota.remaining - 1}")]
    burst: u32,
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════

#[test]
fn custom_root_getter_runs_once_across_expressions() {
    let calls = Arc::new(AtomicUsize::new(0));
    let container = Container::new();
    let counter = calls.clone();
    container
        .register_name::<Limits>("limits", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Limits { max: 10 }))
        })
        .unwrap()
        .expose_as(|limits: Arc<Limits>| limits);

    assert_eq!(
        container.evaluate("${limits.max + 1}").unwrap(),
        ExprValue::Int(11)
    );
    assert_eq!(container.new_instance::<Pool>().unwrap().size, 20);
    assert_eq!(container.new_instance::<Pool>().unwrap().size, 20);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // a plain lookup is not cached
    container.find_by_name::<Limits>("limits").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn named_interface_root_is_exposed() {
    let container = Container::new();
    container
        .named_interface::<dyn Quota>("quota", |_| Ok(Arc::new(Fixed(5)) as Arc<dyn Quota>))
        .unwrap()
        .exposes(|quota| Arc::new(QuotaView(quota)) as Arc<dyn Properties>);

    let throttle = container.new_instance::<Throttle>().unwrap();
    assert_eq!(throttle.burst, 4);
    assert!(container.expressions().contains("quota"));
}

#[test]
fn unexposed_root_is_reported() {
    let container = Container::new();
    container
        .named_interface::<dyn Quota>("quota", |_| Ok(Arc::new(Fixed(5)) as Arc<dyn Quota>))
        .unwrap();

    let err = container.new_instance::<Throttle>().unwrap_err();
    match err.root_cause() {
        MasnaError::Expression { reason, .. } => assert!(reason.contains("exposes")),
        other => panic!("Expected Expression, got: {other:?}"),
    }
    assert!(format!("{err}").contains("Throttle.burst"));
}
