//! Construction of fresh component instances.
//!
//! Constructing a `T` runs these steps inside one construction frame:
//! 1. start from `T::default()`,
//! 2. resolve the init method parameters,
//! 3. wire the tagged fields,
//! 4. call the init method.
//!
//! The instance is allocated with [`Arc::new_cyclic`] so `self` fields
//! receive a weak handle to the final allocation.

use std::sync::{Arc, Weak};

use masna_support::rendering::to_snake_case;
use tracing::{debug, instrument, warn};

use crate::component::{Component, Descriptor, MethodSpec};
use crate::context::ResolutionContext;
use crate::error::{MasnaError, Result};
use crate::key::DependencyKey;
use crate::slot::Instance;
use crate::wire::{self, SelfRef};

const DEFAULT_INIT_METHOD: &str = "init";

/// How [`new_with_option`] selects and calls the init method.
///
/// ```
/// use masna_container::construct::ConstructOptions;
///
/// let options = ConstructOptions::new()
///     .init_method_name("Open")
///     .init_params(&["name:primary", "5"]);
/// assert_eq!(options.method_name(), Some("Open"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstructOptions {
    pub(crate) use_constructor: bool,
    pub(crate) init_method_name: Option<String>,
    pub(crate) init_params: Vec<String>,
}

impl ConstructOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the method named after the type (`Pool::pool`) as init method.
    pub fn use_constructor(mut self, use_constructor: bool) -> Self {
        self.use_constructor = use_constructor;
        self
    }

    pub fn init_method_name(mut self, name: &str) -> Self {
        self.init_method_name = Some(name.trim().to_string());
        self
    }

    /// One directive per init method parameter.
    pub fn init_params(mut self, params: &[&str]) -> Self {
        self.init_params = params.iter().map(|p| p.trim().to_string()).collect();
        self
    }

    pub fn method_name(&self) -> Option<&str> {
        self.init_method_name.as_deref()
    }
}

/// Picks the init method of `T`, if any.
fn select_init<'d, T: Component>(
    descriptor: &'d Descriptor<T>,
    options: &ConstructOptions,
) -> Result<Option<&'d MethodSpec<T>>> {
    let explicit = options.init_method_name.as_deref().filter(|n| !n.is_empty());

    let name = match (options.use_constructor, explicit) {
        (true, Some(name)) => {
            return Err(MasnaError::invalid(
                descriptor.short_name(),
                format!("use_constructor conflicts with init method {name:?}"),
            ));
        }
        (true, None) => to_snake_case(&descriptor.short_name()),
        (false, Some(name)) => to_snake_case(name),
        (false, None) => DEFAULT_INIT_METHOD.to_string(),
    };

    let Some(method) = descriptor.method_named(&name) else {
        if explicit.is_some() || options.use_constructor {
            warn!(component = %descriptor.short_name(), method = %name, "Init method not found, skipping");
        }
        return Ok(None);
    };

    if method.returns() != 0 {
        return Err(MasnaError::invalid(
            format!("{}::{}", descriptor.short_name(), method.name()),
            "init method must not return a value",
        ));
    }
    Ok(Some(method))
}

/// Constructs a fresh `T`. Nothing is cached.
///
/// `T` is marked as under construction, so building a `T` again before this
/// call returns fails with a construction cycle.
pub fn new_with_option<T: Component>(
    ctx: &mut ResolutionContext<'_>,
    options: &ConstructOptions,
) -> Result<Arc<T>> {
    let mut frame = ctx.enter_construction(DependencyKey::of::<T>())?;
    build_instance(&mut frame, options)
}

/// Constructs a `T` without marking the type as under construction.
///
/// Lazy bindings build through here: re-entry is caught by their binding
/// guard, and two bindings of one type may depend on each other.
#[instrument(skip(ctx), fields(component = std::any::type_name::<T>()), level = "debug")]
pub(crate) fn build_instance<T: Component>(
    ctx: &mut ResolutionContext<'_>,
    options: &ConstructOptions,
) -> Result<Arc<T>> {
    let descriptor = Descriptor::<T>::get();
    let init = select_init(&descriptor, options)?;
    ctx.record(format!("construct {}", descriptor.short_name()));

    let mut failure = None;
    let built = Arc::new_cyclic(|weak: &Weak<T>| {
        let mut target = T::default();
        let outcome = build(ctx, &mut target, weak, &descriptor, init, options);
        if let Err(err) = outcome {
            failure = Some(err);
        }
        target
    });

    match failure {
        Some(err) => Err(err),
        None => {
            debug!(component = %descriptor.short_name(), "Constructed");
            Ok(built)
        }
    }
}

fn build<T: Component>(
    ctx: &mut ResolutionContext<'_>,
    target: &mut T,
    weak: &Weak<T>,
    descriptor: &Descriptor<T>,
    init: Option<&MethodSpec<T>>,
    options: &ConstructOptions,
) -> Result<()> {
    let make_self = || Instance::weak(weak.clone());
    let self_ref: SelfRef<'_> = Some(&make_self);

    let args = match init {
        Some(method) => {
            let subject = format!("{}::{}", descriptor.short_name(), method.name());
            wire::resolve_params(ctx, &subject, method.params(), &options.init_params, self_ref)?
        }
        None => Vec::new(),
    };

    wire::wire_fields(ctx, target, Some(weak), descriptor)?;

    if let Some(method) = init {
        ctx.record(format!("init {}::{}", descriptor.short_name(), method.name()));
        method.invoke(target, args)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::container::Container;
    use crate::error::CycleStage;

    #[derive(Debug, Default)]
    struct Pool {
        size: u32,
        log: Vec<String>,
    }

    impl Pool {
        fn init(&mut self) {
            self.log.push(format!("init size={}", self.size));
        }

        fn open(&mut self, size: u32, label: String) {
            self.size = size;
            self.log.push(format!("open {label}"));
        }

        fn pool(&mut self) {
            self.log.push("constructor".into());
        }
    }

    impl Component for Pool {
        fn describe(d: &mut Descriptor<Self>) {
            d.field("size", |p| &mut p.size).value("4");
            d.method("init", Pool::init);
            d.method("Open", Pool::open);
            d.method("pool", Pool::pool);
        }
    }

    #[derive(Debug, Default)]
    struct Counted {
        value: u32,
    }

    impl Counted {
        fn init(&mut self) -> bool {
            self.value = 1;
            true
        }
    }

    impl Component for Counted {
        fn describe(d: &mut Descriptor<Self>) {
            d.method("init", Counted::init);
        }
    }

    fn ctx(container: &Container) -> ResolutionContext<'_> {
        ResolutionContext::root(container, Duration::from_secs(1))
    }

    #[test]
    fn default_init_runs_after_wiring() {
        let container = Container::new();
        let pool = new_with_option::<Pool>(&mut ctx(&container), &ConstructOptions::new()).unwrap();
        assert_eq!(pool.log, vec!["init size=4"]);
    }

    #[test]
    fn explicit_init_with_params() {
        let container = Container::new();
        let options = ConstructOptions::new()
            .init_method_name("open")
            .init_params(&["16", "value:main"]);
        let pool = new_with_option::<Pool>(&mut ctx(&container), &options).unwrap();
        // the field is wired to 4 before open() overwrites it
        assert_eq!(pool.size, 16);
        assert_eq!(pool.log, vec!["open main"]);
    }

    #[test]
    fn constructor_mode_uses_type_name() {
        let container = Container::new();
        let options = ConstructOptions::new().use_constructor(true);
        let pool = new_with_option::<Pool>(&mut ctx(&container), &options).unwrap();
        assert_eq!(pool.log, vec!["constructor"]);
    }

    #[test]
    fn constructor_mode_conflicts_with_name() {
        let container = Container::new();
        let options = ConstructOptions::new()
            .use_constructor(true)
            .init_method_name("open");
        let err = new_with_option::<Pool>(&mut ctx(&container), &options).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn missing_explicit_method_is_skipped() {
        let container = Container::new();
        let options = ConstructOptions::new().init_method_name("nope");
        let pool = new_with_option::<Pool>(&mut ctx(&container), &options).unwrap();
        assert!(pool.log.is_empty());
        assert_eq!(pool.size, 4);
    }

    #[test]
    fn init_returning_value_is_rejected() {
        let container = Container::new();
        let err =
            new_with_option::<Counted>(&mut ctx(&container), &ConstructOptions::new()).unwrap_err();
        assert!(format!("{err}").contains("must not return a value"));
    }

    #[test]
    fn init_param_count_mismatch() {
        let container = Container::new();
        let options = ConstructOptions::new()
            .init_method_name("open")
            .init_params(&["16"]);
        let err = new_with_option::<Pool>(&mut ctx(&container), &options).unwrap_err();
        assert!(matches!(err, MasnaError::InvalidDeclaration { .. }));
    }

    #[test]
    fn nested_construction_of_same_type_is_a_cycle() {
        let container = Container::new();
        let mut root = ctx(&container);
        let mut frame = root
            .enter_construction(DependencyKey::of::<Pool>())
            .unwrap();
        let err = new_with_option::<Pool>(&mut frame, &ConstructOptions::new()).unwrap_err();
        match err {
            MasnaError::CircularReference(e) => assert_eq!(e.stage, CycleStage::Construction),
            other => panic!("Expected CircularReference, got: {other:?}"),
        }
    }

    #[test]
    fn lazy_build_skips_the_type_guard() {
        let container = Container::new();
        let mut root = ctx(&container);
        let mut frame = root
            .enter_construction(DependencyKey::of::<Pool>())
            .unwrap();
        let pool = build_instance::<Pool>(&mut frame, &ConstructOptions::new()).unwrap();
        assert_eq!(pool.log, vec!["init size=4"]);
    }
}
