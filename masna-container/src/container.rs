//! # The Container — heart of Masna
//!
//! A [`Container`] owns the registry, the expression cache and the options.
//! It is cheap to clone; clones share everything.
//!
//! # Architecture
//! ```text
//! singleton / interface / register_*  ──>  Registry
//!                                            │
//! find / new_instance / auto_wire  ──>  ResolutionContext
//!                                            │
//!                               getters · construction · wiring
//! ```
//!
//! Every operation is also available as a free function acting on
//! [`Container::global()`], the process-wide container that collects
//! [`declare!`](crate::declare) registrations on first use.
//!
//! # Examples
//! ```rust
//! use masna_container::prelude::*;
//! use std::sync::Arc;
//!
//! trait Logger: Send + Sync {
//!     fn log(&self, msg: &str) -> String;
//! }
//!
//! #[derive(Default)]
//! struct ConsoleLogger;
//! impl Component for ConsoleLogger {}
//! impl Logger for ConsoleLogger {
//!     fn log(&self, msg: &str) -> String { format!("[console] {msg}") }
//! }
//!
//! #[derive(Default)]
//! struct UserService {
//!     logger: Option<Arc<dyn Logger>>,
//! }
//!
//! impl Component for UserService {
//!     fn describe(d: &mut Descriptor<Self>) {
//!         d.field("logger", |s| &mut s.logger).wire("type");
//!     }
//! }
//!
//! let container = Container::new();
//! container
//!     .singleton::<ConsoleLogger>()?
//!     .implements::<dyn Logger>(|l| l);
//! container.singleton::<UserService>()?;
//!
//! let service: Arc<UserService> = container.find()?;
//! assert_eq!(service.logger.as_ref().unwrap().log("hi"), "[console] hi");
//! # Ok::<(), MasnaError>(())
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use evalexpr::Value;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, error, info, instrument};

use crate::component::Component;
use crate::construct::{self, ConstructOptions};
use crate::context::{ResolutionContext, downcast_instance};
use crate::directive;
use crate::error::Result;
use crate::expr::{self, ExpressionCache};
use crate::factory::{Factory, FactoryFn, FactoryMethod};
use crate::key::DependencyKey;
use crate::lifecycle::{Interface, Singleton};
use crate::options::Options;
use crate::provider::Provider;
use crate::registry::{Binding, Getter, ProviderKind, Registry};
use crate::slot::Instance;
use crate::wire;

struct Inner {
    registry: Registry,
    expressions: ExpressionCache,
    options: RwLock<Options>,
}

/// Thread-safe dependency injection container.
#[derive(Clone)]
pub struct Container {
    inner: Arc<Inner>,
}

static GLOBAL: Lazy<Container> = Lazy::new(|| {
    let container = Container::new();
    let mut loaded = 0usize;

    for registration in inventory::iter::<Registration> {
        match (registration.register)(&container) {
            Ok(()) => loaded += 1,
            Err(err) => error!(
                registration = registration.label,
                error = %err,
                "Declared registration failed"
            ),
        }
    }

    info!(loaded, "Global container initialized");
    container
});

impl Container {
    /// Creates an empty container with default options.
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Registry::new(),
                expressions: ExpressionCache::new(),
                options: RwLock::new(options),
            }),
        }
    }

    /// The process-wide container.
    ///
    /// Runs every [`declare!`](crate::declare) registration the first time
    /// it is touched.
    pub fn global() -> &'static Container {
        &GLOBAL
    }

    pub fn options(&self) -> Options {
        self.inner.options.read().clone()
    }

    /// Replaces the options. Calls already in flight keep their budget.
    pub fn set_options(&self, options: Options) {
        debug!(?options, max_depth = options.max_depth(), "Container options updated");
        *self.inner.options.write() = options;
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn expressions(&self) -> &ExpressionCache {
        &self.inner.expressions
    }

    fn root(&self, timeout: Duration) -> ResolutionContext<'_> {
        ResolutionContext::root(self, timeout)
    }

    fn default_timeout(&self) -> Duration {
        self.inner.options.read().timeout
    }

    // ── Raw bindings ──

    fn custom_binding<T: ?Sized + Send + Sync + 'static>(
        getter: impl Fn(&mut ResolutionContext<'_>) -> Result<Arc<T>> + Send + Sync + 'static,
    ) -> Arc<Binding> {
        let getter: Getter =
            Arc::new(move |ctx: &mut ResolutionContext<'_>| getter(ctx).map(Instance::new));
        Arc::new(Binding::new(
            DependencyKey::of::<T>(),
            ProviderKind::Custom,
            getter,
        ))
    }

    /// Registers a getter as the default binding of `T`. The getter runs on
    /// every lookup; caching is up to the caller.
    pub fn register_type<T: ?Sized + Send + Sync + 'static>(
        &self,
        getter: impl Fn(&mut ResolutionContext<'_>) -> Result<Arc<T>> + Send + Sync + 'static,
    ) -> Result<Arc<Binding>> {
        let binding = Self::custom_binding(getter);
        self.registry().register_type(binding.clone())?;
        Ok(binding)
    }

    /// Registers a getter under `name`.
    pub fn register_name<T: ?Sized + Send + Sync + 'static>(
        &self,
        name: &str,
        getter: impl Fn(&mut ResolutionContext<'_>) -> Result<Arc<T>> + Send + Sync + 'static,
    ) -> Result<Arc<Binding>> {
        let binding = Self::custom_binding(getter);
        self.registry().register_name(name, binding.clone())?;
        Ok(binding)
    }

    // ── Lazy bindings ──

    /// Declares the default, lazily constructed binding of `T`.
    pub fn singleton<T: Component>(&self) -> Result<Singleton<T>> {
        Singleton::register(self, None)
    }

    /// Declares a lazily constructed `T` known only by `name`.
    pub fn named_singleton<T: Component>(&self, name: &str) -> Result<Singleton<T>> {
        Singleton::register(self, Some(name))
    }

    /// Declares the default binding of `I`, built once by `init`.
    pub fn interface<I: ?Sized + Send + Sync + 'static>(
        &self,
        init: impl Fn(&mut ResolutionContext<'_>) -> Result<Arc<I>> + Send + Sync + 'static,
    ) -> Result<Interface<I>> {
        Interface::register(self, None, init)
    }

    /// Declares an `I` known only by `name`, built once by `init`.
    pub fn named_interface<I: ?Sized + Send + Sync + 'static>(
        &self,
        name: &str,
        init: impl Fn(&mut ResolutionContext<'_>) -> Result<Arc<I>> + Send + Sync + 'static,
    ) -> Result<Interface<I>> {
        Interface::register(self, Some(name), init)
    }

    // ── Lookup ──

    /// Finds `T` by type: its own binding, else the single binding that
    /// implements it.
    pub fn find<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.find_timeout(self.default_timeout())
    }

    #[instrument(skip(self), fields(requested = std::any::type_name::<T>()))]
    pub fn find_timeout<T: ?Sized + Send + Sync + 'static>(
        &self,
        timeout: Duration,
    ) -> Result<Arc<T>> {
        self.root(timeout).find::<T>()
    }

    /// Finds the binding named `name` as `T`.
    pub fn find_by_name<T: ?Sized + Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.find_by_name_timeout(name, self.default_timeout())
    }

    #[instrument(skip(self), fields(requested = std::any::type_name::<T>()))]
    pub fn find_by_name_timeout<T: ?Sized + Send + Sync + 'static>(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Arc<T>> {
        self.root(timeout).find_by_name::<T>(name)
    }

    /// Resolves every type binding usable as `T`, the exact binding first,
    /// then implementations in label order.
    pub fn find_all<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>> {
        let key = DependencyKey::of::<T>();
        let registry = self.registry();
        let bindings = registry
            .lookup_type(&key)
            .into_iter()
            .chain(registry.lookup_interface_implementations(&key));

        let mut ctx = self.root(self.default_timeout());
        bindings
            .map(|binding| {
                let instance = ctx.invoke(&binding, &key)?;
                downcast_instance(instance, &binding.label())
            })
            .collect()
    }

    // ── Construction ──

    /// Constructs a fresh, uncached `T` with default options.
    pub fn new_instance<T: Component>(&self) -> Result<Arc<T>> {
        self.new_with_option_timeout(&ConstructOptions::default(), self.default_timeout())
    }

    pub fn new_timeout<T: Component>(&self, timeout: Duration) -> Result<Arc<T>> {
        self.new_with_option_timeout(&ConstructOptions::default(), timeout)
    }

    pub fn new_with_option<T: Component>(&self, options: &ConstructOptions) -> Result<Arc<T>> {
        self.new_with_option_timeout(options, self.default_timeout())
    }

    pub fn new_with_option_timeout<T: Component>(
        &self,
        options: &ConstructOptions,
        timeout: Duration,
    ) -> Result<Arc<T>> {
        construct::new_with_option::<T>(&mut self.root(timeout), options)
    }

    // ── Factories ──

    /// Registers `factory` as the builder of `I` for `#[masna(new)]` fields.
    ///
    /// `params` holds one directive per argument, or nothing to resolve
    /// every argument by type.
    pub fn register_factory<I, Args>(
        &self,
        factory: impl FactoryFn<Args, I>,
        params: &[&str],
    ) -> Result<()>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        let factory = Factory::function::<I, Args, _>(factory, params)?;
        self.registry().register_factory(Arc::new(factory))
    }

    /// Registers a method of `receiver` as the builder of `I`. The receiver
    /// does not count as a parameter.
    pub fn register_factory_method<I, O, Args>(
        &self,
        receiver: Arc<O>,
        method: impl FactoryMethod<O, Args, I>,
        params: &[&str],
    ) -> Result<()>
    where
        I: ?Sized + Send + Sync + 'static,
        O: ?Sized + Send + Sync + 'static,
    {
        let factory = Factory::method::<I, O, Args, _>(receiver, method, params)?;
        self.registry().register_factory(Arc::new(factory))
    }

    // ── Wiring & expressions ──

    /// Wires the tagged fields of an existing object.
    pub fn auto_wire<T: Component>(&self, target: &mut T) -> Result<()> {
        self.auto_wire_timeout(target, self.default_timeout())
    }

    pub fn auto_wire_timeout<T: Component>(&self, target: &mut T, timeout: Duration) -> Result<()> {
        wire::auto_wire(&mut self.root(timeout), target)
    }

    /// Moves `seed` into an `Arc` and wires it there, so `self` fields
    /// receive a weak handle to the returned object.
    pub fn auto_wire_shared<T: Component>(&self, seed: T) -> Result<Arc<T>> {
        wire::auto_wire_shared(&mut self.root(self.default_timeout()), seed)
    }

    /// Evaluates an expression, with or without the `${...}` wrapper.
    pub fn evaluate(&self, code: &str) -> Result<Value> {
        let code = directive::expression(code).unwrap_or(code);
        expr::evaluate(&mut self.root(self.default_timeout()), code)
    }

    // ── Provider modules ──

    /// Runs a [`Provider`] module against this container.
    #[instrument(skip_all, fields(provider = provider.name()))]
    pub fn add_provider(&self, provider: &dyn Provider) -> Result<()> {
        info!("Loading provider");
        provider.register(self)
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("registry", &self.inner.registry)
            .field("expressions", &self.inner.expressions)
            .field("options", &*self.inner.options.read())
            .finish()
    }
}

// ═══════════════════════════════════════════
// Startup registration
// ═══════════════════════════════════════════

/// A registration run against the global container on first use.
///
/// Submit one with [`declare!`](crate::declare).
pub struct Registration {
    pub label: &'static str,
    pub register: fn(&Container) -> Result<()>,
}

impl Registration {
    pub const fn new(label: &'static str, register: fn(&Container) -> Result<()>) -> Self {
        Self { label, register }
    }
}

inventory::collect!(Registration);

/// Declares a registration for the global container.
///
/// ```rust,ignore
/// masna::declare!("repo", |c| c.singleton::<Repo>().map(|_| ()));
/// ```
#[macro_export]
macro_rules! declare {
    ($label:expr, $register:expr $(,)?) => {
        $crate::inventory::submit! {
            $crate::container::Registration::new($label, $register)
        }
    };
}

// ═══════════════════════════════════════════
// Free functions on the global container
// ═══════════════════════════════════════════

pub fn singleton<T: Component>() -> Result<Singleton<T>> {
    Container::global().singleton()
}

pub fn named_singleton<T: Component>(name: &str) -> Result<Singleton<T>> {
    Container::global().named_singleton(name)
}

pub fn interface<I: ?Sized + Send + Sync + 'static>(
    init: impl Fn(&mut ResolutionContext<'_>) -> Result<Arc<I>> + Send + Sync + 'static,
) -> Result<Interface<I>> {
    Container::global().interface(init)
}

pub fn named_interface<I: ?Sized + Send + Sync + 'static>(
    name: &str,
    init: impl Fn(&mut ResolutionContext<'_>) -> Result<Arc<I>> + Send + Sync + 'static,
) -> Result<Interface<I>> {
    Container::global().named_interface(name, init)
}

pub fn find<T: ?Sized + Send + Sync + 'static>() -> Result<Arc<T>> {
    Container::global().find()
}

pub fn find_timeout<T: ?Sized + Send + Sync + 'static>(timeout: Duration) -> Result<Arc<T>> {
    Container::global().find_timeout(timeout)
}

pub fn find_by_name<T: ?Sized + Send + Sync + 'static>(name: &str) -> Result<Arc<T>> {
    Container::global().find_by_name(name)
}

pub fn find_by_name_timeout<T: ?Sized + Send + Sync + 'static>(
    name: &str,
    timeout: Duration,
) -> Result<Arc<T>> {
    Container::global().find_by_name_timeout(name, timeout)
}

pub fn find_all<T: ?Sized + Send + Sync + 'static>() -> Result<Vec<Arc<T>>> {
    Container::global().find_all()
}

/// Constructs a fresh `T` from the global container.
pub fn new<T: Component>() -> Result<Arc<T>> {
    Container::global().new_instance()
}

pub fn new_timeout<T: Component>(timeout: Duration) -> Result<Arc<T>> {
    Container::global().new_timeout(timeout)
}

pub fn new_with_option<T: Component>(options: &ConstructOptions) -> Result<Arc<T>> {
    Container::global().new_with_option(options)
}

pub fn new_with_option_timeout<T: Component>(
    options: &ConstructOptions,
    timeout: Duration,
) -> Result<Arc<T>> {
    Container::global().new_with_option_timeout(options, timeout)
}

pub fn register_factory<I, Args>(factory: impl FactoryFn<Args, I>, params: &[&str]) -> Result<()>
where
    I: ?Sized + Send + Sync + 'static,
{
    Container::global().register_factory(factory, params)
}

pub fn register_factory_method<I, O, Args>(
    receiver: Arc<O>,
    method: impl FactoryMethod<O, Args, I>,
    params: &[&str],
) -> Result<()>
where
    I: ?Sized + Send + Sync + 'static,
    O: ?Sized + Send + Sync + 'static,
{
    Container::global().register_factory_method(receiver, method, params)
}

pub fn auto_wire<T: Component>(target: &mut T) -> Result<()> {
    Container::global().auto_wire(target)
}

pub fn auto_wire_timeout<T: Component>(target: &mut T, timeout: Duration) -> Result<()> {
    Container::global().auto_wire_timeout(target, timeout)
}

pub fn auto_wire_shared<T: Component>(seed: T) -> Result<Arc<T>> {
    Container::global().auto_wire_shared(seed)
}

pub fn evaluate(code: &str) -> Result<Value> {
    Container::global().evaluate(code)
}

// ═══════════════════════════════════════════
// Prelude
// ═══════════════════════════════════════════

pub mod prelude {
    pub use super::{Container, Registration};
    pub use crate::component::{Component, Descriptor, Properties};
    pub use crate::construct::ConstructOptions;
    pub use crate::context::ResolutionContext;
    pub use crate::error::{MasnaError, Result};
    pub use crate::key::DependencyKey;
    pub use crate::lifecycle::{Interface, Singleton};
    pub use crate::options::Options;
    pub use crate::provider::Provider;
    pub use crate::slot::ToExprValue;
    pub use evalexpr::Value as ExprValue;
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Descriptor;
    use crate::error::MasnaError;
    use std::sync::atomic::{AtomicU32, Ordering};

    trait Store: Send + Sync {
        fn kind(&self) -> &'static str;
    }

    impl std::fmt::Debug for dyn Store {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.kind())
        }
    }

    #[derive(Debug, Default)]
    struct Memory;
    impl Component for Memory {}
    impl Store for Memory {
        fn kind(&self) -> &'static str {
            "memory"
        }
    }

    #[derive(Debug, Default)]
    struct Disk;
    impl Component for Disk {}
    impl Store for Disk {
        fn kind(&self) -> &'static str {
            "disk"
        }
    }

    #[derive(Default)]
    struct Cache {
        store: Option<Arc<dyn Store>>,
    }

    impl Component for Cache {
        fn describe(d: &mut Descriptor<Self>) {
            d.field("store", |c| &mut c.store).wire("type");
        }
    }

    #[test]
    fn singleton_is_cached() {
        let container = Container::new();
        container.singleton::<Memory>().unwrap();

        let a: Arc<Memory> = container.find().unwrap();
        let b: Arc<Memory> = container.find().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn new_instance_is_not_cached() {
        let container = Container::new();
        let a = container.new_instance::<Memory>().unwrap();
        let b = container.new_instance::<Memory>().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn interface_scan_finds_single_implementation() {
        let container = Container::new();
        container
            .singleton::<Memory>()
            .unwrap()
            .implements::<dyn Store>(|m| m);
        container.singleton::<Cache>().unwrap();

        let cache: Arc<Cache> = container.find().unwrap();
        assert_eq!(cache.store.as_ref().unwrap().kind(), "memory");
    }

    #[test]
    fn interface_scan_is_ambiguous_with_two() {
        let container = Container::new();
        container
            .singleton::<Memory>()
            .unwrap()
            .implements::<dyn Store>(|m| m);
        container
            .singleton::<Disk>()
            .unwrap()
            .implements::<dyn Store>(|d| d);

        match container.find::<dyn Store>() {
            Err(MasnaError::Ambiguous(e)) => assert_eq!(e.candidates, vec!["Disk", "Memory"]),
            other => panic!("Expected Ambiguous, got: {other:?}"),
        }
        assert_eq!(container.find_all::<dyn Store>().unwrap().len(), 2);
    }

    #[test]
    fn exact_binding_wins_over_scan() {
        let container = Container::new();
        container
            .singleton::<Memory>()
            .unwrap()
            .implements::<dyn Store>(|m| m);
        container
            .interface::<dyn Store>(|_| Ok(Arc::new(Disk) as Arc<dyn Store>))
            .unwrap();

        assert_eq!(container.find::<dyn Store>().unwrap().kind(), "disk");
        let kinds: Vec<&str> = container
            .find_all::<dyn Store>()
            .unwrap()
            .iter()
            .map(|s| s.kind())
            .collect();
        assert_eq!(kinds, vec!["disk", "memory"]);
    }

    #[test]
    fn named_lookup_and_type_mismatch() {
        let container = Container::new();
        container
            .singleton::<Memory>()
            .unwrap()
            .name("mem")
            .unwrap();

        let by_name: Arc<Memory> = container.find_by_name("mem").unwrap();
        let by_type: Arc<Memory> = container.find().unwrap();
        assert!(Arc::ptr_eq(&by_name, &by_type));

        let err = container.find_by_name::<Disk>("mem").unwrap_err();
        assert!(matches!(err, MasnaError::TypeMismatch { .. }));
    }

    #[test]
    fn unknown_name_suggests_close_names() {
        let container = Container::new();
        container.named_singleton::<Memory>("memory").unwrap();

        match container.find_by_name::<Memory>("memroy") {
            Err(MasnaError::NotRegistered(e)) => {
                assert_eq!(e.suggestions, vec!["memory"]);
            }
            other => panic!("Expected NotRegistered, got: {other:?}"),
        }
    }

    #[test]
    fn raw_getter_runs_every_time() {
        let container = Container::new();
        let calls = Arc::new(AtomicU32::new(0));
        {
            let calls = calls.clone();
            container
                .register_type::<AtomicU32>(move |_| {
                    Ok(Arc::new(AtomicU32::new(calls.fetch_add(1, Ordering::SeqCst))))
                })
                .unwrap();
        }

        container.find::<AtomicU32>().unwrap();
        container.find::<AtomicU32>().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn duplicate_singleton_fails() {
        let container = Container::new();
        container.singleton::<Memory>().unwrap();
        let err = container.singleton::<Memory>().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn provider_registers_module() {
        struct Storage;

        impl Provider for Storage {
            fn register(&self, container: &Container) -> Result<()> {
                container
                    .singleton::<Disk>()?
                    .implements::<dyn Store>(|d| d);
                Ok(())
            }
        }

        let container = Container::new();
        container.add_provider(&Storage).unwrap();
        assert_eq!(container.find::<dyn Store>().unwrap().kind(), "disk");
    }

    #[test]
    fn evaluate_strips_wrapper() {
        let container = Container::new();
        assert_eq!(container.evaluate("${1 + 2}").unwrap(), Value::Int(3));
        assert_eq!(container.evaluate("2 * 4").unwrap(), Value::Int(8));
    }

    #[derive(Default)]
    struct Declared;
    impl Component for Declared {}

    crate::declare!("declared probe", |c| c
        .named_singleton::<Declared>("declared_probe")
        .map(|_| ()));

    #[test]
    fn declared_registrations_reach_global() {
        let found = find_by_name::<Declared>("declared_probe");
        assert!(found.is_ok());
    }

    #[test]
    fn debug_display() {
        let container = Container::new();
        container.singleton::<Memory>().unwrap();
        let debug = format!("{container:?}");
        assert!(debug.contains("Container"));
        assert!(debug.contains("types: 1"));
    }
}
