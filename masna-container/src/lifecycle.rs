//! Lazily initialized, cached bindings.
//!
//! [`Singleton`] builds a [`Component`] on first request and caches it;
//! [`Interface`] caches the result of a user initializer, usually a trait
//! object. Both are thread-safe: concurrent first requests run the
//! initializer once and every caller receives the same `Arc`.
//!
//! A failed initialization leaves the binding uninitialized. A later,
//! independent request runs the initializer again, so a singleton whose
//! dependency was missing works once the dependency is registered.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, instrument, warn};

use crate::component::{Component, Properties};
use crate::construct::{self, ConstructOptions};
use crate::container::Container;
use crate::context::{ResolutionContext, downcast_instance};
use crate::error::{MasnaError, Result};
use crate::key::DependencyKey;
use crate::registry::{Binding, CastFn, ExposeFn, Getter, ProviderKind};
use crate::slot::Instance;

// ============================================================
// OnceWait
// ============================================================

/// Why [`OnceWait::get_or_try_init`] gave up.
#[derive(Debug)]
pub(crate) enum WaitError<E> {
    /// Another caller's initializer did not finish in time.
    TimedOut(Duration),
    /// This caller ran the initializer and it failed.
    Failed(E),
}

/// A once-cell whose waiters can give up after a deadline.
///
/// The initialized value is read without locking; only callers racing the
/// first initialization touch the mutex.
pub(crate) struct OnceWait<V> {
    cell: OnceCell<V>,
    initializing: Mutex<bool>,
    ready: Condvar,
}

impl<V: Clone> OnceWait<V> {
    pub(crate) fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            initializing: Mutex::new(false),
            ready: Condvar::new(),
        }
    }

    pub(crate) fn get(&self) -> Option<V> {
        self.cell.get().cloned()
    }

    /// Returns the value, running `init` if nobody has produced it yet.
    ///
    /// With `wait = None` a caller waits for a concurrent initializer as
    /// long as it takes.
    pub(crate) fn get_or_try_init<E>(
        &self,
        wait: Option<Duration>,
        init: impl FnOnce() -> std::result::Result<V, E>,
    ) -> std::result::Result<V, WaitError<E>> {
        if let Some(value) = self.cell.get() {
            return Ok(value.clone());
        }

        let started = Instant::now();
        let deadline = wait.map(|wait| started + wait);
        {
            let mut initializing = self.initializing.lock();
            loop {
                if let Some(value) = self.cell.get() {
                    return Ok(value.clone());
                }
                if !*initializing {
                    *initializing = true;
                    break;
                }
                match deadline {
                    Some(deadline) => {
                        if self.ready.wait_until(&mut initializing, deadline).timed_out() {
                            return match self.cell.get() {
                                Some(value) => Ok(value.clone()),
                                None => Err(WaitError::TimedOut(started.elapsed())),
                            };
                        }
                    }
                    None => self.ready.wait(&mut initializing),
                }
            }
        }

        let _release = Release(self);
        let value = init().map_err(WaitError::Failed)?;
        let _ = self.cell.set(value.clone());
        Ok(value)
    }
}

/// Clears the initializing flag and wakes waiters, on success or failure.
struct Release<'o, V>(&'o OnceWait<V>);

impl<V> Drop for Release<'_, V> {
    fn drop(&mut self) {
        *self.0.initializing.lock() = false;
        self.0.ready.notify_all();
    }
}

/// Resolves a cached value inside the current call chain.
///
/// The initializer runs one budget level down; waiting on another caller is
/// bounded by the remaining budget.
fn resolve_cached<V: Clone>(
    once: &OnceWait<V>,
    ctx: &mut ResolutionContext<'_>,
    init: impl FnOnce(&mut ResolutionContext<'_>) -> Result<V>,
) -> Result<V> {
    let label = ctx.current().unwrap_or("lazy binding").to_string();
    let wait = ctx.budget();

    let outcome = once.get_or_try_init(wait, || {
        let mut level = ctx.descend(&label)?;
        level.record(format!("initialize {label}"));
        let value = init(&mut *level);
        if let Err(err) = &value {
            debug!(binding = %label, error = %err, "Lazy initialization failed; binding stays uninitialized");
        }
        value
    });

    match outcome {
        Ok(value) => Ok(value),
        Err(WaitError::Failed(err)) => Err(err),
        Err(WaitError::TimedOut(waited)) => {
            warn!(binding = %label, ?waited, "Timed out waiting for initialization");
            Err(MasnaError::Timeout {
                binding: label,
                waited,
                step: ctx.last_step().to_string(),
            })
        }
    }
}

fn cast_from<S, I>(cast: impl Fn(Arc<S>) -> Arc<I> + Send + Sync + 'static) -> CastFn
where
    S: ?Sized + Send + Sync + 'static,
    I: ?Sized + Send + Sync + 'static,
{
    Arc::new(move |instance: &Instance| {
        instance
            .downcast_ref::<S>()
            .map(|handle| Instance::new(cast(handle.clone())))
    })
}

fn register(container: &Container, binding: &Arc<Binding>, name: Option<&str>) -> Result<()> {
    match name {
        Some(name) => container.registry().register_name(name, binding.clone()),
        None => container.registry().register_type(binding.clone()),
    }
}

/// Resolves `binding` from a fresh call chain.
fn get_root<V: ?Sized + Send + Sync + 'static>(
    container: &Container,
    binding: &Binding,
    timeout: Duration,
) -> Result<Arc<V>> {
    let mut ctx = ResolutionContext::root(container, timeout);
    let key = binding.key();
    let instance = ctx.invoke(binding, &key)?;
    downcast_instance(instance, &binding.label())
}

// ============================================================
// Singleton
// ============================================================

type Override<T> = Arc<dyn Fn(&mut ResolutionContext<'_>) -> Result<T> + Send + Sync>;

struct SingletonState<T> {
    once: OnceWait<Arc<T>>,
    options: Mutex<ConstructOptions>,
    init_with: Mutex<Option<Override<T>>>,
}

impl<T: Component> SingletonState<T> {
    fn resolve(&self, ctx: &mut ResolutionContext<'_>) -> Result<Arc<T>> {
        resolve_cached(&self.once, ctx, |ctx| {
            let init_with = self.init_with.lock().clone();
            match init_with {
                Some(init) => init(ctx).map(Arc::new),
                None => {
                    let options = self.options.lock().clone();
                    construct::build_instance::<T>(ctx, &options)
                }
            }
        })
    }
}

/// Handle to a lazily constructed component binding.
///
/// Configuration calls only affect initializations that have not run yet.
pub struct Singleton<T: Component> {
    container: Container,
    binding: Arc<Binding>,
    state: Arc<SingletonState<T>>,
}

impl<T: Component> Singleton<T> {
    /// Creates the binding and registers it by type, or by `name` alone.
    #[instrument(skip(container), fields(component = std::any::type_name::<T>()))]
    pub(crate) fn register(container: &Container, name: Option<&str>) -> Result<Self> {
        let state = Arc::new(SingletonState {
            once: OnceWait::new(),
            options: Mutex::new(ConstructOptions::default()),
            init_with: Mutex::new(None),
        });

        let getter: Getter = {
            let state = state.clone();
            Arc::new(move |ctx: &mut ResolutionContext<'_>| state.resolve(ctx).map(Instance::new))
        };
        let expose: ExposeFn = Arc::new(|instance: &Instance| {
            instance
                .downcast_ref::<T>()
                .map(|handle| handle.clone() as Arc<dyn Properties>)
        });
        let binding = Arc::new(
            Binding::new(DependencyKey::of::<T>(), ProviderKind::Singleton, getter)
                .with_expose(expose),
        );

        register(container, &binding, name)?;
        Ok(Self {
            container: container.clone(),
            binding,
            state,
        })
    }

    /// Also registers this binding under `name`.
    ///
    /// # Errors
    /// [`MasnaError::AlreadyRegistered`] if the name is taken and
    /// [`MasnaError::InvalidDeclaration`] if this binding already has a name.
    pub fn name(self, name: &str) -> Result<Self> {
        self.container
            .registry()
            .register_name(name, self.binding.clone())?;
        Ok(self)
    }

    /// Uses the constructor method named after the type as init method.
    pub fn use_constructor(self, use_constructor: bool) -> Self {
        self.state.options.lock().use_constructor = use_constructor;
        self
    }

    /// Sets the init method run after wiring.
    pub fn init_method_name(self, name: &str) -> Self {
        self.state.options.lock().init_method_name = Some(name.to_string());
        self
    }

    /// Sets one directive per init method parameter.
    pub fn init_params(self, params: &[&str]) -> Self {
        self.state.options.lock().init_params = params.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Replaces construction with a user initializer.
    ///
    /// The initializer resolves its dependencies through the context it is
    /// handed, for example `ctx.find::<Db>()`. Calling [`Singleton::get`] or a
    /// `Container` lookup from inside it starts a new root chain: a cycle back
    /// to this binding is then not detected and blocks on the unfinished
    /// initialization until the timeout, or forever when timeouts are off.
    pub fn init_with(
        self,
        init: impl Fn(&mut ResolutionContext<'_>) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        *self.state.init_with.lock() = Some(Arc::new(init));
        self
    }

    /// Makes this binding resolvable as `I`, typically a trait object.
    ///
    /// ```ignore
    /// container.singleton::<Postgres>()?.implements::<dyn Store>(|pg| pg);
    /// ```
    pub fn implements<I: ?Sized + Send + Sync + 'static>(
        self,
        cast: impl Fn(Arc<T>) -> Arc<I> + Send + Sync + 'static,
    ) -> Self {
        self.binding.add_cast(DependencyKey::of::<I>(), cast_from(cast));
        self
    }

    /// Returns the instance, constructing it on first use.
    pub fn get(&self) -> Result<Arc<T>> {
        self.get_timeout(self.container.options().timeout)
    }

    /// Like [`get`](Self::get) with an explicit budget.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Arc<T>> {
        get_root(&self.container, &self.binding, timeout)
    }

    /// Returns the instance if it was already initialized.
    pub fn peek(&self) -> Option<Arc<T>> {
        self.state.once.get()
    }

    /// Returns a function that resolves this binding on every call.
    pub fn getter(&self) -> impl Fn() -> Result<Arc<T>> + Send + Sync + 'static {
        let container = self.container.clone();
        let binding = self.binding.clone();
        move || get_root(&container, &binding, container.options().timeout)
    }

    pub fn binding(&self) -> &Arc<Binding> {
        &self.binding
    }
}

impl<T: Component> Clone for Singleton<T> {
    fn clone(&self) -> Self {
        Self {
            container: self.container.clone(),
            binding: self.binding.clone(),
            state: self.state.clone(),
        }
    }
}

impl<T: Component> fmt::Debug for Singleton<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Singleton")
            .field("binding", &self.binding)
            .field("initialized", &self.state.once.get().is_some())
            .finish()
    }
}

// ============================================================
// Interface
// ============================================================

type InterfaceInit<I> = Arc<dyn Fn(&mut ResolutionContext<'_>) -> Result<Arc<I>> + Send + Sync>;

/// Handle to a lazily initialized binding of any type, usually `dyn Trait`.
pub struct Interface<I: ?Sized + Send + Sync + 'static> {
    container: Container,
    binding: Arc<Binding>,
    once: Arc<OnceWait<Arc<I>>>,
}

impl<I: ?Sized + Send + Sync + 'static> Interface<I> {
    #[instrument(skip(container, init), fields(interface = std::any::type_name::<I>()))]
    pub(crate) fn register(
        container: &Container,
        name: Option<&str>,
        init: impl Fn(&mut ResolutionContext<'_>) -> Result<Arc<I>> + Send + Sync + 'static,
    ) -> Result<Self> {
        let once = Arc::new(OnceWait::new());
        let init: InterfaceInit<I> = Arc::new(init);

        let getter: Getter = {
            let once = once.clone();
            Arc::new(move |ctx: &mut ResolutionContext<'_>| {
                let init = init.clone();
                resolve_cached(&once, ctx, move |ctx| init(ctx)).map(Instance::new)
            })
        };
        let binding = Arc::new(Binding::new(
            DependencyKey::of::<I>(),
            ProviderKind::Interface,
            getter,
        ));

        register(container, &binding, name)?;
        Ok(Self {
            container: container.clone(),
            binding,
            once,
        })
    }

    /// Also registers this binding under `name`.
    pub fn name(self, name: &str) -> Result<Self> {
        self.container
            .registry()
            .register_name(name, self.binding.clone())?;
        Ok(self)
    }

    /// Makes this binding resolvable as `J` as well.
    pub fn implements<J: ?Sized + Send + Sync + 'static>(
        self,
        cast: impl Fn(Arc<I>) -> Arc<J> + Send + Sync + 'static,
    ) -> Self {
        self.binding.add_cast(DependencyKey::of::<J>(), cast_from(cast));
        self
    }

    /// Lets `${name.field}` expressions read this binding through `view`.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use masna_container::{Container, Properties, ExprValue};
    ///
    /// struct Limits;
    ///
    /// impl Properties for Limits {
    ///     fn property(&self, path: &str) -> Option<ExprValue> {
    ///         (path == "max").then(|| ExprValue::Int(10))
    ///     }
    /// }
    ///
    /// let container = Container::new();
    /// container
    ///     .named_interface::<Limits>("limits", |_| Ok(Arc::new(Limits)))
    ///     .unwrap()
    ///     .exposes(|limits| limits);
    /// assert_eq!(container.evaluate("${limits.max * 2}").unwrap(), ExprValue::Int(20));
    /// ```
    pub fn exposes(self, view: impl Fn(Arc<I>) -> Arc<dyn Properties> + Send + Sync + 'static) -> Self {
        self.binding.expose_as(view);
        self
    }

    /// Returns the instance, initializing it on first use.
    ///
    /// Initializers resolve through the context they are handed. Calling
    /// `get` from inside an initializer starts a new root chain, so a cycle
    /// through it is not detected and waits on the unfinished binding.
    pub fn get(&self) -> Result<Arc<I>> {
        self.get_timeout(self.container.options().timeout)
    }

    pub fn get_timeout(&self, timeout: Duration) -> Result<Arc<I>> {
        get_root(&self.container, &self.binding, timeout)
    }

    pub fn peek(&self) -> Option<Arc<I>> {
        self.once.get()
    }

    /// Returns a function that resolves this binding on every call.
    pub fn getter(&self) -> impl Fn() -> Result<Arc<I>> + Send + Sync + 'static {
        let container = self.container.clone();
        let binding = self.binding.clone();
        move || get_root(&container, &binding, container.options().timeout)
    }

    pub fn binding(&self) -> &Arc<Binding> {
        &self.binding
    }
}

impl<I: ?Sized + Send + Sync + 'static> Clone for Interface<I> {
    fn clone(&self) -> Self {
        Self {
            container: self.container.clone(),
            binding: self.binding.clone(),
            once: self.once.clone(),
        }
    }
}

impl<I: ?Sized + Send + Sync + 'static> fmt::Debug for Interface<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("binding", &self.binding)
            .field("initialized", &self.once.get().is_some())
            .finish()
    }
}
