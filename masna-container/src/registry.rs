//! Binding registry: type → binding, name → binding, type → factory.
//!
//! The registry is populated during startup and read on every lookup.
//! All tables sit behind a single read/write lock; getters are cloned out
//! before they run, so no lock is held while a binding resolves.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::component::Properties;
use crate::context::ResolutionContext;
use crate::error::{AlreadyRegisteredError, BindingRef, MasnaError, Result};
use crate::factory::Factory;
use crate::key::DependencyKey;
use crate::slot::Instance;

/// Produces the instance of a binding.
///
/// A getter receives the [`ResolutionContext`] of the current call chain so
/// that whatever it resolves in turn takes part in cycle detection and in
/// the timeout budget.
pub type Getter = Arc<dyn Fn(&mut ResolutionContext<'_>) -> Result<Instance> + Send + Sync>;

/// Views an instance of a binding as another type, usually `Arc<dyn Trait>`.
pub type CastFn = Arc<dyn Fn(&Instance) -> Option<Instance> + Send + Sync>;

/// Exposes the properties of an instance to expressions.
pub type ExposeFn = Arc<dyn Fn(&Instance) -> Option<Arc<dyn Properties>> + Send + Sync>;

/// What kind of provider stands behind a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// A lazily constructed, cached component.
    Singleton,
    /// A lazily initialized trait object (or any type) from a user initializer.
    Interface,
    /// A raw getter registered with `register_type`/`register_name`.
    Custom,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Singleton => write!(f, "Singleton"),
            ProviderKind::Interface => write!(f, "Interface"),
            ProviderKind::Custom => write!(f, "Custom"),
        }
    }
}

static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

/// A registered provider for a type and/or a name.
pub struct Binding {
    id: u64,
    key: DependencyKey,
    kind: ProviderKind,
    name: RwLock<Option<String>>,
    getter: Getter,
    casts: RwLock<Vec<(DependencyKey, CastFn)>>,
    expose: RwLock<Option<ExposeFn>>,
}

impl Binding {
    /// Creates a binding producing instances of `key`.
    pub fn new(key: DependencyKey, kind: ProviderKind, getter: Getter) -> Self {
        Self {
            id: NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed),
            key,
            kind,
            name: RwLock::new(None),
            getter,
            casts: RwLock::new(Vec::new()),
            expose: RwLock::new(None),
        }
    }

    /// Lets expressions read properties of this binding's instance.
    pub fn with_expose(mut self, expose: ExposeFn) -> Self {
        *self.expose.get_mut() = Some(expose);
        self
    }

    /// Lets expressions read this binding's `Arc<T>` instance through `view`.
    ///
    /// Replaces any earlier exposer. Roots already cached by the container's
    /// expression cache keep their old view.
    pub fn expose_as<T: ?Sized + Send + Sync + 'static>(
        &self,
        view: impl Fn(Arc<T>) -> Arc<dyn Properties> + Send + Sync + 'static,
    ) {
        debug!(binding = %self.label(), "Exposed properties to expressions");
        let expose: ExposeFn = Arc::new(move |instance: &Instance| {
            instance.downcast_ref::<T>().map(|handle| view(handle.clone()))
        });
        *self.expose.write() = Some(expose);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> DependencyKey {
        self.key
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn name(&self) -> Option<String> {
        self.name.read().clone()
    }

    /// Human-readable label: `Repo` or `"db" (Repo)`.
    pub fn label(&self) -> String {
        match self.name.read().as_deref() {
            Some(name) => format!("{name:?} ({})", self.key.short_name()),
            None => self.key.short_name(),
        }
    }

    pub(crate) fn getter(&self) -> Getter {
        self.getter.clone()
    }

    pub(crate) fn expose(&self) -> Option<ExposeFn> {
        self.expose.read().clone()
    }

    pub(crate) fn set_name(&self, name: &str) -> Result<()> {
        let mut slot = self.name.write();
        if let Some(existing) = slot.as_deref() {
            return Err(MasnaError::invalid(
                self.key.short_name(),
                format!("name already set to {existing:?}"),
            ));
        }
        *slot = Some(name.to_string());
        Ok(())
    }

    /// Declares that this binding can be used wherever `target` is requested.
    pub fn add_cast(&self, target: DependencyKey, cast: CastFn) {
        debug!(binding = %self.label(), target = %target, "Registered interface cast");
        let mut casts = self.casts.write();
        casts.retain(|(key, _)| *key != target);
        casts.push((target, cast));
    }

    /// Returns `true` if this binding's instances are assignable to `target`.
    pub fn provides(&self, target: &DependencyKey) -> bool {
        self.key == *target || self.casts.read().iter().any(|(key, _)| key == target)
    }

    /// Converts an instance of this binding into an instance of `target`.
    pub fn cast(&self, instance: Instance, target: &DependencyKey) -> Result<Instance> {
        if self.key == *target {
            return Ok(instance);
        }

        let cast = self
            .casts
            .read()
            .iter()
            .find(|(key, _)| key == target)
            .map(|(_, cast)| cast.clone());

        cast.and_then(|cast| cast(&instance))
            .ok_or_else(|| MasnaError::TypeMismatch {
                binding: self.label(),
                expected: target.type_name().into(),
                found: instance.type_name().into(),
            })
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("name", &self.name.read())
            .finish()
    }
}

#[derive(Default)]
struct Tables {
    types: HashMap<DependencyKey, Arc<Binding>>,
    names: HashMap<String, Arc<Binding>>,
    factories: HashMap<DependencyKey, Arc<Factory>>,
}

/// Stores all bindings and factories of a container.
#[derive(Default)]
pub struct Registry {
    tables: RwLock<Tables>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the default binding for its declared type.
    ///
    /// # Errors
    /// Returns [`MasnaError::AlreadyRegistered`] if the type is already bound.
    pub fn register_type(&self, binding: Arc<Binding>) -> Result<()> {
        let key = binding.key();
        let mut tables = self.tables.write();

        if tables.types.contains_key(&key) {
            return Err(MasnaError::AlreadyRegistered(AlreadyRegisteredError {
                binding: BindingRef::Type(key),
            }));
        }

        debug!(key = %key, kind = %binding.kind(), "Registered type binding");
        tables.types.insert(key, binding);
        Ok(())
    }

    /// Registers a binding under a unique name.
    ///
    /// # Errors
    /// Returns [`MasnaError::InvalidDeclaration`] for a blank name and
    /// [`MasnaError::AlreadyRegistered`] if the name is taken.
    pub fn register_name(&self, name: &str, binding: Arc<Binding>) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MasnaError::invalid(
                binding.key().short_name(),
                "binding name must not be empty",
            ));
        }

        let mut tables = self.tables.write();
        if tables.names.contains_key(name) {
            return Err(MasnaError::AlreadyRegistered(AlreadyRegisteredError {
                binding: BindingRef::Name(name.to_string()),
            }));
        }

        binding.set_name(name)?;
        debug!(name, key = %binding.key(), kind = %binding.kind(), "Registered named binding");
        tables.names.insert(name.to_string(), binding);
        Ok(())
    }

    /// Registers the factory for its target type.
    pub fn register_factory(&self, factory: Arc<Factory>) -> Result<()> {
        let target = factory.target();
        let mut tables = self.tables.write();

        if tables.factories.contains_key(&target) {
            return Err(MasnaError::AlreadyRegistered(AlreadyRegisteredError {
                binding: BindingRef::Type(target),
            }));
        }

        debug!(target = %target, kind = %factory.kind(), "Registered factory");
        tables.factories.insert(target, factory);
        Ok(())
    }

    /// Looks up the default binding of a type.
    pub fn lookup_type(&self, key: &DependencyKey) -> Option<Arc<Binding>> {
        trace!(key = %key, "Looking up type binding");
        self.tables.read().types.get(key).cloned()
    }

    /// Looks up a binding by name.
    pub fn lookup_name(&self, name: &str) -> Option<Arc<Binding>> {
        trace!(name, "Looking up named binding");
        self.tables.read().names.get(name).cloned()
    }

    /// Looks up the factory registered for a type.
    pub fn lookup_factory(&self, key: &DependencyKey) -> Option<Arc<Factory>> {
        self.tables.read().factories.get(key).cloned()
    }

    /// Returns every type binding, other than the exact one, that can be
    /// viewed as `key`. Sorted by label so diagnostics are stable.
    pub fn lookup_interface_implementations(&self, key: &DependencyKey) -> Vec<Arc<Binding>> {
        let mut found: Vec<Arc<Binding>> = self
            .tables
            .read()
            .types
            .iter()
            .filter(|(bound, binding)| *bound != key && binding.provides(key))
            .map(|(_, binding)| binding.clone())
            .collect();
        found.sort_by_key(|binding| binding.label());
        found
    }

    /// Type names of all type bindings, for suggestions.
    pub fn type_names(&self) -> Vec<&'static str> {
        self.tables.read().types.keys().map(|k| k.type_name()).collect()
    }

    /// All binding names, for suggestions.
    pub fn names(&self) -> Vec<String> {
        self.tables.read().names.keys().cloned().collect()
    }

    /// Number of type and name bindings.
    pub fn len(&self) -> usize {
        let tables = self.tables.read();
        tables.types.len() + tables.names.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("Registry")
            .field("types", &tables.types.len())
            .field("names", &tables.names.len())
            .field("factories", &tables.factories.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Database;
    struct Memory;

    trait Store: Send + Sync {}
    impl Store for Database {}
    impl Store for Memory {}

    fn binding<T: Send + Sync + 'static>(make: fn() -> T) -> Arc<Binding> {
        Arc::new(Binding::new(
            DependencyKey::of::<T>(),
            ProviderKind::Custom,
            Arc::new(move |_: &mut ResolutionContext<'_>| {
                Ok(Instance::new(Arc::new(make())))
            }),
        ))
    }

    fn store_cast<T: Store + Send + Sync + 'static>() -> CastFn {
        Arc::new(|instance: &Instance| {
            instance
                .downcast_ref::<T>()
                .map(|arc| Instance::new(arc.clone() as Arc<dyn Store>))
        })
    }

    #[test]
    fn register_and_lookup_type() {
        let reg = Registry::new();
        reg.register_type(binding(|| Database)).unwrap();
        assert!(reg.lookup_type(&DependencyKey::of::<Database>()).is_some());
        assert!(reg.lookup_type(&DependencyKey::of::<Memory>()).is_none());
    }

    #[test]
    fn duplicate_type_fails() {
        let reg = Registry::new();
        reg.register_type(binding(|| Database)).unwrap();
        let err = reg.register_type(binding(|| Database)).unwrap_err();
        assert!(matches!(err, MasnaError::AlreadyRegistered(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn duplicate_name_fails() {
        let reg = Registry::new();
        reg.register_name("db", binding(|| Database)).unwrap();
        let err = reg.register_name(" db ", binding(|| Memory)).unwrap_err();
        match err {
            MasnaError::AlreadyRegistered(e) => {
                assert_eq!(e.binding, BindingRef::Name("db".into()));
            }
            other => panic!("Expected AlreadyRegistered, got: {other:?}"),
        }
    }

    #[test]
    fn blank_name_fails() {
        let reg = Registry::new();
        let err = reg.register_name("  ", binding(|| Database)).unwrap_err();
        assert!(matches!(err, MasnaError::InvalidDeclaration { .. }));
    }

    #[test]
    fn named_binding_label() {
        let reg = Registry::new();
        let db = binding(|| Database);
        reg.register_name("primary", db.clone()).unwrap();
        assert_eq!(db.label(), "\"primary\" (Database)");
        assert_eq!(reg.lookup_name("primary").unwrap().id(), db.id());
    }

    #[test]
    fn interface_implementations_scan() {
        let reg = Registry::new();
        let db = binding(|| Database);
        db.add_cast(DependencyKey::of::<dyn Store>(), store_cast::<Database>());
        reg.register_type(db).unwrap();

        let key = DependencyKey::of::<dyn Store>();
        assert_eq!(reg.lookup_interface_implementations(&key).len(), 1);

        let mem = binding(|| Memory);
        mem.add_cast(key, store_cast::<Memory>());
        reg.register_type(mem).unwrap();
        let found = reg.lookup_interface_implementations(&key);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].label(), "Database");
    }

    #[test]
    fn cast_to_interface() {
        let db = binding(|| Database);
        let key = DependencyKey::of::<dyn Store>();
        db.add_cast(key, store_cast::<Database>());

        let instance = Instance::new(Arc::new(Database));
        let cast = db.cast(instance, &key).unwrap();
        assert!(cast.downcast::<dyn Store>().is_ok());

        let err = db
            .cast(Instance::new(Arc::new(Database)), &DependencyKey::of::<Memory>())
            .unwrap_err();
        assert!(matches!(err, MasnaError::TypeMismatch { .. }));
    }
}
