//! Per-call-chain resolution state.
//!
//! A [`ResolutionContext`] is created at every public entry point and
//! threaded by `&mut` through getters, construction and wiring. It carries:
//! - the remaining timeout budget,
//! - the bindings currently being resolved,
//! - the types currently being constructed,
//! - a trace of the last resolution step.
//!
//! Entries are pushed through [`Frame`] guards and popped when the guard
//! drops, including on early return and unwinding. Pushing an entry that is
//! already in flight is a cycle and fails immediately.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use masna_support::rendering::suggest_similar;
use tracing::{trace, warn};

use crate::component::Component;
use crate::construct::{self, ConstructOptions};
use crate::container::Container;
use crate::error::{
    AmbiguousBindingError, BindingRef, CircularReferenceError, CycleStage, MasnaError,
    NotRegisteredError, Result,
};
use crate::key::DependencyKey;
use crate::registry::Binding;
use crate::slot::Instance;

/// State of one resolution call chain.
pub struct ResolutionContext<'a> {
    container: &'a Container,
    budget: Option<Duration>,
    interval: Duration,
    resolving: Vec<(u64, String)>,
    constructing: Vec<DependencyKey>,
    step: String,
}

impl<'a> ResolutionContext<'a> {
    /// Starts a fresh chain with `timeout` as its budget. The budget is
    /// ignored when the container has timeout enforcement disabled.
    pub(crate) fn root(container: &'a Container, timeout: Duration) -> Self {
        let options = container.options();
        Self {
            container,
            budget: options.enable_timeout.then_some(timeout),
            interval: options.timeout_interval,
            resolving: Vec::new(),
            constructing: Vec::new(),
            step: String::from("start"),
        }
    }

    /// The container this chain resolves against.
    pub fn container(&self) -> &'a Container {
        self.container
    }

    /// Remaining budget, `None` when timeouts are not enforced.
    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    /// Description of the most recent resolution step.
    pub fn last_step(&self) -> &str {
        &self.step
    }

    /// Number of bindings currently being resolved in this chain.
    pub fn depth(&self) -> usize {
        self.resolving.len()
    }

    /// Label of the binding being resolved right now.
    pub(crate) fn current(&self) -> Option<&str> {
        self.resolving.last().map(|(_, label)| label.as_str())
    }

    pub(crate) fn record(&mut self, step: impl Into<String>) {
        self.step = step.into();
        trace!(step = %self.step, depth = self.resolving.len(), "Resolution step");
    }

    /// Marks `binding` as in flight until the returned frame drops.
    pub(crate) fn enter_binding<'c>(&'c mut self, binding: &Binding) -> Result<Frame<'c, 'a>> {
        let label = binding.label();

        if self.resolving.iter().any(|(id, _)| *id == binding.id()) {
            let mut chain: Vec<String> = self.resolving.iter().map(|(_, l)| l.clone()).collect();
            chain.push(label.clone());
            let last = self.resolving.last().map(|(_, l)| l.clone()).unwrap_or_default();

            warn!(binding = %label, chain = ?chain, "Circular reference detected");
            return Err(MasnaError::CircularReference(CircularReferenceError {
                stage: CycleStage::Resolution,
                requested: label,
                last,
                chain,
            }));
        }

        self.resolving.push((binding.id(), label));
        Ok(Frame {
            ctx: self,
            undo: Undo::Binding,
        })
    }

    /// Marks type `key` as under construction until the returned frame drops.
    pub(crate) fn enter_construction<'c>(
        &'c mut self,
        key: DependencyKey,
    ) -> Result<Frame<'c, 'a>> {
        if self.constructing.contains(&key) {
            let mut chain: Vec<String> = self.constructing.iter().map(|k| k.short_name()).collect();
            chain.push(key.short_name());
            let last = self
                .constructing
                .last()
                .map(|k| k.short_name())
                .unwrap_or_default();

            warn!(key = %key, chain = ?chain, "Circular construction detected");
            return Err(MasnaError::CircularReference(CircularReferenceError {
                stage: CycleStage::Construction,
                requested: key.short_name(),
                last,
                chain,
            }));
        }

        self.constructing.push(key);
        Ok(Frame {
            ctx: self,
            undo: Undo::Construction,
        })
    }

    /// Consumes one level of budget for a nested lazy initialization.
    ///
    /// # Errors
    /// [`MasnaError::BudgetExhausted`] if no positive remainder is left.
    pub(crate) fn descend<'c>(&'c mut self, label: &str) -> Result<Frame<'c, 'a>> {
        let saved = self.budget;

        if let Some(remaining) = saved {
            match remaining.checked_sub(self.interval) {
                Some(next) if !next.is_zero() => self.budget = Some(next),
                _ => {
                    warn!(binding = label, ?remaining, interval = ?self.interval, "Timeout budget exhausted");
                    return Err(MasnaError::BudgetExhausted {
                        binding: label.to_string(),
                        remaining,
                        interval: self.interval,
                    });
                }
            }
        }

        Ok(Frame {
            ctx: self,
            undo: Undo::Budget(saved),
        })
    }

    /// Resolves the default binding for `key`, falling back to the single
    /// type binding that can be cast to it.
    pub fn resolve_type(&mut self, key: DependencyKey) -> Result<Instance> {
        self.record(format!("resolve type {}", key.short_name()));
        let registry = self.container.registry();

        if let Some(binding) = registry.lookup_type(&key) {
            return self.invoke(&binding, &key);
        }

        let mut candidates = registry.lookup_interface_implementations(&key);
        match candidates.len() {
            0 => {
                let available = registry.type_names();
                Err(MasnaError::NotRegistered(NotRegisteredError {
                    requested: BindingRef::Type(key),
                    suggestions: suggest_similar(key.type_name(), &available, 3),
                }))
            }
            1 => {
                let binding = candidates.remove(0);
                self.invoke(&binding, &key)
            }
            _ => {
                let candidates: Vec<String> = candidates.iter().map(|b| b.label()).collect();
                warn!(key = %key, candidates = ?candidates, "Ambiguous interface request");
                Err(MasnaError::Ambiguous(AmbiguousBindingError {
                    requested: key,
                    candidates,
                }))
            }
        }
    }

    /// Resolves the binding named `name`. With a `target`, the binding must
    /// be assignable to it and the instance is cast accordingly.
    pub fn resolve_name(&mut self, name: &str, target: Option<DependencyKey>) -> Result<Instance> {
        self.record(format!("resolve name {name:?}"));
        let binding = self.named_binding(name)?;

        match target {
            Some(target) if !binding.provides(&target) => Err(MasnaError::TypeMismatch {
                binding: binding.label(),
                expected: target.type_name().into(),
                found: binding.key().type_name().into(),
            }),
            Some(target) => self.invoke(&binding, &target),
            None => {
                let key = binding.key();
                self.invoke(&binding, &key)
            }
        }
    }

    /// Resolves `name` when such a binding exists and is assignable to
    /// `target`; otherwise resolves `target` by type.
    pub fn resolve_name_or_type(&mut self, name: &str, target: DependencyKey) -> Result<Instance> {
        match self.container.registry().lookup_name(name) {
            Some(binding) if binding.provides(&target) => {
                self.record(format!("resolve name {name:?}"));
                self.invoke(&binding, &target)
            }
            _ => self.resolve_type(target),
        }
    }

    pub(crate) fn named_binding(&self, name: &str) -> Result<Arc<Binding>> {
        let registry = self.container.registry();
        registry.lookup_name(name).ok_or_else(|| {
            let names = registry.names();
            let available: Vec<&str> = names.iter().map(String::as_str).collect();
            MasnaError::NotRegistered(NotRegisteredError {
                requested: BindingRef::Name(name.to_string()),
                suggestions: suggest_similar(name, &available, 3),
            })
        })
    }

    /// Runs a binding's getter under the resolution guard and casts the
    /// result to `target`.
    pub(crate) fn invoke(&mut self, binding: &Binding, target: &DependencyKey) -> Result<Instance> {
        let getter = binding.getter();
        let instance = {
            let mut frame = self.enter_binding(binding)?;
            getter(&mut *frame)?
        };
        binding.cast(instance, target)
    }

    /// Finds `T` by type within this chain.
    pub fn find<T: ?Sized + Send + Sync + 'static>(&mut self) -> Result<Arc<T>> {
        let key = DependencyKey::of::<T>();
        let instance = self.resolve_type(key)?;
        downcast_instance(instance, &key.short_name())
    }

    /// Finds the binding named `name` as `T` within this chain.
    pub fn find_by_name<T: ?Sized + Send + Sync + 'static>(&mut self, name: &str) -> Result<Arc<T>> {
        let instance = self.resolve_name(name, Some(DependencyKey::of::<T>()))?;
        downcast_instance(instance, name)
    }

    /// Constructs a fresh, uncached `T` within this chain.
    pub fn construct<T: Component>(&mut self) -> Result<Arc<T>> {
        self.construct_with(&ConstructOptions::default())
    }

    /// Constructs a fresh `T` with explicit options within this chain.
    pub fn construct_with<T: Component>(&mut self, options: &ConstructOptions) -> Result<Arc<T>> {
        construct::new_with_option::<T>(self, options)
    }
}

pub(crate) fn downcast_instance<T: ?Sized + Send + Sync + 'static>(
    instance: Instance,
    binding: &str,
) -> Result<Arc<T>> {
    instance
        .downcast::<T>()
        .map_err(|instance| MasnaError::TypeMismatch {
            binding: binding.to_string(),
            expected: std::any::type_name::<Arc<T>>().into(),
            found: instance.type_name().into(),
        })
}

enum Undo {
    Binding,
    Construction,
    Budget(Option<Duration>),
}

/// Scoped entry in a [`ResolutionContext`]; undone on drop.
///
/// Derefs to the context so the chain can continue while the entry is held.
pub struct Frame<'c, 'a> {
    ctx: &'c mut ResolutionContext<'a>,
    undo: Undo,
}

impl<'a> Deref for Frame<'_, 'a> {
    type Target = ResolutionContext<'a>;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl DerefMut for Frame<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl Drop for Frame<'_, '_> {
    fn drop(&mut self) {
        match self.undo {
            Undo::Binding => {
                self.ctx.resolving.pop();
            }
            Undo::Construction => {
                self.ctx.constructing.pop();
            }
            Undo::Budget(saved) => self.ctx.budget = saved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use crate::registry::ProviderKind;

    struct A;
    struct B;

    fn binding<T: Send + Sync + 'static>() -> Binding {
        Binding::new(
            DependencyKey::of::<T>(),
            ProviderKind::Custom,
            Arc::new(|_: &mut ResolutionContext<'_>| Err(MasnaError::invalid("test", "unused"))),
        )
    }

    fn timed(timeout_ms: u64, interval_ms: u64) -> Container {
        Container::with_options(Options {
            enable_timeout: true,
            timeout: Duration::from_millis(timeout_ms),
            timeout_interval: Duration::from_millis(interval_ms),
        })
    }

    #[test]
    fn binding_reentry_is_a_cycle() {
        let container = Container::new();
        let mut ctx = ResolutionContext::root(&container, Duration::from_secs(1));
        let a = binding::<A>();
        let b = binding::<B>();

        let mut first = ctx.enter_binding(&a).unwrap();
        let mut second = first.enter_binding(&b).unwrap();
        let err = second.enter_binding(&a).err().unwrap();

        match err {
            MasnaError::CircularReference(e) => {
                assert_eq!(e.stage, CycleStage::Resolution);
                assert_eq!(e.requested, "A");
                assert_eq!(e.last, "B");
                assert_eq!(e.chain, vec!["A", "B", "A"]);
            }
            other => panic!("Expected CircularReference, got: {other:?}"),
        }
    }

    #[test]
    fn frames_pop_on_drop() {
        let container = Container::new();
        let mut ctx = ResolutionContext::root(&container, Duration::from_secs(1));
        let a = binding::<A>();

        {
            let frame = ctx.enter_binding(&a).unwrap();
            assert_eq!(frame.depth(), 1);
        }
        assert_eq!(ctx.depth(), 0);

        // a sibling resolution of the same binding is not a cycle
        assert!(ctx.enter_binding(&a).is_ok());
    }

    #[test]
    fn construction_reentry_is_a_cycle() {
        let container = Container::new();
        let mut ctx = ResolutionContext::root(&container, Duration::from_secs(1));

        let mut outer = ctx.enter_construction(DependencyKey::of::<A>()).unwrap();
        let err = outer
            .enter_construction(DependencyKey::of::<A>())
            .err()
            .unwrap();
        match err {
            MasnaError::CircularReference(e) => assert_eq!(e.stage, CycleStage::Construction),
            other => panic!("Expected CircularReference, got: {other:?}"),
        }
    }

    #[test]
    fn budget_disabled_by_default() {
        let container = Container::new();
        let mut ctx = ResolutionContext::root(&container, Duration::from_millis(1));
        assert_eq!(ctx.budget(), None);

        let frame = ctx.descend("A").unwrap();
        assert_eq!(frame.budget(), None);
    }

    #[test]
    fn budget_shrinks_and_restores() {
        let container = timed(300, 100);
        let mut ctx = ResolutionContext::root(&container, Duration::from_millis(300));

        {
            let mut one = ctx.descend("A").unwrap();
            assert_eq!(one.budget(), Some(Duration::from_millis(200)));
            let two = one.descend("B").unwrap();
            assert_eq!(two.budget(), Some(Duration::from_millis(100)));
        }
        assert_eq!(ctx.budget(), Some(Duration::from_millis(300)));
    }

    #[test]
    fn budget_needs_positive_remainder() {
        let container = timed(200, 100);
        let mut ctx = ResolutionContext::root(&container, Duration::from_millis(200));

        let mut one = ctx.descend("A").unwrap();
        let err = one.descend("B").err().unwrap();
        assert!(matches!(err, MasnaError::BudgetExhausted { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn unknown_type_suggests_nothing_when_empty() {
        let container = Container::new();
        let mut ctx = ResolutionContext::root(&container, Duration::from_secs(1));
        match ctx.resolve_type(DependencyKey::of::<A>()) {
            Err(MasnaError::NotRegistered(e)) => {
                assert_eq!(e.requested, BindingRef::Type(DependencyKey::of::<A>()));
                assert!(e.suggestions.is_empty());
            }
            other => panic!("Expected NotRegistered, got: {other:?}"),
        }
        assert_eq!(ctx.last_step(), "resolve type A");
    }
}
