//! Components and their reflective descriptors.
//!
//! A [`Component`] is a `Default`-constructible struct the container can
//! build. Its [`Descriptor`] lists the injectable fields with their tags and
//! the methods that may serve as init methods. Descriptors are normally
//! generated by `#[derive(Component)]` and built once per type.
//!
//! ```
//! use std::sync::Arc;
//! use masna_container::component::{Component, Descriptor};
//!
//! #[derive(Default)]
//! struct Repo;
//! impl Component for Repo {}
//!
//! #[derive(Default)]
//! struct Service {
//!     repo: Option<Arc<Repo>>,
//!     port: u16,
//! }
//!
//! impl Component for Service {
//!     fn describe(d: &mut Descriptor<Self>) {
//!         d.field("repo", |s| &mut s.repo).wire("auto");
//!         d.field("port", |s| &mut s.port).value("8080");
//!     }
//! }
//!
//! assert_eq!(Descriptor::<Service>::get().fields().len(), 2);
//! ```

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use anymap2::SendSyncAnyMap;
use evalexpr::Value;
use masna_support::rendering::{shorten_type_name, to_snake_case};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::trace;

use crate::directive::Tag;
use crate::error::{MasnaError, Result};
use crate::slot::{Slot, SlotInfo, Wired};

/// A struct the container can construct and wire.
pub trait Component: Default + Send + Sync + Sized + 'static {
    /// Declares injectable fields and init methods.
    fn describe(descriptor: &mut Descriptor<Self>) {
        let _ = descriptor;
    }

    /// Reads a property for `${name.path}` expressions.
    fn property(&self, path: &str) -> Option<Value> {
        let _ = path;
        None
    }
}

/// Object-safe view of [`Component::property`].
pub trait Properties: Send + Sync {
    fn property(&self, path: &str) -> Option<Value>;
}

impl<T: Component> Properties for T {
    fn property(&self, path: &str) -> Option<Value> {
        Component::property(self, path)
    }
}

type IsEmptyFn<T> = Box<dyn Fn(&mut T) -> bool + Send + Sync>;
type AssignFn<T> = Box<dyn Fn(&mut T, Wired) -> Result<()> + Send + Sync>;
type InvokeFn<T> = Box<dyn Fn(&mut T, Vec<Wired>) -> Result<()> + Send + Sync>;

/// An injectable field of `T`.
pub struct FieldSpec<T> {
    path: String,
    tags: Vec<Tag>,
    slot: SlotInfo,
    is_empty: IsEmptyFn<T>,
    assign: AssignFn<T>,
}

impl<T> FieldSpec<T> {
    /// Field name, dotted for fields of embedded components.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last segment of the path, the name used by bare `auto`/`name`.
    pub fn name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn slot(&self) -> SlotInfo {
        self.slot
    }

    pub(crate) fn is_empty(&self, target: &mut T) -> bool {
        (self.is_empty)(target)
    }

    pub(crate) fn assign(&self, target: &mut T, wired: Wired) -> Result<()> {
        (self.assign)(target, wired)
    }
}

impl<T> fmt::Debug for FieldSpec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("path", &self.path)
            .field("tags", &self.tags)
            .field("slot", &self.slot.type_name)
            .finish()
    }
}

/// A method of `T` usable as an init method.
pub struct MethodSpec<T> {
    name: String,
    params: Vec<SlotInfo>,
    returns: usize,
    invoke: InvokeFn<T>,
}

impl<T> MethodSpec<T> {
    /// Method name in snake_case.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[SlotInfo] {
        &self.params
    }

    /// Number of returned values; init methods must return none.
    pub fn returns(&self) -> usize {
        self.returns
    }

    pub(crate) fn invoke(&self, target: &mut T, args: Vec<Wired>) -> Result<()> {
        (self.invoke)(target, args)
    }
}

impl<T> fmt::Debug for MethodSpec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodSpec")
            .field("name", &self.name)
            .field("params", &self.params.len())
            .field("returns", &self.returns)
            .finish()
    }
}

/// A function usable as a method of `T`: `Fn(&mut T, A1, .., An) -> R`
/// with every `Ai` a [`Slot`].
pub trait InitFn<T, Args>: Send + Sync + 'static {
    fn params() -> Vec<SlotInfo>;
    fn returns() -> usize;
    fn call(&self, target: &mut T, args: Vec<Wired>) -> Result<()>;
}

fn missing_arguments(expected: usize, supplied: usize) -> MasnaError {
    MasnaError::invalid(
        "method call",
        format!("expected {expected} arguments, {supplied} supplied"),
    )
}

macro_rules! init_fn {
    ($($arg:ident),*) => {
        impl<T, R, Func, $($arg,)*> InitFn<T, ($($arg,)*)> for Func
        where
            Func: Fn(&mut T, $($arg),*) -> R + Send + Sync + 'static,
            R: 'static,
            $($arg: Slot,)*
        {
            fn params() -> Vec<SlotInfo> {
                vec![$(SlotInfo::of::<$arg>()),*]
            }

            fn returns() -> usize {
                usize::from(TypeId::of::<R>() != TypeId::of::<()>())
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(&self, target: &mut T, args: Vec<Wired>) -> Result<()> {
                let expected = <Self as InitFn<T, ($($arg,)*)>>::params().len();
                let supplied = args.len();
                let mut args = args.into_iter();
                $(
                    let $arg = match args.next() {
                        Some(wired) => <$arg as Slot>::from_wired(wired)?,
                        None => return Err(missing_arguments(expected, supplied)),
                    };
                )*
                let _ = (self)(target, $($arg),*);
                Ok(())
            }
        }
    };
}

init_fn!();
init_fn!(A1);
init_fn!(A1, A2);
init_fn!(A1, A2, A3);
init_fn!(A1, A2, A3, A4);
init_fn!(A1, A2, A3, A4, A5);
init_fn!(A1, A2, A3, A4, A5, A6);

/// Reflective description of a component type.
pub struct Descriptor<T> {
    type_name: &'static str,
    fields: Vec<FieldSpec<T>>,
    methods: Vec<MethodSpec<T>>,
}

static DESCRIPTORS: Lazy<RwLock<SendSyncAnyMap>> =
    Lazy::new(|| RwLock::new(SendSyncAnyMap::new()));

impl<T: Component> Descriptor<T> {
    /// Returns the cached descriptor of `T`, describing it on first use.
    pub fn get() -> Arc<Self> {
        if let Some(found) = DESCRIPTORS.read().get::<Arc<Self>>() {
            return found.clone();
        }

        // described outside the lock; embedded components recurse into get()
        let mut descriptor = Self::empty();
        T::describe(&mut descriptor);
        trace!(
            component = %descriptor.short_name(),
            fields = descriptor.fields.len(),
            methods = descriptor.methods.len(),
            "Described component"
        );

        DESCRIPTORS
            .write()
            .entry::<Arc<Self>>()
            .or_insert_with(|| Arc::new(descriptor))
            .clone()
    }

    /// Declares an injectable field reached through `access`.
    pub fn field<F: Slot>(
        &mut self,
        name: &str,
        access: fn(&mut T) -> &mut F,
    ) -> FieldBuilder<'_, T, F> {
        self.fields.push(FieldSpec {
            path: name.to_string(),
            tags: Vec::new(),
            slot: SlotInfo::of::<F>(),
            is_empty: Box::new(move |target| access(target).is_empty()),
            assign: Box::new(move |target, wired| {
                *access(target) = F::from_wired(wired)?;
                Ok(())
            }),
        });
        let index = self.fields.len() - 1;
        FieldBuilder {
            spec: &mut self.fields[index],
            _slot: PhantomData,
        }
    }

    /// Flattens the fields and methods of an embedded component into `T`.
    ///
    /// Embedded fields are wired as part of `T` under `name.field`;
    /// embedded methods are visible unless `T` declares one with the same name.
    pub fn embed<C: Component>(&mut self, name: &str, access: fn(&mut T) -> &mut C) {
        let inner = Descriptor::<C>::get();

        for index in 0..inner.fields.len() {
            let spec = &inner.fields[index];
            let (empty_src, assign_src) = (inner.clone(), inner.clone());
            self.fields.push(FieldSpec {
                path: format!("{name}.{}", spec.path),
                tags: spec.tags.clone(),
                slot: spec.slot,
                is_empty: Box::new(move |target| empty_src.fields[index].is_empty(access(target))),
                assign: Box::new(move |target, wired| {
                    assign_src.fields[index].assign(access(target), wired)
                }),
            });
        }

        for index in 0..inner.methods.len() {
            let spec = &inner.methods[index];
            if self.method_named(&spec.name).is_some() {
                continue;
            }
            let source = inner.clone();
            self.methods.push(MethodSpec {
                name: spec.name.clone(),
                params: spec.params.clone(),
                returns: spec.returns,
                invoke: Box::new(move |target, args| {
                    source.methods[index].invoke(access(target), args)
                }),
            });
        }
    }

    /// Declares a method usable as an init method. The name is matched
    /// in snake_case, so `"Init"` and `"init"` are the same method.
    pub fn method<Args, M: InitFn<T, Args>>(&mut self, name: &str, method: M) {
        let name = to_snake_case(name);
        self.methods.retain(|m| m.name != name);
        self.methods.push(MethodSpec {
            name,
            params: M::params(),
            returns: M::returns(),
            invoke: Box::new(move |target, args| method.call(target, args)),
        });
    }
}

impl<T> Descriptor<T> {
    fn empty() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn short_name(&self) -> String {
        shorten_type_name(self.type_name)
    }

    pub fn fields(&self) -> &[FieldSpec<T>] {
        &self.fields
    }

    pub fn methods(&self) -> &[MethodSpec<T>] {
        &self.methods
    }

    /// Finds a method by name, case-insensitively through snake_case.
    pub fn method_named(&self, name: &str) -> Option<&MethodSpec<T>> {
        let name = to_snake_case(name);
        self.methods.iter().find(|m| m.name == name)
    }
}

impl<T> fmt::Debug for Descriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("type", &self.type_name)
            .field("fields", &self.fields)
            .field("methods", &self.methods)
            .finish()
    }
}

/// Adds tags to a field declared with [`Descriptor::field`].
pub struct FieldBuilder<'d, T, F> {
    spec: &'d mut FieldSpec<T>,
    _slot: PhantomData<fn(F)>,
}

impl<T: 'static, F: Slot> FieldBuilder<'_, T, F> {
    /// Adds a wire directive.
    pub fn wire(self, directive: &str) -> Self {
        self.spec.tags.push(Tag::Wire(directive.to_string()));
        self
    }

    /// Adds a literal or `${expr}` value.
    pub fn value(self, value: &str) -> Self {
        self.spec.tags.push(Tag::Value(value.to_string()));
        self
    }

    /// Builds the field through the factory registered for its type,
    /// with comma-separated parameter directives.
    pub fn new_params(self, params: &str) -> Self {
        self.spec.tags.push(Tag::New(params.to_string()));
        self
    }

    /// Assigns the field through a setter instead of direct assignment.
    pub fn setter(self, setter: impl Fn(&mut T, F) + Send + Sync + 'static) -> Self {
        self.spec.assign = Box::new(move |target, wired| {
            setter(target, F::from_wired(wired)?);
            Ok(())
        });
        self
    }
}
