//! Factories: functions that build a value for `#[masna(new)]` fields.
//!
//! A factory is registered per target type, either as a free function
//! `Fn(A1, .., An) -> Arc<I>` or as a method `Fn(&O, A1, .., An) -> Arc<I>`
//! bound to a receiver. Each parameter is resolved through a directive, or
//! by type when no directives are given. Factories may also return
//! `Result<Arc<I>, E>`.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::context::ResolutionContext;
use crate::directive::{Directive, Site};
use crate::error::{MasnaError, Result};
use crate::key::DependencyKey;
use crate::slot::{Instance, Slot, SlotInfo, SlotKind, Wired};
use crate::wire::{self, SelfRef};

/// How a factory is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryKind {
    Function,
    /// A method on a shared receiver.
    Method { receiver: &'static str },
}

impl fmt::Display for FactoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactoryKind::Function => write!(f, "factory function"),
            FactoryKind::Method { receiver } => write!(f, "factory method on {receiver}"),
        }
    }
}

/// Values a factory may return for target `I`.
pub trait FactoryOutput<I: ?Sized> {
    fn into_handle(self) -> Result<Arc<I>>;
}

impl<I: ?Sized + 'static> FactoryOutput<I> for Arc<I> {
    fn into_handle(self) -> Result<Arc<I>> {
        Ok(self)
    }
}

impl<I, E> FactoryOutput<I> for std::result::Result<Arc<I>, E>
where
    I: ?Sized + 'static,
    E: Into<Box<dyn Error + Send + Sync>>,
{
    fn into_handle(self) -> Result<Arc<I>> {
        self.map_err(|err| MasnaError::construction::<I>(err))
    }
}

/// A free function usable as a factory for `I`.
pub trait FactoryFn<Args, I: ?Sized>: Send + Sync + 'static {
    fn slots() -> Vec<SlotInfo>;
    fn call(&self, args: Vec<Wired>) -> Result<Arc<I>>;
}

/// A method of `O` usable as a factory for `I`.
pub trait FactoryMethod<O: ?Sized, Args, I: ?Sized>: Send + Sync + 'static {
    fn slots() -> Vec<SlotInfo>;
    fn call(&self, receiver: &O, args: Vec<Wired>) -> Result<Arc<I>>;
}

fn arity_error(expected: usize, supplied: usize) -> MasnaError {
    MasnaError::invalid(
        "factory call",
        format!("expected {expected} arguments, {supplied} supplied"),
    )
}

macro_rules! factory_fns {
    ($($arg:ident),*) => {
        impl<Func, Out, I, $($arg,)*> FactoryFn<($($arg,)*), I> for Func
        where
            Func: Fn($($arg),*) -> Out + Send + Sync + 'static,
            Out: FactoryOutput<I>,
            I: ?Sized,
            $($arg: Slot,)*
        {
            fn slots() -> Vec<SlotInfo> {
                vec![$(SlotInfo::of::<$arg>()),*]
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(&self, args: Vec<Wired>) -> Result<Arc<I>> {
                let expected = <Self as FactoryFn<($($arg,)*), I>>::slots().len();
                let supplied = args.len();
                let mut args = args.into_iter();
                $(
                    let $arg = match args.next() {
                        Some(wired) => <$arg as Slot>::from_wired(wired)?,
                        None => return Err(arity_error(expected, supplied)),
                    };
                )*
                (self)($($arg),*).into_handle()
            }
        }

        impl<Func, O, Out, I, $($arg,)*> FactoryMethod<O, ($($arg,)*), I> for Func
        where
            Func: Fn(&O, $($arg),*) -> Out + Send + Sync + 'static,
            O: ?Sized,
            Out: FactoryOutput<I>,
            I: ?Sized,
            $($arg: Slot,)*
        {
            fn slots() -> Vec<SlotInfo> {
                vec![$(SlotInfo::of::<$arg>()),*]
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call(&self, receiver: &O, args: Vec<Wired>) -> Result<Arc<I>> {
                let expected = <Self as FactoryMethod<O, ($($arg,)*), I>>::slots().len();
                let supplied = args.len();
                let mut args = args.into_iter();
                $(
                    let $arg = match args.next() {
                        Some(wired) => <$arg as Slot>::from_wired(wired)?,
                        None => return Err(arity_error(expected, supplied)),
                    };
                )*
                (self)(receiver, $($arg),*).into_handle()
            }
        }
    };
}

factory_fns!();
factory_fns!(A1);
factory_fns!(A1, A2);
factory_fns!(A1, A2, A3);
factory_fns!(A1, A2, A3, A4);
factory_fns!(A1, A2, A3, A4, A5);
factory_fns!(A1, A2, A3, A4, A5, A6);

type CallFn = Box<dyn Fn(Vec<Wired>) -> Result<Instance> + Send + Sync>;

/// A registered factory for one target type.
pub struct Factory {
    target: DependencyKey,
    kind: FactoryKind,
    params: Vec<String>,
    slots: Vec<SlotInfo>,
    call: CallFn,
}

impl Factory {
    /// Wraps a free function building `I`.
    ///
    /// # Errors
    /// [`MasnaError::InvalidDeclaration`] if `params` does not fit the
    /// function's arguments.
    pub fn function<I, Args, F>(factory: F, params: &[&str]) -> Result<Self>
    where
        I: ?Sized + Send + Sync + 'static,
        F: FactoryFn<Args, I>,
    {
        Self::checked(
            DependencyKey::of::<I>(),
            FactoryKind::Function,
            params,
            F::slots(),
            Box::new(move |args| factory.call(args).map(Instance::new)),
        )
    }

    /// Wraps a method of `receiver` building `I`.
    pub fn method<I, O, Args, F>(receiver: Arc<O>, method: F, params: &[&str]) -> Result<Self>
    where
        I: ?Sized + Send + Sync + 'static,
        O: ?Sized + Send + Sync + 'static,
        F: FactoryMethod<O, Args, I>,
    {
        Self::checked(
            DependencyKey::of::<I>(),
            FactoryKind::Method {
                receiver: std::any::type_name::<O>(),
            },
            params,
            F::slots(),
            Box::new(move |args| method.call(&receiver, args).map(Instance::new)),
        )
    }

    fn checked(
        target: DependencyKey,
        kind: FactoryKind,
        params: &[&str],
        slots: Vec<SlotInfo>,
        call: CallFn,
    ) -> Result<Self> {
        let subject = format!("{kind} for {}", target.short_name());

        if params.is_empty() {
            if let Some(slot) = slots.iter().find(|s| s.kind == SlotKind::Primitive) {
                return Err(MasnaError::invalid(
                    subject,
                    format!("argument {} needs an explicit parameter", slot.type_name),
                ));
            }
        } else if params.len() != slots.len() {
            return Err(MasnaError::invalid(
                subject,
                format!(
                    "{} parameters declared for {} arguments",
                    params.len(),
                    slots.len()
                ),
            ));
        }

        for param in params {
            Directive::parse(param, Site::Param)?;
        }

        Ok(Self {
            target,
            kind,
            params: params.iter().map(|p| p.trim().to_string()).collect(),
            slots,
            call,
        })
    }

    pub fn target(&self) -> DependencyKey {
        self.target
    }

    pub fn kind(&self) -> FactoryKind {
        self.kind
    }

    /// Default parameter directives.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    /// Calls the factory. `overrides` replace the default parameters only
    /// when there is exactly one per argument.
    pub(crate) fn invoke(
        &self,
        ctx: &mut ResolutionContext<'_>,
        overrides: &[String],
        self_ref: SelfRef<'_>,
    ) -> Result<Instance> {
        let subject = format!("{} for {}", self.kind, self.target.short_name());
        let params = if overrides.is_empty() {
            &self.params
        } else if overrides.len() == self.slots.len() {
            overrides
        } else {
            warn!(
                factory = %subject,
                given = overrides.len(),
                arity = self.slots.len(),
                "Parameter override does not match the factory arity; using the defaults"
            );
            &self.params
        };
        let args = wire::resolve_params(ctx, &subject, &self.slots, params, self_ref)?;
        (self.call)(args)
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("target", &self.target)
            .field("kind", &self.kind)
            .field("params", &self.params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::container::Container;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct Fixed(String);

    impl Greeter for Fixed {
        fn greet(&self) -> String {
            self.0.clone()
        }
    }

    struct Prefix(&'static str);

    impl Prefix {
        fn build(&self, name: String) -> Arc<dyn Greeter> {
            Arc::new(Fixed(format!("{}{name}", self.0)))
        }
    }

    fn greeter(name: String, times: u8) -> Arc<dyn Greeter> {
        Arc::new(Fixed(name.repeat(times as usize)))
    }

    #[test]
    fn function_factory_with_params() {
        let factory = Factory::function::<dyn Greeter, _, _>(greeter, &["ab", "2"]).unwrap();
        assert_eq!(factory.arity(), 2);
        assert_eq!(factory.kind(), FactoryKind::Function);

        let container = Container::new();
        let mut ctx = ResolutionContext::root(&container, Duration::from_secs(1));
        let made = factory.invoke(&mut ctx, &[], None).unwrap();
        assert_eq!(made.downcast::<dyn Greeter>().unwrap().greet(), "abab");

        let overridden = factory
            .invoke(&mut ctx, &["x".into(), "3".into()], None)
            .unwrap();
        assert_eq!(overridden.downcast::<dyn Greeter>().unwrap().greet(), "xxx");

        // wrong count falls back to the defaults
        let fallback = factory.invoke(&mut ctx, &["x".into()], None).unwrap();
        assert_eq!(fallback.downcast::<dyn Greeter>().unwrap().greet(), "abab");
    }

    #[test]
    fn method_factory() {
        let factory = Factory::method::<dyn Greeter, _, _, _>(
            Arc::new(Prefix("hi ")),
            Prefix::build,
            &["bob"],
        )
        .unwrap();
        assert!(matches!(factory.kind(), FactoryKind::Method { .. }));

        let container = Container::new();
        let mut ctx = ResolutionContext::root(&container, Duration::from_secs(1));
        let made = factory.invoke(&mut ctx, &[], None).unwrap();
        assert_eq!(made.downcast::<dyn Greeter>().unwrap().greet(), "hi bob");
    }

    #[test]
    fn primitive_arguments_need_params() {
        let err = Factory::function::<dyn Greeter, _, _>(greeter, &[]).unwrap_err();
        assert!(matches!(err, MasnaError::InvalidDeclaration { .. }));
    }

    #[test]
    fn param_count_is_checked() {
        let err = Factory::function::<dyn Greeter, _, _>(greeter, &["a"]).unwrap_err();
        assert!(format!("{err}").contains("1 parameters declared for 2 arguments"));
    }

    #[test]
    fn fallible_factory_error_is_wrapped() {
        fn failing() -> std::result::Result<Arc<dyn Greeter>, String> {
            Err("no greeting".to_string())
        }

        let factory = Factory::function::<dyn Greeter, _, _>(failing, &[]).unwrap();
        let container = Container::new();
        let mut ctx = ResolutionContext::root(&container, Duration::from_secs(1));
        let err = factory.invoke(&mut ctx, &[], None).unwrap_err();
        assert!(matches!(err, MasnaError::ConstructionFailed { .. }));
    }
}
