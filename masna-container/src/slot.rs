//! Injectable field and parameter types.
//!
//! A [`Slot`] is anything the container can fill: handle fields
//! (`Option<Arc<T>>`, `Weak<T>`), handle parameters (`Arc<T>`) and
//! primitive values (`String`, numbers, `bool`, `char`).
//!
//! Resolved values travel as [`Wired`] until the slot converts them into
//! its own type.

use std::any::{Any, type_name};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use evalexpr::Value;

use crate::error::{MasnaError, Result};
use crate::key::DependencyKey;

/// A type-erased handle produced by a binding getter.
///
/// For a binding of type `T` the instance holds an `Arc<T>`; the `self`
/// directive produces an instance holding a `Weak<T>`.
pub struct Instance {
    value: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Instance {
    /// Wraps a shared handle.
    pub fn new<T: ?Sized + Send + Sync + 'static>(handle: Arc<T>) -> Self {
        Self {
            value: Box::new(handle),
            type_name: type_name::<Arc<T>>(),
        }
    }

    /// Wraps a weak self-reference.
    pub fn weak<T: Send + Sync + 'static>(handle: Weak<T>) -> Self {
        Self {
            value: Box::new(handle),
            type_name: type_name::<Weak<T>>(),
        }
    }

    /// Returns the name of the wrapped handle type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Borrows the handle as `Arc<T>` if that is what it holds.
    pub fn downcast_ref<T: ?Sized + 'static>(&self) -> Option<&Arc<T>> {
        self.value.downcast_ref::<Arc<T>>()
    }

    /// Takes the handle out as `Arc<T>`, or gives the instance back.
    pub fn downcast<T: ?Sized + 'static>(self) -> std::result::Result<Arc<T>, Self> {
        let type_name = self.type_name;
        match self.value.downcast::<Arc<T>>() {
            Ok(handle) => Ok(*handle),
            Err(value) => Err(Self { value, type_name }),
        }
    }

    fn downcast_weak<T: 'static>(self) -> std::result::Result<Weak<T>, Self> {
        let type_name = self.type_name;
        match self.value.downcast::<Weak<T>>() {
            Ok(handle) => Ok(*handle),
            Err(value) => Err(Self { value, type_name }),
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Instance").field(&self.type_name).finish()
    }
}

/// A resolved value on its way into a slot.
#[derive(Debug)]
pub enum Wired {
    /// A handle from a binding, a factory or the `self` directive.
    Handle(Instance),
    /// Literal tag text, converted with the slot's `FromStr`.
    Text(String),
    /// An expression result.
    Value(Value),
}

/// Whether a slot holds a reference to another object or a plain value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// `Option<Arc<T>>`, `Arc<T>` or `Weak<T>`: filled by
    /// `self`/`auto`/`type`/`name`/`new`.
    Reference,
    /// Strings, numbers, booleans: filled by `value`.
    Primitive,
}

/// Static description of a slot type.
#[derive(Debug, Clone, Copy)]
pub struct SlotInfo {
    pub kind: SlotKind,
    /// The type to resolve for reference slots.
    pub key: Option<DependencyKey>,
    pub type_name: &'static str,
}

impl SlotInfo {
    /// Describes slot type `S`.
    pub fn of<S: Slot>() -> Self {
        Self {
            kind: S::kind(),
            key: S::key(),
            type_name: type_name::<S>(),
        }
    }
}

/// A type the container knows how to fill.
pub trait Slot: Sized + Send + 'static {
    /// Reference or primitive.
    fn kind() -> SlotKind;

    /// The type resolved for this slot, for reference slots.
    fn key() -> Option<DependencyKey> {
        None
    }

    /// Returns `true` if a reference slot has not been filled yet.
    fn is_empty(&self) -> bool {
        false
    }

    /// Converts a resolved value into the slot type.
    fn from_wired(wired: Wired) -> Result<Self>;
}

fn handle_mismatch<S>(found: &str) -> MasnaError {
    MasnaError::TypeMismatch {
        binding: "injected value".into(),
        expected: type_name::<S>().into(),
        found: found.into(),
    }
}

fn describe_wired(wired: &Wired) -> String {
    match wired {
        Wired::Handle(instance) => instance.type_name().to_string(),
        Wired::Text(text) => format!("text {text:?}"),
        Wired::Value(value) => format!("value {value}"),
    }
}

impl<T: ?Sized + Send + Sync + 'static> Slot for Option<Arc<T>> {
    fn kind() -> SlotKind {
        SlotKind::Reference
    }

    fn key() -> Option<DependencyKey> {
        Some(DependencyKey::of::<T>())
    }

    fn is_empty(&self) -> bool {
        self.is_none()
    }

    fn from_wired(wired: Wired) -> Result<Self> {
        Arc::<T>::from_wired(wired).map(Some)
    }
}

impl<T: ?Sized + Send + Sync + 'static> Slot for Arc<T> {
    fn kind() -> SlotKind {
        SlotKind::Reference
    }

    fn key() -> Option<DependencyKey> {
        Some(DependencyKey::of::<T>())
    }

    fn from_wired(wired: Wired) -> Result<Self> {
        match wired {
            Wired::Handle(instance) => instance
                .downcast::<T>()
                .map_err(|instance| handle_mismatch::<Self>(instance.type_name())),
            other => Err(handle_mismatch::<Self>(&describe_wired(&other))),
        }
    }
}

impl<T: Send + Sync + 'static> Slot for Weak<T> {
    fn kind() -> SlotKind {
        SlotKind::Reference
    }

    fn key() -> Option<DependencyKey> {
        Some(DependencyKey::of::<T>())
    }

    fn is_empty(&self) -> bool {
        // every Weak::new() points at the same dangling sentinel
        self.ptr_eq(&Weak::new())
    }

    fn from_wired(wired: Wired) -> Result<Self> {
        match wired {
            Wired::Handle(instance) => match instance.downcast_weak::<T>() {
                Ok(weak) => Ok(weak),
                Err(instance) => instance
                    .downcast::<T>()
                    .map(|strong| Arc::downgrade(&strong))
                    .map_err(|instance| handle_mismatch::<Self>(instance.type_name())),
            },
            other => Err(handle_mismatch::<Self>(&describe_wired(&other))),
        }
    }
}

/// Conversion of expression results into primitive types.
pub trait FromExprValue: Sized {
    fn from_expr_value(value: Value) -> Result<Self>;
}

/// Conversion of primitive fields into expression values, used by
/// `#[masna(expose)]` fields.
pub trait ToExprValue {
    fn to_expr_value(&self) -> Value;
}

fn conversion_error<T>(value: impl fmt::Display, reason: impl fmt::Display) -> MasnaError {
    MasnaError::Conversion {
        value: value.to_string(),
        target: type_name::<T>(),
        reason: reason.to_string(),
    }
}

fn parse_text<T>(text: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    text.trim()
        .parse::<T>()
        .map_err(|e| conversion_error::<T>(format!("{text:?}"), e))
}

macro_rules! primitive_slot {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Slot for $ty {
                fn kind() -> SlotKind {
                    SlotKind::Primitive
                }

                fn from_wired(wired: Wired) -> Result<Self> {
                    match wired {
                        Wired::Text(text) => parse_text::<$ty>(&text),
                        Wired::Value(value) => <$ty as FromExprValue>::from_expr_value(value),
                        Wired::Handle(instance) => Err(conversion_error::<$ty>(
                            instance.type_name(),
                            "a handle cannot fill a primitive slot",
                        )),
                    }
                }
            }
        )*
    };
}

macro_rules! integer_values {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromExprValue for $ty {
                fn from_expr_value(value: Value) -> Result<Self> {
                    match value {
                        Value::Int(i) => <$ty>::try_from(i)
                            .map_err(|e| conversion_error::<$ty>(i, e)),
                        Value::Float(f) if f.fract() == 0.0 => {
                            let i = f as i64;
                            <$ty>::try_from(i).map_err(|e| conversion_error::<$ty>(f, e))
                        }
                        Value::String(s) => parse_text::<$ty>(&s),
                        other => Err(conversion_error::<$ty>(&other, "not an integer")),
                    }
                }
            }

            impl ToExprValue for $ty {
                fn to_expr_value(&self) -> Value {
                    match i64::try_from(*self) {
                        Ok(i) => Value::Int(i),
                        Err(_) => Value::Float(*self as f64),
                    }
                }
            }
        )*
    };
}

macro_rules! float_values {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromExprValue for $ty {
                fn from_expr_value(value: Value) -> Result<Self> {
                    match value {
                        Value::Float(f) => Ok(f as $ty),
                        Value::Int(i) => Ok(i as $ty),
                        Value::String(s) => parse_text::<$ty>(&s),
                        other => Err(conversion_error::<$ty>(&other, "not a number")),
                    }
                }
            }

            impl ToExprValue for $ty {
                fn to_expr_value(&self) -> Value {
                    Value::Float(*self as f64)
                }
            }
        )*
    };
}

primitive_slot!(
    i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, bool, char, String,
);
integer_values!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
float_values!(f32, f64);

impl FromExprValue for bool {
    fn from_expr_value(value: Value) -> Result<Self> {
        match value {
            Value::Boolean(b) => Ok(b),
            Value::String(s) => parse_text::<bool>(&s),
            other => Err(conversion_error::<bool>(&other, "not a boolean")),
        }
    }
}

impl ToExprValue for bool {
    fn to_expr_value(&self) -> Value {
        Value::Boolean(*self)
    }
}

impl FromExprValue for char {
    fn from_expr_value(value: Value) -> Result<Self> {
        match value {
            Value::String(s) => parse_text::<char>(&s),
            other => Err(conversion_error::<char>(&other, "not a character")),
        }
    }
}

impl ToExprValue for char {
    fn to_expr_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl FromExprValue for String {
    fn from_expr_value(value: Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(s),
            Value::Empty => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }
}

impl ToExprValue for String {
    fn to_expr_value(&self) -> Value {
        Value::String(self.clone())
    }
}

impl ToExprValue for &str {
    fn to_expr_value(&self) -> Value {
        Value::String((*self).to_string())
    }
}

impl<T: ToExprValue> ToExprValue for Option<T> {
    fn to_expr_value(&self) -> Value {
        match self {
            Some(inner) => inner.to_expr_value(),
            None => Value::Empty,
        }
    }
}
