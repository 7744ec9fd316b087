//! Error types for Masna container operations.
//!
//! Errors fall into a few families:
//! - declaration errors ([`MasnaError::AlreadyRegistered`],
//!   [`MasnaError::InvalidDeclaration`]), raised while registering or wiring
//!   and never retryable;
//! - resolution errors ([`MasnaError::NotRegistered`],
//!   [`MasnaError::Ambiguous`], [`MasnaError::TypeMismatch`]);
//! - cycle errors ([`MasnaError::CircularReference`]);
//! - timeout errors ([`MasnaError::Timeout`], [`MasnaError::BudgetExhausted`]),
//!   which are configuration problems rather than transient conditions.

use std::fmt;
use std::time::Duration;

use masna_support::rendering::render_chain;

use crate::key::DependencyKey;

/// Main error type for all Masna operations.
#[derive(Debug, thiserror::Error)]
pub enum MasnaError {
    /// Requested binding was never registered.
    #[error("{}", .0)]
    NotRegistered(NotRegisteredError),

    /// More than one binding satisfies an interface request.
    #[error("{}", .0)]
    Ambiguous(AmbiguousBindingError),

    /// A binding or type was re-entered while it was still being resolved.
    #[error("{}", .0)]
    CircularReference(CircularReferenceError),

    /// A type or name is already bound.
    #[error("{}", .0)]
    AlreadyRegistered(AlreadyRegisteredError),

    /// A declaration is malformed: bad tag, bad factory signature,
    /// conflicting options, init method with a return value.
    #[error("Invalid declaration for {subject}: {reason}")]
    InvalidDeclaration { subject: String, reason: String },

    /// A binding produced a value that cannot be used as the requested type.
    #[error("Type mismatch for {binding}: expected {expected}, found {found}")]
    TypeMismatch {
        binding: String,
        expected: String,
        found: String,
    },

    /// Waiting for another caller's initializer exceeded the budget.
    #[error("Timed out after {waited:?} waiting for {binding} to initialize (last step: {step})\n  Hint: raise Options::timeout or look for a slow initializer")]
    Timeout {
        binding: String,
        waited: Duration,
        step: String,
    },

    /// The per-level decrement consumed the whole timeout budget.
    #[error("Timeout budget exhausted while initializing {binding} ({remaining:?} left, {interval:?} needed per level)\n  Hint: the timeout is too small for the depth of this dependency graph")]
    BudgetExhausted {
        binding: String,
        remaining: Duration,
        interval: Duration,
    },

    /// A literal or expression result could not be converted to a field type.
    #[error("Cannot convert {value} to {target}: {reason}")]
    Conversion {
        value: String,
        target: &'static str,
        reason: String,
    },

    /// An expression failed to parse or evaluate.
    #[error("Expression `{expression}` failed: {reason}")]
    Expression { expression: String, reason: String },

    /// A user-supplied initializer or factory returned an error.
    #[error("Failed to construct {key}: {source}")]
    ConstructionFailed {
        key: DependencyKey,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A failure while wiring a specific field, with its dotted path.
    #[error("Failed to wire {path}: {source}")]
    Wiring {
        path: String,
        #[source]
        source: Box<MasnaError>,
    },
}

impl MasnaError {
    /// Wraps an error raised by user code while constructing `T`.
    pub fn construction<T: ?Sized + 'static>(
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        MasnaError::ConstructionFailed {
            key: DependencyKey::of::<T>(),
            source: source.into(),
        }
    }

    pub(crate) fn invalid(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        MasnaError::InvalidDeclaration {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn at_field(self, path: impl Into<String>) -> Self {
        MasnaError::Wiring {
            path: path.into(),
            source: Box::new(self),
        }
    }

    /// Strips [`MasnaError::Wiring`] wrappers and returns the underlying error.
    pub fn root_cause(&self) -> &MasnaError {
        match self {
            MasnaError::Wiring { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Returns `true` for configuration errors that no retry can fix:
    /// declaration mistakes and exhausted timeouts.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.root_cause(),
            MasnaError::AlreadyRegistered(_)
                | MasnaError::InvalidDeclaration { .. }
                | MasnaError::Timeout { .. }
                | MasnaError::BudgetExhausted { .. }
        )
    }

    /// Returns `true` if the root cause is a circular reference.
    pub fn is_cycle(&self) -> bool {
        matches!(self.root_cause(), MasnaError::CircularReference(_))
    }
}

/// How a binding was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingRef {
    /// Lookup by declared type.
    Type(DependencyKey),
    /// Lookup by binding name.
    Name(String),
}

impl fmt::Display for BindingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingRef::Type(key) => write!(f, "type {key}"),
            BindingRef::Name(name) => write!(f, "name {name:?}"),
        }
    }
}

/// Error when a binding was not registered.
#[derive(Debug)]
pub struct NotRegisteredError {
    /// The binding that was requested
    pub requested: BindingRef,
    /// Similar registered names or types
    pub suggestions: Vec<String>,
}

impl fmt::Display for NotRegisteredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "No binding registered for {}", self.requested)?;

        if !self.suggestions.is_empty() {
            write!(f, "\n  Did you mean one of:")?;
            for suggestion in &self.suggestions {
                write!(f, "\n    - {suggestion}")?;
            }
        }

        match &self.requested {
            BindingRef::Type(key) => write!(
                f,
                "\n  Hint: declare it with singleton::<{}>() or register a binding that implements it",
                key.short_name()
            ),
            BindingRef::Name(name) => write!(
                f,
                "\n  Hint: declare it with named_singleton(\"{name}\") or .name(\"{name}\")"
            ),
        }
    }
}

/// Error when an interface request matches several type bindings.
#[derive(Debug)]
pub struct AmbiguousBindingError {
    /// The interface that was requested
    pub requested: DependencyKey,
    /// Every binding that implements it
    pub candidates: Vec<String>,
}

impl fmt::Display for AmbiguousBindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Multiple bindings found for {}: {}",
            self.requested,
            self.candidates.join(", ")
        )?;
        write!(f, "\n  Hint: give one of them a name and resolve it by name")
    }
}

/// Which guard detected a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    /// A binding was resolved again while its getter was running.
    Resolution,
    /// A type was constructed again while its first construction was running.
    Construction,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleStage::Resolution => write!(f, "resolution"),
            CycleStage::Construction => write!(f, "construction"),
        }
    }
}

/// Error when a circular reference is detected.
///
/// Names both ends of the cycle and shows the full chain.
#[derive(Debug)]
pub struct CircularReferenceError {
    pub stage: CycleStage,
    /// The binding or type that was requested again
    pub requested: String,
    /// The most recently entered binding or type
    pub last: String,
    /// The in-flight chain, ending with `requested`.
    /// Example: ["A", "B", "A"]
    pub chain: Vec<String>,
}

impl fmt::Display for CircularReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Circular reference during {}: getting {}, possible circular reference with {}\n  ",
            self.stage, self.requested, self.last
        )?;
        write!(f, "{}", render_chain(&self.chain))?;
        write!(
            f,
            "\n  Hint: break the cycle with a `self` field, a setter wired after construction, or a factory"
        )
    }
}

/// Error when a type or name is registered twice.
#[derive(Debug)]
pub struct AlreadyRegisteredError {
    pub binding: BindingRef,
}

impl fmt::Display for AlreadyRegisteredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Binding already registered for {}", self.binding)?;
        write!(
            f,
            "\n  Hint: each type has at most one default binding; use a named binding for the others"
        )
    }
}

/// Convenient Result type for Masna operations.
pub type Result<T> = std::result::Result<T, MasnaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_registered_error_display() {
        let err = MasnaError::NotRegistered(NotRegisteredError {
            requested: BindingRef::Type(DependencyKey::of::<String>()),
            suggestions: vec!["alloc::string::Strin".into()],
        });

        let msg = format!("{err}");
        assert!(msg.contains("No binding registered"));
        assert!(msg.contains("String"));
        assert!(msg.contains("Did you mean"));
    }

    #[test]
    fn not_registered_by_name_display() {
        let err = MasnaError::NotRegistered(NotRegisteredError {
            requested: BindingRef::Name("db".into()),
            suggestions: vec![],
        });

        let msg = format!("{err}");
        assert!(msg.contains("name \"db\""));
        assert!(!msg.contains("Did you mean"));
    }

    #[test]
    fn circular_reference_error_display() {
        let err = MasnaError::CircularReference(CircularReferenceError {
            stage: CycleStage::Resolution,
            requested: "A".into(),
            last: "B".into(),
            chain: vec!["A".into(), "B".into(), "A".into()],
        });

        let msg = format!("{err}");
        assert!(msg.contains("getting A, possible circular reference with B"));
        assert!(msg.contains("A → B → A"));
        assert!(err.is_cycle());
        assert!(!err.is_fatal());
    }

    #[test]
    fn ambiguous_error_display() {
        trait Store {}
        let err = MasnaError::Ambiguous(AmbiguousBindingError {
            requested: DependencyKey::of::<dyn Store>(),
            candidates: vec!["Memory".into(), "Disk".into()],
        });

        let msg = format!("{err}");
        assert!(msg.contains("Memory, Disk"));
        assert!(msg.contains("by name"));
    }

    #[test]
    fn wiring_wrapper_exposes_root_cause() {
        let inner = MasnaError::BudgetExhausted {
            binding: "Repo".into(),
            remaining: Duration::ZERO,
            interval: Duration::from_millis(100),
        };
        let err = inner.at_field("Service.repo").at_field("App.service");

        assert!(matches!(err.root_cause(), MasnaError::BudgetExhausted { .. }));
        assert!(err.is_fatal());
        assert!(format!("{err}").contains("App.service"));
    }

    #[test]
    fn construction_error_names_type() {
        struct Pool;
        let err = MasnaError::construction::<Pool>("connection refused");
        let msg = format!("{err}");
        assert!(msg.contains("Pool"));
        assert!(msg.contains("connection refused"));
    }
}
