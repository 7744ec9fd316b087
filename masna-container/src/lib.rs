//! Core container implementation for Masna DI.

pub mod component;
pub mod construct;
pub mod container;
pub mod context;
pub mod directive;
pub mod error;
pub mod expr;
pub mod factory;
pub mod key;
pub mod lifecycle;
pub mod options;
pub mod provider;
pub mod registry;
pub mod slot;
pub mod wire;

pub use component::{Component, Descriptor, Properties};
pub use construct::ConstructOptions;
pub use container::{
    Container, Registration, auto_wire, auto_wire_shared, auto_wire_timeout, evaluate, find, find_all,
    find_by_name, find_by_name_timeout, find_timeout, interface, named_interface,
    named_singleton, new, new_timeout, new_with_option, new_with_option_timeout, prelude,
    register_factory, register_factory_method, singleton,
};
pub use context::ResolutionContext;
pub use error::{MasnaError, Result};
pub use factory::Factory;
pub use key::DependencyKey;
pub use lifecycle::{Interface, Singleton};
pub use options::Options;
pub use provider::Provider;
pub use slot::{FromExprValue, Instance, Slot, ToExprValue, Wired};

pub use evalexpr::Value as ExprValue;
pub use inventory;
