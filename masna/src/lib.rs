//! # Masna — Dependency Injection Container for Rust
//!
//! Lazy singletons, tag-driven auto-wiring and cycle-safe resolution.
//!
//! ```rust
//! use masna::prelude::*;
//! use std::sync::Arc;
//!
//! #[derive(Default, Component)]
//! struct Repo;
//!
//! #[derive(Default, Component)]
//! struct Service {
//!     #[masna(wire = "type")]
//!     repo: Option<Arc<Repo>>,
//!     #[masna(value = "8080")]
//!     port: u16,
//! }
//!
//! let container = Container::new();
//! container.singleton::<Repo>()?;
//! container.singleton::<Service>()?;
//!
//! let service: Arc<Service> = container.find()?;
//! assert!(service.repo.is_some());
//! assert_eq!(service.port, 8080);
//! # Ok::<(), MasnaError>(())
//! ```

pub use masna_container::*;
pub use masna_derive::*;
pub use masna_support::*;

pub mod prelude {
    pub use masna_container::prelude::*;
    pub use masna_derive::Component;
}
