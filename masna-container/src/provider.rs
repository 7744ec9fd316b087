//! Provider trait: a module of related registrations.
//!
//! Providers group the declarations of one area of an application so they
//! can be added to a container in one call.
//!
//! # Examples
//! ```rust
//! use masna_container::prelude::*;
//!
//! #[derive(Default)]
//! struct Database;
//! impl Component for Database {}
//!
//! struct StorageProvider;
//!
//! impl Provider for StorageProvider {
//!     fn register(&self, container: &Container) -> Result<()> {
//!         container.singleton::<Database>()?.name("db")?;
//!         Ok(())
//!     }
//! }
//!
//! let container = Container::new();
//! container.add_provider(&StorageProvider)?;
//! assert!(container.find_by_name::<Database>("db").is_ok());
//! # Ok::<(), MasnaError>(())
//! ```

use crate::container::Container;
use crate::error::Result;

/// A module that declares related bindings on a container.
pub trait Provider: Send + Sync {
    /// Declares this module's bindings. Stops at the first failed
    /// declaration.
    fn register(&self, container: &Container) -> Result<()>;

    /// Human-readable name for logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
