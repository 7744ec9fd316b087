//! Container-wide options.
//!
//! Options control timeout enforcement for lazy initialization. They can be
//! loaded from any serde format by the host application.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeout settings applied to every resolution started on a container.
///
/// # Examples
/// ```
/// use masna_container::options::Options;
/// use std::time::Duration;
///
/// let options = Options {
///     enable_timeout: true,
///     timeout: Duration::from_secs(1),
///     ..Options::default()
/// };
/// assert_eq!(options.max_depth(), 9);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// When `false`, waits on another caller's initializer are unbounded
    /// and no budget is consumed per level.
    pub enable_timeout: bool,
    /// Default budget for a public call.
    pub timeout: Duration,
    /// Budget consumed by every nested lazy initialization.
    pub timeout_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            enable_timeout: false,
            timeout: Duration::from_secs(3),
            timeout_interval: Duration::from_millis(100),
        }
    }
}

impl Options {
    /// Deepest chain of nested lazy initializations the default timeout
    /// allows before [`MasnaError::BudgetExhausted`](crate::MasnaError::BudgetExhausted).
    pub fn max_depth(&self) -> u32 {
        if self.timeout_interval.is_zero() {
            return u32::MAX;
        }
        let levels = self.timeout.as_nanos() / self.timeout_interval.as_nanos();
        // a level needs a strictly positive remainder
        let levels = if self.timeout.as_nanos() % self.timeout_interval.as_nanos() == 0 {
            levels.saturating_sub(1)
        } else {
            levels
        };
        u32::try_from(levels).unwrap_or(u32::MAX)
    }
}
