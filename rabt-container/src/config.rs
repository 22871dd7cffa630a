//! Container-wide options.
//!
//! Options can be built in code or deserialized from any serde format:
//!
//! ```
//! use rabt_container::config::ContainerOptions;
//!
//! let options: ContainerOptions = serde_json::from_str(r#"{ "max_depth": 64 }"#).unwrap();
//! assert_eq!(options.max_depth, 64);
//! assert!(options.dispose_on_drop);
//! ```

use serde::{Deserialize, Serialize};

/// Tunables for a [`Container`](crate::container::Container).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerOptions {
    /// Deepest allowed resolution path before
    /// [`RabtError::DepthExceeded`](crate::error::RabtError::DepthExceeded).
    pub max_depth: usize,
    /// Dispose the container when its handle is dropped.
    pub dispose_on_drop: bool,
    /// How many "did you mean" names an unresolved error carries.
    pub suggestion_limit: usize,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            max_depth: 1024,
            dispose_on_drop: true,
            suggestion_limit: 3,
        }
    }
}

impl ContainerOptions {
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn dispose_on_drop(mut self, enabled: bool) -> Self {
        self.dispose_on_drop = enabled;
        self
    }

    pub fn suggestion_limit(mut self, limit: usize) -> Self {
        self.suggestion_limit = limit;
        self
    }
}
