//! Typed rclone option handling.
//!
//! The backing daemon reports its option defaults once after startup
//! ([`SharedEnvironmentContext`]). Each mount workload may override individual
//! fields through `RCLONE_MOUNT_*` and `RCLONE_VFS_*` keys in its environment
//! map. Those keys are resolved against an explicit field table
//! ([`OptionSchema`]), coerced to the field's declared type ([`coerce`]) and
//! layered onto the baseline, producing [`EffectiveOptions`].
//!
//! # Example
//!
//! ```rust
//! use rclone_manager_core::options::{OptionValue, SharedEnvironmentContext};
//! use std::collections::BTreeMap;
//!
//! let baseline = SharedEnvironmentContext::empty()
//!     .with_value("vfs", "CacheMode", OptionValue::String("off".into()));
//!
//! let mut env = BTreeMap::new();
//! env.insert("RCLONE_VFS_CACHE_MODE".to_string(), "full".to_string());
//!
//! let effective = baseline.overlay(&env);
//! assert_eq!(effective.override_flags(), vec!["--vfs-cache-mode=full".to_string()]);
//! ```

mod context;
mod overlay;
mod schema;
mod value;

pub use context::{SectionValues, SharedEnvironmentContext};
pub use overlay::EffectiveOptions;
pub use schema::{OptionField, OptionSchema};
pub use value::{coerce, parse_bool, parse_duration, parse_size, FieldType, OptionValue};
