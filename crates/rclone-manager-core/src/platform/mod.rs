//! Platform abstraction layer.
//!
//! All OS-specific process and mount handling lives here so the supervision
//! code above it stays free of `#[cfg]` blocks.
//!
//! - `process` - liveness probes and signal delivery
//! - `mount` - mount table lookups and `fusermount` unmounts

pub mod mount;
pub mod process;

pub use mount::{force_unmount, is_mounted, unmount};
pub use process::{is_process_alive, signal_process, ProcessSignal};
