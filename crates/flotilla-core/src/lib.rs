//! flotilla-core: shared types for the Flotilla scheduler.
//!
//! - **`version`**: the immutable, versioned application definition
//! - **`labels`** / **`fields`**: selector parsing and matching used by
//!   read-side queries
//! - **`config`**: daemon configuration and application file loading

pub mod config;
pub mod fields;
pub mod labels;
pub mod selector;
pub mod version;

pub use config::{ConfigError, DaemonConfig, LogConfig, LogFormat};
pub use fields::FieldSelector;
pub use labels::LabelSelector;
pub use selector::{Matcher, SelectorError};
pub use version::*;
