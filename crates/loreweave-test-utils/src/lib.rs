#![deny(unsafe_code)]

//! Shared test utilities for the Loreweave workspace.
//!
//! Provides reusable fixtures, config and settings builders, and tracing
//! helpers so that individual crate tests stay concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! loreweave-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod settings;
pub mod store;
pub mod tracing_setup;

pub use config::TestConfigBuilder;
pub use settings::{TestSettingsBuilder, lore};
pub use store::TestStore;
pub use tracing_setup::init_test_tracing;
