//! ## Logging Configuration
//!
//! This module sets up logging automatically at program startup using the `ctor` crate.
//! Logging behavior is controlled by the `DEBUG_FRAUD_PIPELINE` environment variable:
//!
//! - **Disabled** (default): If the variable is unset, empty, or explicitly set to `"0"` or `"false"`,
//!   no subscriber is installed and the `tracing` events emitted by the pipeline are discarded.
//! - **Enabled**: Any other value installs a `tracing-subscriber` formatter at `DEBUG` level.
//!
//! ### Usage Example
//!
//! ```sh
//! export DEBUG_FRAUD_PIPELINE=true
//! ```

use ctor::ctor;
use tracing::Level;

/// Returns true when the given value of `DEBUG_FRAUD_PIPELINE` turns logging on.
fn logging_enabled(value: Option<&str>) -> bool {
    value.map_or(false, |v| !(v == "0" || v == "false" || v.is_empty()))
}

#[ctor]
fn set_debug_level() {
    let value = std::env::var("DEBUG_FRAUD_PIPELINE").ok();
    if logging_enabled(value.as_deref()) {
        // A host application may already own the global subscriber.
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .try_init();
    }
}
