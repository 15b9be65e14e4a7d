//! Environment variable parsing utilities.
//!
//! Typed access to the overrides the config layer honours, replacing repeated
//! boilerplate like:
//!
//! ```ignore
//! std::env::var("VAR_NAME")
//!     .ok()
//!     .and_then(|v| v.parse::<u64>().ok())
//! ```
//!
//! # Example
//!
//! ```
//! use proposal_sandbox_types::env_utils::{env_flag, env_var};
//!
//! let reference_block: Option<u64> = env_var("PROPOSAL_SANDBOX_REFERENCE_BLOCK");
//! let logging = env_flag("PROPOSAL_SANDBOX_LOGGING").unwrap_or(true);
//! ```

use std::str::FromStr;

/// Parse an environment variable into a type that implements `FromStr`.
///
/// Returns `None` if the variable is not set or cannot be parsed.
pub fn env_var<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Interpret an environment variable as a boolean flag, keeping "unset"
/// distinct from "false".
///
/// `1`, `true`, `yes` and `on` (any case) are true; any other value is false.
pub fn env_flag(key: &str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    Some(matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    ))
}
