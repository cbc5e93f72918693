//! Default configuration values
//!
//! Values used when neither the configuration file nor the environment set
//! a key.

/// Logging defaults
pub mod logging {
    /// Filter directive applied when `RUST_LOG` is unset
    pub const LEVEL: &str = "info";

    /// Human-readable output unless JSON is requested
    pub const JSON: bool = false;
}

/// Event loop thread defaults
pub mod threads {
    /// Queue depth at which a warning is logged
    pub const QUEUE_WARN_DEPTH: usize = 256;
}

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "LUMEN";

/// Separator between nested keys in environment variable names
pub const ENV_SEPARATOR: &str = "__";
