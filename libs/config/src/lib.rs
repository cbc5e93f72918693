//! # Lumen Runtime Configuration
//!
//! Configuration shared by the services of the Lumen camera stack: logging
//! setup and per-thread event loop settings.
//!
//! ## Sources
//!
//! Settings are layered, later sources overriding earlier ones:
//!
//! 1. built-in defaults ([`defaults`])
//! 2. an optional TOML file
//! 3. environment variables prefixed with `LUMEN_`, nested keys separated by
//!    `__` (`LUMEN_LOGGING__LEVEL=debug`,
//!    `LUMEN_THREADS__CONVERTER__QUEUE_WARN_DEPTH=64`)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use config::RuntimeConfig;
//! use std::path::Path;
//!
//! let config = RuntimeConfig::load(Some(Path::new("config/lumen.toml")))?;
//! let converter = config.thread("converter");
//! println!("stack: {:?} bytes", converter.stack_size_bytes());
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod defaults;
pub mod runtime_config;

pub use runtime_config::{load_config, LoggingConfig, RuntimeConfig, ThreadSettings};
