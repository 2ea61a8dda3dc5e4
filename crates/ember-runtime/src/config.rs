//! Runtime configuration, parsed once at startup from CLI flags and
//! environment variables: `EMBER_PATH`, `EMBER_UNBUFFERED`, `EMBER_STARTUP`,
//! `EMBER_MAX_VCORES`.

use std::path::PathBuf;

/// Ceiling accepted for `max_vcores` from either source, guarding against a
/// fat-fingered environment value spinning up an unreasonable worker count.
const MAX_VCORES_CAP: usize = 10_000;

const DEFAULT_VCORES: usize = 4;

/// Startup configuration shared by every entry point (CLI flags, REPL,
/// embedding).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Module search path (`EMBER_PATH`).
    pub search_path: Vec<PathBuf>,
    /// Force unbuffered standard output (`EMBER_UNBUFFERED` or `-u`).
    pub unbuffered: bool,
    /// A script run before the requested entry point, e.g. to pre-populate
    /// globals (`EMBER_STARTUP`).
    pub startup_script: Option<PathBuf>,
    /// Scheduler worker count (`EMBER_MAX_VCORES`).
    pub max_vcores: usize,
    /// Heap ceiling in bytes, `0` meaning unlimited.
    pub max_heap_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search_path: Vec::new(),
            unbuffered: false,
            startup_script: None,
            max_vcores: DEFAULT_VCORES,
            max_heap_bytes: 0,
        }
    }
}

impl Config {
    /// Build a config from environment variables alone; CLI flags are
    /// overlaid afterward by the caller.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("EMBER_PATH") {
            config.search_path = std::env::split_paths(&path).collect();
        }
        if std::env::var("EMBER_UNBUFFERED").is_ok() {
            config.unbuffered = true;
        }
        if let Ok(script) = std::env::var("EMBER_STARTUP") {
            config.startup_script = Some(PathBuf::from(script));
        }
        if let Ok(raw) = std::env::var("EMBER_MAX_VCORES") {
            if let Ok(n) = raw.parse::<usize>() {
                config.max_vcores = n.clamp(1, MAX_VCORES_CAP);
            }
        }

        config
    }
}
