// Service configuration read from the environment

use std::path::PathBuf;

pub const DEFAULT_VALIDATE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RUN_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Absent means the in-memory store is used
    pub redis_url: Option<String>,
    pub languages_path: PathBuf,
    pub seed_path: Option<PathBuf>,
    pub validate_timeout_ms: u64,
    pub run_timeout_ms: u64,
    pub locale: String,
    pub isolation: String,
    pub temp_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            redis_url: None,
            languages_path: PathBuf::from("config/languages.json"),
            seed_path: None,
            validate_timeout_ms: DEFAULT_VALIDATE_TIMEOUT_MS,
            run_timeout_ms: DEFAULT_RUN_TIMEOUT_MS,
            locale: "es".to_string(),
            isolation: "host".to_string(),
            temp_dir: std::env::temp_dir(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unparsable numbers keep the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let millis = |key: &str, fallback: u64| {
            non_empty(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(fallback)
        };

        Self {
            bind_addr: non_empty("DOJO_BIND").unwrap_or(defaults.bind_addr),
            redis_url: non_empty("REDIS_URL"),
            languages_path: non_empty("DOJO_LANGUAGES")
                .map(PathBuf::from)
                .unwrap_or(defaults.languages_path),
            seed_path: non_empty("DOJO_SEED").map(PathBuf::from),
            validate_timeout_ms: millis("DOJO_VALIDATE_TIMEOUT_MS", defaults.validate_timeout_ms),
            run_timeout_ms: millis("DOJO_RUN_TIMEOUT_MS", defaults.run_timeout_ms),
            locale: non_empty("DOJO_LOCALE")
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.locale),
            isolation: non_empty("DOJO_ISOLATION")
                .map(|v| v.to_lowercase())
                .unwrap_or(defaults.isolation),
            temp_dir: non_empty("DOJO_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
        }
    }
}
