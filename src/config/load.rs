//! Config loading: TOML file plus environment overrides.

use std::path::Path;

use super::Config;
use crate::error::ConfigError;

pub const CONFIG_PATH_ENV: &str = "AERONMD_CONFIG";

/// Load config from `path`, then apply env overrides.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })?;
    let mut config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_owned(),
        source,
    })?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load config from `$AERONMD_CONFIG` if set, otherwise defaults, with env
/// overrides applied either way.
pub fn load() -> Result<Config, ConfigError> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return load_from(Path::new(&path));
    }
    let mut config = Config::default();
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load config, falling back to defaults on error.
pub fn load_or_default() -> Config {
    match load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("config load failed, using defaults: {e}");
            let mut config = Config::default();
            apply_env_overrides(&mut config);
            config
        }
    }
}

/// Apply `AERONMD_*` environment overrides in place.
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(dir) = std::env::var("AERONMD_DIR")
        && !dir.trim().is_empty()
    {
        config.dir = dir.into();
    }

    override_u64("AERONMD_TIMER_INTERVAL_NS", &mut config.timer_interval_ns);
    override_u64(
        "AERONMD_CLIENT_LIVENESS_TIMEOUT_NS",
        &mut config.client_liveness_timeout_ns,
    );
    override_u64(
        "AERONMD_PUBLICATION_LINGER_NS",
        &mut config.publication_linger_ns,
    );
    override_u64(
        "AERONMD_PUBLICATION_CONNECTION_TIMEOUT_NS",
        &mut config.publication_connection_timeout_ns,
    );
    override_u64(
        "AERONMD_IMAGE_LIVENESS_TIMEOUT_NS",
        &mut config.image_liveness_timeout_ns,
    );
    override_u32("AERONMD_TERM_BUFFER_LENGTH", &mut config.term_buffer_length);
    override_u32(
        "AERONMD_IPC_TERM_BUFFER_LENGTH",
        &mut config.ipc_term_buffer_length,
    );
    override_u32("AERONMD_MTU_LENGTH", &mut config.mtu_length);
}

fn override_u64(key: &str, slot: &mut u64) {
    if let Ok(raw) = std::env::var(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, raw, "ignoring unparseable env override"),
        }
    }
}

fn override_u32(key: &str, slot: &mut u32) {
    if let Ok(raw) = std::env::var(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, raw, "ignoring unparseable env override"),
        }
    }
}
