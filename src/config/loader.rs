use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use super::{
    error::{ConfigError, ConfigResult},
    model::{
        RegistrationConfig, RulesBackend, RulesConfig, ServerConfig, Settings, TunnelConfig,
        image_name,
    },
    raw::{RawRegistrationConfig, RawRulesConfig, RawServerConfig, RawSettings, RawTunnelConfig},
};

pub fn load_from_path<P: AsRef<Path>>(path: P) -> ConfigResult<Settings> {
    let path_ref = path.as_ref();
    let raw_contents = fs::read_to_string(path_ref).map_err(|source| ConfigError::ReadFailure {
        path: path_ref.to_path_buf(),
        source,
    })?;
    load_from_str(path_ref, &raw_contents)
}

pub fn load_from_str(config_path: &Path, contents: &str) -> ConfigResult<Settings> {
    let raw: RawSettings = toml::from_str(contents)?;
    convert_raw_settings(config_path, raw)
}

/// Load settings, falling back to defaults when the file is absent or broken.
pub fn load_or_default<P: AsRef<Path>>(path: P) -> Settings {
    let path_ref = path.as_ref();
    match load_from_path(path_ref) {
        Ok(settings) => settings,
        Err(error) => {
            tracing::warn!(%error, path = %path_ref.display(), "failed to load settings; using defaults");
            Settings::default()
        }
    }
}

fn convert_raw_settings(config_path: &Path, raw: RawSettings) -> ConfigResult<Settings> {
    let server = convert_server_config(config_path, raw.server)?;
    let tunnel = convert_tunnel_config(config_path, raw.tunnel)?;
    let registration = convert_registration_config(raw.registration)?;
    let rules = convert_rules_config(raw.rules)?;

    Ok(Settings {
        server,
        tunnel,
        registration,
        rules,
    })
}

fn convert_server_config(config_path: &Path, raw: RawServerConfig) -> ConfigResult<ServerConfig> {
    let mut config = ServerConfig::default();
    if let Some(port) = raw.port {
        config.port = validate_port("server.port", port)?;
    }
    if let Some(dir) = raw.static_dir {
        config.static_dir = resolve_relative_path(config_path, dir);
    }
    Ok(config)
}

fn convert_tunnel_config(config_path: &Path, raw: RawTunnelConfig) -> ConfigResult<TunnelConfig> {
    let mut config = TunnelConfig::default();
    if let Some(registry) = raw.registry {
        config.registry = resolve_relative_path(config_path, registry);
    }
    if let Some(binary) = raw.binary {
        config.binary = resolve_relative_path(config_path, binary);
        config.process_name = image_name(&config.binary);
    }
    if let Some(name) = raw.process_name {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::EmptyField {
                field: "tunnel.process_name",
            });
        }
        config.process_name = trimmed.to_string();
    }
    if let Some(log_file) = raw.log_file {
        config.log_file = resolve_relative_path(config_path, log_file);
    }
    if let Some(ms) = raw.settle_delay_ms {
        config.settle_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = raw.stop_timeout_ms {
        config.stop_timeout = Duration::from_millis(ms.max(1));
    }
    if let Some(ms) = raw.command_timeout_ms {
        config.command_timeout = Duration::from_millis(ms.max(1));
    }
    Ok(config)
}

fn convert_registration_config(raw: RawRegistrationConfig) -> ConfigResult<RegistrationConfig> {
    let mut config = RegistrationConfig::default();
    if let Some(enabled) = raw.auto_register {
        config.auto_register = enabled;
    }
    if let Some(base) = raw.web_ui_entry_base_name {
        if base.trim().is_empty() {
            return Err(ConfigError::EmptyField {
                field: "registration.web_ui_entry_base_name",
            });
        }
        config.web_ui_entry_base_name = base.trim().to_string();
    }
    if let Some(port) = raw.web_ui_remote_port {
        config.web_ui_remote_port = validate_port("registration.web_ui_remote_port", port)?;
    }
    // An explicit settings file without an identity defers to the registry.
    config.identity = raw.identity.map(|s| s.trim().to_string()).unwrap_or_default();
    if let Some(reject) = raw.reject_duplicate_names {
        config.reject_duplicate_names = reject;
    }
    Ok(config)
}

fn convert_rules_config(raw: RawRulesConfig) -> ConfigResult<RulesConfig> {
    let backend = match raw.backend.as_deref().map(str::trim) {
        None => RulesBackend::Auto,
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "auto" => RulesBackend::Auto,
            "netsh" => RulesBackend::Netsh,
            "simulated" => RulesBackend::Simulated,
            _ => {
                return Err(ConfigError::UnknownRulesBackend {
                    value: value.to_string(),
                });
            }
        },
    };
    Ok(RulesConfig { backend })
}

fn validate_port(field: &'static str, value: i64) -> ConfigResult<u16> {
    match u16::try_from(value) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ConfigError::InvalidPort { field, value }),
    }
}

fn resolve_relative_path(config_path: &Path, value: String) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        return path;
    }
    let base_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    base_dir.join(path)
}
