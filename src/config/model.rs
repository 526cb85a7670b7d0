use std::{path::PathBuf, time::Duration};

/// Manager settings, built once at startup and handed to each component.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub server: ServerConfig,
    pub tunnel: TunnelConfig,
    pub registration: RegistrationConfig,
    pub rules: RulesConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            static_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Block-structured proxy file consumed by the tunnel client.
    pub registry: PathBuf,
    pub binary: PathBuf,
    /// Image name used to find and terminate the client.
    pub process_name: String,
    pub log_file: PathBuf,
    pub settle_delay: Duration,
    pub stop_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        let binary = PathBuf::from("frpc.exe");
        Self {
            process_name: image_name(&binary),
            registry: PathBuf::from("frpc.toml"),
            binary,
            log_file: PathBuf::from("frpc.log"),
            settle_delay: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    pub auto_register: bool,
    pub web_ui_entry_base_name: String,
    pub web_ui_remote_port: u16,
    /// Empty when unset; callers fall back to the registry's first entry.
    pub identity: String,
    pub reject_duplicate_names: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            auto_register: true,
            web_ui_entry_base_name: "portproxy-manager-web".to_string(),
            web_ui_remote_port: 18080,
            identity: "default".to_string(),
            reject_duplicate_names: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RulesConfig {
    pub backend: RulesBackend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RulesBackend {
    #[default]
    Auto,
    Netsh,
    Simulated,
}

impl RulesBackend {
    /// Resolve `Auto` against the host platform.
    pub fn resolve(self) -> RulesBackend {
        match self {
            RulesBackend::Auto if cfg!(windows) => RulesBackend::Netsh,
            RulesBackend::Auto => RulesBackend::Simulated,
            other => other,
        }
    }
}

pub fn image_name(binary: &std::path::Path) -> String {
    binary
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| binary.to_string_lossy().into_owned())
}
