use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct RawSettings {
    #[serde(default)]
    pub server: RawServerConfig,
    #[serde(default)]
    pub tunnel: RawTunnelConfig,
    #[serde(default)]
    pub registration: RawRegistrationConfig,
    #[serde(default)]
    pub rules: RawRulesConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawServerConfig {
    pub port: Option<i64>,
    pub static_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawTunnelConfig {
    pub registry: Option<String>,
    pub binary: Option<String>,
    pub process_name: Option<String>,
    pub log_file: Option<String>,
    pub settle_delay_ms: Option<u64>,
    pub stop_timeout_ms: Option<u64>,
    pub command_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawRegistrationConfig {
    pub auto_register: Option<bool>,
    pub web_ui_entry_base_name: Option<String>,
    pub web_ui_remote_port: Option<i64>,
    pub identity: Option<String>,
    pub reject_duplicate_names: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawRulesConfig {
    pub backend: Option<String>,
}
