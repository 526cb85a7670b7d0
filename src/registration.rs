//! Naming and idempotent registration of manager-owned proxy entries.

use thiserror::Error;

use crate::{
    config::RegistrationConfig,
    registry::{AppendOutcome, ProxyRecord, Registry, RegistryError},
};

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("a proxy named '{0}' is already registered")]
    DuplicateName(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    AlreadyPresent,
    Appended,
}

/// Fields of a user rule that end up in its proxy entry.
#[derive(Debug, Clone)]
pub struct RuleEntry<'a> {
    pub identity: &'a str,
    pub kind: &'a str,
    pub listen_port: &'a str,
    pub connect_addr: &'a str,
    pub connect_port: &'a str,
    pub remote_port: &'a str,
}

#[derive(Debug, Clone)]
pub struct RegistrationPolicy {
    owner_name: String,
    web_ui_entry_base_name: String,
    web_ui_listen_port: u16,
    web_ui_remote_port: u16,
    reject_duplicate_names: bool,
}

impl RegistrationPolicy {
    pub fn new(config: &RegistrationConfig, web_ui_listen_port: u16) -> Self {
        Self {
            owner_name: config.identity.clone(),
            web_ui_entry_base_name: config.web_ui_entry_base_name.clone(),
            web_ui_listen_port,
            web_ui_remote_port: config.web_ui_remote_port,
            reject_duplicate_names: config.reject_duplicate_names,
        }
    }

    pub fn self_entry_name(&self) -> String {
        format!("{}-{}", self.owner_name, self.web_ui_entry_base_name)
    }

    pub fn rule_entry_name(identity: &str, connect_addr: &str, connect_port: &str) -> String {
        format!("{identity}-manager-{connect_addr}-{connect_port}")
    }

    /// Add the manager's own web UI entry unless it is already there.
    pub fn ensure_registered(&self, registry: &Registry) -> Result<Registration, RegistrationError> {
        let record = ProxyRecord::tcp(
            self.self_entry_name(),
            self.web_ui_listen_port.to_string(),
            self.web_ui_remote_port.to_string(),
        );
        let outcome = match registry.append_unless_present(&record)? {
            AppendOutcome::AlreadyPresent => Registration::AlreadyPresent,
            AppendOutcome::Appended => Registration::Appended,
        };
        tracing::info!(
            name = %record.name,
            remote_port = self.web_ui_remote_port,
            ?outcome,
            "web UI registration checked"
        );
        Ok(outcome)
    }

    /// Append the proxy entry backing a user-added forwarding rule.
    pub fn register_rule(
        &self,
        registry: &Registry,
        entry: &RuleEntry<'_>,
    ) -> Result<ProxyRecord, RegistrationError> {
        let name = Self::rule_entry_name(entry.identity, entry.connect_addr, entry.connect_port);
        let mut record = ProxyRecord::tcp(name, entry.listen_port, entry.remote_port);
        if !entry.kind.trim().is_empty() {
            record.kind = entry.kind.trim().to_string();
        }

        if self.reject_duplicate_names {
            if registry.append_unless_present(&record)? == AppendOutcome::AlreadyPresent {
                return Err(RegistrationError::DuplicateName(record.name));
            }
        } else {
            registry.append(&record)?;
        }
        Ok(record)
    }
}
