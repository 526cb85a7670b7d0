//! Request-level operations shared by the HTTP facade and the CLI.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tokio::task::{self, JoinError};

use crate::{
    config::{RegistrationConfig, Settings},
    process::{
        ManagedProcessState, ProcessError, ProcessHost, StopOutcome, Supervisor,
        SupervisorConfig,
    },
    registration::{Registration, RegistrationError, RegistrationPolicy, RuleEntry},
    registry::{ProxyRecord, Registry, RegistryError},
    rules::{Rule, RuleAccessor, RuleError},
};

const FALLBACK_IDENTITY: &str = "default";

// Anything written into a proxy name or type must stay a single plain token.
static REGISTRY_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._:-]+$").expect("valid registry token regex"));

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("{0}")]
    BadRequest(String),
    #[error("port forwarding rule failed: {0}")]
    Rule(#[from] RuleError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("registry update failed: {0}")]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("registry task failed: {0}")]
    Task(#[from] JoinError),
    #[error("{cause}; rolling back the port forwarding rule also failed: {rollback}")]
    RollbackFailed {
        cause: Box<ManagerError>,
        rollback: RuleError,
    },
}

impl ManagerError {
    pub fn status_code(&self) -> u16 {
        match self {
            ManagerError::BadRequest(_) => 400,
            ManagerError::Registration(RegistrationError::DuplicateName(_)) => 400,
            _ => 500,
        }
    }
}

pub type ManagerResult<T> = Result<T, ManagerError>;

/// Body of an add-rule request. Ports arrive as strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddRuleRequest {
    pub listen_port: String,
    pub connect_addr: String,
    pub connect_port: String,
    pub remote_port: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Identity prefix for the proxy name; empty means the default identity.
    pub name: String,
}

impl AddRuleRequest {
    fn validate(&self) -> ManagerResult<()> {
        for (field, value) in [
            ("listenPort", &self.listen_port),
            ("connectPort", &self.connect_port),
            ("remotePort", &self.remote_port),
        ] {
            match value.trim().parse::<u16>() {
                Ok(port) if port > 0 => {}
                _ => {
                    return Err(ManagerError::BadRequest(format!(
                        "{field} must be a port number between 1 and 65535, got '{value}'"
                    )));
                }
            }
        }
        check_token("connectAddr", self.connect_addr.trim())?;
        for (field, value) in [("type", &self.kind), ("name", &self.name)] {
            let value = value.trim();
            if !value.is_empty() {
                check_token(field, value)?;
            }
        }
        Ok(())
    }
}

fn check_token(field: &str, value: &str) -> ManagerResult<()> {
    if REGISTRY_TOKEN.is_match(value) {
        return Ok(());
    }
    Err(ManagerError::BadRequest(format!(
        "{field} must be a non-empty run of letters, digits, '.', '_', ':' or '-', got '{value}'"
    )))
}

/// Owns every component; built once from [`Settings`].
#[derive(Debug)]
pub struct Manager<R, H> {
    settings: Settings,
    registry: Arc<Registry>,
    policy: RegistrationPolicy,
    rules: R,
    supervisor: Supervisor<H>,
}

impl<R: RuleAccessor, H: ProcessHost> Manager<R, H> {
    pub fn new(settings: Settings, rules: R, host: Arc<H>) -> Self {
        let registry = Arc::new(Registry::new(settings.tunnel.registry.clone()));
        let owner = resolve_identity(&settings.registration, &registry);
        let policy = RegistrationPolicy::new(
            &RegistrationConfig {
                identity: owner,
                ..settings.registration.clone()
            },
            settings.server.port,
        );
        let supervisor = Supervisor::new(host, SupervisorConfig::from(&settings.tunnel));
        Self {
            settings,
            registry,
            policy,
            rules,
            supervisor,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run blocking registry I/O off the async workers.
    async fn with_registry<T, F>(&self, op: F) -> ManagerResult<T>
    where
        F: FnOnce(&Registry) -> T + Send + 'static,
        T: Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        Ok(task::spawn_blocking(move || op(&registry)).await?)
    }

    /// Register the web UI entry when enabled. Failures are logged only.
    pub async fn self_register(&self) -> Option<Registration> {
        if !self.settings.registration.auto_register {
            tracing::debug!("auto registration disabled");
            return None;
        }
        let policy = self.policy.clone();
        let outcome = self
            .with_registry(move |registry| policy.ensure_registered(registry))
            .await
            .and_then(|result| result.map_err(ManagerError::from));
        match outcome {
            Ok(outcome) => Some(outcome),
            Err(error) => {
                tracing::warn!(%error, path = %self.registry.path().display(), "web UI self-registration failed");
                None
            }
        }
    }

    pub async fn default_identity(&self) -> ManagerResult<String> {
        let config = self.settings.registration.clone();
        self.with_registry(move |registry| resolve_identity(&config, registry))
            .await
    }

    pub async fn list_rules(&self) -> ManagerResult<Vec<Rule>> {
        Ok(self.rules.list_rules().await?)
    }

    pub async fn list_proxies(&self) -> ManagerResult<Vec<ProxyRecord>> {
        Ok(self.with_registry(|registry| registry.list()).await??)
    }

    /// Add the OS rule, then its proxy entry, then restart the client.
    ///
    /// A registry failure undoes the OS rule. A restart failure is logged and
    /// the call still succeeds.
    pub async fn add_rule(&self, request: &AddRuleRequest) -> ManagerResult<ProxyRecord> {
        request.validate()?;
        let identity = match request.name.trim() {
            "" => self.default_identity().await?,
            name => name.to_string(),
        };
        check_token("identity", &identity)?;

        let listen_port = request.listen_port.trim();
        let connect_addr = request.connect_addr.trim();
        let connect_port = request.connect_port.trim();

        self.rules
            .add_rule(listen_port, connect_addr, connect_port)
            .await?;

        let policy = self.policy.clone();
        let fields = [
            identity,
            request.kind.clone(),
            listen_port.to_string(),
            connect_addr.to_string(),
            connect_port.to_string(),
            request.remote_port.trim().to_string(),
        ];
        let registered = self
            .with_registry(move |registry| {
                let [identity, kind, listen_port, connect_addr, connect_port, remote_port] = &fields;
                let entry = RuleEntry {
                    identity,
                    kind,
                    listen_port,
                    connect_addr,
                    connect_port,
                    remote_port,
                };
                policy.register_rule(registry, &entry)
            })
            .await
            .and_then(|result| result.map_err(ManagerError::from));
        let record = match registered {
            Ok(record) => record,
            Err(error) => return Err(self.roll_back_rule(listen_port, error).await),
        };

        self.restart_after_change(&record.name).await;
        Ok(record)
    }

    async fn roll_back_rule(&self, listen_port: &str, cause: ManagerError) -> ManagerError {
        tracing::warn!(%cause, listen_port, "registry update failed; removing port forwarding rule");
        match self.rules.delete_rule(listen_port).await {
            Ok(()) => cause,
            Err(rollback) => {
                tracing::error!(%rollback, listen_port, "port forwarding rule left in place");
                ManagerError::RollbackFailed {
                    cause: Box::new(cause),
                    rollback,
                }
            }
        }
    }

    /// Delete the named proxy entry and restart the client. Deleting a name
    /// that is not present succeeds.
    pub async fn delete_proxy(&self, name: &str) -> ManagerResult<bool> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ManagerError::BadRequest("proxy name is required".to_string()));
        }
        let owned = name.to_string();
        let removed = self
            .with_registry(move |registry| registry.delete(&owned))
            .await??;
        self.restart_after_change(name).await;
        Ok(removed)
    }

    async fn restart_after_change(&self, name: &str) {
        if let Err(error) = self.supervisor.restart().await {
            tracing::warn!(%error, proxy = name, "tunnel client restart failed after registry change");
        }
    }

    pub async fn tunnel_status(&self) -> ManagerResult<ManagedProcessState> {
        Ok(self.supervisor.status().await?)
    }

    pub async fn tunnel_start(&self) -> ManagerResult<Option<u32>> {
        Ok(self.supervisor.start().await?)
    }

    pub async fn tunnel_stop(&self) -> ManagerResult<StopOutcome> {
        Ok(self.supervisor.stop().await?)
    }

    pub async fn tunnel_restart(&self) -> ManagerResult<Option<u32>> {
        Ok(self.supervisor.restart().await?)
    }
}

fn resolve_identity(config: &RegistrationConfig, registry: &Registry) -> String {
    let configured = config.identity.trim();
    if !configured.is_empty() {
        return configured.to_string();
    }
    registry
        .first_identity()
        .unwrap_or_else(|| FALLBACK_IDENTITY.to_string())
}
