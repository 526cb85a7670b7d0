//! Access to the OS port-forwarding rule table.

mod netsh;
mod simulated;

use std::{future::Future, time::Duration};

use serde::Serialize;
use thiserror::Error;

use crate::config::{RulesBackend, Settings};

pub use netsh::NetshRules;
pub use simulated::SimulatedRules;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub listen_address: String,
    pub listen_port: String,
    pub connect_address: String,
    pub connect_port: String,
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("`{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },
    #[error("failed to run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` did not finish within {waited:?}")]
    Timeout { command: String, waited: Duration },
}

pub type RuleResult<T> = Result<T, RuleError>;

pub trait RuleAccessor: Send + Sync + 'static {
    fn list_rules(&self) -> impl Future<Output = RuleResult<Vec<Rule>>> + Send;

    fn add_rule(
        &self,
        listen_port: &str,
        connect_addr: &str,
        connect_port: &str,
    ) -> impl Future<Output = RuleResult<()>> + Send;

    /// Remove the rule listening on `listen_port`; used to undo `add_rule`.
    fn delete_rule(&self, listen_port: &str) -> impl Future<Output = RuleResult<()>> + Send;
}

/// Backend chosen from settings.
#[derive(Debug)]
pub enum Rules {
    Netsh(NetshRules),
    Simulated(SimulatedRules),
}

impl Rules {
    pub fn from_settings(settings: &Settings) -> Self {
        match settings.rules.backend.resolve() {
            RulesBackend::Netsh => Rules::Netsh(NetshRules::new(settings.tunnel.command_timeout)),
            _ => Rules::Simulated(SimulatedRules::default()),
        }
    }
}

impl RuleAccessor for Rules {
    async fn list_rules(&self) -> RuleResult<Vec<Rule>> {
        match self {
            Rules::Netsh(inner) => inner.list_rules().await,
            Rules::Simulated(inner) => inner.list_rules().await,
        }
    }

    async fn add_rule(
        &self,
        listen_port: &str,
        connect_addr: &str,
        connect_port: &str,
    ) -> RuleResult<()> {
        match self {
            Rules::Netsh(inner) => inner.add_rule(listen_port, connect_addr, connect_port).await,
            Rules::Simulated(inner) => {
                inner.add_rule(listen_port, connect_addr, connect_port).await
            }
        }
    }

    async fn delete_rule(&self, listen_port: &str) -> RuleResult<()> {
        match self {
            Rules::Netsh(inner) => inner.delete_rule(listen_port).await,
            Rules::Simulated(inner) => inner.delete_rule(listen_port).await,
        }
    }
}
