use std::{ffi::OsString, path::PathBuf, sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{
    sync::Mutex,
    time::{Instant, sleep},
};

use super::{
    error::{ProcessError, ProcessResult},
    host::{LaunchSpec, ProcessHost},
    locator::ProcessLocator,
};
use crate::config::TunnelConfig;

/// Snapshot derived from the OS process table on every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ManagedProcessState {
    pub running: bool,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped { pid: u32 },
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub image: String,
    pub program: PathBuf,
    pub registry: PathBuf,
    pub log_file: PathBuf,
    pub settle_delay: Duration,
    pub stop_timeout: Duration,
    pub stop_poll_interval: Duration,
}

impl From<&TunnelConfig> for SupervisorConfig {
    fn from(tunnel: &TunnelConfig) -> Self {
        Self {
            image: tunnel.process_name.clone(),
            program: tunnel.binary.clone(),
            registry: tunnel.registry.clone(),
            log_file: tunnel.log_file.clone(),
            settle_delay: tunnel.settle_delay,
            stop_timeout: tunnel.stop_timeout,
            stop_poll_interval: Duration::from_millis(100),
        }
    }
}

impl SupervisorConfig {
    fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            program: self.program.clone(),
            args: vec![OsString::from("-c"), self.registry.clone().into_os_string()],
            log_file: self.log_file.clone(),
        }
    }
}

/// Start/stop/restart of the tunnel client, keyed by image name.
///
/// No child handle is retained between calls. `lifecycle` only orders this
/// manager's own start/stop/restart calls against each other, so that two
/// concurrent starts cannot both pass the "not running" check.
#[derive(Debug)]
pub struct Supervisor<H> {
    host: Arc<H>,
    locator: ProcessLocator<H>,
    config: SupervisorConfig,
    lifecycle: Mutex<()>,
}

impl<H: ProcessHost> Supervisor<H> {
    pub fn new(host: Arc<H>, config: SupervisorConfig) -> Self {
        Self {
            locator: ProcessLocator::new(host.clone()),
            host,
            config,
            lifecycle: Mutex::new(()),
        }
    }

    pub async fn status(&self) -> ProcessResult<ManagedProcessState> {
        let pid = self.locator.find(&self.config.image).await?;
        Ok(ManagedProcessState {
            running: pid.is_some(),
            pid,
        })
    }

    pub async fn start(&self) -> ProcessResult<Option<u32>> {
        let _guard = self.lifecycle.lock().await;
        self.start_locked().await
    }

    pub async fn stop(&self) -> ProcessResult<StopOutcome> {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked().await
    }

    /// Stop (errors logged, not fatal), settle, then start exactly once.
    pub async fn restart(&self) -> ProcessResult<Option<u32>> {
        let _guard = self.lifecycle.lock().await;
        tracing::info!(image = %self.config.image, "restarting tunnel client");

        if let Err(error) = self.stop_locked().await {
            tracing::warn!(%error, image = %self.config.image, "stop failed during restart; starting anyway");
        }

        if !self.config.settle_delay.is_zero() {
            sleep(self.config.settle_delay).await;
        }

        self.start_locked().await
    }

    async fn start_locked(&self) -> ProcessResult<Option<u32>> {
        if let Some(pid) = self.locator.find(&self.config.image).await? {
            return Err(ProcessError::AlreadyRunning { pid });
        }

        let spec = self.config.launch_spec();
        self.host.launch(&spec).await
    }

    async fn stop_locked(&self) -> ProcessResult<StopOutcome> {
        let Some(pid) = self.locator.find(&self.config.image).await? else {
            return Ok(StopOutcome::NotRunning);
        };

        self.host.terminate(&self.config.image).await?;
        self.wait_for_exit().await?;
        tracing::info!(pid, image = %self.config.image, "tunnel client stopped");
        Ok(StopOutcome::Stopped { pid })
    }

    async fn wait_for_exit(&self) -> ProcessResult<()> {
        let started = Instant::now();
        loop {
            if self.locator.find(&self.config.image).await?.is_none() {
                return Ok(());
            }
            if started.elapsed() >= self.config.stop_timeout {
                return Err(ProcessError::StopTimeout {
                    image: self.config.image.clone(),
                    waited: self.config.stop_timeout,
                });
            }
            sleep(self.config.stop_poll_interval).await;
        }
    }
}
