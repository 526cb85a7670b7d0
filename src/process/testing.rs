//! Scripted process host for exercising the locator and supervisor.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{
    error::{ProcessError, ProcessResult},
    host::{LaunchSpec, ProcessHost},
};

#[derive(Debug, Clone, Copy)]
pub(crate) enum OnTerminate {
    Kill,
    /// The process dies but the kill command still reports failure.
    KillAndFail,
    /// The command succeeds yet the process survives.
    Ignore,
    Fail,
}

#[derive(Debug)]
pub(crate) struct ScriptedHost {
    pid: Mutex<Option<u32>>,
    pid_listing: Option<String>,
    lookup_fails: bool,
    on_terminate: OnTerminate,
    next_pid: u32,
    pid_queries: AtomicUsize,
    terminations: AtomicUsize,
    launched: Mutex<Vec<LaunchSpec>>,
}

impl ScriptedHost {
    pub(crate) fn stopped() -> Self {
        Self {
            pid: Mutex::new(None),
            pid_listing: None,
            lookup_fails: false,
            on_terminate: OnTerminate::Kill,
            next_pid: 9100,
            pid_queries: AtomicUsize::new(0),
            terminations: AtomicUsize::new(0),
            launched: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn running(pid: u32) -> Self {
        let host = Self::stopped();
        *host.pid.lock() = Some(pid);
        host
    }

    pub(crate) fn with_pid_listing(mut self, listing: &str) -> Self {
        self.pid_listing = Some(listing.to_string());
        self
    }

    pub(crate) fn failing_lookup(mut self) -> Self {
        self.lookup_fails = true;
        self
    }

    pub(crate) fn on_terminate(mut self, behavior: OnTerminate) -> Self {
        self.on_terminate = behavior;
        self
    }

    pub(crate) fn pid_queries(&self) -> usize {
        self.pid_queries.load(Ordering::SeqCst)
    }

    pub(crate) fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    pub(crate) fn launches(&self) -> Vec<LaunchSpec> {
        self.launched.lock().clone()
    }

    pub(crate) fn current_pid(&self) -> Option<u32> {
        *self.pid.lock()
    }
}

impl ProcessHost for ScriptedHost {
    async fn is_alive(&self, image: &str) -> ProcessResult<bool> {
        if self.lookup_fails {
            return Err(ProcessError::Lookup {
                command: format!("is-alive {image}"),
                detail: "access denied".to_string(),
            });
        }
        Ok(self.pid.lock().is_some())
    }

    async fn query_pids(&self, _image: &str) -> ProcessResult<String> {
        self.pid_queries.fetch_add(1, Ordering::SeqCst);
        if let Some(listing) = &self.pid_listing {
            return Ok(listing.clone());
        }
        Ok(self
            .pid
            .lock()
            .map(|pid| format!("{pid}\n"))
            .unwrap_or_default())
    }

    async fn terminate(&self, image: &str) -> ProcessResult<()> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        let failure = || ProcessError::Terminate {
            command: format!("kill {image}"),
            detail: "exit status 1".to_string(),
        };
        match self.on_terminate {
            OnTerminate::Kill => {
                *self.pid.lock() = None;
                Ok(())
            }
            OnTerminate::KillAndFail => {
                *self.pid.lock() = None;
                Err(failure())
            }
            OnTerminate::Ignore => Ok(()),
            OnTerminate::Fail => Err(failure()),
        }
    }

    async fn launch(&self, spec: &LaunchSpec) -> ProcessResult<Option<u32>> {
        let mut launched = self.launched.lock();
        launched.push(spec.clone());
        let pid = self.next_pid + launched.len() as u32;
        *self.pid.lock() = Some(pid);
        Ok(Some(pid))
    }
}
