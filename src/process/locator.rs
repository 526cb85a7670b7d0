use std::sync::Arc;

use super::{error::ProcessResult, host::ProcessHost};

/// Finds a running process by image name. Nothing is cached: every call
/// re-queries the OS, since other actors may start or kill the process.
#[derive(Debug)]
pub struct ProcessLocator<H> {
    host: Arc<H>,
}

impl<H: ProcessHost> ProcessLocator<H> {
    pub fn new(host: Arc<H>) -> Self {
        Self { host }
    }

    pub async fn find(&self, image: &str) -> ProcessResult<Option<u32>> {
        if !self.host.is_alive(image).await? {
            return Ok(None);
        }

        let listing = self.host.query_pids(image).await?;
        let pid = parse_pid(&listing);
        if pid.is_none() {
            // Exited between the two queries.
            tracing::debug!(image, "process reported alive but no pid was listed");
        }
        Ok(pid)
    }
}

/// First line of a process-table listing that is a bare PID.
pub fn parse_pid(listing: &str) -> Option<u32> {
    listing
        .lines()
        .map(str::trim)
        .find_map(|line| line.parse::<u32>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::ScriptedHost;

    #[test]
    fn parses_wmic_and_pgrep_listings() {
        assert_eq!(parse_pid("ProcessId  \r\n4242       \r\n\r\n"), Some(4242));
        assert_eq!(parse_pid("1337\n"), Some(1337));
        assert_eq!(parse_pid("ProcessId\r\n\r\n"), None);
        assert_eq!(parse_pid(""), None);
    }

    #[tokio::test]
    async fn not_alive_short_circuits_pid_query() {
        let host = Arc::new(ScriptedHost::stopped());
        let locator = ProcessLocator::new(host.clone());
        assert_eq!(locator.find("frpc.exe").await.unwrap(), None);
        assert_eq!(host.pid_queries(), 0);
    }

    #[tokio::test]
    async fn alive_without_pid_is_treated_as_gone() {
        let host = Arc::new(ScriptedHost::running(77).with_pid_listing("ProcessId\r\n"));
        let locator = ProcessLocator::new(host.clone());
        assert_eq!(locator.find("frpc.exe").await.unwrap(), None);
        assert_eq!(host.pid_queries(), 1);
    }

    #[tokio::test]
    async fn returns_pid_of_running_process() {
        let host = Arc::new(ScriptedHost::running(4242));
        let locator = ProcessLocator::new(host);
        assert_eq!(locator.find("frpc.exe").await.unwrap(), Some(4242));
    }

    #[tokio::test]
    async fn lookup_failure_propagates() {
        let host = Arc::new(ScriptedHost::stopped().failing_lookup());
        let locator = ProcessLocator::new(host);
        assert!(matches!(
            locator.find("frpc.exe").await,
            Err(crate::process::ProcessError::Lookup { .. })
        ));
    }
}
