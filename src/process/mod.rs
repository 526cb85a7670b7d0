//! Tunnel client discovery and lifecycle.

mod error;
mod host;
mod locator;
mod supervisor;
#[cfg(test)]
pub(crate) mod testing;

pub use error::ProcessError;
pub use host::{ProcessHost, SystemHost};
pub use supervisor::{ManagedProcessState, StopOutcome, Supervisor, SupervisorConfig};
