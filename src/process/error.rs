use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("process lookup via `{command}` failed: {detail}")]
    Lookup { command: String, detail: String },
    #[error("tunnel client is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to open process log '{path}': {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("termination via `{command}` failed: {detail}")]
    Terminate { command: String, detail: String },
    #[error("'{image}' still running {waited:?} after termination")]
    StopTimeout { image: String, waited: Duration },
    #[error("`{command}` did not finish within {waited:?}")]
    CommandTimeout { command: String, waited: Duration },
}

pub type ProcessResult<T> = Result<T, ProcessError>;
