use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to {action} registry '{path}': {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RegistryError {
    pub(crate) fn io(action: &'static str, path: &std::path::Path, source: io::Error) -> Self {
        RegistryError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
