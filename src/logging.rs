use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};

use chrono::{SecondsFormat, Utc};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::Level;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

pub fn init_tracing(default_level: Level) {
    TRACING_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy()
        });

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Append-only log shared between the tunnel client's stdout/stderr and the
/// manager's own lifecycle markers.
#[derive(Debug, Clone)]
pub struct ClientLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl ClientLog {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn marker(&self, stream: LogStream, message: &str) -> io::Result<()> {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let line = format_line(&timestamp, stream, message);
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.flush()
    }

    /// Duplicate the handle for redirecting a child's output stream.
    pub fn stdio(&self) -> io::Result<Stdio> {
        let file = self.file.lock().try_clone()?;
        Ok(Stdio::from(file))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum LogStream {
    Started,
    Exited,
}

impl LogStream {
    pub fn label(self) -> &'static str {
        match self {
            LogStream::Started => "STARTED",
            LogStream::Exited => "EXITED",
        }
    }
}

fn format_line(timestamp: &str, stream: LogStream, message: &str) -> String {
    format!(
        "{timestamp} | {stream:<7} | {message}\n",
        stream = stream.label(),
        message = sanitize_message(message)
    )
}

fn sanitize_message(message: &str) -> String {
    message
        .chars()
        .map(|ch| if ch == '\n' || ch == '\r' { ' ' } else { ch })
        .collect()
}
