//! Editor for the tunnel client's proxy registry file.

mod document;
mod error;
mod record;

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;

pub use document::RegistryDocument;
pub use error::{RegistryError, RegistryResult};
pub use record::ProxyRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    AlreadyPresent,
    Appended,
}

/// Single-writer handle on the registry file.
///
/// Reads go straight to disk and are never cached. Every mutation takes
/// `write_lock`, so a whole-file rewrite from `delete` cannot race an append.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Registry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> RegistryResult<RegistryDocument> {
        let content = fs::read_to_string(&self.path)
            .map_err(|source| RegistryError::io("read", &self.path, source))?;
        Ok(RegistryDocument::parse(&content))
    }

    pub fn list(&self) -> RegistryResult<Vec<ProxyRecord>> {
        Ok(self.load()?.records().cloned().collect())
    }

    pub fn append(&self, record: &ProxyRecord) -> RegistryResult<()> {
        let _guard = self.write_lock.lock();
        self.append_locked(record)
    }

    /// Append `record` unless a block with the same name already exists.
    pub fn append_unless_present(&self, record: &ProxyRecord) -> RegistryResult<AppendOutcome> {
        let _guard = self.write_lock.lock();
        if self.load()?.contains(&record.name) {
            return Ok(AppendOutcome::AlreadyPresent);
        }
        self.append_locked(record)?;
        Ok(AppendOutcome::Appended)
    }

    /// Remove every block named `name`. Returns whether anything was removed;
    /// when nothing matches the file is left untouched.
    pub fn delete(&self, name: &str) -> RegistryResult<bool> {
        let _guard = self.write_lock.lock();
        let mut document = self.load()?;
        let removed = document.remove(name);
        if removed == 0 {
            tracing::debug!(name, path = %self.path.display(), "no registry entry to delete");
            return Ok(false);
        }

        self.replace_contents(&document.serialize())?;
        tracing::info!(name, removed, path = %self.path.display(), "removed registry entry");
        Ok(true)
    }

    /// Prefix (before the first `-`) of the first named proxy entry.
    pub fn first_identity(&self) -> Option<String> {
        let document = match self.load() {
            Ok(document) => document,
            Err(error) => {
                tracing::debug!(%error, "registry unreadable while resolving identity");
                return None;
            }
        };
        document
            .records()
            .find(|record| !record.name.is_empty())
            .map(|record| match record.name.split_once('-') {
                Some((prefix, _)) => prefix.to_string(),
                None => record.name.clone(),
            })
    }

    fn append_locked(&self, record: &ProxyRecord) -> RegistryResult<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|source| RegistryError::io("open", &self.path, source))?;
        file.write_all(record.render_block().as_bytes())
            .map_err(|source| RegistryError::io("append to", &self.path, source))?;
        tracing::info!(name = %record.name, path = %self.path.display(), "appended registry entry");
        Ok(())
    }

    /// Rewrite the file behind `path` through a sibling temp file. A symlinked
    /// registry keeps its link and the target keeps its permissions.
    fn replace_contents(&self, contents: &str) -> RegistryResult<()> {
        let target = fs::canonicalize(&self.path)
            .map_err(|source| RegistryError::io("resolve", &self.path, source))?;
        let permissions = fs::metadata(&target)
            .map_err(|source| RegistryError::io("stat", &target, source))?
            .permissions();
        let mut tmp_name = target.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let result = fs::write(&tmp_path, contents)
            .map_err(|source| RegistryError::io("write", &tmp_path, source))
            .and_then(|()| {
                fs::set_permissions(&tmp_path, permissions)
                    .map_err(|source| RegistryError::io("set permissions on", &tmp_path, source))
            })
            .and_then(|()| {
                fs::rename(&tmp_path, &target)
                    .map_err(|source| RegistryError::io("replace", &target, source))
            });
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tempfile::TempDir;

    fn registry_with(contents: &str) -> (TempDir, Registry) {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("frpc.toml");
        fs::write(&path, contents).expect("seed registry");
        (dir, Registry::new(path))
    }

    fn read(registry: &Registry) -> String {
        fs::read_to_string(registry.path()).unwrap()
    }

    const HEADER: &str = "serverAddr = \"relay.example.net\"\nserverPort = 7000\n\n[auth]\ntoken = \"t\"\n";

    #[test]
    fn append_is_additive() {
        let (_dir, registry) = registry_with(HEADER);
        let first = ProxyRecord::tcp("alice-web", "8080", "18080");
        let second = ProxyRecord::tcp("alice-manager-10.0.0.9-443", "9000", "19000");

        registry.append(&first).unwrap();
        let after_first = read(&registry);
        registry.append(&second).unwrap();
        let after_second = read(&registry);

        assert!(after_first.starts_with(HEADER));
        assert!(after_second.starts_with(&after_first));
        assert_eq!(registry.list().unwrap(), vec![first, second]);
    }

    #[test]
    fn append_requires_existing_file() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new(dir.path().join("missing.toml"));
        let error = registry
            .append(&ProxyRecord::tcp("x", "1", "2"))
            .unwrap_err();
        assert!(matches!(error, RegistryError::Io { action: "open", .. }));
        assert!(!registry.path().exists());
    }

    #[test]
    fn list_propagates_read_failure() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new(dir.path().join("missing.toml"));
        assert!(matches!(
            registry.list().unwrap_err(),
            RegistryError::Io { action: "read", .. }
        ));
    }

    #[test]
    fn deleting_only_entry_leaves_no_markers() {
        let (_dir, registry) = registry_with("");
        registry
            .append(&ProxyRecord::tcp("alice-manager-10.0.0.5-80", "8080", "18080"))
            .unwrap();

        assert!(registry.delete("alice-manager-10.0.0.5-80").unwrap());
        assert!(registry.list().unwrap().is_empty());
        assert_eq!(read(&registry).matches("[[proxies]]").count(), 0);
    }

    #[test]
    fn delete_is_idempotent_and_name_scoped() {
        let (_dir, registry) = registry_with(HEADER);
        for name in ["x", "x-backup", "pre-x"] {
            registry.append(&ProxyRecord::tcp(name, "1", "2")).unwrap();
        }

        assert!(registry.delete("x").unwrap());
        let once = read(&registry);
        assert!(!registry.delete("x").unwrap());
        assert_eq!(read(&registry), once);

        let names: Vec<_> = registry.list().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["x-backup", "pre-x"]);
        assert!(once.starts_with(HEADER));
    }

    #[test]
    fn delete_of_unknown_name_keeps_bytes() {
        let contents = format!("{HEADER}\n[[proxies]]\nname = \"keep\"\nlocalPort = 1\n# trailing");
        let (_dir, registry) = registry_with(&contents);
        assert!(!registry.delete("other").unwrap());
        assert_eq!(read(&registry), contents);
    }

    #[cfg(unix)]
    #[test]
    fn delete_keeps_symlink_and_mode() {
        use std::os::unix::fs::{PermissionsExt, symlink};

        let dir = TempDir::new().unwrap();
        let real = dir.path().join("real.toml");
        let link = dir.path().join("frpc.toml");
        fs::write(&real, HEADER).unwrap();
        fs::set_permissions(&real, fs::Permissions::from_mode(0o600)).unwrap();
        symlink(&real, &link).unwrap();

        let registry = Registry::new(link.clone());
        registry.append(&ProxyRecord::tcp("gone", "1", "2")).unwrap();
        assert!(registry.delete("gone").unwrap());

        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(&real).unwrap(), HEADER);
        assert_eq!(fs::metadata(&real).unwrap().permissions().mode() & 0o777, 0o600);
        assert!(!dir.path().join("real.toml.tmp").exists());
        assert!(!dir.path().join("frpc.toml.tmp").exists());
    }

    #[test]
    fn append_unless_present_is_idempotent() {
        let (_dir, registry) = registry_with(HEADER);
        let record = ProxyRecord::tcp("default-portproxy-manager-web", "8080", "18080");
        assert_eq!(
            registry.append_unless_present(&record).unwrap(),
            AppendOutcome::Appended
        );
        assert_eq!(
            registry.append_unless_present(&record).unwrap(),
            AppendOutcome::AlreadyPresent
        );
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn first_identity_uses_prefix_before_dash() {
        let (_dir, registry) = registry_with(HEADER);
        assert_eq!(registry.first_identity(), None);
        registry.append(&ProxyRecord::tcp("yzwj-manager-10.0.0.1-80", "1", "2")).unwrap();
        registry.append(&ProxyRecord::tcp("other-ssh", "1", "2")).unwrap();
        assert_eq!(registry.first_identity().as_deref(), Some("yzwj"));

        let (_dir2, plain) = registry_with("[[proxies]]\nname = \"solo\"\n");
        assert_eq!(plain.first_identity().as_deref(), Some("solo"));
    }

    #[test]
    fn concurrent_appends_and_deletes_lose_nothing() {
        let (_dir, registry) = registry_with(HEADER);
        let registry = Arc::new(registry);
        for i in 0..8 {
            registry
                .append(&ProxyRecord::tcp(format!("old-{i}"), "1", "2"))
                .unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.delete(&format!("old-{i}")).unwrap();
                    registry
                        .append(&ProxyRecord::tcp(format!("new-{i}"), "1", "2"))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut names: Vec<_> = registry.list().unwrap().into_iter().map(|r| r.name).collect();
        names.sort();
        let expected: Vec<_> = (0..8).map(|i| format!("new-{i}")).collect();
        assert_eq!(names, expected);
    }
}
