//! Filesystem-backed [`RemoteClient`]: vendor servers and the drop location
//! mounted as directories.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::Builder;
use tokio::{fs, task};
use tracing::debug;
use vendor_sync_core::contract::{
    Connector, FetchedFile, FileDescriptor, RemoteClient, RemoteError,
};

use crate::load_config::ConnectionConfig;

/// Opens [`LocalClient`] sessions for the configured connections.
pub struct LocalConnector {
    roots: HashMap<String, PathBuf>,
}

impl LocalConnector {
    pub fn new(connections: &HashMap<String, ConnectionConfig>) -> Self {
        let roots = connections
            .iter()
            .map(|(name, config)| match config {
                ConnectionConfig::Local { root } => (name.clone(), root.clone()),
            })
            .collect();
        Self { roots }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, connection: &str) -> Result<Box<dyn RemoteClient>, RemoteError> {
        let root = self.roots.get(connection).ok_or_else(|| RemoteError::Connect {
            connection: connection.to_string(),
            reason: "no such connection is configured".into(),
        })?;
        match fs::metadata(root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(RemoteError::Connect {
                    connection: connection.to_string(),
                    reason: format!("{} is not a directory", root.display()),
                })
            }
            Err(e) => {
                return Err(RemoteError::Connect {
                    connection: connection.to_string(),
                    reason: format!("{}: {e}", root.display()),
                })
            }
        }
        debug!(connection = %connection, root = %root.display(), "Connected to local server");
        Ok(Box::new(LocalClient {
            connection: connection.to_string(),
            root: root.clone(),
        }))
    }
}

pub struct LocalClient {
    connection: String,
    root: PathBuf,
}

impl LocalClient {
    pub fn new(connection: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            connection: connection.into(),
            root: root.into(),
        }
    }

    fn dir_path(&self, dir: &str) -> PathBuf {
        if dir.is_empty() {
            self.root.clone()
        } else {
            self.root.join(dir)
        }
    }

    async fn entries(&self, dir: &str) -> Result<Vec<(String, std::fs::Metadata)>, RemoteError> {
        let path = self.dir_path(dir);
        let mut read_dir = fs::read_dir(&path).await.map_err(|e| io_error(&path, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| io_error(&path, e))? {
            let meta = entry.metadata().await.map_err(|e| io_error(&entry.path(), e))?;
            if !meta.is_file() {
                continue;
            }
            entries.push((entry.file_name().to_string_lossy().into_owned(), meta));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

#[async_trait]
impl RemoteClient for LocalClient {
    async fn list_descriptors(&self, dir: &str) -> Result<Vec<FileDescriptor>, RemoteError> {
        let path = self.dir_path(dir);
        self.entries(dir)
            .await?
            .into_iter()
            .map(|(name, meta)| descriptor(name, &meta).map_err(|e| io_error(&path, e)))
            .collect()
    }

    async fn list_names(&self, dir: &str) -> Result<Vec<String>, RemoteError> {
        Ok(self
            .entries(dir)
            .await?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    async fn describe_one(&self, dir: &str, name: &str) -> Result<FileDescriptor, RemoteError> {
        let path = self.dir_path(dir).join(name);
        let meta = fs::metadata(&path).await.map_err(|e| io_error(&path, e))?;
        descriptor(name.to_string(), &meta).map_err(|e| io_error(&path, e))
    }

    async fn fetch(
        &self,
        descriptor: &FileDescriptor,
        dir: &str,
    ) -> Result<FetchedFile, RemoteError> {
        let path = self.dir_path(dir).join(&descriptor.name);
        let content = fs::read(&path).await.map_err(|e| io_error(&path, e))?;
        Ok(FetchedFile {
            descriptor: descriptor.clone(),
            content,
        })
    }

    /// Never overwrites: writing over an existing file is an error. The
    /// target name only appears once every byte is on disk.
    async fn upload(&self, file: &FetchedFile, dir: &str) -> Result<FileDescriptor, RemoteError> {
        let dir_path = self.dir_path(dir);
        let path = dir_path.join(file.name());
        let target = path.clone();
        let content = file.content.clone();
        let meta = task::spawn_blocking(move || write_new(&dir_path, &target, &content))
            .await
            .map_err(|e| io_error(&path, io::Error::other(e)))?
            .map_err(|e| io_error(&path, e))?;
        descriptor(file.name().to_string(), &meta).map_err(|e| io_error(&path, e))
    }

    async fn exists(&self, dir: &str, name: &str) -> Result<bool, RemoteError> {
        let path = self.dir_path(dir).join(name);
        fs::try_exists(&path).await.map_err(|e| io_error(&path, e))
    }

    async fn close(&self) -> Result<(), RemoteError> {
        debug!(connection = %self.connection, "Closing local session");
        Ok(())
    }
}

/// Writes `content` to a temporary file in `dir` and links it to `target`
/// without replacing an existing file. The temporary file is removed on any
/// failure.
fn write_new(dir: &Path, target: &Path, content: &[u8]) -> io::Result<std::fs::Metadata> {
    let mut tmp = Builder::new().prefix(".upload-").tempfile_in(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))?;
    }
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    let written = tmp.persist_noclobber(target).map_err(|e| e.error)?;
    written.metadata()
}

fn descriptor(name: String, meta: &std::fs::Metadata) -> io::Result<FileDescriptor> {
    let modified_at: DateTime<Utc> = meta.modified()?.into();
    let mut descriptor = FileDescriptor::named(name, modified_at);
    descriptor.size = meta.len();
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        descriptor.mode = meta.mode();
        descriptor.owner_id = meta.uid();
        descriptor.group_id = meta.gid();
    }
    Ok(descriptor)
}

fn io_error(path: &Path, source: io::Error) -> RemoteError {
    let path = path.display().to_string();
    match source.kind() {
        io::ErrorKind::NotFound => RemoteError::NotFound { path },
        _ => RemoteError::Io { path, source },
    }
}
