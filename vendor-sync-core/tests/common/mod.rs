//! In-memory vendor servers and drop location for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use vendor_sync_core::contract::{Connector, FetchedFile, FileDescriptor, RemoteClient, RemoteError};
use vendor_sync_core::marc::{Field, Record, Subfield};

type Key = (String, String);

#[derive(Default)]
struct State {
    /// (connection, dir) -> files in listing order.
    dirs: BTreeMap<Key, Vec<FetchedFile>>,
    failing: HashSet<String>,
    uploads: Vec<(String, String, String)>,
    open_sessions: usize,
}

/// Every connection of a test run, sharing one state.
#[derive(Clone, Default)]
pub struct FakeServers {
    state: Arc<Mutex<State>>,
}

impl FakeServers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, connection: &str, dir: &str, name: &str, age: Duration, content: Vec<u8>) {
        let descriptor = FileDescriptor {
            size: content.len() as u64,
            ..FileDescriptor::named(name, Utc::now() - age)
        };
        self.state
            .lock()
            .unwrap()
            .dirs
            .entry((connection.to_string(), dir.to_string()))
            .or_default()
            .push(FetchedFile { descriptor, content });
    }

    /// Creates an empty directory.
    pub fn mkdir(&self, connection: &str, dir: &str) {
        self.state
            .lock()
            .unwrap()
            .dirs
            .entry((connection.to_string(), dir.to_string()))
            .or_default();
    }

    /// Connecting to `connection` fails from now on.
    pub fn fail(&self, connection: &str) {
        self.state.lock().unwrap().failing.insert(connection.to_string());
    }

    pub fn names(&self, connection: &str, dir: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .dirs
            .get(&(connection.to_string(), dir.to_string()))
            .map(|files| files.iter().map(|f| f.descriptor.name.clone()).collect())
            .unwrap_or_default()
    }

    /// (connection, dir, name) of every upload so far.
    pub fn uploads(&self) -> Vec<(String, String, String)> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().unwrap().open_sessions
    }
}

#[async_trait]
impl Connector for FakeServers {
    async fn connect(&self, connection: &str) -> Result<Box<dyn RemoteClient>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(connection) {
            return Err(RemoteError::Connect {
                connection: connection.to_string(),
                reason: "connection refused".into(),
            });
        }
        state.open_sessions += 1;
        Ok(Box::new(FakeSession {
            servers: self.clone(),
            connection: connection.to_string(),
        }))
    }
}

struct FakeSession {
    servers: FakeServers,
    connection: String,
}

impl FakeSession {
    fn with_dir<T>(
        &self,
        dir: &str,
        f: impl FnOnce(&mut Vec<FetchedFile>) -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let mut state = self.servers.state.lock().unwrap();
        match state.dirs.get_mut(&(self.connection.clone(), dir.to_string())) {
            Some(files) => f(files),
            None => Err(RemoteError::NotFound {
                path: format!("{}:{}", self.connection, dir),
            }),
        }
    }
}

#[async_trait]
impl RemoteClient for FakeSession {
    async fn list_descriptors(&self, dir: &str) -> Result<Vec<FileDescriptor>, RemoteError> {
        self.with_dir(dir, |files| Ok(files.iter().map(|f| f.descriptor.clone()).collect()))
    }

    async fn list_names(&self, dir: &str) -> Result<Vec<String>, RemoteError> {
        self.with_dir(dir, |files| {
            Ok(files.iter().map(|f| f.descriptor.name.clone()).collect())
        })
    }

    async fn describe_one(&self, dir: &str, name: &str) -> Result<FileDescriptor, RemoteError> {
        self.with_dir(dir, |files| {
            files
                .iter()
                .find(|f| f.descriptor.name == name)
                .map(|f| f.descriptor.clone())
                .ok_or_else(|| RemoteError::NotFound {
                    path: format!("{dir}/{name}"),
                })
        })
    }

    async fn fetch(&self, descriptor: &FileDescriptor, dir: &str) -> Result<FetchedFile, RemoteError> {
        self.with_dir(dir, |files| {
            files
                .iter()
                .find(|f| f.descriptor.name == descriptor.name)
                .cloned()
                .ok_or_else(|| RemoteError::NotFound {
                    path: format!("{dir}/{}", descriptor.name),
                })
        })
    }

    async fn upload(&self, file: &FetchedFile, dir: &str) -> Result<FileDescriptor, RemoteError> {
        let written = self.with_dir(dir, |files| {
            let mut copy = file.clone();
            copy.descriptor.modified_at = Utc::now();
            files.push(copy.clone());
            Ok(copy.descriptor)
        })?;
        self.servers.state.lock().unwrap().uploads.push((
            self.connection.clone(),
            dir.to_string(),
            file.name().to_string(),
        ));
        Ok(written)
    }

    async fn exists(&self, dir: &str, name: &str) -> Result<bool, RemoteError> {
        self.with_dir(dir, |files| Ok(files.iter().any(|f| f.descriptor.name == name)))
    }

    async fn close(&self) -> Result<(), RemoteError> {
        self.servers.state.lock().unwrap().open_sessions -= 1;
        Ok(())
    }
}

/// One record with a control number, optionally carrying an order field.
pub fn marc_file(control_number: &str, with_order: bool) -> Vec<u8> {
    let mut record = Record::default();
    record.add_field(Field::control("001", control_number)).add_field(Field::data(
        "245",
        ['1', '0'],
        vec![Subfield::new('a', "Title.")],
    ));
    if with_order {
        record.add_field(Field::data(
            "960",
            [' ', ' '],
            vec![Subfield::new('s', "100")],
        ));
    }
    record.to_marc21().expect("fixture record encodes")
}

pub fn days(n: i64) -> Duration {
    Duration::days(n)
}
