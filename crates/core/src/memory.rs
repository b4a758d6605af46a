use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::RemoteShareConfig;
use crate::session::{BoxFuture, RemoteAttributes, ShareConnector, ShareSession};
use crate::smb::NtStatus;
use crate::{Error, Result};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShareCalls {
    pub connect_attempts: usize,
    pub opens: usize,
    pub closes: usize,
    pub directories_created: usize,
    pub probes: usize,
    pub stores: usize,
}

#[derive(Debug, Default)]
struct ShareState {
    directories: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    calls: ShareCalls,
    refuse_connections: bool,
    fail_probes: bool,
    fail_stores: bool,
}

/// A share held in process memory. Clones observe the same share, so a test
/// can keep one handle while the connector is owned by a `SessionManager`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShare {
    state: Arc<Mutex<ShareState>>,
}

impl InMemoryShare {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ShareState> {
        lock_state(&self.state)
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    pub fn fail_probes(&self, fail: bool) {
        self.lock().fail_probes = fail;
    }

    /// Uploads are refused with `STATUS_ACCESS_DENIED` after the source has
    /// been read, and nothing is written.
    pub fn fail_stores(&self, fail: bool) {
        self.lock().fail_stores = fail;
    }

    /// Seeds a file, creating its parent directories.
    pub fn insert_file(&self, path: &str, bytes: &[u8]) {
        let mut state = self.lock();
        for dir in crate::naming::directory_chain(parent_of(path)) {
            state.directories.insert(dir);
        }
        state.files.insert(path.to_string(), bytes.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    pub fn file_paths(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    pub fn has_directory(&self, path: &str) -> bool {
        path == "/" || self.lock().directories.contains(path)
    }

    pub fn calls(&self) -> ShareCalls {
        self.lock().calls
    }
}

impl ShareConnector for InMemoryShare {
    fn provider(&self) -> &'static str {
        "test.mem"
    }

    fn connect<'a>(
        &'a self,
        _config: &'a RemoteShareConfig,
    ) -> BoxFuture<'a, Result<Box<dyn ShareSession>>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.connect_attempts += 1;
            if state.refuse_connections {
                return Err(Error::Connection {
                    message: "test share refused the connection".to_string(),
                });
            }
            state.calls.opens += 1;
            let session: Box<dyn ShareSession> = Box::new(InMemorySession {
                state: self.state.clone(),
            });
            Ok(session)
        })
    }
}

struct InMemorySession {
    state: Arc<Mutex<ShareState>>,
}

impl InMemorySession {
    fn lock(&self) -> MutexGuard<'_, ShareState> {
        lock_state(&self.state)
    }
}

impl ShareSession for InMemorySession {
    fn create_directory<'a>(&'a mut self, path: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.directories_created += 1;
            if state.directories.contains(path) || state.files.contains_key(path) {
                return Err(status_error("create_directory", NtStatus::OBJECT_NAME_COLLISION));
            }
            if !parent_exists(&state, path) {
                return Err(status_error("create_directory", NtStatus::OBJECT_PATH_NOT_FOUND));
            }
            state.directories.insert(path.to_string());
            Ok(())
        })
    }

    fn probe<'a>(&'a mut self, path: &'a str) -> BoxFuture<'a, Result<Option<RemoteAttributes>>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.probes += 1;
            if state.fail_probes {
                return Err(status_error("probe", NtStatus::IO_TIMEOUT));
            }
            if let Some(bytes) = state.files.get(path) {
                return Ok(Some(RemoteAttributes {
                    is_directory: false,
                    size: bytes.len() as u64,
                }));
            }
            if path == "/" || state.directories.contains(path) {
                return Ok(Some(RemoteAttributes {
                    is_directory: true,
                    size: 0,
                }));
            }
            Ok(None)
        })
    }

    fn store_file<'a>(
        &'a mut self,
        path: &'a str,
        source: &'a mut (dyn AsyncRead + Unpin + Send),
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            {
                let mut state = self.lock();
                state.calls.stores += 1;
                if !parent_exists(&state, path) {
                    return Err(status_error("store_file", NtStatus::OBJECT_PATH_NOT_FOUND));
                }
                if state.directories.contains(path) {
                    return Err(status_error("store_file", NtStatus::FILE_IS_A_DIRECTORY));
                }
            }

            let mut bytes = Vec::new();
            source.read_to_end(&mut bytes).await?;
            let len = bytes.len() as u64;
            let mut state = self.lock();
            if state.fail_stores {
                return Err(status_error("store_file", NtStatus::ACCESS_DENIED));
            }
            state.files.insert(path.to_string(), bytes);
            Ok(len)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.lock().calls.closes += 1;
            Ok(())
        })
    }
}

fn lock_state(state: &Mutex<ShareState>) -> MutexGuard<'_, ShareState> {
    state.lock().expect("in-memory share mutex poisoned")
}

fn status_error(op: &'static str, status: NtStatus) -> Error {
    Error::Status { op, status }
}

fn parent_of(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}

fn parent_exists(state: &ShareState, path: &str) -> bool {
    let parent = parent_of(path);
    parent == "/" || state.directories.contains(parent)
}
