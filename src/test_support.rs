//! In-memory remote service used by unit tests.

use crate::error::RemoteError;
use crate::remote::{copy_with_cancel, join_remote, Connector, RemoteSession};
use crate::types::RemoteEntry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::{self, Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct MemoryFile {
    content: Vec<u8>,
    modified_at: String,
}

#[derive(Default)]
struct RemoteState {
    files: BTreeMap<String, MemoryFile>,
    extra_dirs: BTreeSet<String>,
    metadata_failures: HashSet<String>,
    truncate_after: HashMap<String, usize>,
    refuse_connections: bool,
}

#[derive(Default)]
struct Counters {
    connections: AtomicUsize,
    transfers: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

/// Fake remote tree with failure injection and usage counters.
#[derive(Clone, Default)]
pub(crate) struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
    counters: Arc<Counters>,
    transfer_delay: Option<Duration>,
}

impl MemoryRemote {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes every transfer sleep, so concurrent sessions overlap.
    pub(crate) fn with_transfer_delay(mut self, delay: Duration) -> Self {
        self.transfer_delay = Some(delay);
        self
    }

    pub(crate) fn add_file(&self, path: &str, content: &[u8], modified_at: &str) {
        self.state.lock().unwrap().files.insert(
            path.to_string(),
            MemoryFile {
                content: content.to_vec(),
                modified_at: modified_at.to_string(),
            },
        );
    }

    pub(crate) fn add_dir(&self, path: &str) {
        self.state.lock().unwrap().extra_dirs.insert(path.to_string());
    }

    pub(crate) fn fail_metadata(&self, path: &str) {
        self.state
            .lock()
            .unwrap()
            .metadata_failures
            .insert(path.to_string());
    }

    /// Streams only the first `bytes` bytes of `path`, then fails.
    pub(crate) fn truncate_transfer(&self, path: &str, bytes: usize) {
        self.state
            .lock()
            .unwrap()
            .truncate_after
            .insert(path.to_string(), bytes);
    }

    pub(crate) fn refuse_connections(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_connections = refuse;
    }

    pub(crate) fn connections(&self) -> usize {
        self.counters.connections.load(Ordering::SeqCst)
    }

    pub(crate) fn transfers(&self) -> usize {
        self.counters.transfers.load(Ordering::SeqCst)
    }

    pub(crate) fn peak_active(&self) -> usize {
        self.counters.peak_active.load(Ordering::SeqCst)
    }

    pub(crate) fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }
}

impl Connector for MemoryRemote {
    fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
        if self.state.lock().unwrap().refuse_connections {
            return Err(RemoteError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        self.counters.connections.fetch_add(1, Ordering::SeqCst);
        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak_active.fetch_max(active, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            remote: self.clone(),
        }))
    }
}

struct MemorySession {
    remote: MemoryRemote,
}

impl MemorySession {
    fn file(&self, path: &str) -> Result<MemoryFile, RemoteError> {
        let state = self.remote.state.lock().unwrap();
        if state.metadata_failures.contains(path) {
            return Err(RemoteError::Io(io::Error::other("550 metadata unavailable")));
        }
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))
    }
}

impl RemoteSession for MemorySession {
    fn list_dir(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let state = self.remote.state.lock().unwrap();
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut files = Vec::new();
        let mut dirs = BTreeSet::new();
        let all_paths = state
            .files
            .keys()
            .map(|p| (p.as_str(), true))
            .chain(state.extra_dirs.iter().map(|p| (p.as_str(), false)));
        for (path, is_file) in all_paths {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child_dir, _)) => {
                    dirs.insert(child_dir.to_string());
                }
                None if is_file => files.push(rest.to_string()),
                None => {
                    dirs.insert(rest.to_string());
                }
            }
        }
        let known = state.extra_dirs.contains(dir.trim_end_matches('/'));
        if files.is_empty() && dirs.is_empty() && !known {
            return Err(RemoteError::NotFound(dir.to_string()));
        }

        let mut entries: Vec<RemoteEntry> = dirs
            .into_iter()
            .map(|name| RemoteEntry {
                absolute_path: join_remote(dir, &name),
                name,
                is_directory: true,
                is_file: false,
            })
            .collect();
        entries.extend(files.into_iter().map(|name| RemoteEntry {
            absolute_path: join_remote(dir, &name),
            name,
            is_directory: false,
            is_file: true,
        }));
        Ok(entries)
    }

    fn size(&mut self, path: &str) -> Result<u64, RemoteError> {
        Ok(self.file(path)?.content.len() as u64)
    }

    fn modified_at(&mut self, path: &str) -> Result<String, RemoteError> {
        Ok(self.file(path)?.modified_at)
    }

    fn retrieve(
        &mut self,
        path: &str,
        sink: &mut dyn Write,
        cancel: &CancellationToken,
    ) -> Result<u64, RemoteError> {
        self.remote.counters.transfers.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.remote.transfer_delay {
            std::thread::sleep(delay);
        }
        let file = self.file(path)?;
        let truncate = self
            .remote
            .state
            .lock()
            .unwrap()
            .truncate_after
            .get(path)
            .copied();
        match truncate {
            Some(limit) => {
                let limit = limit.min(file.content.len());
                sink.write_all(&file.content[..limit])?;
                Err(RemoteError::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset mid-transfer",
                )))
            }
            None => copy_with_cancel(&mut Cursor::new(file.content), sink, cancel),
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.remote.counters.active.fetch_sub(1, Ordering::SeqCst);
    }
}
