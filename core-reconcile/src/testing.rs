//! In-memory collaborators for scanner and repair tests.

use async_trait::async_trait;
use bridge_traits::{
    BridgeError, ChangeHintSource, ProxyFile, ProxyGenerator, ProxyTree, RemoteEntry,
    RemoteLister, Result,
};
use core_runtime::PathMapper;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub const PROXY_ROOT: &str = "/mnt/strm";
pub const REMOTE_ROOT: &str = "/media";
pub const LIBRARY_ROOT: &str = "/data/strm";

pub fn mapper() -> PathMapper {
    PathMapper::new(PROXY_ROOT, REMOTE_ROOT, LIBRARY_ROOT)
}

/// Remote tree built from a flat set of absolute file paths
pub struct FakeRemote {
    root: String,
    files: Mutex<BTreeSet<String>>,
    failing: Mutex<HashSet<String>>,
    changed: Mutex<Vec<String>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeRemote {
    pub fn new(files: &[&str]) -> Self {
        Self {
            root: REMOTE_ROOT.to_string(),
            files: Mutex::new(files.iter().map(|f| f.to_string()).collect()),
            failing: Mutex::new(HashSet::new()),
            changed: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    pub fn add_file(&self, path: &str) {
        self.files.lock().unwrap().insert(path.to_string());
    }

    /// Listing this directory fails as unreachable
    pub fn fail_dir(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    pub fn set_changed(&self, dirs: &[&str]) {
        *self.changed.lock().unwrap() = dirs.iter().map(|d| d.to_string()).collect();
    }

    /// Block every listing until permits are added to the returned semaphore
    pub fn hold_listings(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl RemoteLister for FakeRemote {
    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| BridgeError::OperationFailed(e.to_string()))?;
        }

        if self.failing.lock().unwrap().contains(path) {
            return Err(BridgeError::Unreachable(format!("listing {} timed out", path)));
        }

        let prefix = format!("{}/", path.trim_end_matches('/'));
        let files = self.files.lock().unwrap();
        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();
        for file in files.iter() {
            if let Some(rest) = file.strip_prefix(&prefix) {
                match rest.split_once('/') {
                    Some((dir, _)) => {
                        dirs.insert(format!("{}{}", prefix, dir));
                    }
                    None => entries.push(RemoteEntry::file(file.clone(), 1)),
                }
            }
        }

        if entries.is_empty() && dirs.is_empty() && path != self.root {
            return Err(BridgeError::NotFound(path.to_string()));
        }

        entries.extend(dirs.into_iter().map(RemoteEntry::dir));
        Ok(entries)
    }

    async fn probe_file(&self, path: &str) -> Result<bool> {
        Ok(self.files.lock().unwrap().contains(path))
    }
}

#[async_trait]
impl ChangeHintSource for FakeRemote {
    async fn changed_directories(&self, _since: i64) -> Result<Vec<String>> {
        Ok(self.changed.lock().unwrap().clone())
    }
}

/// Proxy tree keyed by proxy-relative path
#[derive(Default)]
pub struct FakeProxyTree {
    proxies: Mutex<BTreeMap<String, Option<String>>>,
    undeletable: Mutex<HashSet<String>>,
}

impl FakeProxyTree {
    pub fn with(proxies: &[(&str, &str)]) -> Self {
        let tree = Self::default();
        for (path, target) in proxies {
            tree.insert(path, Some(*target));
        }
        tree
    }

    pub fn insert(&self, path: &str, target: Option<&str>) {
        self.proxies
            .lock()
            .unwrap()
            .insert(path.to_string(), target.map(|t| t.to_string()));
    }

    pub fn contains(&self, path: &str) -> bool {
        self.proxies.lock().unwrap().contains_key(path)
    }

    pub fn fail_delete(&self, path: &str) {
        self.undeletable.lock().unwrap().insert(path.to_string());
    }
}

#[async_trait]
impl ProxyTree for FakeProxyTree {
    async fn list_proxies(&self) -> Result<Vec<ProxyFile>> {
        Ok(self
            .proxies
            .lock()
            .unwrap()
            .iter()
            .map(|(path, target)| ProxyFile {
                path: path.clone(),
                target: target.clone(),
            })
            .collect())
    }

    async fn read_proxy(&self, path: &str) -> Result<Option<ProxyFile>> {
        Ok(self
            .proxies
            .lock()
            .unwrap()
            .get(path)
            .map(|target| ProxyFile {
                path: path.to_string(),
                target: target.clone(),
            }))
    }

    async fn delete_proxy(&self, path: &str) -> Result<bool> {
        if self.undeletable.lock().unwrap().contains(path) {
            return Err(BridgeError::OperationFailed(format!(
                "permission denied: {}",
                path
            )));
        }
        Ok(self.proxies.lock().unwrap().remove(path).is_some())
    }
}

/// Generator that writes into a [`FakeProxyTree`]
pub struct FakeGenerator {
    tree: Arc<FakeProxyTree>,
    failing: Mutex<HashSet<String>>,
}

impl FakeGenerator {
    pub fn new(tree: Arc<FakeProxyTree>) -> Self {
        Self {
            tree,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_for(&self, remote_path: &str) {
        self.failing.lock().unwrap().insert(remote_path.to_string());
    }
}

#[async_trait]
impl ProxyGenerator for FakeGenerator {
    async fn generate_proxy(&self, entry: &RemoteEntry) -> Result<String> {
        if self.failing.lock().unwrap().contains(&entry.path) {
            return Err(BridgeError::OperationFailed(format!(
                "cannot write proxy for {}",
                entry.path
            )));
        }

        let relative = mapper()
            .relative_from_remote(&entry.path)
            .map_err(|e| BridgeError::OperationFailed(e.to_string()))?;
        let proxy = PathMapper::proxy_path_for(&relative);
        self.tree.insert(&proxy, Some(&entry.path));
        Ok(proxy)
    }
}
