//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sockd::{Addr, ConnState, Server, ServerError};
use tokio::task::JoinHandle;

/// Socket path inside a fresh temporary directory. Keep the directory alive
/// for as long as the path is in use.
pub fn socket_path(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    (dir, path)
}

/// Run `listen` in the background and wait until the endpoint is bound.
pub async fn start(server: &Server) -> JoinHandle<Result<(), ServerError>> {
    let handle = {
        let server = server.clone();
        tokio::spawn(async move { server.listen(std::future::pending()).await })
    };
    wait_until(Duration::from_secs(5), || server.is_running()).await;
    handle
}

pub fn tcp_addr(server: &Server) -> SocketAddr {
    match server.local_addr() {
        Some(Addr::Tcp(addr)) => addr,
        other => panic!("expected a tcp address, got {:?}", other),
    }
}

/// Poll `condition` until it holds, panicking after `limit`.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Records every connection state reported through the info callback.
#[derive(Clone, Default)]
pub struct StateLog {
    entries: Arc<Mutex<Vec<(Addr, ConnState)>>>,
}

impl StateLog {
    pub fn install(server: &Server) -> Self {
        let log = Self::default();
        let entries = log.entries.clone();
        server.register_info(move |_local, remote, state| {
            entries.lock().unwrap().push((remote.clone(), state));
        });
        log
    }

    pub fn count(&self, state: ConnState) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| *s == state)
            .count()
    }

    /// States reported for one remote endpoint, in arrival order.
    pub fn for_remote(&self, remote: &Addr) -> Vec<ConnState> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| r == remote)
            .map(|(_, s)| *s)
            .collect()
    }

    pub fn all(&self) -> Vec<(Addr, ConnState)> {
        self.entries.lock().unwrap().clone()
    }
}

/// Records the kind of every error reported through the error callback.
#[derive(Clone, Default)]
pub struct ErrorLog {
    kinds: Arc<Mutex<Vec<&'static str>>>,
}

impl ErrorLog {
    pub fn install(server: &Server) -> Self {
        let log = Self::default();
        let kinds = log.kinds.clone();
        server.register_error(move |error| kinds.lock().unwrap().push(error.kind()));
        log
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.kinds.lock().unwrap().clone()
    }
}

pub fn exists(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}
