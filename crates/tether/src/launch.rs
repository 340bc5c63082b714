//! Executable launching on the target node.

use std::{
    process::Command,
    sync::{Arc, mpsc},
    thread,
};

use mio::Waker;
use tether_proto::NetError;
use tracing::{debug, info, warn};

/// How the target runs a requested executable. The real virtual-disk
/// integration supplies its own implementation; [`ProcessLauncher`] runs
/// plain local processes.
pub trait Launcher {
    /// Starts `path` with `arguments` on behalf of `peer_index`. Must not
    /// block; completion arrives later as a [`LaunchDone`].
    fn spawn(&mut self, peer_index: usize, path: &str, arguments: &str) -> Result<(), NetError>;
}

/// Reported when a launched program terminates. The peer is identified by
/// index because it may have disconnected while the program ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchDone {
    pub peer_index: usize,
    pub result_code: u32,
}

/// Spawns the named path as a local process. A helper thread waits for the
/// child and reports through the channel, waking the event loop.
pub struct ProcessLauncher {
    tx: mpsc::Sender<LaunchDone>,
    waker: Arc<Waker>,
}

impl ProcessLauncher {
    pub fn new(waker: Arc<Waker>) -> (Self, mpsc::Receiver<LaunchDone>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx, waker }, rx)
    }
}

impl Launcher for ProcessLauncher {
    fn spawn(&mut self, peer_index: usize, path: &str, arguments: &str) -> Result<(), NetError> {
        let mut cmd = Command::new(path);
        if !arguments.is_empty() {
            cmd.args(arguments.split_whitespace());
        }
        let mut child = cmd.spawn().map_err(|e| {
            warn!("couldn't spawn '{path}': {e}");
            NetError::SpawnFailure
        })?;
        info!("launched '{path}' (pid {})", child.id());

        let tx = self.tx.clone();
        let waker = Arc::clone(&self.waker);
        let path = path.to_string();
        thread::spawn(move || {
            let result_code = match child.wait() {
                Ok(status) => status.code().unwrap_or(1) as u32,
                Err(e) => {
                    warn!("waiting for '{path}': {e}");
                    1
                }
            };
            debug!("'{path}' completed with code {result_code}");
            if tx.send(LaunchDone { peer_index, result_code }).is_ok() {
                let _ = waker.wake();
            }
        });
        Ok(())
    }
}
