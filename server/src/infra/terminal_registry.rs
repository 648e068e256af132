//! Live terminal sessions
//!
//! Tracks every open [`TerminalSession`] so the server can cap how many run
//! at once and tear them all down on shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::service::pty::{TerminalOptions, TerminalSession};

/// Registry of open terminal sessions
pub struct TerminalRegistry {
    sessions: DashMap<String, Arc<TerminalSession>>,
    /// Open sessions plus sessions being opened
    reserved: AtomicUsize,
    max_terminals: usize,
}

impl TerminalRegistry {
    pub fn new(max_terminals: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            reserved: AtomicUsize::new(0),
            max_terminals,
        }
    }

    /// Open a session and register it. Blocks while the shell is spawned.
    pub fn open(&self, options: TerminalOptions) -> Result<Arc<TerminalSession>> {
        self.reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_terminals).then_some(n + 1)
            })
            .map_err(|_| Error::PtyLimitExceeded)?;

        match TerminalSession::open(options) {
            Ok(session) => {
                let session = Arc::new(session);
                self.sessions
                    .insert(session.id().to_string(), session.clone());
                Ok(session)
            }
            Err(e) => {
                self.reserved.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Forget a session. The caller is expected to have closed it.
    pub fn remove(&self, id: &str) -> Option<Arc<TerminalSession>> {
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        if removed.is_some() {
            self.reserved.fetch_sub(1, Ordering::SeqCst);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close and forget every session
    pub fn close_all(&self) {
        let ids: Vec<String> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        if ids.is_empty() {
            return;
        }

        info!("Closing {} terminal sessions", ids.len());
        for id in ids {
            if let Some(session) = self.remove(&id) {
                if let Err(e) = session.close() {
                    warn!("Failed to close terminal {}: {}", id, e);
                }
            }
        }
    }
}
