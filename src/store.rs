//! Flat-file message store.
//!
//! Each message lands in the inbox as
//! `<UTC accept time>_<peer ip>_<sequence>.raw`. Bytes are written to a
//! hidden temporary file first and then linked under the final name without
//! clobbering, so a reader of the inbox never sees a partial message.

use crate::constants::{MAX_NAME_ATTEMPTS, MESSAGE_FILE_EXTENSION};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct MessageStore {
    inbox: PathBuf,
    seq: Arc<AtomicU64>,
}

impl MessageStore {
    pub fn new(inbox: impl Into<PathBuf>) -> Self {
        Self {
            inbox: inbox.into(),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn inbox(&self) -> &Path {
        &self.inbox
    }

    /// File name for a message accepted at `accepted_at` from `peer`.
    pub fn file_name(accepted_at: DateTime<Utc>, peer: SocketAddr, seq: u64) -> String {
        let ip = peer.ip().to_string().replace(['.', ':'], "_");
        format!(
            "{}_{}_{:06}.{}",
            accepted_at.format("%Y%m%d%H%M%S%6f"),
            ip,
            seq,
            MESSAGE_FILE_EXTENSION
        )
    }

    /// Persist `data` on the blocking pool and return the final path.
    pub async fn save(
        &self,
        peer: SocketAddr,
        accepted_at: DateTime<Utc>,
        data: Vec<u8>,
    ) -> Result<PathBuf, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.save_blocking(peer, accepted_at, &data))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    pub fn save_blocking(
        &self,
        peer: SocketAddr,
        accepted_at: DateTime<Utc>,
        data: &[u8],
    ) -> Result<PathBuf, StoreError> {
        let io_err = |source: io::Error| StoreError::Io {
            peer,
            dir: self.inbox.clone(),
            source,
        };

        fs::create_dir_all(&self.inbox).map_err(io_err)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".incoming-")
            .suffix(".part")
            .tempfile_in(&self.inbox)
            .map_err(io_err)?;
        tmp.write_all(data).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;

        for _ in 0..MAX_NAME_ATTEMPTS {
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            let path = self.inbox.join(Self::file_name(accepted_at, peer, seq));
            match tmp.persist_noclobber(&path) {
                Ok(_) => {
                    debug!(path = %path.display(), bytes = data.len(), "Saved message");
                    return Ok(path);
                }
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    warn!(path = %path.display(), "Message file already exists, trying next sequence");
                    tmp = e.file;
                }
                Err(e) => return Err(io_err(e.error)),
            }
        }

        Err(StoreError::NameExhausted {
            peer,
            attempts: MAX_NAME_ATTEMPTS,
        })
    }
}
