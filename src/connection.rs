//! Per-connection handling: drain the socket, store the message, hand it to
//! post-processing.

use crate::admission::AdmissionSlot;
use crate::constants::READ_CHUNK_SIZE;
use crate::error::{ReadError, StoreError};
use crate::server::ServerContext;
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// A live session, owned by its handler.
#[derive(Debug)]
pub struct Connection {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub accepted_at: DateTime<Utc>,
    buffer: Vec<u8>,
}

impl Connection {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            accepted_at: Utc::now(),
            buffer: Vec::new(),
        }
    }

    pub fn received(&self) -> usize {
        self.buffer.len()
    }
}

/// Terminal state of one admitted connection.
#[derive(Debug)]
pub enum ConnectionOutcome {
    Saved(PathBuf),
    Empty,
    ReadFailed(ReadError),
    StoreFailed(StoreError),
}

/// Drive one admitted connection to its terminal state.
///
/// The stream is closed and `slot` released before this returns, whichever
/// way the connection ends.
pub async fn handle_connection<S>(
    ctx: Arc<ServerContext>,
    stream: S,
    conn: Connection,
    slot: AdmissionSlot,
) -> ConnectionOutcome
where
    S: AsyncRead + Unpin,
{
    let span = info_span!("connection", conn_id = %conn.id, peer = %conn.peer);
    let outcome = process(&ctx, stream, conn).instrument(span).await;
    drop(slot);
    outcome
}

async fn process<S>(ctx: &ServerContext, mut stream: S, mut conn: Connection) -> ConnectionOutcome
where
    S: AsyncRead + Unpin,
{
    info!("Connection from {}", conn.peer.ip());

    let config = ctx.config();
    let drained = drain(
        &mut stream,
        &mut conn.buffer,
        config.read_timeout(),
        config.max_message_size,
    )
    .await;
    drop(stream);

    if let Err(e) = drained {
        match &e {
            ReadError::TimedOut(_) => {
                warn!(discarded = conn.received(), "Connection timeout: {}", e)
            }
            _ => error!(discarded = conn.received(), "Error reading connection: {}", e),
        }
        return ConnectionOutcome::ReadFailed(e);
    }

    if conn.buffer.is_empty() {
        warn!("Empty message from {}", conn.peer.ip());
        return ConnectionOutcome::Empty;
    }

    info!(bytes = conn.received(), "Received {} bytes", conn.received());

    let path = match ctx.store().save(conn.peer, conn.accepted_at, conn.buffer).await {
        Ok(path) => path,
        Err(e) => {
            error!("Failed to save message: {}", e);
            return ConnectionOutcome::StoreFailed(e);
        }
    };
    info!(path = %path.display(), "Message saved");

    // Detached; the run is observed only through its own log lines.
    let _ = ctx.post_processor().invoke(&path);

    ConnectionOutcome::Saved(path)
}

/// Read until end-of-stream, appending to `buffer`.
async fn drain<S>(
    stream: &mut S,
    buffer: &mut Vec<u8>,
    idle_timeout: Option<Duration>,
    max_size: Option<usize>,
) -> Result<(), ReadError>
where
    S: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        let read = stream.read(&mut chunk);
        let n = match idle_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| ReadError::TimedOut(limit))??,
            None => read.await?,
        };
        if n == 0 {
            return Ok(());
        }
        if let Some(limit) = max_size {
            if buffer.len() + n > limit {
                return Err(ReadError::TooLarge { limit });
            }
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}
