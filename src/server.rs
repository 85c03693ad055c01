//! TCP listener loop and the shared context handed to every handler.

use crate::admission::Admission;
use crate::config::ServerConfig;
use crate::connection::{handle_connection, Connection};
use crate::constants::ACCEPT_ERROR_BACKOFF_MS;
use crate::error::{Result, ServerError};
use crate::postproc::PostProcessor;
use crate::store::MessageStore;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// State shared by the listener and all connection handlers.
#[derive(Debug)]
pub struct ServerContext {
    config: ServerConfig,
    admission: Arc<Admission>,
    store: MessageStore,
    post_processor: PostProcessor,
}

impl ServerContext {
    pub fn new(config: ServerConfig) -> Self {
        let admission = Arc::new(Admission::new(config.max_connections));
        let store = MessageStore::new(config.inbox_dir());
        let post_processor =
            PostProcessor::new(config.post_processing.clone(), config.post_processing_timeout());
        Self {
            config,
            admission,
            store,
            post_processor,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn admission(&self) -> &Arc<Admission> {
        &self.admission
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn post_processor(&self) -> &PostProcessor {
        &self.post_processor
    }

    pub fn active_connections(&self) -> usize {
        self.admission.active()
    }
}

pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    ctx: Arc<ServerContext>,
}

impl Server {
    /// Validate `config`, prepare the data directories and bind the listener.
    ///
    /// Any error here is fatal: the server cannot run without its socket or
    /// its inbox.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        config.prepare_dirs()?;

        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.display_addr(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

        info!("Server listening on {}", local_addr);
        info!("Data directory: {}", config.datadir.display());
        if let Some(cmd) = &config.post_processing {
            info!("Post-processing: {}", cmd.display());
        }
        info!("Max connections: {}", config.max_connections);

        Ok(Self {
            listener,
            local_addr,
            ctx: Arc::new(ServerContext::new(config)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    /// Accept connections forever.
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Once `shutdown` fires the listener is closed and this waits for every
    /// admitted connection to reach its terminal state before returning.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut handlers = JoinSet::new();

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                Some(joined) = handlers.join_next() => {
                    report_handler(joined);
                    continue;
                }
                _ = &mut shutdown => break,
            };

            match accepted {
                Ok((stream, peer)) => self.dispatch(&mut handlers, stream, peer),
                Err(e) => {
                    error!("Accept error: {}", e);
                    if back_off(&mut shutdown).await {
                        break;
                    }
                }
            }
        }

        info!("Shutdown requested, no longer accepting connections");
        drop(self.listener);

        if !handlers.is_empty() {
            info!(in_flight = handlers.len(), "Waiting for in-flight connections");
        }
        while let Some(joined) = handlers.join_next().await {
            report_handler(joined);
        }
        info!(active = self.ctx.active_connections(), "Server stopped");
    }

    fn dispatch(&self, handlers: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        debug!(%peer, "Connection request");

        let Some(slot) = self.ctx.admission().try_admit() else {
            warn!(%peer, max = self.ctx.admission().max(), "Max connections reached, rejecting {}", peer.ip());
            drop(stream);
            return;
        };

        let conn = Connection::new(peer);
        let ctx = Arc::clone(&self.ctx);
        handlers.spawn(async move {
            handle_connection(ctx, stream, conn, slot).await;
        });
    }
}

/// Pause after a failed accept. Returns true if `shutdown` fired meanwhile.
async fn back_off<S>(shutdown: &mut S) -> bool
where
    S: Future<Output = ()> + Unpin,
{
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(ACCEPT_ERROR_BACKOFF_MS)) => false,
        _ = shutdown => true,
    }
}

fn report_handler(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        error!("Connection handler failed: {}", e);
    }
}
