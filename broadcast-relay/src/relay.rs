use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    net::{TcpListener, TcpStream},
    select,
    task::JoinSet,
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    config::RelayConfig,
    error::{CloseReason, RelayError},
    registry::Registry,
    session::{Session, SessionId},
};

/// Pause after a failed accept so a persistent error (e.g. EMFILE) doesn't spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The acceptor: owns the listening socket and the session id counter.
pub struct Relay {
    listener: TcpListener,
    registry: Registry,
    config: RelayConfig,
    next_id: SessionId,
}

impl Relay {
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| RelayError::Bind {
                addr: config.listen,
                source,
            })?;
        Ok(Self::new(listener, config))
    }

    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        Self {
            listener,
            registry: Registry::new(),
            config,
            next_id: 0,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle on the live session set, for diagnostics.
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// Accepts connections forever.
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves, then closes every
    /// session and waits (up to the configured grace period) for them to
    /// finish.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let Relay {
            listener,
            registry,
            config,
            mut next_id,
        } = self;
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => match accept_result {
                    Ok((stream, peer)) => {
                        next_id += 1;
                        accept_session(stream, peer, next_id, &registry, &config, &mut sessions).await;
                    }
                    Err(err) => {
                        let err = RelayError::Accept(err);
                        warn!(error = ?err, "failed to accept connection");
                        sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(err) = joined {
                        warn!(error = ?err, "session task failed");
                    }
                }
            }
        }

        drop(listener);
        close_all(&registry, &mut sessions, config.shutdown_grace).await;
    }

    pub async fn run_until_ctrl_c(self) {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

async fn accept_session(
    stream: TcpStream,
    peer: SocketAddr,
    id: SessionId,
    registry: &Registry,
    config: &RelayConfig,
    sessions: &mut JoinSet<()>,
) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(session = id, error = ?err, "failed to set TCP_NODELAY");
    }

    let (reader, writer) = stream.into_split();
    let session = Session::new(id, Some(peer), Box::new(writer), config);
    registry.add(Arc::clone(&session)).await;
    info!(session = id, peer = %peer, "session registered");

    sessions.spawn(session.start(reader, registry.clone()));
}

async fn close_all(registry: &Registry, sessions: &mut JoinSet<()>, grace: Duration) {
    let live = registry.snapshot().await;
    info!(sessions = live.len(), "relay shutting down");
    for session in &live {
        session.close(CloseReason::Shutdown).await;
    }
    drop(live);

    let drained = timeout(grace, async {
        while sessions.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            remaining = sessions.len(),
            "sessions still running after grace period, aborting"
        );
        sessions.abort_all();
    }
}
