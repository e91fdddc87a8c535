//! One connected client.
//!
//! A session is shared through `Arc`: the registry holds one reference while
//! it is a member, and every in-flight write task holds another, so the
//! session outlives any operation it issued. Only the task running
//! [`Session::start`] removes the session from the registry, which keeps
//! removal exactly-once no matter how many terminal conditions race.

use std::{
    io,
    net::SocketAddr,
    sync::{Arc, OnceLock},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    select,
    sync::{Mutex, watch},
    time::timeout,
};
use tracing::{debug, info, trace};

use crate::{
    config::RelayConfig,
    error::CloseReason,
    fanout,
    message::Message,
    queue::{Next, OutboundQueue, Push},
    registry::Registry,
};

pub type SessionId = u64;

/// Write side of a session's connection.
pub type SessionWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Lifecycle of a session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

pub struct Session {
    id: SessionId,
    peer: Option<SocketAddr>,
    max_chunk: usize,
    idle_timeout: Option<Duration>,
    state: watch::Sender<SessionState>,
    close_reason: OnceLock<CloseReason>,
    outbound: Mutex<OutboundQueue>,
    writer: Mutex<Option<SessionWriter>>,
}

impl Session {
    pub fn new(
        id: SessionId,
        peer: Option<SocketAddr>,
        writer: SessionWriter,
        config: &RelayConfig,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Connecting);
        Arc::new(Self {
            id,
            peer,
            max_chunk: config.max_chunk.get(),
            idle_timeout: config.idle_timeout,
            state,
            close_reason: OnceLock::new(),
            outbound: Mutex::new(OutboundQueue::new(config.outbound_capacity)),
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watches state transitions, e.g. to wait for `Closed`.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The terminal condition that ended the session, once there is one.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().cloned()
    }

    /// `Connecting -> Active`. Called by the registry under its lock.
    pub(crate) fn activate(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Connecting {
                *state = SessionState::Active;
                true
            } else {
                false
            }
        })
    }

    /// Runs the session until a terminal condition, then tears it down.
    ///
    /// Registers the session first if the caller has not already done so.
    /// Resolves once the session is `Closed`.
    pub async fn start<R>(self: Arc<Self>, mut reader: R, registry: Registry)
    where
        R: AsyncRead + Unpin + Send,
    {
        if self.state() == SessionState::Connecting {
            registry.add(Arc::clone(&self)).await;
        }

        if let Some(reason) = self.read_loop(&mut reader, &registry).await {
            self.close(reason).await;
        }
        drop(reader);

        self.finish(&registry).await;
    }

    /// Queues a message for this session's connection.
    ///
    /// Returns `false` if the message was dropped: the session is not
    /// `Active`, or the queue overflowed and the session is now closing.
    pub async fn enqueue_outbound(self: &Arc<Self>, message: Message) -> bool {
        let pushed = {
            let mut outbound = self.outbound.lock().await;
            let state = self.state();
            if state != SessionState::Active {
                trace!(session = self.id, ?state, "dropping message for inactive session");
                return false;
            }
            outbound.push(message)
        };

        match pushed {
            Ok(Push::Start(first)) => {
                tokio::spawn(Arc::clone(self).write_outbound(first));
                true
            }
            Ok(Push::Queued) => true,
            Err(overflow) => {
                self.close(overflow.into()).await;
                false
            }
        }
    }

    /// Moves the session to `Closing` and drops its pending output.
    ///
    /// Only the first call wins; later calls return `false` and change nothing.
    pub async fn close(&self, reason: CloseReason) -> bool {
        let first = self.state.send_if_modified(|state| {
            if *state < SessionState::Closing {
                *state = SessionState::Closing;
                true
            } else {
                false
            }
        });
        if !first {
            return false;
        }
        let _ = self.close_reason.set(reason.clone());

        let dropped = self.outbound.lock().await.discard();
        info!(session = self.id, reason = %reason, dropped, "session closing");
        true
    }

    async fn read_loop<R>(&self, reader: &mut R, registry: &Registry) -> Option<CloseReason>
    where
        R: AsyncRead + Unpin,
    {
        let mut scratch = vec![0u8; self.max_chunk];
        let mut state = self.state.subscribe();

        loop {
            let read = select! {
                biased;
                _ = wait_until_closing(&mut state) => return None,
                read = read_chunk(reader, &mut scratch, self.idle_timeout) => read,
            };

            match read {
                Ok(len) => {
                    let message = Message::copy_from_slice(&scratch[..len]);
                    let delivered = fanout::broadcast(registry, self.id, message).await;
                    debug!(session = self.id, bytes = len, delivered, "relayed chunk");
                }
                Err(reason) => return Some(reason),
            }
        }
    }

    /// Writes `first` and then whatever the queue hands back, one message at
    /// a time. Exactly one of these tasks exists while the queue is busy.
    async fn write_outbound(self: Arc<Self>, first: Message) {
        let mut state = self.state.subscribe();
        let mut writer = self.writer.lock().await;
        let mut message = first;

        loop {
            let Some(transport) = writer.as_mut() else {
                return;
            };

            let written = select! {
                biased;
                _ = wait_until_closing(&mut state) => return,
                written = write_message(transport, &message) => written,
            };

            let next = self.outbound.lock().await.complete_write(written.is_ok());
            match (written, next) {
                (Ok(()), Next::Write(following)) => message = following,
                (Ok(()), _) => return,
                (Err(err), next) => {
                    debug!(session = self.id, error = ?err, ?next, "write failed");
                    self.close(CloseReason::WriteFailed(err.kind())).await;
                    return;
                }
            }
        }
    }

    /// `Closing -> Closed`: leave the registry and release the connection.
    async fn finish(&self, registry: &Registry) {
        registry.remove(self.id).await;

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(err) = writer.shutdown().await {
                debug!(session = self.id, error = ?err, "failed to shut down connection");
            }
        }

        self.state.send_replace(SessionState::Closed);
        info!(session = self.id, peer = ?self.peer, "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!(session = self.id, "session destroyed");
    }
}

async fn wait_until_closing(state: &mut watch::Receiver<SessionState>) {
    let _ = state.wait_for(|state| *state >= SessionState::Closing).await;
}

async fn read_chunk<R>(
    reader: &mut R,
    scratch: &mut [u8],
    idle_timeout: Option<Duration>,
) -> Result<usize, CloseReason>
where
    R: AsyncRead + Unpin,
{
    let read = match idle_timeout {
        Some(limit) => timeout(limit, reader.read(scratch))
            .await
            .map_err(|_| CloseReason::IdleTimeout(limit))?,
        None => reader.read(scratch).await,
    };

    match read {
        Ok(0) => Err(CloseReason::PeerClosed),
        Ok(len) => Ok(len),
        Err(err) => Err(CloseReason::ReadFailed(err.kind())),
    }
}

async fn write_message<W>(writer: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(message.as_bytes()).await?;
    writer.flush().await
}
