use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use broadcast_relay::{
    config::RelayConfig,
    error::RelayError,
    registry::Registry,
    relay::Relay,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
    time::{sleep, timeout},
};

const WAIT: Duration = Duration::from_secs(3);
const SILENCE: Duration = Duration::from_millis(200);

struct RunningRelay {
    addr: SocketAddr,
    registry: Registry,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<()>,
}

impl RunningRelay {
    async fn start(config: RelayConfig) -> Result<Self> {
        let config = RelayConfig {
            listen: "127.0.0.1:0".parse()?,
            ..config
        };
        let relay = Relay::bind(config).await?;
        let addr = relay.local_addr()?;
        let registry = relay.registry();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            relay.run_until(shutdown).await;
        });

        Ok(Self {
            addr,
            registry,
            shutdown: Some(shutdown_tx),
            server,
        })
    }

    /// Connects and waits until the relay has registered the new session.
    async fn connect(&self) -> Result<TcpStream> {
        let expected = self.registry.len().await + 1;
        let stream = TcpStream::connect(self.addr).await?;
        self.wait_for_sessions(expected).await?;
        Ok(stream)
    }

    async fn wait_for_sessions(&self, count: usize) -> Result<()> {
        timeout(WAIT, async {
            while self.registry.len().await != count {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .with_context(|| format!("relay never reached {count} sessions"))
    }

    async fn stop(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        timeout(WAIT, self.server)
            .await
            .context("relay did not shut down")??;
        Ok(())
    }
}

async fn read_exactly(stream: &mut TcpStream, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    timeout(WAIT, stream.read_exact(&mut buf))
        .await
        .context("timed out waiting for bytes")??;
    Ok(buf)
}

async fn assert_silent(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let read = timeout(SILENCE, stream.read(&mut buf)).await;
    assert!(read.is_err(), "expected silence, got {read:?}");
}

async fn assert_closed(stream: &mut TcpStream) -> Result<()> {
    let mut rest = Vec::new();
    timeout(WAIT, stream.read_to_end(&mut rest))
        .await
        .context("connection was not closed")??;
    Ok(())
}

#[tokio::test]
async fn lone_client_gets_nothing_back() -> Result<()> {
    let relay = RunningRelay::start(RelayConfig::default()).await?;
    let mut alice = relay.connect().await?;

    alice.write_all(b"hello").await?;
    assert_silent(&mut alice).await;

    relay.stop().await
}

#[tokio::test]
async fn message_reaches_the_other_client_only() -> Result<()> {
    let relay = RunningRelay::start(RelayConfig::default()).await?;
    let mut alice = relay.connect().await?;
    let mut bob = relay.connect().await?;

    alice.write_all(b"hi").await?;

    assert_eq!(read_exactly(&mut bob, 2).await?, b"hi");
    assert_silent(&mut alice).await;

    relay.stop().await
}

#[tokio::test]
async fn disconnected_client_is_dropped_from_broadcasts() -> Result<()> {
    let relay = RunningRelay::start(RelayConfig::default()).await?;
    let mut alice = relay.connect().await?;
    let bob = relay.connect().await?;
    let mut carol = relay.connect().await?;
    assert_eq!(relay.registry.ids().await, vec![1, 2, 3]);

    drop(bob);
    relay.wait_for_sessions(2).await?;
    assert!(!relay.registry.contains(2).await);

    alice.write_all(b"hey").await?;
    assert_eq!(read_exactly(&mut carol, 3).await?, b"hey");
    assert_silent(&mut alice).await;

    relay.stop().await
}

#[tokio::test]
async fn concurrent_senders_never_interleave_within_a_stream() -> Result<()> {
    const PER_SENDER: usize = 4000;

    let relay = RunningRelay::start(RelayConfig::default()).await?;
    let mut alice = relay.connect().await?;
    let bob = relay.connect().await?;
    let carol = relay.connect().await?;

    // Disjoint alphabets let the receiver split the merged stream by origin.
    let letters: Vec<u8> = (0..PER_SENDER).map(|i| b'a' + (i % 26) as u8).collect();
    let digits: Vec<u8> = (0..PER_SENDER).map(|i| b'0' + (i % 10) as u8).collect();

    let send = |mut stream: TcpStream, payload: Vec<u8>| {
        tokio::spawn(async move {
            for piece in payload.chunks(37) {
                stream.write_all(piece).await?;
            }
            // Keep the connection open until the receiver has everything.
            sleep(Duration::from_secs(1)).await;
            anyhow::Ok(stream)
        })
    };
    let bob_task = send(bob, letters.clone());
    let carol_task = send(carol, digits.clone());

    let received = read_exactly(&mut alice, 2 * PER_SENDER).await?;
    let from_bob: Vec<u8> = received.iter().copied().filter(u8::is_ascii_lowercase).collect();
    let from_carol: Vec<u8> = received.iter().copied().filter(u8::is_ascii_digit).collect();

    assert_eq!(from_bob, letters);
    assert_eq!(from_carol, digits);

    bob_task.await??;
    carol_task.await??;
    relay.stop().await
}

#[tokio::test]
async fn shutdown_closes_connected_clients() -> Result<()> {
    let relay = RunningRelay::start(RelayConfig::default()).await?;
    let mut alice = relay.connect().await?;
    let registry = relay.registry.clone();

    relay.stop().await?;

    assert_closed(&mut alice).await?;
    assert!(registry.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn idle_clients_are_disconnected() -> Result<()> {
    let relay = RunningRelay::start(RelayConfig {
        idle_timeout: Some(Duration::from_millis(200)),
        ..RelayConfig::default()
    })
    .await?;
    let mut alice = TcpStream::connect(relay.addr).await?;

    assert_closed(&mut alice).await?;
    relay.wait_for_sessions(0).await?;

    relay.stop().await
}

#[tokio::test]
async fn binding_a_busy_port_fails() -> Result<()> {
    let occupied = TcpListener::bind("127.0.0.1:0").await?;
    let config = RelayConfig {
        listen: occupied.local_addr()?,
        ..RelayConfig::default()
    };

    match Relay::bind(config).await {
        Err(RelayError::Bind { addr, .. }) => assert_eq!(addr, occupied.local_addr()?),
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("bind should fail while the port is taken"),
    }
    Ok(())
}
