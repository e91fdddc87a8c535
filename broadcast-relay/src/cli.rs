use std::{net::SocketAddr, num::NonZeroUsize, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_SHUTDOWN_GRACE, RelayConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, forwarding every chunk a client sends to all other clients.
    Serve(ServeArgs),
    /// Connect to a relay, sending stdin lines and printing what arrives.
    Connect(ConnectArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to listen on. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Outbound messages a client may have pending before it is disconnected.
    #[arg(long, default_value = "128")]
    pub queue_capacity: NonZeroUsize,

    /// Maximum number of bytes relayed per read.
    #[arg(long, default_value = "1024")]
    pub max_chunk: NonZeroUsize,

    /// Disconnect clients that send nothing for this many seconds.
    #[arg(long)]
    pub idle_timeout: Option<u64>,
}

impl From<ServeArgs> for RelayConfig {
    fn from(args: ServeArgs) -> Self {
        Self {
            listen: args.listen,
            max_chunk: args.max_chunk,
            outbound_capacity: args.queue_capacity,
            idle_timeout: args.idle_timeout.map(Duration::from_secs),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub server: SocketAddr,
}
