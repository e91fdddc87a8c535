//! TCP broadcast relay.
//!
//! Every chunk of bytes a client sends is forwarded verbatim to every other
//! connected client. The relay does no framing and no parsing. Each module
//! focuses on one piece of the job:
//!
//! - [`relay`] is the acceptor: it binds, assigns session ids, registers new
//!   sessions and handles shutdown.
//! - [`session`] owns one connection: its read loop, its lifecycle state and
//!   the task that drains its outbound queue.
//! - [`queue`] is the per-session outbound queue that keeps writes to one
//!   socket strictly sequential and bounded.
//! - [`registry`] tracks the live sessions; [`fanout`] delivers a chunk to all
//!   of them except its origin.
//! - [`client`] is a small line-oriented terminal client; [`cli`] and
//!   [`config`] hold the command line and runtime settings.
//!
//! A client that cannot keep up (its outbound queue fills) is disconnected
//! instead of letting the backlog grow without bound.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod fanout;
pub mod message;
pub mod queue;
pub mod registry;
pub mod relay;
pub mod session;
