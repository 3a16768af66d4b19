//! Live event stream for the sure-shot client.
//!
//! Keeps a best-effort connection to the bound host's `/events` endpoint and
//! hands every inbound message to a single handler, in arrival order.
//!
//! # Architecture
//!
//! - **One authority for retries**: the underlying SSE client never
//!   reconnects itself; [`EventStreamClient`] reopens lost connections after a
//!   fixed delay and a periodic monitor replaces stuck or silent ones.
//! - **Generations**: every `connect()` starts a fresh driver task. State
//!   written by an older driver is ignored.
//! - **Transport seam**: [`transport::Transport`] opens one connection per
//!   call, so the engine can be driven by an in-memory fake.
//! - **Session-driven**: [`StreamSessionHandler`] subscribes to session
//!   events and starts or stops the stream as authentication comes and goes.
//!
//! # Modules
//!
//! - `client`: the reconnection engine
//! - `connection`: observable state and connection ids
//! - `message`: wire payloads
//! - `transport`: the connection seam and its `eventsource-client` implementation

pub mod client;
pub mod connection;
pub mod error;
pub mod message;
pub mod session_event_handler;
pub mod transport;

pub use client::{EventStreamClient, MessageHandler, StreamConfig};
pub use connection::{ConnectionSnapshot, ConnectionState};
pub use error::{Error, ErrorKind};
pub use message::{Attachment, ReceivedMessage, SendMessageRequest, SendMessageResponse};
pub use session_event_handler::StreamSessionHandler;
pub use transport::{EventSourceTransport, Transport};
