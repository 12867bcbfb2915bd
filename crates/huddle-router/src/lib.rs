//! # huddle-router
//!
//! Real-time many-to-many chat message router.
//!
//! Clients hold one long-lived bidirectional stream each. The first message
//! on a stream announces the client's identity; every later message is
//! routed by its recipient field:
//!
//! - empty: broadcast to every other connected client
//! - contains the group sigil (`@` by default): delivered to the group's
//!   members, and the sender joins the group by posting to it
//! - anything else: delivered to that identity, if connected
//!
//! Every routed message is kept in memory and replayed when a client joins
//! under an identity with recorded messages, or asks with `/history`.
//!
//! ## Architecture
//!
//! - **Router**: Owns the session, group and history tables
//! - **Connection Actors**: One per client stream, plus a writer task that
//!   drains the session's outbound queue
//! - **Transport**: Line-delimited JSON over TCP
//! - **Server**: TCP accept loop with cooperative shutdown

pub mod connection;
pub mod groups;
pub mod history;
pub mod metrics;
pub mod registry;
pub mod routing;
pub mod server;
pub mod transport;

mod error;
mod types;

pub use connection::{ConnectionActor, MessageSink, MessageSource};
pub use error::{RouterError, TransportError};
pub use routing::{DeliveryReport, DispatchOutcome, Router, RouterConfig, SessionHandle};
pub use server::{start, ChatServer, ChatServerConfig};
pub use types::*;
