//! Session Registry for real-time message routing.
//!
//! Each connection registers the sending half of its outbound queue once
//! its handshake arrives. Messages can then be routed to any registered
//! client by identity.
//!
//! ```text
//! ConnectionActor (Alice) <-> SessionRegistry <-> ConnectionActor (Bob)
//!          |                         |                     |
//!          v                         v                     v
//!   mpsc::Sender<Outbound>   DashMap<Identity,     mpsc::Sender<Outbound>
//!                               SessionEntry>
//! ```

mod session_registry;

pub(crate) use session_registry::try_enqueue;
pub use session_registry::{
    Delivery, Outbound, PendingDelivery, SendResult, SessionEntry, SessionId, SessionRegistry,
};
