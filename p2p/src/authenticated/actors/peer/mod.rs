//! Deliver outbound messages to a single peer.

mod actor;
mod ingress;

pub use actor::Actor;
pub use ingress::Mailbox;
