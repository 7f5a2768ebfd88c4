pub mod clock;
pub mod config;
pub mod node;
pub mod peer;
pub mod protocol;

pub use clock::LogicalClock;
pub use config::Config;
pub use node::Node;
pub use peer::{PeerIdentity, PeerRecord, PeerRegistry, PeerState, UpsertOutcome};
pub use protocol::{FilePayload, Message, MessageType, PeerEntry};
