//! Mini Gossip P2P Library
//!
//! A small peer-to-peer node: peers learn about each other by gossiping
//! peer lists stamped with Lamport clocks, and share files from a local
//! directory over a line-oriented TCP protocol.

pub mod core;
pub mod network;
pub mod storage;
pub mod transfer;
pub mod utils;

// Re-export main types
pub use crate::core::{Config, LogicalClock, Message, MessageType, Node, PeerIdentity, PeerRegistry, PeerState};
pub use crate::network::{ConnectionServer, DiscoveryClient, PullSummary};
pub use crate::storage::{FileEntry, FileManager};
pub use crate::transfer::{FileExchange, FileRecord};
pub use crate::utils::{
    NodeUtils,
    error::{P2PError, Result},
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
