pub mod discovery;
pub mod server;
pub mod transport;

pub use discovery::{DiscoveryClient, PullSummary};
pub use server::ConnectionServer;
pub use transport::Transport;
