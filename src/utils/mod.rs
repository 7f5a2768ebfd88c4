pub mod error;
pub mod logger;
pub mod node_utils;

pub use error::{P2PError, Result};
pub use logger::setup_logging;
pub use node_utils::NodeUtils;
