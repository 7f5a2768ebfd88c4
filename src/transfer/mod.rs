pub mod exchange;

pub use exchange::{FileExchange, FileRecord};
