pub mod config;
pub mod error;
pub mod message;
pub mod paths;
pub mod sink;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{Error, Result, ToolError};
pub use message::{InboundMessage, OutboundMessage};
pub use paths::Paths;
pub use sink::OutputSink;
pub use store::HistoryStore;
