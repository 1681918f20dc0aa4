pub mod config;
pub mod error;
pub mod log;
pub mod types;

pub use config::ProxyConfig;
pub use error::{KnownErrorKind, ProxyError};
pub use types::*;
