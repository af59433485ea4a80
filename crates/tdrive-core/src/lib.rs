pub mod config;
pub mod error;
pub mod types;

pub use error::{TdriveError, TdriveResult};
pub use types::{ItemKind, TransferKind};
