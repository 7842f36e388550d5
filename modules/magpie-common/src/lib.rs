pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, EmbeddingConfig};
pub use error::{MagpieError, Result};
pub use types::*;
