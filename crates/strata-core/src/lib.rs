pub mod config;
pub mod error;

pub use config::StrataConfig;
pub use error::{StrataError, StrataResult};
