pub mod cli;
pub mod config;
pub mod error;
pub mod redemption;
pub mod schedule;
pub mod storage;
pub mod utils;

pub use config::Config;
pub use error::{EngineError, Rejection, Result};
