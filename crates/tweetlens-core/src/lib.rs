//! `tweetlens-core` — configuration and shared error types.

pub mod config;
pub mod error;

pub use config::TweetlensConfig;
pub use error::{CoreError, Result};
