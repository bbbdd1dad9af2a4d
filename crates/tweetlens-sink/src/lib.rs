//! `tweetlens-sink` — SQLite storage for job results.
//!
//! One table per registered job type, created at start-up from the type's
//! target table and field list.

pub mod db;
pub mod sqlite;

pub use sqlite::SqliteSink;
