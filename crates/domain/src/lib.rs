pub mod compaction;
pub mod config;
pub mod error;
pub mod event;
pub mod mailbox;
pub mod message;
pub mod run;
pub mod stream;
pub mod ui;

pub use error::{Error, Result};
