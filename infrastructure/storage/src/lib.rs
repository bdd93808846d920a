//! Storage backends, repositories and sinks the snapshot engine runs on.

mod account;
pub mod backend;
mod event_log;
mod marker;

#[rustfmt::skip]
pub use {
    account::StaticAccountRepo,
    event_log::{JsonLinesEventLog, MemoryEventLog},
    marker::{FileMarkerRepo, MemoryMarkerRepo},
};
