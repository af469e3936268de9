// Makita Hosts
// Transports between the runtime and whatever captures and injects input

pub mod embedded;
pub mod line;
pub mod memory;

use std::path::PathBuf;
use std::time::Duration;

use crate::bridge::{QueryAnswer, QueryRequest};
use crate::event::{Event, SyntheticEvent};
use crate::notification::Notification;

pub use embedded::{EmbeddedHost, HostHooks};
pub use line::LineHost;
pub use memory::MemoryHost;

/// Result type for host operations
pub type HostResult<T> = Result<T, HostError>;

/// Failures of the transport itself; these end the scheduler loop
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("readiness descriptor error: {0}")]
    Readiness(String),
}

/// One item received from the host
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Load or reload a script file
    Load { name: String, path: PathBuf },
    Event(Event),
    /// Answer to a forwarded state query
    Answer(QueryAnswer),
    /// Input the transport could not understand
    Malformed(String),
}

/// Result of one bounded wait on the host
#[derive(Debug, Clone, PartialEq)]
pub enum Polled {
    /// Zero or more items, in arrival order
    Items(Vec<Inbound>),
    /// The input source is exhausted
    Closed,
}

/// Transport binding.
///
/// `poll` must return within `timeout`; everything else is called once per
/// scheduler iteration with whatever the runtime produced.
pub trait Host {
    fn poll(&mut self, timeout: Duration) -> HostResult<Polled>;

    /// Called with each input event right before the runtime dispatches it
    fn observe(&mut self, _event: &Event) {}

    fn deliver(&mut self, events: Vec<SyntheticEvent>) -> HostResult<()>;

    fn forward_query(&mut self, request: QueryRequest) -> HostResult<()>;

    fn notify(&mut self, notification: Notification) -> HostResult<()>;
}
