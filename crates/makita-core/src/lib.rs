// Makita Core Library
// Cooperative script engine for an input-remapping daemon

pub mod bridge;
pub mod dispatch;
pub mod event;
pub mod host;
pub mod key;
pub mod notification;
pub mod scheduler;
pub mod script;
pub mod settings;
pub mod state;

pub use bridge::{
    OutputBridge, QueryAnswer, QueryBridge, QueryError, QueryKind, QueryRequest, StateQuery,
    StateResponse,
};
pub use dispatch::Addressing;
pub use event::{Action, Event, EventType, SyntheticEvent, Timestamp, WireEvent};
pub use host::{
    EmbeddedHost, Host, HostError, HostHooks, HostResult, Inbound, LineHost, MemoryHost, Polled,
};
pub use key::Key;
pub use notification::{Disposition, Fault, Notification};
pub use scheduler::{
    Clock, Flow, ManualClock, Runtime, RuntimeConfig, RuntimeError, SystemClock, TaskId,
    TaskState,
};
pub use script::{LoadError, ScriptDefinition, ScriptRegistry};
pub use settings::{Settings, SettingsError};
pub use state::KeyTracker;
