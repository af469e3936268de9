// Makita Bridges
// Outbound synthetic events and inbound state answers between scripts and the host

pub mod output;
pub mod query;

pub use output::OutputBridge;
pub use query::{
    PendingQuery, QueryAnswer, QueryBridge, QueryError, QueryKind, QueryRequest, StateQuery,
    StateResponse,
};
