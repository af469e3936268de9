// Makita State Query Bridge
// Request/response channel between parked script tasks and host-owned state

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum_macros::EnumString;

use crate::scheduler::task::TaskId;

/// Kind of host state a script can ask about.
///
/// The set is host-defined; unknown names are carried through as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumString, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QueryKind {
    KeyState,
    ModifierState,
    DeviceConnected,
    #[strum(default)]
    Custom(String),
}

impl QueryKind {
    pub fn as_str(&self) -> &str {
        match self {
            QueryKind::KeyState => "KeyState",
            QueryKind::ModifierState => "ModifierState",
            QueryKind::DeviceConnected => "DeviceConnected",
            QueryKind::Custom(name) => name,
        }
    }
}

impl From<String> for QueryKind {
    fn from(name: String) -> Self {
        name.parse().unwrap_or(QueryKind::Custom(name))
    }
}

impl From<QueryKind> for String {
    fn from(kind: QueryKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A question about host state, with its optional argument (a key code for `KeyState`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateQuery {
    pub kind: QueryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg: Option<i64>,
}

impl StateQuery {
    pub fn new(kind: QueryKind, arg: Option<i64>) -> Self {
        Self { kind, arg }
    }

    pub fn key_state(code: u16) -> Self {
        Self::new(QueryKind::KeyState, Some(i64::from(code)))
    }

    pub fn modifier_state() -> Self {
        Self::new(QueryKind::ModifierState, None)
    }

    pub fn device_connected() -> Self {
        Self::new(QueryKind::DeviceConnected, None)
    }
}

/// Answer delivered back to a parked task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateResponse {
    Flag(bool),
    Number(i64),
    Codes(Vec<u16>),
    Text(String),
}

impl StateResponse {
    pub fn modifiers(codes: SmallVec<[u16; 4]>) -> Self {
        StateResponse::Codes(codes.into_vec())
    }

    /// Interpret a host reply string (`true`, `42`, `[29,42]`, or free text)
    pub fn parse_host_reply(reply: &str) -> Self {
        let trimmed = reply.trim();
        serde_json::from_str(trimmed).unwrap_or_else(|_| StateResponse::Text(trimmed.to_string()))
    }
}

/// Request forwarded to the host; `id` pairs it with exactly one answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub id: u64,
    pub script: String,
    #[serde(flatten)]
    pub query: StateQuery,
}

/// Answer received from the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub id: u64,
    pub response: StateResponse,
}

/// Errors raised by the query bridge
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("script '{script}' issued a state query while query {pending} is still unanswered")]
    AlreadyPending { script: String, pending: u64 },
}

/// Task that is parked on a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQuery {
    pub script: String,
    pub task: TaskId,
}

/// Bookkeeping for outstanding queries.
///
/// At most one query per task may be outstanding; requests wait in `outgoing`
/// until the scheduler forwards them to the host.
#[derive(Debug, Default)]
pub struct QueryBridge {
    next_id: u64,
    pending: HashMap<u64, PendingQuery>,
    outgoing: Vec<QueryRequest>,
}

impl QueryBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a query for `task` and queue it for forwarding
    pub fn issue(
        &mut self,
        script: &str,
        task: TaskId,
        query: StateQuery,
    ) -> Result<u64, QueryError> {
        if let Some((id, _)) = self.pending.iter().find(|(_, p)| p.task == task) {
            return Err(QueryError::AlreadyPending {
                script: script.to_string(),
                pending: *id,
            });
        }

        self.next_id += 1;
        let id = self.next_id;
        self.pending.insert(
            id,
            PendingQuery {
                script: script.to_string(),
                task,
            },
        );
        self.outgoing.push(QueryRequest {
            id,
            script: script.to_string(),
            query,
        });
        Ok(id)
    }

    /// Match an answer to its request; `None` for unknown or already answered ids
    pub fn resolve(&mut self, id: u64) -> Option<PendingQuery> {
        self.pending.remove(&id)
    }

    /// Forget any query held by a task that is going away
    pub fn cancel_task(&mut self, task: TaskId) {
        self.pending.retain(|_, p| p.task != task);
        self.outgoing.retain(|request| self.pending.contains_key(&request.id));
    }

    /// Requests not yet forwarded, in issuance order
    pub fn take_outgoing(&mut self) -> Vec<QueryRequest> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.outgoing.clear();
    }
}
