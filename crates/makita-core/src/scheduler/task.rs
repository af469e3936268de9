// Makita Script Tasks
// One cooperative execution context per script, backed by a Lua coroutine

use std::fmt;
use std::time::Duration;

use mlua::{Thread, Value};

use crate::bridge::{StateQuery, StateResponse};
use crate::bridge::QueryKind;
use crate::event::Event;

/// Identity of one task instance; a script gets a new id every time its task is recreated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Task lifecycle.
///
/// Idle -> Running -> {SleepWaiting, QueryWaiting, Idle} -> ... -> Dead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created or finished a handling cycle; ready for the next event
    Idle,
    /// Runnable; will execute on the next run-queue drain
    Running,
    /// Parked until a deadline
    SleepWaiting,
    /// Parked until the host answers query `id`
    QueryWaiting { id: u64 },
    /// Body returned or failed; removed from the live set
    Dead,
}

impl TaskState {
    pub fn is_idle(self) -> bool {
        matches!(self, TaskState::Idle)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Idle => write!(f, "idle"),
            TaskState::Running => write!(f, "running"),
            TaskState::SleepWaiting => write!(f, "sleep-waiting"),
            TaskState::QueryWaiting { id } => write!(f, "query-waiting({})", id),
            TaskState::Dead => write!(f, "dead"),
        }
    }
}

/// Value handed to a task when it is resumed
#[derive(Debug, Clone, PartialEq)]
pub enum Resume {
    /// A new input event (first resume or after Idle)
    Event(Event),
    /// Its sleep deadline passed
    Wake,
    /// The host answered its pending query
    Answer(StateResponse),
}

/// Where a resumed task stopped
#[derive(Debug, Clone, PartialEq)]
pub enum Suspension {
    /// Back to Idle, ready for the next event
    Idle,
    Sleep(Duration),
    Query(StateQuery),
}

/// Errors decoding what a coroutine yielded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SuspensionError {
    #[error("sleep expects a non-negative number of seconds")]
    BadSleep,

    #[error("state query without a kind")]
    MissingQueryKind,

    #[error("unknown suspension '{0}'")]
    Unknown(String),
}

/// One logical handler in progress.
///
/// Private locals live inside the coroutine and are discarded with it.
pub struct Task {
    id: TaskId,
    script: String,
    state: TaskState,
    thread: Thread,
    inbox: Option<Resume>,
    cycle_event: Option<Event>,
    consumed: bool,
    /// Script was reloaded; retire after the current cycle
    stale: bool,
}

impl Task {
    pub fn new(id: TaskId, script: &str, thread: Thread) -> Self {
        Self {
            id,
            script: script.to_string(),
            state: TaskState::Idle,
            thread,
            inbox: None,
            cycle_event: None,
            consumed: false,
            stale: false,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    /// Fill the input slot and make the task runnable
    pub fn schedule(&mut self, input: Resume) {
        if let Resume::Event(event) = &input {
            self.cycle_event = Some(event.clone());
            self.consumed = false;
        }
        self.inbox = Some(input);
        self.state = TaskState::Running;
    }

    pub fn take_input(&mut self) -> Option<Resume> {
        self.inbox.take()
    }

    pub fn mark_consumed(&mut self) {
        self.consumed = true;
    }

    pub fn consumed(&self) -> bool {
        self.consumed
    }

    /// End the current handling cycle, returning its event and consume flag
    pub fn finish_cycle(&mut self) -> Option<(Event, bool)> {
        let consumed = std::mem::take(&mut self.consumed);
        self.cycle_event.take().map(|event| (event, consumed))
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("script", &self.script)
            .field("state", &self.state)
            .field("consumed", &self.consumed)
            .field("stale", &self.stale)
            .finish()
    }
}

/// Decode the values a task coroutine yielded.
///
/// The prelude yields `("idle")`, `("sleep", seconds)` or `("query", kind, arg)`;
/// a bare `coroutine.yield()` counts as going idle.
pub fn decode_suspension(
    op: Option<String>,
    first: Value,
    arg: Option<i64>,
) -> Result<Suspension, SuspensionError> {
    match op.as_deref() {
        None | Some("idle") => Ok(Suspension::Idle),
        Some("sleep") => {
            let seconds = match first {
                Value::Integer(n) => n as f64,
                Value::Number(n) => n,
                _ => return Err(SuspensionError::BadSleep),
            };
            Duration::try_from_secs_f64(seconds)
                .map(Suspension::Sleep)
                .map_err(|_| SuspensionError::BadSleep)
        }
        Some("query") => {
            let kind = match first {
                Value::String(name) => name.to_string_lossy().to_string(),
                _ => return Err(SuspensionError::MissingQueryKind),
            };
            Ok(Suspension::Query(StateQuery::new(QueryKind::from(kind), arg)))
        }
        Some(other) => Err(SuspensionError::Unknown(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_idle() {
        assert_eq!(decode_suspension(None, Value::Nil, None), Ok(Suspension::Idle));
        assert_eq!(
            decode_suspension(Some("idle".into()), Value::Nil, None),
            Ok(Suspension::Idle)
        );
    }

    #[test]
    fn test_decode_sleep() {
        assert_eq!(
            decode_suspension(Some("sleep".into()), Value::Number(0.25), None),
            Ok(Suspension::Sleep(Duration::from_millis(250)))
        );
        assert_eq!(
            decode_suspension(Some("sleep".into()), Value::Integer(2), None),
            Ok(Suspension::Sleep(Duration::from_secs(2)))
        );
        assert_eq!(
            decode_suspension(Some("sleep".into()), Value::Number(-1.0), None),
            Err(SuspensionError::BadSleep)
        );
        assert_eq!(
            decode_suspension(Some("sleep".into()), Value::Nil, None),
            Err(SuspensionError::BadSleep)
        );
    }

    #[test]
    fn test_decode_sleep_out_of_range() {
        for seconds in [1e30, f64::INFINITY, f64::NAN] {
            assert_eq!(
                decode_suspension(Some("sleep".into()), Value::Number(seconds), None),
                Err(SuspensionError::BadSleep)
            );
        }
    }

    #[test]
    fn test_decode_unknown() {
        assert_eq!(
            decode_suspension(Some("teleport".into()), Value::Nil, None),
            Err(SuspensionError::Unknown("teleport".into()))
        );
        assert_eq!(
            decode_suspension(Some("query".into()), Value::Nil, None),
            Err(SuspensionError::MissingQueryKind)
        );
    }

    #[test]
    fn test_task_cycle_bookkeeping() {
        let lua = mlua::Lua::new();
        let body = lua.create_function(|_, ()| Ok(())).unwrap();
        let thread = lua.create_thread(body).unwrap();
        let mut task = Task::new(TaskId(1), "echo", thread);
        assert!(task.state().is_idle());

        let event = Event::key(30, crate::event::Action::Press);
        task.schedule(Resume::Event(event.clone()));
        assert_eq!(task.state(), TaskState::Running);
        task.mark_consumed();

        assert_eq!(task.take_input(), Some(Resume::Event(event.clone())));
        assert_eq!(task.take_input(), None);
        assert_eq!(task.finish_cycle(), Some((event, true)));
        assert!(!task.consumed());
        assert_eq!(task.finish_cycle(), None);
    }
}
