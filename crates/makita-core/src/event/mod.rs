// Makita Event Model
// Immutable input events, key value classification and the JSON wire form

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::key::Key;

/// Event type as supplied by the host.
///
/// The scheduler treats it as an opaque integer; the constants only name the
/// Linux values used by the key helpers and scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(pub u16);

impl EventType {
    pub const SYN: EventType = EventType(0x00);
    pub const KEY: EventType = EventType(0x01);
    pub const RELATIVE: EventType = EventType(0x02);
    pub const ABSOLUTE: EventType = EventType(0x03);
    pub const SWITCH: EventType = EventType(0x05);
    pub const LED: EventType = EventType(0x11);
    pub const SOUND: EventType = EventType(0x12);
    pub const FORCE_FEEDBACK: EventType = EventType(0x15);
}

/// Key event value.
///
/// From `evtest` output:
///   0 == 'released'
///   1 == 'pressed'
///   2 == 'held' (autorepeat)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Action {
    Release = 0,
    Press = 1,
    Hold = 2,
}

impl Action {
    /// Create Action from an evdev value
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(Action::Release),
            1 => Some(Action::Press),
            2 => Some(Action::Hold),
            _ => None,
        }
    }

    pub fn value(self) -> i32 {
        self as i32
    }

    /// Returns true for both the initial press and autorepeat
    pub fn is_down(self) -> bool {
        matches!(self, Action::Press | Action::Hold)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Release => write!(f, "release"),
            Action::Press => write!(f, "press"),
            Action::Hold => write!(f, "hold"),
        }
    }
}

/// Event timestamp as delivered by the host (monotonic or wall clock).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    pub sec: u64,
    pub nsec: u32,
}

impl Timestamp {
    pub fn new(sec: u64, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    /// Wall-clock timestamp for events built inside the engine
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::new(elapsed.as_secs(), elapsed.subsec_nanos())
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.sec as f64 + f64::from(self.nsec) / 1_000_000_000.0
    }
}

/// One input event.
///
/// Fields are private so an event cannot change after construction; every
/// predicate is a pure function of the stored fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    event_type: EventType,
    code: u16,
    value: i32,
    timestamp: Timestamp,
    script: Option<String>,
}

impl Event {
    pub fn new(event_type: EventType, code: u16, value: i32, timestamp: Timestamp) -> Self {
        Self {
            event_type,
            code,
            value,
            timestamp,
            script: None,
        }
    }

    /// Key event stamped with the current time
    pub fn key(code: u16, action: Action) -> Self {
        Self::new(EventType::KEY, code, action.value(), Timestamp::now())
    }

    /// Address this event at a single script
    pub fn targeted(mut self, script: impl Into<String>) -> Self {
        let script = script.into();
        self.script = if script.is_empty() { None } else { Some(script) };
        self
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn value(&self) -> i32 {
        self.value
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Script this event is addressed to, if any
    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }

    pub fn is_key_event(&self) -> bool {
        self.event_type == EventType::KEY
    }

    pub fn action(&self) -> Option<Action> {
        if self.is_key_event() {
            Action::from_value(self.value)
        } else {
            None
        }
    }

    pub fn is_key_down(&self) -> bool {
        self.action() == Some(Action::Press)
    }

    pub fn is_key_up(&self) -> bool {
        self.action() == Some(Action::Release)
    }

    pub fn is_key_hold(&self) -> bool {
        self.action() == Some(Action::Hold)
    }

    /// The key this event refers to; code 0 means "no key"
    pub fn key_identity(&self) -> Option<Key> {
        if self.is_key_event() && self.code != 0 {
            Some(Key(self.code))
        } else {
            None
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type={} code={} value={}",
            self.event_type.0, self.code, self.value
        )?;
        if let Some(script) = &self.script {
            write!(f, " script={}", script)?;
        }
        Ok(())
    }
}

/// JSON shape of an inbound event (`EVENT:<json>` and embedded hosts)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEvent {
    pub event_type: u16,
    pub code: u16,
    pub value: i32,
    #[serde(default)]
    pub timestamp_sec: u64,
    #[serde(default)]
    pub timestamp_nsec: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

impl From<WireEvent> for Event {
    fn from(wire: WireEvent) -> Self {
        let event = Event::new(
            EventType(wire.event_type),
            wire.code,
            wire.value,
            Timestamp::new(wire.timestamp_sec, wire.timestamp_nsec),
        );
        match wire.script {
            Some(script) => event.targeted(script),
            None => event,
        }
    }
}

/// Event produced by a script for the host to inject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticEvent {
    pub event_type: u16,
    pub code: u16,
    pub value: i32,
    /// Script that emitted the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

impl SyntheticEvent {
    pub fn new(event_type: EventType, code: u16, value: i32) -> Self {
        Self {
            event_type: event_type.0,
            code,
            value,
            script: None,
        }
    }

    pub fn key(code: u16, action: Action) -> Self {
        Self::new(EventType::KEY, code, action.value())
    }

    pub fn with_script(mut self, script: &str) -> Self {
        self.script = Some(script.to_string());
        self
    }

    /// (type, code, value) triple, convenient for assertions and hooks
    pub fn triple(&self) -> (u16, u16, i32) {
        (self.event_type, self.code, self.value)
    }
}
