// Makita Event Dispatcher
// Decides which scripts see an event and whether their task can take it

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::event::Event;
use crate::scheduler::TaskState;

/// How events are matched to scripts
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Addressing {
    /// Targeted when the event names a script, broadcast otherwise
    #[default]
    Auto,
    /// Every event must name exactly one script
    Targeted,
    /// Every registered script sees every event, in registration order
    Broadcast,
}

impl Addressing {
    pub fn parse(name: &str) -> Option<Self> {
        Self::from_str(name).ok()
    }
}

/// Where one event goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Script(String),
    Broadcast,
    /// Targeted mode, but the event names no script
    Unaddressed,
}

pub fn route(addressing: Addressing, event: &Event) -> Route {
    match (addressing, event.script()) {
        (Addressing::Broadcast, _) => Route::Broadcast,
        (_, Some(script)) => Route::Script(script.to_string()),
        (Addressing::Auto, None) => Route::Broadcast,
        (Addressing::Targeted, None) => Route::Unaddressed,
    }
}

/// What to do with an event for one target script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// No live task: create one and hand it the event
    Spawn,
    /// Live and idle: hand it the event
    Hand,
    /// Live and mid-cycle: drop the event
    Busy,
}

/// Admission rule given the state of the script's live task, if any
pub fn admit(live: Option<TaskState>) -> Admission {
    match live {
        None | Some(TaskState::Dead) => Admission::Spawn,
        Some(TaskState::Idle) => Admission::Hand,
        Some(_) => Admission::Busy,
    }
}
