// Makita Notifications
// Everything the runtime reports to its host besides synthetic events and queries

use std::fmt;

use crate::event::Event;

/// How a script finished handling one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The script called `consume()`
    Consume,
    /// Default, and the result of a failed handler
    PassThrough,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Consume => write!(f, "consume"),
            Disposition::PassThrough => write!(f, "pass-through"),
        }
    }
}

/// Contained failures; none of these stop the scheduler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("{message}")]
    Load { name: String, message: String },

    #[error("script busy: {script}")]
    Busy { script: String },

    #[error("script not loaded: {script}")]
    NotLoaded { script: String },

    #[error("handler error in {script}: {message}")]
    Handler { script: String, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Fault {
    /// Script the fault belongs to, if any
    pub fn script(&self) -> Option<&str> {
        match self {
            Fault::Load { name, .. } => Some(name),
            Fault::Busy { script } | Fault::NotLoaded { script } => Some(script),
            Fault::Handler { script, .. } => Some(script),
            Fault::Protocol(_) => None,
        }
    }
}

/// Message from the runtime to the host
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Emitted once, before the first poll
    Ready,
    Loaded {
        name: String,
    },
    Error(Fault),
    /// A handling cycle ended (task went idle, finished or failed)
    Outcome {
        script: String,
        event: Event,
        disposition: Disposition,
    },
    /// A script called `log(level, message)`
    Log {
        script: Option<String>,
        level: log::Level,
        message: String,
    },
}

impl Notification {
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Notification::Error(fault) => Some(fault),
            _ => None,
        }
    }
}
