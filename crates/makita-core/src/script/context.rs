// Makita Script Context
// State shared between the scheduler and the Rust functions scripts call

use std::cell::RefCell;
use std::rc::Rc;

use crate::bridge::OutputBridge;
use crate::event::SyntheticEvent;

/// Handle the Lua callbacks capture
pub type SharedContext = Rc<RefCell<ScriptContext>>;

/// One line logged by a script through `log(level, message)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLog {
    pub script: Option<String>,
    pub level: log::Level,
    pub message: String,
}

#[derive(Debug)]
struct ActiveSlice {
    script: String,
    consumed: bool,
}

/// Output bridge plus the identity of the task currently executing.
///
/// Only one task runs at a time, so a single slot is enough. The scheduler
/// must not hold a borrow across a coroutine resume.
#[derive(Debug, Default)]
pub struct ScriptContext {
    output: OutputBridge,
    active: Option<ActiveSlice>,
    logs: Vec<ScriptLog>,
}

impl ScriptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedContext {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Start an execution slice for `script`
    pub fn begin(&mut self, script: &str) {
        self.active = Some(ActiveSlice {
            script: script.to_string(),
            consumed: false,
        });
    }

    /// End the slice; returns whether the script called `consume()` during it
    pub fn end(&mut self) -> bool {
        self.active.take().map(|slice| slice.consumed).unwrap_or(false)
    }

    pub fn active_script(&self) -> Option<&str> {
        self.active.as_ref().map(|slice| slice.script.as_str())
    }

    /// Queue a synthetic event on behalf of the running script
    pub fn emit(&mut self, event: SyntheticEvent, primitive: &str) -> Result<(), String> {
        let script = self
            .active_script()
            .ok_or_else(|| format!("{} must be called from a script task", primitive))?
            .to_string();
        self.output.emit(event.with_script(&script));
        Ok(())
    }

    pub fn consume(&mut self) -> Result<(), String> {
        match self.active.as_mut() {
            Some(slice) => {
                slice.consumed = true;
                Ok(())
            }
            None => Err("consume must be called from a script task".to_string()),
        }
    }

    pub fn log(&mut self, level: log::Level, message: String) {
        let script = self.active_script().map(str::to_string);
        self.logs.push(ScriptLog {
            script,
            level,
            message,
        });
    }

    pub fn take_logs(&mut self) -> Vec<ScriptLog> {
        std::mem::take(&mut self.logs)
    }

    pub fn flush_output(&mut self) -> Vec<SyntheticEvent> {
        self.output.flush()
    }

    pub fn discard_output(&mut self) -> usize {
        self.output.discard()
    }

    pub fn pending_output(&self) -> usize {
        self.output.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Action;

    #[test]
    fn test_emit_requires_active_script() {
        let mut ctx = ScriptContext::new();
        assert!(ctx.emit(SyntheticEvent::key(30, Action::Press), "press").is_err());

        ctx.begin("echo");
        ctx.emit(SyntheticEvent::key(30, Action::Press), "press").unwrap();
        assert!(!ctx.end());

        let out = ctx.flush_output();
        assert_eq!(out[0].script.as_deref(), Some("echo"));
    }

    #[test]
    fn test_consume_is_per_slice() {
        let mut ctx = ScriptContext::new();
        ctx.begin("a");
        ctx.consume().unwrap();
        assert!(ctx.end());

        ctx.begin("a");
        assert!(!ctx.end());
        assert!(ctx.consume().is_err());
    }

    #[test]
    fn test_logs_carry_script_name() {
        let mut ctx = ScriptContext::new();
        ctx.log(log::Level::Info, "boot".into());
        ctx.begin("caps");
        ctx.log(log::Level::Warn, "hi".into());
        ctx.end();

        let logs = ctx.take_logs();
        assert_eq!(logs[0].script, None);
        assert_eq!(logs[1].script.as_deref(), Some("caps"));
        assert!(ctx.take_logs().is_empty());
    }
}
