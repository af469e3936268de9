// Makita Synthetic Output Bridge
// FIFO of script-emitted events, drained once per scheduler iteration

use crate::event::SyntheticEvent;

/// Ordered outbound queue of synthetic events.
///
/// `emit` never blocks or fails; `flush` hands back everything queued so far
/// in emission order and leaves the queue empty.
#[derive(Debug, Default)]
pub struct OutputBridge {
    queue: Vec<SyntheticEvent>,
}

impl OutputBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event; ownership moves into the queue
    pub fn emit(&mut self, event: SyntheticEvent) {
        self.queue.push(event);
    }

    /// Drain the queue, preserving emission order
    pub fn flush(&mut self) -> Vec<SyntheticEvent> {
        std::mem::take(&mut self.queue)
    }

    /// Drop everything still queued (shutdown)
    pub fn discard(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Action;

    #[test]
    fn test_flush_preserves_emission_order() {
        let mut bridge = OutputBridge::new();
        bridge.emit(SyntheticEvent::key(30, Action::Press));
        bridge.emit(SyntheticEvent::key(30, Action::Release));
        bridge.emit(SyntheticEvent::key(31, Action::Press));

        let flushed: Vec<_> = bridge.flush().iter().map(|e| e.triple()).collect();
        assert_eq!(flushed, vec![(1, 30, 1), (1, 30, 0), (1, 31, 1)]);
        assert!(bridge.is_empty());
    }

    #[test]
    fn test_second_flush_only_sees_new_events() {
        let mut bridge = OutputBridge::new();
        bridge.emit(SyntheticEvent::key(30, Action::Press));
        assert_eq!(bridge.flush().len(), 1);

        bridge.emit(SyntheticEvent::key(31, Action::Press));
        let second = bridge.flush();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].code, 31);
    }

    #[test]
    fn test_discard() {
        let mut bridge = OutputBridge::new();
        bridge.emit(SyntheticEvent::key(30, Action::Press));
        assert_eq!(bridge.discard(), 1);
        assert!(bridge.flush().is_empty());
    }
}
