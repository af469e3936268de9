// Makita Key Tracker
// Pressed keys and device presence, derived from the inbound event stream

use smallvec::SmallVec;
use std::collections::HashMap;

use crate::bridge::{QueryKind, StateQuery, StateResponse};
use crate::event::{Action, Event};
use crate::key::Key;

/// Key state as seen on the input side.
///
/// The host feeds it each event as the runtime dispatches it, so answers
/// reflect what the scripts have been sent so far.
#[derive(Debug)]
pub struct KeyTracker {
    /// Key code -> last down action (Press or Hold)
    pressed: HashMap<u16, Action>,
    connected: bool,
}

impl KeyTracker {
    pub fn new() -> Self {
        Self {
            pressed: HashMap::new(),
            connected: true,
        }
    }

    /// Update from one input event; non-key events are ignored
    pub fn observe(&mut self, event: &Event) {
        let (Some(key), Some(action)) = (event.key_identity(), event.action()) else {
            return;
        };
        if action.is_down() {
            self.pressed.insert(key.code(), action);
        } else {
            self.pressed.remove(&key.code());
        }
    }

    pub fn is_pressed(&self, code: u16) -> bool {
        self.pressed.contains_key(&code)
    }

    pub fn len(&self) -> usize {
        self.pressed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pressed.is_empty()
    }

    /// Pressed modifier codes, sorted for stable comparison
    pub fn modifier_snapshot(&self) -> SmallVec<[u16; 4]> {
        let mut mods: SmallVec<[u16; 4]> = self
            .pressed
            .keys()
            .copied()
            .filter(|code| Key::from(*code).is_modifier())
            .collect();

        mods.sort();
        mods
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
        if !connected {
            self.pressed.clear();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn clear(&mut self) {
        self.pressed.clear();
    }

    /// Answer a state query from tracked state; unknown kinds answer `false`
    pub fn answer(&self, query: &StateQuery) -> StateResponse {
        match &query.kind {
            QueryKind::KeyState => {
                let pressed = query
                    .arg
                    .and_then(|code| u16::try_from(code).ok())
                    .is_some_and(|code| self.is_pressed(code));
                StateResponse::Flag(pressed)
            }
            QueryKind::ModifierState => StateResponse::modifiers(self.modifier_snapshot()),
            QueryKind::DeviceConnected => StateResponse::Flag(self.connected),
            QueryKind::Custom(_) => StateResponse::Flag(false),
        }
    }
}

impl Default for KeyTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, Timestamp};

    #[test]
    fn test_tracker_new() {
        let tracker = KeyTracker::new();
        assert!(tracker.is_empty());
        assert!(tracker.is_connected());
    }

    #[test]
    fn test_press_hold_release() {
        let mut tracker = KeyTracker::new();
        tracker.observe(&Event::key(30, Action::Press));
        assert!(tracker.is_pressed(30));

        tracker.observe(&Event::key(30, Action::Hold));
        assert!(tracker.is_pressed(30));
        assert_eq!(tracker.len(), 1);

        tracker.observe(&Event::key(30, Action::Release));
        assert!(!tracker.is_pressed(30));
    }

    #[test]
    fn test_non_key_events_ignored() {
        let mut tracker = KeyTracker::new();
        tracker.observe(&Event::new(EventType::RELATIVE, 30, 1, Timestamp::default()));
        tracker.observe(&Event::key(0, Action::Press));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_modifier_snapshot_sorted() {
        let mut tracker = KeyTracker::new();
        tracker.observe(&Event::key(56, Action::Press)); // LEFT_ALT
        tracker.observe(&Event::key(30, Action::Press)); // A
        tracker.observe(&Event::key(29, Action::Press)); // LEFT_CTRL

        assert_eq!(tracker.modifier_snapshot().as_slice(), &[29, 56]);
    }

    #[test]
    fn test_answers() {
        let mut tracker = KeyTracker::new();
        tracker.observe(&Event::key(42, Action::Press));

        assert_eq!(tracker.answer(&StateQuery::key_state(42)), StateResponse::Flag(true));
        assert_eq!(tracker.answer(&StateQuery::key_state(30)), StateResponse::Flag(false));
        assert_eq!(
            tracker.answer(&StateQuery::modifier_state()),
            StateResponse::Codes(vec![42])
        );
        assert_eq!(
            tracker.answer(&StateQuery::new(QueryKind::KeyState, Some(-1))),
            StateResponse::Flag(false)
        );
        assert_eq!(
            tracker.answer(&StateQuery::new(QueryKind::Custom("Battery".into()), None)),
            StateResponse::Flag(false)
        );

        tracker.set_connected(false);
        assert_eq!(
            tracker.answer(&StateQuery::device_connected()),
            StateResponse::Flag(false)
        );
        assert!(tracker.is_empty());
    }
}
