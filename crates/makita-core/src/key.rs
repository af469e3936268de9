// Makita Key Table
// Symbolic key names, printable characters and modifier detection for Linux key codes

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use indexmap::IndexMap;

/// Represents a single keyboard key code.
///
/// The numeric values match Linux input-event-codes.h definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Key(pub u16);

impl Key {
    pub const RESERVED: Key = Key(0);
    pub const LEFT_CTRL: Key = Key(29);
    pub const LEFT_SHIFT: Key = Key(42);
    pub const RIGHT_SHIFT: Key = Key(54);
    pub const LEFT_ALT: Key = Key(56);
    pub const RIGHT_CTRL: Key = Key(97);
    pub const RIGHT_ALT: Key = Key(100);
    pub const LEFT_META: Key = Key(125);
    pub const RIGHT_META: Key = Key(126);

    /// Get the raw numeric code value
    pub fn code(self) -> u16 {
        self.0
    }

    /// Get the canonical name of this key ("UNKNOWN" when not in the table)
    pub fn name(self) -> &'static str {
        key_name(self.0)
    }

    /// True for the shift/ctrl/alt/meta keys on either side
    pub fn is_modifier(self) -> bool {
        MODIFIER_KEY_CODES.contains(&self.0)
    }
}

impl From<u16> for Key {
    fn from(code: u16) -> Self {
        Key(code)
    }
}

impl From<Key> for u16 {
    fn from(key: Key) -> Self {
        key.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Key {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        key_from_name(s).ok_or_else(|| format!("Unknown key: {}", s))
    }
}

/// Key codes of the eight standard modifier keys.
pub const MODIFIER_KEY_CODES: [u16; 8] = [29, 42, 54, 56, 97, 100, 125, 126];

/// Canonical key names, in code order.
const KEY_TABLE: &[(&str, u16)] = &[
    ("RESERVED", 0),
    ("ESC", 1),
    ("KEY_1", 2),
    ("KEY_2", 3),
    ("KEY_3", 4),
    ("KEY_4", 5),
    ("KEY_5", 6),
    ("KEY_6", 7),
    ("KEY_7", 8),
    ("KEY_8", 9),
    ("KEY_9", 10),
    ("KEY_0", 11),
    ("MINUS", 12),
    ("EQUAL", 13),
    ("BACKSPACE", 14),
    ("TAB", 15),
    ("Q", 16),
    ("W", 17),
    ("E", 18),
    ("R", 19),
    ("T", 20),
    ("Y", 21),
    ("U", 22),
    ("I", 23),
    ("O", 24),
    ("P", 25),
    ("LEFT_BRACE", 26),
    ("RIGHT_BRACE", 27),
    ("ENTER", 28),
    ("LEFT_CTRL", 29),
    ("A", 30),
    ("S", 31),
    ("D", 32),
    ("F", 33),
    ("G", 34),
    ("H", 35),
    ("J", 36),
    ("K", 37),
    ("L", 38),
    ("SEMICOLON", 39),
    ("APOSTROPHE", 40),
    ("GRAVE", 41),
    ("LEFT_SHIFT", 42),
    ("BACKSLASH", 43),
    ("Z", 44),
    ("X", 45),
    ("C", 46),
    ("V", 47),
    ("B", 48),
    ("N", 49),
    ("M", 50),
    ("COMMA", 51),
    ("DOT", 52),
    ("SLASH", 53),
    ("RIGHT_SHIFT", 54),
    ("KPASTERISK", 55),
    ("LEFT_ALT", 56),
    ("SPACE", 57),
    ("CAPSLOCK", 58),
    ("F1", 59),
    ("F2", 60),
    ("F3", 61),
    ("F4", 62),
    ("F5", 63),
    ("F6", 64),
    ("F7", 65),
    ("F8", 66),
    ("F9", 67),
    ("F10", 68),
    ("NUMLOCK", 69),
    ("SCROLLLOCK", 70),
    ("KP7", 71),
    ("KP8", 72),
    ("KP9", 73),
    ("KPMINUS", 74),
    ("KP4", 75),
    ("KP5", 76),
    ("KP6", 77),
    ("KPPLUS", 78),
    ("KP1", 79),
    ("KP2", 80),
    ("KP3", 81),
    ("KP0", 82),
    ("KPDOT", 83),
    ("F11", 87),
    ("F12", 88),
    ("KPENTER", 96),
    ("RIGHT_CTRL", 97),
    ("KPSLASH", 98),
    ("SYSRQ", 99),
    ("RIGHT_ALT", 100),
    ("HOME", 102),
    ("UP", 103),
    ("PAGE_UP", 104),
    ("LEFT", 105),
    ("RIGHT", 106),
    ("END", 107),
    ("DOWN", 108),
    ("PAGE_DOWN", 109),
    ("INSERT", 110),
    ("DELETE", 111),
    ("MUTE", 113),
    ("VOLUMEDOWN", 114),
    ("VOLUMEUP", 115),
    ("POWER", 116),
    ("KPEQUAL", 117),
    ("PAUSE", 119),
    ("LEFT_META", 125),
    ("RIGHT_META", 126),
    ("COMPOSE", 127),
    ("MENU", 139),
    ("NEXTSONG", 163),
    ("PLAYPAUSE", 164),
    ("PREVIOUSSONG", 165),
    ("STOPCD", 166),
    ("F13", 183),
    ("F14", 184),
    ("F15", 185),
    ("F16", 186),
    ("F17", 187),
    ("F18", 188),
    ("F19", 189),
    ("F20", 190),
    ("F21", 191),
    ("F22", 192),
    ("F23", 193),
    ("F24", 194),
    ("BTN_LEFT", 0x110),
    ("BTN_RIGHT", 0x111),
    ("BTN_MIDDLE", 0x112),
    ("BTN_SIDE", 0x113),
    ("BTN_EXTRA", 0x114),
];

/// Extra spellings accepted by `key_from_name`.
const KEY_ALIASES: &[(&str, u16)] = &[
    ("ESCAPE", 1),
    ("1", 2),
    ("2", 3),
    ("3", 4),
    ("4", 5),
    ("5", 6),
    ("6", 7),
    ("7", 8),
    ("8", 9),
    ("9", 10),
    ("0", 11),
    ("RETURN", 28),
    ("LCTRL", 29),
    ("LSHIFT", 42),
    ("RSHIFT", 54),
    ("LALT", 56),
    ("RCTRL", 97),
    ("RALT", 100),
    ("ALTGR", 100),
    ("PRINT", 99),
    ("PAGEUP", 104),
    ("PAGEDOWN", 109),
    ("LMETA", 125),
    ("SUPER", 125),
    ("RMETA", 126),
];

fn name_index() -> &'static IndexMap<&'static str, u16> {
    static INDEX: OnceLock<IndexMap<&'static str, u16>> = OnceLock::new();
    INDEX.get_or_init(|| {
        KEY_TABLE
            .iter()
            .chain(KEY_ALIASES.iter())
            .map(|(name, code)| (*name, *code))
            .collect()
    })
}

/// Display name for a key code
pub fn key_name(code: u16) -> &'static str {
    KEY_TABLE
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(name, _)| *name)
        .unwrap_or("UNKNOWN")
}

/// Resolve a key from its symbolic name (case-insensitive, `KEY_` prefix optional)
pub fn key_from_name(name: &str) -> Option<Key> {
    let upper = name.trim().to_uppercase();
    let index = name_index();
    if let Some(code) = index.get(upper.as_str()) {
        return Some(Key(*code));
    }
    upper
        .strip_prefix("KEY_")
        .and_then(|rest| index.get(rest))
        .map(|code| Key(*code))
}

/// Iterate over every canonical (name, key) pair
pub fn named_keys() -> impl Iterator<Item = (&'static str, Key)> {
    KEY_TABLE.iter().map(|(name, code)| (*name, Key(*code)))
}

/// Map a printable character to the key that produces it on a US layout.
///
/// Returns the key and whether shift must be held.
pub fn char_to_key(c: char) -> Option<(Key, bool)> {
    if c.is_ascii_lowercase() {
        let name = c.to_ascii_uppercase().to_string();
        return key_from_name(&name).map(|key| (key, false));
    }
    if c.is_ascii_uppercase() {
        return key_from_name(&c.to_string()).map(|key| (key, true));
    }
    if c.is_ascii_digit() {
        return key_from_name(&c.to_string()).map(|key| (key, false));
    }

    let (code, shift) = match c {
        ' ' => (57, false),
        '\n' => (28, false),
        '\t' => (15, false),
        '-' => (12, false),
        '=' => (13, false),
        '[' => (26, false),
        ']' => (27, false),
        ';' => (39, false),
        '\'' => (40, false),
        '`' => (41, false),
        '\\' => (43, false),
        ',' => (51, false),
        '.' => (52, false),
        '/' => (53, false),
        '!' => (2, true),
        '@' => (3, true),
        '#' => (4, true),
        '$' => (5, true),
        '%' => (6, true),
        '^' => (7, true),
        '&' => (8, true),
        '*' => (9, true),
        '(' => (10, true),
        ')' => (11, true),
        '_' => (12, true),
        '+' => (13, true),
        '{' => (26, true),
        '}' => (27, true),
        ':' => (39, true),
        '"' => (40, true),
        '~' => (41, true),
        '|' => (43, true),
        '<' => (51, true),
        '>' => (52, true),
        '?' => (53, true),
        _ => return None,
    };
    Some((Key(code), shift))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_name() {
        assert_eq!(key_from_name("a"), Some(Key(30)));
        assert_eq!(key_from_name("A"), Some(Key(30)));
        assert_eq!(key_from_name("ENTER"), Some(Key(28)));
        assert_eq!(key_from_name("1"), Some(Key(2)));
        assert_eq!(key_from_name("KEY_LEFTALT"), None);
        assert_eq!(key_from_name("KEY_ENTER"), Some(Key(28)));
        assert_eq!(key_from_name("lalt"), Some(Key::LEFT_ALT));
        assert_eq!(key_from_name("nope"), None);
    }

    #[test]
    fn test_key_display() {
        assert_eq!(Key(30).to_string(), "A");
        assert_eq!(Key(28).to_string(), "ENTER");
        assert_eq!(Key(999).to_string(), "UNKNOWN");
    }

    #[test]
    fn test_char_to_key() {
        assert_eq!(char_to_key('a'), Some((Key(30), false)));
        assert_eq!(char_to_key('A'), Some((Key(30), true)));
        assert_eq!(char_to_key('0'), Some((Key(11), false)));
        assert_eq!(char_to_key('!'), Some((Key(2), true)));
        assert_eq!(char_to_key(' '), Some((Key(57), false)));
        assert_eq!(char_to_key('?'), Some((Key(53), true)));
        assert_eq!(char_to_key('é'), None);
    }

    #[test]
    fn test_modifiers() {
        assert!(Key::LEFT_SHIFT.is_modifier());
        assert!(Key::RIGHT_META.is_modifier());
        assert!(!Key(30).is_modifier());
    }

    #[test]
    fn test_named_keys_round_trip_names() {
        for (name, key) in named_keys() {
            assert_eq!(key_from_name(name), Some(key), "{}", name);
        }
    }
}
