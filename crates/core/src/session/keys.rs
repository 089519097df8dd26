// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Special-key tag → ANSI escape sequence mapping (spec §4.4).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialKey {
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    Escape,
    Enter,
    CtrlEnter,
    ShiftEnter,
    Backspace,
    Tab,
    ShiftTab,
    PageUp,
    PageDown,
    Home,
    End,
    Delete,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
}

impl SpecialKey {
    /// The raw bytes to write to the PTY for this key.
    pub fn to_bytes(self) -> &'static [u8] {
        match self {
            Self::ArrowUp => b"\x1b[A",
            Self::ArrowDown => b"\x1b[B",
            Self::ArrowRight => b"\x1b[C",
            Self::ArrowLeft => b"\x1b[D",
            Self::Escape => b"\x1b",
            Self::Enter => b"\r",
            // No standard single ANSI sequence distinguishes ctrl/shift+enter
            // from plain enter; xterm's modifyOtherKeys convention is used.
            Self::CtrlEnter => b"\x1b[13;5u",
            Self::ShiftEnter => b"\x1b[13;2u",
            Self::Backspace => b"\x7f",
            Self::Tab => b"\t",
            Self::ShiftTab => b"\x1b[Z",
            Self::PageUp => b"\x1b[5~",
            Self::PageDown => b"\x1b[6~",
            Self::Home => b"\x1b[H",
            Self::End => b"\x1b[F",
            Self::Delete => b"\x1b[3~",
            Self::F1 => b"\x1bOP",
            Self::F2 => b"\x1bOQ",
            Self::F3 => b"\x1bOR",
            Self::F4 => b"\x1bOS",
            Self::F5 => b"\x1b[15~",
            Self::F6 => b"\x1b[17~",
            Self::F7 => b"\x1b[18~",
            Self::F8 => b"\x1b[19~",
            Self::F9 => b"\x1b[20~",
            Self::F10 => b"\x1b[21~",
            Self::F11 => b"\x1b[23~",
            Self::F12 => b"\x1b[24~",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrow_keys_use_csi_sequences() {
        assert_eq!(SpecialKey::ArrowUp.to_bytes(), b"\x1b[A");
        assert_eq!(SpecialKey::ArrowDown.to_bytes(), b"\x1b[B");
    }

    #[test]
    fn enter_is_carriage_return() {
        assert_eq!(SpecialKey::Enter.to_bytes(), b"\r");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn deserializes_from_snake_case_tag() {
        let key: SpecialKey = serde_json::from_str("\"page_up\"").unwrap();
        assert_eq!(key, SpecialKey::PageUp);
    }
}
