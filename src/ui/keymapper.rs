//! Input encoding
//!
//! Turns key presses and pastes from a mount target into the bytes a remote
//! shell expects, honoring the emulator's input modes.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::core::term::TerminalModes;

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

const PASTE_START: &str = "\x1b[200~";
const PASTE_END: &str = "\x1b[201~";

pub struct KeyMapper;

impl KeyMapper {
    /// Encode a key press, `None` for keys that produce no input
    pub fn map(event: &KeyEvent, modes: &TerminalModes) -> Option<String> {
        if event.kind == KeyEventKind::Release {
            return None;
        }
        let mods = Modifiers::from(event.modifiers);

        match event.code {
            KeyCode::Char(ch) => Some(Self::map_char(ch, mods)),

            KeyCode::Enter => {
                if modes.linefeed_newline {
                    Some("\r\n".into())
                } else {
                    Some("\r".into())
                }
            }

            KeyCode::Backspace => {
                if mods.contains(Modifiers::ALT) {
                    Some("\x1b\x7f".into())
                } else {
                    Some("\x7f".into())
                }
            }

            KeyCode::Tab if mods.contains(Modifiers::SHIFT) => Some("\x1b[Z".into()),
            KeyCode::Tab => Some("\t".into()),
            KeyCode::BackTab => Some("\x1b[Z".into()),

            KeyCode::Esc => Some("\x1b".into()),

            KeyCode::Up => Some(Self::cursor_key('A', mods, modes)),
            KeyCode::Down => Some(Self::cursor_key('B', mods, modes)),
            KeyCode::Right => Some(Self::cursor_key('C', mods, modes)),
            KeyCode::Left => Some(Self::cursor_key('D', mods, modes)),
            KeyCode::Home => Some(Self::cursor_key('H', mods, modes)),
            KeyCode::End => Some(Self::cursor_key('F', mods, modes)),

            KeyCode::PageUp => Some(Self::tilde_key(5, mods)),
            KeyCode::PageDown => Some(Self::tilde_key(6, mods)),
            KeyCode::Insert => Some(Self::tilde_key(2, mods)),
            KeyCode::Delete => Some(Self::tilde_key(3, mods)),

            KeyCode::F(n) => Self::function_key(n, mods),

            _ => None,
        }
    }

    /// Encode pasted text: line endings become CR, and the text is
    /// bracketed when the application asked for it
    pub fn paste(text: &str, modes: &TerminalModes) -> String {
        let normalized = text.replace("\r\n", "\r").replace('\n', "\r");
        if modes.bracketed_paste {
            format!("{PASTE_START}{normalized}{PASTE_END}")
        } else {
            normalized
        }
    }

    fn map_char(ch: char, mods: Modifiers) -> String {
        let ctrl = mods.contains(Modifiers::CTRL);
        let alt = mods.contains(Modifiers::ALT);

        if ctrl {
            if let Some(code) = Self::control_code(ch) {
                return if alt {
                    format!("\x1b{code}")
                } else {
                    code.to_string()
                };
            }
        }
        if alt && !ctrl {
            return format!("\x1b{ch}");
        }
        ch.to_string()
    }

    /// C0 code produced by Ctrl plus `ch`
    fn control_code(ch: char) -> Option<char> {
        let code = match ch {
            'a'..='z' => ch as u8 - b'a' + 1,
            'A'..='Z' => ch as u8 - b'A' + 1,
            '@' | '`' | ' ' | '2' => 0x00,
            '[' | '3' => 0x1b,
            '\\' | '4' => 0x1c,
            ']' | '5' => 0x1d,
            '^' | '~' | '6' => 0x1e,
            '_' | '?' | '7' => 0x1f,
            _ => return None,
        };
        Some(code as char)
    }

    /// Arrows, Home and End
    fn cursor_key(key: char, mods: Modifiers, modes: &TerminalModes) -> String {
        if !mods.is_empty() {
            format!("\x1b[1;{}{key}", Self::modifier_code(mods))
        } else if modes.application_cursor {
            format!("\x1bO{key}")
        } else {
            format!("\x1b[{key}")
        }
    }

    fn tilde_key(code: u8, mods: Modifiers) -> String {
        if mods.is_empty() {
            format!("\x1b[{code}~")
        } else {
            format!("\x1b[{code};{}~", Self::modifier_code(mods))
        }
    }

    fn function_key(n: u8, mods: Modifiers) -> Option<String> {
        // F1-F4 use SS3 finals, the rest tilde codes
        let ss3 = match n {
            1 => Some('P'),
            2 => Some('Q'),
            3 => Some('R'),
            4 => Some('S'),
            _ => None,
        };
        if let Some(key) = ss3 {
            return Some(if mods.is_empty() {
                format!("\x1bO{key}")
            } else {
                format!("\x1b[1;{}{key}", Self::modifier_code(mods))
            });
        }

        let code = match n {
            5 => 15,
            6 => 17,
            7 => 18,
            8 => 19,
            9 => 20,
            10 => 21,
            11 => 23,
            12 => 24,
            _ => return None,
        };
        Some(Self::tilde_key(code, mods))
    }

    /// xterm modifier parameter
    fn modifier_code(mods: Modifiers) -> u8 {
        1 + if mods.contains(Modifiers::SHIFT) { 1 } else { 0 }
            + if mods.contains(Modifiers::ALT) { 2 } else { 0 }
            + if mods.contains(Modifiers::CTRL) { 4 } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_event(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    fn map(code: KeyCode, mods: KeyModifiers) -> Option<String> {
        KeyMapper::map(&key_event(code, mods), &TerminalModes::default())
    }

    #[test]
    fn test_char_keys() {
        assert_eq!(map(KeyCode::Char('a'), KeyModifiers::NONE).as_deref(), Some("a"));
        assert_eq!(map(KeyCode::Char('c'), KeyModifiers::CONTROL).as_deref(), Some("\x03"));
        assert_eq!(map(KeyCode::Char('x'), KeyModifiers::ALT).as_deref(), Some("\x1bx"));
        assert_eq!(
            map(KeyCode::Char('b'), KeyModifiers::CONTROL | KeyModifiers::ALT).as_deref(),
            Some("\x1b\x02")
        );
        assert_eq!(map(KeyCode::Char('é'), KeyModifiers::NONE).as_deref(), Some("é"));
    }

    #[test]
    fn test_cursor_keys_follow_mode() {
        let mut modes = TerminalModes::default();
        let up = key_event(KeyCode::Up, KeyModifiers::NONE);

        assert_eq!(KeyMapper::map(&up, &modes).as_deref(), Some("\x1b[A"));
        modes.application_cursor = true;
        assert_eq!(KeyMapper::map(&up, &modes).as_deref(), Some("\x1bOA"));

        let ctrl_up = key_event(KeyCode::Up, KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&ctrl_up, &modes).as_deref(), Some("\x1b[1;5A"));
    }

    #[test]
    fn test_function_keys() {
        assert_eq!(map(KeyCode::F(1), KeyModifiers::NONE).as_deref(), Some("\x1bOP"));
        assert_eq!(map(KeyCode::F(5), KeyModifiers::NONE).as_deref(), Some("\x1b[15~"));
        assert_eq!(map(KeyCode::F(2), KeyModifiers::SHIFT).as_deref(), Some("\x1b[1;2Q"));
        assert_eq!(map(KeyCode::F(12), KeyModifiers::CONTROL).as_deref(), Some("\x1b[24;5~"));
        assert_eq!(map(KeyCode::F(13), KeyModifiers::NONE), None);
    }

    #[test]
    fn test_enter_and_release() {
        let mut modes = TerminalModes::default();
        let enter = key_event(KeyCode::Enter, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&enter, &modes).as_deref(), Some("\r"));

        modes.linefeed_newline = true;
        assert_eq!(KeyMapper::map(&enter, &modes).as_deref(), Some("\r\n"));

        let mut release = key_event(KeyCode::Char('a'), KeyModifiers::NONE);
        release.kind = KeyEventKind::Release;
        assert_eq!(KeyMapper::map(&release, &modes), None);
    }

    #[test]
    fn test_paste_normalizes_and_brackets() {
        let mut modes = TerminalModes::default();
        assert_eq!(KeyMapper::paste("a\r\nb\nc", &modes), "a\rb\rc");

        modes.bracketed_paste = true;
        assert_eq!(KeyMapper::paste("ls\n", &modes), "\x1b[200~ls\r\x1b[201~");
    }
}
