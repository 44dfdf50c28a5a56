//! VT sequence parser
//!
//! Consumes decoded characters, mutates [`TerminalState`] and reports the
//! side effects that leave the screen (replies, title changes, bell) as
//! [`Action`]s.

use super::state::{AttrFlags, Color, CursorShape, TerminalState};

/// Side effect produced while parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Bytes the terminal must send back to the remote process
    Reply(Response),
    /// OSC 0/1/2 set the window title
    TitleChanged(String),
    /// BEL outside of a string sequence
    Bell,
}

/// Report requested by the remote process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// DSR 5: terminal OK
    StatusOk,
    /// DSR 6: cursor position, 1-indexed (row, col)
    CursorPosition(u16, u16),
    /// Primary device attributes
    DeviceAttributes,
    /// Secondary device attributes
    SecondaryDeviceAttributes,
}

impl Response {
    pub fn to_sequence(self) -> String {
        match self {
            Response::StatusOk => "\x1b[0n".to_string(),
            Response::CursorPosition(row, col) => format!("\x1b[{row};{col}R"),
            // VT220 with ANSI color
            Response::DeviceAttributes => "\x1b[?62;22c".to_string(),
            Response::SecondaryDeviceAttributes => "\x1b[>1;10;0c".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum ParserState {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    /// Malformed CSI, swallowed up to its final byte
    CsiIgnore,
    OscString,
    /// ESC seen inside an OSC string, expecting `\`
    OscEscape,
}

/// Upper bound on OSC payloads; longer strings are truncated
const MAX_OSC_LEN: usize = 4096;
const MAX_PARAMS: usize = 32;

#[derive(Default)]
pub struct VtParser {
    state: ParserState,
    params: Vec<u16>,
    current_param: Option<u16>,
    intermediates: Vec<u8>,
    osc: String,
}

impl VtParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one decoded character
    pub fn advance(&mut self, ch: char, state: &mut TerminalState) -> Option<Action> {
        let in_osc = matches!(self.state, ParserState::OscString | ParserState::OscEscape);

        if (ch as u32) < 0x20 && !in_osc {
            return self.control(ch as u8, state);
        }

        match self.state {
            ParserState::Ground => {
                if ch != '\x7f' {
                    state.put_char(ch);
                }
                None
            }
            ParserState::Escape => self.escape(ch, state),
            ParserState::EscapeIntermediate => {
                // Charset designations and the like: consumed, not applied
                if !matches!(ch, '\x20'..='\x2f') {
                    self.state = ParserState::Ground;
                }
                None
            }
            ParserState::CsiEntry | ParserState::CsiParam => self.csi_param(ch, state),
            ParserState::CsiIntermediate => self.csi_intermediate(ch, state),
            ParserState::CsiIgnore => {
                if matches!(ch, '\x40'..='\x7e') {
                    self.state = ParserState::Ground;
                }
                None
            }
            ParserState::OscString => self.osc_string(ch),
            ParserState::OscEscape => {
                let action = self.finish_osc();
                if ch != '\\' {
                    // Not ST: the ESC starts a new sequence
                    self.enter_escape();
                    return self.escape(ch, state).or(action);
                }
                action
            }
        }
    }

    fn control(&mut self, byte: u8, state: &mut TerminalState) -> Option<Action> {
        match byte {
            0x1b => self.enter_escape(),
            0x07 => return Some(Action::Bell),
            0x08 => state.backspace(),
            0x09 => state.horizontal_tab(),
            0x0a..=0x0c => {
                if state.modes.convert_eol || state.modes.linefeed_newline {
                    state.carriage_return();
                }
                state.linefeed();
            }
            0x0d => state.carriage_return(),
            // CAN and SUB abort a sequence in progress
            0x18 | 0x1a => self.state = ParserState::Ground,
            _ => {}
        }
        None
    }

    fn enter_escape(&mut self) {
        self.state = ParserState::Escape;
        self.params.clear();
        self.intermediates.clear();
        self.current_param = None;
    }

    fn escape(&mut self, ch: char, state: &mut TerminalState) -> Option<Action> {
        self.state = ParserState::Ground;
        match ch {
            '[' => self.state = ParserState::CsiEntry,
            ']' => {
                self.state = ParserState::OscString;
                self.osc.clear();
            }
            '7' => state.save_cursor(),
            '8' => state.restore_cursor(),
            'D' => state.linefeed(),
            'E' => {
                state.carriage_return();
                state.linefeed();
            }
            'M' => state.reverse_index(),
            'c' => state.reset(),
            '\x20'..='\x2f' => {
                self.intermediates.push(ch as u8);
                self.state = ParserState::EscapeIntermediate;
            }
            _ => {}
        }
        None
    }

    fn csi_param(&mut self, ch: char, state: &mut TerminalState) -> Option<Action> {
        match ch {
            '0'..='9' => {
                let digit = ch as u16 - '0' as u16;
                self.current_param = Some(
                    self.current_param
                        .unwrap_or(0)
                        .saturating_mul(10)
                        .saturating_add(digit),
                );
                self.state = ParserState::CsiParam;
            }
            // Subparameters are flattened into the parameter list
            ';' | ':' => {
                self.push_param();
                self.state = ParserState::CsiParam;
            }
            '?' | '>' | '=' | '!' if self.state == ParserState::CsiEntry => {
                self.intermediates.push(ch as u8);
            }
            '\x20'..='\x2f' => {
                self.push_pending_param();
                self.intermediates.push(ch as u8);
                self.state = ParserState::CsiIntermediate;
            }
            '\x40'..='\x7e' => {
                self.push_pending_param();
                return self.execute_csi(ch as u8, state);
            }
            _ => self.state = ParserState::CsiIgnore,
        }
        None
    }

    fn csi_intermediate(&mut self, ch: char, state: &mut TerminalState) -> Option<Action> {
        match ch {
            '\x20'..='\x2f' => self.intermediates.push(ch as u8),
            '\x40'..='\x7e' => return self.execute_csi(ch as u8, state),
            _ => self.state = ParserState::CsiIgnore,
        }
        None
    }

    fn push_param(&mut self) {
        if self.params.len() < MAX_PARAMS {
            self.params.push(self.current_param.unwrap_or(0));
        }
        self.current_param = None;
    }

    fn push_pending_param(&mut self) {
        if self.current_param.is_some() {
            self.push_param();
        }
    }

    /// Parameter at `idx`, with 0 and missing both meaning `default`
    fn param(&self, idx: usize, default: u16) -> u16 {
        match self.params.get(idx).copied() {
            Some(0) | None => default,
            Some(n) => n,
        }
    }

    fn osc_string(&mut self, ch: char) -> Option<Action> {
        match ch {
            '\x07' | '\u{9c}' => {
                self.state = ParserState::Ground;
                self.finish_osc()
            }
            '\x1b' => {
                self.state = ParserState::OscEscape;
                None
            }
            _ => {
                if self.osc.len() < MAX_OSC_LEN {
                    self.osc.push(ch);
                }
                None
            }
        }
    }

    fn finish_osc(&mut self) -> Option<Action> {
        self.state = ParserState::Ground;
        let osc = std::mem::take(&mut self.osc);
        let (code, text) = osc.split_once(';')?;
        match code {
            "0" | "1" | "2" => Some(Action::TitleChanged(text.to_string())),
            _ => {
                tracing::trace!("Ignoring OSC {code}");
                None
            }
        }
    }

    fn execute_csi(&mut self, final_byte: u8, state: &mut TerminalState) -> Option<Action> {
        self.state = ParserState::Ground;
        let private = self.intermediates.first().copied();
        let space = self.intermediates.contains(&b' ');

        match (private, final_byte) {
            (None, b'A') => state.cursor_up(self.param(0, 1)),
            (None, b'B') | (None, b'e') => state.cursor_down(self.param(0, 1)),
            (None, b'C') | (None, b'a') => state.cursor_forward(self.param(0, 1)),
            (None, b'D') => state.cursor_backward(self.param(0, 1)),
            (None, b'E') => {
                state.cursor_down(self.param(0, 1));
                state.carriage_return();
            }
            (None, b'F') => {
                state.cursor_up(self.param(0, 1));
                state.carriage_return();
            }
            (None, b'G') | (None, b'`') => {
                let row = state.cursor().row + 1;
                state.cursor_position(row, self.param(0, 1));
            }
            (None, b'H') | (None, b'f') => state.cursor_position(self.param(0, 1), self.param(1, 1)),
            (None, b'd') => {
                let col = state.cursor().col + 1;
                state.cursor_position(self.param(0, 1), col);
            }
            (None, b'J') => state.erase_in_display(self.param(0, 0)),
            (None, b'K') => state.erase_in_line(self.param(0, 0)),
            (None, b'L') => state.insert_lines(self.param(0, 1)),
            (None, b'M') => state.delete_lines(self.param(0, 1)),
            (None, b'@') => state.insert_blank_cells(self.param(0, 1) as usize),
            (None, b'P') => state.delete_cells(self.param(0, 1) as usize),
            (None, b'X') => state.erase_cells(self.param(0, 1) as usize),
            (None, b'S') => state.scroll_up(self.param(0, 1)),
            (None, b'T') => state.scroll_down(self.param(0, 1)),
            (None, b'r') => {
                let rows = state.rows;
                state.set_scroll_region(self.param(0, 1), self.param(1, rows));
                state.cursor_position(1, 1);
            }
            (None, b'm') => self.execute_sgr(state),
            (None, b's') => state.save_cursor(),
            (None, b'u') => state.restore_cursor(),
            (None, b'n') => {
                return match self.params.first() {
                    Some(5) => Some(Action::Reply(Response::StatusOk)),
                    Some(6) => {
                        let cursor = state.cursor();
                        let col = cursor.col.min(state.cols.saturating_sub(1));
                        Some(Action::Reply(Response::CursorPosition(cursor.row + 1, col + 1)))
                    }
                    _ => None,
                };
            }
            (None, b'c') => return Some(Action::Reply(Response::DeviceAttributes)),
            (Some(b'>'), b'c') => return Some(Action::Reply(Response::SecondaryDeviceAttributes)),
            (Some(b'?'), b'h') | (Some(b'?'), b'l') => {
                let enable = final_byte == b'h';
                for &mode in &self.params {
                    state.set_private_mode(mode, enable);
                }
            }
            (None, b'h') | (None, b'l') => {
                let enable = final_byte == b'h';
                for &mode in &self.params {
                    match mode {
                        4 => state.modes.insert_mode = enable,
                        20 => state.modes.linefeed_newline = enable,
                        _ => {}
                    }
                }
            }
            (Some(b' '), b'q') | (None, b'q') if space => {
                state.cursor_mut().shape = CursorShape::from_decscusr(self.param(0, 0));
            }
            _ => {
                tracing::debug!(
                    "Unknown CSI: intermediates={:?}, params={:?}, final={:?}",
                    self.intermediates,
                    self.params,
                    final_byte as char
                );
            }
        }
        None
    }

    fn execute_sgr(&self, state: &mut TerminalState) {
        if self.params.is_empty() {
            state.current_attrs.reset();
            return;
        }

        let attrs = &mut state.current_attrs;
        let mut iter = self.params.iter().copied();
        while let Some(param) = iter.next() {
            match param {
                0 => attrs.reset(),
                1 => attrs.flags |= AttrFlags::BOLD,
                2 => attrs.flags |= AttrFlags::DIM,
                3 => attrs.flags |= AttrFlags::ITALIC,
                4 => attrs.flags |= AttrFlags::UNDERLINE,
                5 => attrs.flags |= AttrFlags::BLINK,
                7 => attrs.flags |= AttrFlags::INVERSE,
                8 => attrs.flags |= AttrFlags::HIDDEN,
                9 => attrs.flags |= AttrFlags::STRIKETHROUGH,
                22 => attrs.flags &= !(AttrFlags::BOLD | AttrFlags::DIM),
                23 => attrs.flags &= !AttrFlags::ITALIC,
                24 => attrs.flags &= !AttrFlags::UNDERLINE,
                25 => attrs.flags &= !AttrFlags::BLINK,
                27 => attrs.flags &= !AttrFlags::INVERSE,
                28 => attrs.flags &= !AttrFlags::HIDDEN,
                29 => attrs.flags &= !AttrFlags::STRIKETHROUGH,
                30..=37 => attrs.fg = Color::Indexed((param - 30) as u8),
                38 => attrs.fg = extended_color(&mut iter).unwrap_or(attrs.fg),
                39 => attrs.fg = Color::Default,
                40..=47 => attrs.bg = Color::Indexed((param - 40) as u8),
                48 => attrs.bg = extended_color(&mut iter).unwrap_or(attrs.bg),
                49 => attrs.bg = Color::Default,
                90..=97 => attrs.fg = Color::Indexed((param - 90 + 8) as u8),
                100..=107 => attrs.bg = Color::Indexed((param - 100 + 8) as u8),
                _ => {}
            }
        }
    }
}

/// Parse the tail of an SGR 38/48 sequence: `5;n` or `2;r;g;b`
fn extended_color(iter: &mut impl Iterator<Item = u16>) -> Option<Color> {
    match iter.next()? {
        5 => iter.next().map(|n| Color::Indexed(n as u8)),
        2 => {
            let r = iter.next().unwrap_or(0) as u8;
            let g = iter.next().unwrap_or(0) as u8;
            let b = iter.next().unwrap_or(0) as u8;
            Some(Color::Rgb(r, g, b))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut VtParser, state: &mut TerminalState, input: &str) -> Vec<Action> {
        input.chars().filter_map(|ch| parser.advance(ch, state)).collect()
    }

    #[test]
    fn test_cursor_movement() {
        let mut state = TerminalState::new(80, 24, 100);
        let mut parser = VtParser::new();

        feed(&mut parser, &mut state, "\x1b[5;10H");

        assert_eq!(state.cursor().row, 4);
        assert_eq!(state.cursor().col, 9);
    }

    #[test]
    fn test_sgr_colors() {
        let mut state = TerminalState::new(80, 24, 100);
        let mut parser = VtParser::new();

        feed(&mut parser, &mut state, "\x1b[1;31m");
        assert_eq!(state.current_attrs.fg, Color::Indexed(1));
        assert!(state.current_attrs.flags.contains(AttrFlags::BOLD));

        feed(&mut parser, &mut state, "\x1b[38;2;10;20;30m\x1b[48;5;200m");
        assert_eq!(state.current_attrs.fg, Color::Rgb(10, 20, 30));
        assert_eq!(state.current_attrs.bg, Color::Indexed(200));

        feed(&mut parser, &mut state, "\x1b[m");
        assert_eq!(state.current_attrs, Default::default());
    }

    #[test]
    fn test_title_terminators() {
        let mut state = TerminalState::new(80, 24, 100);
        let mut parser = VtParser::new();

        let actions = feed(&mut parser, &mut state, "\x1b]0;build: ok\x07");
        assert_eq!(actions, vec![Action::TitleChanged("build: ok".into())]);

        let actions = feed(&mut parser, &mut state, "\x1b]2;café\x1b\\");
        assert_eq!(actions, vec![Action::TitleChanged("café".into())]);

        // The title text never reaches the screen
        assert_eq!(state.line_text(0).as_deref(), Some(""));
    }

    #[test]
    fn test_bell_outside_osc() {
        let mut state = TerminalState::new(80, 24, 100);
        let mut parser = VtParser::new();

        assert_eq!(feed(&mut parser, &mut state, "a\x07"), vec![Action::Bell]);
    }

    #[test]
    fn test_device_queries_produce_replies() {
        let mut state = TerminalState::new(80, 24, 100);
        let mut parser = VtParser::new();

        feed(&mut parser, &mut state, "\x1b[3;7H");
        let actions = feed(&mut parser, &mut state, "\x1b[6n\x1b[c\x1b[>c");
        let replies: Vec<String> = actions
            .into_iter()
            .map(|action| match action {
                Action::Reply(response) => response.to_sequence(),
                other => panic!("unexpected action {other:?}"),
            })
            .collect();

        assert_eq!(replies, vec!["\x1b[3;7R", "\x1b[?62;22c", "\x1b[>1;10;0c"]);
    }

    #[test]
    fn test_linefeed_respects_convert_eol() {
        let mut state = TerminalState::new(80, 24, 100);
        let mut parser = VtParser::new();
        feed(&mut parser, &mut state, "ab\n");
        assert_eq!((state.cursor().row, state.cursor().col), (1, 2));

        let mut state = TerminalState::new(80, 24, 100);
        state.modes.convert_eol = true;
        feed(&mut parser, &mut state, "ab\n");
        assert_eq!((state.cursor().row, state.cursor().col), (1, 0));
    }

    #[test]
    fn test_erase_and_delete_chars() {
        let mut state = TerminalState::new(20, 2, 100);
        let mut parser = VtParser::new();

        feed(&mut parser, &mut state, "abcdef\x1b[1G\x1b[2P");
        assert_eq!(state.line_text(0).as_deref(), Some("cdef"));

        feed(&mut parser, &mut state, "\x1b[2@");
        assert_eq!(state.line_text(0).as_deref(), Some("  cdef"));

        feed(&mut parser, &mut state, "\x1b[K");
        assert_eq!(state.line_text(0).as_deref(), Some(""));
    }

    #[test]
    fn test_cursor_style() {
        let mut state = TerminalState::new(80, 24, 100);
        let mut parser = VtParser::new();

        feed(&mut parser, &mut state, "\x1b[5 q");
        assert_eq!(state.cursor().shape, CursorShape::BlinkingBar);
    }
}
