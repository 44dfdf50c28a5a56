//! Emulator engine seam
//!
//! [`Emulator`] is everything a session needs from the terminal emulation
//! library: geometry, a byte sink, a screen snapshot and the modes that
//! affect input encoding. [`VtEmulator`] is the built-in engine; tests and
//! embedders can inject their own.

use crate::config::Config;
use crate::error::EmulatorError;
use crate::surface::{Dimensions, Frame, FrameCursor};

use super::term::{Action, TerminalModes, TerminalState, VtParser};

/// Something the emulator reports while processing output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmulatorEvent {
    /// Reply to a device query, to be sent to the remote process
    Reply(String),
    TitleChanged(String),
    Bell,
}

pub trait Emulator {
    fn dimensions(&self) -> Dimensions;

    /// Whether a screen buffer of `dimensions` may be allocated
    fn check_size(&self, dimensions: Dimensions) -> Result<(), EmulatorError> {
        let Dimensions { cols, rows } = dimensions;
        if cols == 0 || rows == 0 {
            return Err(EmulatorError::InvalidSize { cols, rows });
        }
        Ok(())
    }

    /// Reallocate the screen buffer
    fn resize(&mut self, dimensions: Dimensions) -> Result<(), EmulatorError>;

    /// Process a chunk of output from the remote process
    fn write(&mut self, data: &[u8]) -> Vec<EmulatorEvent>;

    /// Snapshot of the visible screen
    fn frame(&self) -> Frame;

    fn modes(&self) -> &TerminalModes;

    fn title(&self) -> &str;

    /// Clear history and screen, keeping the cursor line
    fn clear(&mut self);
}

/// Default engine: [`TerminalState`] driven by [`VtParser`]
pub struct VtEmulator {
    state: TerminalState,
    parser: VtParser,
    /// Trailing bytes of a UTF-8 sequence split across writes
    partial: Vec<u8>,
    max_cells: usize,
}

/// Geometry before the first fit
pub const INITIAL_DIMENSIONS: Dimensions = Dimensions { rows: 24, cols: 80 };

impl VtEmulator {
    pub fn new(config: &Config) -> Self {
        let Dimensions { cols, rows } = INITIAL_DIMENSIONS;
        let mut state = TerminalState::new(cols, rows, config.scrollback);
        state.modes.convert_eol = config.convert_eol;
        Self {
            state,
            parser: VtParser::new(),
            partial: Vec::new(),
            max_cells: config.max_cells,
        }
    }

    pub fn state(&self) -> &TerminalState {
        &self.state
    }

    fn decode(&mut self, data: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.partial);
        bytes.extend_from_slice(data);

        let mut text = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(error) => {
                    let (valid, after) = rest.split_at(error.valid_up_to());
                    text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match error.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more
                            self.partial = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }
}

impl Emulator for VtEmulator {
    fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.state.cols, self.state.rows)
    }

    fn check_size(&self, dimensions: Dimensions) -> Result<(), EmulatorError> {
        let Dimensions { cols, rows } = dimensions;
        if cols == 0 || rows == 0 {
            return Err(EmulatorError::InvalidSize { cols, rows });
        }
        if dimensions.cells() > self.max_cells {
            return Err(EmulatorError::BufferTooLarge {
                cols,
                rows,
                limit: self.max_cells,
            });
        }
        Ok(())
    }

    fn resize(&mut self, dimensions: Dimensions) -> Result<(), EmulatorError> {
        self.check_size(dimensions)?;
        self.state.resize(dimensions.cols, dimensions.rows);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Vec<EmulatorEvent> {
        let text = self.decode(data);
        let mut events = Vec::new();
        for ch in text.chars() {
            match self.parser.advance(ch, &mut self.state) {
                Some(Action::Reply(response)) => {
                    events.push(EmulatorEvent::Reply(response.to_sequence()));
                }
                Some(Action::TitleChanged(title)) => {
                    self.state.title = title.clone();
                    events.push(EmulatorEvent::TitleChanged(title));
                }
                Some(Action::Bell) => events.push(EmulatorEvent::Bell),
                None => {}
            }
        }
        events
    }

    fn frame(&self) -> Frame {
        let screen = self.state.screen();
        Frame {
            dimensions: self.dimensions(),
            rows: screen.buffer.rows.clone(),
            cursor: FrameCursor {
                col: screen.cursor.col.min(self.state.cols.saturating_sub(1)),
                row: screen.cursor.row,
                visible: screen.cursor.visible,
                shape: screen.cursor.shape,
            },
        }
    }

    fn modes(&self) -> &TerminalModes {
        &self.state.modes
    }

    fn title(&self) -> &str {
        &self.state.title
    }

    fn clear(&mut self) {
        self.state.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emulator() -> VtEmulator {
        VtEmulator::new(&Config::default())
    }

    #[test]
    fn test_utf8_split_across_writes() {
        let mut emulator = emulator();
        let bytes = "héllo".as_bytes();

        emulator.write(&bytes[..2]);
        emulator.write(&bytes[2..]);

        assert_eq!(emulator.frame().line_text(0).as_deref(), Some("héllo"));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut emulator = emulator();
        emulator.write(b"a\xffb");

        assert_eq!(emulator.frame().line_text(0).as_deref(), Some("a\u{fffd}b"));
    }

    #[test]
    fn test_events_in_order() {
        let mut emulator = emulator();
        let events = emulator.write(b"\x1b]0;one\x07\x07\x1b[5n");

        assert_eq!(
            events,
            vec![
                EmulatorEvent::TitleChanged("one".into()),
                EmulatorEvent::Bell,
                EmulatorEvent::Reply("\x1b[0n".into()),
            ]
        );
        assert_eq!(emulator.title(), "one");
    }

    #[test]
    fn test_resize_limits() {
        let mut config = Config::default();
        config.max_cells = 100;
        let mut emulator = VtEmulator::new(&config);

        assert_eq!(
            emulator.resize(Dimensions::new(0, 5)),
            Err(EmulatorError::InvalidSize { cols: 0, rows: 5 })
        );
        assert!(matches!(
            emulator.resize(Dimensions::new(20, 20)),
            Err(EmulatorError::BufferTooLarge { limit: 100, .. })
        ));
        assert!(emulator.resize(Dimensions::new(10, 10)).is_ok());
        assert_eq!(emulator.dimensions(), Dimensions::new(10, 10));
    }

    #[test]
    fn test_initial_size_checked_against_limit() {
        let mut config = Config::default();
        config.max_cells = 100;
        let emulator = VtEmulator::new(&config);

        // The starting buffer is allocated before any limit applies
        assert_eq!(emulator.dimensions(), INITIAL_DIMENSIONS);
        assert_eq!(
            emulator.check_size(emulator.dimensions()),
            Err(EmulatorError::BufferTooLarge {
                cols: 80,
                rows: 24,
                limit: 100
            })
        );
        assert_eq!(emulator.check_size(Dimensions::new(10, 10)), Ok(()));
    }

    #[test]
    fn test_convert_eol_from_config() {
        let mut emulator = emulator();
        emulator.write(b"one\ntwo");

        let frame = emulator.frame();
        assert_eq!(frame.line_text(1).as_deref(), Some("two"));
    }
}
