//! VT100/VT220 screen model and escape-sequence parser.
//!
//! This is the engine behind [`crate::core::emulator::VtEmulator`].

mod parser;
mod state;

pub use parser::{Action, Response, VtParser};
pub use state::{
    ActiveScreen, AttrFlags, Cell, CellAttrs, Color, CursorShape, CursorState, Row, Screen,
    ScreenBuffer, TerminalModes, TerminalState,
};
