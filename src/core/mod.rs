//! Core terminal components.
//!
//! - **term**: VT100/VT220 screen state and escape sequence parser
//! - **emulator**: the engine seam and the built-in [`emulator::VtEmulator`]
//! - **events**: typed listener registries
//! - **write_buffer**: queued output with completion signals
//! - **session**: [`session::TerminalSession`], tying it all to a mount node
//!
//! # Architecture
//!
//! ```text
//! TerminalSession
//! ├── Emulator (VtEmulator)
//! │   ├── TerminalState (cells, cursor, modes)
//! │   └── VtParser (escape sequences)
//! ├── FitBehavior / LinkBehavior
//! ├── WriteBuffer (send -> batches -> completions)
//! └── MountTarget (render, focus, input)
//! ```

pub mod emulator;
pub mod events;
pub mod session;
pub mod term;
pub mod write_buffer;
