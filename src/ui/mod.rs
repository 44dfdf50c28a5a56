//! Console front end.
//!
//! - **keymapper**: key presses and pastes to VT input bytes
//! - **renderer**: [`CrosstermSurface`], a mount target drawing to the console

pub mod keymapper;
pub mod renderer;

pub use keymapper::{KeyMapper, Modifiers};
pub use renderer::CrosstermSurface;
