//! Behaviors attached to a session's emulator.
//!
//! - **fit**: recompute rows/columns from the mount node's pixel size
//! - **links**: find URLs in rendered rows and make them activatable
//!
//! Both are attached when the session opens and released when it is
//! disposed. Sessions receive them as trait objects so either can be
//! replaced, e.g. by a test double.

pub mod fit;
pub mod links;

pub use fit::{AutoFit, FitBehavior};
pub use links::{
    ClipboardLinkHandler, Link, LinkBehavior, LinkDetector, LinkHandler, LogLinkHandler,
};

use crate::core::emulator::Emulator;

/// Lifecycle hooks shared by all behaviors
pub trait Addon {
    fn name(&self) -> &'static str;

    /// Called once the emulator is about to render into a node
    fn activate(&mut self, emulator: &dyn Emulator);

    /// Release everything the behavior holds
    fn dispose(&mut self);
}
