//! termview - terminal display sessions
//!
//! termview wraps a VT terminal emulator behind a small session object:
//! output from a remote process goes in through [`TerminalSession::send`],
//! user input comes out through [`TerminalSession::on_data`], and the
//! session renders into whatever [`MountTarget`] it was opened on.
//!
//! # Features
//!
//! - **Explicit lifecycle**: `Created -> Mounted -> Disposed`, misuse is an error
//! - **Auto-fit**: rows and columns follow the mount node's pixel size
//! - **Link detection**: URLs on screen can be clicked
//! - **Write completions**: every `send` returns a future that settles once
//!   the chunk is rendered, or fails if the session is disposed first
//! - **Injectable parts**: emulator, fit and link behaviors are trait objects
//!
//! # Example
//!
//! ```
//! use termview::{Config, HeadlessSurface, TerminalSession};
//!
//! let mut config = Config::default();
//! config.fit.cell_width = 10.0;
//! config.fit.cell_height = 16.5;
//!
//! let node = HeadlessSurface::new(800.0, 400.0);
//! let mut session = TerminalSession::new(&config);
//! session.open(node.clone())?;
//! assert_eq!((session.cols()?, session.rows()?), (80, 24));
//!
//! let mut done = session.send("hello\r\n")?;
//! assert_eq!(done.try_result(), Some(Ok(())));
//! assert_eq!(node.line(0).as_deref(), Some("hello"));
//!
//! session.dispose()?;
//! # Ok::<(), termview::SessionError>(())
//! ```

pub mod addons;
pub mod config;
pub mod core;
pub mod error;
pub mod surface;
pub mod ui;

pub use crate::addons::{AutoFit, FitBehavior, Link, LinkBehavior, LinkDetector, LinkHandler};
pub use crate::config::Config;
pub use crate::core::emulator::{Emulator, EmulatorEvent, VtEmulator};
pub use crate::core::events::Subscription;
pub use crate::core::session::{InputSummary, TerminalSession};
pub use crate::core::write_buffer::WriteCompletion;
pub use crate::error::{
    EmulatorError, LifecycleState, SendError, SessionError, SurfaceError,
};
pub use crate::surface::{Dimensions, Frame, HeadlessSurface, InputEvent, MountTarget};
pub use crate::ui::CrosstermSurface;
