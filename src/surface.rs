//! Mount targets
//!
//! A mount target is the node a session renders into: it reports its pixel
//! size for auto-fit, displays [`Frame`]s, takes focus and produces user
//! input. [`HeadlessSurface`] keeps everything in memory; the console
//! implementation lives in [`crate::ui::CrosstermSurface`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crossterm::event::KeyEvent;
use serde::{Deserialize, Serialize};

use crate::core::term::{CursorShape, Row};
use crate::error::SurfaceError;

/// Terminal geometry in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub rows: u16,
    pub cols: u16,
}

impl Dimensions {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { rows, cols }
    }

    pub fn cells(&self) -> usize {
        self.rows as usize * self.cols as usize
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Size of a mount target in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSize {
    pub width: f32,
    pub height: f32,
}

impl PixelSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Size of one character cell in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellMetrics {
    pub width: f32,
    pub height: f32,
}

/// Cursor as shown in a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCursor {
    pub col: u16,
    pub row: u16,
    pub visible: bool,
    pub shape: CursorShape,
}

/// Snapshot of the visible screen
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub dimensions: Dimensions,
    pub rows: Vec<Row>,
    pub cursor: FrameCursor,
}

impl Frame {
    /// Text of one row with trailing blanks trimmed
    pub fn line_text(&self, row: usize) -> Option<String> {
        self.rows.get(row).map(Row::text)
    }
}

/// User input produced by a mount target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// A key press, mapped to VT bytes by the session
    Key(KeyEvent),
    /// Composed text, delivered as-is
    Text(String),
    /// Clipboard paste
    Paste(String),
    /// Primary click on a cell
    Click { col: u16, row: u16 },
    /// The node's geometry changed; the caller decides whether to fit
    Resized,
}

/// A renderable, focusable surface that hosts at most one session
pub trait MountTarget {
    /// Take ownership of the surface for a session
    fn attach(&mut self) -> Result<(), SurfaceError>;

    /// Release the surface, leaving it unrendered
    fn detach(&mut self);

    fn is_attached(&self) -> bool;

    /// Current size, `None` while the surface cannot be measured
    fn pixel_size(&self) -> Option<PixelSize>;

    /// Cell metrics measured by the surface itself, if it knows them
    fn cell_size(&self) -> Option<CellMetrics> {
        None
    }

    fn render(&mut self, frame: &Frame) -> Result<(), SurfaceError>;

    fn focus(&mut self);

    /// Drain pending user input
    fn poll_input(&mut self) -> Vec<InputEvent>;
}

#[derive(Debug, Default)]
struct HeadlessState {
    size: Option<PixelSize>,
    cell_size: Option<CellMetrics>,
    attached: bool,
    focused: bool,
    frame: Option<Frame>,
    input: VecDeque<InputEvent>,
}

/// In-memory mount target.
///
/// Clones share the same node, so a caller can keep a handle after moving
/// one into a session and observe or drive it from outside.
#[derive(Debug, Clone, Default)]
pub struct HeadlessSurface {
    inner: Rc<RefCell<HeadlessState>>,
}

impl HeadlessSurface {
    pub fn new(width: f32, height: f32) -> Self {
        let surface = Self::default();
        surface.set_size(width, height);
        surface
    }

    /// A node that is not laid out yet and cannot be measured
    pub fn unmeasured() -> Self {
        Self::default()
    }

    pub fn set_size(&self, width: f32, height: f32) {
        self.inner.borrow_mut().size = Some(PixelSize::new(width, height));
    }

    pub fn set_cell_size(&self, metrics: Option<CellMetrics>) {
        self.inner.borrow_mut().cell_size = metrics;
    }

    pub fn push_input(&self, event: InputEvent) {
        self.inner.borrow_mut().input.push_back(event);
    }

    pub fn is_focused(&self) -> bool {
        self.inner.borrow().focused
    }

    pub fn frame(&self) -> Option<Frame> {
        self.inner.borrow().frame.clone()
    }

    /// Rendered text of one row, `None` when nothing is rendered
    pub fn line(&self, row: usize) -> Option<String> {
        self.inner.borrow().frame.as_ref()?.line_text(row)
    }
}

impl MountTarget for HeadlessSurface {
    fn attach(&mut self) -> Result<(), SurfaceError> {
        let mut inner = self.inner.borrow_mut();
        if inner.attached {
            return Err(SurfaceError::AlreadyHosting);
        }
        inner.attached = true;
        Ok(())
    }

    fn detach(&mut self) {
        let mut inner = self.inner.borrow_mut();
        inner.attached = false;
        inner.focused = false;
        inner.frame = None;
        inner.input.clear();
    }

    fn is_attached(&self) -> bool {
        self.inner.borrow().attached
    }

    fn pixel_size(&self) -> Option<PixelSize> {
        self.inner.borrow().size
    }

    fn cell_size(&self) -> Option<CellMetrics> {
        self.inner.borrow().cell_size
    }

    fn render(&mut self, frame: &Frame) -> Result<(), SurfaceError> {
        let mut inner = self.inner.borrow_mut();
        if !inner.attached {
            return Err(SurfaceError::NotAttached);
        }
        inner.frame = Some(frame.clone());
        Ok(())
    }

    fn focus(&mut self) {
        self.inner.borrow_mut().focused = true;
    }

    fn poll_input(&mut self) -> Vec<InputEvent> {
        self.inner.borrow_mut().input.drain(..).collect()
    }
}
