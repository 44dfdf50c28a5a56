//! Console mount target using crossterm
//!
//! Draws frames to the hosting console and turns console events into
//! [`InputEvent`]s. The console is a single resource: only one surface can
//! be attached at a time in a process.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossterm::{
    cursor::{Hide, MoveTo, SetCursorStyle, Show},
    event::{
        self, DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste,
        EnableMouseCapture, Event, MouseButton, MouseEventKind,
    },
    execute, queue,
    style::{Attribute, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};
use tracing::{debug, warn};

use crate::core::term::{AttrFlags, CellAttrs, Color, CursorShape};
use crate::error::SurfaceError;
use crate::surface::{CellMetrics, Frame, InputEvent, MountTarget, PixelSize};

static CONSOLE_IN_USE: AtomicBool = AtomicBool::new(false);

pub struct CrosstermSurface {
    attached: bool,
    /// How long `poll_input` waits for the first event
    poll_timeout: Duration,
}

impl Default for CrosstermSurface {
    fn default() -> Self {
        Self::new(Duration::from_millis(16))
    }
}

impl CrosstermSurface {
    pub fn new(poll_timeout: Duration) -> Self {
        Self {
            attached: false,
            poll_timeout,
        }
    }

    fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            EnableMouseCapture,
            EnableBracketedPaste,
            DisableLineWrap,
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;
        stdout.flush()
    }

    fn cleanup(&mut self) -> io::Result<()> {
        let mut stdout = io::stdout();

        // Best effort: restore as much of the console as possible
        let _ = execute!(stdout, ResetColor, SetAttribute(Attribute::Reset));
        let _ = execute!(stdout, SetCursorStyle::DefaultUserShape, Show, EnableLineWrap);
        let _ = execute!(stdout, DisableBracketedPaste, DisableMouseCapture);
        let _ = execute!(stdout, LeaveAlternateScreen);
        let _ = stdout.flush();

        terminal::disable_raw_mode()
    }

    /// Console geometry in cells and, when the console reports it, pixels
    fn window(&self) -> Option<(u16, u16, Option<PixelSize>)> {
        match terminal::window_size() {
            Ok(size) if size.columns > 0 && size.rows > 0 => {
                let pixels = (size.width > 0 && size.height > 0)
                    .then(|| PixelSize::new(size.width as f32, size.height as f32));
                Some((size.columns, size.rows, pixels))
            }
            _ => terminal::size()
                .ok()
                .filter(|&(cols, rows)| cols > 0 && rows > 0)
                .map(|(cols, rows)| (cols, rows, None)),
        }
    }

    fn next_event(timeout: Duration) -> Option<Event> {
        match event::poll(timeout) {
            Ok(true) => match event::read() {
                Ok(event) => Some(event),
                Err(error) => {
                    warn!("Failed to read console event: {error}");
                    None
                }
            },
            Ok(false) => None,
            Err(error) => {
                warn!("Failed to poll console: {error}");
                None
            }
        }
    }
}

impl MountTarget for CrosstermSurface {
    fn attach(&mut self) -> Result<(), SurfaceError> {
        if self.attached || CONSOLE_IN_USE.swap(true, Ordering::SeqCst) {
            return Err(SurfaceError::AlreadyHosting);
        }
        if let Err(error) = self.init() {
            let _ = self.cleanup();
            CONSOLE_IN_USE.store(false, Ordering::SeqCst);
            return Err(error.into());
        }
        self.attached = true;
        debug!("Console attached");
        Ok(())
    }

    fn detach(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;
        if let Err(error) = self.cleanup() {
            warn!("Failed to restore console: {error}");
        }
        CONSOLE_IN_USE.store(false, Ordering::SeqCst);
        debug!("Console detached");
    }

    fn is_attached(&self) -> bool {
        self.attached
    }

    /// Pixel size when the console knows it, otherwise one pixel per cell
    fn pixel_size(&self) -> Option<PixelSize> {
        let (cols, rows, pixels) = self.window()?;
        Some(pixels.unwrap_or(PixelSize::new(cols as f32, rows as f32)))
    }

    fn cell_size(&self) -> Option<CellMetrics> {
        let (cols, rows, pixels) = self.window()?;
        Some(match pixels {
            Some(size) => CellMetrics {
                width: size.width / cols as f32,
                height: size.height / rows as f32,
            },
            None => CellMetrics {
                width: 1.0,
                height: 1.0,
            },
        })
    }

    fn render(&mut self, frame: &Frame) -> Result<(), SurfaceError> {
        if !self.attached {
            return Err(SurfaceError::NotAttached);
        }
        let stdout = io::stdout();
        let mut out = io::BufWriter::with_capacity(65536, stdout.lock());
        write_frame(&mut out, frame)?;
        out.flush()?;
        Ok(())
    }

    fn focus(&mut self) {
        // The console owns keyboard focus while attached
        debug!("Console focused");
    }

    fn poll_input(&mut self) -> Vec<InputEvent> {
        let mut events = Vec::new();
        let mut timeout = self.poll_timeout;
        while let Some(event) = Self::next_event(timeout) {
            timeout = Duration::ZERO;
            match event {
                Event::Key(key) => events.push(InputEvent::Key(key)),
                Event::Paste(text) => events.push(InputEvent::Paste(text)),
                Event::Mouse(mouse) if mouse.kind == MouseEventKind::Down(MouseButton::Left) => {
                    events.push(InputEvent::Click {
                        col: mouse.column,
                        row: mouse.row,
                    });
                }
                Event::Resize(..) => events.push(InputEvent::Resized),
                _ => {}
            }
        }
        events
    }
}

impl Drop for CrosstermSurface {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Draw a whole frame inside a synchronized update
pub fn write_frame<W: Write>(out: &mut W, frame: &Frame) -> io::Result<()> {
    write!(out, "\x1b[?2026h")?;
    queue!(out, Hide)?;

    let num_cols = frame.dimensions.cols;
    let mut line_buffer = String::with_capacity(256);
    for (row_idx, row) in frame.rows.iter().enumerate() {
        queue!(out, MoveTo(0, row_idx as u16))?;
        write!(out, "\x1b[K")?;

        let mut current_attrs = CellAttrs::default();
        let mut col_idx: u16 = 0;
        for cell in &row.cells {
            if col_idx >= num_cols {
                break;
            }
            if cell.is_continuation() {
                col_idx += 1;
                continue;
            }
            if cell.attrs != current_attrs {
                if !line_buffer.is_empty() {
                    apply_attrs(out, &current_attrs)?;
                    write!(out, "{line_buffer}")?;
                    line_buffer.clear();
                }
                current_attrs = cell.attrs.clone();
            }
            line_buffer.push_str(cell.display_char());
            col_idx += cell.width.max(1) as u16;
        }

        if !line_buffer.is_empty() {
            apply_attrs(out, &current_attrs)?;
            write!(out, "{line_buffer}")?;
            line_buffer.clear();
        }
    }
    queue!(out, ResetColor, SetAttribute(Attribute::Reset))?;

    let cursor = &frame.cursor;
    queue!(out, MoveTo(cursor.col, cursor.row), cursor_style(cursor.shape))?;
    if cursor.visible {
        queue!(out, Show)?;
    }
    write!(out, "\x1b[?2026l")
}

fn apply_attrs<W: Write>(out: &mut W, attrs: &CellAttrs) -> io::Result<()> {
    queue!(out, SetAttribute(Attribute::Reset))?;

    let styles = [
        (AttrFlags::BOLD, Attribute::Bold),
        (AttrFlags::DIM, Attribute::Dim),
        (AttrFlags::ITALIC, Attribute::Italic),
        (AttrFlags::UNDERLINE, Attribute::Underlined),
        (AttrFlags::BLINK, Attribute::SlowBlink),
        (AttrFlags::INVERSE, Attribute::Reverse),
        (AttrFlags::HIDDEN, Attribute::Hidden),
        (AttrFlags::STRIKETHROUGH, Attribute::CrossedOut),
    ];
    for (flag, attribute) in styles {
        if attrs.flags.contains(flag) {
            queue!(out, SetAttribute(attribute))?;
        }
    }

    if let Some(fg) = crossterm_color(attrs.fg) {
        queue!(out, SetForegroundColor(fg))?;
    }
    if let Some(bg) = crossterm_color(attrs.bg) {
        queue!(out, SetBackgroundColor(bg))?;
    }
    Ok(())
}

/// `None` for the console's default color
fn crossterm_color(color: Color) -> Option<crossterm::style::Color> {
    match color {
        Color::Default => None,
        Color::Indexed(n) => Some(crossterm::style::Color::AnsiValue(n)),
        Color::Rgb(r, g, b) => Some(crossterm::style::Color::Rgb { r, g, b }),
    }
}

fn cursor_style(shape: CursorShape) -> SetCursorStyle {
    match shape {
        CursorShape::Default => SetCursorStyle::DefaultUserShape,
        CursorShape::BlinkingBlock => SetCursorStyle::BlinkingBlock,
        CursorShape::SteadyBlock => SetCursorStyle::SteadyBlock,
        CursorShape::BlinkingUnderline => SetCursorStyle::BlinkingUnderScore,
        CursorShape::SteadyUnderline => SetCursorStyle::SteadyUnderScore,
        CursorShape::BlinkingBar => SetCursorStyle::BlinkingBar,
        CursorShape::SteadyBar => SetCursorStyle::SteadyBar,
    }
}
