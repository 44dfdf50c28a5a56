//! Link detection behavior
//!
//! Scans every rendered row for URLs and remembers where they are so a click
//! on one of their cells can activate them.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use super::Addon;
use crate::core::emulator::Emulator;
use crate::core::term::Row;
use crate::surface::Frame;

/// Scheme, `//`, then URL characters, never ending on punctuation
static URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:https?|HTTPS?)://[^\s"'!*(){}|\\^<>`]*[^\s"':,.!?{}|\\^~\[\]`()<>]"#)
        .unwrap()
});

/// A detected link on the visible screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub row: u16,
    /// First column covered by the link
    pub start_col: u16,
    /// One past the last column covered by the link
    pub end_col: u16,
    pub uri: String,
}

impl Link {
    pub fn contains(&self, col: u16, row: u16) -> bool {
        self.row == row && (self.start_col..self.end_col).contains(&col)
    }
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Clipboard unavailable: {0}")]
    Clipboard(#[from] arboard::Error),
}

/// Receives link activations
pub trait LinkHandler {
    fn open(&mut self, uri: &str) -> Result<(), LinkError>;
}

/// Records activations in the log only
#[derive(Debug, Default)]
pub struct LogLinkHandler;

impl LinkHandler for LogLinkHandler {
    fn open(&mut self, uri: &str) -> Result<(), LinkError> {
        info!("Link activated: {uri}");
        Ok(())
    }
}

/// Copies activated links to the system clipboard
#[derive(Default)]
pub struct ClipboardLinkHandler {
    clipboard: Option<arboard::Clipboard>,
}

impl LinkHandler for ClipboardLinkHandler {
    fn open(&mut self, uri: &str) -> Result<(), LinkError> {
        if self.clipboard.is_none() {
            self.clipboard = Some(arboard::Clipboard::new()?);
        }
        if let Some(clipboard) = self.clipboard.as_mut() {
            clipboard.set_text(uri)?;
            info!("Copied link to clipboard: {uri}");
        }
        Ok(())
    }
}

pub trait LinkBehavior: Addon {
    /// Re-detect links in a freshly rendered frame
    fn scan(&mut self, frame: &Frame);

    fn links(&self) -> &[Link];

    fn link_at(&self, col: u16, row: u16) -> Option<&Link> {
        self.links().iter().find(|link| link.contains(col, row))
    }

    /// Hand a link to the configured handler
    fn open_link(&mut self, link: &Link);
}

pub struct LinkDetector {
    pattern: Regex,
    handler: Box<dyn LinkHandler>,
    links: Vec<Link>,
    active: bool,
}

impl LinkDetector {
    pub fn new(handler: Box<dyn LinkHandler>) -> Self {
        Self::with_pattern(URL_REGEX.clone(), handler)
    }

    pub fn with_pattern(pattern: Regex, handler: Box<dyn LinkHandler>) -> Self {
        Self {
            pattern,
            handler,
            links: Vec::new(),
            active: false,
        }
    }

    fn scan_row(&self, row_index: u16, row: &Row, links: &mut Vec<Link>) {
        // Byte offset in `text` -> column, for every grapheme start
        let mut text = String::new();
        let mut columns = Vec::new();
        for (col, cell) in row.cells.iter().enumerate() {
            if cell.is_continuation() {
                continue;
            }
            columns.push((text.len(), col as u16));
            text.push_str(cell.display_char());
        }
        let column_at = |offset: usize| -> u16 {
            match columns.binary_search_by_key(&offset, |&(start, _)| start) {
                Ok(i) => columns[i].1,
                Err(i) => columns[i.saturating_sub(1)].1,
            }
        };

        for found in self.pattern.find_iter(&text) {
            if found.as_str().is_empty() {
                continue;
            }
            let start_col = column_at(found.start());
            let last_col = column_at(found.end() - 1);
            let width = row.cells.get(last_col as usize).map_or(1, |c| c.width.max(1));
            links.push(Link {
                row: row_index,
                start_col,
                end_col: last_col + width as u16,
                uri: found.as_str().to_string(),
            });
        }
    }
}

impl Addon for LinkDetector {
    fn name(&self) -> &'static str {
        "links"
    }

    fn activate(&mut self, _emulator: &dyn Emulator) {
        self.active = true;
    }

    fn dispose(&mut self) {
        self.active = false;
        self.links.clear();
    }
}

impl LinkBehavior for LinkDetector {
    fn scan(&mut self, frame: &Frame) {
        if !self.active {
            return;
        }
        let mut links = Vec::new();
        for (index, row) in frame.rows.iter().enumerate() {
            self.scan_row(index as u16, row, &mut links);
        }
        self.links = links;
    }

    fn links(&self) -> &[Link] {
        &self.links
    }

    fn open_link(&mut self, link: &Link) {
        if let Err(error) = self.handler.open(&link.uri) {
            warn!("Failed to activate {}: {error}", link.uri);
        }
    }
}
