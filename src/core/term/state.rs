//! Screen model
//!
//! Character grid, cursor and modes of the default emulator engine. The
//! parser in [`super::parser`] drives every mutation; nothing here knows
//! about escape sequences.

use bitflags::bitflags;
use unicode_width::UnicodeWidthChar;

/// Which of the two screens receives output
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ActiveScreen {
    #[default]
    Primary,
    Alternate,
}

/// A screen buffer together with its own cursor
pub struct Screen {
    pub buffer: ScreenBuffer,
    pub cursor: CursorState,
}

impl Screen {
    fn new(cols: u16, rows: u16, scrollback_limit: usize) -> Self {
        Self {
            buffer: ScreenBuffer::new(cols, rows, scrollback_limit),
            cursor: CursorState::default(),
        }
    }
}

/// Terminal state holding all screen data
pub struct TerminalState {
    pub cols: u16,
    pub rows: u16,
    pub primary: Screen,
    pub alternate: Screen,
    pub active: ActiveScreen,
    pub current_attrs: CellAttrs,
    pub modes: TerminalModes,
    pub title: String,
    /// Scroll region (top, bottom) - 0-indexed, inclusive
    pub scroll_region: (u16, u16),
}

impl TerminalState {
    pub fn new(cols: u16, rows: u16, scrollback_limit: usize) -> Self {
        Self {
            cols,
            rows,
            primary: Screen::new(cols, rows, scrollback_limit),
            // The alternate screen never keeps history
            alternate: Screen::new(cols, rows, 0),
            active: ActiveScreen::Primary,
            current_attrs: CellAttrs::default(),
            modes: TerminalModes::default(),
            title: String::new(),
            scroll_region: (0, rows.saturating_sub(1)),
        }
    }

    /// Full reset (RIS), keeping geometry, history limit and fixed modes
    pub fn reset(&mut self) {
        let limit = self.primary.buffer.scrollback_limit;
        let convert_eol = self.modes.convert_eol;
        *self = Self::new(self.cols, self.rows, limit);
        self.modes.convert_eol = convert_eol;
    }

    pub fn screen(&self) -> &Screen {
        match self.active {
            ActiveScreen::Primary => &self.primary,
            ActiveScreen::Alternate => &self.alternate,
        }
    }

    pub fn screen_mut(&mut self) -> &mut Screen {
        match self.active {
            ActiveScreen::Primary => &mut self.primary,
            ActiveScreen::Alternate => &mut self.alternate,
        }
    }

    pub fn cursor(&self) -> &CursorState {
        &self.screen().cursor
    }

    pub fn cursor_mut(&mut self) -> &mut CursorState {
        &mut self.screen_mut().cursor
    }

    /// Resize both screens.
    ///
    /// When the primary screen shrinks below its cursor, the rows above are
    /// moved into history so the cursor line stays visible.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let overflow = (self.primary.cursor.row + 1).saturating_sub(rows);
        for _ in 0..overflow {
            if self.primary.buffer.rows.is_empty() {
                break;
            }
            let row = self.primary.buffer.rows.remove(0);
            self.primary.buffer.push_to_scrollback(row);
        }
        self.primary.cursor.row -= overflow.min(self.primary.cursor.row);

        self.cols = cols;
        self.rows = rows;
        self.primary.buffer.resize(cols, rows);
        self.alternate.buffer.resize(cols, rows);
        self.scroll_region = (0, rows.saturating_sub(1));

        let max_col = cols.saturating_sub(1);
        let max_row = rows.saturating_sub(1);
        for screen in [&mut self.primary, &mut self.alternate] {
            screen.cursor.col = screen.cursor.col.min(max_col);
            screen.cursor.row = screen.cursor.row.min(max_row);
        }
    }

    /// Put a character at the current cursor position
    pub fn put_char(&mut self, ch: char) {
        let width = ch.width().unwrap_or(0) as u16;
        if width == 0 {
            self.append_to_previous_cell(ch);
            return;
        }

        // Deferred wrap: the cursor may sit one past the last column
        if self.cursor().col + width > self.cols {
            if self.modes.auto_wrap {
                let row = self.cursor().row as usize;
                self.screen_mut().buffer.rows[row].wrapped = true;
                self.cursor_mut().col = 0;
                self.linefeed();
            } else {
                self.cursor_mut().col = self.cols.saturating_sub(width);
            }
        }

        let (row, col) = {
            let cursor = self.cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        if col >= self.cols as usize {
            return;
        }

        if self.modes.insert_mode {
            self.insert_blank_cells(width as usize);
        }
        self.clear_wide_char_at(row, col);

        let attrs = self.current_attrs.clone();
        let cols = self.cols as usize;
        let cells = &mut self.screen_mut().buffer.rows[row].cells;
        cells[col] = Cell {
            grapheme: ch.to_string(),
            width: width as u8,
            attrs: attrs.clone(),
        };
        if width == 2 && col + 1 < cols {
            cells[col + 1] = Cell::continuation(&attrs);
        }

        self.cursor_mut().col += width;
    }

    fn append_to_previous_cell(&mut self, ch: char) {
        let (row, col) = {
            let cursor = self.cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        if col == 0 {
            return;
        }
        let cells = &mut self.screen_mut().buffer.rows[row].cells;
        // Skip back over the continuation half of a wide character
        let mut target = col - 1;
        if target > 0 && cells[target].is_continuation() {
            target -= 1;
        }
        if let Some(cell) = cells.get_mut(target) {
            cell.grapheme.push(ch);
        }
    }

    /// Blank out both halves of a wide character that overlaps (row, col)
    fn clear_wide_char_at(&mut self, row: usize, col: usize) {
        let attrs = self.current_attrs.clone();
        let cells = &mut self.screen_mut().buffer.rows[row].cells;

        if col > 0 && cells[col].is_continuation() {
            cells[col - 1] = Cell::blank(&attrs);
        }
        if cells[col].width == 2 && col + 1 < cells.len() {
            cells[col + 1] = Cell::blank(&attrs);
        }
    }

    /// Shift cells right from the cursor, dropping the overflow (ICH)
    pub fn insert_blank_cells(&mut self, n: usize) {
        let (row, col) = {
            let cursor = self.cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        let cells = &mut self.screen_mut().buffer.rows[row].cells;
        if col >= cells.len() {
            return;
        }
        let n = n.min(cells.len() - col);
        cells.truncate(cells.len() - n);
        for _ in 0..n {
            cells.insert(col, Cell::default());
        }
    }

    /// Shift cells left onto the cursor, padding at the end (DCH)
    pub fn delete_cells(&mut self, n: usize) {
        let (row, col) = {
            let cursor = self.cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        let cells = &mut self.screen_mut().buffer.rows[row].cells;
        if col >= cells.len() {
            return;
        }
        let n = n.min(cells.len() - col);
        cells.drain(col..col + n);
        cells.extend(std::iter::repeat_with(Cell::default).take(n));
    }

    /// Blank n cells from the cursor without moving anything (ECH)
    pub fn erase_cells(&mut self, n: usize) {
        let (row, col) = {
            let cursor = self.cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        let attrs = self.current_attrs.clone();
        let cells = &mut self.screen_mut().buffer.rows[row].cells;
        for cell in cells.iter_mut().skip(col).take(n) {
            cell.clear(&attrs);
        }
    }

    pub fn carriage_return(&mut self) {
        self.cursor_mut().col = 0;
    }

    /// Line feed - move cursor down, scroll at the bottom of the region
    pub fn linefeed(&mut self) {
        let row = self.cursor().row;
        if row == self.scroll_region.1 {
            self.scroll_up(1);
        } else if row + 1 < self.rows {
            self.cursor_mut().row += 1;
        }
    }

    pub fn backspace(&mut self) {
        let cols = self.cols;
        let cursor = self.cursor_mut();
        // A pending wrap counts as sitting on the last column
        cursor.col = cursor.col.min(cols.saturating_sub(1)).saturating_sub(1);
    }

    /// Advance to the next tab stop (every 8 columns)
    pub fn horizontal_tab(&mut self) {
        let cols = self.cols;
        let cursor = self.cursor_mut();
        cursor.col = ((cursor.col / 8 + 1) * 8).min(cols.saturating_sub(1));
    }

    /// Scroll the region up by n lines
    pub fn scroll_up(&mut self, n: u16) {
        let (top, bottom) = (self.scroll_region.0 as usize, self.scroll_region.1 as usize);
        let cols = self.cols;
        let buffer = &mut self.screen_mut().buffer;
        if bottom >= buffer.rows.len() || top > bottom {
            return;
        }
        for _ in 0..n {
            let removed = buffer.rows.remove(top);
            // Only lines leaving the top of the screen become history
            if top == 0 {
                buffer.push_to_scrollback(removed);
            }
            buffer.rows.insert(bottom, Row::new(cols));
        }
    }

    /// Scroll the region down by n lines
    pub fn scroll_down(&mut self, n: u16) {
        let (top, bottom) = (self.scroll_region.0 as usize, self.scroll_region.1 as usize);
        let cols = self.cols;
        let buffer = &mut self.screen_mut().buffer;
        if bottom >= buffer.rows.len() || top > bottom {
            return;
        }
        for _ in 0..n {
            buffer.rows.remove(bottom);
            buffer.rows.insert(top, Row::new(cols));
        }
    }

    pub fn cursor_up(&mut self, n: u16) {
        let cursor = self.cursor_mut();
        cursor.row = cursor.row.saturating_sub(n);
    }

    pub fn cursor_down(&mut self, n: u16) {
        let max_row = self.rows.saturating_sub(1);
        let cursor = self.cursor_mut();
        cursor.row = cursor.row.saturating_add(n).min(max_row);
    }

    pub fn cursor_forward(&mut self, n: u16) {
        let max_col = self.cols.saturating_sub(1);
        let cursor = self.cursor_mut();
        cursor.col = cursor.col.saturating_add(n).min(max_col);
    }

    pub fn cursor_backward(&mut self, n: u16) {
        let cursor = self.cursor_mut();
        cursor.col = cursor.col.saturating_sub(n);
    }

    /// Set cursor position (1-indexed parameters)
    pub fn cursor_position(&mut self, row: u16, col: u16) {
        let (rows, cols) = (self.rows, self.cols);
        let cursor = self.cursor_mut();
        cursor.row = row.saturating_sub(1).min(rows.saturating_sub(1));
        cursor.col = col.saturating_sub(1).min(cols.saturating_sub(1));
    }

    /// Erase in display (ED)
    pub fn erase_in_display(&mut self, mode: u16) {
        let cursor_row = self.cursor().row as usize;
        let attrs = self.current_attrs.clone();
        match mode {
            0 => {
                self.erase_in_line(0);
                let buffer = &mut self.screen_mut().buffer;
                for row in buffer.rows.iter_mut().skip(cursor_row + 1) {
                    row.clear(&attrs);
                }
            }
            1 => {
                let buffer = &mut self.screen_mut().buffer;
                for row in buffer.rows.iter_mut().take(cursor_row) {
                    row.clear(&attrs);
                }
                self.erase_in_line(1);
            }
            2 => {
                for row in self.screen_mut().buffer.rows.iter_mut() {
                    row.clear(&attrs);
                }
            }
            3 => self.screen_mut().buffer.scrollback.clear(),
            _ => {}
        }
    }

    /// Erase in line (EL)
    pub fn erase_in_line(&mut self, mode: u16) {
        let (row, col) = {
            let cursor = self.cursor();
            (cursor.row as usize, cursor.col as usize)
        };
        let attrs = self.current_attrs.clone();
        let Some(line) = self.screen_mut().buffer.rows.get_mut(row) else {
            return;
        };
        match mode {
            0 => line.cells.iter_mut().skip(col).for_each(|c| c.clear(&attrs)),
            1 => line.cells.iter_mut().take(col + 1).for_each(|c| c.clear(&attrs)),
            2 => line.clear(&attrs),
            _ => {}
        }
    }

    /// Insert blank lines at the cursor, inside the scroll region (IL)
    pub fn insert_lines(&mut self, n: u16) {
        let row = self.cursor().row as usize;
        let (top, bottom) = (self.scroll_region.0 as usize, self.scroll_region.1 as usize);
        if row < top || row > bottom {
            return;
        }
        let cols = self.cols;
        let buffer = &mut self.screen_mut().buffer;
        for _ in 0..n.min((bottom - row + 1) as u16) {
            buffer.rows.remove(bottom);
            buffer.rows.insert(row, Row::new(cols));
        }
    }

    /// Delete lines at the cursor, inside the scroll region (DL)
    pub fn delete_lines(&mut self, n: u16) {
        let row = self.cursor().row as usize;
        let (top, bottom) = (self.scroll_region.0 as usize, self.scroll_region.1 as usize);
        if row < top || row > bottom {
            return;
        }
        let cols = self.cols;
        let buffer = &mut self.screen_mut().buffer;
        for _ in 0..n.min((bottom - row + 1) as u16) {
            buffer.rows.remove(row);
            buffer.rows.insert(bottom, Row::new(cols));
        }
    }

    /// Set scroll region (DECSTBM, 1-indexed)
    pub fn set_scroll_region(&mut self, top: u16, bottom: u16) {
        let max_row = self.rows.saturating_sub(1);
        let top = top.saturating_sub(1).min(max_row);
        let bottom = bottom.saturating_sub(1).min(max_row);
        if top < bottom {
            self.scroll_region = (top, bottom);
        }
    }

    pub fn save_cursor(&mut self) {
        let attrs = self.current_attrs.clone();
        let cursor = self.cursor_mut();
        cursor.saved = Some(SavedCursor {
            col: cursor.col,
            row: cursor.row,
            attrs,
        });
    }

    pub fn restore_cursor(&mut self) {
        if let Some(saved) = self.cursor().saved.clone() {
            let cursor = self.cursor_mut();
            cursor.col = saved.col;
            cursor.row = saved.row;
            self.current_attrs = saved.attrs;
        }
    }

    /// Set or reset a DEC private mode (DECSET/DECRST)
    pub fn set_private_mode(&mut self, mode: u16, enable: bool) {
        match mode {
            1 => self.modes.application_cursor = enable,
            7 => self.modes.auto_wrap = enable,
            25 => self.cursor_mut().visible = enable,
            47 | 1047 => self.switch_screen(enable),
            1048 => {
                if enable {
                    self.save_cursor();
                } else {
                    self.restore_cursor();
                }
            }
            1049 => {
                if enable {
                    self.save_cursor();
                    self.switch_screen(true);
                    self.alternate.cursor = CursorState::default();
                } else {
                    self.switch_screen(false);
                    self.restore_cursor();
                }
            }
            2004 => self.modes.bracketed_paste = enable,
            _ => tracing::trace!("Ignoring private mode {mode}"),
        }
    }

    fn switch_screen(&mut self, alternate: bool) {
        if alternate {
            if self.active != ActiveScreen::Alternate {
                self.alternate.buffer = ScreenBuffer::new(self.cols, self.rows, 0);
                self.active = ActiveScreen::Alternate;
            }
        } else {
            self.active = ActiveScreen::Primary;
        }
    }

    /// Reverse index - cursor up, scroll down at the top of the region
    pub fn reverse_index(&mut self) {
        if self.cursor().row == self.scroll_region.0 {
            self.scroll_down(1);
        } else {
            self.cursor_up(1);
        }
    }

    /// Clear history and screen, keeping the cursor line as the first row
    pub fn clear(&mut self) {
        let cols = self.cols;
        let rows = self.rows as usize;
        let screen = self.screen_mut();
        let row = screen.cursor.row as usize;
        let kept = std::mem::replace(&mut screen.buffer.rows[row], Row::new(cols));
        screen.buffer.scrollback.clear();
        screen.buffer.rows = std::iter::once(kept)
            .chain((1..rows).map(|_| Row::new(cols)))
            .collect();
        screen.cursor.row = 0;
    }

    /// Text of a visible row, with trailing blanks trimmed
    pub fn line_text(&self, row: usize) -> Option<String> {
        self.screen().buffer.rows.get(row).map(Row::text)
    }
}

/// Screen buffer with scrollback
pub struct ScreenBuffer {
    /// Visible rows
    pub rows: Vec<Row>,
    /// Lines that scrolled off the top, oldest first
    pub scrollback: Vec<Row>,
    pub scrollback_limit: usize,
}

impl ScreenBuffer {
    pub fn new(cols: u16, rows: u16, scrollback_limit: usize) -> Self {
        Self {
            rows: (0..rows).map(|_| Row::new(cols)).collect(),
            scrollback: Vec::new(),
            scrollback_limit,
        }
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.rows.truncate(rows as usize);
        while self.rows.len() < rows as usize {
            self.rows.push(Row::new(cols));
        }
        for row in self.rows.iter_mut().chain(self.scrollback.iter_mut()) {
            row.resize(cols);
        }
    }

    pub fn push_to_scrollback(&mut self, row: Row) {
        if self.scrollback_limit == 0 {
            return;
        }
        self.scrollback.push(row);
        if self.scrollback.len() > self.scrollback_limit {
            let excess = self.scrollback.len() - self.scrollback_limit;
            self.scrollback.drain(..excess);
        }
    }

    /// Total number of lines (history + visible)
    pub fn total_lines(&self) -> usize {
        self.scrollback.len() + self.rows.len()
    }
}

/// A single row
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    pub cells: Vec<Cell>,
    /// Set when output wrapped past the end of this row
    pub wrapped: bool,
}

impl Row {
    pub fn new(cols: u16) -> Self {
        Self {
            cells: vec![Cell::default(); cols as usize],
            wrapped: false,
        }
    }

    pub fn resize(&mut self, cols: u16) {
        self.cells.resize(cols as usize, Cell::default());
    }

    pub fn clear(&mut self, attrs: &CellAttrs) {
        for cell in &mut self.cells {
            cell.clear(attrs);
        }
        self.wrapped = false;
    }

    /// Displayed text, one entry per column, trailing blanks trimmed
    pub fn text(&self) -> String {
        let mut text: String = self
            .cells
            .iter()
            .filter(|cell| !cell.is_continuation())
            .map(Cell::display_char)
            .collect();
        text.truncate(text.trim_end().len());
        text
    }
}

/// A single cell
#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    pub grapheme: String,
    /// Display width: 1, 2 for wide characters, 0 for the right half of one
    pub width: u8,
    pub attrs: CellAttrs,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            grapheme: String::new(),
            width: 1,
            attrs: CellAttrs::default(),
        }
    }
}

impl Cell {
    pub fn blank(attrs: &CellAttrs) -> Self {
        Self {
            grapheme: String::new(),
            width: 1,
            attrs: attrs.clone(),
        }
    }

    pub fn continuation(attrs: &CellAttrs) -> Self {
        Self {
            grapheme: String::new(),
            width: 0,
            attrs: attrs.clone(),
        }
    }

    pub fn clear(&mut self, attrs: &CellAttrs) {
        *self = Self::blank(attrs);
    }

    pub fn is_continuation(&self) -> bool {
        self.width == 0
    }

    /// The display string (space if empty)
    pub fn display_char(&self) -> &str {
        if self.grapheme.is_empty() {
            " "
        } else {
            &self.grapheme
        }
    }
}

/// Cell attributes
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CellAttrs {
    pub fg: Color,
    pub bg: Color,
    pub flags: AttrFlags,
}

impl CellAttrs {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Color {
    #[default]
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AttrFlags: u16 {
        const BOLD          = 0b0000_0000_0001;
        const DIM           = 0b0000_0000_0010;
        const ITALIC        = 0b0000_0000_0100;
        const UNDERLINE     = 0b0000_0000_1000;
        const BLINK         = 0b0000_0001_0000;
        const INVERSE       = 0b0000_0010_0000;
        const HIDDEN        = 0b0000_0100_0000;
        const STRIKETHROUGH = 0b0000_1000_0000;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CursorShape {
    #[default]
    Default,
    BlinkingBlock,
    SteadyBlock,
    BlinkingUnderline,
    SteadyUnderline,
    BlinkingBar,
    SteadyBar,
}

impl CursorShape {
    /// Create from a DECSCUSR parameter (`CSI Ps SP q`)
    pub fn from_decscusr(n: u16) -> Self {
        match n {
            1 => CursorShape::BlinkingBlock,
            2 => CursorShape::SteadyBlock,
            3 => CursorShape::BlinkingUnderline,
            4 => CursorShape::SteadyUnderline,
            5 => CursorShape::BlinkingBar,
            6 => CursorShape::SteadyBar,
            _ => CursorShape::Default,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CursorState {
    pub col: u16,
    pub row: u16,
    pub visible: bool,
    pub shape: CursorShape,
    pub saved: Option<SavedCursor>,
}

impl Default for CursorState {
    fn default() -> Self {
        Self {
            col: 0,
            row: 0,
            visible: true,
            shape: CursorShape::Default,
            saved: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SavedCursor {
    pub col: u16,
    pub row: u16,
    pub attrs: CellAttrs,
}

/// Terminal modes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TerminalModes {
    /// DECCKM: cursor keys send SS3 sequences
    pub application_cursor: bool,
    /// DECAWM
    pub auto_wrap: bool,
    /// IRM
    pub insert_mode: bool,
    /// LNM: LF also returns the carriage; Enter sends CR LF
    pub linefeed_newline: bool,
    /// Fixed at construction: LF also returns the carriage
    pub convert_eol: bool,
    pub bracketed_paste: bool,
}

impl Default for TerminalModes {
    fn default() -> Self {
        Self {
            application_cursor: false,
            auto_wrap: true,
            insert_mode: false,
            linefeed_newline: false,
            convert_eol: false,
            bracketed_paste: false,
        }
    }
}
