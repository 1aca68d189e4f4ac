//! Screen grid types exposed to test code.
//!
//! A [`Grid`] is an immutable picture of the terminal at one instant: a
//! `lines x columns` array of [`Cell`]s plus the cursor position. Every query
//! is bounds-checked; coordinates outside the grid are an error, never
//! clamped.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Terminal color of a cell.
///
/// The 16 standard colors plus `Default` form the stable core. Palette
/// entries above 15 and 24-bit colors are carried as `Indexed` and `Rgb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    BrightBlack,
    BrightRed,
    BrightGreen,
    BrightYellow,
    BrightBlue,
    BrightMagenta,
    BrightCyan,
    BrightWhite,
    /// Inherit the terminal's default color.
    #[default]
    Default,
    /// 256-color palette index, always >= 16.
    Indexed(u8),
    /// 24-bit color.
    Rgb(u8, u8, u8),
}

const NAMED: [Color; 16] = [
    Color::Black,
    Color::Red,
    Color::Green,
    Color::Yellow,
    Color::Blue,
    Color::Magenta,
    Color::Cyan,
    Color::White,
    Color::BrightBlack,
    Color::BrightRed,
    Color::BrightGreen,
    Color::BrightYellow,
    Color::BrightBlue,
    Color::BrightMagenta,
    Color::BrightCyan,
    Color::BrightWhite,
];

impl Color {
    /// Map a palette index to a color. Indices 0-15 become named colors.
    pub fn from_index(idx: u8) -> Self {
        NAMED
            .get(usize::from(idx))
            .copied()
            .unwrap_or(Color::Indexed(idx))
    }

    /// The 16 standard colors in palette order.
    pub fn named() -> &'static [Color; 16] {
        &NAMED
    }

    /// Whether this is one of the 16 standard colors or `Default`.
    pub fn is_standard(&self) -> bool {
        !matches!(self, Color::Indexed(_) | Color::Rgb(..))
    }
}

/// A single rendering attribute that can be asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    Bold,
    Italic,
    Underline,
    Blink,
    Inverse,
    Strikethrough,
}

impl Style {
    pub const ALL: [Style; 6] = [
        Style::Bold,
        Style::Italic,
        Style::Underline,
        Style::Blink,
        Style::Inverse,
        Style::Strikethrough,
    ];

    pub fn flag(self) -> StyleFlags {
        match self {
            Style::Bold => StyleFlags::BOLD,
            Style::Italic => StyleFlags::ITALIC,
            Style::Underline => StyleFlags::UNDERLINE,
            Style::Blink => StyleFlags::BLINK,
            Style::Inverse => StyleFlags::INVERSE,
            Style::Strikethrough => StyleFlags::STRIKETHROUGH,
        }
    }
}

bitflags! {
    /// Set of active styles on a cell.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct StyleFlags: u8 {
        const BOLD = 1 << 0;
        const ITALIC = 1 << 1;
        const UNDERLINE = 1 << 2;
        const BLINK = 1 << 3;
        const INVERSE = 1 << 4;
        const STRIKETHROUGH = 1 << 5;
    }
}

/// A single character position on the screen.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cell {
    /// The character(s) in this cell; empty for a blank cell.
    pub contents: String,
    /// Foreground color.
    pub fg: Color,
    /// Background color.
    pub bg: Color,
    /// Active styles.
    pub styles: StyleFlags,
    /// Right half of a double-width glyph drawn in the previous cell.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub wide_continuation: bool,
}

impl Cell {
    /// Text this cell contributes to a string read: a space when blank,
    /// nothing when it continues a wide glyph.
    pub fn text(&self) -> &str {
        if self.wide_continuation {
            ""
        } else if self.contents.is_empty() {
            " "
        } else {
            &self.contents
        }
    }
}

/// Fixed-size 2-D array of cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    columns: u16,
    lines: u16,
    cells: Vec<Cell>,
    /// Cursor position (line, column).
    cursor: (u16, u16),
    /// Styles the producing engine actually tracks.
    tracked_styles: StyleFlags,
}

impl Grid {
    /// A grid of untouched cells with the cursor at the origin.
    pub fn blank(columns: u16, lines: u16) -> Self {
        Self {
            columns,
            lines,
            cells: vec![Cell::default(); usize::from(columns) * usize::from(lines)],
            cursor: (0, 0),
            tracked_styles: StyleFlags::all(),
        }
    }

    /// Build a grid from row-major cells.
    ///
    /// Returns `GridShape` when the cell count does not match the
    /// dimensions.
    pub fn from_cells(
        columns: u16,
        lines: u16,
        cells: Vec<Cell>,
        cursor: (u16, u16),
        tracked_styles: StyleFlags,
    ) -> Result<Self> {
        let expected = usize::from(columns) * usize::from(lines);
        if cells.len() != expected {
            return Err(HarnessError::GridShape {
                lines,
                columns,
                expected,
                actual: cells.len(),
            });
        }
        Ok(Self {
            columns,
            lines,
            cells,
            cursor,
            tracked_styles,
        })
    }

    pub fn columns(&self) -> u16 {
        self.columns
    }

    pub fn lines(&self) -> u16 {
        self.lines
    }

    /// Cursor position as (line, column).
    pub fn cursor(&self) -> (u16, u16) {
        self.cursor
    }

    pub fn tracked_styles(&self) -> StyleFlags {
        self.tracked_styles
    }

    /// Look up one cell.
    pub fn cell(&self, line: usize, column: usize) -> Result<&Cell> {
        self.check_span(line, column, 1)?;
        Ok(&self.cells[self.index(line, column)])
    }

    /// Concatenate the text of `length` cells starting at (line, column).
    ///
    /// The span must lie entirely on one line.
    pub fn string_at(&self, line: usize, column: usize, length: usize) -> Result<String> {
        self.check_span(line, column, length)?;
        let start = self.index(line, column);
        Ok(self.cells[start..start + length]
            .iter()
            .map(Cell::text)
            .collect())
    }

    pub fn foreground_at(&self, line: usize, column: usize) -> Result<Color> {
        Ok(self.cell(line, column)?.fg)
    }

    pub fn background_at(&self, line: usize, column: usize) -> Result<Color> {
        Ok(self.cell(line, column)?.bg)
    }

    /// Whether `style` is active at (line, column).
    ///
    /// Fails with `UnsupportedStyle` when the engine that produced this grid
    /// does not track the style at all.
    pub fn has_style_at(&self, line: usize, column: usize, style: Style) -> Result<bool> {
        let cell = self.cell(line, column)?;
        if !self.tracked_styles.contains(style.flag()) {
            return Err(HarnessError::UnsupportedStyle(style));
        }
        Ok(cell.styles.contains(style.flag()))
    }

    /// One full line of text, trailing blanks removed.
    pub fn line_text(&self, line: usize) -> Result<String> {
        let text = self.string_at(line, 0, usize::from(self.columns))?;
        Ok(text.trim_end().to_string())
    }

    /// All lines joined with newlines, trailing blank lines removed.
    pub fn text(&self) -> String {
        let mut rows: Vec<String> = (0..usize::from(self.lines))
            .filter_map(|line| self.line_text(line).ok())
            .collect();
        while rows.last().is_some_and(String::is_empty) {
            rows.pop();
        }
        rows.join("\n")
    }

    fn index(&self, line: usize, column: usize) -> usize {
        line * usize::from(self.columns) + column
    }

    fn check_span(&self, line: usize, column: usize, length: usize) -> Result<()> {
        let inside = length > 0
            && line < usize::from(self.lines)
            && column
                .checked_add(length)
                .is_some_and(|end| end <= usize::from(self.columns));
        if inside {
            Ok(())
        } else {
            Err(HarnessError::OutOfBounds {
                line,
                column,
                length,
                lines: self.lines,
                columns: self.columns,
            })
        }
    }
}
