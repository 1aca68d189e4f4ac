//! Terminal emulation engines.
//!
//! The harness only needs an engine that accepts raw bytes and can produce
//! a [`Grid`]. [`Vt100Engine`] is the default, backed by the `vt100` crate.

use super::types::{Cell, Color, Grid, StyleFlags};

/// A pluggable terminal emulator.
///
/// Implementations must handle at least cursor movement, line and screen
/// erase, and SGR color/style sequences.
pub trait Emulator {
    /// Consume a chunk of output bytes, in the order they were read.
    fn feed(&mut self, bytes: &[u8]);

    /// Screen dimensions as (columns, lines).
    fn size(&self) -> (u16, u16);

    /// Styles this engine records per cell.
    fn tracked_styles(&self) -> StyleFlags;

    /// The grid as it stands after every byte fed so far.
    fn snapshot(&self) -> Grid;
}

/// Emulator backed by `vt100::Parser`.
pub struct Vt100Engine {
    parser: vt100::Parser,
}

impl Vt100Engine {
    /// vt100 keeps no blink or strikethrough attribute.
    const TRACKED: StyleFlags = StyleFlags::BOLD
        .union(StyleFlags::ITALIC)
        .union(StyleFlags::UNDERLINE)
        .union(StyleFlags::INVERSE);

    pub fn new(columns: u16, lines: u16) -> Self {
        Self {
            // No scrollback: only the visible screen is ever queried.
            parser: vt100::Parser::new(lines, columns, 0),
        }
    }
}

impl Emulator for Vt100Engine {
    fn feed(&mut self, bytes: &[u8]) {
        self.parser.process(bytes);
    }

    fn size(&self) -> (u16, u16) {
        let (rows, cols) = self.parser.screen().size();
        (cols, rows)
    }

    fn tracked_styles(&self) -> StyleFlags {
        Self::TRACKED
    }

    fn snapshot(&self) -> Grid {
        let screen = self.parser.screen();
        let (rows, cols) = screen.size();

        let mut cells = Vec::with_capacity(usize::from(rows) * usize::from(cols));
        for row in 0..rows {
            for col in 0..cols {
                cells.push(screen.cell(row, col).map(cell_from_vt100).unwrap_or_default());
            }
        }

        let grid = Grid::from_cells(
            cols,
            rows,
            cells,
            screen.cursor_position(),
            self.tracked_styles(),
        );
        // One cell is pushed per position, so the shape always matches.
        debug_assert!(grid.is_ok(), "vt100 screen produced a misshapen grid");
        grid.unwrap_or_else(|_| Grid::blank(cols, rows))
    }
}

fn color_from_vt100(color: vt100::Color) -> Color {
    match color {
        vt100::Color::Default => Color::Default,
        vt100::Color::Idx(idx) => Color::from_index(idx),
        vt100::Color::Rgb(r, g, b) => Color::Rgb(r, g, b),
    }
}

fn cell_from_vt100(cell: &vt100::Cell) -> Cell {
    let mut styles = StyleFlags::empty();
    styles.set(StyleFlags::BOLD, cell.bold());
    styles.set(StyleFlags::ITALIC, cell.italic());
    styles.set(StyleFlags::UNDERLINE, cell.underline());
    styles.set(StyleFlags::INVERSE, cell.inverse());

    Cell {
        contents: cell.contents(),
        fg: color_from_vt100(cell.fgcolor()),
        bg: color_from_vt100(cell.bgcolor()),
        styles,
        wide_continuation: cell.is_wide_continuation(),
    }
}
