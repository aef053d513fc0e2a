//! In-memory worksheet (1-based row/col), built from calamine values and formulas.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    /// Formula text without the leading `=`, plus whatever result the file had cached.
    Formula { expr: String, cached: Box<CellValue> },
}

impl CellValue {
    pub fn formula(expr: impl Into<String>, cached: CellValue) -> Self {
        CellValue::Formula {
            expr: expr.into(),
            cached: Box::new(cached),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Display text of the cell. Formulas render as `=expr`, never as their cached result.
    pub fn text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => crate::excel::format_number(*n),
            CellValue::Text(s) => s.clone(),
            CellValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            CellValue::Formula { expr, .. } => format!("={}", expr),
        }
    }
}

static EMPTY: CellValue = CellValue::Empty;

#[derive(Debug, Clone, Default)]
pub struct SheetGrid {
    name: String,
    cells: BTreeMap<(u32, u32), CellValue>,
    max_row: u32,
    max_col: u32,
}

impl SheetGrid {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Build a grid from rows of values starting at A1. Handy for fixtures.
    pub fn from_rows(name: impl Into<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let mut grid = Self::new(name);
        for (r, row) in rows.into_iter().enumerate() {
            for (c, value) in row.into_iter().enumerate() {
                grid.set(r as u32 + 1, c as u32 + 1, value);
            }
        }
        grid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set(&mut self, row: u32, col: u32, value: CellValue) {
        if row == 0 || col == 0 {
            return;
        }
        if matches!(value, CellValue::Empty) {
            self.cells.remove(&(row, col));
            return;
        }
        self.max_row = self.max_row.max(row);
        self.max_col = self.max_col.max(col);
        self.cells.insert((row, col), value);
    }

    pub fn get(&self, row: u32, col: u32) -> &CellValue {
        self.cells.get(&(row, col)).unwrap_or(&EMPTY)
    }

    pub fn text(&self, row: u32, col: u32) -> String {
        self.get(row, col).text()
    }

    pub fn row_count(&self) -> u32 {
        self.max_row
    }

    pub fn column_count(&self) -> u32 {
        self.max_col
    }

    /// Non-empty cells of one row in column order.
    pub fn row_cells(&self, row: u32) -> impl Iterator<Item = (u32, &CellValue)> {
        self.cells
            .range((row, 1)..=(row, u32::MAX))
            .map(|(&(_, col), value)| (col, value))
    }

    /// All stored cells in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, &CellValue)> {
        self.cells.iter().map(|(&(r, c), v)| (r, c, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_bounds_and_row_iteration() {
        let mut grid = SheetGrid::new("VV");
        grid.set(3, 2, CellValue::Text("Typ".into()));
        grid.set(3, 8, CellValue::Number(4.0));
        grid.set(5, 1, CellValue::Empty);
        assert_eq!(grid.row_count(), 3);
        assert_eq!(grid.column_count(), 8);
        let cols: Vec<u32> = grid.row_cells(3).map(|(c, _)| c).collect();
        assert_eq!(cols, vec![2, 8]);
        assert_eq!(grid.get(9, 9), &CellValue::Empty);
    }

    #[test]
    fn formula_text_is_never_the_cached_result() {
        let cell = CellValue::formula("G5*1", CellValue::Number(180.0));
        assert_eq!(cell.text(), "=G5*1");
    }
}
