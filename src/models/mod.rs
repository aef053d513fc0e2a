pub mod line_item;
pub mod sheet_grid;

pub use line_item::{ColumnRole, HeaderColumnMap, LineItem, ParsedSheet};
pub use sheet_grid::{CellValue, SheetGrid};
