//! Cost-row ("K") extraction and the per-file template analysis used by detection.

use std::path::Path;

use crate::error::{CompareError, Result};
use crate::excel;
use crate::models::{CellValue, HeaderColumnMap, LineItem, ParsedSheet, SheetGrid};
use crate::services::excel_scanner::{find_columns, find_header_row, normalize_header, DEFAULT_SCAN_ROWS};
use crate::types::DetectionAnalysis;

/// Type-column value marking a priced cost row (normalized, lower-case).
pub const COST_MARKER: &str = "k";

/// Locale-tolerant number parsing: `1 234,50`, `1.234,50`, `1,234.50`, `12,5`.
pub fn parse_locale_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('=') {
        return None;
    }
    let compact: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}' && *c != '\u{202f}')
        .collect();
    let last_comma = compact.rfind(',');
    let last_dot = compact.rfind('.');
    let normalized = match (last_comma, last_dot) {
        (Some(c), Some(d)) if c > d => compact.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => compact.replace(',', ""),
        (Some(_), None) if compact.matches(',').count() > 1 => compact.replace(',', ""),
        (Some(_), None) => compact.replace(',', "."),
        _ => compact,
    };
    normalized.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Price value of a cell. Formulas are never trusted, whatever result they have cached.
pub fn safe_numeric_value(cell: &CellValue) -> Option<f64> {
    match cell {
        CellValue::Number(n) if n.is_finite() => Some(*n),
        CellValue::Text(s) => parse_locale_number(s),
        _ => None,
    }
}

fn is_cost_row(grid: &SheetGrid, row: u32, type_col: u32) -> bool {
    normalize_header(&grid.text(row, type_col)) == COST_MARKER
}

fn optional_text(grid: &SheetGrid, row: u32, col: Option<u32>) -> Option<String> {
    let col = col?;
    let value = grid.text(row, col).trim().to_string();
    (!value.is_empty()).then_some(value)
}

fn invalid_columns(grid: &SheetGrid) -> CompareError {
    CompareError::InvalidTemplate(format!(
        "Sheet \"{}\" is missing required columns (type + code or item number).",
        grid.name()
    ))
}

/// Walk rows below the header and collect cost rows as line items.
/// Returns the items plus the raw list of cost-row indices.
pub fn parse_line_items(
    grid: &SheetGrid,
    header_row: u32,
    columns: &HeaderColumnMap,
) -> Result<(Vec<LineItem>, Vec<u32>)> {
    let type_col = columns.item_type.ok_or_else(|| invalid_columns(grid))?;
    if !columns.is_usable() {
        return Err(invalid_columns(grid));
    }

    let mut items = Vec::new();
    let mut cost_rows = Vec::new();
    for row in header_row + 1..=grid.row_count() {
        if !is_cost_row(grid, row, type_col) {
            continue;
        }
        cost_rows.push(row);
        items.push(LineItem {
            item_number: optional_text(grid, row, columns.item_number),
            code: optional_text(grid, row, columns.code),
            unit_price: columns
                .unit_price
                .and_then(|c| safe_numeric_value(grid.get(row, c))),
            total_price: columns
                .total_price
                .and_then(|c| safe_numeric_value(grid.get(row, c))),
            row_index: row,
        });
    }
    Ok((items, cost_rows))
}

/// Detect header and columns, then parse cost rows. Fails on sheets that are not BOQ templates.
pub fn parse_sheet(grid: &SheetGrid) -> Result<ParsedSheet> {
    let header_row = find_header_row(grid, DEFAULT_SCAN_ROWS).ok_or_else(|| {
        CompareError::InvalidTemplate(format!(
            "Cannot find the header row in sheet \"{}\".",
            grid.name()
        ))
    })?;
    let column_map = find_columns(grid, header_row);
    let (items, cost_rows) = parse_line_items(grid, header_row, &column_map)?;
    Ok(ParsedSheet {
        items,
        header_row,
        column_map,
        cost_rows,
    })
}

/// Template analysis for detection. Never fails on layout problems, only reports them.
pub fn analyze_sheet(grid: &SheetGrid) -> DetectionAnalysis {
    let Some(header_row) = find_header_row(grid, DEFAULT_SCAN_ROWS) else {
        return DetectionAnalysis::default();
    };
    let column_map = find_columns(grid, header_row);
    let Some(type_col) = column_map.item_type.filter(|_| column_map.is_usable()) else {
        return DetectionAnalysis {
            header_row_index: Some(header_row),
            column_map,
            ..Default::default()
        };
    };

    let mut cost_row_count = 0;
    let mut priced_cost_row_count = 0;
    for row in header_row + 1..=grid.row_count() {
        if !is_cost_row(grid, row, type_col) {
            continue;
        }
        cost_row_count += 1;
        let priced = column_map
            .unit_price
            .and_then(|c| safe_numeric_value(grid.get(row, c)))
            .is_some();
        if priced {
            priced_cost_row_count += 1;
        }
    }

    DetectionAnalysis {
        header_row_index: Some(header_row),
        cost_row_count,
        priced_cost_row_count,
        column_map,
        is_valid_template: cost_row_count > 0,
    }
}

pub fn analyze_workbook_file(path: &Path) -> Result<DetectionAnalysis> {
    let grid = excel::read_first_sheet(path)?;
    Ok(analyze_sheet(&grid))
}
