use calamine::{open_workbook_auto, Data, Range, Reader};
use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use rust_xlsxwriter::{Formula, Worksheet};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::{CompareError, Result};
use crate::models::{CellValue, SheetGrid};

/// Column index to Excel letter, 1-based (1→A, 26→Z, 27→AA).
pub fn col_letter(column: u32) -> String {
    let mut n = column;
    let mut s = String::new();
    while n > 0 {
        let r = ((n - 1) % 26) as u8;
        s.insert(0, (b'A' + r) as char);
        n = (n - 1) / 26;
    }
    s
}

/// Excel letters to 1-based column index (A→1, AA→27). Upper-case only.
pub fn column_number(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    letters.bytes().try_fold(0u32, |acc, b| {
        b.is_ascii_uppercase()
            .then(|| acc * 26 + u32::from(b - b'A') + 1)
    })
}

/// `E3` → (row 3, column 5).
fn parse_cell_ref(reference: &str) -> Option<(u32, u32)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    Some((digits.parse().ok()?, column_number(letters)?))
}

/// A1-style reference for 1-based row/col.
pub fn cell_ref(row: u32, column: u32) -> String {
    format!("{}{}", col_letter(column), row)
}

/// Number as plain text: integers without a trailing `.0`.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Drop characters that corrupt the sheet XML (control chars except tab/newline/CR).
pub fn sanitize_cell(s: &str) -> String {
    s.chars()
        .filter(|&c| {
            let u = c as u32;
            c == '\t' || c == '\n' || c == '\r' || !(u < 0x20 || u == 0x7F || u == 0xFFFE || u == 0xFFFF)
        })
        .collect()
}

fn cell_from_data(value: &Data) -> CellValue {
    match value {
        Data::Empty => CellValue::Empty,
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Bool(*b),
        other => CellValue::Text(other.to_string()),
    }
}

fn merge_values(grid: &mut SheetGrid, range: &Range<Data>) {
    let Some((row0, col0)) = range.start() else {
        return;
    };
    for (r, c, value) in range.used_cells() {
        grid.set(row0 + r as u32 + 1, col0 + c as u32 + 1, cell_from_data(value));
    }
}

fn merge_formulas(grid: &mut SheetGrid, formulas: &Range<String>) {
    let Some((row0, col0)) = formulas.start() else {
        return;
    };
    for (r, c, expr) in formulas.used_cells() {
        let expr = expr.trim().trim_start_matches('=');
        if expr.is_empty() {
            continue;
        }
        let (row, col) = (row0 + r as u32 + 1, col0 + c as u32 + 1);
        let cached = grid.get(row, col).clone();
        grid.set(row, col, CellValue::formula(expr, cached));
    }
}

fn a1_reference() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\$?)([A-Z]{1,3})(\$?)([0-9]+)").expect("a1 reference regex"))
}

/// Move the relative parts of every A1 reference in `expr` by the given offset.
/// `$`-anchored parts and string literals stay as they are; references pushed off the sheet become `#REF!`.
pub fn shift_references(expr: &str, d_row: i64, d_col: i64) -> String {
    expr.split('"')
        .enumerate()
        .map(|(i, part)| {
            if i % 2 == 1 {
                part.to_string()
            } else {
                shift_segment(part, d_row, d_col)
            }
        })
        .collect::<Vec<_>>()
        .join("\"")
}

fn shift_segment(segment: &str, d_row: i64, d_col: i64) -> String {
    let name_like = |c: char| c.is_alphanumeric() || c == '_' || c == '.';
    let mut out = String::with_capacity(segment.len());
    let mut last = 0;
    for caps in a1_reference().captures_iter(segment) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let before = segment[..whole.start()].chars().next_back();
        let after = segment[whole.end()..].chars().next();
        // function names (LOG10) and defined names are not references
        if before.is_some_and(name_like) || after.is_some_and(|c| name_like(c) || c == '(') {
            continue;
        }
        let (Some(col), Ok(row)) = (column_number(&caps[2]), caps[4].parse::<i64>()) else {
            continue;
        };
        let (col_anchor, row_anchor) = (&caps[1], &caps[3]);
        let col = if col_anchor.is_empty() { i64::from(col) + d_col } else { i64::from(col) };
        let row = if row_anchor.is_empty() { row + d_row } else { row };

        out.push_str(&segment[last..whole.start()]);
        if col < 1 || row < 1 {
            out.push_str("#REF!");
        } else {
            out.push_str(&format!(
                "{}{}{}{}",
                col_anchor,
                col_letter(col as u32),
                row_anchor,
                row
            ));
        }
        last = whole.end();
    }
    out.push_str(&segment[last..]);
    out
}

fn is_open_xml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "xlsx" | "xlsm"))
        .unwrap_or(false)
}

fn read_part(archive: &mut ZipArchive<File>, name: &str) -> Result<Option<String>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    Ok(Some(xml))
}

/// Attribute value by local name (`r:id` is found as `id`).
fn attr(element: &BytesStart, key: &[u8]) -> Result<Option<String>> {
    for attribute in element.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        if attribute.key.local_name().as_ref() == key {
            return Ok(Some(attribute.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Zip path of the worksheet part named `sheet_name`, resolved through the workbook relationships.
fn sheet_part_path(archive: &mut ZipArchive<File>, sheet_name: &str) -> Result<Option<String>> {
    let Some(workbook) = read_part(archive, "xl/workbook.xml")? else {
        return Ok(None);
    };
    let mut reader = quick_xml::Reader::from_str(&workbook);
    let rel_id = loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                if attr(&e, b"name")?.as_deref() == Some(sheet_name) {
                    break attr(&e, b"id")?;
                }
            }
            Event::Eof => break None,
            _ => {}
        }
    };
    let Some(rel_id) = rel_id else {
        return Ok(None);
    };

    let Some(rels) = read_part(archive, "xl/_rels/workbook.xml.rels")? else {
        return Ok(None);
    };
    let mut reader = quick_xml::Reader::from_str(&rels);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if attr(&e, b"Id")?.as_deref() == Some(rel_id.as_str()) {
                    return Ok(attr(&e, b"Target")?.map(|target| match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{}", target),
                    }));
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// `si` of a shared formula element, None for ordinary and array formulas.
fn shared_index(element: &BytesStart) -> Result<Option<String>> {
    if attr(element, b"t")?.as_deref() != Some("shared") {
        return Ok(None);
    }
    attr(element, b"si")
}

/// Every formula in a worksheet part. Shared-formula followers carry no text of their own;
/// they get the master's expression moved by their offset from the master cell.
fn sheet_formulas(xml: &str) -> Result<Vec<(u32, u32, String)>> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut formulas = Vec::new();
    let mut masters: HashMap<String, (u32, u32, String)> = HashMap::new();
    let mut followers = Vec::new();
    let mut cell: Option<(u32, u32)> = None;
    let mut open: Option<(Option<String>, String)> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                cell = attr(&e, b"r")?.as_deref().and_then(parse_cell_ref);
            }
            Event::End(e) if e.local_name().as_ref() == b"c" => cell = None,
            Event::Start(e) if e.local_name().as_ref() == b"f" => {
                open = Some((shared_index(&e)?, String::new()));
            }
            Event::Empty(e) if e.local_name().as_ref() == b"f" => {
                if let (Some(si), Some((row, col))) = (shared_index(&e)?, cell) {
                    followers.push((row, col, si));
                }
            }
            Event::Text(t) => {
                if let Some((_, text)) = open.as_mut() {
                    text.push_str(&t.unescape()?);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"f" => {
                let (Some((si, text)), Some((row, col))) = (open.take(), cell) else {
                    continue;
                };
                let expr = text.trim().trim_start_matches('=').to_string();
                match (si, expr.is_empty()) {
                    (Some(si), true) => followers.push((row, col, si)),
                    (Some(si), false) => {
                        masters.insert(si, (row, col, expr.clone()));
                        formulas.push((row, col, expr));
                    }
                    (None, false) => formulas.push((row, col, expr)),
                    (None, true) => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    for (row, col, si) in followers {
        let Some((master_row, master_col, expr)) = masters.get(&si) else {
            tracing::debug!(si = %si, cell = %cell_ref(row, col), "shared formula without a master cell");
            continue;
        };
        let d_row = i64::from(row) - i64::from(*master_row);
        let d_col = i64::from(col) - i64::from(*master_col);
        formulas.push((row, col, shift_references(expr, d_row, d_col)));
    }
    Ok(formulas)
}

/// Mark formula cells calamine left as plain values (shared-formula followers) as formulas.
fn merge_sheet_xml_formulas(grid: &mut SheetGrid, path: &Path, sheet_name: &str) -> Result<()> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let Some(part) = sheet_part_path(&mut archive, sheet_name)? else {
        return Ok(());
    };
    let Some(xml) = read_part(&mut archive, &part)? else {
        return Ok(());
    };
    for (row, col, expr) in sheet_formulas(&xml)? {
        let current = grid.get(row, col);
        if matches!(current, CellValue::Formula { .. }) {
            continue;
        }
        let cached = current.clone();
        grid.set(row, col, CellValue::formula(expr, cached));
    }
    Ok(())
}

/// Read the first worksheet of a workbook: cached values overlaid with formulas.
pub fn read_first_sheet(path: &Path) -> Result<SheetGrid> {
    if !path.exists() {
        return Err(CompareError::Other(format!(
            "File not found: {}",
            path.display()
        )));
    }
    let mut workbook = open_workbook_auto(path)?;
    let sheet_name = workbook.sheet_names().first().cloned().ok_or_else(|| {
        CompareError::InvalidTemplate(format!(
            "Workbook \"{}\" has no worksheet.",
            path.display()
        ))
    })?;
    let range = workbook.worksheet_range(&sheet_name)?;
    let formulas = workbook.worksheet_formula(&sheet_name).ok();

    let mut grid = SheetGrid::new(sheet_name.clone());
    merge_values(&mut grid, &range);
    if let Some(formulas) = formulas {
        merge_formulas(&mut grid, &formulas);
    }
    if is_open_xml(path) {
        merge_sheet_xml_formulas(&mut grid, path, &sheet_name)?;
    }
    Ok(grid)
}

/// Copy every grid cell into a rust_xlsxwriter worksheet (0-based on that side).
pub fn write_grid(worksheet: &mut Worksheet, grid: &SheetGrid) -> Result<()> {
    for (row, col, value) in grid.iter() {
        let (r, c) = (row - 1, (col - 1) as u16);
        match value {
            CellValue::Empty => {}
            CellValue::Number(n) => {
                worksheet.write_number(r, c, *n)?;
            }
            CellValue::Text(s) => {
                worksheet.write_string(r, c, sanitize_cell(s))?;
            }
            CellValue::Bool(b) => {
                worksheet.write_boolean(r, c, *b)?;
            }
            CellValue::Formula { expr, cached } => {
                let mut formula = Formula::new(format!("={}", expr));
                if !cached.is_empty() {
                    formula = formula.set_result(cached.text());
                }
                worksheet.write_formula(r, c, formula)?;
            }
        }
    }
    Ok(())
}
