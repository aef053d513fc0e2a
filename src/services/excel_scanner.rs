//! Header row and column-role detection on a parsed worksheet (1-based row/col).

use regex::Regex;
use std::sync::OnceLock;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::models::{ColumnRole, HeaderColumnMap, SheetGrid};

pub const DEFAULT_SCAN_ROWS: u32 = 20;

/// Substrings that mark a row as the header row (item-number or code column present).
pub const HEADER_MARKERS: &[&str] = &["pc", "kod", "code"];

/// Default synonyms per role, already in normalized form. Order of roles matters: first match wins.
const DEFAULT_SYNONYMS: &[(ColumnRole, &[&str])] = &[
    (
        ColumnRole::ItemNumber,
        &["pc", "p.c.", "p.c", "cenovy kod", "item no", "item number"],
    ),
    (ColumnRole::ItemType, &["typ", "type"]),
    (ColumnRole::Code, &["kod", "code"]),
    (
        ColumnRole::Description,
        &["popis", "description", "nazev polozky"],
    ),
    (
        ColumnRole::Unit,
        &["mj", "m.j.", "merna jednotka", "jednotka", "uom", "unit of measure"],
    ),
    (ColumnRole::Quantity, &["mnozstvi", "mn.", "qty", "quantity"]),
    (
        ColumnRole::UnitPrice,
        &["j.cena", "jcena", "j. cena", "jednotkova cena", "jedn. cena", "unit price"],
    ),
    (
        ColumnRole::TotalPrice,
        &["cena celkem", "celkem", "cena", "total price", "total"],
    ),
];

/// Synonym table mapping normalized header text to column roles.
/// Starts from the built-in Czech/English table; templates from other customers can extend it.
#[derive(Debug, Clone)]
pub struct SynonymTable {
    entries: Vec<(ColumnRole, Vec<String>)>,
}

impl Default for SynonymTable {
    fn default() -> Self {
        Self {
            entries: DEFAULT_SYNONYMS
                .iter()
                .map(|(role, words)| (*role, words.iter().map(|w| w.to_string()).collect()))
                .collect(),
        }
    }
}

impl SynonymTable {
    /// Add synonyms for a role. Input is normalized the same way header cells are.
    pub fn extend<I, S>(&mut self, role: ColumnRole, synonyms: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalized: Vec<String> = synonyms
            .into_iter()
            .map(|s| normalize_header(s.as_ref()))
            .filter(|s| !s.is_empty())
            .collect();
        match self.entries.iter_mut().find(|(r, _)| *r == role) {
            Some((_, words)) => words.extend(normalized),
            None => self.entries.push((role, normalized)),
        }
    }

    /// Roles whose synonyms the header equals or starts with, in table order.
    pub fn roles_for<'a>(&'a self, header: &'a str) -> impl Iterator<Item = ColumnRole> + 'a {
        self.entries.iter().filter_map(move |(role, words)| {
            words
                .iter()
                .any(|w| header == w || header.starts_with(w.as_str()))
                .then_some(*role)
        })
    }
}

fn default_table() -> &'static SynonymTable {
    static TABLE: OnceLock<SynonymTable> = OnceLock::new();
    TABLE.get_or_init(SynonymTable::default)
}

/// Lower-case and strip diacritics (NFD, drop combining marks).
pub fn strip_diacritics(value: &str) -> String {
    value
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

fn currency_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[czk\]|\(czk\)|czk").expect("currency regex"))
}

/// Normalized header text: diacritics stripped, lower-cased, currency tags removed, spaces collapsed.
pub fn normalize_header(value: &str) -> String {
    let lowered = strip_diacritics(value);
    let without_currency = currency_tag().replace_all(&lowered, "");
    without_currency.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First row within `max_rows` whose cells contain an item-number or code marker.
pub fn find_header_row(grid: &SheetGrid, max_rows: u32) -> Option<u32> {
    let limit = max_rows.min(grid.row_count());
    (1..=limit).find(|&row| {
        grid.row_cells(row).any(|(_, cell)| {
            let text = normalize_header(&cell.text());
            HEADER_MARKERS.iter().any(|marker| text.contains(marker))
        })
    })
}

/// Map header cells to roles with the default synonym table.
pub fn find_columns(grid: &SheetGrid, header_row: u32) -> HeaderColumnMap {
    find_columns_with(grid, header_row, default_table())
}

pub fn find_columns_with(grid: &SheetGrid, header_row: u32, table: &SynonymTable) -> HeaderColumnMap {
    let mut map = HeaderColumnMap::default();
    for (column, cell) in grid.row_cells(header_row) {
        let header = normalize_header(&cell.text());
        if header.is_empty() {
            continue;
        }
        for role in table.roles_for(&header) {
            map.set_if_absent(role, column);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CellValue;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn boq_header() -> Vec<CellValue> {
        [
            "PČ",
            "Typ",
            "Kód",
            "Popis",
            "MJ",
            "Množství",
            "J.cena [CZK]",
            "Cena celkem [CZK]",
        ]
        .iter()
        .map(|s| text(s))
        .collect()
    }

    #[test]
    fn normalizes_czech_headers() {
        assert_eq!(normalize_header("  Množství "), "mnozstvi");
        assert_eq!(normalize_header("J.cena [CZK]"), "j.cena");
        assert_eq!(normalize_header("Cena   celkem (CZK)"), "cena celkem");
    }

    #[test]
    fn finds_header_below_title_rows() {
        let grid = SheetGrid::from_rows(
            "VV",
            vec![vec![text("Soupis prací")], vec![], boq_header()],
        );
        assert_eq!(find_header_row(&grid, DEFAULT_SCAN_ROWS), Some(3));
    }

    #[test]
    fn header_outside_scan_limit_is_not_found() {
        let mut rows = vec![vec![text("Soupis prací")]; 5];
        rows.push(boq_header());
        let grid = SheetGrid::from_rows("VV", rows);
        assert_eq!(find_header_row(&grid, 5), None);
        assert_eq!(find_header_row(&grid, 6), Some(6));
    }

    #[test]
    fn maps_every_role_of_a_standard_template() {
        let grid = SheetGrid::from_rows("VV", vec![boq_header()]);
        let map = find_columns(&grid, 1);
        assert_eq!(map.item_number, Some(1));
        assert_eq!(map.item_type, Some(2));
        assert_eq!(map.code, Some(3));
        assert_eq!(map.description, Some(4));
        assert_eq!(map.unit, Some(5));
        assert_eq!(map.quantity, Some(6));
        assert_eq!(map.unit_price, Some(7));
        assert_eq!(map.total_price, Some(8));
    }

    #[test]
    fn first_matching_column_wins() {
        let grid = SheetGrid::from_rows(
            "VV",
            vec![vec![text("Kód"), text("Typ"), text("Code (supplier)")]],
        );
        let map = find_columns(&grid, 1);
        assert_eq!(map.code, Some(1));
    }

    #[test]
    fn extended_table_recognizes_custom_headers() {
        let grid = SheetGrid::from_rows(
            "VV",
            vec![vec![text("Pos."), text("Art"), text("Kód"), text("Menge")]],
        );
        assert_eq!(find_columns(&grid, 1).quantity, None);

        let mut table = SynonymTable::default();
        table.extend(ColumnRole::Quantity, ["Menge"]);
        table.extend(ColumnRole::ItemType, ["Art"]);
        let map = find_columns_with(&grid, 1, &table);
        assert_eq!(map.quantity, Some(4));
        assert_eq!(map.item_type, Some(2));
    }
}
