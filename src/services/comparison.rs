//! Matching & composition: specification cost rows vs. each supplier offer,
//! written as one workbook with two columns (unit price, total price) per offer.

use indexmap::IndexMap;
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Formula, Workbook};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{CompareError, Result};
use crate::excel::{self, cell_ref, col_letter};
use crate::models::{LineItem, ParsedSheet, SheetGrid};
use crate::services::line_items::parse_sheet;
use crate::services::selection::OfferEntry;
use crate::types::SupplierStats;

const NUMBER_FORMAT: &str = "#,##0.00";
const UNIT_PRICE_HEADER: &str = "Unit price";
const TOTAL_PRICE_HEADER: &str = "Total price";
const RECAP_LABEL: &str = "Total";
const UNIT_PRICE_WIDTH: f64 = 14.0;
const TOTAL_PRICE_WIDTH: f64 = 18.0;
/// Excel caps SUM() at 255 arguments.
const MAX_SUM_ARGS: usize = 255;

struct PaletteEntry {
    header: u32,
    total: u32,
    font: u32,
}

const PALETTE: [PaletteEntry; 6] = [
    PaletteEntry { header: 0xD6E4F0, total: 0xBDD7EE, font: 0x1F4E79 },
    PaletteEntry { header: 0xFCE4D6, total: 0xF8CBAD, font: 0x833C0B },
    PaletteEntry { header: 0xE2EFDA, total: 0xC6EFCE, font: 0x375623 },
    PaletteEntry { header: 0xE4DFEC, total: 0xD0C5E6, font: 0x4A2882 },
    PaletteEntry { header: 0xFFF2CC, total: 0xFFE699, font: 0x806000 },
    PaletteEntry { header: 0xF2DCDB, total: 0xE6B8B7, font: 0x8B0000 },
];

pub struct ComparisonOutput {
    pub buffer: Vec<u8>,
    pub item_count: usize,
    pub per_supplier: IndexMap<String, SupplierStats>,
}

/// Where the per-offer header block, recap and summary cells go (1-based rows).
#[derive(Debug, Clone, PartialEq)]
struct BlockLayout {
    header_row: u32,
    title_row: Option<u32>,
    merge_title: bool,
    summary_row: Option<u32>,
    recap_row: u32,
    label_recap: bool,
}

impl BlockLayout {
    fn for_sheet(parsed: &ParsedSheet, grid: &SheetGrid) -> Self {
        let header_row = parsed.header_row;
        let (title_row, merge_title, summary_row) = match header_row {
            0 | 1 => (None, false, None),
            2 => (Some(1), false, Some(1)),
            _ => (Some(header_row - 2), true, Some(header_row - 1)),
        };
        let below_header = header_row + 1;
        let (recap_row, label_recap) = if parsed.cost_rows.contains(&below_header) {
            (grid.row_count() + 2, true)
        } else {
            (below_header, false)
        };
        Self {
            header_row,
            title_row,
            merge_title,
            summary_row,
            recap_row,
            label_recap,
        }
    }
}

struct OfferLookup<'a> {
    by_code: HashMap<&'a str, &'a LineItem>,
    by_item_number: HashMap<&'a str, &'a LineItem>,
}

impl<'a> OfferLookup<'a> {
    fn new(items: &'a [LineItem]) -> Self {
        let mut by_code = HashMap::new();
        let mut by_item_number = HashMap::new();
        for item in items {
            if let Some(code) = item.code.as_deref() {
                by_code.entry(code.trim()).or_insert(item);
            }
            if let Some(number) = item.item_number.as_deref() {
                by_item_number.entry(number.trim()).or_insert(item);
            }
        }
        Self {
            by_code,
            by_item_number,
        }
    }

    /// Code match first; item number only when the code is absent or has no match.
    fn find(&self, wanted: &LineItem) -> Option<&'a LineItem> {
        wanted
            .code
            .as_deref()
            .and_then(|code| self.by_code.get(code.trim()).copied())
            .or_else(|| {
                wanted
                    .item_number
                    .as_deref()
                    .and_then(|number| self.by_item_number.get(number.trim()).copied())
            })
    }
}

/// Recap formula over exactly the given rows of one column.
/// Contiguous rows collapse into ranges; `None` when there are no rows.
pub fn recap_formula(column: u32, rows: &[u32]) -> Option<String> {
    if rows.is_empty() {
        return None;
    }
    let letter = col_letter(column);
    let mut sorted = rows.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut terms = Vec::new();
    let mut start = sorted[0];
    let mut prev = sorted[0];
    for &row in sorted.iter().skip(1).chain(std::iter::once(&u32::MAX)) {
        if row == prev + 1 {
            prev = row;
            continue;
        }
        if start == prev {
            terms.push(format!("{}{}", letter, start));
        } else {
            terms.push(format!("{}{}:{}{}", letter, start, letter, prev));
        }
        start = row;
        prev = row;
    }

    let sums: Vec<String> = terms
        .chunks(MAX_SUM_ARGS)
        .map(|chunk| format!("SUM({})", chunk.join(",")))
        .collect();
    Some(sums.join("+"))
}

fn ensure_not_cancelled(is_cancelled: &dyn Fn() -> bool) -> Result<()> {
    if is_cancelled() {
        return Err(CompareError::Cancelled);
    }
    Ok(())
}

fn load_parsed(path: &Path) -> Result<(SheetGrid, ParsedSheet)> {
    let grid = excel::read_first_sheet(path)?;
    let parsed = parse_sheet(&grid)?;
    Ok((grid, parsed))
}

/// Build the comparison workbook. Nothing is written to disk here; the caller persists the buffer.
/// `on_progress` receives (percent, step); `is_cancelled` is polled before every specification
/// row and between offers.
pub fn build_comparison_workbook(
    specification_path: &Path,
    offers: &[OfferEntry],
    on_progress: &mut dyn FnMut(u8, &str),
    is_cancelled: &dyn Fn() -> bool,
) -> Result<ComparisonOutput> {
    if offers.is_empty() {
        return Err(CompareError::Other(
            "No supplier offer was selected for comparison.".to_string(),
        ));
    }

    on_progress(5, "Loading specification...");
    let (spec_grid, spec) = load_parsed(specification_path)?;
    let quantity_col = spec.column_map.quantity.ok_or_else(|| {
        CompareError::InvalidTemplate("The specification has no quantity column.".to_string())
    })?;

    on_progress(10, "Loading supplier offers...");
    let mut parsed_offers = Vec::with_capacity(offers.len());
    for offer in offers {
        ensure_not_cancelled(is_cancelled)?;
        let (_, parsed) = load_parsed(&offer.file_path)?;
        parsed_offers.push((offer, parsed));
    }
    ensure_not_cancelled(is_cancelled)?;

    let layout = BlockLayout::for_sheet(&spec, &spec_grid);
    let start_column = spec_grid.column_count() + 1;

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(spec_grid.name())?;
    excel::write_grid(worksheet, &spec_grid)?;

    let mut per_supplier = IndexMap::new();
    let offer_count = parsed_offers.len();

    for (offer_index, (offer, parsed)) in parsed_offers.iter().enumerate() {
        ensure_not_cancelled(is_cancelled)?;
        let palette = &PALETTE[offer_index % PALETTE.len()];
        let unit_col = start_column + offer_index as u32 * 2;
        let total_col = unit_col + 1;
        let (unit_c, total_c) = ((unit_col - 1) as u16, (total_col - 1) as u16);
        let label = excel::sanitize_cell(&offer.display_label);

        let title_format = Format::new()
            .set_font_name("Arial")
            .set_font_size(11)
            .set_bold()
            .set_font_color(Color::RGB(palette.font))
            .set_background_color(Color::RGB(palette.header))
            .set_align(FormatAlign::Center)
            .set_align(FormatAlign::VerticalCenter);
        let sub_header_format = Format::new()
            .set_font_name("Arial")
            .set_font_size(10)
            .set_bold()
            .set_background_color(Color::RGB(palette.header))
            .set_align(FormatAlign::Center)
            .set_align(FormatAlign::VerticalCenter)
            .set_text_wrap()
            .set_border(FormatBorder::Thin);
        let value_format = Format::new()
            .set_font_name("Arial")
            .set_font_size(10)
            .set_num_format(NUMBER_FORMAT)
            .set_background_color(Color::RGB(palette.header))
            .set_border(FormatBorder::Thin);
        let recap_format = Format::new()
            .set_font_name("Arial")
            .set_font_size(10)
            .set_bold()
            .set_num_format(NUMBER_FORMAT)
            .set_background_color(Color::RGB(palette.total))
            .set_border(FormatBorder::Thin);
        let summary_format = Format::new()
            .set_font_name("Arial")
            .set_font_size(11)
            .set_bold()
            .set_font_color(Color::RGB(palette.font))
            .set_num_format(NUMBER_FORMAT)
            .set_background_color(Color::RGB(palette.total));

        match layout.title_row {
            Some(row) if layout.merge_title => {
                worksheet.merge_range(row - 1, unit_c, row - 1, total_c, &label, &title_format)?;
            }
            Some(row) => {
                worksheet.write_string_with_format(row - 1, unit_c, &label, &title_format)?;
            }
            None => {}
        }
        let (unit_header, total_header) = if layout.title_row.is_some() {
            (UNIT_PRICE_HEADER.to_string(), TOTAL_PRICE_HEADER.to_string())
        } else {
            (
                format!("{}: {}", label, UNIT_PRICE_HEADER),
                format!("{}: {}", label, TOTAL_PRICE_HEADER),
            )
        };
        let header_r = layout.header_row - 1;
        worksheet.write_string_with_format(header_r, unit_c, unit_header, &sub_header_format)?;
        worksheet.write_string_with_format(header_r, total_c, total_header, &sub_header_format)?;
        worksheet.set_column_width(unit_c, UNIT_PRICE_WIDTH)?;
        worksheet.set_column_width(total_c, TOTAL_PRICE_WIDTH)?;

        let lookup = OfferLookup::new(&parsed.items);
        let mut matched = 0usize;
        let mut unmatched = Vec::new();

        for spec_item in &spec.items {
            ensure_not_cancelled(is_cancelled)?;
            let Some(unit_price) = lookup.find(spec_item).and_then(|item| item.unit_price) else {
                unmatched.push(spec_item.display_key());
                continue;
            };
            matched += 1;

            let row = spec_item.row_index;
            worksheet.write_number_with_format(row - 1, unit_c, unit_price, &value_format)?;
            let total = Formula::new(format!(
                "={}*{}",
                cell_ref(row, unit_col),
                cell_ref(row, quantity_col)
            ));
            worksheet.write_formula_with_format(row - 1, total_c, total, &value_format)?;
        }

        let recap_r = layout.recap_row - 1;
        match recap_formula(total_col, &spec.cost_rows) {
            Some(expr) => {
                worksheet.write_formula_with_format(
                    recap_r,
                    total_c,
                    Formula::new(format!("={}", expr)),
                    &recap_format,
                )?;
            }
            None => {
                worksheet.write_number_with_format(recap_r, total_c, 0.0, &recap_format)?;
            }
        }
        if layout.label_recap {
            worksheet.write_string_with_format(recap_r, unit_c, RECAP_LABEL, &recap_format)?;
        }
        if let Some(row) = layout.summary_row {
            let summary = Formula::new(format!("={}", cell_ref(layout.recap_row, total_col)));
            worksheet.write_formula_with_format(row - 1, total_c, summary, &summary_format)?;
        }

        per_supplier.insert(
            offer.display_label.clone(),
            SupplierStats {
                matched_count: matched,
                unmatched_item_keys: unmatched,
                round: offer.round,
                variant: offer.variant,
            },
        );

        let progress = 20 + ((offer_index + 1) as f64 / offer_count as f64 * 75.0).round() as u8;
        on_progress(progress.min(95), &format!("Processed: {}", offer.display_label));
    }

    ensure_not_cancelled(is_cancelled)?;
    on_progress(98, "Writing output file...");
    let buffer = workbook.save_to_buffer()?;
    on_progress(100, "Done");

    Ok(ComparisonOutput {
        buffer,
        item_count: spec.items.len(),
        per_supplier,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CellValue;

    #[test]
    fn recap_collapses_contiguous_rows() {
        assert_eq!(recap_formula(10, &[5, 6]).as_deref(), Some("SUM(J5:J6)"));
        assert_eq!(
            recap_formula(10, &[9, 5, 6, 7, 12]).as_deref(),
            Some("SUM(J5:J7,J9,J12)")
        );
        assert_eq!(recap_formula(10, &[]), None);
    }

    #[test]
    fn recap_splits_long_argument_lists() {
        let rows: Vec<u32> = (0..300).map(|i| 10 + i * 2).collect();
        let formula = recap_formula(2, &rows).expect("formula");
        assert_eq!(formula.matches("SUM(").count(), 2);
        assert!(formula.contains(")+SUM("));
    }

    fn item(code: Option<&str>, number: Option<&str>, price: Option<f64>, row: u32) -> LineItem {
        LineItem {
            item_number: number.map(String::from),
            code: code.map(String::from),
            unit_price: price,
            total_price: None,
            row_index: row,
        }
    }

    #[test]
    fn code_match_wins_over_item_number() {
        let offer = vec![
            item(Some("X-9"), Some("1"), Some(10.0), 5),
            item(Some("A-001"), Some("7"), Some(99.0), 6),
        ];
        let lookup = OfferLookup::new(&offer);
        let wanted = item(Some(" A-001 "), Some("1"), None, 5);
        assert_eq!(lookup.find(&wanted).map(|i| i.row_index), Some(6));
    }

    #[test]
    fn falls_back_to_item_number_when_code_unknown() {
        let offer = vec![item(Some("B-2"), Some("2"), Some(10.0), 6)];
        let lookup = OfferLookup::new(&offer);
        assert_eq!(lookup.find(&item(Some("Z-1"), Some("2"), None, 6)).map(|i| i.row_index), Some(6));
        assert_eq!(lookup.find(&item(None, Some("3"), None, 7)), None);
    }

    fn parsed(header_row: u32, cost_rows: Vec<u32>) -> ParsedSheet {
        ParsedSheet {
            items: Vec::new(),
            header_row,
            column_map: Default::default(),
            cost_rows,
        }
    }

    #[test]
    fn layout_places_block_above_header() {
        let grid = SheetGrid::from_rows("VV", vec![vec![CellValue::Number(1.0)]; 6]);
        let layout = BlockLayout::for_sheet(&parsed(3, vec![5, 6]), &grid);
        assert_eq!(layout.title_row, Some(1));
        assert!(layout.merge_title);
        assert_eq!(layout.summary_row, Some(2));
        assert_eq!(layout.recap_row, 4);
        assert!(!layout.label_recap);
    }

    #[test]
    fn layout_moves_recap_below_sheet_when_header_is_followed_by_cost_row() {
        let grid = SheetGrid::from_rows("VV", vec![vec![CellValue::Number(1.0)]; 3]);
        let layout = BlockLayout::for_sheet(&parsed(2, vec![3]), &grid);
        assert_eq!(layout.title_row, Some(1));
        assert!(!layout.merge_title);
        assert_eq!(layout.summary_row, Some(1));
        assert_eq!(layout.recap_row, 5);
        assert!(layout.label_recap);
    }
}
