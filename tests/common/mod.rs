#![allow(dead_code)]

use bid_comparison_lib::services::runner::ComparisonRunner;
use bid_comparison_lib::types::Job;
use calamine::{open_workbook_auto, Data, Range, Reader};
use rust_xlsxwriter::{Formula, Workbook};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SUPPLIERS: [&str; 2] = ["Drywall", "PBK"];

#[derive(Debug, Clone)]
pub struct BoqRow {
    pub number: Option<f64>,
    pub kind: &'static str,
    pub code: Option<&'static str>,
    pub description: &'static str,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
}

const HEADER: [&str; 8] = [
    "PČ",
    "Typ",
    "Kód",
    "Popis",
    "MJ",
    "Množství",
    "J.cena [CZK]",
    "Cena celkem [CZK]",
];

/// Title row, blank row, header on row 3, a recap ("R") row on row 4, items from row 5.
pub fn write_boq(path: &Path, rows: &[BoqRow]) {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Rozpočet").expect("sheet name");
    sheet.write_string(0, 0, "Soupis prací").expect("title");
    for (col, header) in HEADER.iter().enumerate() {
        sheet.write_string(2, col as u16, *header).expect("header");
    }
    sheet.write_string(3, 1, "R").expect("recap type");
    sheet.write_string(3, 3, "REKAPITULACE").expect("recap label");

    for (i, row) in rows.iter().enumerate() {
        let r = 4 + i as u32;
        if let Some(number) = row.number {
            sheet.write_number(r, 0, number).expect("number");
        }
        sheet.write_string(r, 1, row.kind).expect("type");
        if let Some(code) = row.code {
            sheet.write_string(r, 2, code).expect("code");
        }
        sheet.write_string(r, 3, row.description).expect("description");
        sheet.write_string(r, 4, "m2").expect("unit");
        if let Some(quantity) = row.quantity {
            sheet.write_number(r, 5, quantity).expect("quantity");
        }
        if let Some(price) = row.unit_price {
            sheet.write_number(r, 6, price).expect("price");
            let excel_row = r + 1;
            sheet
                .write_formula(r, 7, Formula::new(format!("=G{}*F{}", excel_row, excel_row)))
                .expect("total");
        }
    }
    workbook.save(path).expect("save workbook");
}

pub fn boq_rows(prices: [Option<f64>; 2]) -> Vec<BoqRow> {
    vec![
        BoqRow {
            number: Some(1.0),
            kind: "K",
            code: Some("A-001"),
            description: "Sádrokartonová příčka",
            quantity: Some(2.0),
            unit_price: prices[0],
        },
        BoqRow {
            number: Some(2.0),
            kind: "K",
            code: None,
            description: "Podhled",
            quantity: Some(3.0),
            unit_price: prices[1],
        },
    ]
}

/// Blank specification plus two offers: Drywall fully priced, PBK priced on the first row only.
pub fn write_scenario(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
    let zadani = dir.join("zadani.xlsx");
    let drywall = dir.join("Drywall_kolo1.xlsx");
    let pbk = dir.join("PBK_kolo1.xlsx");
    write_boq(&zadani, &boq_rows([None, None]));
    write_boq(&drywall, &boq_rows([Some(100.0), Some(200.0)]));
    write_boq(&pbk, &boq_rows([Some(120.0), None]));
    (zadani, drywall, pbk)
}

pub fn suppliers() -> Vec<String> {
    SUPPLIERS.iter().map(|s| s.to_string()).collect()
}

pub fn first_sheet(path: &Path) -> (Range<Data>, Range<String>) {
    let mut workbook = open_workbook_auto(path).expect("open output");
    let name = workbook.sheet_names().first().cloned().expect("sheet");
    let values = workbook.worksheet_range(&name).expect("values");
    let formulas = workbook.worksheet_formula(&name).expect("formulas");
    (values, formulas)
}

/// 1-based lookups, the way the sheet is addressed in Excel.
pub fn value_at(range: &Range<Data>, row: u32, col: u32) -> Data {
    range
        .get_value((row - 1, col - 1))
        .cloned()
        .unwrap_or(Data::Empty)
}

pub fn formula_at(range: &Range<String>, row: u32, col: u32) -> String {
    range
        .get_value((row - 1, col - 1))
        .cloned()
        .unwrap_or_default()
}

pub fn xlsx_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.ends_with(".xlsx"))
        .collect();
    names.sort();
    names
}

pub async fn wait_for_terminal(runner: &ComparisonRunner, job_id: &str) -> Job {
    for _ in 0..600 {
        let job = runner.get(job_id).expect("job exists");
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {} did not finish in time", job_id);
}
