//! Start-request validation and offer grouping shared by the job runner and auto mode.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::types::{FileRole, SelectedFile};

/// One offer column group in the comparison: a supplier's file for a round, with its variant.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferEntry {
    pub supplier_name: String,
    pub display_label: String,
    pub file_path: PathBuf,
    pub round: u32,
    pub variant: u32,
}

#[derive(Debug, Clone)]
pub struct ValidatedSelection {
    pub specification: PathBuf,
    pub offers: Vec<OfferEntry>,
}

pub fn offer_label(supplier_name: &str, round: u32, variant: u32) -> String {
    format!("{} (K{} v{})", supplier_name, round, variant)
}

fn supplier_of(file: &SelectedFile) -> Option<&str> {
    file.supplier_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Check the structural rules of a start request and build the ordered offer list.
/// Every problem found is reported, not just the first.
pub fn validate_selection(files: &[SelectedFile]) -> Result<ValidatedSelection, Vec<String>> {
    let specifications: Vec<&SelectedFile> = files
        .iter()
        .filter(|f| f.role == FileRole::Specification)
        .collect();
    let offers: Vec<&SelectedFile> = files.iter().filter(|f| f.role == FileRole::Offer).collect();

    let mut reasons = Vec::new();
    if specifications.len() != 1 {
        reasons.push(format!(
            "Exactly one specification file must be selected (found {}).",
            specifications.len()
        ));
    }
    if offers.is_empty() {
        reasons.push("At least one supplier offer must be selected.".to_string());
    }
    for offer in offers.iter().filter(|o| supplier_of(o).is_none()) {
        reasons.push(format!(
            "Offer file {} has no supplier assigned.",
            offer.path.display()
        ));
    }
    if !reasons.is_empty() {
        return Err(reasons);
    }

    Ok(ValidatedSelection {
        specification: specifications[0].path.clone(),
        offers: build_offer_entries(&offers),
    })
}

/// Group offers by (supplier, round); variants follow file mtime, then path.
fn build_offer_entries(offers: &[&SelectedFile]) -> Vec<OfferEntry> {
    let mut groups: BTreeMap<(String, u32), Vec<&SelectedFile>> = BTreeMap::new();
    for offer in offers {
        let Some(supplier) = supplier_of(offer) else {
            continue;
        };
        groups
            .entry((supplier.to_string(), offer.round.unwrap_or(0)))
            .or_default()
            .push(offer);
    }

    let mut entries = Vec::new();
    for ((supplier, round), mut group) in groups {
        group.sort_by(|a, b| a.mtime_ms.cmp(&b.mtime_ms).then_with(|| a.path.cmp(&b.path)));
        for (index, file) in group.into_iter().enumerate() {
            let variant = index as u32 + 1;
            entries.push(OfferEntry {
                display_label: offer_label(&supplier, round, variant),
                supplier_name: supplier.clone(),
                file_path: file.path.clone(),
                round,
                variant,
            });
        }
    }

    entries.sort_by(|a, b| {
        a.round
            .cmp(&b.round)
            .then(a.variant.cmp(&b.variant))
            .then_with(|| a.supplier_name.cmp(&b.supplier_name))
    });
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, role: FileRole, supplier: Option<&str>, round: u32, mtime: u64) -> SelectedFile {
        SelectedFile {
            path: PathBuf::from(path),
            role,
            supplier_name: supplier.map(String::from),
            round: Some(round),
            mtime_ms: mtime,
        }
    }

    #[test]
    fn resubmissions_get_stable_variants() {
        let files = vec![
            file("/t/zadani.xlsx", FileRole::Specification, None, 0, 1),
            file("/t/pbk_v2.xlsx", FileRole::Offer, Some("PBK"), 1, 500),
            file("/t/pbk_v1.xlsx", FileRole::Offer, Some("PBK"), 1, 100),
            file("/t/drywall.xlsx", FileRole::Offer, Some("Drywall"), 1, 300),
            file("/t/drywall_k2.xlsx", FileRole::Offer, Some("Drywall"), 2, 50),
            file("/t/notes.xlsx", FileRole::Ignore, None, 0, 1),
        ];
        let selection = validate_selection(&files).expect("valid");
        let labels: Vec<&str> = selection.offers.iter().map(|o| o.display_label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["Drywall (K1 v1)", "PBK (K1 v1)", "PBK (K1 v2)", "Drywall (K2 v1)"]
        );
        assert_eq!(selection.offers[1].file_path, PathBuf::from("/t/pbk_v1.xlsx"));
        assert_eq!(selection.specification, PathBuf::from("/t/zadani.xlsx"));
    }

    #[test]
    fn equal_mtime_falls_back_to_path() {
        let files = vec![
            file("/t/zadani.xlsx", FileRole::Specification, None, 0, 1),
            file("/t/b.xlsx", FileRole::Offer, Some("PBK"), 0, 7),
            file("/t/a.xlsx", FileRole::Offer, Some("PBK"), 0, 7),
        ];
        let selection = validate_selection(&files).expect("valid");
        assert_eq!(selection.offers[0].file_path, PathBuf::from("/t/a.xlsx"));
        assert_eq!(selection.offers[1].variant, 2);
    }

    #[test]
    fn reports_every_structural_problem() {
        let files = vec![
            file("/t/a.xlsx", FileRole::Specification, None, 0, 1),
            file("/t/b.xlsx", FileRole::Specification, None, 0, 1),
            file("/t/c.xlsx", FileRole::Offer, Some("  "), 0, 1),
        ];
        let reasons = validate_selection(&files).expect_err("invalid");
        assert_eq!(reasons.len(), 2);
        assert!(reasons[0].contains("found 2"));
        assert!(reasons[1].contains("/t/c.xlsx"));
    }

    #[test]
    fn empty_selection_needs_specification_and_offer() {
        let reasons = validate_selection(&[]).expect_err("invalid");
        assert_eq!(reasons.len(), 2);
    }
}
