use serde::{Deserialize, Serialize};

/// Semantic role of a BOQ column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnRole {
    ItemNumber,
    ItemType,
    Code,
    Description,
    Unit,
    Quantity,
    UnitPrice,
    TotalPrice,
}

/// Role → 1-based column index. Filled once by the detector, first match wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderColumnMap {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_type: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_price: Option<u32>,
}

impl HeaderColumnMap {
    fn slot(&mut self, role: ColumnRole) -> &mut Option<u32> {
        match role {
            ColumnRole::ItemNumber => &mut self.item_number,
            ColumnRole::ItemType => &mut self.item_type,
            ColumnRole::Code => &mut self.code,
            ColumnRole::Description => &mut self.description,
            ColumnRole::Unit => &mut self.unit,
            ColumnRole::Quantity => &mut self.quantity,
            ColumnRole::UnitPrice => &mut self.unit_price,
            ColumnRole::TotalPrice => &mut self.total_price,
        }
    }

    /// Map `role` to `column` unless it is already mapped. Returns whether it was set.
    pub fn set_if_absent(&mut self, role: ColumnRole, column: u32) -> bool {
        let slot = self.slot(role);
        if slot.is_some() {
            return false;
        }
        *slot = Some(column);
        true
    }

    /// Type column plus code or item-number: the minimum to read cost rows.
    pub fn is_usable(&self) -> bool {
        self.item_type.is_some() && (self.code.is_some() || self.item_number.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub item_number: Option<String>,
    pub code: Option<String>,
    pub unit_price: Option<f64>,
    pub total_price: Option<f64>,
    pub row_index: u32,
}

impl LineItem {
    /// Key reported for an unmatched row: code, else item-number, else the row label.
    pub fn display_key(&self) -> String {
        self.code
            .clone()
            .or_else(|| self.item_number.clone())
            .unwrap_or_else(|| format!("row {}", self.row_index))
    }
}

#[derive(Debug, Clone)]
pub struct ParsedSheet {
    pub items: Vec<LineItem>,
    pub header_row: u32,
    pub column_map: HeaderColumnMap,
    pub cost_rows: Vec<u32>,
}
