pub mod auto_runner;
pub mod comparison;
pub mod detection;
pub mod excel_scanner;
pub mod line_items;
pub mod runner;
pub mod selection;
