use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompareError>;

#[derive(Error, Debug)]
pub enum CompareError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not open Excel file: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("Could not read workbook archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Could not parse workbook XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Cannot write workbook: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("{0}")]
    InvalidTemplate(String),

    /// One human-readable reason per structural problem of a start request.
    #[error("{}", .0.join(" "))]
    Validation(Vec<String>),

    #[error("Comparison was cancelled.")]
    Cancelled,

    #[error("Timed out waiting for job {0} to finish.")]
    Timeout(String),

    #[error("Job {0} not found.")]
    JobNotFound(String),

    #[error("{0}")]
    Other(String),
}

