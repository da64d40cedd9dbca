//! Error type shared by the aECG readers, the study workbook and the indexer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("workbook read error: {0}")]
    WorkbookRead(#[from] calamine::Error),

    #[error("workbook write error: {0}")]
    WorkbookWrite(#[from] rust_xlsxwriter::XlsxError),

    /// The workbook does not contain the requested sheet.
    #[error("sheet '{0}' not found")]
    MissingSheet(String),

    /// A required header is absent from a sheet.
    #[error("column '{column}' missing in sheet '{sheet}'")]
    MissingColumn { sheet: String, column: String },

    #[error("invalid value for {field}: '{value}'")]
    InvalidValue { field: String, value: String },
}
