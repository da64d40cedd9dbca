pub mod aecg;
pub mod workbook;
