pub mod format;
pub mod writer;

pub use writer::{to_csv, Column, ColumnFormat};
