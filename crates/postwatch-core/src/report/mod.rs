//! Aggregate report decoding and parsing

pub mod decoder;
pub mod parser;

pub use decoder::decode_attachment;
pub use parser::{parse_report, ParsedRecord, ParsedReport};
