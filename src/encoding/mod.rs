//! Result Encoding Module
//!
//! Converts batch outcomes into the JSON reply returned at the API boundary.

mod encoder;

pub use encoder::{encode, encode_result, encode_row, encode_value};
