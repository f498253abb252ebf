//! Operator-facing output: console text and JSON job reports

pub mod json;
pub mod text;
