//! Small conversions shared by the repository modules.

use super::pool::DieselError;

/// Fold connection/pool failures into the Diesel error type so repository
/// signatures stay uniform.
pub fn to_diesel_error(e: impl std::fmt::Display) -> DieselError {
    DieselError::QueryBuilderError(e.to_string().into())
}

/// Deserialization failure for a stored enum or timestamp column.
pub fn invalid_column(column: &str, value: &str) -> DieselError {
    DieselError::DeserializationError(
        format!("invalid value {value:?} in column {column}").into(),
    )
}
