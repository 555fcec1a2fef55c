use std::collections::VecDeque;
use std::sync::Arc;

use rusqlite::Statement;
use rusqlite::types::ValueRef;

use crate::error::SqliteBridgeError;
use crate::types::{Row, RowFactory, RowValues, TextFactory};

use super::params::Params;

/// Extract a `RowValues` from a `SQLite` row, decoding TEXT per `text_factory`.
///
/// # Errors
///
/// Returns `SqliteBridgeError` if the column cannot be read or holds invalid UTF-8
/// under [`TextFactory::Utf8`].
pub fn sqlite_extract_value_sync(
    row: &rusqlite::Row,
    idx: usize,
    text_factory: TextFactory,
) -> Result<RowValues, SqliteBridgeError> {
    match row.get_ref(idx)? {
        ValueRef::Null => Ok(RowValues::Null),
        ValueRef::Integer(i) => Ok(RowValues::Int(i)),
        ValueRef::Real(f) => Ok(RowValues::Float(f)),
        ValueRef::Text(bytes) => match text_factory {
            TextFactory::Utf8 => std::str::from_utf8(bytes)
                .map(|s| RowValues::Text(s.to_owned()))
                .map_err(|e| {
                    SqliteBridgeError::ExecutionError(format!(
                        "could not decode column {idx} as UTF-8: {e}"
                    ))
                }),
            TextFactory::Lossy => Ok(RowValues::Text(
                String::from_utf8_lossy(bytes).into_owned(),
            )),
            TextFactory::Bytes => Ok(RowValues::Blob(bytes.to_vec())),
        },
        ValueRef::Blob(b) => Ok(RowValues::Blob(b.to_vec())),
    }
}

/// Run a row-returning statement to completion and buffer its rows.
///
/// # Errors
/// Returns `SqliteBridgeError` if execution or value extraction fails.
pub fn collect_rows(
    stmt: &mut Statement,
    params: &Params,
    row_factory: RowFactory,
    text_factory: TextFactory,
) -> Result<(Arc<Vec<String>>, VecDeque<Row>), SqliteBridgeError> {
    let column_names: Arc<Vec<String>> = Arc::new(
        stmt.column_names()
            .iter()
            .map(std::string::ToString::to_string)
            .collect(),
    );
    let col_count = column_names.len();
    let param_refs = params.as_refs();

    let mut rows_iter = stmt.query(&param_refs[..])?;
    let mut rows = VecDeque::new();
    while let Some(row) = rows_iter.next()? {
        let mut values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            values.push(sqlite_extract_value_sync(row, i, text_factory)?);
        }
        rows.push_back(match row_factory {
            RowFactory::Tuple => Row::Tuple(values),
            RowFactory::Named => Row::Named {
                columns: Arc::clone(&column_names),
                values,
            },
        });
    }

    Ok((column_names, rows))
}
