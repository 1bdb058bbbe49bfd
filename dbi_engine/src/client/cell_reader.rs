use super::{ClientError, ClientResult};
use crate::protocol::ValueKind;
use odbc_api::CursorRow;

/// Reads one cell of the current row. `None` is SQL NULL.
pub(crate) fn read_cell_bytes(
    row: &mut CursorRow<'_>,
    column_number: u16,
    kind: ValueKind,
) -> ClientResult<Option<Vec<u8>>> {
    let mut buf: Vec<u8> = Vec::new();
    let has_value = match kind {
        ValueKind::Binary => row.get_binary(column_number, &mut buf),
        ValueKind::Text => row.get_text(column_number, &mut buf),
    }
    .map_err(ClientError::from)?;

    Ok(has_value.then_some(buf))
}
