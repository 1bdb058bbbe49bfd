use super::statement::StatementEntry;
use crate::client::WireParam;
use crate::engine::exception::{engine_error, translate, Stage};
use crate::error::Result;
use crate::protocol::ParamValue;

/// Most positional parameters one statement can bind.
pub const MAX_BIND: usize = 32;

/// Appends the placeholder token for one bind variable. MySQL uses `?`
/// regardless of the variable's name or position.
pub fn bind_var(sql: &mut String, _name: &str, _index: usize) {
    sql.push('?');
}

/// Binds `values` to the statement's parameters, in order.
///
/// An empty slice binds nothing and succeeds.
pub fn bind(entry: &mut StatementEntry, values: &[ParamValue]) -> Result<()> {
    if values.is_empty() {
        return Ok(());
    }
    if values.len() > MAX_BIND {
        return Err(engine_error(
            Stage::Bind,
            "07001",
            0,
            format!("{} parameters exceed the limit of {}", values.len(), MAX_BIND),
        ));
    }
    if values.len() != entry.param_count() {
        return Err(engine_error(
            Stage::Bind,
            "07001",
            0,
            format!(
                "statement expects {} parameters, {} given",
                entry.param_count(),
                values.len()
            ),
        ));
    }

    let wire: Vec<WireParam<'_>> = values.iter().map(WireParam::from).collect();
    entry
        .client()
        .bind_params(&wire)
        .map_err(|e| translate(Stage::Bind, e))
}
