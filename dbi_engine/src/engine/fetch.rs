//! Result fetch engines.
//!
//! A connection uses exactly one discipline. [`PullFetch`] hands out one
//! value at a time from a growable buffer it owns. [`BoundFetch`] reports
//! lengths per row and copies values into buffers the host supplies.

use super::statement::StatementEntry;
use crate::client::{OutputSlot, CR_DATA_TRUNCATED};
use crate::config::FetchMode;
use crate::engine::exception::{engine_error, translate, Stage};
use crate::error::{DbiError, Result};

/// Most result columns the bound discipline can track.
pub const MAX_RESULT_COLUMNS: usize = 64;

/// One value from [`ResultFetch::next_value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulledValue<'a> {
    /// `None` is SQL NULL.
    pub data: Option<&'a [u8]>,
    pub length: usize,
    pub binary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullResult<'a> {
    Value(PulledValue<'a>),
    /// No more rows.
    Done,
}

fn unsupported(op: &str, mode: FetchMode) -> DbiError {
    DbiError::UnsupportedFeature(format!("{} is not available in {:?} fetch mode", op, mode))
}

pub trait ResultFetch: Send {
    fn mode(&self) -> FetchMode;

    /// Called after every successful execute of a statement with columns.
    fn on_execute(&mut self, _entry: &StatementEntry) -> Result<()> {
        Ok(())
    }

    /// Column `column` of the current row; column 0 first advances the row.
    fn next_value<'a>(
        &'a mut self,
        _entry: &mut StatementEntry,
        _column: usize,
        _row: usize,
    ) -> Result<PullResult<'a>> {
        Err(unsupported("NextValue", self.mode()))
    }

    /// Advances one row. `false` when there are no more rows.
    fn next_row(&mut self, _entry: &mut StatementEntry) -> Result<bool> {
        Err(unsupported("NextRow", self.mode()))
    }

    /// Length of column `column` in the current row and whether it is binary.
    fn column_length(&self, _entry: &StatementEntry, _column: usize) -> Result<(usize, bool)> {
        Err(unsupported("ColumnLength", self.mode()))
    }

    /// Copies column `column` into `buffer`, returning the bytes written.
    fn column_value(
        &mut self,
        _entry: &mut StatementEntry,
        _column: usize,
        _buffer: &mut [u8],
    ) -> Result<usize> {
        Err(unsupported("ColumnValue", self.mode()))
    }

    /// Forgets all per-execution state.
    fn reset(&mut self);

    /// Buffer regrowths since the last call.
    fn take_regrowths(&mut self) -> u64 {
        0
    }
}

pub fn for_mode(mode: FetchMode, initial_capacity: usize) -> Box<dyn ResultFetch> {
    match mode {
        FetchMode::Pull => Box::new(PullFetch::new(initial_capacity)),
        FetchMode::Bound => Box::new(BoundFetch::new()),
    }
}

pub struct PullFetch {
    initial_capacity: usize,
    buffer: Vec<u8>,
    regrowths: u64,
}

impl PullFetch {
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            initial_capacity,
            buffer: vec![0; initial_capacity],
            regrowths: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

impl ResultFetch for PullFetch {
    fn mode(&self) -> FetchMode {
        FetchMode::Pull
    }

    fn next_value<'a>(
        &'a mut self,
        entry: &mut StatementEntry,
        column: usize,
        row: usize,
    ) -> Result<PullResult<'a>> {
        let meta = entry.column(column)?;
        let kind = meta.kind;
        let binary = meta.is_binary();

        if column == 0 {
            let status = entry
                .client()
                .fetch()
                .map_err(|e| translate(Stage::Fetch, e))?;
            if !status.has_row() {
                log::trace!("next_value: no more rows after row {}", row);
                return Ok(PullResult::Done);
            }
        }

        let capacity = self.buffer.len().max(self.initial_capacity);
        self.buffer.resize(capacity, 0);

        let first = entry
            .client()
            .fetch_column(column, kind, &mut self.buffer)
            .map_err(|e| translate(Stage::Fetch, e))?;
        if first.is_null {
            return Ok(PullResult::Value(PulledValue {
                data: None,
                length: 0,
                binary,
            }));
        }

        let mut length = first.length;
        if length > self.buffer.len() {
            log::debug!(
                "next_value: growing value buffer {} -> {} for column {} row {}",
                self.buffer.len(),
                length,
                column,
                row
            );
            self.buffer.resize(length, 0);
            self.regrowths += 1;

            let second = entry
                .client()
                .fetch_column(column, kind, &mut self.buffer)
                .map_err(|e| translate(Stage::Fetch, e))?;
            if second.is_null {
                return Ok(PullResult::Value(PulledValue {
                    data: None,
                    length: 0,
                    binary,
                }));
            }
            if second.length > self.buffer.len() {
                return Err(engine_error(
                    Stage::Fetch,
                    "01004",
                    CR_DATA_TRUNCATED,
                    format!(
                        "column {} truncated: value is {} bytes after growing buffer to {}",
                        column,
                        second.length,
                        self.buffer.len()
                    ),
                ));
            }
            length = second.length;
        }

        Ok(PullResult::Value(PulledValue {
            data: Some(&self.buffer[..length]),
            length,
            binary,
        }))
    }

    fn reset(&mut self) {
        self.buffer.truncate(self.initial_capacity);
        self.buffer.shrink_to(self.initial_capacity);
    }

    fn take_regrowths(&mut self) -> u64 {
        std::mem::take(&mut self.regrowths)
    }
}

pub struct BoundFetch {
    slots: [OutputSlot; MAX_RESULT_COLUMNS],
    columns: usize,
    on_row: bool,
}

impl Default for BoundFetch {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundFetch {
    pub fn new() -> Self {
        Self {
            slots: [OutputSlot::default(); MAX_RESULT_COLUMNS],
            columns: 0,
            on_row: false,
        }
    }

    fn slot(&self, column: usize) -> Result<&OutputSlot> {
        if !self.on_row {
            return Err(DbiError::InvalidState(
                "no current row; call NextRow first".to_string(),
            ));
        }
        self.slots[..self.columns].get(column).ok_or_else(|| {
            engine_error(
                Stage::Fetch,
                "07009",
                0,
                format!(
                    "column index {} out of range, statement has {} columns",
                    column, self.columns
                ),
            )
        })
    }
}

impl ResultFetch for BoundFetch {
    fn mode(&self) -> FetchMode {
        FetchMode::Bound
    }

    fn on_execute(&mut self, entry: &StatementEntry) -> Result<()> {
        let n = entry.column_count();
        if n > MAX_RESULT_COLUMNS {
            return Err(engine_error(
                Stage::Execute,
                "54011",
                0,
                format!(
                    "result has {} columns, at most {} can be bound",
                    n, MAX_RESULT_COLUMNS
                ),
            ));
        }
        self.reset();
        self.columns = n;
        Ok(())
    }

    fn next_row(&mut self, entry: &mut StatementEntry) -> Result<bool> {
        let n = self.columns;
        let status = entry
            .client()
            .fetch_bound(&mut self.slots[..n])
            .map_err(|e| translate(Stage::Fetch, e))?;
        self.on_row = status.has_row();
        if self.on_row {
            for slot in self.slots[..n].iter_mut().filter(|s| s.is_null) {
                slot.length = 0;
            }
        }
        Ok(self.on_row)
    }

    fn column_length(&self, entry: &StatementEntry, column: usize) -> Result<(usize, bool)> {
        let slot = self.slot(column)?;
        let binary = entry.column(column)?.is_binary();
        Ok((slot.length, binary))
    }

    fn column_value(
        &mut self,
        entry: &mut StatementEntry,
        column: usize,
        buffer: &mut [u8],
    ) -> Result<usize> {
        let slot = *self.slot(column)?;
        if slot.is_null {
            return Ok(0);
        }
        if buffer.len() < slot.length {
            return Err(engine_error(
                Stage::Fetch,
                "01004",
                CR_DATA_TRUNCATED,
                format!(
                    "buffer of {} bytes too small for column {} value of {} bytes",
                    buffer.len(),
                    column,
                    slot.length
                ),
            ));
        }
        let kind = entry.column(column)?.kind;
        let fetched = entry
            .client()
            .fetch_column(column, kind, &mut buffer[..slot.length])
            .map_err(|e| translate(Stage::Fetch, e))?;
        Ok(fetched.length.min(slot.length))
    }

    fn reset(&mut self) {
        self.slots = [OutputSlot::default(); MAX_RESULT_COLUMNS];
        self.on_row = false;
    }
}
