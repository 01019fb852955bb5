//! Fixed-Size Record Buffer for Outgoing Telemetry
//!
//! ## Overview
//!
//! This module provides the staging area between the measurement scheduler
//! and whatever transmits data off the logger (a cellular modem, a radio, an
//! SD card). Records accumulate here while the link is down and are drained
//! in one go when it comes back. Unlike traditional collections that allocate
//! memory dynamically, the buffer is a byte arena whose size is fixed at
//! compile time through a const generic.
//!
//! ## Design Rationale
//!
//! ### Why an Accumulate-Until-Drained Buffer?
//!
//! Telemetry records are not a sliding window: every record must reach the
//! server, so silently overwriting the oldest data (what a ring buffer does)
//! would be data loss. When the arena is full, [`LogBuffer::add_record`]
//! refuses the record and the caller decides: transmit and
//! [`LogBuffer::clear`], or drop the new record.
//!
//! ### Why Bytes Instead of `heapless::Vec<Record>`?
//!
//! The number of variables per record is a runtime setting (it depends on
//! which sensors the deployment has), so a record has no static type. Packing
//! records into a flat byte array lets the same arena hold nine wide records
//! or a hundred narrow ones, and the packed form is exactly what gets
//! transmitted.
//!
//! ### Memory Layout
//!
//! Every record has the same size, `4 + 4 × num_variables` bytes, and records
//! are packed back to back from offset 0:
//!
//! ```text
//! LogBuffer<40> with num_variables = 2 (record_size = 12):
//! ┌──────┬──────┬──────┬──────┬──────┬──────┬────┐
//! │ ts 0 │ v0   │ v1   │ ts 1 │ v0   │ v1   │ ·· │  ← 3 records fit, 4 spare bytes
//! └──────┴──────┴──────┴──────┴──────┴──────┴────┘
//!  0      4      8      12     16     20     36
//!
//! ts: u32 seconds since epoch, native-endian
//! vN: f32 value of variable N, native-endian
//! ```
//!
//! No headers, gaps, trailers or wraparound.
//!
//! ### Addressing Contract
//!
//! [`LogBuffer::set_record_value`] and the raw readers do not check the
//! record or variable index against what was added; callers use indices
//! returned by a successful `add_record` and variables below
//! `num_variables`. Anything that lands past the end of the arena is dropped
//! on write and reads back as zero. [`LogBuffer::record`] is the checked
//! accessor used when draining.
//!
//! ## Usage Example
//!
//! ```rust
//! use fieldlog_core::buffer::LogBuffer;
//!
//! let mut buffer: LogBuffer<256> = LogBuffer::new();
//! buffer.set_num_variables(2);
//!
//! let rec = buffer.add_record(1_700_000_000).unwrap();
//! buffer.set_record_value(rec, 0, 21.5);
//! buffer.set_record_value(rec, 1, 87.0);
//!
//! assert_eq!(buffer.record_timestamp(rec), 1_700_000_000);
//! assert_eq!(buffer.record_value(rec, 1), 87.0);
//! assert_eq!(buffer.percent_full(), 4);
//! ```

use crate::constants::LOG_BUFFER_SIZE;
use thiserror_no_std::Error;

const TIMESTAMP_BYTES: usize = 4;
const VALUE_BYTES: usize = 4;

/// Errors returned by the log buffer
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogBufferError {
    /// Not enough room left for another record
    #[error("No space for a {record_size}-byte record ({remaining} bytes left)")]
    NoSpace {
        /// Bytes one record needs
        record_size: usize,
        /// Bytes left in the arena
        remaining: usize,
    },
}

#[cfg(feature = "defmt")]
impl defmt::Format for LogBufferError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::NoSpace { record_size, remaining } =>
                defmt::write!(fmt, "No space: need {}, have {}", record_size, remaining),
        }
    }
}

/// Fixed-capacity arena of timestamped multi-variable records
///
/// ## Type Parameter
///
/// - `CAPACITY`: arena size in bytes. Pick one of the presets in
///   [`crate::constants::buffers`] for the target board.
///
/// ## Internal Invariants
///
/// - `record_size == 4 + 4 * num_variables`
/// - `num_records * record_size <= CAPACITY`
/// - Records `0..num_records` were each written by `add_record`
///
/// ## Thread Safety
///
/// Not synchronized. Loggers fill and drain from the same main loop.
#[derive(Clone)]
pub struct LogBuffer<const CAPACITY: usize = LOG_BUFFER_SIZE> {
    data: [u8; CAPACITY],
    record_size: usize,
    num_records: usize,
    num_variables: u8,
}

impl<const CAPACITY: usize> LogBuffer<CAPACITY> {
    /// Empty buffer with zero variables per record
    ///
    /// Const, so the arena can live in a `static`.
    pub const fn new() -> Self {
        Self {
            data: [0; CAPACITY],
            record_size: TIMESTAMP_BYTES,
            num_records: 0,
            num_variables: 0,
        }
    }

    /// Change the number of variables per record
    ///
    /// Every buffered record is discarded: the old records no longer match
    /// the new layout.
    pub fn set_num_variables(&mut self, num_variables: u8) {
        self.num_variables = num_variables;
        self.record_size = TIMESTAMP_BYTES + VALUE_BYTES * num_variables as usize;
        self.num_records = 0;
    }

    /// Forget all records. The bytes are not zeroed.
    pub fn clear(&mut self) {
        self.num_records = 0;
    }

    /// Append a record with the given timestamp
    ///
    /// Returns the index of the new record. Values start out as whatever the
    /// arena held before; set each one with [`Self::set_record_value`].
    ///
    /// ## Errors
    ///
    /// [`LogBufferError::NoSpace`] when fewer than `record_size` bytes are
    /// left. Nothing is written in that case.
    pub fn add_record(&mut self, timestamp: u32) -> Result<usize, LogBufferError> {
        let offset = self.num_records * self.record_size;
        let remaining = CAPACITY.saturating_sub(offset);

        if remaining < self.record_size {
            return Err(LogBufferError::NoSpace { record_size: self.record_size, remaining });
        }

        self.write_bytes(offset, timestamp.to_ne_bytes());
        let index = self.num_records;
        self.num_records += 1;
        Ok(index)
    }

    /// Store the value of `variable` in `record`
    pub fn set_record_value(&mut self, record: usize, variable: usize, value: f32) {
        let offset = self.value_offset(record, variable);
        self.write_bytes(offset, value.to_ne_bytes());
    }

    /// Timestamp of `record`
    pub fn record_timestamp(&self, record: usize) -> u32 {
        let offset = record.saturating_mul(self.record_size);
        u32::from_ne_bytes(self.read_bytes(offset))
    }

    /// Value of `variable` in `record`
    pub fn record_value(&self, record: usize, variable: usize) -> f32 {
        f32::from_ne_bytes(self.read_bytes(self.value_offset(record, variable)))
    }

    /// Checked view of one buffered record
    pub fn record(&self, record: usize) -> Option<Record<'_, CAPACITY>> {
        (record < self.num_records).then_some(Record { buffer: self, index: record })
    }

    /// Buffered records, oldest first
    pub fn records(&self) -> impl Iterator<Item = Record<'_, CAPACITY>> + '_ {
        (0..self.num_records).map(move |index| Record { buffer: self, index })
    }

    /// Number of buffered records
    pub fn num_records(&self) -> usize {
        self.num_records
    }

    /// Variables per record
    pub fn num_variables(&self) -> u8 {
        self.num_variables
    }

    /// Bytes per record
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Arena size in bytes
    pub const fn capacity(&self) -> usize {
        CAPACITY
    }

    /// Share of the arena in use, rounded down
    pub fn percent_full(&self) -> u8 {
        if CAPACITY == 0 {
            return 100;
        }
        (self.num_records * self.record_size * 100 / CAPACITY) as u8
    }

    fn value_offset(&self, record: usize, variable: usize) -> usize {
        record
            .saturating_mul(self.record_size)
            .saturating_add(TIMESTAMP_BYTES)
            .saturating_add(variable.saturating_mul(VALUE_BYTES))
    }

    fn write_bytes(&mut self, offset: usize, bytes: [u8; 4]) {
        if let Some(slot) = offset
            .checked_add(bytes.len())
            .and_then(|end| self.data.get_mut(offset..end))
        {
            slot.copy_from_slice(&bytes);
        }
    }

    fn read_bytes(&self, offset: usize) -> [u8; 4] {
        let mut bytes = [0u8; 4];
        if let Some(slot) = offset
            .checked_add(bytes.len())
            .and_then(|end| self.data.get(offset..end))
        {
            bytes.copy_from_slice(slot);
        }
        bytes
    }
}

impl<const CAPACITY: usize> Default for LogBuffer<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

/// One buffered record
#[derive(Clone, Copy)]
pub struct Record<'a, const CAPACITY: usize> {
    buffer: &'a LogBuffer<CAPACITY>,
    index: usize,
}

impl<'a, const CAPACITY: usize> Record<'a, CAPACITY> {
    /// Position in the buffer
    pub fn index(&self) -> usize {
        self.index
    }

    /// Seconds since epoch
    pub fn timestamp(&self) -> u32 {
        self.buffer.record_timestamp(self.index)
    }

    /// Value of one variable, `None` past the record width
    pub fn value(&self, variable: usize) -> Option<f32> {
        (variable < self.buffer.num_variables as usize)
            .then(|| self.buffer.record_value(self.index, variable))
    }

    /// All values in variable order
    pub fn values(&self) -> impl Iterator<Item = f32> + 'a {
        let buffer = self.buffer;
        let index = self.index;
        (0..buffer.num_variables as usize).map(move |v| buffer.record_value(index, v))
    }
}
