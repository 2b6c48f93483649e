// table.rs — the contour table: the trace output structure.
//
// WIRE LAYOUT (shared with the kernel, must not drift)
// ─────────────────────────────────────────────────────
// Row-major grid of u32 cells, one row per contour slot:
//
//   cell 0        count N of valid coordinate cells that follow
//   cells 1..=N   alternating (row, col) boundary coordinates in
//                 trace order — N is even, N/2 points per contour
//   cells N+1..   zero
//
// Rows beyond the last slot the kernel claimed are all-zero. The table
// is allocated by the caller, filled by the device, and decoded here;
// decoding validates the count cell against the layout because the
// device is untrusted output as far as the host is concerned.

use std::fmt;

/// One decoded contour: boundary points as (row, col), in trace order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contour {
    pub points: Vec<(u32, u32)>,
}

/// A malformed contour-table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableDecodeError {
    /// The count cell is odd — coordinates come in pairs.
    OddCount { row: usize, count: u32 },
    /// The count cell exceeds the row's coordinate capacity.
    CountOverflow { row: usize, count: u32, capacity: u32 },
}

impl fmt::Display for TableDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableDecodeError::OddCount { row, count } => {
                write!(f, "contour row {row} has odd coordinate count {count}")
            }
            TableDecodeError::CountOverflow { row, count, capacity } => write!(
                f,
                "contour row {row} claims {count} coordinate cells, capacity is {capacity}"
            ),
        }
    }
}

impl std::error::Error for TableDecodeError {}

/// Caller-owned contour table. `width` is cells per row (1 count cell +
/// coordinate capacity), `height` is the number of contour slots.
#[derive(Clone, PartialEq, Eq)]
pub struct ContourTable {
    width: u32,
    height: u32,
    cells: Vec<u32>,
}

impl ContourTable {
    /// Zero-filled table with `height` contour slots of `width` cells.
    pub fn new(width: u32, height: u32) -> Self {
        ContourTable {
            width,
            height,
            cells: vec![0u32; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Coordinate cells available per row (`width - 1`).
    pub fn capacity(&self) -> u32 {
        self.width.saturating_sub(1)
    }

    /// Raw cells of one row.
    pub fn row(&self, row: usize) -> &[u32] {
        let w = self.width as usize;
        &self.cells[row * w..(row + 1) * w]
    }

    /// Decode one row. `Ok(None)` for an unused (zero-count) row.
    pub fn decode_row(&self, row: usize) -> Result<Option<Contour>, TableDecodeError> {
        let cells = self.row(row);
        let count = cells[0];
        if count == 0 {
            return Ok(None);
        }
        if count % 2 != 0 {
            return Err(TableDecodeError::OddCount { row, count });
        }
        if count > self.capacity() {
            return Err(TableDecodeError::CountOverflow {
                row,
                count,
                capacity: self.capacity(),
            });
        }
        let points = cells[1..=count as usize]
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .collect();
        Ok(Some(Contour { points }))
    }

    /// Decode every used row, in slot order. Stops at the first
    /// malformed row.
    pub fn contours(&self) -> Result<Vec<Contour>, TableDecodeError> {
        let mut out = Vec::new();
        for row in 0..self.height as usize {
            if let Some(c) = self.decode_row(row)? {
                out.push(c);
            }
        }
        Ok(out)
    }

    /// Transfer view: the cells as little-endian bytes,
    /// length `4 * width * height`.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.cells)
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.cells)
    }
}

impl fmt::Debug for ContourTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContourTable({}x{})", self.width, self.height)
    }
}
