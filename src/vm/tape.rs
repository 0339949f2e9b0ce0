//! VM tape
//!
//! Fixed-size byte memory with a movable cursor. Cursor motion clamps at
//! both ends of the tape; cell arithmetic wraps modulo 256.

use std::fmt;

use crate::vm::errors::VMError;

/// Number of cells on a tape
pub const TAPE_SIZE: usize = 30_000;

/// Direction of a cursor move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

/// Byte tape owned by the VM
#[derive(Debug, Clone)]
pub struct Tape {
    /// Cell storage, never resized after allocation
    cells: Vec<u8>,

    /// Index of the current cell, always in `[0, cells.len())`
    cursor: usize,
}

impl Tape {
    /// Allocate a zeroed tape of [`TAPE_SIZE`] cells
    pub fn new() -> Result<Self, VMError> {
        Self::with_size(TAPE_SIZE)
    }

    /// Allocate a zeroed tape of `size` cells
    pub fn with_size(size: usize) -> Result<Self, VMError> {
        if size == 0 {
            return Err(VMError::TapeAllocation { cells: size });
        }

        let mut cells = Vec::new();
        cells
            .try_reserve_exact(size)
            .map_err(|_| VMError::TapeAllocation { cells: size })?;
        cells.resize(size, 0);

        Ok(Self { cells, cursor: 0 })
    }

    /// Move the cursor one cell, clamping at the edges.
    ///
    /// Returns `false` when the move was clamped.
    pub fn shift(&mut self, direction: Direction) -> bool {
        match direction {
            Direction::Left if self.cursor > 0 => {
                self.cursor -= 1;
                true
            }
            Direction::Right if self.cursor + 1 < self.cells.len() => {
                self.cursor += 1;
                true
            }
            _ => false,
        }
    }

    /// Value of the current cell
    pub fn read(&self) -> u8 {
        self.cells[self.cursor]
    }

    /// Overwrite the current cell
    pub fn write(&mut self, value: u8) {
        self.cells[self.cursor] = value;
    }

    pub fn increment(&mut self) {
        let cell = &mut self.cells[self.cursor];
        *cell = cell.wrapping_add(1);
    }

    pub fn decrement(&mut self) {
        let cell = &mut self.cells[self.cursor];
        *cell = cell.wrapping_sub(1);
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cell value at an absolute index, if it exists
    pub fn get(&self, index: usize) -> Option<u8> {
        self.cells.get(index).copied()
    }

    /// Cells from the start of the tape up to and including the last nonzero one
    pub fn used(&self) -> &[u8] {
        let end = self
            .cells
            .iter()
            .rposition(|&c| c != 0)
            .map_or(0, |i| i + 1);
        &self.cells[..end]
    }
}

impl fmt::Display for Tape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let used = self.used();
        let shown = used.len().max(self.cursor + 1).min(self.cells.len());

        write!(f, "Tape: [")?;
        for (i, cell) in self.cells[..shown].iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            if i == self.cursor {
                write!(f, "({})", cell)?;
            } else {
                write!(f, "{}", cell)?;
            }
        }
        write!(f, "]")
    }
}
