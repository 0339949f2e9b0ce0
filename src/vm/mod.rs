//! Virtual machine for tape-based byte programs
//!
//! This module contains the tape, the program and its bracket resolution,
//! and the engine that executes programs against console or network streams.

mod errors;
mod program;
mod tape;
mod types;

pub use errors::VMError;
pub use program::{resolve_backward, resolve_forward, JumpTable, Program};
pub use tape::{Direction, Tape, TAPE_SIZE};
pub use types::{Dialect, Op, StreamMode};

// Main VM struct that coordinates components
mod vm;
pub use vm::{ExecutionStats, Step, VM};
