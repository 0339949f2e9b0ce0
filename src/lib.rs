pub mod config;
pub mod events;
pub mod stream;
pub mod vm;

pub use crate::config::Config;
pub use crate::events::{Event, EventSink, Level};
pub use crate::stream::{ByteStream, Console, Network, StreamError};
pub use crate::vm::{Dialect, ExecutionStats, Op, Program, Tape, VMError, VM};
