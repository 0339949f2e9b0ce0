//! Type definitions for the virtual machine
//!
//! The instruction set, the dialect switch that decides which symbols are
//! meaningful, and the console/network mode flag owned by the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Instructions recognised in program source
///
/// Every byte that does not decode to an `Op` is a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    /// `>` move the cursor one cell right
    Right,

    /// `<` move the cursor one cell left
    Left,

    /// `+` increment the current cell, wrapping at 256
    Inc,

    /// `-` decrement the current cell, wrapping below 0
    Dec,

    /// `.` write the current cell to the active stream
    Output,

    /// `,` read one byte from the active stream into the current cell
    Input,

    /// `[` skip past the matching `]` when the current cell is zero
    LoopOpen,

    /// `]` return to the matching `[` when the current cell is nonzero
    LoopClose,

    /// `^` listen on `cell * 100` and block until one peer connects
    ServerHook,

    /// `&` connect to loopback on `cell * 100`
    ClientHook,

    /// `%` flip between console and network I/O
    ToggleStream,

    /// `!` non-blocking look at the next peer byte without consuming it
    Peek,
}

impl Op {
    /// Decode a source byte under the given dialect
    pub fn decode(byte: u8, dialect: Dialect) -> Option<Op> {
        let op = match byte {
            b'>' => Op::Right,
            b'<' => Op::Left,
            b'+' => Op::Inc,
            b'-' => Op::Dec,
            b'.' => Op::Output,
            b',' => Op::Input,
            b'[' => Op::LoopOpen,
            b']' => Op::LoopClose,
            b'^' => Op::ServerHook,
            b'&' => Op::ClientHook,
            b'%' => Op::ToggleStream,
            b'!' => Op::Peek,
            _ => return None,
        };

        if op.is_network() && dialect == Dialect::Classic {
            return None;
        }
        Some(op)
    }

    /// The source symbol for this instruction
    pub fn symbol(self) -> char {
        match self {
            Op::Right => '>',
            Op::Left => '<',
            Op::Inc => '+',
            Op::Dec => '-',
            Op::Output => '.',
            Op::Input => ',',
            Op::LoopOpen => '[',
            Op::LoopClose => ']',
            Op::ServerHook => '^',
            Op::ClientHook => '&',
            Op::ToggleStream => '%',
            Op::Peek => '!',
        }
    }

    /// Whether the instruction only exists in the extended dialect
    pub fn is_network(self) -> bool {
        matches!(
            self,
            Op::ServerHook | Op::ClientHook | Op::ToggleStream | Op::Peek
        )
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Which symbol table the engine decodes against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// The eight classic symbols only
    Classic,

    /// Classic symbols plus `^ & % !`
    #[default]
    Extended,
}

impl Dialect {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "classic" | "base" => Some(Dialect::Classic),
            "extended" | "net" => Some(Dialect::Extended),
            _ => None,
        }
    }
}

/// Which stream `.` and `,` target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StreamMode {
    #[default]
    Console,
    Network,
}

impl StreamMode {
    pub fn toggled(self) -> Self {
        match self {
            StreamMode::Console => StreamMode::Network,
            StreamMode::Network => StreamMode::Console,
        }
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamMode::Console => write!(f, "console"),
            StreamMode::Network => write!(f, "network"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_classic_symbols() {
        for &b in b"><+-.,[]" {
            let op = Op::decode(b, Dialect::Classic).unwrap();
            assert_eq!(op.symbol() as u8, b);
        }
    }

    #[test]
    fn test_network_symbols_are_comments_in_classic() {
        for &b in b"^&%!" {
            assert_eq!(Op::decode(b, Dialect::Classic), None);
            assert!(Op::decode(b, Dialect::Extended).unwrap().is_network());
        }
    }

    #[test]
    fn test_other_bytes_are_comments() {
        for b in [b'a', b' ', b'\n', b'#', 0u8, 255u8] {
            assert_eq!(Op::decode(b, Dialect::Extended), None);
        }
    }

    #[test]
    fn test_mode_toggle() {
        assert_eq!(StreamMode::Console.toggled(), StreamMode::Network);
        assert_eq!(StreamMode::Network.toggled(), StreamMode::Console);
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!(Dialect::from_str("Classic"), Some(Dialect::Classic));
        assert_eq!(Dialect::from_str("net"), Some(Dialect::Extended));
        assert_eq!(Dialect::from_str("other"), None);
    }
}
