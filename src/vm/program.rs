//! Program source and bracket resolution
//!
//! A [`Program`] keeps the loaded bytes verbatim. Bracket balance is not
//! validated at load time: an unmatched bracket only becomes an error when
//! the engine actually needs to jump from it.

use std::fs;
use std::path::Path;

use crate::vm::errors::VMError;
use crate::vm::types::{Dialect, Op};

const OPEN: u8 = b'[';
const CLOSE: u8 = b']';

/// Find the `]` matching the `[` at `from` by scanning forward.
pub fn resolve_forward(source: &[u8], from: usize) -> Result<usize, VMError> {
    let mut depth = 1usize;
    for (offset, &byte) in source.iter().enumerate().skip(from + 1) {
        match byte {
            OPEN => depth += 1,
            CLOSE => {
                depth -= 1;
                if depth == 0 {
                    return Ok(offset);
                }
            }
            _ => {}
        }
    }
    Err(VMError::UnmatchedBracket {
        offset: from,
        symbol: OPEN as char,
    })
}

/// Find the `[` matching the `]` at `from` by scanning backward.
pub fn resolve_backward(source: &[u8], from: usize) -> Result<usize, VMError> {
    let mut depth = 1usize;
    for offset in (0..from.min(source.len())).rev() {
        match source[offset] {
            CLOSE => depth += 1,
            OPEN => {
                depth -= 1;
                if depth == 0 {
                    return Ok(offset);
                }
            }
            _ => {}
        }
    }
    Err(VMError::UnmatchedBracket {
        offset: from,
        symbol: CLOSE as char,
    })
}

/// Precomputed bracket partners, keyed by source offset.
///
/// Brackets without a partner are recorded as `None` so the failure is
/// still reported at the moment the jump is attempted.
#[derive(Debug, Clone, Default)]
pub struct JumpTable {
    targets: Vec<Option<usize>>,
}

impl JumpTable {
    pub fn build(source: &[u8]) -> Self {
        let mut targets = vec![None; source.len()];
        let mut opens = Vec::new();

        for (offset, &byte) in source.iter().enumerate() {
            match byte {
                OPEN => opens.push(offset),
                CLOSE => {
                    if let Some(open) = opens.pop() {
                        targets[open] = Some(offset);
                        targets[offset] = Some(open);
                    }
                }
                _ => {}
            }
        }

        Self { targets }
    }

    /// Partner of the bracket at `offset`
    pub fn target(&self, offset: usize) -> Option<usize> {
        self.targets.get(offset).copied().flatten()
    }
}

/// Immutable program loaded from source
#[derive(Debug, Clone)]
pub struct Program {
    source: Vec<u8>,
    dialect: Dialect,
    jumps: JumpTable,
}

impl Program {
    /// Wrap raw source bytes
    pub fn new(source: impl Into<Vec<u8>>, dialect: Dialect) -> Self {
        let source = source.into();
        let jumps = JumpTable::build(&source);
        Self {
            source,
            dialect,
            jumps,
        }
    }

    /// Read a program from disk
    pub fn load<P: AsRef<Path>>(path: P, dialect: Dialect) -> Result<Self, VMError> {
        let path = path.as_ref();
        let source = fs::read(path).map_err(|e| VMError::SourceUnreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(source, dialect))
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn source(&self) -> &[u8] {
        &self.source
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Decoded instruction at `offset`, `None` for comments and past the end
    pub fn op_at(&self, offset: usize) -> Option<Op> {
        self.source
            .get(offset)
            .and_then(|&b| Op::decode(b, self.dialect))
    }

    /// Offset of the `]` matching the `[` at `offset`
    pub fn matching_close(&self, offset: usize) -> Result<usize, VMError> {
        self.jumps
            .target(offset)
            .ok_or(VMError::UnmatchedBracket {
                offset,
                symbol: OPEN as char,
            })
    }

    /// Offset of the `[` matching the `]` at `offset`
    pub fn matching_open(&self, offset: usize) -> Result<usize, VMError> {
        self.jumps
            .target(offset)
            .ok_or(VMError::UnmatchedBracket {
                offset,
                symbol: CLOSE as char,
            })
    }

    /// First bracket in the source that has no partner
    pub fn first_unmatched(&self) -> Option<VMError> {
        self.source
            .iter()
            .enumerate()
            .find(|&(offset, &b)| (b == OPEN || b == CLOSE) && self.jumps.target(offset).is_none())
            .map(|(offset, &b)| VMError::UnmatchedBracket {
                offset,
                symbol: b as char,
            })
    }

    /// Count of executable instructions, ignoring comments
    pub fn instruction_count(&self) -> usize {
        (0..self.source.len())
            .filter(|&i| self.op_at(i).is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::Rng;

    fn random_program(rng: &mut impl Rng, len: usize) -> Vec<u8> {
        let alphabet = b"[]+-<>.x";
        (0..len).map(|_| *alphabet.choose(rng).unwrap()).collect()
    }

    fn random_balanced(rng: &mut impl Rng, len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut open = 0;
        for _ in 0..len {
            match rng.gen_range(0..4) {
                0 => {
                    out.push(OPEN);
                    open += 1;
                }
                1 if open > 0 => {
                    out.push(CLOSE);
                    open -= 1;
                }
                _ => out.push(b'+'),
            }
        }
        out.extend(std::iter::repeat(CLOSE).take(open));
        out
    }

    #[test]
    fn test_resolve_simple_pair() {
        let src = b"+[->+<]";
        assert_eq!(resolve_forward(src, 1).unwrap(), 6);
        assert_eq!(resolve_backward(src, 6).unwrap(), 1);
    }

    #[test]
    fn test_resolve_nested() {
        let src = b"[[][]]";
        assert_eq!(resolve_forward(src, 0).unwrap(), 5);
        assert_eq!(resolve_forward(src, 1).unwrap(), 2);
        assert_eq!(resolve_forward(src, 3).unwrap(), 4);
        assert_eq!(resolve_backward(src, 5).unwrap(), 0);
        assert_eq!(resolve_backward(src, 4).unwrap(), 3);
    }

    #[test]
    fn test_resolve_unmatched() {
        assert_eq!(
            resolve_forward(b"[", 0).unwrap_err(),
            VMError::UnmatchedBracket {
                offset: 0,
                symbol: '['
            }
        );
        assert_eq!(
            resolve_backward(b"+]", 1).unwrap_err(),
            VMError::UnmatchedBracket {
                offset: 1,
                symbol: ']'
            }
        );
        assert!(resolve_forward(b"[[]", 0).is_err());
        assert!(resolve_backward(b"[]]", 2).is_err());
    }

    #[test]
    fn test_jump_table_agrees_with_linear_scan() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let len = rng.gen_range(0..64);
            let src = random_program(&mut rng, len);
            let table = JumpTable::build(&src);

            for (offset, &b) in src.iter().enumerate() {
                let scanned = match b {
                    OPEN => resolve_forward(&src, offset).ok(),
                    CLOSE => resolve_backward(&src, offset).ok(),
                    _ => continue,
                };
                assert_eq!(table.target(offset), scanned, "offset {} of {:?}", offset, src);
            }
        }
    }

    #[test]
    fn test_balanced_programs_always_resolve() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let len = rng.gen_range(0..80);
            let src = random_balanced(&mut rng, len);
            let opens = src.iter().filter(|&&b| b == OPEN).count();
            let closes = src.iter().filter(|&&b| b == CLOSE).count();
            assert_eq!(opens, closes);

            let program = Program::new(src.clone(), Dialect::Classic);
            assert!(program.first_unmatched().is_none());
            for (offset, &b) in src.iter().enumerate() {
                match b {
                    OPEN => {
                        let close = program.matching_close(offset).unwrap();
                        assert_eq!(program.matching_open(close).unwrap(), offset);
                    }
                    CLOSE => assert!(program.matching_open(offset).is_ok()),
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn test_first_unmatched() {
        let program = Program::new("+[]]", Dialect::Extended);
        assert_eq!(
            program.first_unmatched(),
            Some(VMError::UnmatchedBracket {
                offset: 3,
                symbol: ']'
            })
        );
    }

    #[test]
    fn test_op_at_respects_dialect() {
        let classic = Program::new("^+", Dialect::Classic);
        let extended = Program::new("^+", Dialect::Extended);
        assert_eq!(classic.op_at(0), None);
        assert_eq!(extended.op_at(0), Some(Op::ServerHook));
        assert_eq!(classic.op_at(1), Some(Op::Inc));
        assert_eq!(classic.op_at(2), None);
        assert_eq!(classic.instruction_count(), 1);
        assert_eq!(extended.instruction_count(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Program::load("/nonexistent/prog.bf", Dialect::Classic).unwrap_err();
        assert!(matches!(err, VMError::SourceUnreadable { .. }));
    }
}
