//! The compiled representation: per-function [`Code`] bodies and the
//! loadable [`Executable`] unit.
//!
//! An `Executable` serializes to a byte array with postcard; that byte array
//! is the unit the host loads and runs. Reference tables keep instructions
//! compact: member operations carry `u16` indices into per-`Code` tables.

use serde::{Deserialize, Serialize};

use crate::{
    registry::{MethodKey, StructId},
    typed::{DynCall, FuncRefData},
};

/// A constant-pool entry.
///
/// Patterns are stored as source + flags and compiled when the executable is
/// loaded, so the pool stays plain data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PoolConst {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    Str(Box<str>),
    Pattern { pattern: Box<str>, flags: Box<str> },
}

/// Static member reference resolved by the VM against the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRef {
    pub owner: StructId,
    pub key: MethodKey,
    pub is_static: bool,
    pub returns_void: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    pub owner: StructId,
    pub name: Box<str>,
    pub is_static: bool,
}

/// Source-line record: the line active from `offset` onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEntry {
    pub offset: u32,
    pub line: u32,
}

/// One try/catch handler range.
///
/// Entries are innermost-first; the VM picks the first entry covering the
/// faulting offset whose exception type matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionEntry {
    pub start: u32,
    pub end: u32,
    pub handler: u32,
    pub exc: StructId,
    /// Operand-stack depth to restore before pushing the exception value.
    pub stack_depth: u16,
}

/// One compiled method body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Code {
    pub bytecode: Vec<u8>,
    pub pool: Vec<PoolConst>,
    pub method_refs: Vec<MethodRef>,
    pub field_refs: Vec<FieldRef>,
    pub dyn_refs: Vec<DynCall>,
    pub funcref_refs: Vec<FuncRefData>,
    pub struct_refs: Vec<StructId>,
    pub line_table: Vec<LineEntry>,
    pub exception_table: Vec<ExceptionEntry>,
    pub max_slots: u16,
    pub max_stack: u16,
}

impl Code {
    /// The source line covering a bytecode offset, from the debug table.
    #[must_use]
    pub fn line_at(&self, offset: u32) -> Option<u32> {
        let mut best = None;
        for entry in &self.line_table {
            if entry.offset <= offset {
                best = Some(entry.line);
            } else {
                break;
            }
        }
        best
    }
}

/// A compiled script function (user-declared or lambda synthetic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCode {
    pub name: Box<str>,
    pub arity: u8,
    /// Frame slot each argument lands in; wide types skip a slot.
    pub param_slots: Vec<u16>,
    pub returns_void: bool,
    pub code: Code,
}

/// The loadable executable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Executable {
    /// Class name derived from the script name.
    pub class_name: Box<str>,
    /// Marker: the script references `_score`.
    pub needs_score: bool,
    pub main: Code,
    pub functions: Vec<FunctionCode>,
}

impl Executable {
    /// Serializes the unit to its loadable byte form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Loads a unit from its byte form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executable_byte_round_trip() {
        let exe = Executable {
            class_name: "Script$test".into(),
            needs_score: true,
            main: Code {
                bytecode: vec![1, 0, 0, 52],
                pool: vec![PoolConst::Int(7), PoolConst::Str("k".into())],
                max_slots: 3,
                max_stack: 2,
                ..Code::default()
            },
            functions: vec![],
        };
        let bytes = exe.to_bytes().unwrap();
        assert_eq!(Executable::from_bytes(&bytes).unwrap(), exe);
    }

    #[test]
    fn test_line_at_picks_latest_entry() {
        let code = Code {
            line_table: vec![
                LineEntry { offset: 0, line: 1 },
                LineEntry { offset: 5, line: 2 },
                LineEntry { offset: 9, line: 4 },
            ],
            ..Code::default()
        };
        assert_eq!(code.line_at(0), Some(1));
        assert_eq!(code.line_at(7), Some(2));
        assert_eq!(code.line_at(40), Some(4));
    }
}
