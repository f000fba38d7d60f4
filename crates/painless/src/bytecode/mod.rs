//! Bytecode representation for the typed stack VM.
//!
//! - `op` — opcode definitions and operand widths
//! - `code` — compiled [`Code`] bodies and the loadable [`Executable`]
//! - `builder` — [`CodeBuilder`] used by the emitter

pub use builder::{CodeBuilder, Label};
pub use code::{Code, ExceptionEntry, Executable, FieldRef, FunctionCode, LineEntry, MethodRef, PoolConst};
pub use op::Opcode;
pub(crate) use op::{sort_from_byte, sort_to_byte};

mod builder;
mod code;
mod op;
