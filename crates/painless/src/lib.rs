#![doc = include_str!("../../../README.md")]
// (workspace root README doubles as the crate-level docs)
#![expect(dead_code, reason = "whitelist surface keeps some currently-unused accessors")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing mirrors the target VM")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors the target VM")]
#![expect(clippy::needless_pass_by_value, reason = "native call APIs pass values consistently")]
#![expect(clippy::trivially_copy_pass_by_ref, reason = "native signatures stay uniform")]
#![expect(clippy::float_cmp, reason = "folding tests require exact float comparison")]

mod analyze;
mod ast;
mod bytecode;
mod compile;
mod emit;
mod error;
mod lex;
mod parse;
pub mod registry;
mod typed;
pub mod vm;

pub use crate::{
    bytecode::{Code, Executable, FunctionCode, PoolConst},
    compile::{Settings, compile},
    error::{CompileError, ErrorKind, Loc},
    registry::{Registry, RegistryBuilder, RegistryError, catalog::default_registry},
    vm::{
        ExecTracer, NoopTracer, Params, RecordingTracer, RunError, Runner, TraceEvent, Value, param_map,
    },
};
