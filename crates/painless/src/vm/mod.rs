//! The stack VM that hosts compiled executables.
//!
//! One [`Runner`] wraps a shared registry and executes [`Executable`] units:
//! a frame per call, a `Vec<Value>` operand stack, exception-table
//! unwinding, and the def-dispatch bootstrap in [`dynamic`]. Natives re-enter
//! the VM through [`NativeCtx::call_funcref`], which is how stream operations
//! apply lambdas.

pub mod dynamic;
pub mod tracer;
mod value;

use std::{borrow::Cow, fmt, sync::Arc};

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    ast::{BinOp, CompOp},
    bytecode::{Code, Executable, Opcode, PoolConst, sort_from_byte},
    registry::{Registry, Sort, StructId, natives},
    typed::{DynOp, FuncTargetSpec},
};

pub use dynamic::value_eq;
pub use tracer::{ExecTracer, NoopTracer, RecordingTracer, TraceEvent};
pub use value::{
    ArrayValue, ExceptionValue, FuncRefValue, FuncTarget, MapKey, MatcherValue, PatternValue, Value, ValueIter,
};

/// Parameter bags are maps from hashable keys to values.
pub type Params = AHashMap<MapKey, Value>;

/// Builds a parameter bag from string-keyed pairs.
pub fn param_map<'s>(pairs: impl IntoIterator<Item = (&'s str, Value)>) -> Params {
    pairs
        .into_iter()
        .map(|(key, value)| (MapKey::Str(key.into()), value))
        .collect()
}

/// A runtime failure.
///
/// Only [`RunError::Exception`] is visible to script `catch` blocks; budget
/// exhaustion and internal faults unwind unconditionally.
#[derive(Debug)]
pub enum RunError {
    /// A script-visible exception value.
    Exception { value: Value },
    /// The loop budget was exhausted.
    LoopBudget,
    /// Call depth limit; guards the host stack.
    StackOverflow,
    /// An internal fault: analysis let an impossible state through.
    Internal(Cow<'static, str>),
}

impl RunError {
    pub(crate) fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(message.into())
    }

    /// Renders the error with the exception type name resolved.
    #[must_use]
    pub fn describe(&self, registry: &Registry) -> String {
        match self {
            Self::Exception { value: Value::Exception(exc) } => {
                let name = registry.struct_name(exc.struct_id);
                match &exc.message {
                    Some(message) => format!("{name}: {message}"),
                    None => name.to_string(),
                }
            }
            other => other.to_string(),
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exception { value: Value::Exception(exc) } => match &exc.message {
                Some(message) => write!(f, "script exception: {message}"),
                None => f.write_str("script exception"),
            },
            Self::Exception { .. } => f.write_str("script exception"),
            Self::LoopBudget => {
                f.write_str("The maximum number of statements that can be executed in a loop has been reached.")
            }
            Self::StackOverflow => f.write_str("script call depth exceeded."),
            Self::Internal(message) => write!(f, "illegal internal state: {message}"),
        }
    }
}

impl std::error::Error for RunError {}

pub(crate) trait FuncRefInvoker {
    fn invoke_funcref(&mut self, fr: &FuncRefValue, args: &[Value]) -> Result<Value, RunError>;
}

/// Context handle passed to every native method.
pub struct NativeCtx<'a> {
    pub registry: &'a Registry,
    /// Owner struct of the member being invoked; copied members rebind it.
    pub owner: StructId,
    invoker: Option<&'a mut dyn FuncRefInvoker>,
}

impl<'a> NativeCtx<'a> {
    /// A context with no VM behind it; funcref invocation fails. Used by
    /// registry construction and tests.
    #[must_use]
    pub fn detached(registry: &'a Registry) -> Self {
        Self {
            registry,
            owner: registry.core().object.struct_id,
            invoker: None,
        }
    }

    pub(crate) fn attached(registry: &'a Registry, invoker: &'a mut dyn FuncRefInvoker) -> Self {
        Self {
            registry,
            owner: registry.core().object.struct_id,
            invoker: Some(invoker),
        }
    }

    /// Builds a script-visible exception of the named whitelist type.
    #[must_use]
    pub fn throw(&self, struct_name: &str, message: impl Into<String>) -> RunError {
        let struct_id = self
            .registry
            .lookup_struct(struct_name)
            .unwrap_or(self.registry.core().exception.struct_id);
        RunError::Exception {
            value: Value::Exception(std::rc::Rc::new(ExceptionValue {
                struct_id,
                message: Some(message.into().into()),
            })),
        }
    }

    /// Invokes a function reference with the given SAM arguments.
    pub fn call_funcref(&mut self, fr: &FuncRefValue, args: &[Value]) -> Result<Value, RunError> {
        match self.invoker.as_deref_mut() {
            Some(invoker) => invoker.invoke_funcref(fr, args),
            None => Err(RunError::internal("function reference invoked outside the VM")),
        }
    }
}

/// Executes compiled units against a frozen registry.
pub struct Runner {
    registry: Arc<Registry>,
}

impl Runner {
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Runs `execute(params)` on the unit. `score` is consulted only when
    /// the unit carries the needs-score marker.
    pub fn execute(&self, exe: &Executable, params: Params, score: Option<f64>) -> Result<Value, RunError> {
        let mut tracer = NoopTracer;
        self.execute_traced(exe, params, score, &mut tracer)
    }

    /// Like [`execute`](Self::execute), reporting events to `tracer`.
    pub fn execute_traced(
        &self,
        exe: &Executable,
        params: Params,
        score: Option<f64>,
        tracer: &mut dyn ExecTracer,
    ) -> Result<Value, RunError> {
        let mut machine = Machine {
            registry: &self.registry,
            exe,
            tracer,
            score: if exe.needs_score { score.unwrap_or(0.0) } else { 0.0 },
            depth: 0,
        };
        machine.tracer.event(TraceEvent::EnterMain);
        let mut locals = vec![Value::Null; usize::from(exe.main.max_slots)];
        // The analyzer reserves slot 0 of the script body for `params`.
        if let Some(slot) = locals.first_mut() {
            *slot = Value::Map(std::rc::Rc::new(std::cell::RefCell::new(params)));
        }
        let result = machine.run_code(&exe.main, locals);
        if let Err(err) = &result {
            machine.tracer.error(err);
        }
        result
    }
}

const MAX_CALL_DEPTH: usize = 128;

struct Machine<'a> {
    registry: &'a Registry,
    exe: &'a Executable,
    tracer: &'a mut dyn ExecTracer,
    score: f64,
    depth: usize,
}

/// Pops `n` values preserving push order.
fn pop_args(stack: &mut Vec<Value>, n: usize) -> Result<SmallVec<[Value; 6]>, RunError> {
    if stack.len() < n {
        return Err(RunError::internal("operand stack underflow"));
    }
    let mut args: SmallVec<[Value; 6]> = SmallVec::with_capacity(n);
    args.extend(stack.drain(stack.len() - n..));
    Ok(args)
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, RunError> {
    stack.pop().ok_or_else(|| RunError::internal("operand stack underflow"))
}

fn pop_bool(stack: &mut Vec<Value>) -> Result<bool, RunError> {
    match pop(stack)? {
        Value::Bool(b) => Ok(b),
        other => Err(RunError::internal(format!(
            "expected a boolean on the stack, found {}",
            other.kind_name()
        ))),
    }
}

fn pop_int(stack: &mut Vec<Value>) -> Result<i32, RunError> {
    match pop(stack)? {
        Value::Int(i) => Ok(i),
        other => Err(RunError::internal(format!(
            "expected an int on the stack, found {}",
            other.kind_name()
        ))),
    }
}

fn read_u16(code: &Code, ip: usize) -> u16 {
    u16::from_le_bytes([code.bytecode[ip], code.bytecode[ip + 1]])
}

fn read_i16(code: &Code, ip: usize) -> i16 {
    i16::from_le_bytes([code.bytecode[ip], code.bytecode[ip + 1]])
}

impl<'a> Machine<'a> {
    #[expect(clippy::too_many_lines, reason = "single dispatch loop")]
    fn run_code(&mut self, code: &Code, mut locals: Vec<Value>) -> Result<Value, RunError> {
        let mut stack: Vec<Value> = Vec::with_capacity(usize::from(code.max_stack) + 4);
        let mut ip = 0usize;

        macro_rules! fallible {
            ($inst_start:expr, $result:expr) => {
                match $result {
                    Ok(value) => value,
                    Err(err) => {
                        match self.unwind(code, $inst_start, err, &mut stack) {
                            Ok(handler) => {
                                ip = handler;
                                continue;
                            }
                            Err(err) => return Err(err),
                        }
                    }
                }
            };
        }

        loop {
            let inst_start = ip;
            let byte = *code
                .bytecode
                .get(ip)
                .ok_or_else(|| RunError::internal("fell off the end of the bytecode"))?;
            let op = Opcode::try_from(byte).map_err(|b| RunError::internal(format!("unknown opcode {b}")))?;
            ip += 1;
            match op {
                Opcode::Nop => {}
                Opcode::LoadConst => {
                    let idx = read_u16(code, ip);
                    ip += 2;
                    let value = fallible!(inst_start, pool_value(code, idx));
                    stack.push(value);
                }
                Opcode::LoadNull => stack.push(Value::Null),
                Opcode::LoadTrue => stack.push(Value::Bool(true)),
                Opcode::LoadFalse => stack.push(Value::Bool(false)),
                Opcode::LoadSmallInt => {
                    let value = code.bytecode[ip].cast_signed();
                    ip += 1;
                    stack.push(Value::Int(i32::from(value)));
                }
                Opcode::LoadSlot => {
                    let slot = usize::from(read_u16(code, ip));
                    ip += 2;
                    stack.push(locals[slot].clone());
                }
                Opcode::StoreSlot => {
                    let slot = usize::from(read_u16(code, ip));
                    ip += 2;
                    locals[slot] = pop(&mut stack)?;
                }
                Opcode::Dup => {
                    let top = stack.last().cloned().ok_or_else(|| RunError::internal("dup on empty stack"))?;
                    stack.push(top);
                }
                Opcode::Dup2 => {
                    let len = stack.len();
                    if len < 2 {
                        return Err(RunError::internal("dup2 on short stack"));
                    }
                    let a = stack[len - 2].clone();
                    let b = stack[len - 1].clone();
                    stack.push(a);
                    stack.push(b);
                }
                Opcode::DupX1 => {
                    let top = pop(&mut stack)?;
                    let under = pop(&mut stack)?;
                    stack.push(top.clone());
                    stack.push(under);
                    stack.push(top);
                }
                Opcode::DupX2 => {
                    let top = pop(&mut stack)?;
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    stack.push(top.clone());
                    stack.push(a);
                    stack.push(b);
                    stack.push(top);
                }
                Opcode::Pop => {
                    pop(&mut stack)?;
                }
                Opcode::Coerce => {
                    let from = sort_from_byte(code.bytecode[ip]);
                    let to = sort_from_byte(code.bytecode[ip + 1]);
                    ip += 2;
                    let (Some(from), Some(to)) = (from, to) else {
                        return Err(RunError::internal("bad coercion sorts"));
                    };
                    let value = pop(&mut stack)?;
                    stack.push(coerce_value(&value, from, to)?);
                }
                Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Rem
                | Opcode::Shl
                | Opcode::Shr
                | Opcode::Ushr
                | Opcode::BitAnd
                | Opcode::BitOr
                | Opcode::BitXor => {
                    let sort =
                        sort_from_byte(code.bytecode[ip]).ok_or_else(|| RunError::internal("bad arithmetic sort"))?;
                    ip += 1;
                    fallible!(inst_start, self.typed_binary(op, sort, &mut stack));
                }
                Opcode::Neg => {
                    let sort = sort_from_byte(code.bytecode[ip]).ok_or_else(|| RunError::internal("bad neg sort"))?;
                    ip += 1;
                    let value = pop(&mut stack)?;
                    stack.push(match (sort, value) {
                        (Sort::Int, Value::Int(i)) => Value::Int(i.wrapping_neg()),
                        (Sort::Long, Value::Long(i)) => Value::Long(i.wrapping_neg()),
                        (Sort::Float, Value::Float(f)) => Value::Float(-f),
                        (Sort::Double, Value::Double(f)) => Value::Double(-f),
                        _ => return Err(RunError::internal("neg on mismatched operand")),
                    });
                }
                Opcode::BitNot => {
                    let sort = sort_from_byte(code.bytecode[ip]).ok_or_else(|| RunError::internal("bad sort"))?;
                    ip += 1;
                    let value = pop(&mut stack)?;
                    stack.push(match (sort, value) {
                        (Sort::Int, Value::Int(i)) => Value::Int(!i),
                        (Sort::Long, Value::Long(i)) => Value::Long(!i),
                        _ => return Err(RunError::internal("bitwise not on mismatched operand")),
                    });
                }
                Opcode::Cmp => {
                    let comp = comp_from_byte(code.bytecode[ip])?;
                    let sort = sort_from_byte(code.bytecode[ip + 1]).ok_or_else(|| RunError::internal("bad sort"))?;
                    ip += 2;
                    let right = pop(&mut stack)?;
                    let left = pop(&mut stack)?;
                    stack.push(Value::Bool(typed_compare(comp, sort, &left, &right)?));
                }
                Opcode::ToStr => {
                    ip += 1;
                    let value = pop(&mut stack)?;
                    stack.push(Value::str(value.display()));
                }
                Opcode::StrCat => {
                    let right = pop(&mut stack)?;
                    let left = pop(&mut stack)?;
                    let (Value::Str(l), Value::Str(r)) = (&left, &right) else {
                        return Err(RunError::internal("string concat on non-strings"));
                    };
                    let mut out = String::with_capacity(l.len() + r.len());
                    out.push_str(l);
                    out.push_str(r);
                    stack.push(Value::str(out));
                }
                Opcode::Jump => {
                    let off = read_i16(code, ip);
                    ip = offset_ip(ip, off);
                }
                Opcode::JumpIfTrue => {
                    let off = read_i16(code, ip);
                    let taken = pop_bool(&mut stack)?;
                    ip = if taken { offset_ip(ip, off) } else { ip + 2 };
                }
                Opcode::JumpIfFalse => {
                    let off = read_i16(code, ip);
                    let taken = !pop_bool(&mut stack)?;
                    ip = if taken { offset_ip(ip, off) } else { ip + 2 };
                }
                Opcode::InvokeVirtual | Opcode::InvokeStatic | Opcode::NewInstance => {
                    let idx = usize::from(read_u16(code, ip));
                    ip += 2;
                    fallible!(inst_start, self.invoke_ref(code, idx, op, &mut stack));
                }
                Opcode::GetField | Opcode::GetStatic | Opcode::PutField => {
                    let idx = usize::from(read_u16(code, ip));
                    ip += 2;
                    fallible!(inst_start, self.field_ref(code, idx, op, &mut stack));
                }
                Opcode::InvokeDynamic => {
                    let idx = usize::from(read_u16(code, ip));
                    ip += 2;
                    fallible!(inst_start, self.invoke_dynamic(code, idx, &mut stack));
                }
                Opcode::BuildFuncRef => {
                    let idx = usize::from(read_u16(code, ip));
                    let captures = usize::from(code.bytecode[ip + 2]);
                    ip += 3;
                    let data = code
                        .funcref_refs
                        .get(idx)
                        .ok_or_else(|| RunError::internal("bad funcref index"))?;
                    let captured = pop_args(&mut stack, captures)?;
                    stack.push(Value::FuncRef(std::rc::Rc::new(FuncRefValue {
                        iface: data.iface,
                        target: target_from_spec(&data.target),
                        captures: captured.into_vec(),
                    })));
                }
                Opcode::CallLocal => {
                    let id = usize::from(read_u16(code, ip));
                    let argc = usize::from(code.bytecode[ip + 2]);
                    ip += 3;
                    let args = pop_args(&mut stack, argc)?;
                    let (result, returns_void) = {
                        let r = fallible!(inst_start, self.call_script_function(id, &args));
                        r
                    };
                    if !returns_void {
                        stack.push(result);
                    }
                }
                Opcode::BuildList => {
                    let count = usize::from(read_u16(code, ip));
                    ip += 2;
                    let items = pop_args(&mut stack, count)?;
                    stack.push(Value::list(items.into_vec()));
                }
                Opcode::BuildMap => {
                    let pairs = usize::from(read_u16(code, ip));
                    ip += 2;
                    let flat = pop_args(&mut stack, pairs * 2)?;
                    let mut entries = AHashMap::with_capacity(pairs);
                    let mut iter = flat.into_iter();
                    let result: Result<(), RunError> = loop {
                        let Some(key) = iter.next() else { break Ok(()) };
                        let value = iter.next().expect("pairs are even");
                        let Some(key) = MapKey::from_value(&key) else {
                            break Err(self.detached_ctx().throw(
                                "IllegalArgumentException",
                                format!("{} is not hashable", key.kind_name()),
                            ));
                        };
                        entries.insert(key, value);
                    };
                    fallible!(inst_start, result);
                    stack.push(Value::map(entries));
                }
                Opcode::NewArray => {
                    let elem = sort_from_byte(code.bytecode[ip]).ok_or_else(|| RunError::internal("bad sort"))?;
                    let dims = usize::from(code.bytecode[ip + 1]);
                    ip += 2;
                    let mut sizes = Vec::with_capacity(dims);
                    for _ in 0..dims {
                        sizes.push(pop_int(&mut stack)?);
                    }
                    sizes.reverse();
                    let array = fallible!(inst_start, self.build_array(elem, &sizes));
                    stack.push(array);
                }
                Opcode::ArrayLoad => {
                    let index = pop_int(&mut stack)?;
                    let array = pop(&mut stack)?;
                    let cell = fallible!(inst_start, self.array_cell(&array, index));
                    stack.push(cell);
                }
                Opcode::ArrayStore => {
                    let value = pop(&mut stack)?;
                    let index = pop_int(&mut stack)?;
                    let array = pop(&mut stack)?;
                    fallible!(inst_start, self.array_store(&array, index, value));
                }
                Opcode::ArrayLength => {
                    let array = pop(&mut stack)?;
                    let Value::Array(arr) = array else {
                        return Err(RunError::internal("array length on non-array"));
                    };
                    stack.push(Value::Int(i32::try_from(arr.cells.borrow().len()).unwrap_or(i32::MAX)));
                }
                Opcode::InstanceOf => {
                    let idx = usize::from(read_u16(code, ip));
                    ip += 2;
                    let target = *code
                        .struct_refs
                        .get(idx)
                        .ok_or_else(|| RunError::internal("bad struct index"))?;
                    let value = pop(&mut stack)?;
                    let matched = self
                        .registry
                        .struct_for_value(&value)
                        .is_some_and(|actual| self.registry.is_subtype(actual, target));
                    stack.push(Value::Bool(matched && !matches!(value, Value::Null)));
                }
                Opcode::LoopTick => {
                    let slot = usize::from(read_u16(code, ip));
                    let cost = i32::from(read_u16(code, ip + 2));
                    ip += 4;
                    let Value::Int(budget) = &mut locals[slot] else {
                        return Err(RunError::internal("loop budget slot corrupted"));
                    };
                    *budget -= cost;
                    if *budget <= 0 {
                        return Err(RunError::LoopBudget);
                    }
                }
                Opcode::LoadScore => stack.push(Value::Double(self.score)),
                Opcode::Throw => {
                    let value = pop(&mut stack)?;
                    let err = match value {
                        Value::Exception(_) => RunError::Exception { value },
                        Value::Null => self
                            .detached_ctx()
                            .throw("IllegalArgumentException", "Cannot throw a null value"),
                        _ => RunError::internal("throw on a non-exception value"),
                    };
                    fallible!(inst_start, Err::<(), _>(err));
                }
                Opcode::Return => return pop(&mut stack),
            }
        }
    }

    fn detached_ctx(&self) -> NativeCtx<'a> {
        NativeCtx::detached(self.registry)
    }

    /// Searches the exception table for a live handler; on a match the stack
    /// is truncated, the exception value pushed, and the handler offset
    /// returned.
    fn unwind(&mut self, code: &Code, offset: usize, err: RunError, stack: &mut Vec<Value>) -> Result<usize, RunError> {
        let RunError::Exception { value } = err else {
            return Err(err);
        };
        let Value::Exception(exc) = &value else {
            return Err(RunError::Exception { value });
        };
        let offset = u32::try_from(offset).map_err(|_| RunError::internal("offset exceeds u32"))?;
        for entry in &code.exception_table {
            if entry.start <= offset && offset < entry.end && self.registry.is_subtype(exc.struct_id, entry.exc) {
                stack.truncate(usize::from(entry.stack_depth));
                stack.push(value);
                return Ok(entry.handler as usize);
            }
        }
        self.tracer.event(TraceEvent::Unwind {
            message: exc.message.as_deref().unwrap_or("").into(),
        });
        Err(RunError::Exception { value })
    }

    fn typed_binary(&mut self, op: Opcode, sort: Sort, stack: &mut Vec<Value>) -> Result<(), RunError> {
        let bin = match op {
            Opcode::Add => BinOp::Add,
            Opcode::Sub => BinOp::Sub,
            Opcode::Mul => BinOp::Mul,
            Opcode::Div => BinOp::Div,
            Opcode::Rem => BinOp::Rem,
            Opcode::Shl => BinOp::Shl,
            Opcode::Shr => BinOp::Shr,
            Opcode::Ushr => BinOp::Ushr,
            Opcode::BitAnd => BinOp::BitAnd,
            Opcode::BitOr => BinOp::BitOr,
            Opcode::BitXor => BinOp::BitXor,
            _ => return Err(RunError::internal("not a binary opcode")),
        };
        if sort == Sort::Def {
            let right = pop(stack)?;
            let left = pop(stack)?;
            let ctx = self.detached_ctx();
            stack.push(dynamic::binary(&ctx, bin, &left, &right)?);
            return Ok(());
        }
        if matches!(bin, BinOp::Shl | BinOp::Shr | BinOp::Ushr) {
            let count = i64::from(pop_int(stack)?);
            let value = pop(stack)?;
            let out = match (sort, value) {
                (Sort::Int, Value::Int(i)) => Value::Int(dynamic::shift_int(bin, i, count)),
                (Sort::Long, Value::Long(i)) => Value::Long(dynamic::shift_long(bin, i, count)),
                _ => return Err(RunError::internal("shift on mismatched operand")),
            };
            stack.push(out);
            return Ok(());
        }
        let right = pop(stack)?;
        let left = pop(stack)?;
        let ctx = self.detached_ctx();
        let out = match (sort, &left, &right) {
            (Sort::Bool, Value::Bool(l), Value::Bool(r)) => match bin {
                BinOp::BitAnd => Value::Bool(l & r),
                BinOp::BitOr => Value::Bool(l | r),
                BinOp::BitXor => Value::Bool(l ^ r),
                _ => return Err(RunError::internal("boolean arithmetic on non-bitwise op")),
            },
            (Sort::Int | Sort::Long | Sort::Float | Sort::Double, _, _) => dynamic::binary(&ctx, bin, &left, &right)?,
            _ => return Err(RunError::internal("typed arithmetic on mismatched operands")),
        };
        // The typed result keeps the instruction's sort.
        let out = match (sort, out) {
            (Sort::Int, Value::Int(i)) => Value::Int(i),
            (Sort::Long, v) => coerce_value(&v, sort, Sort::Long)?,
            (Sort::Float, v @ (Value::Float(_) | Value::Double(_))) => coerce_value(&v, sort, Sort::Float)?,
            (Sort::Double, v) => coerce_value(&v, sort, Sort::Double)?,
            (_, v) => v,
        };
        stack.push(out);
        Ok(())
    }

    fn invoke_ref(&mut self, code: &Code, idx: usize, op: Opcode, stack: &mut Vec<Value>) -> Result<(), RunError> {
        let reference = code
            .method_refs
            .get(idx)
            .ok_or_else(|| RunError::internal("bad method index"))?;
        let method = if op == Opcode::NewInstance {
            self.registry.lookup_ctor(reference.owner, reference.key.arity)
        } else if reference.is_static {
            self.registry.lookup_static(reference.owner, &reference.key)
        } else {
            self.registry.lookup_method(reference.owner, &reference.key)
        };
        let Some(method) = method else {
            return Err(RunError::internal(format!(
                "method [{}] vanished from the registry",
                reference.key
            )));
        };
        let native = method
            .native
            .ok_or_else(|| RunError::internal("abstract method invoked statically"))?;
        let receiver = usize::from(op == Opcode::InvokeVirtual);
        let args = pop_args(stack, usize::from(reference.key.arity) + receiver)?;
        if receiver == 1 && matches!(args[0], Value::Null) {
            let ctx = self.detached_ctx();
            return Err(ctx.throw(
                "IllegalArgumentException",
                format!("Cannot invoke [{}] on a null value", reference.key),
            ));
        }
        let owner = method.owner;
        let returns_void = reference.returns_void;
        let registry = self.registry;
        let mut ctx = NativeCtx::attached(registry, self);
        ctx.owner = owner;
        let result = native(&mut ctx, &args)?;
        if !returns_void {
            stack.push(result);
        }
        Ok(())
    }

    fn field_ref(&mut self, code: &Code, idx: usize, op: Opcode, stack: &mut Vec<Value>) -> Result<(), RunError> {
        let reference = code
            .field_refs
            .get(idx)
            .ok_or_else(|| RunError::internal("bad field index"))?;
        let field = if reference.is_static {
            self.registry.lookup_static_field(reference.owner, &reference.name)
        } else {
            self.registry.lookup_field(reference.owner, &reference.name)
        };
        let Some(field) = field else {
            return Err(RunError::internal(format!(
                "field [{}] vanished from the registry",
                reference.name
            )));
        };
        let owner = field.owner;
        let getter = field.getter;
        let setter = field.setter;
        let registry = self.registry;
        match op {
            Opcode::GetStatic => {
                let mut ctx = NativeCtx::attached(registry, self);
                ctx.owner = owner;
                let value = getter(&mut ctx, &[])?;
                stack.push(value);
            }
            Opcode::GetField => {
                let receiver = pop(stack)?;
                let mut ctx = NativeCtx::attached(registry, self);
                ctx.owner = owner;
                let value = getter(&mut ctx, std::slice::from_ref(&receiver))?;
                stack.push(value);
            }
            Opcode::PutField => {
                let value = pop(stack)?;
                let receiver = pop(stack)?;
                let setter = setter.ok_or_else(|| RunError::internal("store through a read-only field"))?;
                let mut ctx = NativeCtx::attached(registry, self);
                ctx.owner = owner;
                setter(&mut ctx, &[receiver, value])?;
            }
            _ => return Err(RunError::internal("not a field opcode")),
        }
        Ok(())
    }

    fn invoke_dynamic(&mut self, code: &Code, idx: usize, stack: &mut Vec<Value>) -> Result<(), RunError> {
        let call = code
            .dyn_refs
            .get(idx)
            .ok_or_else(|| RunError::internal("bad dynamic call index"))?
            .clone();
        let registry = self.registry;
        match call.op {
            DynOp::MethodCall => {
                let args = pop_args(stack, usize::from(call.argc))?;
                let receiver = pop(stack)?;
                self.tracer.event(TraceEvent::DynamicDispatch {
                    name: call.name.clone(),
                    receiver: receiver.kind_name().into(),
                });
                let mut ctx = NativeCtx::attached(registry, self);
                let result = dynamic::method_call(&mut ctx, &receiver, &call.name, &args)?;
                stack.push(result);
            }
            DynOp::FieldLoad => {
                let receiver = pop(stack)?;
                let mut ctx = NativeCtx::attached(registry, self);
                let result = dynamic::field_load(&mut ctx, &receiver, &call.name)?;
                stack.push(result);
            }
            DynOp::FieldStore => {
                let value = pop(stack)?;
                let receiver = pop(stack)?;
                let mut ctx = NativeCtx::attached(registry, self);
                dynamic::field_store(&mut ctx, &receiver, &call.name, &value)?;
            }
            DynOp::IndexLoad => {
                let index = pop(stack)?;
                let receiver = pop(stack)?;
                let mut ctx = NativeCtx::attached(registry, self);
                let result = dynamic::index_load(&mut ctx, &receiver, &index)?;
                stack.push(result);
            }
            DynOp::IndexStore => {
                let value = pop(stack)?;
                let index = pop(stack)?;
                let receiver = pop(stack)?;
                let mut ctx = NativeCtx::attached(registry, self);
                dynamic::index_store(&mut ctx, &receiver, &index, &value)?;
            }
            DynOp::Iterate => {
                let value = pop(stack)?;
                let ctx = self.detached_ctx();
                stack.push(dynamic::iterate(&ctx, &value)?);
            }
            DynOp::Binary(bin) => {
                let right = pop(stack)?;
                let left = pop(stack)?;
                let ctx = self.detached_ctx();
                stack.push(dynamic::binary(&ctx, bin, &left, &right)?);
            }
            DynOp::Neg => {
                let value = pop(stack)?;
                let ctx = self.detached_ctx();
                stack.push(dynamic::neg(&ctx, &value)?);
            }
            DynOp::BitNot => {
                let value = pop(stack)?;
                let ctx = self.detached_ctx();
                stack.push(dynamic::bit_not(&ctx, &value)?);
            }
            DynOp::Compare(comp) => {
                let right = pop(stack)?;
                let left = pop(stack)?;
                let ctx = self.detached_ctx();
                stack.push(dynamic::compare(&ctx, comp, &left, &right)?);
            }
        }
        Ok(())
    }

    fn call_script_function(&mut self, id: usize, args: &[Value]) -> Result<(Value, bool), RunError> {
        let exe = self.exe;
        let func = exe
            .functions
            .get(id)
            .ok_or_else(|| RunError::internal("bad function id"))?;
        if self.depth >= MAX_CALL_DEPTH {
            return Err(RunError::StackOverflow);
        }
        self.tracer.event(TraceEvent::EnterFunction {
            name: func.name.clone(),
        });
        let mut locals = vec![Value::Null; usize::from(func.code.max_slots)];
        for (arg, &slot) in args.iter().zip(&func.param_slots) {
            locals[usize::from(slot)] = arg.clone();
        }
        self.depth += 1;
        let result = self.run_code(&func.code, locals);
        self.depth -= 1;
        Ok((result?, func.returns_void))
    }

    fn build_array(&self, elem: Sort, sizes: &[i32]) -> Result<Value, RunError> {
        let (&size, rest) = sizes.split_first().ok_or_else(|| RunError::internal("array without dims"))?;
        let len = usize::try_from(size).map_err(|_| {
            self.detached_ctx()
                .throw("IllegalArgumentException", format!("Invalid array size [{size}]"))
        })?;
        let cells = if rest.is_empty() {
            vec![natives::default_cell(elem); len]
        } else {
            let mut cells = Vec::with_capacity(len);
            for _ in 0..len {
                cells.push(self.build_array(elem, rest)?);
            }
            cells
        };
        let cell_sort = if rest.is_empty() { elem } else { Sort::Array };
        Ok(Value::Array(std::rc::Rc::new(ArrayValue {
            elem: cell_sort,
            cells: std::cell::RefCell::new(cells),
        })))
    }

    fn array_cell(&self, array: &Value, index: i32) -> Result<Value, RunError> {
        let Value::Array(arr) = array else {
            return Err(RunError::internal("array load on non-array"));
        };
        let cells = arr.cells.borrow();
        usize::try_from(index)
            .ok()
            .filter(|&at| at < cells.len())
            .map(|at| cells[at].clone())
            .ok_or_else(|| {
                self.detached_ctx().throw(
                    "IndexOutOfBoundsException",
                    format!("Index {index} out of bounds for length {}", cells.len()),
                )
            })
    }

    fn array_store(&self, array: &Value, index: i32, value: Value) -> Result<(), RunError> {
        let Value::Array(arr) = array else {
            return Err(RunError::internal("array store on non-array"));
        };
        let mut cells = arr.cells.borrow_mut();
        let len = cells.len();
        match usize::try_from(index).ok().filter(|&at| at < len) {
            Some(at) => {
                cells[at] = value;
                Ok(())
            }
            None => Err(self.detached_ctx().throw(
                "IndexOutOfBoundsException",
                format!("Index {index} out of bounds for length {len}"),
            )),
        }
    }
}

impl FuncRefInvoker for Machine<'_> {
    fn invoke_funcref(&mut self, fr: &FuncRefValue, args: &[Value]) -> Result<Value, RunError> {
        let mut full: SmallVec<[Value; 6]> = SmallVec::with_capacity(fr.captures.len() + args.len());
        full.extend(fr.captures.iter().cloned());
        full.extend(args.iter().cloned());
        let registry = self.registry;
        match &fr.target {
            FuncTarget::Script { id } => {
                let (result, _) = self.call_script_function(usize::from(*id), &full)?;
                Ok(result)
            }
            FuncTarget::NativeStatic { struct_id, key } => {
                let method = registry
                    .lookup_static(*struct_id, key)
                    .ok_or_else(|| RunError::internal("funcref static target vanished"))?;
                let native = method.native.ok_or_else(|| RunError::internal("abstract funcref target"))?;
                let owner = method.owner;
                let mut ctx = NativeCtx::attached(registry, self);
                ctx.owner = owner;
                native(&mut ctx, &full)
            }
            FuncTarget::NativeVirtual { struct_id, key } => {
                let method = registry
                    .lookup_method(*struct_id, key)
                    .ok_or_else(|| RunError::internal("funcref virtual target vanished"))?;
                let native = method.native.ok_or_else(|| RunError::internal("abstract funcref target"))?;
                let owner = method.owner;
                let mut ctx = NativeCtx::attached(registry, self);
                ctx.owner = owner;
                native(&mut ctx, &full)
            }
            FuncTarget::Ctor { struct_id, arity } => {
                let method = registry
                    .lookup_ctor(*struct_id, *arity)
                    .ok_or_else(|| RunError::internal("funcref constructor target vanished"))?;
                let native = method.native.ok_or_else(|| RunError::internal("abstract funcref target"))?;
                let owner = method.owner;
                let mut ctx = NativeCtx::attached(registry, self);
                ctx.owner = owner;
                native(&mut ctx, &full)
            }
        }
    }
}

fn target_from_spec(spec: &FuncTargetSpec) -> FuncTarget {
    match spec {
        FuncTargetSpec::Script { id } => FuncTarget::Script { id: *id },
        FuncTargetSpec::NativeStatic { owner, key } => FuncTarget::NativeStatic {
            struct_id: *owner,
            key: key.clone(),
        },
        FuncTargetSpec::NativeVirtual { owner, key } => FuncTarget::NativeVirtual {
            struct_id: *owner,
            key: key.clone(),
        },
        FuncTargetSpec::Ctor { owner, arity } => FuncTarget::Ctor {
            struct_id: *owner,
            arity: *arity,
        },
    }
}

fn offset_ip(ip: usize, off: i16) -> usize {
    let target = i64::try_from(ip + 2).expect("ip fits i64") + i64::from(off);
    usize::try_from(target).expect("jump target in range")
}

fn comp_from_byte(byte: u8) -> Result<CompOp, RunError> {
    Ok(match byte {
        0 => CompOp::Eq,
        1 => CompOp::Ne,
        2 => CompOp::Lt,
        3 => CompOp::Le,
        4 => CompOp::Gt,
        5 => CompOp::Ge,
        other => return Err(RunError::internal(format!("unknown comparison tag {other}"))),
    })
}

pub(crate) fn comp_to_byte(op: CompOp) -> u8 {
    match op {
        CompOp::Eq => 0,
        CompOp::Ne => 1,
        CompOp::Lt => 2,
        CompOp::Le => 3,
        CompOp::Gt => 4,
        CompOp::Ge => 5,
    }
}

fn typed_compare(op: CompOp, sort: Sort, left: &Value, right: &Value) -> Result<bool, RunError> {
    let outcome = match sort {
        Sort::Bool => {
            let (Value::Bool(l), Value::Bool(r)) = (left, right) else {
                return Err(RunError::internal("bool comparison on mismatched operands"));
            };
            match op {
                CompOp::Eq => l == r,
                CompOp::Ne => l != r,
                _ => return Err(RunError::internal("ordering comparison on booleans")),
            }
        }
        Sort::Object | Sort::Array => {
            let eq = value_eq(left, right);
            match op {
                CompOp::Eq => eq,
                CompOp::Ne => !eq,
                _ => return Err(RunError::internal("ordering comparison on references")),
            }
        }
        Sort::Int => numeric_ordering(op, f64::from(int_of(left)?), f64::from(int_of(right)?)),
        Sort::Long => {
            let (Value::Long(l), Value::Long(r)) = (left, right) else {
                return Err(RunError::internal("long comparison on mismatched operands"));
            };
            match op {
                CompOp::Eq => l == r,
                CompOp::Ne => l != r,
                CompOp::Lt => l < r,
                CompOp::Le => l <= r,
                CompOp::Gt => l > r,
                CompOp::Ge => l >= r,
            }
        }
        Sort::Float | Sort::Double => {
            let l = float_of(left)?;
            let r = float_of(right)?;
            numeric_ordering(op, l, r)
        }
        _ => return Err(RunError::internal("comparison on unsupported sort")),
    };
    Ok(outcome)
}

fn int_of(value: &Value) -> Result<i32, RunError> {
    match value {
        Value::Int(i) => Ok(*i),
        _ => Err(RunError::internal("expected an int operand")),
    }
}

fn float_of(value: &Value) -> Result<f64, RunError> {
    match value {
        Value::Float(f) => Ok(f64::from(*f)),
        Value::Double(f) => Ok(*f),
        _ => Err(RunError::internal("expected a floating operand")),
    }
}

fn numeric_ordering(op: CompOp, l: f64, r: f64) -> bool {
    match op {
        CompOp::Eq => l == r,
        CompOp::Ne => l != r,
        CompOp::Lt => l < r,
        CompOp::Le => l <= r,
        CompOp::Gt => l > r,
        CompOp::Ge => l >= r,
    }
}

fn pool_value(code: &Code, idx: u16) -> Result<Value, RunError> {
    let entry = code
        .pool
        .get(usize::from(idx))
        .ok_or_else(|| RunError::internal("bad constant index"))?;
    Ok(match entry {
        PoolConst::Null => Value::Null,
        PoolConst::Bool(b) => Value::Bool(*b),
        PoolConst::Int(i) => Value::Int(*i),
        PoolConst::Long(i) => Value::Long(*i),
        PoolConst::Float(f) => Value::Float(*f),
        PoolConst::Double(f) => Value::Double(*f),
        PoolConst::Char(c) => Value::Char(*c),
        PoolConst::Str(s) => Value::str(s.to_string()),
        PoolConst::Pattern { pattern, flags } => {
            let source = if flags.is_empty() {
                pattern.to_string()
            } else {
                format!("(?{flags}){pattern}")
            };
            let regex = regex::Regex::new(&source)
                .map_err(|e| RunError::internal(format!("constant pattern failed to compile: {e}")))?;
            Value::Pattern(std::rc::Rc::new(PatternValue {
                regex,
                source: pattern.clone(),
            }))
        }
    })
}

/// Direct numeric coercion between primitive sorts, with the target VM's
/// semantics: wrapping into sub-int widths, saturating float-to-int.
/// Sub-int narrowing from a floating source first saturates into the int
/// range, then truncates.
pub(crate) fn coerce_value(value: &Value, _from: Sort, to: Sort) -> Result<Value, RunError> {
    let long: i64 = match value {
        Value::Int(i) => i64::from(*i),
        Value::Long(i) => *i,
        Value::Float(f) => *f as i64,
        Value::Double(f) => *f as i64,
        Value::Char(c) => i64::from(*c as u32),
        other => {
            return Err(RunError::internal(format!(
                "numeric coercion on {}",
                other.kind_name()
            )));
        }
    };
    let wide: f64 = match value {
        Value::Int(i) => f64::from(*i),
        Value::Long(i) => *i as f64,
        Value::Float(f) => f64::from(*f),
        Value::Double(f) => *f,
        Value::Char(c) => f64::from(*c as u32),
        _ => unreachable!("checked above"),
    };
    let int: i32 = match value {
        Value::Float(f) => *f as i32,
        Value::Double(f) => *f as i32,
        _ => long as i32,
    };
    Ok(match to {
        Sort::Byte => Value::Int(i32::from(int as i8)),
        Sort::Short => Value::Int(i32::from(int as i16)),
        Sort::Char => Value::Char(char::from_u32((int as u32) & 0xFFFF).unwrap_or('\u{fffd}')),
        Sort::Int => Value::Int(int),
        Sort::Long => Value::Long(long),
        Sort::Float => Value::Float(wide as f32),
        Sort::Double => Value::Double(wide),
        _ => return Err(RunError::internal("coercion to a non-numeric sort")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_value_matches_const_semantics() {
        let v = coerce_value(&Value::Int(300), Sort::Int, Sort::Byte).unwrap();
        assert!(matches!(v, Value::Int(44)));
        let v = coerce_value(&Value::Double(1e20), Sort::Double, Sort::Int).unwrap();
        assert!(matches!(v, Value::Int(i32::MAX)));
        let v = coerce_value(&Value::Long(-1), Sort::Long, Sort::Int).unwrap();
        assert!(matches!(v, Value::Int(-1)));
    }

    #[test]
    fn test_coerce_value_narrows_floats_through_int_range() {
        let v = coerce_value(&Value::Double(1e10), Sort::Double, Sort::Byte).unwrap();
        assert!(matches!(v, Value::Int(-1)));
        let v = coerce_value(&Value::Double(-1e10), Sort::Double, Sort::Short).unwrap();
        assert!(matches!(v, Value::Int(0)));
        let v = coerce_value(&Value::Float(1e10), Sort::Float, Sort::Char).unwrap();
        assert!(matches!(v, Value::Char('\u{ffff}')));
    }

    #[test]
    fn test_param_map_builds_string_keys() {
        let params = param_map([("a", Value::Int(1)), ("b", Value::Null)]);
        assert_eq!(params.len(), 2);
        assert!(params.contains_key(&MapKey::Str("a".into())));
    }

    #[test]
    fn test_comp_byte_round_trip() {
        for op in [CompOp::Eq, CompOp::Ne, CompOp::Lt, CompOp::Le, CompOp::Gt, CompOp::Ge] {
            assert_eq!(comp_from_byte(comp_to_byte(op)).unwrap(), op);
        }
    }
}
