//! Code emission: the second tree walk.
//!
//! Emission is a pure read of the decorated tree. Statements mark source
//! lines, conditionals and loops thread labels through the short-circuit
//! rules, assignments run the dup/store pathway, and every def operation
//! becomes a dynamic call site. Nothing here raises a script-level error:
//! an impossible tree is an internal "Illegal tree structure" fault.

use crate::{
    ast::{BinOp, BoolOp, UnaryOp},
    bytecode::{Code, CodeBuilder, ExceptionEntry, Executable, FieldRef, FunctionCode, Label, MethodRef, Opcode, PoolConst},
    compile::Settings,
    error::CompileError,
    registry::Sort,
    typed::{
        CastKind, CastOp, Compound, Const, DynCall, DynOp, MethodSpec, TBlock, TExpr, TExprKind, TForInit, TFunction,
        TLink, TMain, TScript, TStmt, TStmtKind,
    },
    vm::comp_to_byte,
};

/// Emits a fully analyzed script into a loadable executable.
pub fn emit(script: &TScript, settings: &Settings, script_name: &str) -> Result<Executable, CompileError> {
    let main = emit_main(&script.main, settings)?;
    let mut functions = Vec::with_capacity(script.functions.len());
    for function in &script.functions {
        functions.push(emit_function(function, settings)?);
    }
    Ok(Executable {
        class_name: class_name(script_name),
        needs_score: script.uses_score,
        main,
        functions,
    })
}

/// Class names derive from the script name, squashed to identifier shape.
fn class_name(script_name: &str) -> Box<str> {
    let mut name = String::from("Script$");
    for c in script_name.chars() {
        name.push(if c.is_ascii_alphanumeric() { c } else { '_' });
    }
    name.into()
}

fn emit_main(main: &TMain, settings: &Settings) -> Result<Code, CompileError> {
    let mut emitter = Emitter::new(settings, main.loop_slot);

    // One-time prelude: loop budget, score slot, ctx/doc extraction.
    if let Some(slot) = main.loop_slot {
        emitter.emit_loop_budget(slot);
    }
    if let Some(slot) = main.score_slot {
        emitter.b.emit(Opcode::LoadScore, 1);
        emitter.b.emit_store_slot(slot);
    }
    if let Some(slot) = main.ctx_slot {
        emitter.emit_param_extract(main.params_slot, "ctx", slot);
    }
    if let Some(slot) = main.doc_slot {
        emitter.emit_param_extract(main.params_slot, "doc", slot);
    }

    emitter.block(&main.body)?;
    if !main.body.all_escape {
        emitter.b.emit(Opcode::LoadNull, 1);
        emitter.b.emit(Opcode::Return, -1);
    }
    emitter.b.build(main.max_slots)
}

fn emit_function(function: &TFunction, settings: &Settings) -> Result<FunctionCode, CompileError> {
    let mut emitter = Emitter::new(settings, function.loop_slot);
    if let Some(slot) = function.loop_slot {
        emitter.emit_loop_budget(slot);
    }
    emitter.block(&function.body)?;
    if !function.body.all_escape {
        emitter.b.emit(Opcode::LoadNull, 1);
        emitter.b.emit(Opcode::Return, -1);
    }
    let code = emitter.b.build(function.max_slots)?;
    Ok(FunctionCode {
        name: function.name.clone(),
        arity: function.arity,
        param_slots: function.param_slots.clone(),
        returns_void: function.returns_void,
        code,
    })
}

struct LoopLabels {
    continue_to: Label,
    break_to: Label,
}

struct Emitter<'a> {
    b: CodeBuilder,
    settings: &'a Settings,
    loop_slot: Option<u16>,
    loops: Vec<LoopLabels>,
}

impl<'a> Emitter<'a> {
    fn new(settings: &'a Settings, loop_slot: Option<u16>) -> Self {
        Self {
            b: CodeBuilder::new(settings.debug_info),
            settings,
            loop_slot,
            loops: Vec::new(),
        }
    }

    fn emit_loop_budget(&mut self, slot: u16) {
        let budget = i32::try_from(self.settings.max_loop_counter).unwrap_or(i32::MAX);
        self.b.emit_load_const(PoolConst::Int(budget));
        self.b.emit_store_slot(slot);
    }

    /// `slot = params.get("name")` through the dynamic dispatcher, so the
    /// prelude does not depend on any particular whitelist shape.
    fn emit_param_extract(&mut self, params_slot: u16, name: &str, slot: u16) {
        self.b.emit_load_slot(params_slot);
        self.b.emit_load_const(PoolConst::Str(name.into()));
        self.b.emit_invoke_dynamic(
            DynCall {
                name: "get".into(),
                op: DynOp::MethodCall,
                argc: 1,
                sig: vec![Sort::Object],
            },
            2,
            true,
        );
        self.b.emit_store_slot(slot);
    }

    /// Cost of one pass through a loop body.
    fn tick(&mut self, body: &TBlock) {
        if let Some(slot) = self.loop_slot {
            self.b.emit_loop_tick(slot, body.statement_count.max(1));
        }
    }

    fn block(&mut self, block: &TBlock) -> Result<(), CompileError> {
        for stmt in &block.stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    #[expect(clippy::too_many_lines, reason = "one arm per statement variant")]
    fn stmt(&mut self, stmt: &TStmt) -> Result<(), CompileError> {
        self.b.set_location(stmt.loc);
        match &stmt.kind {
            TStmtKind::Expr(expr) => {
                self.expr(expr)?;
                if leaves_value(expr) {
                    self.b.emit(Opcode::Pop, -1);
                }
            }
            TStmtKind::Return(value) => {
                match value {
                    Some(value) => self.expr(value)?,
                    None => self.b.emit(Opcode::LoadNull, 1),
                }
                self.b.emit(Opcode::Return, -1);
            }
            TStmtKind::Throw(value) => {
                self.expr(value)?;
                self.b.emit(Opcode::Throw, -1);
            }
            TStmtKind::Decl { decls } => {
                for decl in decls {
                    self.b.set_location(decl.loc);
                    match &decl.init {
                        Some(init) => self.expr(init)?,
                        None => self.default_value(decl.ty.sort()),
                    }
                    self.b.emit_store_slot(decl.slot);
                }
            }
            TStmtKind::If { cond, then, orelse } => {
                let fals = self.b.new_label();
                self.cond(cond, None, Some(fals))?;
                self.block(then)?;
                match orelse {
                    Some(orelse) => {
                        let end = self.b.new_label();
                        if !then.all_escape {
                            self.b.jump(Opcode::Jump, end);
                        }
                        self.b.mark(fals);
                        self.block(orelse)?;
                        self.b.mark(end);
                    }
                    None => self.b.mark(fals),
                }
            }
            TStmtKind::While { cond, body, continuous } => {
                let begin = self.b.new_label();
                let end = self.b.new_label();
                self.loops.push(LoopLabels {
                    continue_to: begin,
                    break_to: end,
                });
                self.b.mark(begin);
                if !continuous {
                    self.cond(cond, None, Some(end))?;
                }
                self.tick(body);
                self.block(body)?;
                if !body.all_escape {
                    self.b.jump(Opcode::Jump, begin);
                }
                self.b.mark(end);
                self.b.set_stack_depth(0);
                self.loops.pop();
            }
            TStmtKind::Do { body, cond } => {
                let begin = self.b.new_label();
                let check = self.b.new_label();
                let end = self.b.new_label();
                self.loops.push(LoopLabels {
                    continue_to: check,
                    break_to: end,
                });
                self.b.mark(begin);
                self.tick(body);
                self.block(body)?;
                self.b.mark(check);
                self.cond(cond, Some(begin), None)?;
                self.b.mark(end);
                self.b.set_stack_depth(0);
                self.loops.pop();
            }
            TStmtKind::For { init, cond, after, body } => {
                match init {
                    Some(TForInit::Decl(decls)) => {
                        for decl in decls {
                            match &decl.init {
                                Some(init) => self.expr(init)?,
                                None => self.default_value(decl.ty.sort()),
                            }
                            self.b.emit_store_slot(decl.slot);
                        }
                    }
                    Some(TForInit::Expr(expr)) => {
                        self.expr(expr)?;
                        if leaves_value(expr) {
                            self.b.emit(Opcode::Pop, -1);
                        }
                    }
                    None => {}
                }
                let start = self.b.new_label();
                let step = self.b.new_label();
                let end = self.b.new_label();
                self.loops.push(LoopLabels {
                    continue_to: step,
                    break_to: end,
                });
                self.b.mark(start);
                if let Some(cond) = cond {
                    self.cond(cond, None, Some(end))?;
                }
                self.tick(body);
                self.block(body)?;
                self.b.mark(step);
                if let Some(after) = after {
                    self.expr(after)?;
                    if leaves_value(after) {
                        self.b.emit(Opcode::Pop, -1);
                    }
                }
                self.b.jump(Opcode::Jump, start);
                self.b.mark(end);
                self.b.set_stack_depth(0);
                self.loops.pop();
            }
            TStmtKind::EachArray {
                var_slot,
                var_cast,
                array_slot,
                index_slot,
                iterable,
                body,
            } => {
                self.expr(iterable)?;
                self.b.emit_store_slot(*array_slot);
                self.b.emit_small_int(0);
                self.b.emit_store_slot(*index_slot);
                let begin = self.b.new_label();
                let step = self.b.new_label();
                let end = self.b.new_label();
                self.loops.push(LoopLabels {
                    continue_to: step,
                    break_to: end,
                });
                self.b.mark(begin);
                self.b.emit_load_slot(*index_slot);
                self.b.emit_load_slot(*array_slot);
                self.b.emit(Opcode::ArrayLength, 0);
                self.b.emit_cmp(comp_to_byte(crate::ast::CompOp::Lt), Sort::Int);
                self.b.jump(Opcode::JumpIfFalse, end);
                self.b.emit_load_slot(*array_slot);
                self.b.emit_load_slot(*index_slot);
                self.b.emit(Opcode::ArrayLoad, -1);
                if let Some(cast) = var_cast {
                    self.cast_op(cast);
                }
                self.b.emit_store_slot(*var_slot);
                self.tick(body);
                self.block(body)?;
                self.b.mark(step);
                self.b.emit_load_slot(*index_slot);
                self.b.emit_small_int(1);
                self.b.emit_sort(Opcode::Add, Sort::Int, -1);
                self.b.emit_store_slot(*index_slot);
                self.b.jump(Opcode::Jump, begin);
                self.b.mark(end);
                self.b.set_stack_depth(0);
                self.loops.pop();
            }
            TStmtKind::EachIterable {
                var_slot,
                var_cast,
                iter_slot,
                iterable,
                iterator,
                has_next,
                next,
                body,
            } => {
                self.expr(iterable)?;
                match iterator {
                    Some(spec) => self.invoke(spec, 0, false),
                    None => self.b.emit_invoke_dynamic(
                        DynCall {
                            name: "iterator".into(),
                            op: DynOp::Iterate,
                            argc: 0,
                            sig: vec![],
                        },
                        1,
                        true,
                    ),
                }
                self.b.emit_store_slot(*iter_slot);
                let begin = self.b.new_label();
                let end = self.b.new_label();
                self.loops.push(LoopLabels {
                    continue_to: begin,
                    break_to: end,
                });
                self.b.mark(begin);
                self.b.emit_load_slot(*iter_slot);
                self.invoke(has_next, 0, false);
                self.b.jump(Opcode::JumpIfFalse, end);
                self.b.emit_load_slot(*iter_slot);
                self.invoke(next, 0, false);
                if let Some(cast) = var_cast {
                    self.cast_op(cast);
                }
                self.b.emit_store_slot(*var_slot);
                self.tick(body);
                self.block(body)?;
                self.b.jump(Opcode::Jump, begin);
                self.b.mark(end);
                self.b.set_stack_depth(0);
                self.loops.pop();
            }
            TStmtKind::Break => {
                let target = self.loops.last().ok_or_else(|| CompileError::illegal_tree(stmt.loc))?;
                self.b.jump(Opcode::Jump, target.break_to);
            }
            TStmtKind::Continue => {
                let target = self.loops.last().ok_or_else(|| CompileError::illegal_tree(stmt.loc))?;
                self.b.jump(Opcode::Jump, target.continue_to);
            }
            TStmtKind::Try { body, catches } => {
                let depth = self.b.stack_depth();
                let start = u32::try_from(self.b.current_offset()).expect("offset fits u32");
                self.block(body)?;
                let end = u32::try_from(self.b.current_offset()).expect("offset fits u32");
                let after = self.b.new_label();
                if !body.all_escape {
                    self.b.jump(Opcode::Jump, after);
                }
                for catch in catches {
                    let handler = u32::try_from(self.b.current_offset()).expect("offset fits u32");
                    self.b.add_exception_entry(ExceptionEntry {
                        start,
                        end,
                        handler,
                        exc: catch.exc,
                        stack_depth: depth,
                    });
                    // The handler begins with the exception value on top.
                    self.b.set_stack_depth(depth + 1);
                    self.b.set_location(catch.loc);
                    self.b.emit_store_slot(catch.slot);
                    self.block(&catch.body)?;
                    if !catch.body.all_escape {
                        self.b.jump(Opcode::Jump, after);
                    }
                }
                self.b.mark(after);
                self.b.set_stack_depth(depth);
            }
            TStmtKind::Block(block) => self.block(block)?,
        }
        Ok(())
    }

    fn default_value(&mut self, sort: Sort) {
        match sort {
            Sort::Bool => self.b.emit(Opcode::LoadFalse, 1),
            Sort::Byte | Sort::Short | Sort::Int => self.b.emit_small_int(0),
            Sort::Long => self.b.emit_load_const(PoolConst::Long(0)),
            Sort::Float => self.b.emit_load_const(PoolConst::Float(0.0)),
            Sort::Double => self.b.emit_load_const(PoolConst::Double(0.0)),
            Sort::Char => self.b.emit_load_const(PoolConst::Char('\0')),
            _ => self.b.emit(Opcode::LoadNull, 1),
        }
    }

    fn constant(&mut self, value: &Const) {
        match value {
            Const::Null => self.b.emit(Opcode::LoadNull, 1),
            Const::Bool(true) => self.b.emit(Opcode::LoadTrue, 1),
            Const::Bool(false) => self.b.emit(Opcode::LoadFalse, 1),
            Const::Int(i) => match i8::try_from(*i) {
                Ok(small) => self.b.emit_small_int(small),
                Err(_) => self.b.emit_load_const(PoolConst::Int(*i)),
            },
            Const::Long(i) => self.b.emit_load_const(PoolConst::Long(*i)),
            Const::Float(f) => self.b.emit_load_const(PoolConst::Float(*f)),
            Const::Double(f) => self.b.emit_load_const(PoolConst::Double(*f)),
            Const::Char(c) => self.b.emit_load_const(PoolConst::Char(*c)),
            Const::Str(s) => self.b.emit_load_const(PoolConst::Str(s.clone())),
        }
    }

    /// Emits an expression so its value (if any) lands on the stack.
    fn expr(&mut self, e: &TExpr) -> Result<(), CompileError> {
        if let Some(constant) = &e.constant {
            self.constant(constant);
            return Ok(());
        }
        match &e.kind {
            TExprKind::Const => Err(CompileError::illegal_tree(e.loc)),
            TExprKind::Regex { pattern, flags } => {
                self.b.emit_load_const(PoolConst::Pattern {
                    pattern: pattern.clone(),
                    flags: flags.clone(),
                });
                Ok(())
            }
            TExprKind::Local { slot } => {
                self.b.emit_load_slot(*slot);
                Ok(())
            }
            TExprKind::Unary { op, sort, operand } => match op {
                UnaryOp::Not => self.bool_value(e),
                UnaryOp::Plus => self.expr(operand),
                UnaryOp::Minus => {
                    self.expr(operand)?;
                    if *sort == Sort::Def {
                        self.b.emit_invoke_dynamic(
                            DynCall {
                                name: "neg".into(),
                                op: DynOp::Neg,
                                argc: 0,
                                sig: vec![Sort::Def],
                            },
                            1,
                            true,
                        );
                    } else {
                        self.b.emit_sort(Opcode::Neg, *sort, 0);
                    }
                    Ok(())
                }
                UnaryOp::BitNot => {
                    self.expr(operand)?;
                    if *sort == Sort::Def {
                        self.b.emit_invoke_dynamic(
                            DynCall {
                                name: "not".into(),
                                op: DynOp::BitNot,
                                argc: 0,
                                sig: vec![Sort::Def],
                            },
                            1,
                            true,
                        );
                    } else {
                        self.b.emit_sort(Opcode::BitNot, *sort, 0);
                    }
                    Ok(())
                }
            },
            TExprKind::Binary { op, sort, left, right } => {
                self.expr(left)?;
                self.expr(right)?;
                self.binary_op(*op, *sort, left.ty.sort(), right.ty.sort());
                Ok(())
            }
            TExprKind::StrConcat { left, right } => {
                self.expr(left)?;
                self.to_string_op(left.ty.sort());
                self.expr(right)?;
                self.to_string_op(right.ty.sort());
                self.b.emit(Opcode::StrCat, -1);
                Ok(())
            }
            TExprKind::Bool { .. } | TExprKind::Comp { .. } => self.bool_value(e),
            TExprKind::Cast { cast, operand } => {
                self.expr(operand)?;
                self.cast_op(cast);
                Ok(())
            }
            TExprKind::Ternary { cond, then, orelse } => {
                let depth = self.b.stack_depth();
                let fals = self.b.new_label();
                let end = self.b.new_label();
                self.cond(cond, None, Some(fals))?;
                self.expr(then)?;
                self.b.jump(Opcode::Jump, end);
                self.b.mark(fals);
                self.b.set_stack_depth(depth);
                self.expr(orelse)?;
                self.b.mark(end);
                Ok(())
            }
            TExprKind::InstanceOf { operand, target } => {
                self.expr(operand)?;
                self.b.emit_instance_of(*target);
                Ok(())
            }
            TExprKind::Chain { links } => {
                for link in links {
                    self.link_load(link)?;
                }
                Ok(())
            }
            TExprKind::Assign {
                links,
                rhs,
                compound,
                post,
                read,
            } => self.assign(links, rhs, compound.as_ref(), *post, *read),
            TExprKind::ListInit { items } => {
                for item in items {
                    self.expr(item)?;
                }
                let count = u16::try_from(items.len())
                    .map_err(|_| CompileError::limit("list literal too large.", e.loc))?;
                self.b.emit_build_list(count);
                Ok(())
            }
            TExprKind::MapInit { pairs } => {
                for (key, value) in pairs {
                    self.expr(key)?;
                    self.expr(value)?;
                }
                let count = u16::try_from(pairs.len())
                    .map_err(|_| CompileError::limit("map literal too large.", e.loc))?;
                self.b.emit_build_map(count);
                Ok(())
            }
            TExprKind::FuncRef { fr, captures } => {
                for capture in captures {
                    self.expr(capture)?;
                }
                let count = u8::try_from(captures.len())
                    .map_err(|_| CompileError::limit("too many captures.", e.loc))?;
                self.b.emit_build_funcref(fr.clone(), count);
                Ok(())
            }
        }
    }

    fn binary_op(&mut self, op: BinOp, sort: Sort, left_sort: Sort, right_sort: Sort) {
        if sort == Sort::Def {
            self.b.emit_invoke_dynamic(
                DynCall {
                    name: op.symbol().into(),
                    op: DynOp::Binary(op),
                    argc: 1,
                    sig: vec![left_sort, right_sort],
                },
                2,
                true,
            );
            return;
        }
        let opcode = match op {
            BinOp::Add => Opcode::Add,
            BinOp::Sub => Opcode::Sub,
            BinOp::Mul => Opcode::Mul,
            BinOp::Div => Opcode::Div,
            BinOp::Rem => Opcode::Rem,
            BinOp::Shl => Opcode::Shl,
            BinOp::Shr => Opcode::Shr,
            BinOp::Ushr => Opcode::Ushr,
            BinOp::BitAnd => Opcode::BitAnd,
            BinOp::BitOr => Opcode::BitOr,
            BinOp::BitXor => Opcode::BitXor,
        };
        self.b.emit_sort(opcode, sort, -1);
    }

    /// String conversion for concatenation operands; strings pass through.
    fn to_string_op(&mut self, sort: Sort) {
        self.b.emit_sort(Opcode::ToStr, sort, 0);
    }

    fn cast_op(&mut self, cast: &CastOp) {
        match &cast.kind {
            CastKind::Identity => {}
            CastKind::Coerce => self.b.emit_coerce(cast.from.sort(), cast.to.sort()),
            CastKind::Bridge {
                owner,
                key,
                upcast,
                downcast,
            } => {
                if let Some((from, to)) = upcast {
                    self.b.emit_coerce(*from, *to);
                }
                self.b.emit_invoke(
                    MethodRef {
                        owner: *owner,
                        key: key.clone(),
                        is_static: true,
                        returns_void: false,
                    },
                    1,
                );
                if let Some((from, to)) = downcast {
                    self.b.emit_coerce(*from, *to);
                }
            }
        }
    }

    fn invoke(&mut self, spec: &MethodSpec, argc: u8, is_static: bool) {
        self.b.emit_invoke(
            MethodRef {
                owner: spec.owner,
                key: spec.key.clone(),
                is_static,
                returns_void: spec.returns_void,
            },
            argc,
        );
    }

    /// Emits one chain link in load position.
    fn link_load(&mut self, link: &TLink) -> Result<(), CompileError> {
        match link {
            TLink::Local { slot, .. } => self.b.emit_load_slot(*slot),
            TLink::LocalCall {
                id,
                args,
                returns_void,
                ..
            } => {
                for arg in args {
                    self.expr(arg)?;
                }
                let argc = u8::try_from(args.len()).expect("arity fits u8");
                self.b.emit_call_local(*id, argc, *returns_void);
            }
            TLink::Field {
                owner,
                name,
                is_static,
                ..
            } => {
                self.b.emit_get_field(FieldRef {
                    owner: *owner,
                    name: name.clone(),
                    is_static: *is_static,
                });
            }
            TLink::ArrayLength => self.b.emit(Opcode::ArrayLength, 0),
            TLink::ArrayIndex { index, .. } => {
                self.expr(index)?;
                self.b.emit(Opcode::ArrayLoad, -1);
            }
            TLink::MapShortcut { get, index, .. } => {
                self.expr(index)?;
                self.invoke(get, 1, false);
            }
            TLink::ListShortcut { get, index, .. } => {
                self.expr(index)?;
                self.invoke(get, 1, false);
            }
            TLink::GetterSetter { getter, .. } => {
                let Some(getter) = getter else {
                    return Err(CompileError::illegal_tree(crate::error::Loc::default()));
                };
                self.invoke(getter, 0, false);
            }
            TLink::Call { method, args, .. } => {
                for arg in args {
                    self.expr(arg)?;
                }
                let argc = u8::try_from(args.len()).expect("arity fits u8");
                self.invoke(method, argc, false);
            }
            TLink::StaticCall { method, args, .. } => {
                for arg in args {
                    self.expr(arg)?;
                }
                let argc = u8::try_from(args.len()).expect("arity fits u8");
                self.invoke(method, argc, true);
            }
            TLink::New { owner, arity, args } => {
                for arg in args {
                    self.expr(arg)?;
                }
                self.b.emit_new_instance(
                    MethodRef {
                        owner: *owner,
                        key: crate::registry::MethodKey::new("<init>", usize::from(*arity)),
                        is_static: false,
                        returns_void: false,
                    },
                    *arity,
                );
            }
            TLink::NewArray { elem, dims } => {
                for dim in dims {
                    self.expr(dim)?;
                }
                let count = u8::try_from(dims.len()).expect("dims fit u8");
                self.b.emit_new_array(elem.base_sort(), count);
            }
            TLink::Head { expr } => self.expr(expr)?,
            TLink::DynField { name } => {
                self.b.emit_invoke_dynamic(
                    DynCall {
                        name: name.clone(),
                        op: DynOp::FieldLoad,
                        argc: 0,
                        sig: vec![],
                    },
                    1,
                    true,
                );
            }
            TLink::DynIndex { index } => {
                self.expr(index)?;
                self.b.emit_invoke_dynamic(
                    DynCall {
                        name: "[]".into(),
                        op: DynOp::IndexLoad,
                        argc: 1,
                        sig: vec![index.ty.sort()],
                    },
                    2,
                    true,
                );
            }
            TLink::DynCall { name, args } => {
                for arg in args {
                    self.expr(arg)?;
                }
                let argc = u8::try_from(args.len()).expect("arity fits u8");
                let sig = args.iter().map(|arg| arg.ty.sort()).collect();
                self.b.emit_invoke_dynamic(
                    DynCall {
                        name: name.clone(),
                        op: DynOp::MethodCall,
                        argc,
                        sig,
                    },
                    argc + 1,
                    true,
                );
            }
        }
        Ok(())
    }

    /// The assignment pathway: load the leading links, dup the receiver for
    /// compound reads, apply the operation, keep the value visible when the
    /// context consumes it, then store.
    fn assign(
        &mut self,
        links: &[TLink],
        rhs: &TExpr,
        compound: Option<&Compound>,
        post: bool,
        read: bool,
    ) -> Result<(), CompileError> {
        let (last, leading) = links.split_last().ok_or_else(|| CompileError::illegal_tree(rhs.loc))?;
        for link in leading {
            self.link_load(link)?;
        }
        self.store_prefix(last)?;
        let arity = last.receiver_arity();

        match compound {
            None => {
                self.expr(rhs)?;
                if read {
                    self.dup_under(arity);
                }
            }
            Some(compound) => {
                // Duplicate the receiver cells, load the current value.
                match arity {
                    0 => {}
                    1 => self.b.emit(Opcode::Dup, 1),
                    _ => self.b.emit(Opcode::Dup2, 2),
                }
                self.load_site(last)?;
                if post && read {
                    self.dup_under(arity);
                }
                if compound.concat {
                    self.to_string_op(Sort::Object);
                    self.expr(rhs)?;
                    self.to_string_op(rhs.ty.sort());
                    self.b.emit(Opcode::StrCat, -1);
                } else {
                    if let Some(there) = &compound.there {
                        self.cast_op(there);
                    }
                    self.expr(rhs)?;
                    self.binary_op(compound.op, compound.sort, compound.sort, rhs.ty.sort());
                    if let Some(back) = &compound.back {
                        self.cast_op(back);
                    }
                }
                if !post && read {
                    self.dup_under(arity);
                }
            }
        }
        self.store_site(last)
    }

    /// Copies the top of stack under the receiver cells so the assignment's
    /// value survives the store.
    fn dup_under(&mut self, arity: u8) {
        match arity {
            0 => self.b.emit(Opcode::Dup, 1),
            1 => self.b.emit(Opcode::DupX1, 1),
            _ => self.b.emit(Opcode::DupX2, 1),
        }
    }

    /// Emits the index operand of an indexed store site.
    fn store_prefix(&mut self, link: &TLink) -> Result<(), CompileError> {
        match link {
            TLink::ArrayIndex { index, .. }
            | TLink::MapShortcut { index, .. }
            | TLink::ListShortcut { index, .. }
            | TLink::DynIndex { index } => self.expr(index),
            _ => Ok(()),
        }
    }

    /// Loads the current value at a store site (receiver cells consumed).
    fn load_site(&mut self, link: &TLink) -> Result<(), CompileError> {
        match link {
            TLink::Local { slot, .. } => {
                self.b.emit_load_slot(*slot);
                Ok(())
            }
            TLink::Field {
                owner,
                name,
                is_static,
                ..
            } => {
                self.b.emit_get_field(FieldRef {
                    owner: *owner,
                    name: name.clone(),
                    is_static: *is_static,
                });
                Ok(())
            }
            TLink::ArrayIndex { .. } => {
                self.b.emit(Opcode::ArrayLoad, -1);
                Ok(())
            }
            TLink::MapShortcut { get, .. } | TLink::ListShortcut { get, .. } => {
                self.invoke(get, 1, false);
                Ok(())
            }
            TLink::GetterSetter { getter, .. } => {
                let getter = getter
                    .as_ref()
                    .ok_or_else(|| CompileError::illegal_tree(crate::error::Loc::default()))?;
                self.invoke(getter, 0, false);
                Ok(())
            }
            TLink::DynField { name } => {
                self.b.emit_invoke_dynamic(
                    DynCall {
                        name: name.clone(),
                        op: DynOp::FieldLoad,
                        argc: 0,
                        sig: vec![],
                    },
                    1,
                    true,
                );
                Ok(())
            }
            TLink::DynIndex { index } => {
                self.b.emit_invoke_dynamic(
                    DynCall {
                        name: "[]".into(),
                        op: DynOp::IndexLoad,
                        argc: 1,
                        sig: vec![index.ty.sort()],
                    },
                    2,
                    true,
                );
                Ok(())
            }
            _ => Err(CompileError::illegal_tree(crate::error::Loc::default())),
        }
    }

    /// Stores the top of stack into a store site.
    fn store_site(&mut self, link: &TLink) -> Result<(), CompileError> {
        match link {
            TLink::Local { slot, .. } => {
                self.b.emit_store_slot(*slot);
                Ok(())
            }
            TLink::Field { owner, name, is_static, .. } => {
                if *is_static {
                    return Err(CompileError::illegal_tree(crate::error::Loc::default()));
                }
                self.b.emit_put_field(FieldRef {
                    owner: *owner,
                    name: name.clone(),
                    is_static: false,
                });
                Ok(())
            }
            TLink::ArrayIndex { .. } => {
                self.b.emit(Opcode::ArrayStore, -3);
                Ok(())
            }
            TLink::MapShortcut { put, .. } => {
                // put returns the previous value; the store discards it.
                self.invoke(put, 2, false);
                self.b.emit(Opcode::Pop, -1);
                Ok(())
            }
            TLink::ListShortcut { set, .. } => {
                self.invoke(set, 2, false);
                self.b.emit(Opcode::Pop, -1);
                Ok(())
            }
            TLink::GetterSetter { setter, .. } => {
                let setter = setter
                    .as_ref()
                    .ok_or_else(|| CompileError::illegal_tree(crate::error::Loc::default()))?;
                self.invoke(setter, 1, false);
                if !setter.returns_void {
                    self.b.emit(Opcode::Pop, -1);
                }
                Ok(())
            }
            TLink::DynField { name } => {
                self.b.emit_invoke_dynamic(
                    DynCall {
                        name: name.clone(),
                        op: DynOp::FieldStore,
                        argc: 1,
                        sig: vec![Sort::Def],
                    },
                    2,
                    false,
                );
                Ok(())
            }
            TLink::DynIndex { index } => {
                self.b.emit_invoke_dynamic(
                    DynCall {
                        name: "[]".into(),
                        op: DynOp::IndexStore,
                        argc: 2,
                        sig: vec![index.ty.sort(), Sort::Def],
                    },
                    3,
                    false,
                );
                Ok(())
            }
            _ => Err(CompileError::illegal_tree(crate::error::Loc::default())),
        }
    }

    /// Produces a boolean value on the stack from a short-circuit tree.
    fn bool_value(&mut self, e: &TExpr) -> Result<(), CompileError> {
        // Comparisons produce their boolean directly.
        if let TExprKind::Comp { op, sort, left, right } = &e.kind {
            self.expr(left)?;
            self.expr(right)?;
            if *sort == Sort::Def {
                self.b.emit_invoke_dynamic(
                    DynCall {
                        name: op.symbol().into(),
                        op: DynOp::Compare(*op),
                        argc: 1,
                        sig: vec![left.ty.sort(), right.ty.sort()],
                    },
                    2,
                    true,
                );
            } else {
                self.b.emit_cmp(comp_to_byte(*op), *sort);
            }
            return Ok(());
        }
        let depth = self.b.stack_depth();
        let fals = self.b.new_label();
        let end = self.b.new_label();
        self.cond(e, None, Some(fals))?;
        self.b.emit(Opcode::LoadTrue, 1);
        self.b.jump(Opcode::Jump, end);
        self.b.mark(fals);
        self.b.set_stack_depth(depth);
        self.b.emit(Opcode::LoadFalse, 1);
        self.b.mark(end);
        Ok(())
    }

    /// Emits a boolean expression in branch position, threading `tru`/`fals`
    /// labels through `&&`/`||`/`!` instead of materializing a value.
    fn cond(&mut self, e: &TExpr, tru: Option<Label>, fals: Option<Label>) -> Result<(), CompileError> {
        if let Some(Const::Bool(value)) = &e.constant {
            if *value {
                if let Some(tru) = tru {
                    self.b.jump(Opcode::Jump, tru);
                }
            } else if let Some(fals) = fals {
                self.b.jump(Opcode::Jump, fals);
            }
            return Ok(());
        }
        match &e.kind {
            TExprKind::Bool { op: BoolOp::And, left, right } => match fals {
                Some(fals) => {
                    self.cond(left, None, Some(fals))?;
                    self.cond(right, tru, Some(fals))
                }
                None => {
                    let local_fals = self.b.new_label();
                    self.cond(left, None, Some(local_fals))?;
                    self.cond(right, tru, None)?;
                    self.b.mark(local_fals);
                    Ok(())
                }
            },
            TExprKind::Bool { op: BoolOp::Or, left, right } => match tru {
                Some(tru) => {
                    self.cond(left, Some(tru), None)?;
                    self.cond(right, Some(tru), fals)
                }
                None => {
                    let local_tru = self.b.new_label();
                    self.cond(left, Some(local_tru), None)?;
                    self.cond(right, None, fals)?;
                    self.b.mark(local_tru);
                    Ok(())
                }
            },
            TExprKind::Unary {
                op: UnaryOp::Not,
                operand,
                ..
            } => self.cond(operand, fals, tru),
            _ => {
                self.expr(e)?;
                match (tru, fals) {
                    (Some(tru), Some(fals)) => {
                        self.b.jump(Opcode::JumpIfTrue, tru);
                        self.b.jump(Opcode::Jump, fals);
                    }
                    (Some(tru), None) => self.b.jump(Opcode::JumpIfTrue, tru),
                    (None, Some(fals)) => self.b.jump(Opcode::JumpIfFalse, fals),
                    (None, None) => self.b.emit(Opcode::Pop, -1),
                }
                Ok(())
            }
        }
    }
}

/// Whether an expression in statement position leaves a value to discard.
fn leaves_value(e: &TExpr) -> bool {
    match &e.kind {
        TExprKind::Assign { read, .. } => *read,
        TExprKind::Chain { links } => match links.last() {
            Some(TLink::Call { ret, .. } | TLink::StaticCall { ret, .. } | TLink::LocalCall { ret, .. }) => {
                ret.sort() != Sort::Void
            }
            _ => true,
        },
        _ => e.ty.sort() != Sort::Void,
    }
}
