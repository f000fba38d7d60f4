//! Semantic analysis: the first of the two tree walks.
//!
//! The analyzer consumes the parsed tree and produces the decorated
//! [`typed`](crate::typed) tree. Context types flow top-down (`expected`),
//! resolved types and folded constants flow bottom-up, and every required
//! conversion becomes an explicit cast node backed by a registry transform.
//! Escape analysis, slot assignment, loop-counter reservation, and lambda
//! desugaring all happen here; the emitter never re-derives any of it.
//!
//! Analysis aborts a subtree on its first error.

mod chain;
mod expr;
mod lambda;
mod locals;

use ahash::AHashMap;

use crate::{
    ast::{Catch, Declaration, ForInit, SFunction, Script, Stmt, StmtLoc},
    compile::Settings,
    error::{CompileError, Loc},
    registry::{Registry, Sort, Ty},
    typed::{Flow, TBlock, TCatch, TDecl, TExpr, TExprKind, TForInit, TFunction, TLink, TMain, TScript, TStmt, TStmtKind},
};

pub(crate) use locals::{Locals, Variable};

/// Names the analyzer recognizes and reserves in the script body.
const RESERVED: &[&str] = &["params", "scorer", "_score", "ctx", "doc", "#loop", "this"];

/// Analyzes a parsed script against a frozen registry.
pub fn analyze(registry: &Registry, settings: &Settings, script: &Script) -> Result<TScript, CompileError> {
    let mut analyzer = Analyzer {
        registry,
        settings,
        locals: Locals::new(),
        sigs: Vec::new(),
        pending: Vec::new(),
        done: Vec::new(),
        by_key: AHashMap::new(),
        synth_count: 0,
        uses_score: false,
        uses_ctx: false,
        uses_doc: false,
    };
    for function in &script.functions {
        analyzer.register_function(function)?;
    }
    let user_count = analyzer.sigs.len();
    for id in 0..user_count {
        analyzer.analyze_function(id)?;
    }
    let main = analyzer.analyze_main(&script.body)?;
    let functions = analyzer
        .done
        .into_iter()
        .map(|f| f.expect("every registered function is analyzed"))
        .collect();
    Ok(TScript {
        main,
        functions,
        uses_score: analyzer.uses_score,
    })
}

/// Signature of a script function, user-declared or synthetic.
pub(crate) struct FnSig {
    pub name: Box<str>,
    pub ret: Ty,
    pub params: Vec<(Box<str>, Ty)>,
    pub returns_void: bool,
    pub synthetic: bool,
}

/// Context threaded through statement analysis.
#[derive(Clone, Copy)]
pub(crate) struct StmtCtx {
    pub in_loop: bool,
    /// Position of the statement within its block.
    pub tail: Tail,
    pub ret: Ty,
    pub ret_void: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tail {
    None,
    /// Last statement of the script body: a trailing expression is returned.
    Source,
    /// Last statement of a loop body: a bare `continue` is extraneous.
    Loop,
}

pub(crate) struct Analyzer<'a> {
    pub(crate) registry: &'a Registry,
    pub(crate) settings: &'a Settings,
    pub(crate) locals: Locals,
    pub(crate) sigs: Vec<FnSig>,
    pub(crate) pending: Vec<Option<(Vec<StmtLoc>, Loc)>>,
    pub(crate) done: Vec<Option<TFunction>>,
    pub(crate) by_key: AHashMap<(Box<str>, u8), u16>,
    pub(crate) synth_count: u32,
    pub(crate) uses_score: bool,
    pub(crate) uses_ctx: bool,
    pub(crate) uses_doc: bool,
}

impl<'a> Analyzer<'a> {
    pub(crate) fn resolve_type(&self, name: &str, dims: u8, loc: Loc) -> Result<Ty, CompileError> {
        let mut full = String::from(name);
        for _ in 0..dims {
            full.push_str("[]");
        }
        self.registry
            .lookup_type(&full)
            .ok_or_else(|| CompileError::resolution(format!("Unknown type [{full}]."), loc))
    }

    fn resolve_var_type(&self, name: &str, dims: u8, loc: Loc) -> Result<Ty, CompileError> {
        let ty = self.resolve_type(name, dims, loc)?;
        if ty.sort() == Sort::Void {
            return Err(CompileError::type_error("Cannot declare a variable of type [void].", loc));
        }
        Ok(ty)
    }

    pub(crate) fn declare_var(&mut self, name: &str, ty: Ty, readonly: bool, loc: Loc) -> Result<Variable, CompileError> {
        if RESERVED.contains(&name) {
            return Err(CompileError::type_error(format!("Variable [{name}] is reserved."), loc));
        }
        self.locals.declare(name, ty, readonly, loc)
    }

    pub(crate) fn register_function(&mut self, function: &SFunction) -> Result<u16, CompileError> {
        let ret = self.resolve_type(&function.ret.name, function.ret.dims, function.ret.loc)?;
        let mut params = Vec::with_capacity(function.params.len());
        for param in &function.params {
            let ty = self.resolve_var_type(&param.ty.name, param.ty.dims, param.loc)?;
            params.push((param.name.clone(), ty));
        }
        self.register_sig(
            function.name.clone(),
            ret,
            params,
            function.synthetic,
            function.body.clone(),
            function.loc,
        )
    }

    /// Registers a function signature with already-resolved types; lambda
    /// desugaring uses this directly for its synthetics.
    pub(crate) fn register_sig(
        &mut self,
        name: Box<str>,
        ret: Ty,
        params: Vec<(Box<str>, Ty)>,
        synthetic: bool,
        body: Vec<StmtLoc>,
        loc: Loc,
    ) -> Result<u16, CompileError> {
        let arity =
            u8::try_from(params.len()).map_err(|_| CompileError::limit("too many function parameters.", loc))?;
        let id = u16::try_from(self.sigs.len())
            .map_err(|_| CompileError::limit("too many functions in one script.", loc))?;
        let key = (name.clone(), arity);
        if self.by_key.insert(key, id).is_some() {
            return Err(CompileError::type_error(format!("Duplicate function [{name}/{arity}]."), loc));
        }
        self.sigs.push(FnSig {
            name,
            ret,
            params,
            returns_void: ret.sort() == Sort::Void,
            synthetic,
        });
        self.pending.push(Some((body, loc)));
        self.done.push(None);
        Ok(id)
    }

    pub(crate) fn analyze_function(&mut self, id: usize) -> Result<(), CompileError> {
        let (body_stmts, loc) = self.pending[id]
            .take()
            .expect("function analyzed exactly once");
        let (name, ret, returns_void, synthetic, param_info) = {
            let sig = &self.sigs[id];
            (
                sig.name.clone(),
                sig.ret,
                sig.returns_void,
                sig.synthetic,
                sig.params.clone(),
            )
        };
        self.locals.push_frame(false);
        let mut param_slots = Vec::with_capacity(param_info.len());
        for (param_name, ty) in &param_info {
            // Capture-prefix parameters of synthetics carry names already
            // validated at the capture site.
            let var = if synthetic {
                self.locals.declare(param_name, *ty, false, loc)?
            } else {
                self.declare_var(param_name, *ty, false, loc)?
            };
            param_slots.push(var.slot);
        }
        let loop_slot = self.reserve_loop_slot(loc)?;

        let ctx = StmtCtx {
            in_loop: false,
            tail: Tail::None,
            ret,
            ret_void: returns_void,
        };
        let (body, flow) = self.block(&body_stmts, ctx, Tail::None)?;
        let (max_slots, _) = self.locals.pop_frame();

        if !flow.method_escape && !returns_void && !synthetic {
            return Err(CompileError::control_flow(
                format!("Missing return statement in function [{name}]."),
                loc,
            ));
        }
        let arity = u8::try_from(param_slots.len()).expect("arity checked at registration");
        self.done[id] = Some(TFunction {
            name,
            ret,
            arity,
            param_slots,
            returns_void,
            body,
            max_slots,
            loop_slot,
            synthetic,
            loc,
        });
        Ok(())
    }

    fn reserve_loop_slot(&mut self, loc: Loc) -> Result<Option<u16>, CompileError> {
        if self.settings.max_loop_counter == 0 {
            return Ok(None);
        }
        let core = *self.registry.core();
        let var = self.locals.declare("#loop", core.int, true, loc)?;
        Ok(Some(var.slot))
    }

    fn analyze_main(&mut self, body: &[StmtLoc]) -> Result<TMain, CompileError> {
        let core = *self.registry.core();
        let map_ty = self.registry.lookup_type("Map").unwrap_or(core.def);
        self.locals.push_frame(false);
        let loc = Loc::default();
        let params_slot = self.locals.declare("params", map_ty, true, loc)?.slot;
        self.locals.declare("scorer", core.def, true, loc)?;
        let score_slot = self.locals.declare("_score", core.double, true, loc)?.slot;
        let ctx_slot = self.locals.declare("ctx", core.def, true, loc)?.slot;
        let doc_slot = self.locals.declare("doc", core.def, true, loc)?.slot;
        let loop_slot = self.reserve_loop_slot(loc)?;

        let ctx = StmtCtx {
            in_loop: false,
            tail: Tail::None,
            ret: core.def,
            ret_void: false,
        };
        let (body, _flow) = self.block(body, ctx, Tail::Source)?;
        let (max_slots, _) = self.locals.pop_frame();

        Ok(TMain {
            body,
            max_slots,
            params_slot,
            score_slot: self.uses_score.then_some(score_slot),
            ctx_slot: self.uses_ctx.then_some(ctx_slot),
            doc_slot: self.uses_doc.then_some(doc_slot),
            loop_slot,
        })
    }

    /// Analyzes a statement sequence, folding escape flags in order and
    /// rejecting anything after a statement whose every path escapes.
    pub(crate) fn block(&mut self, stmts: &[StmtLoc], ctx: StmtCtx, tail: Tail) -> Result<(TBlock, Flow), CompileError> {
        let mut out = Vec::with_capacity(stmts.len());
        let mut flow = Flow::default();
        let mut escaped = false;
        let last = stmts.len().checked_sub(1);
        for (index, stmt) in stmts.iter().enumerate() {
            if escaped {
                return Err(CompileError::control_flow("Unreachable statement.", stmt.loc));
            }
            let stmt_ctx = StmtCtx {
                tail: if Some(index) == last { tail } else { Tail::None },
                ..ctx
            };
            let (tstmt, stmt_flow) = self.statement(stmt, stmt_ctx)?;
            escaped = stmt_flow.all_escape;
            flow.method_escape = stmt_flow.method_escape;
            flow.loop_escape = stmt_flow.loop_escape;
            flow.all_escape = stmt_flow.all_escape;
            flow.any_continue |= stmt_flow.any_continue;
            flow.any_break |= stmt_flow.any_break;
            flow.statement_count = flow.statement_count.saturating_add(stmt_flow.statement_count);
            out.push(tstmt);
        }
        let block = TBlock {
            stmts: out,
            all_escape: flow.all_escape,
            statement_count: flow.statement_count,
        };
        Ok((block, flow))
    }

    #[expect(clippy::too_many_lines, reason = "one arm per statement variant")]
    fn statement(&mut self, stmt: &StmtLoc, ctx: StmtCtx) -> Result<(TStmt, Flow), CompileError> {
        let loc = stmt.loc;
        let one = Flow {
            statement_count: 1,
            ..Flow::default()
        };
        let (kind, flow) = match &stmt.stmt {
            Stmt::Decl { decls } => {
                let decls = self.declarations(decls)?;
                (TStmtKind::Decl { decls }, one)
            }
            Stmt::Expr(value) => {
                let mut expr = self.expr(value, None, false)?;
                if ctx.tail == Tail::Source && expr.ty.sort() != Sort::Void {
                    // The trailing expression of the script body is returned.
                    let expr = self.cast(expr, ctx.ret, false)?;
                    let flow = Flow {
                        method_escape: true,
                        all_escape: true,
                        ..one
                    };
                    (TStmtKind::Return(Some(expr)), flow)
                } else {
                    if !is_statement_expr(&expr) {
                        return Err(CompileError::type_error("Not a statement.", loc));
                    }
                    if let TExprKind::Assign { read, .. } = &mut expr.kind {
                        *read = false;
                    }
                    (TStmtKind::Expr(expr), one)
                }
            }
            Stmt::Return(value) => {
                let expr = match value {
                    Some(value) => {
                        if ctx.ret_void {
                            return Err(CompileError::type_error(
                                "Cannot return a value from a void function.",
                                loc,
                            ));
                        }
                        Some(self.expr(value, Some(ctx.ret), false)?)
                    }
                    None => {
                        if !ctx.ret_void {
                            return Err(CompileError::type_error("Must return a value.", loc));
                        }
                        None
                    }
                };
                let flow = Flow {
                    method_escape: true,
                    all_escape: true,
                    ..one
                };
                (TStmtKind::Return(expr), flow)
            }
            Stmt::Throw(value) => {
                let exception = self.registry.core().exception;
                let expr = self.expr(value, Some(exception), false)?;
                let flow = Flow {
                    method_escape: true,
                    all_escape: true,
                    ..one
                };
                (TStmtKind::Throw(expr), flow)
            }
            Stmt::Break => {
                if !ctx.in_loop {
                    return Err(CompileError::control_flow("Break statement outside of a loop.", loc));
                }
                let flow = Flow {
                    loop_escape: true,
                    all_escape: true,
                    any_break: true,
                    ..one
                };
                (TStmtKind::Break, flow)
            }
            Stmt::Continue => {
                if !ctx.in_loop {
                    return Err(CompileError::control_flow("Continue statement outside of a loop.", loc));
                }
                if ctx.tail == Tail::Loop {
                    return Err(CompileError::control_flow("Extraneous continue statement.", loc));
                }
                let flow = Flow {
                    loop_escape: true,
                    all_escape: true,
                    any_continue: true,
                    ..one
                };
                (TStmtKind::Continue, flow)
            }
            Stmt::If { cond, then, orelse } => {
                let core = *self.registry.core();
                let cond = self.expr(cond, Some(core.bool), false)?;
                self.locals.push_block();
                let (then_block, then_flow) = self.block(then, ctx, Tail::None)?;
                self.locals.pop_block();
                match orelse {
                    Some(orelse) => {
                        self.locals.push_block();
                        let (else_block, else_flow) = self.block(orelse, ctx, Tail::None)?;
                        self.locals.pop_block();
                        let flow = merge_paths(then_flow, else_flow);
                        (
                            TStmtKind::If {
                                cond,
                                then: then_block,
                                orelse: Some(else_block),
                            },
                            flow,
                        )
                    }
                    None => {
                        let flow = Flow {
                            any_continue: then_flow.any_continue,
                            any_break: then_flow.any_break,
                            ..one
                        };
                        (
                            TStmtKind::If {
                                cond,
                                then: then_block,
                                orelse: None,
                            },
                            flow,
                        )
                    }
                }
            }
            Stmt::While { cond, body } => {
                let (cond, body, flow, continuous) = self.loop_header(cond, body, ctx, loc, "while")?;
                (TStmtKind::While { cond, body, continuous }, flow)
            }
            Stmt::Do { body, cond } => {
                let core = *self.registry.core();
                self.locals.push_block();
                let loop_ctx = StmtCtx { in_loop: true, ..ctx };
                let (body_block, body_flow) = self.block(body, loop_ctx, Tail::Loop)?;
                self.locals.pop_block();
                let cond = self.expr(cond, Some(core.bool), false)?;
                let continuous = matches!(cond.constant, Some(crate::typed::Const::Bool(true)));
                let mut flow = one;
                if continuous && !body_flow.any_break {
                    if !body_flow.method_escape {
                        self.require_loop_budget(loc, "do-while")?;
                    }
                    flow.method_escape = true;
                    flow.all_escape = true;
                }
                (TStmtKind::Do { body: body_block, cond }, flow)
            }
            Stmt::For { init, cond, after, body } => {
                self.locals.push_block();
                let init = match init {
                    Some(ForInit::Decl(decls)) => Some(TForInit::Decl(self.declarations(decls)?)),
                    Some(ForInit::Expr(value)) => {
                        let mut expr = self.expr(value, None, false)?;
                        if let TExprKind::Assign { read, .. } = &mut expr.kind {
                            *read = false;
                        }
                        Some(TForInit::Expr(expr))
                    }
                    None => None,
                };
                let core = *self.registry.core();
                let cond = match cond {
                    Some(cond) => {
                        let cond = self.expr(cond, Some(core.bool), false)?;
                        if matches!(cond.constant, Some(crate::typed::Const::Bool(false))) {
                            return Err(CompileError::control_flow("Extraneous for loop.", loc));
                        }
                        Some(cond)
                    }
                    None => None,
                };
                let continuous = match &cond {
                    None => true,
                    Some(cond) => matches!(cond.constant, Some(crate::typed::Const::Bool(true))),
                };
                let loop_ctx = StmtCtx { in_loop: true, ..ctx };
                let (body_block, body_flow) = self.block(body, loop_ctx, Tail::Loop)?;
                let after = match after {
                    Some(after) => {
                        let mut expr = self.expr(after, None, false)?;
                        if let TExprKind::Assign { read, .. } = &mut expr.kind {
                            *read = false;
                        }
                        Some(expr)
                    }
                    None => None,
                };
                self.locals.pop_block();
                let mut flow = one;
                if continuous && !body_flow.any_break {
                    if !body_flow.method_escape {
                        self.require_loop_budget(loc, "for")?;
                    }
                    flow.method_escape = true;
                    flow.all_escape = true;
                }
                (
                    TStmtKind::For {
                        init,
                        cond,
                        after,
                        body: body_block,
                    },
                    flow,
                )
            }
            Stmt::Each {
                decl_ty,
                name,
                iterable,
                body,
            } => {
                let (kind, flow) = self.each(decl_ty.as_ref(), name, iterable, body, ctx, loc)?;
                (kind, flow)
            }
            Stmt::Try { body, catches } => {
                self.locals.push_block();
                let (body_block, body_flow) = self.block(body, ctx, Tail::None)?;
                self.locals.pop_block();
                let mut tcatches = Vec::with_capacity(catches.len());
                let mut flow = Flow {
                    statement_count: 1,
                    ..body_flow
                };
                for catch in catches {
                    let (tcatch, catch_flow) = self.catch(catch, ctx)?;
                    flow = merge_paths(flow, catch_flow);
                    tcatches.push(tcatch);
                }
                (
                    TStmtKind::Try {
                        body: body_block,
                        catches: tcatches,
                    },
                    flow,
                )
            }
            Stmt::Block(stmts) => {
                self.locals.push_block();
                let (block, inner_flow) = self.block(stmts, ctx, if ctx.tail == Tail::Loop { Tail::Loop } else { Tail::None })?;
                self.locals.pop_block();
                let flow = Flow {
                    statement_count: inner_flow.statement_count,
                    ..inner_flow
                };
                (TStmtKind::Block(block), flow)
            }
        };
        Ok((TStmt { loc, kind }, flow))
    }

    /// Shared while-loop analysis (condition, body, continuity rules).
    fn loop_header(
        &mut self,
        cond: &crate::ast::ExprLoc,
        body: &[StmtLoc],
        ctx: StmtCtx,
        loc: Loc,
        what: &str,
    ) -> Result<(TExpr, TBlock, Flow, bool), CompileError> {
        let core = *self.registry.core();
        let cond = self.expr(cond, Some(core.bool), false)?;
        if matches!(cond.constant, Some(crate::typed::Const::Bool(false))) {
            return Err(CompileError::control_flow(format!("Extraneous {what} loop."), loc));
        }
        let continuous = matches!(cond.constant, Some(crate::typed::Const::Bool(true)));
        self.locals.push_block();
        let loop_ctx = StmtCtx { in_loop: true, ..ctx };
        let (body_block, body_flow) = self.block(body, loop_ctx, Tail::Loop)?;
        self.locals.pop_block();
        let mut flow = Flow {
            statement_count: 1,
            ..Flow::default()
        };
        if continuous && !body_flow.any_break {
            // A body that returns or throws on every path bounds the loop by
            // itself; only a body that can come back around needs the budget.
            if !body_flow.method_escape {
                self.require_loop_budget(loc, what)?;
            }
            flow.method_escape = true;
            flow.all_escape = true;
        }
        Ok((cond, body_block, flow, continuous))
    }

    /// A statically endless loop needs the loop budget to stay bounded.
    fn require_loop_budget(&self, loc: Loc, what: &str) -> Result<(), CompileError> {
        if self.settings.max_loop_counter == 0 {
            return Err(CompileError::control_flow(
                format!("The {what} loop has no escape and no loop budget is set."),
                loc,
            ));
        }
        Ok(())
    }

    fn declarations(&mut self, decls: &[Declaration]) -> Result<Vec<TDecl>, CompileError> {
        let mut out = Vec::with_capacity(decls.len());
        for decl in decls {
            let ty = self.resolve_var_type(&decl.ty.name, decl.ty.dims, decl.loc)?;
            let init = match &decl.init {
                Some(init) => Some(self.expr(init, Some(ty), false)?),
                None => None,
            };
            let var = self.declare_var(&decl.name, ty, false, decl.loc)?;
            out.push(TDecl {
                loc: decl.loc,
                slot: var.slot,
                ty,
                init,
            });
        }
        Ok(out)
    }

    fn catch(&mut self, catch: &Catch, ctx: StmtCtx) -> Result<(TCatch, Flow), CompileError> {
        let ty = self.resolve_type(&catch.ty.name, catch.ty.dims, catch.loc)?;
        let exception = self.registry.core().exception;
        if ty.dims > 0 || !self.registry.is_subtype(ty.struct_id, exception.struct_id) {
            return Err(CompileError::type_error(
                format!("Not an exception type: [{}].", self.registry.type_name(ty)),
                catch.loc,
            ));
        }
        self.locals.push_block();
        let var = self.declare_var(&catch.name, ty, false, catch.loc)?;
        let (body, flow) = self.block(&catch.body, ctx, Tail::None)?;
        self.locals.pop_block();
        Ok((
            TCatch {
                loc: catch.loc,
                slot: var.slot,
                exc: ty.struct_id,
                body,
            },
            flow,
        ))
    }

    fn each(
        &mut self,
        decl_ty: Option<&crate::ast::TypeName>,
        name: &str,
        iterable: &crate::ast::ExprLoc,
        body: &[StmtLoc],
        ctx: StmtCtx,
        loc: Loc,
    ) -> Result<(TStmtKind, Flow), CompileError> {
        let core = *self.registry.core();
        let iterable = self.expr(iterable, None, false)?;
        let var_ty = match decl_ty {
            Some(ty) => self.resolve_var_type(&ty.name, ty.dims, ty.loc)?,
            None => core.def,
        };
        self.locals.push_block();
        let var = self.declare_var(name, var_ty, false, loc)?;
        let loop_ctx = StmtCtx { in_loop: true, ..ctx };

        let kind = match iterable.ty.sort() {
            Sort::Array => {
                let elem = iterable.ty.element();
                // For-each permits narrowing into the loop variable.
                let var_cast = self.cast_op_between(elem, var_ty, loc)?;
                let array_slot = self.locals.declare("#array", iterable.ty, true, loc)?.slot;
                let index_slot = self.locals.declare("#index", core.int, true, loc)?.slot;
                let (body_block, _) = self.block(body, loop_ctx, Tail::Loop)?;
                TStmtKind::EachArray {
                    var_slot: var.slot,
                    var_cast,
                    array_slot,
                    index_slot,
                    iterable,
                    body: body_block,
                }
            }
            Sort::Def => {
                let iter_ty = self.registry.lookup_type("Iterator").unwrap_or(core.def);
                let iter_slot = self.locals.declare("#iterator", iter_ty, true, loc)?.slot;
                let (has_next, next) = self.iterator_methods(loc)?;
                let var_cast = self.cast_op_between(core.def, var_ty, loc)?;
                let (body_block, _) = self.block(body, loop_ctx, Tail::Loop)?;
                TStmtKind::EachIterable {
                    var_slot: var.slot,
                    var_cast,
                    iter_slot,
                    iterable,
                    iterator: None,
                    has_next,
                    next,
                    body: body_block,
                }
            }
            Sort::Object => {
                let receiver = iterable.ty.struct_id;
                let key = crate::registry::MethodKey::new("iterator", 0);
                let Some(method) = self.registry.lookup_method(receiver, &key) else {
                    return Err(CompileError::resolution(
                        format!("Illegal for-each over type [{}].", self.registry.type_name(iterable.ty)),
                        loc,
                    ));
                };
                let iterator = crate::typed::MethodSpec {
                    owner: method.owner,
                    key,
                    returns_void: false,
                };
                let iter_ty = self.registry.lookup_type("Iterator").unwrap_or(core.def);
                let iter_slot = self.locals.declare("#iterator", iter_ty, true, loc)?.slot;
                let (has_next, next) = self.iterator_methods(loc)?;
                let var_cast = self.cast_op_between(core.def, var_ty, loc)?;
                let (body_block, _) = self.block(body, loop_ctx, Tail::Loop)?;
                TStmtKind::EachIterable {
                    var_slot: var.slot,
                    var_cast,
                    iter_slot,
                    iterable,
                    iterator: Some(iterator),
                    has_next,
                    next,
                    body: body_block,
                }
            }
            _ => {
                return Err(CompileError::resolution(
                    format!("Illegal for-each over type [{}].", self.registry.type_name(iterable.ty)),
                    loc,
                ));
            }
        };
        self.locals.pop_block();
        let flow = Flow {
            statement_count: 1,
            ..Flow::default()
        };
        Ok((kind, flow))
    }

    fn iterator_methods(
        &self,
        loc: Loc,
    ) -> Result<(crate::typed::MethodSpec, crate::typed::MethodSpec), CompileError> {
        let iterator = self
            .registry
            .lookup_struct("Iterator")
            .ok_or_else(|| CompileError::resolution("Unknown type [Iterator].", loc))?;
        let has_next_key = crate::registry::MethodKey::new("hasNext", 0);
        let next_key = crate::registry::MethodKey::new("next", 0);
        let has_next = self
            .registry
            .lookup_method(iterator, &has_next_key)
            .ok_or_else(|| CompileError::resolution("Unknown method [hasNext/0] for type [Iterator].", loc))?;
        let next = self
            .registry
            .lookup_method(iterator, &next_key)
            .ok_or_else(|| CompileError::resolution("Unknown method [next/0] for type [Iterator].", loc))?;
        Ok((
            crate::typed::MethodSpec {
                owner: has_next.owner,
                key: has_next_key,
                returns_void: false,
            },
            crate::typed::MethodSpec {
                owner: next.owner,
                key: next_key,
                returns_void: false,
            },
        ))
    }

    /// Resolves the loop-variable conversion for a for-each, allowing
    /// explicit (narrowing) transforms as the construct does.
    fn cast_op_between(&self, from: Ty, to: Ty, loc: Loc) -> Result<Option<crate::typed::CastOp>, CompileError> {
        if from == to {
            return Ok(None);
        }
        let Some(transform) = self.registry.lookup_cast(from, to, true) else {
            return Err(CompileError::type_error(
                format!(
                    "Cannot cast from [{}] to [{}].",
                    self.registry.type_name(from),
                    self.registry.type_name(to)
                ),
                loc,
            ));
        };
        Ok(Some(self.cast_op(transform)))
    }
}

/// Folds the flow of two alternative paths (if/else branches, a try body
/// against a handler).
///
/// A path that leaves the method also leaves any enclosing loop, so a merged
/// all-escape always carries at least one of the escape flags with it.
fn merge_paths(a: Flow, b: Flow) -> Flow {
    Flow {
        method_escape: a.method_escape && b.method_escape,
        loop_escape: (a.method_escape || a.loop_escape) && (b.method_escape || b.loop_escape),
        all_escape: a.all_escape && b.all_escape,
        any_continue: a.any_continue || b.any_continue,
        any_break: a.any_break || b.any_break,
        statement_count: 1,
    }
}

/// Statement position accepts assignments, calls, and constructions.
fn is_statement_expr(expr: &TExpr) -> bool {
    match &expr.kind {
        TExprKind::Assign { .. } => true,
        TExprKind::Chain { links } => matches!(
            links.last(),
            Some(TLink::Call { .. } | TLink::StaticCall { .. } | TLink::DynCall { .. } | TLink::New { .. } | TLink::LocalCall { .. })
        ),
        _ => false,
    }
}
