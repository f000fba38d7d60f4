//! Lambda desugaring and function references.
//!
//! A lambda body is analyzed twice. The first pass is a discarded trial in a
//! capture-discovering scope that records which enclosing variables the body
//! reads. The lambda is then resynthesized as a top-level function with a
//! `def` return type and the captures as read-only prefix parameters, and
//! analyzed for real; the expression itself becomes a function reference
//! carrying the captured values. Nested lambdas desugar during the synthetic
//! function's own analysis, after it is registered, so deeper references can
//! resolve it.

use smallvec::SmallVec;

use crate::{
    ast::{FuncRefKind, LambdaBody, LambdaParam, Stmt, StmtLoc},
    error::{CompileError, Loc},
    registry::{MethodKey, Sort, Ty},
    typed::{FuncRefData, FuncTargetSpec, TExpr, TExprKind},
};

use super::{Analyzer, StmtCtx, Tail, Variable};

impl Analyzer<'_> {
    pub(crate) fn lambda(
        &mut self,
        params: &[LambdaParam],
        body: &LambdaBody,
        expected: Option<Ty>,
        loc: Loc,
    ) -> Result<TExpr, CompileError> {
        let core = *self.registry.core();
        let (iface, sam_key, sam_args, _sam_ret) = self.functional_target(expected, loc)?;
        if params.len() != usize::from(sam_key.arity) {
            return Err(CompileError::type_error(
                format!(
                    "Incorrect number of parameters: expected {} for [{}] in [{}].",
                    sam_key.arity,
                    sam_key,
                    self.registry.type_name(iface)
                ),
                loc,
            ));
        }

        let mut declared: Vec<(Box<str>, Ty)> = Vec::with_capacity(params.len());
        for (param, &sam_ty) in params.iter().zip(sam_args.iter()) {
            let ty = match &param.ty {
                Some(ty) => self.resolve_type(&ty.name, ty.dims, ty.loc)?,
                None => sam_ty,
            };
            declared.push((param.name.clone(), ty));
        }

        let body_stmts: Vec<StmtLoc> = match body {
            LambdaBody::Expr(value) => vec![StmtLoc {
                loc: value.loc,
                stmt: Stmt::Return(Some((**value).clone())),
            }],
            LambdaBody::Block(stmts) => stmts.clone(),
        };

        let captures = self.lambda_trial(&declared, &body_stmts, loc)?;

        // Synthesize under a unique name; captures prefix the parameters.
        let name: Box<str> = format!("lambda${}", self.synth_count).into();
        self.synth_count += 1;
        let mut sig_params: Vec<(Box<str>, Ty)> = Vec::with_capacity(captures.len() + declared.len());
        sig_params.extend(captures.iter().map(|c| (c.name.clone(), c.ty)));
        sig_params.extend(declared.iter().cloned());
        let id = self.register_sig(name, core.def, sig_params, true, body_stmts, loc)?;
        self.analyze_function(usize::from(id))?;

        // The captured values are read from the enclosing scope at the
        // reference site and passed as invocation-time arguments.
        let capture_reads = self.capture_reads(&captures, loc)?;
        Ok(TExpr {
            loc,
            ty: iface,
            constant: None,
            kind: TExprKind::FuncRef {
                fr: FuncRefData {
                    iface: iface.struct_id,
                    sam: sam_key,
                    target: FuncTargetSpec::Script { id },
                },
                captures: capture_reads,
            },
        })
    }

    /// Trial analysis in a capture-discovering scope. Every registration the
    /// trial performs (nested synthetics included) is rolled back; only the
    /// discovered captures survive.
    fn lambda_trial(
        &mut self,
        params: &[(Box<str>, Ty)],
        body: &[StmtLoc],
        loc: Loc,
    ) -> Result<Vec<Variable>, CompileError> {
        let core = *self.registry.core();
        let sig_len = self.sigs.len();
        let synth_count = self.synth_count;

        self.locals.push_frame(true);
        let mut declared = Ok(());
        for (name, ty) in params {
            if let Err(err) = self.declare_var(name, *ty, false, loc) {
                declared = Err(err);
                break;
            }
        }
        let ctx = StmtCtx {
            in_loop: false,
            tail: Tail::None,
            ret: core.def,
            ret_void: false,
        };
        let analyzed = match declared {
            Ok(()) => self.block(body, ctx, Tail::None).map(|_| ()),
            Err(err) => Err(err),
        };
        let (_, captures) = self.locals.pop_frame();

        // Roll back trial-time registrations.
        self.sigs.truncate(sig_len);
        self.pending.truncate(sig_len);
        self.done.truncate(sig_len);
        self.by_key.retain(|_, id| usize::from(*id) < sig_len);
        self.synth_count = synth_count;

        analyzed?;
        Ok(captures)
    }

    fn capture_reads(&mut self, captures: &[Variable], loc: Loc) -> Result<Vec<TExpr>, CompileError> {
        captures
            .iter()
            .map(|capture| {
                let var = self.locals.lookup(&capture.name, loc)?;
                Ok(TExpr {
                    loc,
                    ty: var.ty,
                    constant: None,
                    kind: TExprKind::Local { slot: var.slot },
                })
            })
            .collect()
    }

    pub(crate) fn func_ref(
        &mut self,
        kind: &FuncRefKind,
        expected: Option<Ty>,
        loc: Loc,
    ) -> Result<TExpr, CompileError> {
        let (iface, sam_key, _sam_args, _sam_ret) = self.functional_target(expected, loc)?;
        let sam_arity = usize::from(sam_key.arity);
        let (target, captures) = match kind {
            FuncRefKind::TypeMethod { ty, name } => {
                let owner = self.resolve_type(&ty.name, ty.dims, ty.loc)?;
                let static_key = MethodKey::new(name, sam_arity);
                if let Some(method) = self.registry.lookup_static(owner.struct_id, &static_key) {
                    (
                        FuncTargetSpec::NativeStatic {
                            owner: method.owner,
                            key: static_key,
                        },
                        Vec::new(),
                    )
                } else if sam_arity >= 1 {
                    // Virtual flavor: the first interface argument becomes
                    // the receiver, so the implementation takes one less.
                    let virtual_key = MethodKey::new(name, sam_arity - 1);
                    let Some(method) = self.registry.lookup_method(owner.struct_id, &virtual_key) else {
                        return Err(CompileError::resolution(
                            format!(
                                "Unknown method reference [{}::{name}] for [{}].",
                                self.registry.type_name(owner),
                                self.registry.type_name(iface)
                            ),
                            loc,
                        ));
                    };
                    (
                        FuncTargetSpec::NativeVirtual {
                            owner: method.owner,
                            key: virtual_key,
                        },
                        Vec::new(),
                    )
                } else {
                    return Err(CompileError::resolution(
                        format!(
                            "Unknown method reference [{}::{name}] for [{}].",
                            self.registry.type_name(owner),
                            self.registry.type_name(iface)
                        ),
                        loc,
                    ));
                }
            }
            FuncRefKind::TypeNew { ty } => {
                let owner = self.resolve_type(&ty.name, ty.dims, ty.loc)?;
                let arity = u8::try_from(sam_arity).expect("sam arity fits u8");
                if self.registry.lookup_ctor(owner.struct_id, arity).is_none() {
                    return Err(CompileError::resolution(
                        format!("Unknown constructor reference [{}::new].", self.registry.type_name(owner)),
                        loc,
                    ));
                }
                (
                    FuncTargetSpec::Ctor {
                        owner: owner.struct_id,
                        arity,
                    },
                    Vec::new(),
                )
            }
            FuncRefKind::Capturing { var, name } => {
                let variable = self.locals.lookup(var, loc)?;
                if variable.ty.sort() != Sort::Object || variable.ty.dims > 0 {
                    return Err(CompileError::resolution(
                        format!(
                            "Cannot create a capturing reference on type [{}].",
                            self.registry.type_name(variable.ty)
                        ),
                        loc,
                    ));
                }
                // The receiver is captured, so the implementation's arity
                // matches the interface method's.
                let key = MethodKey::new(name, sam_arity);
                let Some(method) = self.registry.lookup_method(variable.ty.struct_id, &key) else {
                    return Err(CompileError::resolution(
                        format!(
                            "Unknown method reference [{var}::{name}] for type [{}].",
                            self.registry.type_name(variable.ty)
                        ),
                        loc,
                    ));
                };
                let receiver = TExpr {
                    loc,
                    ty: variable.ty,
                    constant: None,
                    kind: TExprKind::Local { slot: variable.slot },
                };
                (
                    FuncTargetSpec::NativeVirtual {
                        owner: method.owner,
                        key,
                    },
                    vec![receiver],
                )
            }
            FuncRefKind::Local { name } => {
                let arity = u8::try_from(sam_arity).expect("sam arity fits u8");
                let Some(&id) = self.by_key.get(&(name.clone(), arity)) else {
                    return Err(CompileError::resolution(
                        format!("Unknown function [{name}/{arity}] for a local reference."),
                        loc,
                    ));
                };
                (FuncTargetSpec::Script { id }, Vec::new())
            }
        };
        Ok(TExpr {
            loc,
            ty: iface,
            constant: None,
            kind: TExprKind::FuncRef {
                fr: FuncRefData {
                    iface: iface.struct_id,
                    sam: sam_key,
                    target,
                },
                captures,
            },
        })
    }

    /// The expected type of a lambda or function reference must be a
    /// functional interface: exactly one abstract method.
    fn functional_target(
        &self,
        expected: Option<Ty>,
        loc: Loc,
    ) -> Result<(Ty, MethodKey, SmallVec<[Ty; 4]>, Ty), CompileError> {
        let Some(expected) = expected else {
            return Err(CompileError::resolution(
                "A lambda or function reference requires a target functional interface type.",
                loc,
            ));
        };
        if expected.dims > 0 || expected.sort() != Sort::Object {
            return Err(CompileError::resolution(
                format!(
                    "Cannot convert a function reference to [{}]; not a functional interface.",
                    self.registry.type_name(expected)
                ),
                loc,
            ));
        }
        let Some(sam) = self.registry.functional(expected.struct_id) else {
            return Err(CompileError::resolution(
                format!(
                    "Cannot convert a function reference to [{}]; not a functional interface.",
                    self.registry.type_name(expected)
                ),
                loc,
            ));
        };
        Ok((expected, sam.key.clone(), sam.args.clone(), sam.ret))
    }
}
