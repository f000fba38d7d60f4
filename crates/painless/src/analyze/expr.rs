//! Expression analysis.
//!
//! The parent imposes `expected` before a child is visited; the child
//! resolves its actual type bottom-up and [`Analyzer::cast`] reconciles the
//! two through the registry, either folding a constant through a numeric
//! coercion or wrapping the node in an explicit cast. A missing transform is
//! a type error at the child's location.

use crate::{
    ast::{BinOp, BoolOp, CompOp, Expr, ExprLoc, UnaryOp},
    error::{CompileError, Loc},
    registry::{Sort, Transform, Ty},
    typed::{CastKind, CastOp, Compound, Const, TExpr, TExprKind, TLink},
};

use super::Analyzer;

impl Analyzer<'_> {
    /// Analyzes an expression under an optional context type.
    ///
    /// When `expected` is set the returned node's type equals it; `explicit`
    /// is true only inside an explicit cast expression.
    pub(crate) fn expr(&mut self, e: &ExprLoc, expected: Option<Ty>, explicit: bool) -> Result<TExpr, CompileError> {
        let core = *self.registry.core();
        let loc = e.loc;
        let actual = match &e.expr {
            Expr::Int(value) => TExpr::constant(loc, core.int, Const::Int(*value)),
            Expr::Long(value) => TExpr::constant(loc, core.long, Const::Long(*value)),
            Expr::Float(value) => TExpr::constant(loc, core.float, Const::Float(*value)),
            Expr::Double(value) => TExpr::constant(loc, core.double, Const::Double(*value)),
            Expr::Bool(value) => TExpr::constant(loc, core.bool, Const::Bool(*value)),
            Expr::Str(value) => TExpr::constant(loc, core.string, Const::Str(value.clone())),
            Expr::Null => {
                let ty = match expected {
                    Some(expected) if !expected.sort().is_primitive() => expected,
                    Some(expected) => {
                        return Err(CompileError::type_error(
                            format!(
                                "Cannot cast null to a primitive type [{}].",
                                self.registry.type_name(expected)
                            ),
                            loc,
                        ));
                    }
                    None => core.object,
                };
                return Ok(TExpr::constant(loc, ty, Const::Null));
            }
            Expr::Regex { pattern, flags } => self.regex_literal(pattern, flags, loc)?,
            Expr::Unary { op, operand } => self.unary(*op, operand, loc)?,
            Expr::Cast { ty, operand } => {
                let target = self.resolve_type(&ty.name, ty.dims, ty.loc)?;
                let operand = self.expr(operand, Some(target), true)?;
                // The explicit cast node dissolves into its (converted) child.
                operand
            }
            Expr::Binary { op, left, right } => self.binary(*op, left, right, loc)?,
            Expr::Logical { op, left, right } => self.bool_op(*op, left, right, loc)?,
            Expr::Comp { op, left, right } => self.comparison(*op, left, right, loc)?,
            Expr::RegexOp {
                operand,
                pattern,
                matches_all,
            } => self.regex_op(operand, pattern, *matches_all, loc)?,
            Expr::Ternary { cond, then, orelse } => self.ternary(cond, then, orelse, expected, loc)?,
            Expr::Instanceof { operand, ty } => self.instance_of(operand, ty, loc)?,
            Expr::Assign { target, op, value } => self.assign(target, *op, value, false, loc)?,
            Expr::Inc { target, delta, post } => self.increment(target, *delta, *post, loc)?,
            Expr::Chain { links } => {
                let (tlinks, ty) = self.chain(links, false)?;
                TExpr {
                    loc,
                    ty,
                    constant: None,
                    kind: TExprKind::Chain { links: tlinks },
                }
            }
            Expr::Lambda { params, body } => {
                let lambda = self.lambda(params, body, expected, loc)?;
                return Ok(lambda);
            }
            Expr::FuncRef(kind) => {
                let fr = self.func_ref(kind, expected, loc)?;
                return Ok(fr);
            }
            Expr::ListInit(items) => {
                let ty = self
                    .registry
                    .lookup_type("ArrayList")
                    .ok_or_else(|| CompileError::resolution("Unknown type [ArrayList].", loc))?;
                let items = items
                    .iter()
                    .map(|item| self.expr(item, Some(core.def), false))
                    .collect::<Result<Vec<_>, _>>()?;
                TExpr {
                    loc,
                    ty,
                    constant: None,
                    kind: TExprKind::ListInit { items },
                }
            }
            Expr::MapInit(pairs) => {
                let ty = self
                    .registry
                    .lookup_type("HashMap")
                    .ok_or_else(|| CompileError::resolution("Unknown type [HashMap].", loc))?;
                let pairs = pairs
                    .iter()
                    .map(|(key, value)| {
                        Ok((
                            self.expr(key, Some(core.def), false)?,
                            self.expr(value, Some(core.def), false)?,
                        ))
                    })
                    .collect::<Result<Vec<_>, CompileError>>()?;
                TExpr {
                    loc,
                    ty,
                    constant: None,
                    kind: TExprKind::MapInit { pairs },
                }
            }
        };
        match expected {
            Some(expected) => self.cast(actual, expected, explicit),
            None => Ok(actual),
        }
    }

    /// Reconciles `actual` with the context's type through the registry.
    pub(crate) fn cast(&self, actual: TExpr, expected: Ty, explicit: bool) -> Result<TExpr, CompileError> {
        if actual.ty == expected {
            return Ok(actual);
        }
        let Some(transform) = self.registry.lookup_cast(actual.ty, expected, explicit) else {
            return Err(CompileError::type_error(
                format!(
                    "Cannot cast from [{}] to [{}].",
                    self.registry.type_name(actual.ty),
                    self.registry.type_name(expected)
                ),
                actual.loc,
            ));
        };
        // Constants fold straight through plain numeric coercions.
        if transform.bridge.is_none()
            && let Some(constant) = &actual.constant
            && let Some(folded) = constant.coerce(expected.sort())
        {
            return Ok(TExpr::constant(actual.loc, expected, folded));
        }
        let cast = self.cast_op(transform);
        Ok(TExpr {
            loc: actual.loc,
            ty: expected,
            constant: None,
            kind: TExprKind::Cast {
                cast,
                operand: Box::new(actual),
            },
        })
    }

    /// Materializes a registry transform for emission.
    pub(crate) fn cast_op(&self, transform: &Transform) -> CastOp {
        let kind = match &transform.bridge {
            None => {
                if transform.from.sort().is_numeric() && transform.to.sort().is_numeric() {
                    CastKind::Coerce
                } else {
                    CastKind::Identity
                }
            }
            Some(bridge) => {
                let method = self
                    .registry
                    .lookup_static(bridge.owner, &bridge.key)
                    .expect("bridge resolved at freeze");
                let upcast = transform.upcast.and_then(|up| {
                    (transform.from.sort().is_numeric() && up.sort().is_numeric() && transform.from.sort() != up.sort())
                        .then_some((transform.from.sort(), up.sort()))
                });
                let downcast = transform.downcast.and_then(|down| {
                    (method.ret.sort().is_numeric() && down.sort().is_numeric() && method.ret.sort() != down.sort())
                        .then_some((method.ret.sort(), down.sort()))
                });
                CastKind::Bridge {
                    owner: bridge.owner,
                    key: bridge.key.clone(),
                    upcast,
                    downcast,
                }
            }
        };
        CastOp {
            from: transform.from,
            to: transform.to,
            kind,
        }
    }

    fn regex_literal(&self, pattern: &str, flags: &str, loc: Loc) -> Result<TExpr, CompileError> {
        let source = if flags.is_empty() {
            pattern.to_string()
        } else {
            format!("(?{flags}){pattern}")
        };
        if let Err(err) = regex::Regex::new(&source) {
            return Err(CompileError::constant(
                format!("Invalid regex constant [/{pattern}/{flags}]: {err}"),
                loc,
            ));
        }
        let ty = self
            .registry
            .lookup_type("Pattern")
            .ok_or_else(|| CompileError::resolution("Unknown type [Pattern].", loc))?;
        Ok(TExpr {
            loc,
            ty,
            constant: None,
            kind: TExprKind::Regex {
                pattern: pattern.into(),
                flags: flags.into(),
            },
        })
    }

    fn unary(&mut self, op: UnaryOp, operand: &ExprLoc, loc: Loc) -> Result<TExpr, CompileError> {
        let core = *self.registry.core();
        match op {
            UnaryOp::Not => {
                let operand = self.expr(operand, Some(core.bool), false)?;
                if let Some(Const::Bool(value)) = operand.constant {
                    return Ok(TExpr::constant(loc, core.bool, Const::Bool(!value)));
                }
                Ok(TExpr {
                    loc,
                    ty: core.bool,
                    constant: None,
                    kind: TExprKind::Unary {
                        op,
                        sort: Sort::Bool,
                        operand: Box::new(operand),
                    },
                })
            }
            UnaryOp::BitNot => {
                let inner = self.expr(operand, None, false)?;
                let promoted = self
                    .registry
                    .promote_unary(inner.ty)
                    .filter(|p| matches!(p.sort(), Sort::Int | Sort::Long | Sort::Def))
                    .ok_or_else(|| {
                        CompileError::type_error(
                            format!("Cannot apply [~] to type [{}].", self.registry.type_name(inner.ty)),
                            loc,
                        )
                    })?;
                let inner = self.cast(inner, promoted, false)?;
                match &inner.constant {
                    Some(Const::Int(value)) => Ok(TExpr::constant(loc, promoted, Const::Int(!value))),
                    Some(Const::Long(value)) => Ok(TExpr::constant(loc, promoted, Const::Long(!value))),
                    _ => Ok(TExpr {
                        loc,
                        ty: promoted,
                        constant: None,
                        kind: TExprKind::Unary {
                            op,
                            sort: promoted.sort(),
                            operand: Box::new(inner),
                        },
                    }),
                }
            }
            UnaryOp::Minus | UnaryOp::Plus => {
                let inner = self.expr(operand, None, false)?;
                let promoted = self.registry.promote_unary(inner.ty).ok_or_else(|| {
                    CompileError::type_error(
                        format!(
                            "Cannot apply [{}] to type [{}].",
                            if op == UnaryOp::Minus { "-" } else { "+" },
                            self.registry.type_name(inner.ty)
                        ),
                        loc,
                    )
                })?;
                let inner = self.cast(inner, promoted, false)?;
                if op == UnaryOp::Plus {
                    return Ok(inner);
                }
                match &inner.constant {
                    Some(Const::Int(value)) => Ok(TExpr::constant(loc, promoted, Const::Int(value.wrapping_neg()))),
                    Some(Const::Long(value)) => Ok(TExpr::constant(loc, promoted, Const::Long(value.wrapping_neg()))),
                    Some(Const::Float(value)) => Ok(TExpr::constant(loc, promoted, Const::Float(-value))),
                    Some(Const::Double(value)) => Ok(TExpr::constant(loc, promoted, Const::Double(-value))),
                    _ => Ok(TExpr {
                        loc,
                        ty: promoted,
                        constant: None,
                        kind: TExprKind::Unary {
                            op,
                            sort: promoted.sort(),
                            operand: Box::new(inner),
                        },
                    }),
                }
            }
        }
    }

    fn binary(&mut self, op: BinOp, left: &ExprLoc, right: &ExprLoc, loc: Loc) -> Result<TExpr, CompileError> {
        let core = *self.registry.core();
        let tleft = self.expr(left, None, false)?;
        let tright = self.expr(right, None, false)?;

        let promoted = match op {
            BinOp::Add => self.registry.promote_add(tleft.ty, tright.ty),
            BinOp::Shl | BinOp::Shr | BinOp::Ushr => self.registry.promote_shift(tleft.ty, tright.ty),
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
                self.registry.promote_binary(tleft.ty, tright.ty).filter(|p| {
                    matches!(p.sort(), Sort::Bool | Sort::Int | Sort::Long | Sort::Def)
                })
            }
            _ => self
                .registry
                .promote_binary(tleft.ty, tright.ty)
                .filter(|p| p.sort().is_numeric() || p.sort() == Sort::Def),
        };
        let Some(promoted) = promoted else {
            return Err(CompileError::type_error(
                format!(
                    "Cannot apply [{}] to types [{}] and [{}].",
                    op.symbol(),
                    self.registry.type_name(tleft.ty),
                    self.registry.type_name(tright.ty)
                ),
                loc,
            ));
        };

        // String promotion is concatenation: children keep their own types.
        if op == BinOp::Add && promoted == core.string {
            if let (Some(l), Some(r)) = (&tleft.constant, &tright.constant) {
                let folded = Const::Str(format!("{}{}", const_text(l), const_text(r)).into());
                return Ok(TExpr::constant(loc, core.string, folded));
            }
            return Ok(TExpr {
                loc,
                ty: core.string,
                constant: None,
                kind: TExprKind::StrConcat {
                    left: Box::new(tleft),
                    right: Box::new(tright),
                },
            });
        }

        let (tleft, tright) = if matches!(op, BinOp::Shl | BinOp::Shr | BinOp::Ushr) && promoted.sort() != Sort::Def {
            // Shift counts are ints regardless of the left operand's width.
            (self.cast(tleft, promoted, false)?, self.cast(tright, core.int, true)?)
        } else {
            (self.cast(tleft, promoted, false)?, self.cast(tright, promoted, false)?)
        };

        if let (Some(l), Some(r)) = (&tleft.constant, &tright.constant)
            && let Some(folded) = fold_binary(op, l, r, loc)?
        {
            return Ok(TExpr::constant(loc, promoted, folded));
        }

        Ok(TExpr {
            loc,
            ty: promoted,
            constant: None,
            kind: TExprKind::Binary {
                op,
                sort: promoted.sort(),
                left: Box::new(tleft),
                right: Box::new(tright),
            },
        })
    }

    fn bool_op(&mut self, op: BoolOp, left: &ExprLoc, right: &ExprLoc, loc: Loc) -> Result<TExpr, CompileError> {
        let core = *self.registry.core();
        let tleft = self.expr(left, Some(core.bool), false)?;
        let tright = self.expr(right, Some(core.bool), false)?;
        if let (Some(Const::Bool(l)), Some(Const::Bool(r))) = (&tleft.constant, &tright.constant) {
            let folded = match op {
                BoolOp::And => *l && *r,
                BoolOp::Or => *l || *r,
            };
            return Ok(TExpr::constant(loc, core.bool, Const::Bool(folded)));
        }
        Ok(TExpr {
            loc,
            ty: core.bool,
            constant: None,
            kind: TExprKind::Bool {
                op,
                left: Box::new(tleft),
                right: Box::new(tright),
            },
        })
    }

    fn comparison(&mut self, op: CompOp, left: &ExprLoc, right: &ExprLoc, loc: Loc) -> Result<TExpr, CompileError> {
        let core = *self.registry.core();
        let tleft = self.expr(left, None, false)?;
        let tright = self.expr(right, None, false)?;
        let promoted = match op {
            CompOp::Eq | CompOp::Ne => self.registry.promote_equality(tleft.ty, tright.ty),
            _ => self
                .registry
                .promote_binary(tleft.ty, tright.ty)
                .filter(|p| p.sort().is_numeric() || p.sort() == Sort::Def),
        };
        let Some(promoted) = promoted else {
            return Err(CompileError::type_error(
                format!(
                    "Cannot apply [{}] to types [{}] and [{}].",
                    op.symbol(),
                    self.registry.type_name(tleft.ty),
                    self.registry.type_name(tright.ty)
                ),
                loc,
            ));
        };
        let tleft = self.cast(tleft, promoted, false)?;
        let tright = self.cast(tright, promoted, false)?;
        if let (Some(l), Some(r)) = (&tleft.constant, &tright.constant)
            && let Some(folded) = fold_comparison(op, l, r)
        {
            return Ok(TExpr::constant(loc, core.bool, Const::Bool(folded)));
        }
        Ok(TExpr {
            loc,
            ty: core.bool,
            constant: None,
            kind: TExprKind::Comp {
                op,
                sort: promoted.sort(),
                left: Box::new(tleft),
                right: Box::new(tright),
            },
        })
    }

    /// `value =~ /p/` and `value ==~ /p/` lower to
    /// `pattern.matcher(value).find()` / `.matches()`.
    fn regex_op(
        &mut self,
        operand: &ExprLoc,
        pattern: &ExprLoc,
        matches_all: bool,
        loc: Loc,
    ) -> Result<TExpr, CompileError> {
        let core = *self.registry.core();
        let pattern_ty = self
            .registry
            .lookup_type("Pattern")
            .ok_or_else(|| CompileError::resolution("Unknown type [Pattern].", loc))?;
        let matcher_ty = self
            .registry
            .lookup_type("Matcher")
            .ok_or_else(|| CompileError::resolution("Unknown type [Matcher].", loc))?;
        let toperand = self.expr(operand, Some(core.string), false)?;
        let tpattern = self.expr(pattern, Some(pattern_ty), false)?;
        let matcher_key = crate::registry::MethodKey::new("matcher", 1);
        let matcher = self
            .registry
            .lookup_method(pattern_ty.struct_id, &matcher_key)
            .ok_or_else(|| CompileError::resolution("Unknown method [matcher/1] for type [Pattern].", loc))?;
        let verb = if matches_all { "matches" } else { "find" };
        let verb_key = crate::registry::MethodKey::new(verb, 0);
        let check = self
            .registry
            .lookup_method(matcher_ty.struct_id, &verb_key)
            .ok_or_else(|| {
                CompileError::resolution(format!("Unknown method [{verb}/0] for type [Matcher]."), loc)
            })?;
        Ok(TExpr {
            loc,
            ty: core.bool,
            constant: None,
            kind: TExprKind::Chain {
                links: vec![
                    TLink::Head {
                        expr: Box::new(tpattern),
                    },
                    TLink::Call {
                        method: crate::typed::MethodSpec {
                            owner: matcher.owner,
                            key: matcher_key,
                            returns_void: false,
                        },
                        args: vec![toperand],
                        ret: matcher_ty,
                    },
                    TLink::Call {
                        method: crate::typed::MethodSpec {
                            owner: check.owner,
                            key: verb_key,
                            returns_void: false,
                        },
                        args: vec![],
                        ret: core.bool,
                    },
                ],
            },
        })
    }

    fn ternary(
        &mut self,
        cond: &ExprLoc,
        then: &ExprLoc,
        orelse: &ExprLoc,
        expected: Option<Ty>,
        loc: Loc,
    ) -> Result<TExpr, CompileError> {
        let core = *self.registry.core();
        let tcond = self.expr(cond, Some(core.bool), false)?;
        let (tthen, torelse, ty) = match expected {
            Some(expected) => (
                self.expr(then, Some(expected), false)?,
                self.expr(orelse, Some(expected), false)?,
                expected,
            ),
            None => {
                let tthen = self.expr(then, None, false)?;
                let torelse = self.expr(orelse, None, false)?;
                let promoted = self
                    .registry
                    .promote_conditional(tthen.ty, torelse.ty)
                    .ok_or_else(|| {
                        CompileError::type_error(
                            format!(
                                "Cannot apply [?:] to types [{}] and [{}].",
                                self.registry.type_name(tthen.ty),
                                self.registry.type_name(torelse.ty)
                            ),
                            loc,
                        )
                    })?;
                let tthen = self.cast(tthen, promoted, false)?;
                let torelse = self.cast(torelse, promoted, false)?;
                (tthen, torelse, promoted)
            }
        };
        Ok(TExpr {
            loc,
            ty,
            constant: None,
            kind: TExprKind::Ternary {
                cond: Box::new(tcond),
                then: Box::new(tthen),
                orelse: Box::new(torelse),
            },
        })
    }

    fn instance_of(
        &mut self,
        operand: &ExprLoc,
        ty: &crate::ast::TypeName,
        loc: Loc,
    ) -> Result<TExpr, CompileError> {
        let core = *self.registry.core();
        let target = self.resolve_type(&ty.name, ty.dims, ty.loc)?;
        let toperand = self.expr(operand, None, false)?;
        if toperand.ty.sort() != Sort::Def {
            // The operand's static type decides at compile time.
            let matched = toperand.ty.dims == target.dims
                && self.registry.is_subtype(toperand.ty.struct_id, target.struct_id);
            return Ok(TExpr::constant(loc, core.bool, Const::Bool(matched)));
        }
        Ok(TExpr {
            loc,
            ty: core.bool,
            constant: None,
            kind: TExprKind::InstanceOf {
                operand: Box::new(toperand),
                target: target.struct_id,
            },
        })
    }

    fn increment(&mut self, target: &ExprLoc, delta: i8, post: bool, loc: Loc) -> Result<TExpr, CompileError> {
        let one = ExprLoc::new(loc, Expr::Int(i32::from(delta.abs())));
        let op = if delta >= 0 { BinOp::Add } else { BinOp::Sub };
        let mut assign = self.assign(target, Some(op), &one, post, loc)?;
        if let TExprKind::Assign { post: p, .. } = &mut assign.kind {
            *p = post;
        }
        Ok(assign)
    }

    pub(crate) fn assign(
        &mut self,
        target: &ExprLoc,
        op: Option<BinOp>,
        value: &ExprLoc,
        post: bool,
        loc: Loc,
    ) -> Result<TExpr, CompileError> {
        let core = *self.registry.core();
        let Expr::Chain { links } = &target.expr else {
            return Err(CompileError::type_error("Invalid assignment target.", loc));
        };
        let (tlinks, value_ty) = self.chain(links, true)?;
        self.check_store_target(&tlinks, loc)?;

        let (rhs, compound) = match op {
            None => (self.expr(value, Some(value_ty), false)?, None),
            Some(op) => {
                let rhs = self.expr(value, None, false)?;
                let promoted = match op {
                    BinOp::Add => self.registry.promote_add(value_ty, rhs.ty),
                    BinOp::Shl | BinOp::Shr | BinOp::Ushr => self.registry.promote_shift(value_ty, rhs.ty),
                    BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => self
                        .registry
                        .promote_binary(value_ty, rhs.ty)
                        .filter(|p| matches!(p.sort(), Sort::Bool | Sort::Int | Sort::Long | Sort::Def)),
                    _ => self
                        .registry
                        .promote_binary(value_ty, rhs.ty)
                        .filter(|p| p.sort().is_numeric() || p.sort() == Sort::Def),
                };
                let Some(promoted) = promoted else {
                    return Err(CompileError::type_error(
                        format!(
                            "Cannot apply compound [{}=] to types [{}] and [{}].",
                            op.symbol(),
                            self.registry.type_name(value_ty),
                            self.registry.type_name(rhs.ty)
                        ),
                        loc,
                    ));
                };
                let concat = op == BinOp::Add && promoted == core.string;
                let (rhs, there, back) = if concat {
                    // Concatenation keeps the operand types; the result is
                    // already the target's String type.
                    (rhs, None, None)
                } else {
                    let rhs = if matches!(op, BinOp::Shl | BinOp::Shr | BinOp::Ushr) && promoted.sort() != Sort::Def {
                        self.cast(rhs, core.int, true)?
                    } else {
                        self.cast(rhs, promoted, false)?
                    };
                    let there = self.compound_cast(value_ty, promoted, loc)?;
                    let back = self.compound_cast(promoted, value_ty, loc)?;
                    (rhs, there, back)
                };
                (
                    rhs,
                    Some(Compound {
                        op,
                        sort: promoted.sort(),
                        there,
                        back,
                        concat,
                    }),
                )
            }
        };
        Ok(TExpr {
            loc,
            ty: value_ty,
            constant: None,
            kind: TExprKind::Assign {
                links: tlinks,
                rhs: Box::new(rhs),
                compound,
                post,
                read: true,
            },
        })
    }

    /// Compound assignments may narrow on the way back, as the construct
    /// implies an explicit cast.
    fn compound_cast(&self, from: Ty, to: Ty, loc: Loc) -> Result<Option<CastOp>, CompileError> {
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

    fn check_store_target(&self, links: &[TLink], loc: Loc) -> Result<(), CompileError> {
        match links.last() {
            Some(TLink::Local { .. } | TLink::ArrayIndex { .. } | TLink::MapShortcut { .. }
                | TLink::ListShortcut { .. } | TLink::DynField { .. } | TLink::DynIndex { .. }) => Ok(()),
            Some(TLink::Field { readonly, .. }) => {
                if *readonly {
                    Err(CompileError::type_error("Cannot assign to a read-only field.", loc))
                } else {
                    Ok(())
                }
            }
            Some(TLink::GetterSetter { setter, .. }) => {
                if setter.is_none() {
                    Err(CompileError::type_error("Cannot assign to a read-only property.", loc))
                } else {
                    Ok(())
                }
            }
            Some(TLink::New { .. }) => Err(CompileError::type_error(
                "Cannot assign a value to a new call.",
                loc,
            )),
            Some(TLink::ArrayLength) => Err(CompileError::type_error(
                "Cannot assign to the length of an array.",
                loc,
            )),
            _ => Err(CompileError::type_error("Cannot assign to a method call.", loc)),
        }
    }
}

/// Text a constant contributes to a folded concatenation.
fn const_text(value: &Const) -> String {
    match value {
        Const::Null => "null".to_string(),
        Const::Bool(b) => b.to_string(),
        Const::Int(i) => i.to_string(),
        Const::Long(i) => i.to_string(),
        Const::Float(f) => ryu::Buffer::new().format(*f).to_string(),
        Const::Double(f) => ryu::Buffer::new().format(*f).to_string(),
        Const::Char(c) => c.to_string(),
        Const::Str(s) => s.to_string(),
    }
}

/// Folds a binary operator over two constants with the target VM's
/// semantics (wrapping integers, IEEE floats, masked shift counts).
/// Integer division by a constant zero is a compile-time error.
fn fold_binary(op: BinOp, left: &Const, right: &Const, loc: Loc) -> Result<Option<Const>, CompileError> {
    use crate::vm::dynamic::{shift_int, shift_long};
    let folded = match (left, right) {
        (Const::Bool(l), Const::Bool(r)) => match op {
            BinOp::BitAnd => Const::Bool(l & r),
            BinOp::BitOr => Const::Bool(l | r),
            BinOp::BitXor => Const::Bool(l ^ r),
            _ => return Ok(None),
        },
        (Const::Int(l), Const::Int(r)) => match op {
            BinOp::Add => Const::Int(l.wrapping_add(*r)),
            BinOp::Sub => Const::Int(l.wrapping_sub(*r)),
            BinOp::Mul => Const::Int(l.wrapping_mul(*r)),
            BinOp::Div => {
                if *r == 0 {
                    return Err(CompileError::constant("Division by zero.", loc));
                }
                Const::Int(l.wrapping_div(*r))
            }
            BinOp::Rem => {
                if *r == 0 {
                    return Err(CompileError::constant("Division by zero.", loc));
                }
                Const::Int(l.wrapping_rem(*r))
            }
            BinOp::Shl | BinOp::Shr | BinOp::Ushr => Const::Int(shift_int(op, *l, i64::from(*r))),
            BinOp::BitAnd => Const::Int(l & r),
            BinOp::BitOr => Const::Int(l | r),
            BinOp::BitXor => Const::Int(l ^ r),
        },
        (Const::Long(l), Const::Long(r)) => match op {
            BinOp::Add => Const::Long(l.wrapping_add(*r)),
            BinOp::Sub => Const::Long(l.wrapping_sub(*r)),
            BinOp::Mul => Const::Long(l.wrapping_mul(*r)),
            BinOp::Div => {
                if *r == 0 {
                    return Err(CompileError::constant("Division by zero.", loc));
                }
                Const::Long(l.wrapping_div(*r))
            }
            BinOp::Rem => {
                if *r == 0 {
                    return Err(CompileError::constant("Division by zero.", loc));
                }
                Const::Long(l.wrapping_rem(*r))
            }
            BinOp::Shl | BinOp::Shr | BinOp::Ushr => Const::Long(shift_long(op, *l, *r)),
            BinOp::BitAnd => Const::Long(l & r),
            BinOp::BitOr => Const::Long(l | r),
            BinOp::BitXor => Const::Long(l ^ r),
        },
        // Long shifts take an int count after the shift-operand cast.
        (Const::Long(l), Const::Int(r)) if matches!(op, BinOp::Shl | BinOp::Shr | BinOp::Ushr) => {
            Const::Long(shift_long(op, *l, i64::from(*r)))
        }
        (Const::Float(l), Const::Float(r)) => match op {
            BinOp::Add => Const::Float(l + r),
            BinOp::Sub => Const::Float(l - r),
            BinOp::Mul => Const::Float(l * r),
            BinOp::Div => Const::Float(l / r),
            BinOp::Rem => Const::Float(l % r),
            _ => return Ok(None),
        },
        (Const::Double(l), Const::Double(r)) => match op {
            BinOp::Add => Const::Double(l + r),
            BinOp::Sub => Const::Double(l - r),
            BinOp::Mul => Const::Double(l * r),
            BinOp::Div => Const::Double(l / r),
            BinOp::Rem => Const::Double(l % r),
            _ => return Ok(None),
        },
        _ => return Ok(None),
    };
    Ok(Some(folded))
}

fn fold_comparison(op: CompOp, left: &Const, right: &Const) -> Option<bool> {
    let ordering = match (left, right) {
        (Const::Bool(l), Const::Bool(r)) => {
            return match op {
                CompOp::Eq => Some(l == r),
                CompOp::Ne => Some(l != r),
                _ => None,
            };
        }
        (Const::Int(l), Const::Int(r)) => (f64::from(*l), f64::from(*r)),
        (Const::Long(l), Const::Long(r)) => (*l as f64, *r as f64),
        (Const::Float(l), Const::Float(r)) => (f64::from(*l), f64::from(*r)),
        (Const::Double(l), Const::Double(r)) => (*l, *r),
        _ => return None,
    };
    let (l, r) = ordering;
    Some(match op {
        CompOp::Eq => l == r,
        CompOp::Ne => l != r,
        CompOp::Lt => l < r,
        CompOp::Le => l <= r,
        CompOp::Gt => l > r,
        CompOp::Ge => l >= r,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_binary_wraps_like_the_target_vm() {
        let loc = Loc::default();
        let out = fold_binary(BinOp::Add, &Const::Int(i32::MAX), &Const::Int(1), loc)
            .unwrap()
            .unwrap();
        assert_eq!(out, Const::Int(i32::MIN));
        let out = fold_binary(BinOp::Mul, &Const::Int(3), &Const::Int(4), loc).unwrap().unwrap();
        assert_eq!(out, Const::Int(12));
    }

    #[test]
    fn test_fold_division_by_zero_is_an_error() {
        let loc = Loc::default();
        let err = fold_binary(BinOp::Div, &Const::Int(1), &Const::Int(0), loc).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Constant);
        assert!(fold_binary(BinOp::Rem, &Const::Long(1), &Const::Long(0), loc).is_err());
        // Floating division by zero folds to infinity instead.
        let out = fold_binary(BinOp::Div, &Const::Double(1.0), &Const::Double(0.0), loc)
            .unwrap()
            .unwrap();
        assert_eq!(out, Const::Double(f64::INFINITY));
    }

    #[test]
    fn test_fold_shifts_mask_the_count() {
        let loc = Loc::default();
        let out = fold_binary(BinOp::Shl, &Const::Int(1), &Const::Int(33), loc).unwrap().unwrap();
        assert_eq!(out, Const::Int(2));
        let out = fold_binary(BinOp::Ushr, &Const::Int(-1), &Const::Int(28), loc).unwrap().unwrap();
        assert_eq!(out, Const::Int(15));
    }

    #[test]
    fn test_fold_comparisons() {
        assert_eq!(fold_comparison(CompOp::Lt, &Const::Int(1), &Const::Int(2)), Some(true));
        assert_eq!(fold_comparison(CompOp::Eq, &Const::Bool(true), &Const::Bool(true)), Some(true));
        assert_eq!(fold_comparison(CompOp::Lt, &Const::Bool(true), &Const::Bool(false)), None);
    }
}
