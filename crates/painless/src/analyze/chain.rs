//! Chain analysis: one pass over the links, threading the running type.
//!
//! Each link resolves against the type the previous link produced: variables
//! against the scope stack, members against the registry, with the array
//! `length`, def, and Map/List shortcut specializations. The terminal link
//! of an assignment is the store site; everything else is loaded.

use crate::{
    ast::{Link, LinkLoc},
    error::{CompileError, Loc},
    registry::{MethodKey, Sort, Ty},
    typed::{Const, MethodSpec, TExpr, TLink},
};

use super::Analyzer;

impl Analyzer<'_> {
    /// Analyzes a chain, returning the typed links and the chain's type
    /// (the terminal link's value type).
    pub(crate) fn chain(&mut self, links: &[LinkLoc], store: bool) -> Result<(Vec<TLink>, Ty), CompileError> {
        let core = *self.registry.core();
        let mut out: Vec<TLink> = Vec::with_capacity(links.len());
        let mut before: Option<Ty> = None;
        let mut static_head: Option<Ty> = None;

        for (index, link) in links.iter().enumerate() {
            let loc = link.loc;
            let terminal = index == links.len() - 1;
            if let Some(ty) = before
                && ty.sort() == Sort::Void
            {
                return Err(CompileError::type_error("Cannot access a member of a void value.", loc));
            }
            let after: Ty = match &link.link {
                Link::Var(name) => {
                    let var = self.locals.lookup(name, loc)?;
                    match name.as_ref() {
                        "_score" => self.uses_score = true,
                        "ctx" => self.uses_ctx = true,
                        "doc" => self.uses_doc = true,
                        _ => {}
                    }
                    if store && terminal && var.readonly {
                        return Err(CompileError::type_error(
                            format!("Variable [{name}] is read-only."),
                            loc,
                        ));
                    }
                    out.push(TLink::Local {
                        slot: var.slot,
                        ty: var.ty,
                    });
                    var.ty
                }
                Link::CallLocal { name, args } => {
                    let arity = u8::try_from(args.len())
                        .map_err(|_| CompileError::limit("too many call arguments.", loc))?;
                    let Some(&id) = self.by_key.get(&(name.clone(), arity)) else {
                        return Err(CompileError::resolution(
                            format!("Unknown call [{name}/{arity}]."),
                            loc,
                        ));
                    };
                    let (ret, returns_void, param_tys) = {
                        let sig = &self.sigs[usize::from(id)];
                        (
                            sig.ret,
                            sig.returns_void,
                            sig.params.iter().map(|(_, ty)| *ty).collect::<Vec<_>>(),
                        )
                    };
                    let targs = args
                        .iter()
                        .zip(&param_tys)
                        .map(|(arg, &ty)| self.expr(arg, Some(ty), false))
                        .collect::<Result<Vec<_>, _>>()?;
                    out.push(TLink::LocalCall {
                        id,
                        args: targs,
                        ret,
                        returns_void,
                    });
                    ret
                }
                Link::Static(ty) => {
                    let resolved = self.resolve_type(&ty.name, ty.dims, ty.loc)?;
                    if resolved.dims > 0 || !matches!(resolved.sort(), Sort::Object) {
                        return Err(CompileError::type_error(
                            format!("Illegal static access on [{}].", self.registry.type_name(resolved)),
                            loc,
                        ));
                    }
                    static_head = Some(resolved);
                    continue;
                }
                Link::NewObj { ty, args } => {
                    let resolved = self.resolve_type(&ty.name, ty.dims, ty.loc)?;
                    let arity = u8::try_from(args.len())
                        .map_err(|_| CompileError::limit("too many constructor arguments.", loc))?;
                    let Some(ctor) = self.registry.lookup_ctor(resolved.struct_id, arity) else {
                        return Err(CompileError::resolution(
                            format!("Unknown constructor [{}/{arity}].", self.registry.type_name(resolved)),
                            loc,
                        ));
                    };
                    let arg_tys: Vec<Ty> = ctor.args.to_vec();
                    let targs = args
                        .iter()
                        .zip(&arg_tys)
                        .map(|(arg, &ty)| self.expr(arg, Some(ty), false))
                        .collect::<Result<Vec<_>, _>>()?;
                    out.push(TLink::New {
                        owner: resolved.struct_id,
                        arity,
                        args: targs,
                    });
                    resolved
                }
                Link::NewArray { ty, dims } => {
                    let elem = self.resolve_type(&ty.name, 0, ty.loc)?;
                    if elem.sort() == Sort::Void {
                        return Err(CompileError::type_error("Cannot create an array of [void].", loc));
                    }
                    let count = u8::try_from(dims.len())
                        .map_err(|_| CompileError::limit("too many array dimensions.", loc))?;
                    let core_int = core.int;
                    let tdims = dims
                        .iter()
                        .map(|dim| self.expr(dim, Some(core_int), false))
                        .collect::<Result<Vec<_>, _>>()?;
                    out.push(TLink::NewArray { elem, dims: tdims });
                    elem.array_of(count)
                }
                Link::Expr(inner) => {
                    let texpr = self.expr(inner, None, false)?;
                    let ty = texpr.ty;
                    out.push(TLink::Head {
                        expr: Box::new(texpr),
                    });
                    ty
                }
                Link::Field(name) => {
                    if let Some(owner) = static_head.take() {
                        self.static_field(&mut out, owner, name, store && terminal, loc)?
                    } else {
                        let receiver = before.ok_or_else(|| CompileError::illegal_tree(loc))?;
                        self.field(&mut out, receiver, name, loc)?
                    }
                }
                Link::Index(index) => {
                    let receiver = before.ok_or_else(|| CompileError::illegal_tree(loc))?;
                    self.index(&mut out, receiver, index, loc)?
                }
                Link::Call { name, args } => {
                    if let Some(owner) = static_head.take() {
                        self.static_call(&mut out, owner, name, args, loc)?
                    } else {
                        let receiver = before.ok_or_else(|| CompileError::illegal_tree(loc))?;
                        self.call(&mut out, receiver, name, args, loc)?
                    }
                }
            };
            before = Some(after);
        }
        if static_head.is_some() {
            // A bare type head (`Math;`) never reaches here; the parser
            // requires a member after the type.
            return Err(CompileError::illegal_tree(links.last().map_or(Loc::default(), |l| l.loc)));
        }
        let ty = before.ok_or_else(|| CompileError::illegal_tree(Loc::default()))?;
        Ok((out, ty))
    }

    fn static_field(
        &mut self,
        out: &mut Vec<TLink>,
        owner: Ty,
        name: &str,
        storing: bool,
        loc: Loc,
    ) -> Result<Ty, CompileError> {
        let Some(field) = self.registry.lookup_static_field(owner.struct_id, name) else {
            return Err(CompileError::resolution(
                format!("Unknown static field [{}.{name}].", self.registry.type_name(owner)),
                loc,
            ));
        };
        if storing && field.setter.is_none() {
            return Err(CompileError::type_error("Cannot assign to a read-only field.", loc));
        }
        let ty = field.ty;
        out.push(TLink::Field {
            owner: owner.struct_id,
            name: name.into(),
            ty,
            is_static: true,
            readonly: field.setter.is_none(),
        });
        Ok(ty)
    }

    fn field(&mut self, out: &mut Vec<TLink>, receiver: Ty, name: &str, loc: Loc) -> Result<Ty, CompileError> {
        let core = *self.registry.core();
        match receiver.sort() {
            Sort::Array => {
                if name == "length" {
                    out.push(TLink::ArrayLength);
                    return Ok(core.int);
                }
                Err(CompileError::resolution(
                    format!("Unknown field [{name}] for an array type."),
                    loc,
                ))
            }
            Sort::Def => {
                out.push(TLink::DynField { name: name.into() });
                Ok(core.def)
            }
            Sort::Object => {
                if let Some(field) = self.registry.lookup_field(receiver.struct_id, name) {
                    let ty = field.ty;
                    let readonly = field.setter.is_none();
                    out.push(TLink::Field {
                        owner: receiver.struct_id,
                        name: name.into(),
                        ty,
                        is_static: false,
                        readonly,
                    });
                    return Ok(ty);
                }
                // Synthesized get/set property shortcut.
                let getter = self
                    .lookup_accessor(receiver, &format!("get{}", capitalize(name)), 0)
                    .or_else(|| self.lookup_accessor(receiver, &format!("is{}", capitalize(name)), 0));
                let setter = self.lookup_accessor(receiver, &format!("set{}", capitalize(name)), 1);
                if getter.is_some() || setter.is_some() {
                    let ty = match (&getter, &setter) {
                        (Some((_, ret)), _) => *ret,
                        (None, Some((spec, _))) => {
                            let method = self
                                .registry
                                .lookup_method(spec.owner, &spec.key)
                                .expect("setter just resolved");
                            method.args[0]
                        }
                        (None, None) => unreachable!("one accessor exists"),
                    };
                    out.push(TLink::GetterSetter {
                        getter: getter.map(|(spec, _)| spec),
                        setter: setter.map(|(spec, _)| spec),
                        ty,
                    });
                    return Ok(ty);
                }
                // A dotted name on a Map reads the key of that name.
                if self.registry.is_map_like(receiver.struct_id) {
                    let (get, put) = self.map_shortcut_methods(receiver, loc)?;
                    let key = TExpr::constant(loc, core.string, Const::Str(name.into()));
                    out.push(TLink::MapShortcut {
                        get,
                        put,
                        index: Box::new(key),
                    });
                    return Ok(core.def);
                }
                Err(CompileError::resolution(
                    format!("Unknown field [{name}] for type [{}].", self.registry.type_name(receiver)),
                    loc,
                ))
            }
            _ => Err(CompileError::type_error(
                format!(
                    "Cannot access field [{name}] on a primitive type [{}].",
                    self.registry.type_name(receiver)
                ),
                loc,
            )),
        }
    }

    fn index(
        &mut self,
        out: &mut Vec<TLink>,
        receiver: Ty,
        index: &crate::ast::ExprLoc,
        loc: Loc,
    ) -> Result<Ty, CompileError> {
        let core = *self.registry.core();
        match receiver.sort() {
            Sort::Array => {
                let tindex = self.expr(index, Some(core.int), false)?;
                let elem = receiver.element();
                out.push(TLink::ArrayIndex {
                    index: Box::new(tindex),
                    elem,
                });
                Ok(elem)
            }
            Sort::Def => {
                let tindex = self.expr(index, None, false)?;
                out.push(TLink::DynIndex {
                    index: Box::new(tindex),
                });
                Ok(core.def)
            }
            Sort::Object if self.registry.is_map_like(receiver.struct_id) => {
                let tindex = self.expr(index, Some(core.def), false)?;
                let (get, put) = self.map_shortcut_methods(receiver, loc)?;
                out.push(TLink::MapShortcut {
                    get,
                    put,
                    index: Box::new(tindex),
                });
                Ok(core.def)
            }
            Sort::Object if self.registry.is_list_like(receiver.struct_id) => {
                let tindex = self.expr(index, Some(core.int), false)?;
                let (get, set) = self.list_shortcut_methods(receiver, loc)?;
                out.push(TLink::ListShortcut {
                    get,
                    set,
                    index: Box::new(tindex),
                });
                Ok(core.def)
            }
            _ => Err(CompileError::type_error(
                format!("Illegal array access on type [{}].", self.registry.type_name(receiver)),
                loc,
            )),
        }
    }

    fn call(
        &mut self,
        out: &mut Vec<TLink>,
        receiver: Ty,
        name: &str,
        args: &[crate::ast::ExprLoc],
        loc: Loc,
    ) -> Result<Ty, CompileError> {
        let core = *self.registry.core();
        match receiver.sort() {
            Sort::Def => {
                let targs = args
                    .iter()
                    .map(|arg| self.expr(arg, None, false))
                    .collect::<Result<Vec<_>, _>>()?;
                out.push(TLink::DynCall {
                    name: name.into(),
                    args: targs,
                });
                Ok(core.def)
            }
            Sort::Object | Sort::Array => {
                // Arrays answer only Object members; none are whitelisted,
                // so resolution falls through to the error below for them.
                let key = MethodKey::new(name, args.len());
                let Some(method) = (receiver.dims == 0)
                    .then(|| self.registry.lookup_method(receiver.struct_id, &key))
                    .flatten()
                else {
                    return Err(CompileError::resolution(
                        format!("Unknown method [{key}] for type [{}].", self.registry.type_name(receiver)),
                        loc,
                    ));
                };
                let ret = method.ret;
                let returns_void = ret.sort() == Sort::Void;
                let owner = method.owner;
                let arg_tys: Vec<Ty> = method.args.to_vec();
                let targs = args
                    .iter()
                    .zip(&arg_tys)
                    .map(|(arg, &ty)| self.expr(arg, Some(ty), false))
                    .collect::<Result<Vec<_>, _>>()?;
                out.push(TLink::Call {
                    method: MethodSpec {
                        owner,
                        key,
                        returns_void,
                    },
                    args: targs,
                    ret,
                });
                Ok(ret)
            }
            _ => Err(CompileError::type_error(
                format!(
                    "Cannot call method [{name}] on a primitive type [{}].",
                    self.registry.type_name(receiver)
                ),
                loc,
            )),
        }
    }

    fn static_call(
        &mut self,
        out: &mut Vec<TLink>,
        owner: Ty,
        name: &str,
        args: &[crate::ast::ExprLoc],
        loc: Loc,
    ) -> Result<Ty, CompileError> {
        let key = MethodKey::new(name, args.len());
        let Some(method) = self.registry.lookup_static(owner.struct_id, &key) else {
            return Err(CompileError::resolution(
                format!(
                    "Unknown static method [{key}] for type [{}].",
                    self.registry.type_name(owner)
                ),
                loc,
            ));
        };
        let ret = method.ret;
        let returns_void = ret.sort() == Sort::Void;
        let method_owner = method.owner;
        let arg_tys: Vec<Ty> = method.args.to_vec();
        let targs = args
            .iter()
            .zip(&arg_tys)
            .map(|(arg, &ty)| self.expr(arg, Some(ty), false))
            .collect::<Result<Vec<_>, _>>()?;
        out.push(TLink::StaticCall {
            method: MethodSpec {
                owner: method_owner,
                key,
                returns_void,
            },
            args: targs,
            ret,
        });
        Ok(ret)
    }

    fn lookup_accessor(&self, receiver: Ty, name: &str, arity: usize) -> Option<(MethodSpec, Ty)> {
        let key = MethodKey::new(name, arity);
        let method = self.registry.lookup_method(receiver.struct_id, &key)?;
        Some((
            MethodSpec {
                owner: method.owner,
                key,
                returns_void: method.ret.sort() == Sort::Void,
            },
            method.ret,
        ))
    }

    fn map_shortcut_methods(&self, receiver: Ty, loc: Loc) -> Result<(MethodSpec, MethodSpec), CompileError> {
        let get_key = MethodKey::new("get", 1);
        let put_key = MethodKey::new("put", 2);
        let get = self
            .registry
            .lookup_method(receiver.struct_id, &get_key)
            .ok_or_else(|| CompileError::resolution("Map shortcut requires a [get/1] method.", loc))?;
        let put = self
            .registry
            .lookup_method(receiver.struct_id, &put_key)
            .ok_or_else(|| CompileError::resolution("Map shortcut requires a [put/2] method.", loc))?;
        Ok((
            MethodSpec {
                owner: get.owner,
                key: get_key,
                returns_void: false,
            },
            MethodSpec {
                owner: put.owner,
                key: put_key,
                returns_void: false,
            },
        ))
    }

    fn list_shortcut_methods(&self, receiver: Ty, loc: Loc) -> Result<(MethodSpec, MethodSpec), CompileError> {
        let get_key = MethodKey::new("get", 1);
        let set_key = MethodKey::new("set", 2);
        let get = self
            .registry
            .lookup_method(receiver.struct_id, &get_key)
            .ok_or_else(|| CompileError::resolution("List shortcut requires a [get/1] method.", loc))?;
        let set = self
            .registry
            .lookup_method(receiver.struct_id, &set_key)
            .ok_or_else(|| CompileError::resolution("List shortcut requires a [set/2] method.", loc))?;
        Ok((
            MethodSpec {
                owner: get.owner,
                key: get_key,
                returns_void: false,
            },
            MethodSpec {
                owner: set.owner,
                key: set_key,
                returns_void: false,
            },
        ))
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

// Chain analysis is exercised end to end by the compiler tests; the unit
// tests here pin the shortcut resolution rules.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("message"), "Message");
        assert_eq!(capitalize(""), "");
    }
}
