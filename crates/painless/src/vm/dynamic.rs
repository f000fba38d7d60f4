//! The def dispatcher: runtime resolution for every operation on a dynamic
//! value.
//!
//! The compiler only *chooses* to emit a dynamic call site; everything here
//! reifies it at runtime by mapping the receiver to its struct's frozen
//! runtime table (methods, getters, setters) or applying runtime numeric
//! promotion for operators.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::{
    ast::{BinOp, CompOp},
    registry::{Accessor, MethodKey, natives},
    vm::{NativeCtx, RunError, Value, ValueIter},
};

/// Structural equality with the host's `equals` semantics: same runtime
/// type compared by content for strings, collections, and numbers; identity
/// for opaque values.
#[must_use]
pub fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Long(x), Value::Long(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| value_eq(l, r))
        }
        (Value::Map(x), Value::Map(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter()
                    .all(|(key, left)| y.get(key).is_some_and(|right| value_eq(left, right)))
        }
        (Value::Array(x), Value::Array(y)) => Rc::ptr_eq(x, y),
        (Value::Exception(x), Value::Exception(y)) => Rc::ptr_eq(x, y),
        (Value::Pattern(x), Value::Pattern(y)) => Rc::ptr_eq(x, y),
        (Value::Matcher(x), Value::Matcher(y)) => Rc::ptr_eq(x, y),
        (Value::Iter(x), Value::Iter(y)) => Rc::ptr_eq(x, y),
        (Value::Stream(x), Value::Stream(y)) => Rc::ptr_eq(x, y),
        (Value::IntStream(x), Value::IntStream(y)) => Rc::ptr_eq(x, y),
        (Value::FuncRef(x), Value::FuncRef(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

/// Runtime numeric shapes after unboxing a def operand.
enum Num {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

fn as_num(value: &Value) -> Option<Num> {
    match value {
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Long(i) => Some(Num::Long(*i)),
        Value::Float(f) => Some(Num::Float(*f)),
        Value::Double(f) => Some(Num::Double(*f)),
        Value::Char(c) => Some(Num::Int(*c as i32)),
        _ => None,
    }
}

fn operand_error(ctx: &NativeCtx<'_>, op: &str, a: &Value, b: &Value) -> RunError {
    ctx.throw(
        "ClassCastException",
        format!("Cannot apply [{op}] to types [{}] and [{}]", a.kind_name(), b.kind_name()),
    )
}

/// Binary operator on def operands, with runtime numeric promotion.
pub fn binary(ctx: &NativeCtx<'_>, op: BinOp, left: &Value, right: &Value) -> Result<Value, RunError> {
    // `def + String` is string concatenation.
    if op == BinOp::Add && (matches!(left, Value::Str(_)) || matches!(right, Value::Str(_))) {
        let mut out = left.display();
        out.push_str(&right.display());
        return Ok(Value::str(out));
    }
    if let (Value::Bool(l), Value::Bool(r)) = (left, right) {
        let out = match op {
            BinOp::BitAnd => l & r,
            BinOp::BitOr => l | r,
            BinOp::BitXor => l ^ r,
            _ => return Err(operand_error(ctx, op.symbol(), left, right)),
        };
        return Ok(Value::Bool(out));
    }
    let (Some(l), Some(r)) = (as_num(left), as_num(right)) else {
        return Err(operand_error(ctx, op.symbol(), left, right));
    };
    // Shifts follow the left operand's width; the count takes the low bits.
    if matches!(op, BinOp::Shl | BinOp::Shr | BinOp::Ushr) {
        let count = match r {
            Num::Int(i) => i64::from(i),
            Num::Long(i) => i,
            _ => return Err(operand_error(ctx, op.symbol(), left, right)),
        };
        return match l {
            Num::Int(i) => Ok(Value::Int(shift_int(op, i, count))),
            Num::Long(i) => Ok(Value::Long(shift_long(op, i, count))),
            _ => Err(operand_error(ctx, op.symbol(), left, right)),
        };
    }
    // Promote to the wider operand, preserving operand order.
    match (&l, &r) {
        (Num::Double(_), _) | (_, Num::Double(_)) => double_op(ctx, op, to_f64(&l), to_f64(&r), left, right),
        (Num::Float(_), _) | (_, Num::Float(_)) => {
            let out = double_op(ctx, op, to_f64(&l), to_f64(&r), left, right)?;
            match out {
                Value::Double(v) => Ok(Value::Float(v as f32)),
                other => Ok(other),
            }
        }
        (Num::Long(_), _) | (_, Num::Long(_)) => long_op(ctx, op, to_i64(&l), to_i64(&r)).map(Value::Long),
        (Num::Int(l), Num::Int(r)) => int_op(ctx, op, *l, *r).map(Value::Int),
    }
}

fn to_f64(n: &Num) -> f64 {
    match n {
        Num::Int(i) => f64::from(*i),
        Num::Long(i) => *i as f64,
        Num::Float(f) => f64::from(*f),
        Num::Double(f) => *f,
    }
}

fn to_i64(n: &Num) -> i64 {
    match n {
        Num::Int(i) => i64::from(*i),
        Num::Long(i) => *i,
        Num::Float(f) => *f as i64,
        Num::Double(f) => *f as i64,
    }
}

fn div_by_zero(ctx: &NativeCtx<'_>) -> RunError {
    ctx.throw("ArithmeticException", "/ by zero")
}

fn int_op(ctx: &NativeCtx<'_>, op: BinOp, l: i32, r: i32) -> Result<i32, RunError> {
    Ok(match op {
        BinOp::Add => l.wrapping_add(r),
        BinOp::Sub => l.wrapping_sub(r),
        BinOp::Mul => l.wrapping_mul(r),
        BinOp::Div => {
            if r == 0 {
                return Err(div_by_zero(ctx));
            }
            l.wrapping_div(r)
        }
        BinOp::Rem => {
            if r == 0 {
                return Err(div_by_zero(ctx));
            }
            l.wrapping_rem(r)
        }
        BinOp::BitAnd => l & r,
        BinOp::BitOr => l | r,
        BinOp::BitXor => l ^ r,
        BinOp::Shl | BinOp::Shr | BinOp::Ushr => unreachable!("shifts handled before promotion"),
    })
}

fn long_op(ctx: &NativeCtx<'_>, op: BinOp, l: i64, r: i64) -> Result<i64, RunError> {
    Ok(match op {
        BinOp::Add => l.wrapping_add(r),
        BinOp::Sub => l.wrapping_sub(r),
        BinOp::Mul => l.wrapping_mul(r),
        BinOp::Div => {
            if r == 0 {
                return Err(div_by_zero(ctx));
            }
            l.wrapping_div(r)
        }
        BinOp::Rem => {
            if r == 0 {
                return Err(div_by_zero(ctx));
            }
            l.wrapping_rem(r)
        }
        BinOp::BitAnd => l & r,
        BinOp::BitOr => l | r,
        BinOp::BitXor => l ^ r,
        BinOp::Shl | BinOp::Shr | BinOp::Ushr => unreachable!("shifts handled before promotion"),
    })
}

fn double_op(
    ctx: &NativeCtx<'_>,
    op: BinOp,
    l: f64,
    r: f64,
    left: &Value,
    right: &Value,
) -> Result<Value, RunError> {
    Ok(Value::Double(match op {
        BinOp::Add => l + r,
        BinOp::Sub => l - r,
        BinOp::Mul => l * r,
        BinOp::Div => l / r,
        BinOp::Rem => l % r,
        _ => return Err(operand_error(ctx, op.symbol(), left, right)),
    }))
}

pub(crate) fn shift_int(op: BinOp, value: i32, count: i64) -> i32 {
    let count = (count & 0x1F) as u32;
    match op {
        BinOp::Shl => value.wrapping_shl(count),
        BinOp::Shr => value.wrapping_shr(count),
        BinOp::Ushr => (value.cast_unsigned().wrapping_shr(count)).cast_signed(),
        _ => unreachable!("not a shift"),
    }
}

pub(crate) fn shift_long(op: BinOp, value: i64, count: i64) -> i64 {
    let count = (count & 0x3F) as u32;
    match op {
        BinOp::Shl => value.wrapping_shl(count),
        BinOp::Shr => value.wrapping_shr(count),
        BinOp::Ushr => (value.cast_unsigned().wrapping_shr(count)).cast_signed(),
        _ => unreachable!("not a shift"),
    }
}

/// Unary minus on a def operand.
pub fn neg(ctx: &NativeCtx<'_>, value: &Value) -> Result<Value, RunError> {
    match as_num(value) {
        Some(Num::Int(i)) => Ok(Value::Int(i.wrapping_neg())),
        Some(Num::Long(i)) => Ok(Value::Long(i.wrapping_neg())),
        Some(Num::Float(f)) => Ok(Value::Float(-f)),
        Some(Num::Double(f)) => Ok(Value::Double(-f)),
        None => Err(ctx.throw(
            "ClassCastException",
            format!("Cannot apply [-] to type [{}]", value.kind_name()),
        )),
    }
}

/// Bitwise complement on a def operand.
pub fn bit_not(ctx: &NativeCtx<'_>, value: &Value) -> Result<Value, RunError> {
    match value {
        Value::Int(i) => Ok(Value::Int(!i)),
        Value::Long(i) => Ok(Value::Long(!i)),
        Value::Char(c) => Ok(Value::Int(!(*c as i32))),
        other => Err(ctx.throw(
            "ClassCastException",
            format!("Cannot apply [~] to type [{}]", other.kind_name()),
        )),
    }
}

/// Comparison on def operands: equality promotes numerics, ordering
/// requires them.
pub fn compare(ctx: &NativeCtx<'_>, op: CompOp, left: &Value, right: &Value) -> Result<Value, RunError> {
    match op {
        CompOp::Eq | CompOp::Ne => {
            let eq = match (as_num(left), as_num(right)) {
                (Some(l), Some(r)) => numeric_eq(&l, &r),
                _ => value_eq(left, right),
            };
            Ok(Value::Bool(if op == CompOp::Eq { eq } else { !eq }))
        }
        CompOp::Lt | CompOp::Le | CompOp::Gt | CompOp::Ge => {
            let (Some(l), Some(r)) = (as_num(left), as_num(right)) else {
                return Err(operand_error(ctx, op.symbol(), left, right));
            };
            let ordering = match (l, r) {
                (Num::Int(x), Num::Int(y)) => (f64::from(x), f64::from(y)),
                (x, y) => (to_f64(&x), to_f64(&y)),
            };
            let (x, y) = ordering;
            Ok(Value::Bool(match op {
                CompOp::Lt => x < y,
                CompOp::Le => x <= y,
                CompOp::Gt => x > y,
                CompOp::Ge => x >= y,
                _ => unreachable!("equality handled above"),
            }))
        }
    }
}

fn numeric_eq(l: &Num, r: &Num) -> bool {
    match (l, r) {
        (Num::Int(x), Num::Int(y)) => x == y,
        (Num::Long(x), Num::Long(y)) => x == y,
        (Num::Int(x), Num::Long(y)) | (Num::Long(y), Num::Int(x)) => i64::from(*x) == *y,
        _ => to_f64(l) == to_f64(r),
    }
}

fn null_member(ctx: &NativeCtx<'_>, what: &str, name: &str) -> RunError {
    ctx.throw(
        "IllegalArgumentException",
        format!("Cannot access {what} [{name}] on a null value"),
    )
}

/// `receiver.name(args...)` on a def receiver.
pub fn method_call(
    ctx: &mut NativeCtx<'_>,
    receiver: &Value,
    name: &str,
    args: &[Value],
) -> Result<Value, RunError> {
    if matches!(receiver, Value::Null) {
        return Err(null_member(ctx, "method", name));
    }
    let Some(struct_id) = ctx.registry.struct_for_value(receiver) else {
        return Err(null_member(ctx, "method", name));
    };
    let key = MethodKey::new(name, args.len());
    let Some(method) = ctx.registry.runtime_table(struct_id).methods.get(&key).cloned() else {
        return Err(ctx.throw(
            "IllegalArgumentException",
            format!(
                "Unable to find dynamic method [{key}] for class [{}]",
                ctx.registry.struct_name(struct_id)
            ),
        ));
    };
    let native = method
        .native
        .ok_or_else(|| RunError::internal("abstract method reached dynamic dispatch"))?;
    let mut full: SmallVec<[Value; 6]> = SmallVec::with_capacity(args.len() + 1);
    full.push(receiver.clone());
    full.extend(args.iter().cloned());
    ctx.owner = method.owner;
    native(ctx, &full)
}

/// `receiver.name` load on a def receiver.
pub fn field_load(ctx: &mut NativeCtx<'_>, receiver: &Value, name: &str) -> Result<Value, RunError> {
    match receiver {
        Value::Null => Err(null_member(ctx, "field", name)),
        Value::Array(arr) => {
            if name == "length" {
                Ok(Value::Int(
                    i32::try_from(arr.cells.borrow().len()).unwrap_or(i32::MAX),
                ))
            } else {
                Err(null_member(ctx, "field", name))
            }
        }
        // Map fields double as key access.
        Value::Map(entries) => {
            let key = crate::vm::MapKey::Str(name.into());
            Ok(entries.borrow().get(&key).cloned().unwrap_or(Value::Null))
        }
        other => {
            let Some(struct_id) = ctx.registry.struct_for_value(other) else {
                return Err(null_member(ctx, "field", name));
            };
            let accessor = ctx.registry.runtime_table(struct_id).getters.get(name).cloned();
            match accessor {
                Some(Accessor::Field(field)) => {
                    ctx.owner = field.owner;
                    (field.getter)(ctx, std::slice::from_ref(other))
                }
                Some(Accessor::Method(method)) => {
                    let native = method
                        .native
                        .ok_or_else(|| RunError::internal("abstract getter reached dynamic dispatch"))?;
                    ctx.owner = method.owner;
                    native(ctx, std::slice::from_ref(other))
                }
                None => Err(ctx.throw(
                    "IllegalArgumentException",
                    format!(
                        "Unable to find dynamic field [{name}] for class [{}]",
                        ctx.registry.struct_name(struct_id)
                    ),
                )),
            }
        }
    }
}

/// `receiver.name = value` on a def receiver.
pub fn field_store(ctx: &mut NativeCtx<'_>, receiver: &Value, name: &str, value: &Value) -> Result<(), RunError> {
    match receiver {
        Value::Null => Err(null_member(ctx, "field", name)),
        Value::Map(entries) => {
            let key = crate::vm::MapKey::Str(name.into());
            entries.borrow_mut().insert(key, value.clone());
            Ok(())
        }
        other => {
            let Some(struct_id) = ctx.registry.struct_for_value(other) else {
                return Err(null_member(ctx, "field", name));
            };
            let accessor = ctx.registry.runtime_table(struct_id).setters.get(name).cloned();
            match accessor {
                Some(Accessor::Field(field)) => {
                    let setter = field
                        .setter
                        .ok_or_else(|| ctx.throw("IllegalArgumentException", format!("Field [{name}] is read-only")))?;
                    ctx.owner = field.owner;
                    setter(ctx, &[other.clone(), value.clone()]).map(|_| ())
                }
                Some(Accessor::Method(method)) => {
                    let native = method
                        .native
                        .ok_or_else(|| RunError::internal("abstract setter reached dynamic dispatch"))?;
                    ctx.owner = method.owner;
                    native(ctx, &[other.clone(), value.clone()]).map(|_| ())
                }
                None => Err(ctx.throw(
                    "IllegalArgumentException",
                    format!(
                        "Unable to find dynamic field [{name}] for class [{}]",
                        ctx.registry.struct_name(struct_id)
                    ),
                )),
            }
        }
    }
}

fn index_int(ctx: &NativeCtx<'_>, index: &Value) -> Result<i32, RunError> {
    match index {
        Value::Int(i) => Ok(*i),
        other => Err(ctx.throw(
            "ClassCastException",
            format!("Cannot cast {} to int for an index", other.kind_name()),
        )),
    }
}

/// `receiver[index]` load on a def receiver.
pub fn index_load(ctx: &mut NativeCtx<'_>, receiver: &Value, index: &Value) -> Result<Value, RunError> {
    match receiver {
        Value::Array(arr) => {
            let cells = arr.cells.borrow();
            let i = index_int(ctx, index)?;
            let at = usize::try_from(i).ok().filter(|&a| a < cells.len()).ok_or_else(|| {
                ctx.throw(
                    "IndexOutOfBoundsException",
                    format!("Index {i} out of bounds for length {}", cells.len()),
                )
            })?;
            Ok(cells[at].clone())
        }
        Value::List(_) => natives::list_get(ctx, &[receiver.clone(), index.clone()]),
        Value::Map(_) => natives::map_get(ctx, &[receiver.clone(), index.clone()]),
        other => Err(ctx.throw(
            "IllegalArgumentException",
            format!("Illegal index access on type [{}]", other.kind_name()),
        )),
    }
}

/// `receiver[index] = value` on a def receiver.
pub fn index_store(
    ctx: &mut NativeCtx<'_>,
    receiver: &Value,
    index: &Value,
    value: &Value,
) -> Result<(), RunError> {
    match receiver {
        Value::Array(arr) => {
            let i = index_int(ctx, index)?;
            let mut cells = arr.cells.borrow_mut();
            let len = cells.len();
            let at = usize::try_from(i).ok().filter(|&a| a < len).ok_or_else(|| {
                ctx.throw(
                    "IndexOutOfBoundsException",
                    format!("Index {i} out of bounds for length {len}"),
                )
            })?;
            cells[at] = value.clone();
            Ok(())
        }
        Value::List(_) => natives::list_set(ctx, &[receiver.clone(), index.clone(), value.clone()]).map(|_| ()),
        Value::Map(_) => natives::map_put(ctx, &[receiver.clone(), index.clone(), value.clone()]).map(|_| ()),
        other => Err(ctx.throw(
            "IllegalArgumentException",
            format!("Illegal index access on type [{}]", other.kind_name()),
        )),
    }
}

/// Produces an iterator for a for-each over a def value.
pub fn iterate(ctx: &NativeCtx<'_>, value: &Value) -> Result<Value, RunError> {
    use std::cell::RefCell;
    match value {
        Value::List(items) => Ok(Value::Iter(Rc::new(RefCell::new(ValueIter::new(
            items.borrow().clone(),
        ))))),
        Value::Array(arr) => Ok(Value::Iter(Rc::new(RefCell::new(ValueIter::new(
            arr.cells.borrow().clone(),
        ))))),
        Value::Iter(iter) => Ok(Value::Iter(Rc::clone(iter))),
        other => Err(ctx.throw(
            "IllegalArgumentException",
            format!("Cannot iterate over type [{}]", other.kind_name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::catalog::default_registry;

    #[test]
    fn test_value_eq_numeric_is_strict() {
        assert!(value_eq(&Value::Int(1), &Value::Int(1)));
        assert!(!value_eq(&Value::Int(1), &Value::Long(1)));
        assert!(value_eq(&Value::str("a"), &Value::str("a")));
    }

    #[test]
    fn test_dynamic_eq_promotes_numerics() {
        let registry = default_registry().unwrap();
        let ctx = NativeCtx::detached(&registry);
        let out = compare(&ctx, CompOp::Eq, &Value::Int(1), &Value::Long(1)).unwrap();
        assert!(matches!(out, Value::Bool(true)));
    }

    #[test]
    fn test_dynamic_add_promotes() {
        let registry = default_registry().unwrap();
        let ctx = NativeCtx::detached(&registry);
        assert!(matches!(
            binary(&ctx, BinOp::Add, &Value::Int(2), &Value::Int(3)).unwrap(),
            Value::Int(5)
        ));
        assert!(matches!(
            binary(&ctx, BinOp::Add, &Value::Int(2), &Value::Double(0.5)).unwrap(),
            Value::Double(v) if (v - 2.5).abs() < 1e-9
        ));
        assert!(matches!(
            binary(&ctx, BinOp::Add, &Value::Int(2), &Value::str("x")).unwrap(),
            Value::Str(s) if s.as_ref() == "2x"
        ));
    }

    #[test]
    fn test_dynamic_div_by_zero_is_script_error() {
        let registry = default_registry().unwrap();
        let ctx = NativeCtx::detached(&registry);
        let err = binary(&ctx, BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert!(matches!(err, RunError::Exception { .. }));
    }

    #[test]
    fn test_dynamic_method_dispatch() {
        let registry = default_registry().unwrap();
        let mut ctx = NativeCtx::detached(&registry);
        let out = method_call(&mut ctx, &Value::str("abc"), "length", &[]).unwrap();
        assert!(matches!(out, Value::Int(3)));
        let err = method_call(&mut ctx, &Value::str("abc"), "mystery", &[]).unwrap_err();
        let RunError::Exception { value } = err else {
            panic!("expected script exception");
        };
        let Value::Exception(exc) = value else {
            panic!("expected exception value");
        };
        assert!(exc.message.as_ref().unwrap().contains("mystery/0"));
    }

    #[test]
    fn test_map_field_shortcut() {
        let registry = default_registry().unwrap();
        let mut ctx = NativeCtx::detached(&registry);
        let map = Value::map(ahash::AHashMap::new());
        field_store(&mut ctx, &map, "k", &Value::Int(4)).unwrap();
        assert!(matches!(field_load(&mut ctx, &map, "k").unwrap(), Value::Int(4)));
    }

    #[test]
    fn test_getter_synthesis_via_dynamic_field() {
        let registry = default_registry().unwrap();
        let mut ctx = NativeCtx::detached(&registry);
        // getMessage() serves the `message` property on exceptions.
        let exc = Value::Exception(std::rc::Rc::new(crate::vm::ExceptionValue {
            struct_id: registry.lookup_struct("IllegalArgumentException").unwrap(),
            message: Some("boom".into()),
        }));
        let out = field_load(&mut ctx, &exc, "message").unwrap();
        assert!(matches!(out, Value::Str(s) if s.as_ref() == "boom"));
    }
}
