//! Native implementations backing the default whitelist.
//!
//! Every function here has the uniform [`NativeFn`](super::NativeFn) shape:
//! `args[0]` is the receiver for instance methods, statics and constructors
//! receive only their declared arguments. Typed call sites guarantee argument
//! variants; def call sites do not, so argument checks raise script-visible
//! `ClassCastException`s rather than internal faults.

use std::{cell::RefCell, rc::Rc};

use crate::vm::{ExceptionValue, MatcherValue, NativeCtx, RunError, Value, ValueIter, value_eq};

type NativeResult = Result<Value, RunError>;

// --- argument helpers ---

fn cce(ctx: &NativeCtx<'_>, value: &Value, wanted: &str) -> RunError {
    ctx.throw(
        "ClassCastException",
        format!("Cannot cast {} to {wanted}", value.kind_name()),
    )
}

fn str_arg(ctx: &NativeCtx<'_>, value: &Value) -> Result<Rc<str>, RunError> {
    match value {
        Value::Str(s) => Ok(Rc::clone(s)),
        other => Err(cce(ctx, other, "String")),
    }
}

fn int_arg(ctx: &NativeCtx<'_>, value: &Value) -> Result<i32, RunError> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(cce(ctx, other, "int")),
    }
}

fn f64_arg(ctx: &NativeCtx<'_>, value: &Value) -> Result<f64, RunError> {
    match value {
        Value::Double(f) => Ok(*f),
        Value::Float(f) => Ok(f64::from(*f)),
        Value::Int(i) => Ok(f64::from(*i)),
        Value::Long(i) => Ok(*i as f64),
        other => Err(cce(ctx, other, "double")),
    }
}

fn list_arg(ctx: &NativeCtx<'_>, value: &Value) -> Result<Rc<RefCell<Vec<Value>>>, RunError> {
    match value {
        Value::List(items) => Ok(Rc::clone(items)),
        other => Err(cce(ctx, other, "List")),
    }
}

fn index_error(ctx: &NativeCtx<'_>, index: i32, len: usize) -> RunError {
    ctx.throw(
        "IndexOutOfBoundsException",
        format!("Index {index} out of bounds for length {len}"),
    )
}

fn checked_index(ctx: &NativeCtx<'_>, index: i32, len: usize) -> Result<usize, RunError> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < len)
        .ok_or_else(|| index_error(ctx, index, len))
}

// --- Object ---

pub fn object_to_string(_ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::str(args[0].display()))
}

pub fn object_equals(_ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::Bool(value_eq(&args[0], &args[1])))
}

// --- String ---

pub fn string_length(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let s = str_arg(ctx, &args[0])?;
    Ok(Value::Int(i32::try_from(s.chars().count()).unwrap_or(i32::MAX)))
}

pub fn string_is_empty(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::Bool(str_arg(ctx, &args[0])?.is_empty()))
}

pub fn string_char_at(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let s = str_arg(ctx, &args[0])?;
    let index = int_arg(ctx, &args[1])?;
    let len = s.chars().count();
    let at = checked_index(ctx, index, len)?;
    Ok(Value::Char(s.chars().nth(at).expect("index checked against length")))
}

pub fn string_index_of(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let s = str_arg(ctx, &args[0])?;
    let needle = str_arg(ctx, &args[1])?;
    match s.find(&*needle) {
        Some(byte_pos) => Ok(Value::Int(
            i32::try_from(s[..byte_pos].chars().count()).unwrap_or(i32::MAX),
        )),
        None => Ok(Value::Int(-1)),
    }
}

pub fn string_contains(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let s = str_arg(ctx, &args[0])?;
    let needle = str_arg(ctx, &args[1])?;
    Ok(Value::Bool(s.contains(&*needle)))
}

fn char_slice(ctx: &NativeCtx<'_>, s: &str, start: i32, end: i32) -> Result<Value, RunError> {
    let len = s.chars().count();
    let (start_u, end_u) = (start, end);
    if start_u < 0 || end_u < start_u || usize::try_from(end_u).is_ok_and(|e| e > len) {
        return Err(ctx.throw(
            "IndexOutOfBoundsException",
            format!("begin {start_u}, end {end_u}, length {len}"),
        ));
    }
    let start = start_u as usize;
    let end = end_u as usize;
    Ok(Value::str(s.chars().skip(start).take(end - start).collect::<String>()))
}

pub fn string_substring_from(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let s = str_arg(ctx, &args[0])?;
    let start = int_arg(ctx, &args[1])?;
    let len = i32::try_from(s.chars().count()).unwrap_or(i32::MAX);
    char_slice(ctx, &s, start, len)
}

pub fn string_substring(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let s = str_arg(ctx, &args[0])?;
    let start = int_arg(ctx, &args[1])?;
    let end = int_arg(ctx, &args[2])?;
    char_slice(ctx, &s, start, end)
}

pub fn string_to_upper_case(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::str(str_arg(ctx, &args[0])?.to_uppercase()))
}

pub fn string_to_lower_case(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::str(str_arg(ctx, &args[0])?.to_lowercase()))
}

pub fn string_replace(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let s = str_arg(ctx, &args[0])?;
    let from = str_arg(ctx, &args[1])?;
    let to = str_arg(ctx, &args[2])?;
    Ok(Value::str(s.replace(&*from, &to)))
}

pub fn string_starts_with(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let s = str_arg(ctx, &args[0])?;
    Ok(Value::Bool(s.starts_with(&*str_arg(ctx, &args[1])?)))
}

pub fn string_ends_with(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let s = str_arg(ctx, &args[0])?;
    Ok(Value::Bool(s.ends_with(&*str_arg(ctx, &args[1])?)))
}

pub fn string_trim(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::str(str_arg(ctx, &args[0])?.trim().to_owned()))
}

pub fn string_value_of(_ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::str(args[0].display()))
}

// --- List / ArrayList ---

pub fn array_list_ctor(_ctx: &mut NativeCtx<'_>, _args: &[Value]) -> NativeResult {
    Ok(Value::list(Vec::new()))
}

pub fn list_add(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    list_arg(ctx, &args[0])?.borrow_mut().push(args[1].clone());
    Ok(Value::Bool(true))
}

pub fn list_get(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let items = list_arg(ctx, &args[0])?;
    let items = items.borrow();
    let at = checked_index(ctx, int_arg(ctx, &args[1])?, items.len())?;
    Ok(items[at].clone())
}

pub fn list_set(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let items = list_arg(ctx, &args[0])?;
    let mut items = items.borrow_mut();
    let len = items.len();
    let at = checked_index(ctx, int_arg(ctx, &args[1])?, len)?;
    Ok(std::mem::replace(&mut items[at], args[2].clone()))
}

pub fn list_remove(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let items = list_arg(ctx, &args[0])?;
    let mut items = items.borrow_mut();
    let len = items.len();
    let at = checked_index(ctx, int_arg(ctx, &args[1])?, len)?;
    Ok(items.remove(at))
}

pub fn list_size(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::Int(
        i32::try_from(list_arg(ctx, &args[0])?.borrow().len()).unwrap_or(i32::MAX),
    ))
}

pub fn list_is_empty(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::Bool(list_arg(ctx, &args[0])?.borrow().is_empty()))
}

pub fn list_contains(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let items = list_arg(ctx, &args[0])?;
    let found = items.borrow().iter().any(|item| value_eq(item, &args[1]));
    Ok(Value::Bool(found))
}

pub fn list_index_of(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let items = list_arg(ctx, &args[0])?;
    let found = items.borrow().iter().position(|item| value_eq(item, &args[1]));
    Ok(Value::Int(
        found.map_or(-1, |i| i32::try_from(i).unwrap_or(i32::MAX)),
    ))
}

pub fn list_clear(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    list_arg(ctx, &args[0])?.borrow_mut().clear();
    Ok(Value::Null)
}

pub fn list_iterator(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let items = list_arg(ctx, &args[0])?.borrow().clone();
    Ok(Value::Iter(Rc::new(RefCell::new(ValueIter::new(items)))))
}

pub fn list_stream(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let items = list_arg(ctx, &args[0])?.borrow().clone();
    Ok(Value::Stream(Rc::new(RefCell::new(items))))
}

// --- Map / HashMap ---

fn map_arg(
    ctx: &NativeCtx<'_>,
    value: &Value,
) -> Result<Rc<RefCell<ahash::AHashMap<crate::vm::MapKey, Value>>>, RunError> {
    match value {
        Value::Map(entries) => Ok(Rc::clone(entries)),
        other => Err(cce(ctx, other, "Map")),
    }
}

fn map_key(ctx: &NativeCtx<'_>, value: &Value) -> Result<crate::vm::MapKey, RunError> {
    crate::vm::MapKey::from_value(value)
        .ok_or_else(|| ctx.throw("IllegalArgumentException", format!("{} is not hashable", value.kind_name())))
}

pub fn hash_map_ctor(_ctx: &mut NativeCtx<'_>, _args: &[Value]) -> NativeResult {
    Ok(Value::map(ahash::AHashMap::new()))
}

pub fn map_put(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let entries = map_arg(ctx, &args[0])?;
    let key = map_key(ctx, &args[1])?;
    Ok(entries.borrow_mut().insert(key, args[2].clone()).unwrap_or(Value::Null))
}

pub fn map_get(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let entries = map_arg(ctx, &args[0])?;
    let key = map_key(ctx, &args[1])?;
    let entries = entries.borrow();
    Ok(entries.get(&key).cloned().unwrap_or(Value::Null))
}

pub fn map_remove(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let entries = map_arg(ctx, &args[0])?;
    let key = map_key(ctx, &args[1])?;
    Ok(entries.borrow_mut().remove(&key).unwrap_or(Value::Null))
}

pub fn map_contains_key(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let entries = map_arg(ctx, &args[0])?;
    let key = map_key(ctx, &args[1])?;
    let found = entries.borrow().contains_key(&key);
    Ok(Value::Bool(found))
}

pub fn map_contains_value(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let entries = map_arg(ctx, &args[0])?;
    let found = entries.borrow().values().any(|v| value_eq(v, &args[1]));
    Ok(Value::Bool(found))
}

pub fn map_size(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::Int(
        i32::try_from(map_arg(ctx, &args[0])?.borrow().len()).unwrap_or(i32::MAX),
    ))
}

pub fn map_is_empty(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::Bool(map_arg(ctx, &args[0])?.borrow().is_empty()))
}

pub fn map_clear(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    map_arg(ctx, &args[0])?.borrow_mut().clear();
    Ok(Value::Null)
}

// --- Iterator ---

pub fn iterator_has_next(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Iter(iter) => {
            let iter = iter.borrow();
            Ok(Value::Bool(iter.pos < iter.items.len()))
        }
        other => Err(cce(ctx, other, "Iterator")),
    }
}

pub fn iterator_next(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Iter(iter) => {
            let mut iter = iter.borrow_mut();
            let pos = iter.pos;
            if pos >= iter.items.len() {
                return Err(ctx.throw("IllegalStateException", "iterator exhausted"));
            }
            iter.pos += 1;
            Ok(iter.items[pos].clone())
        }
        other => Err(cce(ctx, other, "Iterator")),
    }
}

// --- Exceptions ---

pub fn exception_ctor(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let message = match &args[0] {
        Value::Null => None,
        other => Some(str_arg(ctx, other)?),
    };
    Ok(Value::Exception(Rc::new(ExceptionValue {
        struct_id: ctx.owner,
        message,
    })))
}

pub fn exception_get_message(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Exception(exc) => Ok(exc.message.as_ref().map_or(Value::Null, |m| Value::Str(Rc::clone(m)))),
        other => Err(cce(ctx, other, "Exception")),
    }
}

// --- Pattern / Matcher ---

pub fn pattern_matcher(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let Value::Pattern(pattern) = &args[0] else {
        return Err(cce(ctx, &args[0], "Pattern"));
    };
    let input = str_arg(ctx, &args[1])?;
    Ok(Value::Matcher(Rc::new(RefCell::new(MatcherValue {
        pattern: Rc::clone(pattern),
        input,
        pos: 0,
        last: None,
    }))))
}

pub fn matcher_find(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let Value::Matcher(matcher) = &args[0] else {
        return Err(cce(ctx, &args[0], "Matcher"));
    };
    let mut matcher = matcher.borrow_mut();
    let pos = matcher.pos;
    if pos > matcher.input.len() {
        matcher.last = None;
        return Ok(Value::Bool(false));
    }
    let input = Rc::clone(&matcher.input);
    match matcher.pattern.regex.find_at(&input, pos) {
        Some(m) => {
            matcher.last = Some((m.start(), m.end()));
            // Advance past empty matches so repeated find() terminates.
            matcher.pos = if m.end() == m.start() { m.end() + 1 } else { m.end() };
            Ok(Value::Bool(true))
        }
        None => {
            matcher.last = None;
            matcher.pos = input.len() + 1;
            Ok(Value::Bool(false))
        }
    }
}

pub fn matcher_matches(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let Value::Matcher(matcher) = &args[0] else {
        return Err(cce(ctx, &args[0], "Matcher"));
    };
    let mut matcher = matcher.borrow_mut();
    let whole = matcher
        .pattern
        .regex
        .find(&matcher.input)
        .is_some_and(|m| m.start() == 0 && m.end() == matcher.input.len());
    matcher.last = whole.then(|| (0, matcher.input.len()));
    Ok(Value::Bool(whole))
}

pub fn matcher_group(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let Value::Matcher(matcher) = &args[0] else {
        return Err(cce(ctx, &args[0], "Matcher"));
    };
    let matcher = matcher.borrow();
    match matcher.last {
        Some((start, end)) => Ok(Value::str(matcher.input[start..end].to_owned())),
        None => Err(ctx.throw("IllegalStateException", "No match available")),
    }
}

// --- Math ---

pub fn math_abs(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::Double(f64_arg(ctx, &args[0])?.abs()))
}

pub fn math_max(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::Double(f64_arg(ctx, &args[0])?.max(f64_arg(ctx, &args[1])?)))
}

pub fn math_min(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::Double(f64_arg(ctx, &args[0])?.min(f64_arg(ctx, &args[1])?)))
}

pub fn math_pow(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::Double(f64_arg(ctx, &args[0])?.powf(f64_arg(ctx, &args[1])?)))
}

pub fn math_sqrt(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::Double(f64_arg(ctx, &args[0])?.sqrt()))
}

pub fn math_floor(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::Double(f64_arg(ctx, &args[0])?.floor()))
}

pub fn math_ceil(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::Double(f64_arg(ctx, &args[0])?.ceil()))
}

pub fn math_log(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::Double(f64_arg(ctx, &args[0])?.ln()))
}

pub fn math_exp(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::Double(f64_arg(ctx, &args[0])?.exp()))
}

pub fn math_pi(_ctx: &mut NativeCtx<'_>, _args: &[Value]) -> NativeResult {
    Ok(Value::Double(std::f64::consts::PI))
}

pub fn math_e(_ctx: &mut NativeCtx<'_>, _args: &[Value]) -> NativeResult {
    Ok(Value::Double(std::f64::consts::E))
}

// --- Streams ---

fn funcref_arg(ctx: &NativeCtx<'_>, value: &Value) -> Result<Rc<crate::vm::FuncRefValue>, RunError> {
    match value {
        Value::FuncRef(fr) => Ok(Rc::clone(fr)),
        other => Err(cce(ctx, other, "function reference")),
    }
}

fn stream_items(ctx: &NativeCtx<'_>, value: &Value) -> Result<Vec<Value>, RunError> {
    match value {
        // A stream is consumed by the first terminal or intermediate op.
        Value::Stream(items) => Ok(std::mem::take(&mut *items.borrow_mut())),
        other => Err(cce(ctx, other, "Stream")),
    }
}

pub fn stream_map(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let items = stream_items(ctx, &args[0])?;
    let fr = funcref_arg(ctx, &args[1])?;
    let mut mapped = Vec::with_capacity(items.len());
    for item in items {
        mapped.push(ctx.call_funcref(&fr, &[item])?);
    }
    Ok(Value::Stream(Rc::new(RefCell::new(mapped))))
}

pub fn stream_filter(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let items = stream_items(ctx, &args[0])?;
    let fr = funcref_arg(ctx, &args[1])?;
    let mut kept = Vec::new();
    for item in items {
        let verdict = ctx.call_funcref(&fr, std::slice::from_ref(&item))?;
        match verdict {
            Value::Bool(true) => kept.push(item),
            Value::Bool(false) => {}
            other => return Err(cce(ctx, &other, "boolean")),
        }
    }
    Ok(Value::Stream(Rc::new(RefCell::new(kept))))
}

pub fn stream_map_to_int(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let items = stream_items(ctx, &args[0])?;
    let fr = funcref_arg(ctx, &args[1])?;
    let mut mapped = Vec::with_capacity(items.len());
    for item in items {
        let out = ctx.call_funcref(&fr, &[item])?;
        match out {
            Value::Int(i) => mapped.push(i),
            other => return Err(cce(ctx, &other, "int")),
        }
    }
    Ok(Value::IntStream(Rc::new(RefCell::new(mapped))))
}

pub fn stream_count(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let items = stream_items(ctx, &args[0])?;
    Ok(Value::Long(items.len() as i64))
}

pub fn int_stream_sum(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::IntStream(items) => {
            let total = items.borrow().iter().fold(0i32, |acc, &i| acc.wrapping_add(i));
            items.borrow_mut().clear();
            Ok(Value::Int(total))
        }
        other => Err(cce(ctx, other, "IntStream")),
    }
}

pub fn int_stream_count(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::IntStream(items) => {
            let len = items.borrow().len();
            items.borrow_mut().clear();
            Ok(Value::Long(len as i64))
        }
        other => Err(cce(ctx, other, "IntStream")),
    }
}

// --- Functional interfaces ---

pub fn sam_apply(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let fr = funcref_arg(ctx, &args[0])?;
    ctx.call_funcref(&fr, &args[1..])
}

pub fn sam_test(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let fr = funcref_arg(ctx, &args[0])?;
    match ctx.call_funcref(&fr, &args[1..])? {
        Value::Bool(b) => Ok(Value::Bool(b)),
        other => Err(cce(ctx, &other, "boolean")),
    }
}

pub fn sam_apply_as_int(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let fr = funcref_arg(ctx, &args[0])?;
    match ctx.call_funcref(&fr, &args[1..])? {
        Value::Int(i) => Ok(Value::Int(i)),
        other => Err(cce(ctx, &other, "int")),
    }
}

// --- Boxes ---

pub fn integer_parse_int(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let s = str_arg(ctx, &args[0])?;
    s.trim()
        .parse::<i32>()
        .map(Value::Int)
        .map_err(|_| ctx.throw("NumberFormatException", format!("For input string: \"{s}\"")))
}

pub fn integer_to_string(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::str(int_arg(ctx, &args[0])?.to_string()))
}

pub fn int_value(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(*i)),
        other => Err(cce(ctx, other, "int")),
    }
}

pub fn long_value(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Long(i) => Ok(Value::Long(*i)),
        Value::Int(i) => Ok(Value::Long(i64::from(*i))),
        other => Err(cce(ctx, other, "long")),
    }
}

pub fn double_value(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::Double(f64_arg(ctx, &args[0])?))
}

pub fn float_value(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Float(f) => Ok(Value::Float(*f)),
        other => Err(cce(ctx, other, "float")),
    }
}

pub fn char_value(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Char(c) => Ok(Value::Char(*c)),
        other => Err(cce(ctx, other, "char")),
    }
}

pub fn boolean_value(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        other => Err(cce(ctx, other, "boolean")),
    }
}

// --- Utility bridges backing registered Transforms ---

pub fn identity(_ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(args[0].clone())
}

pub fn def_to_boolean(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        other => Err(cce(ctx, other, "boolean")),
    }
}

pub fn def_to_int_implicit(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Char(c) => Ok(Value::Int(*c as i32)),
        other => Err(cce(ctx, other, "int")),
    }
}

pub fn def_to_long_implicit(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Long(i) => Ok(Value::Long(*i)),
        Value::Int(i) => Ok(Value::Long(i64::from(*i))),
        Value::Char(c) => Ok(Value::Long(i64::from(*c as u32))),
        other => Err(cce(ctx, other, "long")),
    }
}

pub fn def_to_float_implicit(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Int(i) => Ok(Value::Float(*i as f32)),
        Value::Long(i) => Ok(Value::Float(*i as f32)),
        other => Err(cce(ctx, other, "float")),
    }
}

pub fn def_to_double_implicit(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Double(f) => Ok(Value::Double(*f)),
        Value::Float(f) => Ok(Value::Double(f64::from(*f))),
        Value::Int(i) => Ok(Value::Double(f64::from(*i))),
        Value::Long(i) => Ok(Value::Double(*i as f64)),
        other => Err(cce(ctx, other, "double")),
    }
}

fn def_numeric(ctx: &NativeCtx<'_>, value: &Value) -> Result<f64, RunError> {
    match value {
        Value::Int(i) => Ok(f64::from(*i)),
        Value::Long(i) => Ok(*i as f64),
        Value::Float(f) => Ok(f64::from(*f)),
        Value::Double(f) => Ok(*f),
        Value::Char(c) => Ok(f64::from(*c as u32)),
        other => Err(cce(ctx, other, "number")),
    }
}

/// Saturating conversion of a def operand into the int range; sub-int
/// narrowing truncates from this value.
fn def_int_saturating(ctx: &NativeCtx<'_>, value: &Value) -> Result<i32, RunError> {
    match value {
        Value::Float(f) => Ok(*f as i32),
        Value::Double(f) => Ok(*f as i32),
        other => Ok(def_long(ctx, other)? as i32),
    }
}

pub fn def_to_byte_explicit(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let n = def_int_saturating(ctx, &args[0])?;
    Ok(Value::Int(i32::from(n as i8)))
}

pub fn def_to_short_explicit(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let n = def_int_saturating(ctx, &args[0])?;
    Ok(Value::Int(i32::from(n as i16)))
}

pub fn def_to_char_explicit(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let n = def_int_saturating(ctx, &args[0])?;
    let unit = (n as u32) & 0xFFFF;
    Ok(Value::Char(char::from_u32(unit).unwrap_or('\u{fffd}')))
}

pub fn def_to_int_explicit(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::Int(def_int_saturating(ctx, &args[0])?))
}

pub fn def_to_long_explicit(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Float(f) => Ok(Value::Long(*f as i64)),
        Value::Double(f) => Ok(Value::Long(*f as i64)),
        other => Ok(Value::Long(def_long(ctx, other)?)),
    }
}

pub fn def_to_float_explicit(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::Float(def_numeric(ctx, &args[0])? as f32))
}

pub fn def_to_double_explicit(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    Ok(Value::Double(def_numeric(ctx, &args[0])?))
}

fn def_long(ctx: &NativeCtx<'_>, value: &Value) -> Result<i64, RunError> {
    match value {
        Value::Int(i) => Ok(i64::from(*i)),
        Value::Long(i) => Ok(*i),
        Value::Char(c) => Ok(i64::from(*c as u32)),
        other => Err(cce(ctx, other, "number")),
    }
}

pub fn cast_to_string(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Str(s) => Ok(Value::Str(Rc::clone(s))),
        other => Err(cce(ctx, other, "String")),
    }
}

pub fn cast_to_list(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::List(items) => Ok(Value::List(Rc::clone(items))),
        other => Err(cce(ctx, other, "List")),
    }
}

pub fn cast_to_map(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Map(entries) => Ok(Value::Map(Rc::clone(entries))),
        other => Err(cce(ctx, other, "Map")),
    }
}

pub fn cast_to_exception(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Exception(exc) => Ok(Value::Exception(Rc::clone(exc))),
        other => Err(cce(ctx, other, "Exception")),
    }
}

pub fn char_to_string(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    match &args[0] {
        Value::Char(c) => Ok(Value::str(c.to_string())),
        other => Err(cce(ctx, other, "char")),
    }
}

pub fn string_to_char(ctx: &mut NativeCtx<'_>, args: &[Value]) -> NativeResult {
    let s = str_arg(ctx, &args[0])?;
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Char(c)),
        _ => Err(ctx.throw(
            "ClassCastException",
            format!("Cannot cast String with length {} to char", s.chars().count()),
        )),
    }
}

/// Array element values for a typed array created by `NewArray`.
pub(crate) fn default_cell(sort: crate::registry::Sort) -> Value {
    use crate::registry::Sort;
    match sort {
        Sort::Bool => Value::Bool(false),
        Sort::Byte | Sort::Short | Sort::Int => Value::Int(0),
        Sort::Long => Value::Long(0),
        Sort::Float => Value::Float(0.0),
        Sort::Double => Value::Double(0.0),
        Sort::Char => Value::Char('\0'),
        _ => Value::Null,
    }
}

