//! Runtime values.
//!
//! The VM is untyped at the representation level: every stack cell and slot
//! holds a [`Value`]. The *typed* instruction stream guarantees which variant
//! an opcode will find; a mismatch is an internal fault, never a script error.
//!
//! `byte` and `short` exist only in the static layer — at runtime they are
//! `Int` cells whose contents were truncated by a coercion, mirroring how the
//! original target VM widens sub-int integers on its operand stack.

use std::{cell::RefCell, fmt::Write as _, rc::Rc};

use ahash::AHashMap;

use crate::registry::{HostClass, MethodKey, Sort, StructId};

/// A runtime value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<AHashMap<MapKey, Value>>>),
    Array(Rc<ArrayValue>),
    Iter(Rc<RefCell<ValueIter>>),
    Stream(Rc<RefCell<Vec<Value>>>),
    IntStream(Rc<RefCell<Vec<i32>>>),
    Pattern(Rc<PatternValue>),
    Matcher(Rc<RefCell<MatcherValue>>),
    Exception(Rc<ExceptionValue>),
    FuncRef(Rc<FuncRefValue>),
}

/// A typed array instance: element sort plus cells.
#[derive(Debug)]
pub struct ArrayValue {
    pub elem: Sort,
    pub cells: RefCell<Vec<Value>>,
}

/// A materialized iterator, as handed out by `iterator()` and def iteration.
#[derive(Debug)]
pub struct ValueIter {
    pub items: Vec<Value>,
    pub pos: usize,
}

impl ValueIter {
    #[must_use]
    pub fn new(items: Vec<Value>) -> Self {
        Self { items, pos: 0 }
    }
}

/// A compiled regex constant.
#[derive(Debug)]
pub struct PatternValue {
    pub regex: regex::Regex,
    pub source: Box<str>,
}

/// Matcher state over one input string.
#[derive(Debug)]
pub struct MatcherValue {
    pub pattern: Rc<PatternValue>,
    pub input: Rc<str>,
    /// Byte position where the next `find()` resumes.
    pub pos: usize,
    /// Byte range of the last successful match.
    pub last: Option<(usize, usize)>,
}

/// An exception instance; the struct id carries the concrete type.
#[derive(Debug)]
pub struct ExceptionValue {
    pub struct_id: StructId,
    pub message: Option<Rc<str>>,
}

/// Where a function reference lands when invoked.
#[derive(Debug, Clone)]
pub enum FuncTarget {
    /// A script function (including lambda synthetics) by table index.
    Script { id: u16 },
    /// A virtual whitelist method; the receiver is the first capture.
    NativeVirtual { struct_id: StructId, key: MethodKey },
    /// A static whitelist method.
    NativeStatic { struct_id: StructId, key: MethodKey },
    /// A constructor reference.
    Ctor { struct_id: StructId, arity: u8 },
}

/// A function-reference instance: small struct of
/// (interface type, implementation target, captured values).
#[derive(Debug)]
pub struct FuncRefValue {
    pub iface: StructId,
    pub target: FuncTarget,
    pub captures: Vec<Value>,
}

/// Hashable key wrapper for map values.
///
/// Int and Long keys are distinct, as they are for the original host's boxed
/// keys. Doubles hash by bit pattern. Aggregates are not hashable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Char(char),
    DoubleBits(u64),
    Str(Rc<str>),
}

impl MapKey {
    /// Converts a value into a map key, or `None` for unhashable values.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Int(i) => Some(Self::Int(*i)),
            Value::Long(i) => Some(Self::Long(*i)),
            Value::Float(f) => Some(Self::DoubleBits(f64::from(*f).to_bits())),
            Value::Double(f) => Some(Self::DoubleBits(f.to_bits())),
            Value::Char(c) => Some(Self::Char(*c)),
            Value::Str(s) => Some(Self::Str(Rc::clone(s))),
            _ => None,
        }
    }

    /// Converts the key back to a plain value (for key iteration).
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Long(i) => Value::Long(*i),
            Self::Char(c) => Value::Char(*c),
            Self::DoubleBits(bits) => Value::Double(f64::from_bits(*bits)),
            Self::Str(s) => Value::Str(Rc::clone(s)),
        }
    }
}

impl Value {
    #[must_use]
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Self::Str(s.into())
    }

    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    #[must_use]
    pub fn map(entries: AHashMap<MapKey, Self>) -> Self {
        Self::Map(Rc::new(RefCell::new(entries)))
    }

    /// The host-class tag used to pick the runtime dispatch table.
    #[must_use]
    pub fn host_class(&self) -> HostClass {
        match self {
            Self::Null => HostClass::None,
            Self::Bool(_) => HostClass::Boxed(Sort::Bool),
            Self::Int(_) => HostClass::Boxed(Sort::Int),
            Self::Long(_) => HostClass::Boxed(Sort::Long),
            Self::Float(_) => HostClass::Boxed(Sort::Float),
            Self::Double(_) => HostClass::Boxed(Sort::Double),
            Self::Char(_) => HostClass::Boxed(Sort::Char),
            Self::Str(_) => HostClass::Str,
            Self::List(_) => HostClass::List,
            Self::Map(_) => HostClass::Map,
            Self::Array(_) => HostClass::Object,
            Self::Iter(_) => HostClass::Iterator,
            Self::Stream(_) => HostClass::Stream,
            Self::IntStream(_) => HostClass::IntStream,
            Self::Pattern(_) => HostClass::Pattern,
            Self::Matcher(_) => HostClass::Matcher,
            Self::Exception(_) => HostClass::Exception,
            Self::FuncRef(_) => HostClass::Iface,
        }
    }

    /// Short name of the value's runtime type, for error messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "Boolean",
            Self::Int(_) => "Integer",
            Self::Long(_) => "Long",
            Self::Float(_) => "Float",
            Self::Double(_) => "Double",
            Self::Char(_) => "Character",
            Self::Str(_) => "String",
            Self::List(_) => "ArrayList",
            Self::Map(_) => "HashMap",
            Self::Array(_) => "array",
            Self::Iter(_) => "Iterator",
            Self::Stream(_) => "Stream",
            Self::IntStream(_) => "IntStream",
            Self::Pattern(_) => "Pattern",
            Self::Matcher(_) => "Matcher",
            Self::Exception(_) => "Exception",
            Self::FuncRef(_) => "function reference",
        }
    }

    /// Renders the value the way string concatenation and `toString` do.
    #[must_use]
    pub fn display(&self) -> String {
        let mut out = String::new();
        self.display_into(&mut out);
        out
    }

    fn display_into(&self, out: &mut String) {
        match self {
            Self::Null => out.push_str("null"),
            Self::Bool(b) => {
                let _ = write!(out, "{b}");
            }
            Self::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Self::Long(i) => {
                let _ = write!(out, "{i}");
            }
            Self::Float(f) => out.push_str(ryu::Buffer::new().format(*f)),
            Self::Double(f) => out.push_str(ryu::Buffer::new().format(*f)),
            Self::Char(c) => out.push(*c),
            Self::Str(s) => out.push_str(s),
            Self::List(items) => {
                out.push('[');
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.display_into(out);
                }
                out.push(']');
            }
            Self::Array(arr) => {
                out.push('[');
                for (i, item) in arr.cells.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.display_into(out);
                }
                out.push(']');
            }
            Self::Map(entries) => {
                out.push('{');
                for (i, (key, value)) in entries.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    key.to_value().display_into(out);
                    out.push('=');
                    value.display_into(out);
                }
                out.push('}');
            }
            Self::Iter(_) => out.push_str("<iterator>"),
            Self::Stream(_) => out.push_str("<stream>"),
            Self::IntStream(_) => out.push_str("<int stream>"),
            Self::Pattern(p) => out.push_str(&p.source),
            Self::Matcher(_) => out.push_str("<matcher>"),
            Self::Exception(exc) => {
                out.push_str("exception");
                if let Some(message) = &exc.message {
                    let _ = write!(out, ": {message}");
                }
            }
            Self::FuncRef(_) => out.push_str("<function reference>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_key_round_trip() {
        for value in [
            Value::Null,
            Value::Bool(true),
            Value::Int(-3),
            Value::Long(9),
            Value::Char('x'),
            Value::str("k"),
        ] {
            let key = MapKey::from_value(&value).unwrap();
            assert_eq!(key, MapKey::from_value(&key.to_value()).unwrap());
        }
    }

    #[test]
    fn test_int_and_long_keys_are_distinct() {
        assert_ne!(
            MapKey::from_value(&Value::Int(1)).unwrap(),
            MapKey::from_value(&Value::Long(1)).unwrap()
        );
    }

    #[test]
    fn test_list_is_not_hashable() {
        assert!(MapKey::from_value(&Value::list(vec![])).is_none());
    }

    #[test]
    fn test_display_renders_like_host_collections() {
        let list = Value::list(vec![Value::Int(1), Value::str("a"), Value::Null]);
        assert_eq!(list.display(), "[1, a, null]");
        assert_eq!(Value::Double(2.5).display(), "2.5");
    }
}
