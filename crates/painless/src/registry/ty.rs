//! Core type-model values: sorts, types, member descriptors, and casts.
//!
//! Everything here is small and value-like. A [`Ty`] is a `Copy` handle that
//! is meaningful only relative to the [`Registry`](super::Registry) that
//! produced it; equality is structural on (struct, dims).

use smallvec::SmallVec;
use strum::{Display, IntoStaticStr};

use crate::vm::{NativeCtx, RunError, Value};

/// Primitive sort tag of a type.
///
/// Reference types are `Object`, the dynamic type is `Def`, and arrays are
/// `Array` regardless of element type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, serde::Serialize, serde::Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum Sort {
    Void,
    Bool,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    Object,
    Def,
    Array,
}

impl Sort {
    /// Width in machine cells: `long` and `double` occupy two slots.
    #[must_use]
    pub const fn size(self) -> u16 {
        match self {
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }

    /// True for the non-void primitive sorts.
    #[must_use]
    pub const fn is_primitive(self) -> bool {
        matches!(
            self,
            Self::Bool | Self::Byte | Self::Short | Self::Char | Self::Int | Self::Long | Self::Float | Self::Double
        )
    }

    /// True for sorts that participate in arithmetic promotion.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Byte | Self::Short | Self::Char | Self::Int | Self::Long | Self::Float | Self::Double
        )
    }

    /// True for the integer tower (shift/bitwise operands).
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::Byte | Self::Short | Self::Char | Self::Int | Self::Long)
    }
}

/// Index of a struct inside the registry's struct table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct StructId(u16);

impl StructId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u16::try_from(index).expect("struct table exceeds u16 range"))
    }

    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A resolved type: a struct handle plus an array descriptor.
///
/// For scalars `dims == 0` and `sort()` is the struct's own sort. For arrays
/// `struct_id`/`base` describe the *element* and `sort()` is [`Sort::Array`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Ty {
    pub struct_id: StructId,
    base: Sort,
    pub dims: u8,
}

impl Ty {
    pub(crate) const fn new(struct_id: StructId, base: Sort) -> Self {
        Self {
            struct_id,
            base,
            dims: 0,
        }
    }

    /// The sort used for emission and promotion decisions.
    #[must_use]
    pub const fn sort(self) -> Sort {
        if self.dims > 0 { Sort::Array } else { self.base }
    }

    /// The element sort of the innermost base struct.
    #[must_use]
    pub const fn base_sort(self) -> Sort {
        self.base
    }

    /// Wraps this type in `dims` further array dimensions.
    #[must_use]
    pub fn array_of(self, dims: u8) -> Self {
        Self {
            dims: self.dims + dims,
            ..self
        }
    }

    /// Strips one array dimension.
    ///
    /// # Panics
    /// Panics if called on a non-array type; callers check `sort()` first.
    #[must_use]
    pub fn element(self) -> Self {
        assert!(self.dims > 0, "element() on non-array type");
        Self {
            dims: self.dims - 1,
            ..self
        }
    }

    /// Slot width in cells.
    #[must_use]
    pub const fn size(self) -> u16 {
        self.sort().size()
    }
}

/// Member lookup key: overloading is arity-only, by design.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct MethodKey {
    pub name: Box<str>,
    pub arity: u8,
}

impl MethodKey {
    #[must_use]
    pub fn new(name: &str, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity: u8::try_from(arity).expect("method arity exceeds u8"),
        }
    }
}

impl std::fmt::Display for MethodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// Native implementation of a whitelisted method.
///
/// `args[0]` is the receiver for instance methods; statics and constructors
/// receive only their declared arguments. The context handle allows natives
/// to re-enter the VM, which is how stream operations invoke lambdas.
pub type NativeFn = fn(&mut NativeCtx<'_>, &[Value]) -> Result<Value, RunError>;

/// A whitelisted method or constructor.
#[derive(Clone)]
pub struct Method {
    pub key: MethodKey,
    /// Struct the member is bound to. Copied members rebind to the subtype.
    pub owner: StructId,
    pub args: SmallVec<[Ty; 4]>,
    pub ret: Ty,
    pub is_static: bool,
    /// `None` only for abstract interface methods.
    pub native: Option<NativeFn>,
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("is_static", &self.is_static)
            .field("native", &self.native.is_some())
            .finish_non_exhaustive()
    }
}

/// A whitelisted field, backed by native accessor functions.
#[derive(Clone)]
pub struct Field {
    pub name: Box<str>,
    pub owner: StructId,
    pub ty: Ty,
    pub is_static: bool,
    /// `getter(&mut ctx, &[receiver])` for instance fields, `&[]` for statics.
    pub getter: NativeFn,
    /// Absent for read-only fields.
    pub setter: Option<NativeFn>,
}

impl std::fmt::Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("is_static", &self.is_static)
            .finish_non_exhaustive()
    }
}

/// Cast endpoints; the key of the registry's transform map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cast {
    pub from: Ty,
    pub to: Ty,
    /// Explicit entries are only consumed by explicit cast expressions.
    pub explicit: bool,
}

/// Reference to a static bridge method implementing a transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRef {
    pub owner: StructId,
    pub key: MethodKey,
}

/// A registered conversion.
///
/// With no bridge this is a plain cast: both endpoints primitive, emitted as
/// a direct VM coercion (or a no-op for synthesized identity upcasts). With
/// a bridge, emission is `upcast? → invoke bridge → downcast?`.
#[derive(Debug, Clone)]
pub struct Transform {
    pub from: Ty,
    pub to: Ty,
    pub explicit: bool,
    pub bridge: Option<BridgeRef>,
    pub upcast: Option<Ty>,
    pub downcast: Option<Ty>,
}

impl Transform {
    pub(crate) fn plain(from: Ty, to: Ty, explicit: bool) -> Self {
        Self {
            from,
            to,
            explicit,
            bridge: None,
            upcast: None,
            downcast: None,
        }
    }
}

/// Tag linking a struct to its runtime value representation.
///
/// This is the reflection substitute: the def dispatcher maps a runtime
/// value's host class back to the struct whose runtime table serves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostClass {
    /// Primitives, `void`, and `def` have no host entry.
    None,
    /// The root reference type.
    Object,
    Str,
    List,
    Map,
    Iterator,
    Pattern,
    Matcher,
    Stream,
    IntStream,
    /// Exception instances carry their concrete struct id themselves.
    Exception,
    /// Boxed wrapper of a primitive sort.
    Boxed(Sort),
    /// Functional-interface candidate; its methods are abstract.
    Iface,
    /// No instances exist (static utility structs).
    Static,
}

/// A whitelisted struct: the unit of member lookup.
#[derive(Debug)]
pub struct StructDef {
    pub name: Box<str>,
    pub sort: Sort,
    pub host: HostClass,
    pub ctors: ahash::AHashMap<u8, Method>,
    pub methods: indexmap::IndexMap<MethodKey, Method>,
    pub statics: indexmap::IndexMap<MethodKey, Method>,
    pub fields: indexmap::IndexMap<Box<str>, Field>,
    pub static_fields: indexmap::IndexMap<Box<str>, Field>,
    /// Supertypes accumulated by member copying; transitive after freeze.
    pub supers: SmallVec<[StructId; 4]>,
    /// The single abstract method of a functional interface, set at freeze.
    pub functional: Option<MethodKey>,
}

impl StructDef {
    pub(crate) fn new(name: &str, sort: Sort, host: HostClass) -> Self {
        Self {
            name: name.into(),
            sort,
            host,
            ctors: ahash::AHashMap::new(),
            methods: indexmap::IndexMap::new(),
            statics: indexmap::IndexMap::new(),
            fields: indexmap::IndexMap::new(),
            static_fields: indexmap::IndexMap::new(),
            supers: SmallVec::new(),
            functional: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_sizes() {
        assert_eq!(Sort::Long.size(), 2);
        assert_eq!(Sort::Double.size(), 2);
        assert_eq!(Sort::Int.size(), 1);
        assert_eq!(Sort::Object.size(), 1);
    }

    #[test]
    fn test_array_descriptor_equality() {
        let id = StructId::new(3);
        let scalar = Ty::new(id, Sort::Int);
        let arr = scalar.array_of(2);
        assert_eq!(arr.sort(), Sort::Array);
        assert_eq!(arr.element().element(), scalar);
        assert_ne!(scalar, arr);
        assert_eq!(arr, Ty::new(id, Sort::Int).array_of(2));
    }

    #[test]
    fn test_method_key_display() {
        assert_eq!(MethodKey::new("substring", 2).to_string(), "substring/2");
    }
}
