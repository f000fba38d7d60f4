//! Type definition registry: the whitelist of host types, members, and the
//! lattice of legal conversions between them.
//!
//! Construction is two-stage. A [`RegistryBuilder`] is open: structs, members,
//! and casts are registered in any order the whitelist allows. [`freeze`]
//! consumes the builder, validates every cross-reference, synthesizes the
//! numeric coercion lattice, derives the runtime dispatch table for the def
//! dispatcher, and returns a deep-immutable [`Registry`] that is freely
//! shared (via `Arc`) across concurrent compiles and executors.
//!
//! [`freeze`]: RegistryBuilder::freeze

pub mod catalog;
pub mod ty;
pub mod whitelist;
pub(crate) mod natives;

use std::fmt;

use ahash::AHashMap;

pub use self::ty::{BridgeRef, Cast, Field, HostClass, Method, MethodKey, NativeFn, Sort, StructDef, StructId, Transform, Ty};
use crate::vm::Value;

/// Failure while building or freezing a registry.
///
/// These are host-startup errors, reported before any script compiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryError {
    pub message: String,
    /// 1-based whitelist line, when the failure came from parsing one.
    pub line: Option<usize>,
}

impl RegistryError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
        }
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "whitelist line {line}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Handles for the types every compile touches.
///
/// Resolved once at freeze; their absence from a whitelist is a freeze error.
#[derive(Debug, Clone, Copy)]
pub struct CoreTypes {
    pub void: Ty,
    pub bool: Ty,
    pub byte: Ty,
    pub short: Ty,
    pub char: Ty,
    pub int: Ty,
    pub long: Ty,
    pub float: Ty,
    pub double: Ty,
    pub def: Ty,
    pub object: Ty,
    pub string: Ty,
    pub exception: Ty,
}

/// Per-struct dispatch table used by the def dispatcher at runtime.
#[derive(Debug, Default)]
pub struct RuntimeTable {
    pub methods: AHashMap<MethodKey, Method>,
    pub getters: AHashMap<Box<str>, Accessor>,
    pub setters: AHashMap<Box<str>, Accessor>,
}

/// A property accessor: an explicit field or a synthesized get/set method.
#[derive(Debug, Clone)]
pub enum Accessor {
    Field(Field),
    Method(Method),
}

/// The open phase of registry construction.
#[derive(Default, Debug)]
pub struct RegistryBuilder {
    structs: Vec<StructDef>,
    by_name: AHashMap<Box<str>, StructId>,
    /// Declared casts, resolved against members at freeze.
    casts: Vec<PendingCast>,
}

#[derive(Debug)]
struct PendingCast {
    from: Ty,
    to: Ty,
    explicit: bool,
    bridge: Option<(StructId, Box<str>)>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a struct under a unique name.
    pub fn add_struct(&mut self, name: &str, sort: Sort, host: HostClass) -> Result<StructId, RegistryError> {
        if !is_type_identifier(name) {
            return Err(RegistryError::new(format!("illegal struct identifier [{name}]")));
        }
        if self.by_name.contains_key(name) {
            return Err(RegistryError::new(format!("duplicate struct [{name}]")));
        }
        let id = StructId::new(self.structs.len());
        self.structs.push(StructDef::new(name, sort, host));
        self.by_name.insert(name.into(), id);
        Ok(id)
    }

    /// Resolves a type name (with optional trailing `[]` pairs) to a type.
    #[must_use]
    pub fn lookup_type(&self, name: &str) -> Option<Ty> {
        lookup_type_in(&self.by_name, &self.structs, name)
    }

    #[must_use]
    pub fn lookup_struct(&self, name: &str) -> Option<StructId> {
        self.by_name.get(name).copied()
    }

    #[must_use]
    pub fn host_of(&self, id: StructId) -> HostClass {
        self.structs[id.index()].host
    }

    /// Registers a constructor, keyed by arity.
    pub fn add_ctor(&mut self, owner: StructId, args: Vec<Ty>, native: NativeFn) -> Result<(), RegistryError> {
        let arity = u8::try_from(args.len()).map_err(|_| RegistryError::new("constructor arity exceeds u8"))?;
        let def = &mut self.structs[owner.index()];
        if def.ctors.contains_key(&arity) {
            return Err(RegistryError::new(format!(
                "duplicate constructor with arity [{arity}] in struct [{}]",
                def.name
            )));
        }
        let ret = Ty::new(owner, def.sort);
        def.ctors.insert(
            arity,
            Method {
                key: MethodKey::new("<init>", args.len()),
                owner,
                args: args.into(),
                ret,
                is_static: false,
                native: Some(native),
            },
        );
        Ok(())
    }

    /// Registers an instance or static method.
    ///
    /// `native` is `None` only for the abstract method of a functional
    /// interface; anywhere else a missing binding is an error at freeze.
    pub fn add_method(
        &mut self,
        owner: StructId,
        name: &str,
        ret: Ty,
        args: Vec<Ty>,
        is_static: bool,
        native: Option<NativeFn>,
    ) -> Result<(), RegistryError> {
        if !is_identifier(name) {
            return Err(RegistryError::new(format!("illegal method identifier [{name}]")));
        }
        let key = MethodKey::new(name, args.len());
        let def = &mut self.structs[owner.index()];
        let table = if is_static { &mut def.statics } else { &mut def.methods };
        if table.contains_key(&key) {
            return Err(RegistryError::new(format!(
                "duplicate method [{key}] in struct [{}]",
                def.name
            )));
        }
        table.insert(
            key.clone(),
            Method {
                key,
                owner,
                args: args.into(),
                ret,
                is_static,
                native,
            },
        );
        Ok(())
    }

    /// Registers a field backed by native accessors.
    pub fn add_field(
        &mut self,
        owner: StructId,
        name: &str,
        ty: Ty,
        is_static: bool,
        getter: NativeFn,
        setter: Option<NativeFn>,
    ) -> Result<(), RegistryError> {
        if !is_identifier(name) {
            return Err(RegistryError::new(format!("illegal field identifier [{name}]")));
        }
        let def = &mut self.structs[owner.index()];
        let table = if is_static { &mut def.static_fields } else { &mut def.fields };
        if table.contains_key(name) {
            return Err(RegistryError::new(format!(
                "duplicate field [{name}] in struct [{}]",
                def.name
            )));
        }
        table.insert(
            name.into(),
            Field {
                name: name.into(),
                owner,
                ty,
                is_static,
                getter,
                setter,
            },
        );
        Ok(())
    }

    /// Registers a cast. Without a bridge both endpoints must be primitive
    /// (validated at freeze); with a bridge, the named method must resolve to
    /// a static member of the bridge struct at freeze.
    pub fn add_cast(
        &mut self,
        from: Ty,
        to: Ty,
        explicit: bool,
        bridge: Option<(StructId, &str)>,
    ) -> Result<(), RegistryError> {
        self.casts.push(PendingCast {
            from,
            to,
            explicit,
            bridge: bridge.map(|(owner, name)| (owner, name.into())),
        });
        Ok(())
    }

    /// Replays a supertype's members onto `owner`, rebinding their owner so
    /// inherited constructors and exception identities are concrete.
    ///
    /// Members the subtype already declares win over inherited copies.
    pub fn copy_struct(&mut self, owner: StructId, super_name: &str) -> Result<(), RegistryError> {
        let Some(&super_id) = self.by_name.get(super_name) else {
            return Err(RegistryError::new(format!(
                "unknown parent struct [{super_name}] for copy into [{}]",
                self.structs[owner.index()].name
            )));
        };
        if super_id == owner {
            return Err(RegistryError::new(format!("struct [{super_name}] cannot copy itself")));
        }
        let parent = &self.structs[super_id.index()];
        let ctors: Vec<_> = parent.ctors.iter().map(|(a, m)| (*a, m.clone())).collect();
        let methods: Vec<_> = parent.methods.values().cloned().collect();
        let statics: Vec<_> = parent.statics.values().cloned().collect();
        let fields: Vec<_> = parent.fields.values().cloned().collect();
        let static_fields: Vec<_> = parent.static_fields.values().cloned().collect();
        let parent_supers: Vec<_> = parent.supers.to_vec();

        let def = &mut self.structs[owner.index()];
        let ret = Ty::new(owner, def.sort);
        for (arity, mut ctor) in ctors {
            ctor.owner = owner;
            ctor.ret = ret;
            def.ctors.entry(arity).or_insert(ctor);
        }
        for mut method in methods {
            method.owner = owner;
            def.methods.entry(method.key.clone()).or_insert(method);
        }
        for mut method in statics {
            method.owner = owner;
            def.statics.entry(method.key.clone()).or_insert(method);
        }
        for mut field in fields {
            field.owner = owner;
            def.fields.entry(field.name.clone()).or_insert(field);
        }
        for mut field in static_fields {
            field.owner = owner;
            def.static_fields.entry(field.name.clone()).or_insert(field);
        }
        if !def.supers.contains(&super_id) {
            def.supers.push(super_id);
        }
        for sup in parent_supers {
            if !def.supers.contains(&sup) {
                def.supers.push(sup);
            }
        }
        Ok(())
    }

    /// Closes the open phase: validates, synthesizes the numeric lattice,
    /// derives runtime tables, and returns the immutable registry.
    pub fn freeze(mut self) -> Result<Registry, RegistryError> {
        let core = self.resolve_core()?;

        // Functional-interface detection before tables are derived.
        for def in &mut self.structs {
            if def.host == HostClass::Iface && def.methods.len() == 1 {
                def.functional = Some(def.methods.keys().next().expect("one method").clone());
            }
        }

        // Every non-abstract member needs a native binding.
        for def in &self.structs {
            for method in def.methods.values().chain(def.statics.values()) {
                if method.native.is_none() && def.functional.as_ref() != Some(&method.key) {
                    return Err(RegistryError::new(format!(
                        "unresolvable host member [{}] in struct [{}]",
                        method.key, def.name
                    )));
                }
            }
        }

        let mut transforms: AHashMap<(Ty, Ty, bool), Transform> = AHashMap::new();

        // Declared casts first: whitelist entries take precedence over the
        // synthesized coercion lattice.
        for pending in std::mem::take(&mut self.casts) {
            let transform = self.resolve_cast(pending)?;
            let key = (transform.from, transform.to, transform.explicit);
            if transforms.insert(key, transform).is_some() {
                return Err(RegistryError::new(format!(
                    "duplicate cast from [{}] to [{}]",
                    self.type_name_of(key.0),
                    self.type_name_of(key.1)
                )));
            }
        }

        // Direct VM coercion exists for every legal numeric pair: widening
        // implicitly, anything else between numeric sorts only explicitly.
        let numerics = [
            core.byte,
            core.short,
            core.char,
            core.int,
            core.long,
            core.float,
            core.double,
        ];
        for &from in &numerics {
            for &to in &numerics {
                if from == to {
                    continue;
                }
                let explicit = !widens_to(from.sort(), to.sort());
                transforms
                    .entry((from, to, explicit))
                    .or_insert_with(|| Transform::plain(from, to, explicit));
            }
        }

        // Transitive supertype closure for instanceof / catch matching.
        let supers_closure = self.close_supers();
        for (def, supers) in self.structs.iter_mut().zip(supers_closure) {
            def.supers = supers.into();
        }

        // Runtime dispatch tables and the host-class map.
        let runtime: Vec<RuntimeTable> = self.structs.iter().map(derive_runtime_table).collect();
        let mut by_host: AHashMap<HostClass, StructId> = AHashMap::new();
        for (index, def) in self.structs.iter().enumerate() {
            let instance_host = matches!(
                def.host,
                HostClass::Object
                    | HostClass::Str
                    | HostClass::List
                    | HostClass::Map
                    | HostClass::Iterator
                    | HostClass::Pattern
                    | HostClass::Matcher
                    | HostClass::Stream
                    | HostClass::IntStream
                    | HostClass::Boxed(_)
            );
            if instance_host && by_host.insert(def.host, StructId::new(index)).is_some() {
                return Err(RegistryError::new(format!(
                    "two structs claim the same host class (second is [{}])",
                    def.name
                )));
            }
        }

        let mut unbox: AHashMap<StructId, Ty> = AHashMap::new();
        for (index, def) in self.structs.iter().enumerate() {
            if let HostClass::Boxed(sort) = def.host
                && def.sort == Sort::Object
            {
                let prim = match sort {
                    Sort::Bool => core.bool,
                    Sort::Byte => core.byte,
                    Sort::Short => core.short,
                    Sort::Char => core.char,
                    Sort::Int => core.int,
                    Sort::Long => core.long,
                    Sort::Float => core.float,
                    Sort::Double => core.double,
                    _ => return Err(RegistryError::new(format!("struct [{}] boxes a non-primitive", def.name))),
                };
                unbox.insert(StructId::new(index), prim);
            }
        }

        Ok(Registry {
            structs: self.structs,
            by_name: self.by_name,
            transforms,
            runtime,
            by_host,
            unbox,
            core,
        })
    }

    fn resolve_core(&self) -> Result<CoreTypes, RegistryError> {
        let get = |name: &str| {
            self.lookup_type(name)
                .ok_or_else(|| RegistryError::new(format!("whitelist is missing required struct [{name}]")))
        };
        Ok(CoreTypes {
            void: get("void")?,
            bool: get("boolean")?,
            byte: get("byte")?,
            short: get("short")?,
            char: get("char")?,
            int: get("int")?,
            long: get("long")?,
            float: get("float")?,
            double: get("double")?,
            def: get("def")?,
            object: get("Object")?,
            string: get("String")?,
            exception: get("Exception")?,
        })
    }

    fn resolve_cast(&self, pending: PendingCast) -> Result<Transform, RegistryError> {
        let PendingCast {
            from,
            to,
            explicit,
            bridge,
        } = pending;
        let Some((owner, name)) = bridge else {
            if !(from.sort().is_primitive() && to.sort().is_primitive()) {
                return Err(RegistryError::new(format!(
                    "plain cast from [{}] to [{}] requires primitive endpoints",
                    self.type_name_of(from),
                    self.type_name_of(to)
                )));
            }
            return Ok(Transform::plain(from, to, explicit));
        };

        let owner_def = &self.structs[owner.index()];
        let key = MethodKey::new(&name, 1);
        let Some(method) = owner_def.statics.get(&key) else {
            return Err(RegistryError::new(format!(
                "cast bridge [{}] not found as a static method of [{}]",
                key, owner_def.name
            )));
        };
        // Bracketing casts are derived from the bridge signature: an upcast
        // into the bridge's argument, a downcast out of its return.
        let arg = method.args[0];
        let upcast = (arg != from).then_some(arg);
        let downcast = (method.ret != to).then_some(to);
        if method.ret != to && !to.sort().is_primitive() && method.ret.sort() != Sort::Def {
            return Err(RegistryError::new(format!(
                "cast bridge [{}] returns [{}] which is not assignable to [{}]",
                key,
                self.type_name_of(method.ret),
                self.type_name_of(to)
            )));
        }
        Ok(Transform {
            from,
            to,
            explicit,
            bridge: Some(BridgeRef {
                owner,
                key: method.key.clone(),
            }),
            upcast,
            downcast,
        })
    }

    fn close_supers(&self) -> Vec<Vec<StructId>> {
        self.structs
            .iter()
            .map(|def| {
                let mut seen: Vec<StructId> = Vec::new();
                let mut work: Vec<StructId> = def.supers.to_vec();
                while let Some(sup) = work.pop() {
                    if seen.contains(&sup) {
                        continue;
                    }
                    seen.push(sup);
                    work.extend(self.structs[sup.index()].supers.iter().copied());
                }
                seen
            })
            .collect()
    }

    fn type_name_of(&self, ty: Ty) -> String {
        let mut name = self.structs[ty.struct_id.index()].name.to_string();
        for _ in 0..ty.dims {
            name.push_str("[]");
        }
        name
    }
}

/// The frozen, deep-immutable registry.
pub struct Registry {
    structs: Vec<StructDef>,
    by_name: AHashMap<Box<str>, StructId>,
    transforms: AHashMap<(Ty, Ty, bool), Transform>,
    runtime: Vec<RuntimeTable>,
    by_host: AHashMap<HostClass, StructId>,
    unbox: AHashMap<StructId, Ty>,
    core: CoreTypes,
}

impl Registry {
    /// The always-present core type handles.
    #[must_use]
    pub fn core(&self) -> &CoreTypes {
        &self.core
    }

    /// Resolves a type name, with trailing `[]` pairs for arrays.
    #[must_use]
    pub fn lookup_type(&self, name: &str) -> Option<Ty> {
        lookup_type_in(&self.by_name, &self.structs, name)
    }

    #[must_use]
    pub fn lookup_struct(&self, name: &str) -> Option<StructId> {
        self.by_name.get(name).copied()
    }

    /// True when `name` (without array suffixes) is a registered type name;
    /// the lexer uses this for the TYPE/ID token split.
    #[must_use]
    pub fn is_type_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    #[must_use]
    pub fn struct_def(&self, id: StructId) -> &StructDef {
        &self.structs[id.index()]
    }

    #[must_use]
    pub fn struct_name(&self, id: StructId) -> &str {
        &self.structs[id.index()].name
    }

    /// Display name of a type, with array suffixes.
    #[must_use]
    pub fn type_name(&self, ty: Ty) -> String {
        let mut name = self.struct_name(ty.struct_id).to_string();
        for _ in 0..ty.dims {
            name.push_str("[]");
        }
        name
    }

    #[must_use]
    pub fn lookup_method(&self, id: StructId, key: &MethodKey) -> Option<&Method> {
        self.structs[id.index()].methods.get(key)
    }

    #[must_use]
    pub fn lookup_static(&self, id: StructId, key: &MethodKey) -> Option<&Method> {
        self.structs[id.index()].statics.get(key)
    }

    #[must_use]
    pub fn lookup_ctor(&self, id: StructId, arity: u8) -> Option<&Method> {
        self.structs[id.index()].ctors.get(&arity)
    }

    #[must_use]
    pub fn lookup_field(&self, id: StructId, name: &str) -> Option<&Field> {
        self.structs[id.index()].fields.get(name)
    }

    #[must_use]
    pub fn lookup_static_field(&self, id: StructId, name: &str) -> Option<&Field> {
        self.structs[id.index()].static_fields.get(name)
    }

    /// The single abstract method of a functional interface, if `id` is one.
    #[must_use]
    pub fn functional(&self, id: StructId) -> Option<&Method> {
        let def = &self.structs[id.index()];
        def.functional.as_ref().and_then(|key| def.methods.get(key))
    }

    /// Cast resolution: exact map match wins. Implicit analyzer-driven
    /// insertions may only consume `explicit=false` entries; an explicit cast
    /// expression prefers the explicit entry and falls back to the implicit
    /// one. Identity casts return `None` (no conversion needed).
    #[must_use]
    pub fn lookup_cast(&self, from: Ty, to: Ty, explicit: bool) -> Option<&Transform> {
        if from == to {
            return None;
        }
        if explicit && let Some(transform) = self.transforms.get(&(from, to, true)) {
            return Some(transform);
        }
        self.transforms.get(&(from, to, false))
    }

    /// True when a conversion (or identity) from `from` to `to` exists.
    #[must_use]
    pub fn can_cast(&self, from: Ty, to: Ty, explicit: bool) -> bool {
        from == to || self.lookup_cast(from, to, explicit).is_some()
    }

    /// Unboxes wrapper types to their primitive; identity otherwise.
    #[must_use]
    pub fn unbox(&self, ty: Ty) -> Ty {
        if ty.dims > 0 {
            return ty;
        }
        self.unbox.get(&ty.struct_id).copied().unwrap_or(ty)
    }

    /// Unary numeric promotion: sub-int widens to int.
    #[must_use]
    pub fn promote_unary(&self, ty: Ty) -> Option<Ty> {
        let ty = self.unbox(ty);
        match ty.sort() {
            Sort::Def => Some(self.core.def),
            Sort::Byte | Sort::Short | Sort::Char | Sort::Int => Some(self.core.int),
            Sort::Long => Some(self.core.long),
            Sort::Float => Some(self.core.float),
            Sort::Double => Some(self.core.double),
            _ => None,
        }
    }

    /// Binary arithmetic promotion.
    ///
    /// Either operand def promotes to def; a non-numeric reference operand
    /// promotes to object; both bool stay bool; otherwise the wider of
    /// {double, float, long, int} with sub-int operands widened to int.
    #[must_use]
    pub fn promote_binary(&self, left: Ty, right: Ty) -> Option<Ty> {
        let left = self.unbox(left);
        let right = self.unbox(right);
        let (l, r) = (left.sort(), right.sort());
        if l == Sort::Def || r == Sort::Def {
            return Some(self.core.def);
        }
        if matches!(l, Sort::Object | Sort::Array) || matches!(r, Sort::Object | Sort::Array) {
            return Some(self.core.object);
        }
        if l == Sort::Bool && r == Sort::Bool {
            return Some(self.core.bool);
        }
        if !l.is_numeric() || !r.is_numeric() {
            return None;
        }
        Some(match (l, r) {
            (Sort::Double, _) | (_, Sort::Double) => self.core.double,
            (Sort::Float, _) | (_, Sort::Float) => self.core.float,
            (Sort::Long, _) | (_, Sort::Long) => self.core.long,
            _ => self.core.int,
        })
    }

    /// Promotion for `+`: a String operand makes the whole operation a
    /// string concatenation.
    #[must_use]
    pub fn promote_add(&self, left: Ty, right: Ty) -> Option<Ty> {
        if left == self.core.string || right == self.core.string {
            return Some(self.core.string);
        }
        self.promote_binary(left, right)
    }

    /// Promotion for `==`/`!=`: bools compare as bool, numerics promote,
    /// anything def is def, and references compare as object.
    #[must_use]
    pub fn promote_equality(&self, left: Ty, right: Ty) -> Option<Ty> {
        let l = self.unbox(left).sort();
        let r = self.unbox(right).sort();
        if l == Sort::Def || r == Sort::Def {
            return Some(self.core.def);
        }
        if l == Sort::Bool && r == Sort::Bool {
            return Some(self.core.bool);
        }
        if l.is_numeric() && r.is_numeric() {
            return self.promote_binary(left, right);
        }
        Some(self.core.object)
    }

    /// Promotion for the branches of a ternary.
    #[must_use]
    pub fn promote_conditional(&self, left: Ty, right: Ty) -> Option<Ty> {
        if left == right {
            return Some(left);
        }
        let l = self.unbox(left).sort();
        let r = self.unbox(right).sort();
        if l == Sort::Def || r == Sort::Def {
            return Some(self.core.def);
        }
        if l.is_numeric() && r.is_numeric() {
            return self.promote_binary(left, right);
        }
        Some(self.core.object)
    }

    /// Promotion for shift operators: the result follows the left operand,
    /// and the right operand must be an integer (promoted independently).
    #[must_use]
    pub fn promote_shift(&self, left: Ty, right: Ty) -> Option<Ty> {
        let l = self.unbox(left);
        let r = self.unbox(right);
        if l.sort() == Sort::Def || r.sort() == Sort::Def {
            return Some(self.core.def);
        }
        if !l.sort().is_integer() || !r.sort().is_integer() {
            return None;
        }
        self.promote_unary(left)
    }

    /// Subtype check over the copied-member hierarchy.
    #[must_use]
    pub fn is_subtype(&self, sub: StructId, sup: StructId) -> bool {
        sub == sup || self.structs[sub.index()].supers.contains(&sup)
    }

    /// True when the struct is `Map` or copies `Map` members (brace and
    /// dot-field shortcuts apply).
    #[must_use]
    pub fn is_map_like(&self, id: StructId) -> bool {
        self.lookup_struct("Map").is_some_and(|map| self.is_subtype(id, map))
    }

    /// True when the struct is `List` or copies `List` members.
    #[must_use]
    pub fn is_list_like(&self, id: StructId) -> bool {
        self.lookup_struct("List").is_some_and(|list| self.is_subtype(id, list))
    }

    /// Maps a runtime value to the struct whose runtime table serves it.
    #[must_use]
    pub fn struct_for_value(&self, value: &Value) -> Option<StructId> {
        if let Value::Exception(exc) = value {
            return Some(exc.struct_id);
        }
        if let Value::FuncRef(fr) = value {
            return Some(fr.iface);
        }
        self.by_host.get(&value.host_class()).copied()
    }

    /// The derived runtime dispatch table for a struct.
    #[must_use]
    pub fn runtime_table(&self, id: StructId) -> &RuntimeTable {
        &self.runtime[id.index()]
    }

    /// Number of registered structs (diagnostics and tests).
    #[must_use]
    pub fn struct_count(&self) -> usize {
        self.structs.len()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("structs", &self.structs.len())
            .field("transforms", &self.transforms.len())
            .finish_non_exhaustive()
    }
}

/// Zero-arg `getFoo`/`isFoo` become getters for `foo`, one-arg `setFoo`
/// a setter; explicit fields win over synthesized property names.
fn derive_runtime_table(def: &StructDef) -> RuntimeTable {
    let mut table = RuntimeTable::default();
    for (key, method) in &def.methods {
        table.methods.insert(key.clone(), method.clone());
        if key.arity == 0 {
            if let Some(prop) = property_name(&key.name, "get").or_else(|| property_name(&key.name, "is")) {
                table.getters.insert(prop, Accessor::Method(method.clone()));
            }
        } else if key.arity == 1
            && let Some(prop) = property_name(&key.name, "set")
        {
            table.setters.insert(prop, Accessor::Method(method.clone()));
        }
    }
    for (name, field) in &def.fields {
        table.getters.insert(name.clone(), Accessor::Field(field.clone()));
        if field.setter.is_some() {
            table.setters.insert(name.clone(), Accessor::Field(field.clone()));
        }
    }
    table
}

fn property_name(method: &str, prefix: &str) -> Option<Box<str>> {
    let rest = method.strip_prefix(prefix)?;
    let mut chars = rest.chars();
    let first = chars.next()?;
    if !first.is_ascii_uppercase() {
        return None;
    }
    let mut prop = String::with_capacity(rest.len());
    prop.push(first.to_ascii_lowercase());
    prop.push_str(chars.as_str());
    Some(prop.into())
}

fn lookup_type_in(by_name: &AHashMap<Box<str>, StructId>, structs: &[StructDef], name: &str) -> Option<Ty> {
    let mut base = name;
    let mut dims = 0u8;
    while let Some(stripped) = base.strip_suffix("[]") {
        base = stripped;
        dims = dims.checked_add(1)?;
    }
    let &id = by_name.get(base)?;
    let def = &structs[id.index()];
    if dims > 0 && def.sort == Sort::Void {
        return None;
    }
    Some(Ty::new(id, def.sort).array_of(dims))
}

/// Java-style primitive widening table.
fn widens_to(from: Sort, to: Sort) -> bool {
    match from {
        Sort::Byte => matches!(to, Sort::Short | Sort::Int | Sort::Long | Sort::Float | Sort::Double),
        Sort::Short | Sort::Char => matches!(to, Sort::Int | Sort::Long | Sort::Float | Sort::Double),
        Sort::Int => matches!(to, Sort::Long | Sort::Float | Sort::Double),
        Sort::Long => matches!(to, Sort::Float | Sort::Double),
        Sort::Float => to == Sort::Double,
        _ => false,
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_type_identifier(name: &str) -> bool {
    is_identifier(name)
}

#[cfg(test)]
mod tests {
    use super::{catalog::default_registry, *};

    #[test]
    fn test_promote_binary_widening() {
        let registry = default_registry().unwrap();
        let core = registry.core();
        assert_eq!(registry.promote_binary(core.byte, core.short), Some(core.int));
        assert_eq!(registry.promote_binary(core.int, core.long), Some(core.long));
        assert_eq!(registry.promote_binary(core.long, core.float), Some(core.float));
        assert_eq!(registry.promote_binary(core.int, core.double), Some(core.double));
        assert_eq!(registry.promote_binary(core.bool, core.bool), Some(core.bool));
        assert_eq!(registry.promote_binary(core.bool, core.int), None);
        assert_eq!(registry.promote_binary(core.def, core.int), Some(core.def));
        assert_eq!(registry.promote_binary(core.string, core.int), Some(core.object));
    }

    #[test]
    fn test_promote_unary_widens_sub_int() {
        let registry = default_registry().unwrap();
        let core = registry.core();
        assert_eq!(registry.promote_unary(core.byte), Some(core.int));
        assert_eq!(registry.promote_unary(core.char), Some(core.int));
        assert_eq!(registry.promote_unary(core.double), Some(core.double));
        assert_eq!(registry.promote_unary(core.bool), None);
    }

    #[test]
    fn test_numeric_lattice_widening_is_implicit() {
        let registry = default_registry().unwrap();
        let core = registry.core();
        assert!(registry.lookup_cast(core.int, core.long, false).is_some());
        assert!(registry.lookup_cast(core.long, core.int, false).is_none());
        assert!(registry.lookup_cast(core.long, core.int, true).is_some());
        // R2 precondition: widening tower is closed.
        assert!(registry.can_cast(core.byte, core.short, false));
        assert!(registry.can_cast(core.short, core.long, false));
    }

    #[test]
    fn test_unbox() {
        let registry = default_registry().unwrap();
        let core = registry.core();
        let integer = registry.lookup_type("Integer").unwrap();
        assert_eq!(registry.unbox(integer), core.int);
        assert_eq!(registry.unbox(core.string), core.string);
    }

    #[test]
    fn test_runtime_table_synthesis() {
        let registry = default_registry().unwrap();
        let exc = registry.lookup_struct("Exception").unwrap();
        let table = registry.runtime_table(exc);
        // getMessage() synthesizes the `message` property.
        assert!(table.getters.contains_key("message"));
        assert!(table.methods.contains_key(&MethodKey::new("getMessage", 0)));
    }

    #[test]
    fn test_copy_struct_rebinds_owner() {
        let registry = default_registry().unwrap();
        let iae = registry.lookup_struct("IllegalArgumentException").unwrap();
        let method = registry.lookup_method(iae, &MethodKey::new("getMessage", 0)).unwrap();
        assert_eq!(method.owner, iae);
        let exception = registry.lookup_struct("Exception").unwrap();
        assert!(registry.is_subtype(iae, exception));
        assert!(!registry.is_subtype(exception, iae));
    }

    #[test]
    fn test_functional_interface_detection() {
        let registry = default_registry().unwrap();
        let func = registry.lookup_struct("Function").unwrap();
        let sam = registry.functional(func).unwrap();
        assert_eq!(sam.key, MethodKey::new("apply", 1));
        let list = registry.lookup_struct("List").unwrap();
        assert!(registry.functional(list).is_none());
    }

    #[test]
    fn test_duplicate_member_same_arity_rejected() {
        let mut builder = RegistryBuilder::new();
        let id = builder.add_struct("Thing", Sort::Object, HostClass::Static).unwrap();
        let int = Ty::new(id, Sort::Object);
        builder.add_method(id, "go", int, vec![int], false, None).unwrap();
        let err = builder.add_method(id, "go", int, vec![int], false, None).unwrap_err();
        assert!(err.message.contains("duplicate method [go/1]"));
    }

    #[test]
    fn test_plain_cast_requires_primitive_endpoints() {
        let registry = default_registry();
        assert!(registry.is_ok());
        let mut builder = catalog::default_builder().unwrap();
        let string = builder.lookup_type("String").unwrap();
        let object = builder.lookup_type("Object").unwrap();
        builder.add_cast(string, object, false, None).unwrap();
        let err = builder.freeze().unwrap_err();
        assert!(err.message.contains("requires primitive endpoints"));
    }
}
