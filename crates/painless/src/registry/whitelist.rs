//! Line-oriented whitelist parsing.
//!
//! The registry's input is a declarative listing with five entry kinds:
//!
//! ```text
//! struct <name> <host-class>
//! ctor   <struct> <args...>
//! method <struct> [static] <name> <ret> <args...>
//! field  <struct> [static] <name> <type>
//! cast   <from> <to> [explicit] [via <struct> <method>]
//! ```
//!
//! Ordering is enforced: all `struct` entries come before any member entry,
//! and all `cast` entries come after all members. `#` starts a comment.
//!
//! Host-class tokens bind a struct to its runtime representation (the
//! reflection substitute): `prim`, `dynamic`, `object`, `string`, `list`,
//! `map`, `iterator`, `pattern`, `matcher`, `stream`, `intstream`,
//! `exception`, `boxed:<prim>`, `iface`, `static`.

use ahash::AHashMap;

use super::{HostClass, NativeFn, RegistryBuilder, RegistryError, Sort, StructId, Ty};

/// Native bindings the whitelist resolves member entries against.
///
/// A member entry with no binding is the "unreflectable host member" failure
/// mode, reported at registry build rather than script compile.
#[derive(Default)]
pub struct NativeBindings {
    methods: AHashMap<Box<str>, NativeFn>,
    ctors: AHashMap<Box<str>, NativeFn>,
    fields: AHashMap<Box<str>, (NativeFn, Option<NativeFn>)>,
}

impl NativeBindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `Struct.name/arity` (arity excluding the receiver).
    pub fn method(&mut self, owner: &str, name: &str, arity: usize, native: NativeFn) -> &mut Self {
        self.methods.insert(method_binding_key(owner, name, arity).into(), native);
        self
    }

    /// Binds `Struct/arity` for a constructor.
    pub fn ctor(&mut self, owner: &str, arity: usize, native: NativeFn) -> &mut Self {
        self.ctors.insert(format!("{owner}/{arity}").into(), native);
        self
    }

    /// Binds `Struct#name` accessors for a field.
    pub fn field(&mut self, owner: &str, name: &str, getter: NativeFn, setter: Option<NativeFn>) -> &mut Self {
        self.fields.insert(format!("{owner}#{name}").into(), (getter, setter));
        self
    }
}

fn method_binding_key(owner: &str, name: &str, arity: usize) -> String {
    format!("{owner}.{name}/{arity}")
}

/// Parses whitelist text into an open [`RegistryBuilder`].
pub fn parse_whitelist(text: &str, natives: &NativeBindings) -> Result<RegistryBuilder, RegistryError> {
    let mut builder = RegistryBuilder::new();
    // 0 = structs, 1 = members, 2 = casts; entries may only advance.
    let mut phase = 0u8;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let mut words = line.split_whitespace();
        let kind = words.next().expect("non-empty line has a first word");
        let words: Vec<&str> = words.collect();
        let result = match kind {
            "struct" => {
                if phase > 0 {
                    Err(RegistryError::new("struct entries must precede all members"))
                } else {
                    parse_struct(&mut builder, &words)
                }
            }
            "ctor" | "method" | "field" => {
                if phase > 1 {
                    Err(RegistryError::new("member entries must precede all casts"))
                } else {
                    phase = 1;
                    match kind {
                        "ctor" => parse_ctor(&mut builder, natives, &words),
                        "method" => parse_method(&mut builder, natives, &words),
                        _ => parse_field(&mut builder, natives, &words),
                    }
                }
            }
            "cast" => {
                phase = 2;
                parse_cast(&mut builder, &words)
            }
            other => Err(RegistryError::new(format!("unknown whitelist entry kind [{other}]"))),
        };
        if let Err(mut err) = result {
            err.line = Some(line_no);
            return Err(err);
        }
    }
    Ok(builder)
}

fn parse_struct(builder: &mut RegistryBuilder, words: &[&str]) -> Result<(), RegistryError> {
    let [name, host] = words else {
        return Err(RegistryError::new("expected: struct <name> <host-class>"));
    };
    let (sort, host) = parse_host(name, host)?;
    builder.add_struct(name, sort, host)?;
    Ok(())
}

fn parse_host(name: &str, token: &str) -> Result<(Sort, HostClass), RegistryError> {
    let host = match token {
        "prim" => {
            let sort = match name {
                "void" => Sort::Void,
                "boolean" => Sort::Bool,
                "byte" => Sort::Byte,
                "short" => Sort::Short,
                "char" => Sort::Char,
                "int" => Sort::Int,
                "long" => Sort::Long,
                "float" => Sort::Float,
                "double" => Sort::Double,
                other => return Err(RegistryError::new(format!("[{other}] is not a primitive type name"))),
            };
            return Ok((sort, HostClass::None));
        }
        "dynamic" => return Ok((Sort::Def, HostClass::None)),
        "object" => HostClass::Object,
        "string" => HostClass::Str,
        "list" => HostClass::List,
        "map" => HostClass::Map,
        "iterator" => HostClass::Iterator,
        "pattern" => HostClass::Pattern,
        "matcher" => HostClass::Matcher,
        "stream" => HostClass::Stream,
        "intstream" => HostClass::IntStream,
        "exception" => HostClass::Exception,
        "iface" => HostClass::Iface,
        "static" => HostClass::Static,
        boxed if boxed.starts_with("boxed:") => {
            let sort = match &boxed["boxed:".len()..] {
                "boolean" => Sort::Bool,
                "byte" => Sort::Byte,
                "short" => Sort::Short,
                "char" => Sort::Char,
                "int" => Sort::Int,
                "long" => Sort::Long,
                "float" => Sort::Float,
                "double" => Sort::Double,
                other => return Err(RegistryError::new(format!("[{other}] is not a boxable primitive"))),
            };
            HostClass::Boxed(sort)
        }
        other => return Err(RegistryError::new(format!("unknown host class [{other}]"))),
    };
    Ok((Sort::Object, host))
}

fn owner_of(builder: &RegistryBuilder, name: &str) -> Result<StructId, RegistryError> {
    builder
        .lookup_struct(name)
        .ok_or_else(|| RegistryError::new(format!("unknown struct [{name}]")))
}

fn type_of(builder: &RegistryBuilder, name: &str) -> Result<Ty, RegistryError> {
    builder
        .lookup_type(name)
        .ok_or_else(|| RegistryError::new(format!("unknown type [{name}]")))
}

fn parse_ctor(builder: &mut RegistryBuilder, natives: &NativeBindings, words: &[&str]) -> Result<(), RegistryError> {
    let [owner_name, arg_names @ ..] = words else {
        return Err(RegistryError::new("expected: ctor <struct> <args...>"));
    };
    let owner = owner_of(builder, owner_name)?;
    let args = arg_names
        .iter()
        .map(|name| type_of(builder, name))
        .collect::<Result<Vec<_>, _>>()?;
    let key: Box<str> = format!("{owner_name}/{}", args.len()).into();
    let Some(&native) = natives.ctors.get(&key) else {
        return Err(RegistryError::new(format!("unreflectable host constructor [{key}]")));
    };
    builder.add_ctor(owner, args, native)
}

fn parse_method(builder: &mut RegistryBuilder, natives: &NativeBindings, words: &[&str]) -> Result<(), RegistryError> {
    let (is_static, rest) = match words {
        [owner, "static", rest @ ..] => (true, (*owner, rest)),
        [owner, rest @ ..] => (false, (*owner, rest)),
        [] => return Err(RegistryError::new("expected: method <struct> [static] <name> <ret> <args...>")),
    };
    let (owner_name, rest) = rest;
    let [name, ret_name, arg_names @ ..] = rest else {
        return Err(RegistryError::new("expected: method <struct> [static] <name> <ret> <args...>"));
    };
    let owner = owner_of(builder, owner_name)?;
    let ret = type_of(builder, ret_name)?;
    let args = arg_names
        .iter()
        .map(|arg| type_of(builder, arg))
        .collect::<Result<Vec<_>, _>>()?;
    // Interface members may be abstract; anything else must bind a native.
    let binding = natives
        .methods
        .get(method_binding_key(owner_name, name, args.len()).as_str())
        .copied();
    if binding.is_none() && builder.host_of(owner) != HostClass::Iface {
        return Err(RegistryError::new(format!(
            "unreflectable host member [{owner_name}.{name}/{}]",
            args.len()
        )));
    }
    builder.add_method(owner, name, ret, args, is_static, binding)
}

fn parse_field(builder: &mut RegistryBuilder, natives: &NativeBindings, words: &[&str]) -> Result<(), RegistryError> {
    let (is_static, owner_name, name, ty_name) = match words {
        [owner, "static", name, ty] => (true, *owner, *name, *ty),
        [owner, name, ty] => (false, *owner, *name, *ty),
        _ => return Err(RegistryError::new("expected: field <struct> [static] <name> <type>")),
    };
    let owner = owner_of(builder, owner_name)?;
    let ty = type_of(builder, ty_name)?;
    let Some(&(getter, setter)) = natives.fields.get(format!("{owner_name}#{name}").as_str()) else {
        return Err(RegistryError::new(format!(
            "unreflectable host field [{owner_name}#{name}]"
        )));
    };
    builder.add_field(owner, name, ty, is_static, getter, setter)
}

fn parse_cast(builder: &mut RegistryBuilder, words: &[&str]) -> Result<(), RegistryError> {
    let (from_name, to_name, rest) = match words {
        [from, to, rest @ ..] => (*from, *to, rest),
        _ => return Err(RegistryError::new("expected: cast <from> <to> [explicit] [via <struct> <method>]")),
    };
    let from = type_of(builder, from_name)?;
    let to = type_of(builder, to_name)?;
    let (explicit, rest) = match rest {
        ["explicit", rest @ ..] => (true, rest),
        rest => (false, rest),
    };
    let bridge = match rest {
        [] => None,
        ["via", owner_name, method] => Some((owner_of(builder, owner_name)?, *method)),
        _ => return Err(RegistryError::new("malformed cast entry")),
    };
    builder.add_cast(from, to, explicit, bridge)
}

#[cfg(test)]
mod tests {
    use super::{super::catalog, *};
    use crate::vm::{NativeCtx, RunError, Value};

    fn noop(_ctx: &mut NativeCtx<'_>, _args: &[Value]) -> Result<Value, RunError> {
        Ok(Value::Null)
    }

    fn bindings() -> NativeBindings {
        let mut natives = NativeBindings::new();
        natives.method("Thing", "poke", 0, noop);
        natives.ctor("Thing", 0, noop);
        natives.field("Thing", "size", noop, None);
        natives
    }

    #[test]
    fn test_struct_after_member_rejected() {
        let text = "struct void prim\nstruct Thing static\nmethod Thing poke void\nstruct Late static\n";
        let err = parse_whitelist(text, &bindings()).unwrap_err();
        assert_eq!(err.line, Some(4));
        assert!(err.message.contains("precede all members"));
    }

    #[test]
    fn test_member_after_cast_rejected() {
        let text = "struct int prim\nstruct long prim\ncast int long\nmethod Thing poke void\n";
        let err = parse_whitelist(text, &bindings()).unwrap_err();
        assert_eq!(err.line, Some(4));
        assert!(err.message.contains("precede all casts"));
    }

    #[test]
    fn test_unknown_struct_in_member() {
        let text = "struct Thing static\nmethod Missing poke void\n";
        let err = parse_whitelist(text, &bindings()).unwrap_err();
        assert!(err.message.contains("unknown struct [Missing]"));
    }

    #[test]
    fn test_unreflectable_member() {
        let text = "struct void prim\nstruct Thing static\nmethod Thing vanish void\n";
        let err = parse_whitelist(text, &bindings()).unwrap_err();
        assert!(err.message.contains("unreflectable host member"));
        assert!(err.message.contains("vanish/0"));
    }

    #[test]
    fn test_comments_and_blanks_ignored() {
        let text = "# header\n\nstruct void prim  # trailing\n";
        let builder = parse_whitelist(text, &bindings()).unwrap();
        assert!(builder.lookup_type("void").is_some());
    }

    #[test]
    fn test_default_catalog_parses_and_freezes() {
        let registry = catalog::default_registry().unwrap();
        assert!(registry.struct_count() > 20);
    }
}
