//! The default whitelist: the catalog every embedding starts from.
//!
//! The catalog is the parsed [`DEFAULT_WHITELIST`] text plus programmatic
//! supplements the text format does not express: supertype member copies and
//! the mechanical `→ def` / `→ Object` upcast families.

use super::{
    Registry, RegistryBuilder, RegistryError, natives,
    whitelist::{NativeBindings, parse_whitelist},
};

/// The default whitelist text. Structs first, then members, then casts.
pub const DEFAULT_WHITELIST: &str = r"
# primitive types
struct void prim
struct boolean prim
struct byte prim
struct short prim
struct char prim
struct int prim
struct long prim
struct float prim
struct double prim
struct def dynamic

# reference types
struct Object object
struct String string
struct Boolean boxed:boolean
struct Byte boxed:byte
struct Short boxed:short
struct Character boxed:char
struct Integer boxed:int
struct Long boxed:long
struct Float boxed:float
struct Double boxed:double
struct List iface
struct ArrayList list
struct Map iface
struct HashMap map
struct Iterator iterator
struct Exception exception
struct IllegalArgumentException exception
struct IllegalStateException exception
struct ArithmeticException exception
struct ClassCastException exception
struct NumberFormatException exception
struct IndexOutOfBoundsException exception
struct Pattern pattern
struct Matcher matcher
struct Stream stream
struct IntStream intstream
struct Function iface
struct Predicate iface
struct ToIntFunction iface
struct Math static
struct Utility static

# constructors
ctor ArrayList
ctor HashMap
ctor Exception String

# Object
method Object toString String
method Object equals boolean Object

# String
method String length int
method String isEmpty boolean
method String charAt char int
method String indexOf int String
method String contains boolean String
method String substring String int
method String substring String int int
method String toUpperCase String
method String toLowerCase String
method String replace String String String
method String startsWith boolean String
method String endsWith boolean String
method String trim String
method String static valueOf String def

# List
method List add boolean def
method List get def int
method List set def int def
method List remove def int
method List size int
method List isEmpty boolean
method List contains boolean def
method List indexOf int def
method List clear void
method List iterator Iterator
method List stream Stream

# Map
method Map put def def def
method Map get def def
method Map remove def def
method Map containsKey boolean def
method Map containsValue boolean def
method Map size int
method Map isEmpty boolean
method Map clear void

# Iterator
method Iterator hasNext boolean
method Iterator next def

# exceptions
method Exception getMessage String

# regex
method Pattern matcher Matcher String
method Matcher find boolean
method Matcher matches boolean
method Matcher group String

# Math
method Math static abs double double
method Math static max double double double
method Math static min double double double
method Math static pow double double double
method Math static sqrt double double
method Math static floor double double
method Math static ceil double double
method Math static log double double
method Math static exp double double
field Math static PI double
field Math static E double

# boxes
method Integer static parseInt int String
method Integer static toString String int
method Integer intValue int
field Integer static MAX_VALUE int
field Integer static MIN_VALUE int
method Long longValue long
method Float floatValue float
method Double doubleValue double
method Character charValue char
method Boolean booleanValue boolean

# functional interfaces
method Function apply def def
method Predicate test boolean def
method ToIntFunction applyAsInt int def

# streams
method Stream map Stream Function
method Stream filter Stream Predicate
method Stream mapToInt IntStream ToIntFunction
method Stream count long
method IntStream sum int
method IntStream count long

# transform bridges
method Utility static toObject Object def
method Utility static toDef def def
method Utility static castToString String def
method Utility static castToList List def
method Utility static castToMap Map def
method Utility static castToException Exception def
method Utility static charToString String char
method Utility static stringToChar char String
method Utility static defToBoolean boolean def
method Utility static defToIntImplicit int def
method Utility static defToLongImplicit long def
method Utility static defToFloatImplicit float def
method Utility static defToDoubleImplicit double def
method Utility static defToByteExplicit byte def
method Utility static defToShortExplicit short def
method Utility static defToCharExplicit char def
method Utility static defToIntExplicit int def
method Utility static defToLongExplicit long def
method Utility static defToFloatExplicit float def
method Utility static defToDoubleExplicit double def
method Utility static boxBoolean Boolean boolean
method Utility static boxByte Byte byte
method Utility static boxShort Short short
method Utility static boxChar Character char
method Utility static boxInt Integer int
method Utility static boxLong Long long
method Utility static boxFloat Float float
method Utility static boxDouble Double double
method Utility static unboxBoolean boolean Boolean
method Utility static unboxByte byte Byte
method Utility static unboxShort short Short
method Utility static unboxChar char Character
method Utility static unboxInt int Integer
method Utility static unboxLong long Long
method Utility static unboxFloat float Float
method Utility static unboxDouble double Double

# dynamic conversions
cast def boolean via Utility defToBoolean
cast def byte explicit via Utility defToByteExplicit
cast def short explicit via Utility defToShortExplicit
cast def char explicit via Utility defToCharExplicit
cast def int via Utility defToIntImplicit
cast def int explicit via Utility defToIntExplicit
cast def long via Utility defToLongImplicit
cast def long explicit via Utility defToLongExplicit
cast def float via Utility defToFloatImplicit
cast def float explicit via Utility defToFloatExplicit
cast def double via Utility defToDoubleImplicit
cast def double explicit via Utility defToDoubleExplicit
cast def String via Utility castToString
cast def List via Utility castToList
cast def Map via Utility castToMap
cast def Exception via Utility castToException

# boxing
cast boolean Boolean via Utility boxBoolean
cast byte Byte via Utility boxByte
cast short Short via Utility boxShort
cast char Character via Utility boxChar
cast int Integer via Utility boxInt
cast long Long via Utility boxLong
cast float Float via Utility boxFloat
cast double Double via Utility boxDouble
cast boolean Object via Utility boxBoolean
cast byte Object via Utility boxByte
cast short Object via Utility boxShort
cast char Object via Utility boxChar
cast int Object via Utility boxInt
cast long Object via Utility boxLong
cast float Object via Utility boxFloat
cast double Object via Utility boxDouble
cast boolean def via Utility toDef
cast byte def via Utility toDef
cast short def via Utility toDef
cast char def via Utility toDef
cast int def via Utility toDef
cast long def via Utility toDef
cast float def via Utility toDef
cast double def via Utility toDef

# unboxing
cast Boolean boolean via Utility unboxBoolean
cast Byte byte via Utility unboxByte
cast Short short via Utility unboxShort
cast Character char via Utility unboxChar
cast Integer int via Utility unboxInt
cast Long long via Utility unboxLong
cast Float float via Utility unboxFloat
cast Double double via Utility unboxDouble

# reference upcasts and checked downcasts
cast ArrayList List via Utility castToList
cast HashMap Map via Utility castToMap
cast IllegalArgumentException Exception via Utility castToException
cast IllegalStateException Exception via Utility castToException
cast ArithmeticException Exception via Utility castToException
cast ClassCastException Exception via Utility castToException
cast NumberFormatException Exception via Utility castToException
cast IndexOutOfBoundsException Exception via Utility castToException
cast Object String explicit via Utility castToString
cast Object List explicit via Utility castToList
cast Object Map explicit via Utility castToMap

# char and String
cast char String explicit via Utility charToString
cast String char explicit via Utility stringToChar
";

/// Reference structs that copy `Object` members.
const COPIES_OBJECT: &[&str] = &[
    "String",
    "Boolean",
    "Byte",
    "Short",
    "Character",
    "Integer",
    "Long",
    "Float",
    "Double",
    "List",
    "Map",
    "Iterator",
    "Exception",
    "Pattern",
    "Matcher",
    "Stream",
    "IntStream",
];

/// Subtypes and the supertype whose members they replay.
const COPIES: &[(&str, &str)] = &[
    ("ArrayList", "List"),
    ("HashMap", "Map"),
    ("IllegalArgumentException", "Exception"),
    ("IllegalStateException", "Exception"),
    ("ArithmeticException", "Exception"),
    ("ClassCastException", "Exception"),
    ("NumberFormatException", "Exception"),
    ("IndexOutOfBoundsException", "Exception"),
];

/// Object-sort structs that implicitly convert to `def` and `Object`.
const REFERENCE_STRUCTS: &[&str] = &[
    "String",
    "Boolean",
    "Byte",
    "Short",
    "Character",
    "Integer",
    "Long",
    "Float",
    "Double",
    "List",
    "ArrayList",
    "Map",
    "HashMap",
    "Iterator",
    "Exception",
    "IllegalArgumentException",
    "IllegalStateException",
    "ArithmeticException",
    "ClassCastException",
    "NumberFormatException",
    "IndexOutOfBoundsException",
    "Pattern",
    "Matcher",
    "Stream",
    "IntStream",
    "Function",
    "Predicate",
    "ToIntFunction",
];

/// Builds the open default catalog: whitelist text, member copies, and the
/// mechanical upcast families.
pub fn default_builder() -> Result<RegistryBuilder, RegistryError> {
    let mut builder = parse_whitelist(DEFAULT_WHITELIST, &default_bindings())?;

    for name in COPIES_OBJECT {
        let owner = builder
            .lookup_struct(name)
            .ok_or_else(|| RegistryError::new(format!("catalog struct [{name}] missing")))?;
        builder.copy_struct(owner, "Object")?;
    }
    for (sub, sup) in COPIES {
        let owner = builder
            .lookup_struct(sub)
            .ok_or_else(|| RegistryError::new(format!("catalog struct [{sub}] missing")))?;
        builder.copy_struct(owner, sup)?;
    }

    let utility = builder
        .lookup_struct("Utility")
        .ok_or_else(|| RegistryError::new("catalog struct [Utility] missing"))?;
    let def = builder
        .lookup_type("def")
        .ok_or_else(|| RegistryError::new("catalog type [def] missing"))?;
    let object = builder
        .lookup_type("Object")
        .ok_or_else(|| RegistryError::new("catalog type [Object] missing"))?;
    for name in REFERENCE_STRUCTS {
        let ty = builder
            .lookup_type(name)
            .ok_or_else(|| RegistryError::new(format!("catalog type [{name}] missing")))?;
        builder.add_cast(ty, def, false, Some((utility, "toDef")))?;
        builder.add_cast(ty, object, false, Some((utility, "toObject")))?;
    }
    builder.add_cast(object, def, false, Some((utility, "toDef")))?;
    builder.add_cast(def, object, false, Some((utility, "toObject")))?;

    Ok(builder)
}

/// Builds and freezes the default registry.
pub fn default_registry() -> Result<Registry, RegistryError> {
    default_builder()?.freeze()
}

fn integer_max_value(
    _ctx: &mut crate::vm::NativeCtx<'_>,
    _args: &[crate::vm::Value],
) -> Result<crate::vm::Value, crate::vm::RunError> {
    Ok(crate::vm::Value::Int(i32::MAX))
}

fn integer_min_value(
    _ctx: &mut crate::vm::NativeCtx<'_>,
    _args: &[crate::vm::Value],
) -> Result<crate::vm::Value, crate::vm::RunError> {
    Ok(crate::vm::Value::Int(i32::MIN))
}

#[expect(clippy::too_many_lines, reason = "flat binding table")]
fn default_bindings() -> NativeBindings {
    use natives as n;
    let mut b = NativeBindings::new();

    b.ctor("ArrayList", 0, n::array_list_ctor);
    b.ctor("HashMap", 0, n::hash_map_ctor);
    b.ctor("Exception", 1, n::exception_ctor);

    b.method("Object", "toString", 0, n::object_to_string);
    b.method("Object", "equals", 1, n::object_equals);

    b.method("String", "length", 0, n::string_length);
    b.method("String", "isEmpty", 0, n::string_is_empty);
    b.method("String", "charAt", 1, n::string_char_at);
    b.method("String", "indexOf", 1, n::string_index_of);
    b.method("String", "contains", 1, n::string_contains);
    b.method("String", "substring", 1, n::string_substring_from);
    b.method("String", "substring", 2, n::string_substring);
    b.method("String", "toUpperCase", 0, n::string_to_upper_case);
    b.method("String", "toLowerCase", 0, n::string_to_lower_case);
    b.method("String", "replace", 2, n::string_replace);
    b.method("String", "startsWith", 1, n::string_starts_with);
    b.method("String", "endsWith", 1, n::string_ends_with);
    b.method("String", "trim", 0, n::string_trim);
    b.method("String", "valueOf", 1, n::string_value_of);

    b.method("List", "add", 1, n::list_add);
    b.method("List", "get", 1, n::list_get);
    b.method("List", "set", 2, n::list_set);
    b.method("List", "remove", 1, n::list_remove);
    b.method("List", "size", 0, n::list_size);
    b.method("List", "isEmpty", 0, n::list_is_empty);
    b.method("List", "contains", 1, n::list_contains);
    b.method("List", "indexOf", 1, n::list_index_of);
    b.method("List", "clear", 0, n::list_clear);
    b.method("List", "iterator", 0, n::list_iterator);
    b.method("List", "stream", 0, n::list_stream);

    b.method("Map", "put", 2, n::map_put);
    b.method("Map", "get", 1, n::map_get);
    b.method("Map", "remove", 1, n::map_remove);
    b.method("Map", "containsKey", 1, n::map_contains_key);
    b.method("Map", "containsValue", 1, n::map_contains_value);
    b.method("Map", "size", 0, n::map_size);
    b.method("Map", "isEmpty", 0, n::map_is_empty);
    b.method("Map", "clear", 0, n::map_clear);

    b.method("Iterator", "hasNext", 0, n::iterator_has_next);
    b.method("Iterator", "next", 0, n::iterator_next);

    b.method("Exception", "getMessage", 0, n::exception_get_message);

    b.method("Pattern", "matcher", 1, n::pattern_matcher);
    b.method("Matcher", "find", 0, n::matcher_find);
    b.method("Matcher", "matches", 0, n::matcher_matches);
    b.method("Matcher", "group", 0, n::matcher_group);

    b.method("Math", "abs", 1, n::math_abs);
    b.method("Math", "max", 2, n::math_max);
    b.method("Math", "min", 2, n::math_min);
    b.method("Math", "pow", 2, n::math_pow);
    b.method("Math", "sqrt", 1, n::math_sqrt);
    b.method("Math", "floor", 1, n::math_floor);
    b.method("Math", "ceil", 1, n::math_ceil);
    b.method("Math", "log", 1, n::math_log);
    b.method("Math", "exp", 1, n::math_exp);
    b.field("Math", "PI", n::math_pi, None);
    b.field("Math", "E", n::math_e, None);

    b.method("Integer", "parseInt", 1, n::integer_parse_int);
    b.method("Integer", "toString", 1, n::integer_to_string);
    b.method("Integer", "intValue", 0, n::int_value);
    b.field("Integer", "MAX_VALUE", integer_max_value, None);
    b.field("Integer", "MIN_VALUE", integer_min_value, None);
    b.method("Long", "longValue", 0, n::long_value);
    b.method("Float", "floatValue", 0, n::float_value);
    b.method("Double", "doubleValue", 0, n::double_value);
    b.method("Character", "charValue", 0, n::char_value);
    b.method("Boolean", "booleanValue", 0, n::boolean_value);

    b.method("Function", "apply", 1, n::sam_apply);
    b.method("Predicate", "test", 1, n::sam_test);
    b.method("ToIntFunction", "applyAsInt", 1, n::sam_apply_as_int);

    b.method("Stream", "map", 1, n::stream_map);
    b.method("Stream", "filter", 1, n::stream_filter);
    b.method("Stream", "mapToInt", 1, n::stream_map_to_int);
    b.method("Stream", "count", 0, n::stream_count);
    b.method("IntStream", "sum", 0, n::int_stream_sum);
    b.method("IntStream", "count", 0, n::int_stream_count);

    b.method("Utility", "toObject", 1, n::identity);
    b.method("Utility", "toDef", 1, n::identity);
    b.method("Utility", "castToString", 1, n::cast_to_string);
    b.method("Utility", "castToList", 1, n::cast_to_list);
    b.method("Utility", "castToMap", 1, n::cast_to_map);
    b.method("Utility", "castToException", 1, n::cast_to_exception);
    b.method("Utility", "charToString", 1, n::char_to_string);
    b.method("Utility", "stringToChar", 1, n::string_to_char);
    b.method("Utility", "defToBoolean", 1, n::def_to_boolean);
    b.method("Utility", "defToIntImplicit", 1, n::def_to_int_implicit);
    b.method("Utility", "defToLongImplicit", 1, n::def_to_long_implicit);
    b.method("Utility", "defToFloatImplicit", 1, n::def_to_float_implicit);
    b.method("Utility", "defToDoubleImplicit", 1, n::def_to_double_implicit);
    b.method("Utility", "defToByteExplicit", 1, n::def_to_byte_explicit);
    b.method("Utility", "defToShortExplicit", 1, n::def_to_short_explicit);
    b.method("Utility", "defToCharExplicit", 1, n::def_to_char_explicit);
    b.method("Utility", "defToIntExplicit", 1, n::def_to_int_explicit);
    b.method("Utility", "defToLongExplicit", 1, n::def_to_long_explicit);
    b.method("Utility", "defToFloatExplicit", 1, n::def_to_float_explicit);
    b.method("Utility", "defToDoubleExplicit", 1, n::def_to_double_explicit);
    b.method("Utility", "boxBoolean", 1, n::identity);
    b.method("Utility", "boxByte", 1, n::identity);
    b.method("Utility", "boxShort", 1, n::identity);
    b.method("Utility", "boxChar", 1, n::identity);
    b.method("Utility", "boxInt", 1, n::identity);
    b.method("Utility", "boxLong", 1, n::identity);
    b.method("Utility", "boxFloat", 1, n::identity);
    b.method("Utility", "boxDouble", 1, n::identity);
    b.method("Utility", "unboxBoolean", 1, n::boolean_value);
    b.method("Utility", "unboxByte", 1, n::int_value);
    b.method("Utility", "unboxShort", 1, n::int_value);
    b.method("Utility", "unboxChar", 1, n::char_value);
    b.method("Utility", "unboxInt", 1, n::int_value);
    b.method("Utility", "unboxLong", 1, n::long_value);
    b.method("Utility", "unboxFloat", 1, n::float_value);
    b.method("Utility", "unboxDouble", 1, n::double_value);

    b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MethodKey;

    #[test]
    fn test_default_registry_freezes() {
        let registry = default_registry().unwrap();
        assert!(registry.lookup_type("String[]").is_some());
        assert!(registry.lookup_type("void[]").is_none());
    }

    #[test]
    fn test_arity_overloads_coexist() {
        let registry = default_registry().unwrap();
        let string = registry.lookup_struct("String").unwrap();
        assert!(registry.lookup_method(string, &MethodKey::new("substring", 1)).is_some());
        assert!(registry.lookup_method(string, &MethodKey::new("substring", 2)).is_some());
        assert!(registry.lookup_method(string, &MethodKey::new("substring", 3)).is_none());
    }

    #[test]
    fn test_def_conversions_are_registered() {
        let registry = default_registry().unwrap();
        let core = registry.core();
        // Implicit def -> int exists; explicit picks the narrowing transform.
        let implicit = registry.lookup_cast(core.def, core.int, false).unwrap();
        assert_eq!(implicit.bridge.as_ref().unwrap().key.name.as_ref(), "defToIntImplicit");
        let explicit = registry.lookup_cast(core.def, core.int, true).unwrap();
        assert_eq!(explicit.bridge.as_ref().unwrap().key.name.as_ref(), "defToIntExplicit");
    }

    #[test]
    fn test_narrowing_requires_explicit() {
        let registry = default_registry().unwrap();
        let core = registry.core();
        assert!(registry.lookup_cast(core.double, core.int, false).is_none());
        assert!(registry.lookup_cast(core.double, core.int, true).is_some());
    }

    #[test]
    fn test_everything_reaches_def() {
        let registry = default_registry().unwrap();
        let core = registry.core();
        for name in ["int", "boolean", "String", "ArrayList", "HashMap", "Object"] {
            let ty = registry.lookup_type(name).unwrap();
            assert!(registry.can_cast(ty, core.def, false), "{name} -> def");
        }
    }
}
