//! Universal invariants and round-trip laws.

use std::sync::Arc;

use painless::{Runner, Settings, Value, compile, default_registry, param_map};
use pretty_assertions::assert_eq;

fn bytecode_of(source: &str) -> Vec<u8> {
    let registry = default_registry().unwrap();
    let exe = compile(&registry, "p", source, &Settings::default()).unwrap();
    exe.main.bytecode.clone()
}

fn run(source: &str) -> Value {
    run_params(source, vec![])
}

fn run_params(source: &str, params: Vec<(&str, Value)>) -> Value {
    let registry = Arc::new(default_registry().unwrap());
    let exe = compile(&registry, "p", source, &Settings::default()).unwrap();
    Runner::new(Arc::clone(&registry))
        .execute(&exe, param_map(params), None)
        .unwrap()
}

// Folding is associativity-preserving for integer + and * because both use
// the target VM's wrapping semantics.
#[test]
fn test_folding_is_associative_for_int_add_and_mul() {
    assert_eq!(bytecode_of("return (1 + 2) + 3;"), bytecode_of("return 1 + (2 + 3);"));
    assert_eq!(
        bytecode_of("return (2147483647 + 1) + 2;"),
        bytecode_of("return 2147483647 + (1 + 2);")
    );
    assert_eq!(
        bytecode_of("return (100000 * 70000) * 3;"),
        bytecode_of("return 100000 * (70000 * 3);")
    );
}

// A user-written explicit cast and the analyzer's implicit insertion of the
// same endpoints produce identical emitted sequences.
#[test]
fn test_implicit_and_explicit_widening_emit_identically() {
    assert_eq!(
        bytecode_of("int i = 3; long l = i; return l;"),
        bytecode_of("int i = 3; long l = (long)i; return l;")
    );
    assert_eq!(
        bytecode_of("float f = 1.5f; double d = f; return d;"),
        bytecode_of("float f = 1.5f; double d = (double)f; return d;")
    );
}

// The frozen registry answers identically from any thread.
#[test]
fn test_frozen_registry_is_shared_across_threads() {
    let registry = Arc::new(default_registry().unwrap());
    let core_int = registry.core().int;
    let core_long = registry.core().long;
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                let string = registry.lookup_struct("String").unwrap();
                let method = registry
                    .lookup_method(string, &painless::registry::MethodKey::new("substring", 2))
                    .unwrap();
                let cast = registry.lookup_cast(core_int, core_long, false).is_some();
                (string, method.owner, cast)
            })
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(outcomes.windows(2).all(|w| w[0] == w[1]));
}

// Lambda desugaring is referentially transparent for side-effect-free
// bodies: applying `x -> expr(x)` to v equals inlining expr(v).
#[test]
fn test_lambda_application_matches_inlining() {
    let applied = run("List xs = [4]; return xs.stream().mapToInt(x -> x * x + 1).sum();");
    let inlined = run("int v = 4; return v * v + 1;");
    match (applied, inlined) {
        (Value::Int(a), Value::Int(b)) => assert_eq!(a, b),
        other => panic!("expected ints, got {other:?}"),
    }
}

// Numeric literals with declared width suffixes evaluate to themselves.
#[test]
fn test_numeric_literal_round_trip() {
    assert!(matches!(run("return 123;"), Value::Int(123)));
    assert!(matches!(run("return 123l;"), Value::Long(123)));
    assert!(matches!(run("return 123L;"), Value::Long(123)));
    assert!(matches!(run("return 1.5f;"), Value::Float(v) if v == 1.5));
    assert!(matches!(run("return 1.5F;"), Value::Float(v) if v == 1.5));
    assert!(matches!(run("return 2.5d;"), Value::Double(v) if v == 2.5));
    assert!(matches!(run("return 2.5D;"), Value::Double(v) if v == 2.5));
    assert!(matches!(run("return 2.5;"), Value::Double(v) if v == 2.5));
}

// Composing widening casts within the integer tower equals the direct cast.
#[test]
fn test_widening_cast_composition() {
    let composed = run("int i = 7; return (double)(long)i;");
    let direct = run("int i = 7; return (double)i;");
    match (composed, direct) {
        (Value::Double(a), Value::Double(b)) => assert_eq!(a, b),
        other => panic!("expected doubles, got {other:?}"),
    }
}

// `a || b` and `!(!a && !b)` emit boolean-equivalent programs.
#[test]
fn test_de_morgan_equivalence() {
    for (a, b) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
        let params = vec![("a", Value::Int(a)), ("b", Value::Int(b))];
        let direct = run_params(
            "def a = params['a']; def b = params['b']; return a == 1 || b == 1;",
            params.clone(),
        );
        let negated = run_params(
            "def a = params['a']; def b = params['b']; return !(!(a == 1) && !(b == 1));",
            params,
        );
        match (direct, negated) {
            (Value::Bool(x), Value::Bool(y)) => {
                assert_eq!(x, y);
                assert_eq!(x, a == 1 || b == 1);
            }
            other => panic!("expected bools, got {other:?}"),
        }
    }
}

// Short-circuiting skips the right operand entirely: the helper would throw
// if it were ever invoked.
#[test]
fn test_short_circuit_skips_side_effects() {
    let out = run(
        "def boom() { throw new IllegalArgumentException('called'); } \
         boolean flag = false; \
         if (flag && boom()) { return 1; } \
         return 0;",
    );
    assert!(matches!(out, Value::Int(0)));
}

// Every break binds to the innermost enclosing loop.
#[test]
fn test_break_binds_to_innermost_loop() {
    let out = run(
        "int t = 0; \
         for (int i = 0; i < 3; ++i) { \
             for (int j = 0; j < 10; ++j) { \
                 if (j == 2) { break; } \
                 t += 1; \
             } \
         } \
         return t;",
    );
    assert!(matches!(out, Value::Int(6)));
}

// Continue resumes the innermost loop's next iteration.
#[test]
fn test_continue_binds_to_innermost_loop() {
    let out = run(
        "int t = 0; \
         for (int i = 0; i < 2; ++i) { \
             for (int j = 0; j < 4; ++j) { \
                 if (j % 2 == 0) { continue; } \
                 t += 10 * i + j; \
             } \
         } \
         return t;",
    );
    // i=0: j=1,3 -> 4; i=1: j=1,3 -> 11+13=24; total 28.
    assert!(matches!(out, Value::Int(28)));
}

// The line table maps emitted offsets back to source lines.
#[test]
fn test_debug_line_table() {
    let registry = default_registry().unwrap();
    let source = "int x = 1;\nint y = 2;\nreturn x + y;";
    let exe = compile(&registry, "dbg", source, &Settings::default()).unwrap();
    let lines: Vec<u32> = exe.main.line_table.iter().map(|entry| entry.line).collect();
    assert!(lines.contains(&1));
    assert!(lines.contains(&2));
    assert!(lines.contains(&3));

    let without = compile(
        &registry,
        "dbg",
        source,
        &Settings {
            debug_info: false,
            ..Settings::default()
        },
    )
    .unwrap();
    assert!(without.main.line_table.is_empty());
}
