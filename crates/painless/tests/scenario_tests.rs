//! End-to-end scenarios: source in, behavior out.

use std::sync::Arc;

use painless::{
    CompileError, RunError, Runner, Settings, Value, compile, default_registry, param_map, vm::value_eq,
};
use pretty_assertions::assert_eq;

fn run_with(source: &str, params: Vec<(&str, Value)>, score: Option<f64>, settings: &Settings) -> Result<Value, RunError> {
    let registry = Arc::new(default_registry().unwrap());
    let exe = compile(&registry, "test", source, settings).unwrap_or_else(|err| panic!("{}", err.render(source)));
    let runner = Runner::new(Arc::clone(&registry));
    runner.execute(&exe, param_map(params), score)
}

fn run(source: &str) -> Value {
    run_with(source, vec![], None, &Settings::default()).expect("script should run")
}

fn run_params(source: &str, params: Vec<(&str, Value)>) -> Value {
    run_with(source, params, None, &Settings::default()).expect("script should run")
}

fn compile_err(source: &str) -> CompileError {
    let registry = default_registry().unwrap();
    compile(&registry, "test", source, &Settings::default()).unwrap_err()
}

fn assert_int(value: &Value, expected: i32) {
    match value {
        Value::Int(actual) => assert_eq!(*actual, expected),
        other => panic!("expected Integer {expected}, got {other:?}"),
    }
}

fn assert_str(value: &Value, expected: &str) {
    match value {
        Value::Str(actual) => assert_eq!(actual.as_ref(), expected),
        other => panic!("expected String {expected:?}, got {other:?}"),
    }
}

#[test]
fn test_constant_arithmetic() {
    assert_int(&run("return 1 + 2 * 3;"), 7);
}

#[test]
fn test_counting_for_loop() {
    assert_int(&run("int x = 0; for (int i = 0; i < 5; ++i) x += i; return x;"), 10);
}

#[test]
fn test_user_function_over_def_list() {
    let out = run_params(
        "def sum(List xs) { def s = 0; for (x in xs) s += x; return s; } return sum(params['a']);",
        vec![(
            "a",
            Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]),
        )],
    );
    assert_int(&out, 10);
}

#[test]
fn test_map_store_and_load() {
    assert_str(&run("Map m = new HashMap(); m['k'] = 'v'; return m['k'];"), "v");
}

#[test]
fn test_stream_with_lambda() {
    assert_int(
        &run("List xs = [1, 2, 3]; return xs.stream().mapToInt(x -> x * x).sum();"),
        14,
    );
}

#[test]
fn test_throw_and_catch() {
    assert_str(
        &run("try { throw new IllegalArgumentException('x'); } catch (Exception e) { return e.getMessage(); }"),
        "x",
    );
}

#[test]
fn test_endless_loop_exhausts_budget_at_runtime() {
    let settings = Settings {
        max_loop_counter: 1_000,
        ..Settings::default()
    };
    let err = run_with("while (true) {}", vec![], None, &settings).unwrap_err();
    assert!(matches!(err, RunError::LoopBudget));
}

#[test]
fn test_endless_loop_without_budget_is_rejected() {
    let registry = default_registry().unwrap();
    let settings = Settings {
        max_loop_counter: 0,
        ..Settings::default()
    };
    let err = compile(&registry, "test", "while (true) {}", &settings).unwrap_err();
    assert_eq!(err.kind, painless::ErrorKind::ControlFlow);
}

#[test]
fn test_constant_condition_compiles_and_returns_first_branch() {
    assert_int(&run("if (true) { return 1; } return 2;"), 1);
}

#[test]
fn test_statement_after_return_is_unreachable() {
    let err = compile_err("return 1; return 2;");
    assert_eq!(err.kind, painless::ErrorKind::ControlFlow);
    assert!(err.message.contains("Unreachable"));
}

// --- beyond the table: the rest of the language surface ---

#[test]
fn test_trailing_expression_is_returned() {
    assert_int(&run("1 + 2 * 3"), 7);
}

#[test]
fn test_string_concatenation_folds_and_runs() {
    assert_str(&run("return 'a' + 1 + 2;"), "a12");
    assert_str(&run("def x = 1; return 'n=' + x;"), "n=1");
}

#[test]
fn test_arrays_index_and_length() {
    assert_int(
        &run("int[] a = new int[3]; a[0] = 5; a[1] = a[0] + 1; return a[0] + a[1] + a.length;"),
        14,
    );
}

#[test]
fn test_for_each_over_array() {
    assert_int(
        &run("int[] a = new int[2]; a[0] = 3; a[1] = 4; int t = 0; for (int v : a) t += v; return t;"),
        7,
    );
}

#[test]
fn test_do_while() {
    assert_int(&run("int i = 0; do { ++i; } while (i < 3); return i;"), 3);
}

#[test]
fn test_shifts_and_bitwise() {
    assert_int(&run("return (1 << 4) | (255 >>> 4) & ~3;"), 28);
    match run("return 1L << 40;") {
        Value::Long(v) => assert_eq!(v, 1i64 << 40),
        other => panic!("expected Long, got {other:?}"),
    }
}

#[test]
fn test_ternary_and_comparison() {
    assert_str(&run("int x = 4; return x > 3 ? 'big' : 'small';"), "big");
}

#[test]
fn test_instanceof_static_and_dynamic() {
    assert!(matches!(run("ArrayList xs = new ArrayList(); return xs instanceof List;"), Value::Bool(true)));
    assert!(matches!(run("def x = [1]; return x instanceof List;"), Value::Bool(true)));
    assert!(matches!(run("def x = 1; return x instanceof List;"), Value::Bool(false)));
}

#[test]
fn test_regex_operators() {
    assert!(matches!(run("return 'foobar' =~ /o+b/;"), Value::Bool(true)));
    assert!(matches!(run("return 'foobar' ==~ /f.*r/;"), Value::Bool(true)));
    assert!(matches!(run("return 'foobar' ==~ /o+b/;"), Value::Bool(false)));
    assert!(matches!(run("return 'FooBar' =~ /foo/i;"), Value::Bool(true)));
}

#[test]
fn test_static_method_and_static_field() {
    match run("return Math.max(Math.PI, 1.0);") {
        Value::Double(v) => assert!((v - std::f64::consts::PI).abs() < 1e-12),
        other => panic!("expected Double, got {other:?}"),
    }
    assert_int(&run("return Integer.MAX_VALUE;"), i32::MAX);
}

#[test]
fn test_static_function_reference() {
    assert_int(&run("Function f = Integer::parseInt; def n = f.apply('42'); return n;"), 42);
}

#[test]
fn test_capturing_function_reference() {
    assert!(matches!(
        run("String s = 'abcdef'; Predicate p = s::contains; return p.test('cd');"),
        Value::Bool(true)
    ));
}

#[test]
fn test_constructor_reference() {
    assert_str(
        &run("Function f = Exception::new; def e = f.apply('boom'); return e.getMessage();"),
        "boom",
    );
}

#[test]
fn test_local_function_reference() {
    assert_int(
        &run("def sq(def x) { return x * x; } List xs = [1, 2, 3]; return xs.stream().mapToInt(this::sq).sum();"),
        14,
    );
}

#[test]
fn test_lambda_captures_enclosing_variable() {
    assert_int(
        &run("int base = 10; List xs = [1, 2]; return xs.stream().mapToInt(x -> x + base).sum();"),
        23,
    );
}

#[test]
fn test_nested_lambda_captures() {
    // The inner lambda reaches through the outer one to the script scope.
    assert_int(
        &run(
            "int bump = 1; List xs = [1, 2]; \
             return xs.stream().mapToInt(x -> x + [x].stream().mapToInt(y -> y + bump).sum()).sum();",
        ),
        // x=1: 1 + (1+1) = 3; x=2: 2 + (2+1) = 5.
        8,
    );
}

#[test]
fn test_stream_filter_chain() {
    assert_int(
        &run("List xs = [1, 2, 3, 4, 5]; return xs.stream().filter(x -> x % 2 == 1).mapToInt(x -> x).sum();"),
        9,
    );
}

#[test]
fn test_native_exception_is_catchable() {
    assert_str(
        &run("try { List l = []; return l.get(3); } catch (Exception e) { return 'caught'; }"),
        "caught",
    );
}

#[test]
fn test_division_by_zero_at_runtime_is_catchable() {
    assert_str(
        &run("int d = 0; try { return 1 / d; } catch (ArithmeticException e) { return 'caught: ' + e.getMessage(); }"),
        "caught: / by zero",
    );
}

#[test]
fn test_loop_budget_error_bypasses_catch() {
    let settings = Settings {
        max_loop_counter: 100,
        ..Settings::default()
    };
    let err = run_with(
        "try { while (true) {} } catch (Exception e) { return 1; }",
        vec![],
        None,
        &settings,
    )
    .unwrap_err();
    assert!(matches!(err, RunError::LoopBudget));
}

#[test]
fn test_score_prelude() {
    let out = run_with("return _score * 2;", vec![], Some(1.5), &Settings::default()).unwrap();
    match out {
        Value::Double(v) => assert_eq!(v, 3.0),
        other => panic!("expected Double, got {other:?}"),
    }
}

#[test]
fn test_ctx_prelude() {
    let mut ctx = painless::Params::default();
    ctx.insert(painless::vm::MapKey::Str("op".into()), Value::str("index"));
    let out = run_params("return ctx['op'];", vec![("ctx", Value::map(ctx))]);
    assert_str(&out, "index");
}

#[test]
fn test_increment_value_semantics() {
    assert_int(&run("int i = 5; int j = i++; return j * 10 + i;"), 56);
    assert_int(&run("int i = 5; int j = ++i; return j * 10 + i;"), 66);
    assert_int(&run("int i = 5; i--; return i;"), 4);
}

#[test]
fn test_compound_assignment_on_map_value() {
    assert_int(&run("Map m = new HashMap(); m['c'] = 1; m['c'] += 5; return m['c'];"), 6);
}

#[test]
fn test_break_and_continue() {
    assert_int(
        &run(
            "int t = 0; for (int i = 0; i < 10; ++i) { if (i == 3) { continue; } if (i == 6) { break; } t += i; } \
             return t;",
        ),
        // 0+1+2+4+5
        12,
    );
}

#[test]
fn test_endless_loop_with_break_needs_no_budget() {
    let registry = Arc::new(default_registry().unwrap());
    let settings = Settings {
        max_loop_counter: 0,
        ..Settings::default()
    };
    let exe = compile(
        &registry,
        "test",
        "int i = 0; while (true) { ++i; if (i > 3) { break; } } return i;",
        &settings,
    )
    .unwrap();
    let runner = Runner::new(Arc::clone(&registry));
    let out = runner.execute(&exe, param_map([]), None).unwrap();
    assert_int(&out, 4);
}

#[test]
fn test_loop_where_every_path_returns_or_breaks() {
    assert_int(
        &run("int i = 0; while (true) { if (i > 2) { return i; } else { break; } } return -1;"),
        -1,
    );
    assert_int(
        &run("int i = 5; while (true) { if (i > 2) { return i; } else { break; } } return -1;"),
        5,
    );
}

#[test]
fn test_loop_whose_body_always_returns_needs_no_budget() {
    let registry = Arc::new(default_registry().unwrap());
    let settings = Settings {
        max_loop_counter: 0,
        ..Settings::default()
    };
    let exe = compile(&registry, "test", "while (true) { return 7; }", &settings).unwrap();
    let runner = Runner::new(Arc::clone(&registry));
    assert_int(&runner.execute(&exe, param_map([]), None).unwrap(), 7);
}

#[test]
fn test_narrowing_saturates_into_int_range_first() {
    // Out-of-int-range floating values clamp to the int bounds before the
    // truncation into the narrower width.
    assert_int(&run("return (byte)1e10;"), -1);
    assert_int(&run("double d = 1e10; return (byte)d;"), -1);
    assert_int(&run("double d = -1e10; return (byte)d;"), 0);
    assert_int(&run("float f = 1e10f; return (short)f;"), -1);
    assert_int(&run("def d = 1e10; return (byte)d;"), -1);
}

#[test]
fn test_string_methods() {
    assert_str(&run("return 'Hello World'.substring(6).toUpperCase();"), "WORLD");
    assert_int(&run("return 'abc'.length() + 'abcdef'.indexOf('cd');"), 5);
}

#[test]
fn test_void_method_call_statement() {
    assert_int(&run("List l = [1, 2]; l.clear(); return l.size();"), 0);
}

#[test]
fn test_explicit_narrowing_cast() {
    assert_int(&run("double d = 3.9; return (int)d;"), 3);
    assert_int(&run("long l = 4000000000L; return (int)l;"), (4_000_000_000u64 as u32).cast_signed());
}

#[test]
fn test_char_casts() {
    assert_str(&run("String s = 'x'; char c = (char)s; return (String)c;"), "x");
}

#[test]
fn test_null_handling() {
    assert!(matches!(run("String s = null; return s == null;"), Value::Bool(true)));
    assert!(matches!(run("Map m = new HashMap(); return m['missing'];"), Value::Null));
}

#[test]
fn test_value_equality_across_collections() {
    let left = run("return [1, 2, 3];");
    let right = run("List xs = []; xs.add(1); xs.add(2); xs.add(3); return xs;");
    assert!(value_eq(&left, &right));
}

#[test]
fn test_executable_round_trips_before_running() {
    let registry = Arc::new(default_registry().unwrap());
    let exe = compile(&registry, "rt", "return 'abc' =~ /b/ ? 41 + 1 : 0;", &Settings::default()).unwrap();
    let reloaded = painless::Executable::from_bytes(&exe.to_bytes().unwrap()).unwrap();
    let runner = Runner::new(Arc::clone(&registry));
    assert_int(&runner.execute(&reloaded, param_map([]), None).unwrap(), 42);
}
