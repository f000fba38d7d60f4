//! One test per diagnostic family: the analyzer stops at the first error in
//! a subtree and every failure carries its category and location.

use painless::{CompileError, ErrorKind, Settings, compile, default_registry};
use pretty_assertions::assert_eq;

fn err(source: &str) -> CompileError {
    let registry = default_registry().unwrap();
    compile(&registry, "err", source, &Settings::default()).unwrap_err()
}

#[test]
fn test_syntax_errors() {
    assert_eq!(err("int x = ;").kind, ErrorKind::Syntax);
    assert_eq!(err("if (true {}").kind, ErrorKind::Syntax);
    assert_eq!(err("return 'unterminated;").kind, ErrorKind::Syntax);
    assert_eq!(err("try { } return 1;").kind, ErrorKind::Syntax);
}

#[test]
fn test_resolution_unknown_variable() {
    let e = err("return nothing;");
    assert_eq!(e.kind, ErrorKind::Resolution);
    assert!(e.message.contains("Variable [nothing] is not defined"));
}

#[test]
fn test_resolution_unknown_method() {
    let e = err("String s = 'a'; return s.mystery();");
    assert_eq!(e.kind, ErrorKind::Resolution);
    assert!(e.message.contains("mystery/0"));
}

#[test]
fn test_resolution_unknown_constructor() {
    let e = err("return new ArrayList(1, 2);");
    assert_eq!(e.kind, ErrorKind::Resolution);
    assert!(e.message.contains("ArrayList/2"));
}

#[test]
fn test_resolution_unknown_local_call() {
    let e = err("return helper(1);");
    assert_eq!(e.kind, ErrorKind::Resolution);
    assert!(e.message.contains("helper/1"));
}

#[test]
fn test_resolution_non_functional_target() {
    let e = err("def f(List l) { return 1; } return f(x -> x);");
    assert_eq!(e.kind, ErrorKind::Resolution);
    assert!(e.message.contains("functional interface"));
}

#[test]
fn test_resolution_unknown_constructor_reference() {
    let e = err("Predicate p = ArrayList::new; return p.test(1);");
    assert_eq!(e.kind, ErrorKind::Resolution);
    assert!(e.message.contains("ArrayList::new"));
}

#[test]
fn test_type_incompatible_assignment() {
    let e = err("boolean b = true; int x = b; return x;");
    assert_eq!(e.kind, ErrorKind::Type);
    assert!(e.message.contains("Cannot cast from [boolean] to [int]"));
}

#[test]
fn test_type_narrowing_requires_explicit_cast() {
    let e = err("double d = 1.5; int x = d; return x;");
    assert_eq!(e.kind, ErrorKind::Type);
    assert!(e.message.contains("Cannot cast from [double] to [int]"));
}

#[test]
fn test_type_read_only_assignment() {
    let e = err("params = null; return 1;");
    assert_eq!(e.kind, ErrorKind::Type);
    assert!(e.message.contains("read-only"));
}

#[test]
fn test_type_assignment_to_new_call() {
    let e = err("new ArrayList() = 5; return 1;");
    assert_eq!(e.kind, ErrorKind::Type);
    assert!(e.message.contains("new call"));
}

#[test]
fn test_type_non_statement() {
    let e = err("1 + 2; return 0;");
    assert_eq!(e.kind, ErrorKind::Type);
    assert!(e.message.contains("Not a statement"));
}

#[test]
fn test_type_reserved_and_duplicate_variables() {
    assert!(err("int ctx = 1; return ctx;").message.contains("reserved"));
    assert!(err("int a = 1; int a = 2; return a;").message.contains("already defined"));
}

#[test]
fn test_type_operator_on_wrong_operands() {
    let e = err("return 'a' * 2;");
    assert_eq!(e.kind, ErrorKind::Type);
    assert!(e.message.contains("Cannot apply [*]"));
    assert_eq!(err("return ~1.5;").kind, ErrorKind::Type);
}

#[test]
fn test_control_flow_unreachable() {
    let e = err("throw new Exception('x'); return 1;");
    assert_eq!(e.kind, ErrorKind::ControlFlow);
    assert!(e.message.contains("Unreachable"));
}

#[test]
fn test_control_flow_extraneous_loop() {
    let e = err("while (false) { return 1; } return 2;");
    assert_eq!(e.kind, ErrorKind::ControlFlow);
    assert!(e.message.contains("Extraneous while loop"));
}

#[test]
fn test_control_flow_break_outside_loop() {
    assert_eq!(err("break;").kind, ErrorKind::ControlFlow);
    assert_eq!(err("continue;").kind, ErrorKind::ControlFlow);
}

#[test]
fn test_control_flow_extraneous_continue() {
    let e = err("while (1 < 2) { continue; }");
    assert_eq!(e.kind, ErrorKind::ControlFlow);
    assert!(e.message.contains("Extraneous continue"));
}

#[test]
fn test_control_flow_missing_return() {
    let e = err("int f() { int x = 1; } return 0;");
    assert_eq!(e.kind, ErrorKind::ControlFlow);
    assert!(e.message.contains("Missing return"));
}

#[test]
fn test_constant_integer_overflow() {
    let e = err("return 2147483648;");
    assert_eq!(e.kind, ErrorKind::Constant);
    assert!(e.message.contains("Invalid int constant"));
    assert_eq!(err("return 99999999999999999999L;").kind, ErrorKind::Constant);
}

#[test]
fn test_constant_division_by_zero_folds_to_error() {
    assert_eq!(err("return 1 / 0;").kind, ErrorKind::Constant);
    assert_eq!(err("return 5 % 0;").kind, ErrorKind::Constant);
    assert_eq!(err("return 1L / 0L;").kind, ErrorKind::Constant);
}

#[test]
fn test_constant_invalid_regex() {
    let e = err("return 'x' =~ /(unclosed/;");
    assert_eq!(e.kind, ErrorKind::Constant);
    assert!(e.message.contains("Invalid regex"));
}

#[test]
fn test_error_location_and_excerpt() {
    let source = "int x = 1;\nint y = true;\nreturn x;";
    let e = err(source);
    assert_eq!(e.loc.line, 2);
    let rendered = e.render(source);
    assert!(rendered.contains("int y = true;"));
    assert!(rendered.contains("Type error"));
}

#[test]
fn test_first_error_in_subtree_wins() {
    // Both operands are broken; the left one is reported.
    let e = err("return missing1 + missing2;");
    assert!(e.message.contains("missing1"));
}

#[test]
fn test_lambda_arity_mismatch() {
    let e = err("List xs = [1]; return xs.stream().mapToInt((a, b) -> 1).sum();");
    assert_eq!(e.kind, ErrorKind::Type);
    assert!(e.message.contains("Incorrect number of parameters"));
}

#[test]
fn test_catch_of_non_exception_type() {
    let e = err("try { return 1; } catch (String s) { return 2; }");
    assert_eq!(e.kind, ErrorKind::Type);
    assert!(e.message.contains("Not an exception type"));
}

#[test]
fn test_null_into_primitive() {
    let e = err("int x = null; return x;");
    assert_eq!(e.kind, ErrorKind::Type);
    assert!(e.message.contains("Cannot cast null"));
}

#[test]
fn test_void_in_expression_position() {
    let e = err("List l = []; int x = l.clear(); return x;");
    assert_eq!(e.kind, ErrorKind::Type);
    assert!(e.message.contains("Cannot cast from [void]"));
}

#[test]
fn test_duplicate_function() {
    let e = err("int f(int a) { return a; } int f(int b) { return b; } return 1;");
    assert_eq!(e.kind, ErrorKind::Type);
    assert!(e.message.contains("Duplicate function"));
}
