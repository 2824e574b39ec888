// Integration test: compile parsed programs and execute them in the JIT
use slips_codegen::{compile, CompileError, CompileOptions, OptLevel};
use slips_parser::ast::Expr;

fn program(source: &str) -> Vec<Expr> {
    let tokens = slips_lexer::lex(source).unwrap();
    slips_parser::parse(tokens).unwrap()
}

fn execute(source: &str) -> Option<i64> {
    compile(&program(source), &CompileOptions::default())
        .unwrap()
        .execute()
}

fn compile_err(source: &str) -> CompileError {
    compile(&program(source), &CompileOptions::default()).unwrap_err()
}

#[test]
fn literal_int() {
    assert_eq!(execute("42"), Some(42));
}

#[test]
fn literal_bool_is_widened() {
    assert_eq!(execute("true"), Some(1));
    assert_eq!(execute("false"), Some(0));
}

#[test]
fn negative_addition() {
    assert_eq!(execute("(+ -5 3)"), Some(-2));
}

#[test]
fn define_then_read() {
    assert_eq!(execute("(def x 9) x"), Some(9));
}

#[test]
fn define_yields_its_value() {
    assert_eq!(execute("(def x 9)"), Some(9));
}

#[test]
fn redefinition_overwrites() {
    assert_eq!(execute("(def x 1) (def x 2) x"), Some(2));
}

#[test]
fn if_branches() {
    assert_eq!(execute("(if true 1 2)"), Some(1));
    assert_eq!(execute("(if false 1 2)"), Some(2));
    assert_eq!(execute("(if 7 1 2)"), Some(1));
}

#[test]
fn if_int_alternative_does_not_narrow_to_bool() {
    let err = compile_err("(if false false 2)");
    assert!(matches!(err, CompileError::TypeMismatch(_)), "{}", err);
}

#[test]
fn if_bool_alternative_widens_to_int() {
    assert_eq!(execute("(if false 1 true)"), Some(1));
    assert_eq!(execute("(if true 5 false)"), Some(5));
}

#[test]
fn body_def_is_typed_by_its_value() {
    assert_eq!(execute("(def g (a in (def z (+ a 1)) z)) (g 41)"), Some(42));
}

#[test]
fn nested_function_params_are_ints() {
    assert_eq!(
        execute("(def id (a in (b in b))) (def k (id 1)) (call k 5)"),
        Some(5)
    );
}

#[test]
fn captured_bool_is_returned() {
    assert_eq!(execute("(def b true) (def f (in b)) (f)"), Some(1));
    assert_eq!(execute("(def b false) (def f (in b)) (f)"), Some(0));
}

#[test]
fn captured_bool_as_condition() {
    assert_eq!(
        execute("(def b false) (def f (a in (if b a (+ a 1)))) (f 4)"),
        Some(5)
    );
    assert_eq!(
        execute("(def b true) (def f (a in (if b a (+ a 1)))) (f 4)"),
        Some(4)
    );
}

#[test]
fn int_returned_where_bool_guessed() {
    // `g` is guessed to return the bool it passes along, but `f` yields an int.
    let err = compile_err("(def f (a in (+ a 1))) (def flag true) (def g (in (f flag))) (g)");
    assert!(matches!(err, CompileError::TypeMismatch(_)), "{}", err);
}

#[test]
fn named_call() {
    assert_eq!(execute("(def f (a b in (+ a b))) (f 2 5)"), Some(7));
}

#[test]
fn function_body_sequence() {
    assert_eq!(execute("(def f (a in (def b (+ a 1)) (+ b b))) (f 3)"), Some(8));
}

#[test]
fn function_returning_bool_literal() {
    // Literals guess as ints, so the function returns a widened `true`.
    assert_eq!(execute("(def t (in true)) (t)"), Some(1));
}

#[test]
fn capture_from_top_level() {
    assert_eq!(execute("(def x 10) (def g (a in (+ a x))) (g 5)"), Some(15));
}

#[test]
fn capture_is_copied_at_creation() {
    assert_eq!(
        execute("(def x 10) (def g (in x)) (def x 20) (+ (g) x)"),
        Some(30)
    );
}

#[test]
fn captured_function_called_by_name() {
    assert_eq!(
        execute("(def f (a in (+ a 1))) (def g (b in (f b))) (g 4)"),
        Some(5)
    );
}

#[test]
fn indirect_call_through_returned_function() {
    assert_eq!(
        execute("(def make (in (z in (+ z 1)))) (def inc (make)) (call inc 41)"),
        Some(42)
    );
}

#[test]
fn indirect_call_of_defined_function() {
    assert_eq!(execute("(def f (a in (+ a a))) (call f 21)"), Some(42));
}

#[test]
fn void_function() {
    assert_eq!(execute("(def nothing (in)) (nothing) 5"), Some(5));
    assert_eq!(execute("(def nothing (in)) (nothing)"), None);
}

#[test]
fn function_value_is_not_an_integer() {
    let compiled = compile(&program("(def f (a in a))"), &CompileOptions::default()).unwrap();
    assert!(!compiled.yields_int());
    assert_eq!(compiled.execute(), None);
}

#[test]
fn empty_program() {
    assert_eq!(execute(""), None);
}

#[test]
fn optimized_build() {
    let options = CompileOptions {
        opt_level: OptLevel::Speed,
        dump_ir: true,
    };
    let compiled = compile(&program("(def f (a b in (+ a b))) (f 2 5)"), &options).unwrap();
    assert_eq!(compiled.execute(), Some(7));
}

#[test]
fn undefined_variable() {
    assert!(matches!(compile_err("y"), CompileError::UndefinedVariable(name) if name == "y"));
    assert!(matches!(compile_err("(nope 1)"), CompileError::UndefinedVariable(_)));
}

#[test]
fn add_type_mismatch() {
    assert!(matches!(compile_err("(+ 1 true)"), CompileError::TypeMismatch(_)));
}

#[test]
fn calling_an_int() {
    assert!(matches!(compile_err("(def x 1) (x 2)"), CompileError::TypeMismatch(_)));
    assert!(matches!(compile_err("(def x 1) (call x 2)"), CompileError::TypeMismatch(_)));
}

#[test]
fn arity_mismatch() {
    assert!(matches!(
        compile_err("(def f (a in a)) (f 1 2)"),
        CompileError::TypeMismatch(_)
    ));
}

#[test]
fn string_literal_unsupported() {
    assert!(matches!(compile_err("\"hi\""), CompileError::Unsupported(_)));
}

#[test]
fn anonymous_direct_call_unsupported() {
    assert!(matches!(compile_err("((a in a) 1)"), CompileError::Unsupported(_)));
}

#[test]
fn multi_level_capture_unsupported() {
    let err = compile_err("(def x 1) (def f (a in (def g (b in (+ b x))) (g a))) (f 2)");
    assert!(matches!(err, CompileError::Unsupported(_)), "{}", err);
}

#[test]
fn escaping_frame_closure_unsupported() {
    let err = compile_err("(def x (y in (z in (+ y z)))) (def add (x 1)) (add 2)");
    assert!(matches!(err, CompileError::Unsupported(_)), "{}", err);
}

#[test]
fn binding_nothing_unsupported() {
    assert!(matches!(
        compile_err("(def nothing (in)) (def v (nothing))"),
        CompileError::Unsupported(_)
    ));
}

#[test]
fn error_node_rejected() {
    let program = vec![Expr::Error("expected ')'".into())];
    let err = compile(&program, &CompileOptions::default()).unwrap_err();
    assert!(matches!(err, CompileError::ErrorNode(_)));
}
