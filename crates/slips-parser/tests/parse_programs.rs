// Integration test: parse all .slips sample programs
use std::fs;
use std::path::Path;

use slips_parser::ast::Expr;

fn parse_file(path: &str) -> Vec<Expr> {
    let full_path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join(path);
    let source = fs::read_to_string(&full_path)
        .unwrap_or_else(|e| panic!("Could not read {}: {}", full_path.display(), e));
    let tokens =
        slips_lexer::lex(&source).unwrap_or_else(|e| panic!("Lex error in {}: {}", path, e));
    slips_parser::parse(tokens).unwrap_or_else(|e| panic!("Parse error in {}: {}", path, e))
}

#[test]
fn parse_basics() {
    assert_eq!(parse_file("tests/programs/basics.slips").len(), 3);
}
#[test]
fn parse_conditionals() {
    assert_eq!(parse_file("tests/programs/conditionals.slips").len(), 3);
}
#[test]
fn parse_functions() {
    let program = parse_file("tests/programs/functions.slips");
    let Expr::Define { value, .. } = &program[0] else {
        panic!("expected a definition, got {}", program[0]);
    };
    assert!(matches!(value.as_ref(), Expr::Function { name, .. } if name == "f"));
}
#[test]
fn parse_closures() {
    assert_eq!(parse_file("tests/programs/closures.slips").len(), 3);
}
#[test]
fn parse_indirect() {
    let program = parse_file("tests/programs/indirect.slips");
    assert_eq!(program[2].to_string(), "(call inc 41)");
}
#[test]
fn parse_nested() {
    let program = parse_file("tests/programs/nested.slips");
    assert_eq!(
        program[1].to_string(),
        "(def f (a in (def g (b in (+ b x))) (+ (g a) x)))"
    );
}
