//! Bindings, assignment, and scope.

use super::harness::*;

#[test]
fn let_bindings_read_back() {
    expect_int("let x = 10; return x;", 10);
    expect_int("let x = 2; let y = 3; return x * y;", 6);
}

#[test]
fn var_bindings_reassign() {
    expect_int("var x = 1; x = x + 1; x = x * 10; return x;", 20);
}

#[test]
fn assignment_is_an_expression_yielding_the_stored_value() {
    expect_int("var a = 0; var b = 0; a = b = 7; return a + b;", 14);
}

#[test]
fn block_scoped_bindings_do_not_leak() {
    // A name declared inside a block is gone after it; the read outside
    // falls through to an unbound global, which loads as nil.
    let value = run("{ let hidden = 5; } return hidden;").unwrap();
    assert!(value.is_null());
}

#[test]
fn inner_blocks_see_enclosing_locals() {
    expect_int("let x = 3; { let y = 4; x = x + y; } return x;", 7);
}

#[test]
fn assignment_to_an_undeclared_name_creates_a_global() {
    expect_int("g = 12; return g;", 12);
}

#[test]
fn redeclaring_a_let_as_a_var_is_rejected() {
    let module = ember_parser::parse("let x = 1; var x = 2;").unwrap();
    let err = ember_compiler::compile_module(
        &module,
        "__test",
        ember_compiler::OptimizationLevel::Off,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ember_compiler::CompileError::Redeclaration(_)
    ));
}
