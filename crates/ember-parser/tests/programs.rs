//! Whole-program parse tests: multi-statement modules, nesting, and the
//! line numbers the AST carries for diagnostics.

use ember_parser::ast::{BinOp, Expr, Literal, Stmt};
use ember_parser::parse;

#[test]
fn a_small_program_parses_into_its_statement_sequence() {
    let module = parse(
        "fn fib(n) {\n\
         \tif n < 2 { return n; }\n\
         \treturn fib(n - 1) + fib(n - 2);\n\
         }\n\
         let result = fib(10);\n",
    )
    .unwrap();

    assert_eq!(module.stmts.len(), 2);
    let Stmt::Fn(decl) = &module.stmts[0] else {
        panic!("expected a function declaration first");
    };
    assert_eq!(decl.name, "fib");
    assert_eq!(decl.params, vec!["n".to_string()]);
    assert_eq!(decl.body.len(), 2);
    assert!(matches!(module.stmts[1], Stmt::Let { .. }));
}

#[test]
fn statements_carry_the_line_they_started_on() {
    let module = parse("let a = 1;\nlet b = 2;\n\nwhile a < b {\n\ta = a + 1;\n}\n").unwrap();
    let lines: Vec<u32> = module
        .stmts
        .iter()
        .map(|s| match s {
            Stmt::Let { line, .. } | Stmt::While { line, .. } => *line,
            other => panic!("unexpected statement {other:?}"),
        })
        .collect();
    assert_eq!(lines, vec![1, 2, 4]);
}

#[test]
fn else_if_chains_nest_to_the_right() {
    let module = parse("if a { x(); } else if b { y(); } else { z(); }").unwrap();
    let Stmt::If { else_branch, .. } = &module.stmts[0] else {
        panic!("expected an if");
    };
    let else_stmts = else_branch.as_ref().unwrap();
    assert_eq!(else_stmts.len(), 1);
    let Stmt::If { else_branch: inner_else, .. } = &else_stmts[0] else {
        panic!("expected the else branch to hold the chained if");
    };
    assert!(inner_else.is_some());
}

#[test]
fn nested_functions_parse_inside_function_bodies() {
    let module = parse("fn outer() { fn inner() { return 1; } return inner(); }").unwrap();
    let Stmt::Fn(outer) = &module.stmts[0] else {
        panic!("expected a function declaration");
    };
    assert!(matches!(&outer.body[0], Stmt::Fn(inner) if inner.name == "inner"));
}

#[test]
fn assignment_is_right_associative_and_an_expression() {
    let module = parse("a = b = 1;").unwrap();
    let Stmt::Expr(Expr::Assign { name, value, .. }) = &module.stmts[0] else {
        panic!("expected an assignment expression");
    };
    assert_eq!(name, "a");
    assert!(matches!(&**value, Expr::Assign { name, .. } if name == "b"));
}

#[test]
fn logical_operators_bind_looser_than_comparison() {
    let module = parse("a < b and c > d;").unwrap();
    let Stmt::Expr(Expr::Binary { op, left, right, .. }) = &module.stmts[0] else {
        panic!("expected a binary expression");
    };
    assert_eq!(*op, BinOp::And);
    assert!(matches!(&**left, Expr::Binary { op: BinOp::Lt, .. }));
    assert!(matches!(&**right, Expr::Binary { op: BinOp::Gt, .. }));
}

#[test]
fn unary_minus_nests_under_multiplication() {
    let module = parse("-a * b;").unwrap();
    let Stmt::Expr(Expr::Binary { op, left, .. }) = &module.stmts[0] else {
        panic!("expected a binary expression");
    };
    assert_eq!(*op, BinOp::Mul);
    assert!(matches!(&**left, Expr::Unary { .. }));
}

#[test]
fn calls_chain_left_to_right() {
    let module = parse("mk()();").unwrap();
    let Stmt::Expr(Expr::Call { callee, args, .. }) = &module.stmts[0] else {
        panic!("expected a call");
    };
    assert!(args.is_empty());
    assert!(matches!(&**callee, Expr::Call { .. }));
}

#[test]
fn spawn_and_await_round_trip_through_a_binding() {
    let module = parse("let handle = spawn work(1);\nlet result = await handle;\n").unwrap();
    let Stmt::Let { value, .. } = &module.stmts[0] else {
        panic!("expected a let");
    };
    assert!(matches!(value, Expr::Spawn { .. }));
    let Stmt::Let { value, .. } = &module.stmts[1] else {
        panic!("expected a let");
    };
    assert!(matches!(value, Expr::Await { .. }));
}

#[test]
fn defer_requires_a_call_not_a_bare_expression() {
    assert!(parse("fn f() { defer close(h); }").is_ok());
    assert!(parse("fn f() { defer 42; }").is_err());
}

#[test]
fn literals_cover_every_kind() {
    let module = parse("1; 2.5; \"s\"; true; false; nil;").unwrap();
    let literals: Vec<&Literal> = module
        .stmts
        .iter()
        .map(|s| match s {
            Stmt::Expr(Expr::Literal(lit, _)) => lit,
            other => panic!("unexpected statement {other:?}"),
        })
        .collect();
    assert!(matches!(literals[0], Literal::Int(1)));
    assert!(matches!(literals[1], Literal::Float(f) if *f == 2.5));
    assert!(matches!(literals[2], Literal::Str(s) if s == "s"));
    assert!(matches!(literals[3], Literal::Bool(true)));
    assert!(matches!(literals[4], Literal::Bool(false)));
    assert!(matches!(literals[5], Literal::Nil));
}

#[test]
fn an_unclosed_block_reports_the_missing_brace() {
    let err = parse("fn f() { return 1;").unwrap_err();
    assert!(err.contains("'}'"), "error was: {err}");
}

#[test]
fn a_dangling_operator_reports_an_expected_expression() {
    let err = parse("let x = 1 +;").unwrap_err();
    assert!(err.contains("expression"), "error was: {err}");
}
