//! Functions, recursion, and closure capture.

use super::harness::*;

#[test]
fn a_function_call_binds_positional_arguments() {
    expect_int("fn add(a, b) { return a + b; } return add(19, 23);", 42);
}

#[test]
fn top_level_functions_recurse_through_their_global_binding() {
    let source = "\
        fn fib(n) {\n\
            if n < 2 { return n; }\n\
            return fib(n - 1) + fib(n - 2);\n\
        }\n\
        return fib(10);\n";
    expect_int(source, 55);
}

#[test]
fn a_closure_captures_an_enclosing_local() {
    let source = "\
        fn mk() {\n\
            let x = 10;\n\
            fn inner() { return x; }\n\
            return inner;\n\
        }\n\
        return mk()();\n";
    expect_int(source, 10);
}

#[test]
fn a_closure_captures_a_parameter() {
    let source = "\
        fn adder(n) {\n\
            fn add(m) { return n + m; }\n\
            return add;\n\
        }\n\
        return adder(40)(2);\n";
    expect_int(source, 42);
}

#[test]
fn capture_threads_through_an_intervening_function() {
    let source = "\
        fn outer() {\n\
            let a = 7;\n\
            fn mid() {\n\
                fn inner() { return a; }\n\
                return inner;\n\
            }\n\
            return mid;\n\
        }\n\
        return outer()()();\n";
    expect_int(source, 7);
}

#[test]
fn two_closures_capture_independent_snapshots() {
    let source = "\
        fn mk(v) {\n\
            fn get() { return v; }\n\
            return get;\n\
        }\n\
        let one = mk(1);\n\
        let two = mk(2);\n\
        return one() + two();\n";
    expect_int(source, 3);
}

#[test]
fn functions_return_nil_without_an_explicit_return() {
    let value = run("fn noop() { let x = 1; } return noop();").unwrap();
    assert!(value.is_null());
}

#[test]
fn a_freshly_made_closure_can_be_called_immediately() {
    // mk()() in one expression: calls chain left to right.
    let source = "\
        fn mk() {\n\
            let greeting = 99;\n\
            fn show() { return greeting; }\n\
            return show;\n\
        }\n\
        let got = mk()();\n\
        return got;\n";
    expect_int(source, 99);
}
