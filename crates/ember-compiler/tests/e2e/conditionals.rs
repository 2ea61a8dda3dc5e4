//! `if`/`else` chains, truthiness, and short-circuit evaluation.

use super::harness::*;

#[test]
fn if_takes_the_true_branch() {
    expect_int("if true { return 1; } return 2;", 1);
}

#[test]
fn if_skips_to_else() {
    expect_int("if false { return 1; } else { return 2; }", 2);
}

#[test]
fn else_if_chains_pick_the_first_truthy_arm() {
    let source = "\
        let n = 15;\n\
        if n < 10 { return 1; }\n\
        else if n < 20 { return 2; }\n\
        else { return 3; }\n";
    expect_int(source, 2);
}

#[test]
fn zero_is_falsy_and_nonzero_truthy() {
    expect_int("if 0 { return 1; } return 2;", 2);
    expect_int("if 3 { return 1; } return 2;", 1);
}

#[test]
fn nil_is_falsy() {
    expect_int("if nil { return 1; } return 2;", 2);
}

#[test]
fn and_short_circuits_past_a_would_be_crash() {
    // Calling nil would be a runtime error; the right operand must never
    // evaluate.
    expect_bool("return false and missing();", false);
    expect_bool("return true or missing();", true);
}

#[test]
fn short_circuit_keeps_the_deciding_value() {
    expect_int("return 0 or 5;", 5);
    expect_int("return 3 and 4;", 4);
}
