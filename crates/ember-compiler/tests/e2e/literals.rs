//! Literals and basic expressions.

use super::harness::*;

#[test]
fn integer_literals() {
    expect_int("return 42;", 42);
    expect_int("return 0;", 0);
    expect_int("return -17;", -17);
}

#[test]
fn arithmetic_respects_precedence() {
    expect_int("return 1 + 2 * 3;", 7);
    expect_int("return (1 + 2) * 3;", 9);
    expect_int("return 10 - 2 - 3;", 5);
    expect_int("return 7 % 3;", 1);
}

#[test]
fn float_arithmetic() {
    expect_float("return 1.5 + 2.25;", 3.75);
    expect_float("return 10 / 4;", 2.5);
}

#[test]
fn division_mixes_int_operands_into_a_float() {
    expect_float("return 1 / 2;", 0.5);
}

#[test]
fn boolean_literals_and_logic() {
    expect_bool("return true;", true);
    expect_bool("return not true;", false);
    expect_bool("return true and false;", false);
    expect_bool("return false or true;", true);
}

#[test]
fn comparisons() {
    expect_bool("return 1 < 2;", true);
    expect_bool("return 2 <= 2;", true);
    expect_bool("return 3 > 4;", false);
    expect_bool("return 4 >= 4;", true);
    expect_bool("return 1 == 1;", true);
    expect_bool("return 1 != 1;", false);
}

#[test]
fn string_equality_is_by_content() {
    expect_bool("return \"abc\" == \"abc\";", true);
    expect_bool("return \"abc\" == \"abd\";", false);
}

#[test]
fn nil_is_the_default_result() {
    let value = run("let x = 1;").unwrap();
    assert!(value.is_null());
}

#[test]
fn unary_minus_and_double_negation() {
    expect_int("return -(-5);", 5);
    expect_int("return -2 * 3;", -6);
}
