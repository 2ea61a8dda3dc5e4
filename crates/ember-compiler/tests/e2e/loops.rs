//! `while` loops, `break`, and `continue`.

use super::harness::*;

#[test]
fn while_accumulates() {
    let source = "\
        var i = 0;\n\
        var sum = 0;\n\
        while i < 5 {\n\
            sum = sum + i;\n\
            i = i + 1;\n\
        }\n\
        return sum;\n";
    expect_int(source, 10);
}

#[test]
fn break_leaves_the_loop_early() {
    let source = "\
        var i = 0;\n\
        while i < 100 {\n\
            if i == 3 { break; }\n\
            i = i + 1;\n\
        }\n\
        return i;\n";
    expect_int(source, 3);
}

#[test]
fn continue_skips_to_the_next_iteration() {
    let source = "\
        var i = 0;\n\
        var n = 0;\n\
        while i < 5 {\n\
            i = i + 1;\n\
            if i == 3 { continue; }\n\
            n = n + 1;\n\
        }\n\
        return n;\n";
    expect_int(source, 4);
}

#[test]
fn a_false_condition_never_enters_the_body() {
    expect_int("var n = 0; while false { n = 99; } return n;", 0);
}

#[test]
fn nested_loops_break_only_the_inner_one() {
    let source = "\
        var total = 0;\n\
        var i = 0;\n\
        while i < 3 {\n\
            var j = 0;\n\
            while true {\n\
                if j == 2 { break; }\n\
                j = j + 1;\n\
                total = total + 1;\n\
            }\n\
            i = i + 1;\n\
        }\n\
        return total;\n";
    expect_int(source, 6);
}
