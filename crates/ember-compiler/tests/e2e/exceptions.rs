//! Panics, traps, and defers.

use super::harness::*;

#[test]
fn an_unhandled_panic_surfaces_with_its_value() {
    let panic = expect_panic("panic 13;");
    assert_eq!(panic.value.as_i32(), Some(13));
    assert!(!panic.recovered);
}

#[test]
fn a_trap_catches_a_panic_in_its_body() {
    expect_int("trap { panic 1; } return 7;", 7);
}

#[test]
fn a_trap_catches_a_panic_raised_in_a_callee() {
    let source = "\
        fn boom() { panic 9; }\n\
        trap { boom(); }\n\
        return 5;\n";
    expect_int(source, 5);
}

#[test]
fn code_before_the_panic_still_ran() {
    let source = "\
        counter = 1;\n\
        trap {\n\
            counter = counter + 10;\n\
            panic 0;\n\
            counter = counter + 100;\n\
        }\n\
        return counter;\n";
    expect_int(source, 11);
}

#[test]
fn a_defer_runs_before_the_frame_returns() {
    let source = "\
        fn bump() { g = g + 1; }\n\
        fn f() {\n\
            defer bump();\n\
            g = g * 10;\n\
            return nil;\n\
        }\n\
        g = 1;\n\
        f();\n\
        return g;\n";
    expect_int(source, 11);
}

#[test]
fn defers_drain_in_lifo_order() {
    let source = "\
        fn append(d) { g = g * 10 + d; }\n\
        fn f() {\n\
            defer append(1);\n\
            defer append(2);\n\
            defer append(3);\n\
        }\n\
        g = 0;\n\
        f();\n\
        return g;\n";
    expect_int(source, 321);
}

#[test]
fn a_defer_runs_during_panic_unwinding() {
    let source = "\
        fn cleanup() { g = 1; }\n\
        fn f() {\n\
            defer cleanup();\n\
            panic 5;\n\
        }\n\
        g = 0;\n\
        trap { f(); }\n\
        return g;\n";
    expect_int(source, 1);
}

#[test]
fn the_traceback_lists_frames_innermost_first() {
    let source = "\
        fn inner() { panic 3; }\n\
        fn outer() { inner(); }\n\
        outer();\n";
    let panic = expect_panic(source);
    let names: Vec<&str> = panic.trace.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["__test.inner", "__test.outer", "__test"]);
}

#[test]
fn the_traceback_records_source_lines() {
    let source = "fn inner() { panic 3; }\ninner();\n";
    let panic = expect_panic(source);
    assert_eq!(panic.trace[0].line, Some(1));
}

#[test]
fn a_panic_inside_a_defer_chains_onto_the_original() {
    let source = "\
        fn bad() { panic 2; }\n\
        fn f() {\n\
            defer bad();\n\
            panic 1;\n\
        }\n\
        f();\n";
    let panic = expect_panic(source);
    assert_eq!(panic.value.as_i32(), Some(1));
    let chained = panic.aborted_by.as_deref().expect("second panic chains on");
    assert_eq!(chained.value.as_i32(), Some(2));
}

#[test]
fn a_recovered_panic_does_not_disturb_later_execution() {
    let source = "\
        var total = 0;\n\
        var i = 0;\n\
        while i < 3 {\n\
            trap { panic i; }\n\
            total = total + 1;\n\
            i = i + 1;\n\
        }\n\
        return total;\n";
    expect_int(source, 3);
}
