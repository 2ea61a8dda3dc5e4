//! `spawn`/`await` futures and `sync` monitors.

use super::harness::*;

#[test]
fn spawn_returns_a_future_immediately() {
    let source = "\
        fn work() { return 1; }\n\
        let handle = spawn work();\n\
        return 2;\n";
    expect_int(source, 2);
}

#[test]
fn await_blocks_until_the_spawned_fiber_returns() {
    let source = "\
        fn work(a, b) { return a + b; }\n\
        return await spawn work(20, 22);\n";
    expect_int(source, 42);
}

#[test]
fn awaiting_an_already_settled_future_is_immediate() {
    let source = "\
        fn work() { return 5; }\n\
        let handle = spawn work();\n\
        let first = await handle;\n\
        let second = await handle;\n\
        return first + second;\n";
    expect_int(source, 10);
}

#[test]
fn a_spawned_fiber_observes_and_mutates_globals() {
    let source = "\
        fn bump() { g = g + 1; }\n\
        g = 41;\n\
        await spawn bump();\n\
        return g;\n";
    expect_int(source, 42);
}

#[test]
fn a_panicking_spawned_fiber_rejects_its_future() {
    let source = "\
        fn boom() { panic 8; }\n\
        await spawn boom();\n";
    let panic = expect_panic(source);
    assert_eq!(panic.value.as_i32(), Some(8));
}

#[test]
fn a_rejected_future_can_be_trapped_at_the_await_site() {
    let source = "\
        fn boom() { panic 8; }\n\
        trap { await spawn boom(); }\n\
        return 3;\n";
    expect_int(source, 3);
}

#[test]
fn sync_guards_a_critical_section() {
    let source = "\
        let s = \"lock\";\n\
        g = 0;\n\
        sync s { g = g + 1; }\n\
        return g;\n";
    expect_int(source, 1);
}

#[test]
fn sync_re_entry_on_the_same_object_is_allowed() {
    let source = "\
        let s = \"lock\";\n\
        sync s {\n\
            sync s { g = 5; }\n\
        }\n\
        return g;\n";
    expect_int(source, 5);
}

#[test]
fn a_return_inside_sync_releases_the_monitor() {
    let source = "\
        fn locked(s) {\n\
            sync s { return 9; }\n\
        }\n\
        let s = \"lock\";\n\
        let first = locked(s);\n\
        let second = locked(s);\n\
        return first + second;\n";
    expect_int(source, 18);
}
