//! End-to-end tests: compile ember source and execute it on the VM,
//! checking observable results rather than instruction sequences.

mod harness;

mod closures;
mod concurrency;
mod conditionals;
mod exceptions;
mod literals;
mod loops;
mod variables;
