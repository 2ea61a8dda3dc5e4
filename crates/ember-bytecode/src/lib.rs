//! Code object, opcode table, and wire encoding for the ember VM.
//!
//! This crate has no dependency on the compiler or the interpreter: it is
//! the shared vocabulary both sides of the pipeline agree on.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod encoder;
pub mod module;
pub mod opcode;
pub mod verify;

pub use encoder::{decode_instr, encode_instr, DecodeError, LineTable};
pub use module::{Code, CodeBuilder, Constant};
pub use opcode::{offset_of, InvalidOpcode, OpCode, TRAP_CLEAR};
pub use verify::{verify_code, VerifyError};
