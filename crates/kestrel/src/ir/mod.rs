//! Intermediate representation of one JavaScript function body.
//!
//! The front end hands the optimizer a [`FunctionUnit`]: an arena of blocks
//! over virtual registers. The optimizer rewrites it in place and the
//! interpreter executes the result.

mod types;
pub use types::*;

mod instr;
pub use instr::{BinaryOp, Instr, UnaryOp};

mod display;
pub use display::DisplayInstr;

mod validate;
pub use validate::validate;
