pub use self::cpu::*;
mod cpu;

pub use self::decoder::*;
pub mod decoder;

pub use self::instruction::*;
pub mod instruction;

pub use self::segment::*;
pub mod segment;

pub use self::register::*;
pub mod register;

pub use self::flag::*;
pub mod flag;

pub use self::parameter::*;
pub mod parameter;

pub use self::op::*;
pub mod op;

pub use self::alu::{AluOp, ShiftOp, Width};
pub mod alu;

pub use self::model::*;
pub mod model;

pub use self::descriptor::*;
pub mod descriptor;
