//! Reading and writing the line-oriented toolpath dialect: motion-command
//! parsing on one side, motion-command generation on the other.

pub mod emit;
pub mod parse;
