#![allow(dead_code)]

pub mod nodes;
pub mod testing;

pub use nodes::*;
pub use testing::*;
