#![allow(dead_code)]

pub mod executors;
pub mod fixtures;

#[allow(unused_imports)]
pub use executors::*;
#[allow(unused_imports)]
pub use fixtures::*;
