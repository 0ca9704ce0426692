//! Code generation for the `pegc` grammar compiler: virtual register
//! allocation, the structured `Outcome` control-flow builder, the
//! JavaScript and PHP target adapters, and the compile pipeline driver.

pub mod compile;
pub mod context;
pub mod generate;
pub mod javascript;
pub mod outcome;
pub mod php;
pub mod regalloc;
pub mod target;

pub use compile::{compile, compile_with_plugins, NamedPass, Plugin, Stages};
pub use generate::generate as generate_pass;
