// Core chain data structures

mod hash;
mod header;
mod script;
mod types;

pub use hash::*;
pub use header::*;
pub use script::*;
pub use types::*;
