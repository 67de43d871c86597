// Header synchronization against a remote header source

mod headers;
mod state;

pub use headers::*;
pub use state::*;
