// Storage layer: append-only header records

mod header_store;

pub use header_store::{HeaderReader, HeaderStore};
