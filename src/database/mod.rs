pub mod codec;
pub mod connection;
pub mod operations;
pub mod store;

pub use operations::PostgresBackend;
pub use store::{MemoryBackend, SampleStore};
