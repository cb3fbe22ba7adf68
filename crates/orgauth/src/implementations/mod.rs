//! Implementations of the consumed service traits.

pub mod key_file;
pub mod memory;

pub use key_file::KeyFileVerifier;
pub use memory::{DirectoryFixture, InMemoryDeviceStore, InMemoryDirectory, StaticTokenVerifier};
