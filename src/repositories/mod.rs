pub mod atomic_file;
pub mod vault_store;

pub use vault_store::{LoadOutcome, VaultStore};
