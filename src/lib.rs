pub mod config;
pub mod error;
pub mod models;
pub mod repositories;
pub mod services;

pub use error::VaultError;
pub use services::{TotpVault, VaultSettings};
