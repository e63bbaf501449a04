pub mod codec;
pub mod key_derivation;
pub mod totp;
pub mod vault;

pub use codec::{CodecError, StoreCodec};
pub use key_derivation::{KeySource, VaultKey, derive_key, resolve_vault_key};
pub use vault::{TotpVault, VaultSettings};
