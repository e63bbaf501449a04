pub mod totp_entry;

pub use totp_entry::{Enrollment, EntryStatus, SecretEntry, TotpStatus, VaultDocument};
