pub mod paths;
pub mod vault;

pub use paths::WalletPaths;
pub use vault::{EncryptedBlob, FileVault, StoredWallet, WalletSecretPayload, WalletVault};
