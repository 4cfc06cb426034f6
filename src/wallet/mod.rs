pub mod backup;
pub mod derivation;
pub mod keystore;
pub mod signer;
pub mod storage;

pub use derivation::{DerivedKeypair, derive_keypairs};
pub use keystore::{EncryptedBlob, EncryptedKeyStore};
pub use signer::{KeypairSigner, WalletSigner};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
