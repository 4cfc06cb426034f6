//! Coffre chiffré des sous-portefeuilles.
//!
//! Format d'un blob (base64) : `salt (16) || nonce (12) || ciphertext + tag`.
//! La clé AES-256-GCM est dérivée par argon2id de la clé publique du parent,
//! complétée d'un secret de liaison optionnel (signature du parent ou phrase
//! de passe). Un blob illisible échoue fermé : aucune clé partielle.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::constants::{APP_NAME, KEYPAIRS_KEY_PREFIX, PARENT_WALLET_KEY, SEED_KEY_PREFIX};
use crate::error::EngineError;
use crate::orchestration::prompt::OperatorPrompt;
use crate::wallet::derivation::DerivedKeypair;
use crate::wallet::signer::WalletSigner;
use crate::wallet::storage::KeyValueStore;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Texte opaque tel qu'écrit dans le stockage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub ciphertext: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredKeypair {
    index: u32,
    public_key: String,
    secret_key: String,
}

pub fn keypairs_key(parent: &Pubkey) -> String {
    format!("{KEYPAIRS_KEY_PREFIX}{parent}")
}

pub fn seed_key(parent: &Pubkey) -> String {
    format!("{SEED_KEY_PREFIX}{parent}")
}

/// Message signé pour obtenir le secret de liaison du coffre.
pub fn binding_message(parent: &Pubkey) -> String {
    format!("{APP_NAME} Key Store\nParent: {parent}")
}

pub struct EncryptedKeyStore {
    store: Arc<dyn KeyValueStore>,
    binding_secret: Option<Zeroizing<Vec<u8>>>,
    params: Params,
}

impl EncryptedKeyStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store, binding_secret: None, params: Params::default() }
    }

    /// Ajoute un secret (phrase de passe) à la clé publique du parent.
    pub fn with_binding_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.binding_secret = Some(Zeroizing::new(secret.into()));
        self
    }

    /// Lie le coffre au signataire : la signature ed25519 d'un message fixe est
    /// déterministe, seul ce parent peut donc rouvrir ses blobs.
    pub async fn bind_to_signer(self, signer: &dyn WalletSigner) -> Result<Self, EngineError> {
        let parent = signer.connect().await?;
        let signature = signer.sign_message(binding_message(&parent).as_bytes()).await?;
        Ok(self.with_binding_secret(signature))
    }

    /// Coût argon2 explicite (les tests utilisent des paramètres minimaux).
    pub fn with_kdf_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn save(&self, parent: &Pubkey, keypairs: &[DerivedKeypair]) -> Result<(), EngineError> {
        let stored: Vec<StoredKeypair> = keypairs
            .iter()
            .map(|kp| StoredKeypair {
                index: kp.index,
                public_key: kp.public_key.to_string(),
                secret_key: bs58::encode(kp.secret_key()).into_string(),
            })
            .collect();
        let plaintext = Zeroizing::new(serde_json::to_vec(&stored)?);
        drop(stored);

        let blob = self.encrypt(parent, &plaintext)?;
        self.store.set(&keypairs_key(parent), &blob.ciphertext)?;
        self.store.set(PARENT_WALLET_KEY, &parent.to_string())?;
        info!(parent = %parent, count = keypairs.len(), "[KeyStore] Sous-portefeuilles enregistrés.");
        Ok(())
    }

    /// `NotFound` si rien n'est enregistré pour ce parent, `Decryption` si le blob
    /// existe mais ne s'ouvre pas.
    pub fn load(&self, parent: &Pubkey) -> Result<Vec<DerivedKeypair>, EngineError> {
        let ciphertext = self.store.get(&keypairs_key(parent))?.ok_or(EngineError::NotFound(*parent))?;
        let plaintext = self.decrypt(parent, &EncryptedBlob { ciphertext })?;
        let stored: Vec<StoredKeypair> = serde_json::from_slice(&plaintext)
            .map_err(|e| EngineError::Decryption(format!("malformed keypair set: {e}")))?;

        stored
            .into_iter()
            .map(|entry| {
                let public_key: Pubkey = entry
                    .public_key
                    .parse()
                    .map_err(|e| EngineError::Decryption(format!("index {}: {e}", entry.index)))?;
                let decoded = Zeroizing::new(
                    bs58::decode(&entry.secret_key)
                        .into_vec()
                        .map_err(|e| EngineError::Decryption(format!("index {}: {e}", entry.index)))?,
                );
                let secret: [u8; 64] = decoded.as_slice().try_into().map_err(|_| {
                    EngineError::Decryption(format!("index {}: secret key is not 64 bytes", entry.index))
                })?;
                DerivedKeypair::from_parts(entry.index, public_key, secret)
            })
            .collect()
    }

    pub fn remove(&self, parent: &Pubkey) -> Result<(), EngineError> {
        self.store.remove(&keypairs_key(parent))?;
        self.store.remove(&seed_key(parent))
    }

    /// Graine signée, chiffrée comme le jeu de clés, pour re-dériver plus tard.
    pub fn save_seed(&self, parent: &Pubkey, seed: &[u8]) -> Result<(), EngineError> {
        let blob = self.encrypt(parent, seed)?;
        self.store.set(&seed_key(parent), &blob.ciphertext)
    }

    pub fn load_seed(&self, parent: &Pubkey) -> Result<Zeroizing<Vec<u8>>, EngineError> {
        let ciphertext = self.store.get(&seed_key(parent))?.ok_or(EngineError::NotFound(*parent))?;
        self.decrypt(parent, &EncryptedBlob { ciphertext })
    }

    pub fn has_keypairs(&self, parent: &Pubkey) -> Result<bool, EngineError> {
        Ok(self.store.get(&keypairs_key(parent))?.is_some())
    }

    /// À appeler avant d'enregistrer une nouvelle génération : un jeu existant
    /// n'est remplacé qu'avec `force` ou l'accord de l'opérateur, sinon `Declined`.
    pub async fn confirm_replace(
        &self,
        parent: &Pubkey,
        prompt: &dyn OperatorPrompt,
        force: bool,
    ) -> Result<(), EngineError> {
        if !self.has_keypairs(parent)? {
            return Ok(());
        }
        let existing = match self.load(parent) {
            Ok(keypairs) => format!("{} subwallets", keypairs.len()),
            Err(e) => format!("an unreadable keypair set ({e})"),
        };
        if force {
            warn!(parent = %parent, "[KeyStore] Jeu existant remplacé (forcé).");
            return Ok(());
        }
        let question = format!(
            "{existing} are already stored for {parent}. A new generation replaces them and their seed: \
             any funds left on them become unreachable unless you exported a backup. Replace them?"
        );
        if prompt.confirm(&question).await {
            warn!(parent = %parent, "[KeyStore] Jeu existant remplacé après confirmation.");
            Ok(())
        } else {
            Err(EngineError::Declined)
        }
    }

    /// Dernier parent connecté (`tribify_parent_wallet`).
    pub fn last_parent(&self) -> Result<Option<Pubkey>, EngineError> {
        match self.store.get(PARENT_WALLET_KEY)? {
            None => Ok(None),
            Some(value) => match value.parse() {
                Ok(pubkey) => Ok(Some(pubkey)),
                Err(e) => {
                    warn!(value = %value, error = %e, "[KeyStore] Parent enregistré illisible, ignoré.");
                    Ok(None)
                }
            },
        }
    }

    fn derive_key(&self, parent: &Pubkey, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, EngineError> {
        let mut password = Zeroizing::new(parent.to_string().into_bytes());
        if let Some(secret) = &self.binding_secret {
            password.extend_from_slice(secret);
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
            .hash_password_into(&password, salt, &mut key[..])
            .map_err(|e| EngineError::Storage(format!("key derivation failed: {e}")))?;
        Ok(key)
    }

    fn encrypt(&self, parent: &Pubkey, plaintext: &[u8]) -> Result<EncryptedBlob, EngineError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let key = self.derive_key(parent, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|e| EngineError::Storage(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| EngineError::Storage(format!("encryption failed: {e}")))?;

        let mut raw = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        raw.extend_from_slice(&salt);
        raw.extend_from_slice(&nonce_bytes);
        raw.extend_from_slice(&ciphertext);
        Ok(EncryptedBlob { ciphertext: BASE64.encode(raw) })
    }

    fn decrypt(&self, parent: &Pubkey, blob: &EncryptedBlob) -> Result<Zeroizing<Vec<u8>>, EngineError> {
        let raw = BASE64
            .decode(blob.ciphertext.trim())
            .map_err(|e| EngineError::Decryption(format!("blob is not base64: {e}")))?;
        if raw.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
            return Err(EngineError::Decryption(format!("blob too short: {} bytes", raw.len())));
        }
        let (salt, rest) = raw.split_at(SALT_LEN);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

        let key = self.derive_key(parent, salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|e| EngineError::Decryption(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| EngineError::Decryption(format!("blob for {parent} failed authentication")))
    }
}
