//! Dérivation déterministe des sous-portefeuilles (SLIP-0010, courbe ed25519).
//!
//! La graine est la signature, par le portefeuille parent, d'un message fixe et
//! horodaté. Seul ce parent peut donc reproduire le jeu de clés, et il peut le
//! refaire à tout moment sans rien stocker on-chain.

use hmac::{Hmac, Mac};
use sha2::Sha512;
use solana_sdk::{
    pubkey::Pubkey,
    signer::{Signer, keypair::keypair_from_seed},
};
use std::fmt;
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::constants::{APP_NAME, MAX_WALLETS};
use crate::error::EngineError;
use crate::wallet::signer::WalletSigner;

type HmacSha512 = Hmac<Sha512>;

const ED25519_CURVE_KEY: &[u8] = b"ed25519 seed";
const HARDENED_OFFSET: u32 = 0x8000_0000;

pub struct DerivedKeypair {
    pub index: u32,
    pub derivation_path: String,
    pub public_key: Pubkey,
    secret_key: [u8; 64],
}

impl DerivedKeypair {
    /// Reconstruit un sous-portefeuille depuis ses 64 octets secrets.
    /// Échoue si la clé publique déclarée ne correspond pas au secret.
    pub fn from_parts(index: u32, public_key: Pubkey, secret_key: [u8; 64]) -> Result<Self, EngineError> {
        let keypair = keypair_from_seed(&secret_key[..32])
            .map_err(|e| EngineError::Decryption(format!("invalid secret key for index {index}: {e}")))?;
        if keypair.pubkey() != public_key {
            return Err(EngineError::Decryption(format!(
                "secret key of index {index} does not match {public_key}"
            )));
        }
        Ok(Self {
            index,
            derivation_path: derivation_path(index),
            public_key,
            secret_key,
        })
    }

    pub fn secret_key(&self) -> &[u8; 64] {
        &self.secret_key
    }

    /// Keypair signataire, pour les opérations où le sous-portefeuille paie lui-même.
    pub fn keypair(&self) -> Result<solana_sdk::signature::Keypair, EngineError> {
        keypair_from_seed(&self.secret_key[..32])
            .map_err(|e| EngineError::Signing(format!("index {}: {}", self.index, e)))
    }
}

impl Clone for DerivedKeypair {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            derivation_path: self.derivation_path.clone(),
            public_key: self.public_key,
            secret_key: self.secret_key,
        }
    }
}

impl Drop for DerivedKeypair {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

impl fmt::Debug for DerivedKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKeypair")
            .field("index", &self.index)
            .field("derivation_path", &self.derivation_path)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

impl PartialEq for DerivedKeypair {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.public_key == other.public_key && self.secret_key == other.secret_key
    }
}

pub fn derivation_path(index: u32) -> String {
    format!("m/44'/501'/{index}'/0'")
}

/// Message signé par le parent. L'horodatage rend chaque génération unique.
pub fn derivation_message(parent: &Pubkey, timestamp_ms: i64) -> String {
    format!("{APP_NAME} HD Wallet Generation\nParent: {parent}\nTimestamp: {timestamp_ms}")
}

/// Dérive `count` sous-portefeuilles (au plus `MAX_WALLETS`) depuis la graine.
/// Même graine + même nombre => même jeu de clés, dans le même ordre.
pub fn derive_keypairs(seed: &[u8], count: usize) -> Vec<DerivedKeypair> {
    derive_keypairs_detailed(seed, count).0
}

/// Comme [`derive_keypairs`], mais retourne aussi les index sautés.
/// Un index en échec laisse un trou : les index suivants gardent leur chemin.
pub fn derive_keypairs_detailed(seed: &[u8], count: usize) -> (Vec<DerivedKeypair>, Vec<EngineError>) {
    let count = if count > MAX_WALLETS {
        warn!(requested = count, max = MAX_WALLETS, "[Derivation] Nombre de portefeuilles plafonné.");
        MAX_WALLETS
    } else {
        count
    };

    let mut keypairs = Vec::with_capacity(count);
    let mut skipped = Vec::new();
    for index in 0..count as u32 {
        match derive_one(seed, index) {
            Ok(keypair) => keypairs.push(keypair),
            Err(e) => {
                warn!(index, error = %e, "[Derivation] Index sauté.");
                skipped.push(e);
            }
        }
    }
    info!(derived = keypairs.len(), skipped = skipped.len(), "[Derivation] Sous-portefeuilles dérivés.");
    (keypairs, skipped)
}

fn derive_one(seed: &[u8], index: u32) -> Result<DerivedKeypair, EngineError> {
    let path = derivation_path(index);
    let mut key = derive_path_key(&path, seed).map_err(|reason| EngineError::Derivation { index, reason })?;
    let keypair = keypair_from_seed(&key).map_err(|e| EngineError::Derivation { index, reason: e.to_string() });
    key.zeroize();
    let keypair = keypair?;
    Ok(DerivedKeypair {
        index,
        derivation_path: path,
        public_key: keypair.pubkey(),
        secret_key: keypair.to_bytes(),
    })
}

/// SLIP-0010 : clé privée 32 octets au chemin donné. La courbe ed25519
/// n'admet que des segments durcis.
pub fn derive_path_key(path: &str, seed: &[u8]) -> Result<[u8; 32], String> {
    let segments = parse_path(path)?;

    let (mut key, mut chain_code) = hmac_split(ED25519_CURVE_KEY, &[seed])?;
    for segment in segments {
        let mut data = [0u8; 37];
        data[1..33].copy_from_slice(&key);
        data[33..].copy_from_slice(&(segment | HARDENED_OFFSET).to_be_bytes());
        let (child_key, child_chain) = hmac_split(&chain_code, &[&data[..]])?;
        data.zeroize();
        key.zeroize();
        key = child_key;
        chain_code = child_chain;
    }
    chain_code.zeroize();
    Ok(key)
}

fn hmac_split(key: &[u8], parts: &[&[u8]]) -> Result<([u8; 32], [u8; 32]), String> {
    let mut mac = HmacSha512::new_from_slice(key).map_err(|e| e.to_string())?;
    for part in parts {
        mac.update(part);
    }
    let mut output = mac.finalize().into_bytes();
    let mut left = [0u8; 32];
    let mut right = [0u8; 32];
    left.copy_from_slice(&output[..32]);
    right.copy_from_slice(&output[32..]);
    output.as_mut_slice().zeroize();
    Ok((left, right))
}

fn parse_path(path: &str) -> Result<Vec<u32>, String> {
    let mut parts = path.split('/');
    if parts.next() != Some("m") {
        return Err(format!("path {path:?} must start with 'm'"));
    }
    parts
        .map(|segment| {
            let raw = segment
                .strip_suffix('\'')
                .ok_or_else(|| format!("segment {segment:?} is not hardened"))?;
            let value: u32 = raw.parse().map_err(|_| format!("segment {segment:?} is not a number"))?;
            if value >= HARDENED_OFFSET {
                return Err(format!("segment {segment:?} is out of range"));
            }
            Ok(value)
        })
        .collect()
}

/// Graine signée par le parent, avec le message qui l'a produite.
#[derive(Clone)]
pub struct SignedSeed {
    pub parent: Pubkey,
    pub message: String,
    pub signature: Vec<u8>,
}

impl Drop for SignedSeed {
    fn drop(&mut self) {
        self.signature.zeroize();
    }
}

/// Connecte le signataire et lui fait signer le message de génération.
pub async fn request_seed(signer: &dyn WalletSigner, timestamp_ms: i64) -> Result<SignedSeed, EngineError> {
    let parent = signer.connect().await?;
    let message = derivation_message(&parent, timestamp_ms);
    let signature = signer.sign_message(message.as_bytes()).await?;
    if signature.is_empty() {
        return Err(EngineError::Signing("empty signature returned by the signer".into()));
    }
    Ok(SignedSeed { parent, message, signature })
}

/// Chemin complet : connexion, signature, dérivation.
pub async fn derive_from_signer(
    signer: &dyn WalletSigner,
    count: usize,
    timestamp_ms: i64,
) -> Result<(SignedSeed, Vec<DerivedKeypair>), EngineError> {
    let seed = request_seed(signer, timestamp_ms).await?;
    let keypairs = derive_keypairs(&seed.signature, count);
    Ok((seed, keypairs))
}
