//! Taxonomie d'erreurs du moteur multi-portefeuilles.
//!
//! Les échecs individuels (un index de dérivation, une transaction, un
//! portefeuille scanné) n'interrompent jamais un lot. Seules les erreurs de
//! précondition (`SignerNotConnected`, `InsufficientFunds`, `BackupMismatch`,
//! `Declined`) arrêtent une opération avant le premier envoi.

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Échec de dérivation d'un index précis. Non fatal : l'index est sauté.
    #[error("derivation failed at index {index}: {reason}")]
    Derivation { index: u32, reason: String },

    /// Le blob existe mais ne se déchiffre pas (clé étrangère, blob corrompu).
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Aucun jeu de clés enregistré pour ce parent.
    #[error("no keypairs stored for parent wallet {0}")]
    NotFound(Pubkey),

    #[error("insufficient funds: have {have} lamports, need {need} lamports")]
    InsufficientFunds { have: u64, need: u64 },

    #[error("insufficient tokens: have {have}, need {need}")]
    InsufficientTokens { have: u64, need: u64 },

    /// Limitation de débit côté fournisseur RPC. Déclenche requeue + rotation.
    #[error("rate limited by {endpoint}: {message}")]
    RateLimited { endpoint: String, message: String },

    /// Échec terminal d'une transaction, jamais ré-essayé automatiquement.
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// Erreur RPC qui n'est pas une limitation de débit.
    #[error("rpc error on {endpoint}: {message}")]
    Rpc { endpoint: String, message: String },

    #[error("no signer connected")]
    SignerNotConnected,

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("backup belongs to {backup}, connected signer is {connected}")]
    BackupMismatch { backup: String, connected: String },

    #[error("operation declined by the user")]
    Declined,

    #[error("operation cancelled")]
    Cancelled,

    /// Un transfert confirmé a laissé un solde non nul sur le compte source.
    #[error("recovery incomplete for {wallet}: {remaining} left after transfer")]
    RecoveryIncomplete { wallet: Pubkey, remaining: u64 },

    #[error("storage: {0}")]
    Storage(String),

    #[error("serialization: {0}")]
    Serialization(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("instruction build: {0}")]
    Instruction(String),
}

impl EngineError {
    /// Construit l'erreur adaptée à partir du texte renvoyé par un endpoint.
    pub fn from_rpc_message(endpoint: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        if is_rate_limit_message(&message) {
            EngineError::RateLimited { endpoint: endpoint.to_string(), message }
        } else {
            EngineError::Rpc { endpoint: endpoint.to_string(), message }
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, EngineError::RateLimited { .. })
    }
}

/// Les fournisseurs signalent la limitation soit par le code HTTP 429,
/// soit par un message textuel.
pub fn is_rate_limit_message(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("429")
        || lowered.contains("too many requests")
        || lowered.contains("rate limit")
        || lowered.contains("rate-limit")
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_provider_rate_limit_signals() {
        assert!(is_rate_limit_message("HTTP status client error (429 Too Many Requests)"));
        assert!(is_rate_limit_message("Rate limit exceeded for this API key"));
        assert!(!is_rate_limit_message("Blockhash not found"));
    }

    #[test]
    fn rpc_message_is_classified() {
        let e = EngineError::from_rpc_message("https://a", "429");
        assert!(e.is_rate_limited());
        let e = EngineError::from_rpc_message("https://a", "insufficient lamports");
        assert!(matches!(e, EngineError::Rpc { .. }));
    }

    #[test]
    fn display_insufficient_funds() {
        let e = EngineError::InsufficientFunds { have: 100, need: 200 };
        assert_eq!(e.to_string(), "insufficient funds: have 100 lamports, need 200 lamports");
    }
}
