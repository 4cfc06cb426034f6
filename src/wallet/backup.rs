// DANS : src/wallet/backup.rs

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::error::EngineError;
use crate::orchestration::prompt::OperatorPrompt;
use crate::wallet::derivation::DerivedKeypair;
use crate::wallet::signer::{WalletSigner, connected_key};

pub const BACKUP_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    pub index: u32,
    pub public_key: String,
    #[serde(alias = "privateKeyHex")]
    pub private_key: String,
}

/// Sauvegarde manuelle d'un jeu de sous-portefeuilles, en clair : le fichier
/// est aussi sensible que les clés elles-mêmes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument {
    #[serde(default = "default_version")]
    pub version: String,
    pub parent_wallet: String,
    pub timestamp: String,
    pub keypairs: Vec<BackupEntry>,
}

fn default_version() -> String {
    BACKUP_VERSION.to_string()
}

impl BackupDocument {
    pub fn new(parent: &Pubkey, keypairs: &[DerivedKeypair], at: DateTime<Utc>) -> Self {
        Self {
            version: default_version(),
            parent_wallet: parent.to_string(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            keypairs: keypairs
                .iter()
                .map(|kp| BackupEntry {
                    index: kp.index,
                    public_key: kp.public_key.to_string(),
                    private_key: hex::encode(kp.secret_key()),
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn parent(&self) -> Result<Pubkey, EngineError> {
        self.parent_wallet
            .parse()
            .map_err(|e| EngineError::Serialization(format!("invalid parentWallet {:?}: {e}", self.parent_wallet)))
    }

    /// Reconstruit et vérifie chaque entrée ; une seule entrée invalide rejette tout le fichier.
    pub fn keypairs(&self) -> Result<Vec<DerivedKeypair>, EngineError> {
        self.keypairs
            .iter()
            .map(|entry| {
                let public_key: Pubkey = entry
                    .public_key
                    .parse()
                    .map_err(|e| EngineError::Serialization(format!("index {}: {e}", entry.index)))?;
                let bytes = Zeroizing::new(
                    hex::decode(entry.private_key.trim())
                        .map_err(|e| EngineError::Serialization(format!("index {}: {e}", entry.index)))?,
                );
                let secret: [u8; 64] = bytes.as_slice().try_into().map_err(|_| {
                    EngineError::Serialization(format!("index {}: private key is not 64 bytes", entry.index))
                })?;
                DerivedKeypair::from_parts(entry.index, public_key, secret)
            })
            .collect()
    }
}

pub fn export_backup(parent: &Pubkey, keypairs: &[DerivedKeypair]) -> BackupDocument {
    BackupDocument::new(parent, keypairs, Utc::now())
}

/// Importe une sauvegarde pour le signataire connecté. Si le parent du fichier
/// diffère, l'utilisateur doit l'accepter explicitement, sinon `BackupMismatch`.
pub async fn import_backup(
    document: &BackupDocument,
    signer: &dyn WalletSigner,
    prompt: &dyn OperatorPrompt,
) -> Result<Vec<DerivedKeypair>, EngineError> {
    let connected = connected_key(signer)?;
    let backup_parent = document.parent()?;
    let keypairs = document.keypairs()?;

    if backup_parent != connected {
        warn!(backup = %backup_parent, connected = %connected, "[Backup] Parent différent du signataire connecté.");
        let question = format!(
            "This backup belongs to {backup_parent}, but the connected wallet is {connected}. Import {} wallets anyway?",
            keypairs.len()
        );
        if !prompt.confirm(&question).await {
            return Err(EngineError::BackupMismatch {
                backup: backup_parent.to_string(),
                connected: connected.to_string(),
            });
        }
    }

    info!(parent = %connected, count = keypairs.len(), "[Backup] Sauvegarde importée.");
    Ok(keypairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::prompt::{AutoApprove, AutoDecline};
    use crate::wallet::derivation::derive_keypairs;
    use crate::wallet::signer::KeypairSigner;
    use chrono::TimeZone;
    use solana_sdk::signature::Keypair;

    #[test]
    fn document_uses_the_dashboard_field_names() {
        let parent = Pubkey::new_unique();
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let doc = BackupDocument::new(&parent, &derive_keypairs(b"seed", 1), at);
        let value: serde_json::Value = serde_json::from_str(&doc.to_json().unwrap()).unwrap();

        assert_eq!(value["parentWallet"], parent.to_string());
        assert_eq!(value["timestamp"], "2024-01-02T03:04:05.000Z");
        assert_eq!(value["keypairs"][0]["index"], 0);
        assert_eq!(value["keypairs"][0]["privateKey"].as_str().unwrap().len(), 128);
    }

    #[test]
    fn accepts_the_private_key_hex_alias() {
        let keypairs = derive_keypairs(b"seed", 1);
        let json = format!(
            r#"{{"parentWallet":"{}","timestamp":"2024-01-01T00:00:00Z","keypairs":[{{"index":0,"publicKey":"{}","privateKeyHex":"{}"}}]}}"#,
            Pubkey::new_unique(),
            keypairs[0].public_key,
            hex::encode(keypairs[0].secret_key())
        );
        let doc = BackupDocument::from_json(&json).unwrap();
        assert_eq!(doc.version, BACKUP_VERSION);
        assert_eq!(doc.keypairs().unwrap(), keypairs);
    }

    #[test]
    fn tampered_public_key_rejects_the_file() {
        let mut doc = export_backup(&Pubkey::new_unique(), &derive_keypairs(b"seed", 2));
        doc.keypairs[1].public_key = Pubkey::new_unique().to_string();
        assert!(doc.keypairs().is_err());
    }

    #[tokio::test]
    async fn import_for_the_connected_parent_needs_no_confirmation() {
        let signer = KeypairSigner::new(Keypair::new());
        let keypairs = derive_keypairs(b"seed", 3);
        let doc = export_backup(&signer.pubkey(), &keypairs);
        let imported = import_backup(&doc, &signer, &AutoDecline).await.unwrap();
        assert_eq!(imported, keypairs);
    }

    #[tokio::test]
    async fn mismatched_parent_requires_confirmation() {
        let signer = KeypairSigner::new(Keypair::new());
        let other = Pubkey::new_unique();
        let doc = export_backup(&other, &derive_keypairs(b"seed", 2));

        let err = import_backup(&doc, &signer, &AutoDecline).await.unwrap_err();
        assert_eq!(
            err,
            EngineError::BackupMismatch { backup: other.to_string(), connected: signer.pubkey().to_string() }
        );
        assert_eq!(import_backup(&doc, &signer, &AutoApprove).await.unwrap().len(), 2);
    }
}
