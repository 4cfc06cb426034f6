// DANS : src/wallet/signer.rs

use async_trait::async_trait;
use solana_sdk::{
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
    transaction::Transaction,
};

use crate::error::EngineError;

/// Le signataire externe (extension navigateur côté dashboard, keypair locale côté outils).
/// Le moteur ne détient jamais la clé privée du portefeuille parent.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Clé publique si le signataire est connecté.
    fn public_key(&self) -> Option<Pubkey>;

    async fn connect(&self) -> Result<Pubkey, EngineError>;

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, EngineError>;

    /// Ajoute la signature de ce signataire à une transaction dont le
    /// `recent_blockhash` est déjà renseigné. Les autres signatures sont conservées.
    async fn sign_transaction(&self, transaction: Transaction) -> Result<Transaction, EngineError>;
}

/// Précondition commune à toutes les opérations : un signataire connecté.
pub fn connected_key(signer: &dyn WalletSigner) -> Result<Pubkey, EngineError> {
    signer.public_key().ok_or(EngineError::SignerNotConnected)
}

/// Signataire adossé à une keypair en mémoire : sous-portefeuilles dérivés,
/// ou parent chargé depuis un fichier par les outils en ligne de commande.
pub struct KeypairSigner {
    keypair: Keypair,
}

impl KeypairSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }
}

#[async_trait]
impl WalletSigner for KeypairSigner {
    fn public_key(&self) -> Option<Pubkey> {
        Some(self.keypair.pubkey())
    }

    async fn connect(&self) -> Result<Pubkey, EngineError> {
        Ok(self.keypair.pubkey())
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, EngineError> {
        Ok(self.keypair.sign_message(message).as_ref().to_vec())
    }

    async fn sign_transaction(&self, mut transaction: Transaction) -> Result<Transaction, EngineError> {
        let blockhash = transaction.message.recent_blockhash;
        transaction
            .try_partial_sign(&[&self.keypair], blockhash)
            .map_err(|e| EngineError::Signing(e.to_string()))?;
        Ok(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{hash::Hash, system_instruction};

    #[tokio::test]
    async fn keypair_signer_signs_its_own_transfers() {
        let signer = KeypairSigner::new(Keypair::new());
        let payer = signer.pubkey();
        let ix = system_instruction::transfer(&payer, &Pubkey::new_unique(), 10);
        let mut tx = Transaction::new_with_payer(&[ix], Some(&payer));
        tx.message.recent_blockhash = Hash::new_unique();

        let signed = signer.sign_transaction(tx).await.unwrap();
        assert!(signed.is_signed());
        assert!(signed.verify().is_ok());
    }

    #[tokio::test]
    async fn co_signers_keep_each_other_signatures() {
        let payer = KeypairSigner::new(Keypair::new());
        let owner = KeypairSigner::new(Keypair::new());
        let ix = system_instruction::transfer(&owner.pubkey(), &Pubkey::new_unique(), 10);
        let mut tx = Transaction::new_with_payer(&[ix], Some(&payer.pubkey()));
        tx.message.recent_blockhash = Hash::new_unique();

        let partial = payer.sign_transaction(tx).await.unwrap();
        assert!(!partial.is_signed());
        let signed = owner.sign_transaction(partial).await.unwrap();
        assert!(signed.is_signed());
        assert!(signed.verify().is_ok());
    }

    #[tokio::test]
    async fn foreign_fee_payer_cannot_be_signed() {
        let signer = KeypairSigner::new(Keypair::new());
        let other = Pubkey::new_unique();
        let ix = system_instruction::transfer(&other, &Pubkey::new_unique(), 10);
        let tx = Transaction::new_with_payer(&[ix], Some(&other));

        let err = signer.sign_transaction(tx).await.unwrap_err();
        assert!(matches!(err, EngineError::Signing(_)));
    }
}
