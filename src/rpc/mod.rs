pub mod pool;
pub mod resilient_client;

pub use pool::{EndpointHandle, RpcEndpoint, RpcEndpointPool};
pub use resilient_client::ResilientRpcClient;

use async_trait::async_trait;
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature, transaction::Transaction};

use crate::error::EngineError;

/// Les seules opérations RPC dont le moteur a besoin.
/// Toutes les erreurs sont déjà classées : `RateLimited` déclenche la rotation,
/// le reste est terminal pour l'appelant.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn url(&self) -> &str;

    /// Solde SOL en lamports.
    async fn get_balance(&self, address: &Pubkey) -> Result<u64, EngineError>;

    /// Montant d'un compte de token SPL. `None` si le compte n'existe pas.
    async fn get_token_account_amount(&self, token_account: &Pubkey) -> Result<Option<u64>, EngineError>;

    async fn get_latest_blockhash(&self) -> Result<Hash, EngineError>;

    async fn send_and_confirm_transaction(&self, transaction: &Transaction) -> Result<Signature, EngineError>;
}
