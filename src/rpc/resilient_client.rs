use async_trait::async_trait;
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
};
use solana_sdk::{
    commitment_config::CommitmentConfig, hash::Hash, program_pack::Pack, pubkey::Pubkey,
    signature::Signature, transaction::Transaction,
};
use spl_token::state::Account as SplTokenAccount;
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::debug;

use crate::error::{EngineError, is_rate_limit_message};
use crate::rpc::ChainClient;

/// Un "wrapper" autour du RpcClient de Solana qui ajoute une logique de
/// ré-essai automatique pour les lectures qui échouent à cause d'erreurs réseau temporaires.
///
/// Le client est HTTP uniquement (aucun abonnement WebSocket) avec un timeout borné,
/// car toute la charge du moteur est en requête/réponse.
#[derive(Clone)]
pub struct ResilientRpcClient {
    url: String,
    client: Arc<RpcClient>,
    max_retries: u8,
    delay_ms: u64,
}

impl ResilientRpcClient {
    /// Construit un nouveau client RPC résilient.
    pub fn new(rpc_url: String, timeout: Duration, max_retries: u8, delay_ms: u64) -> Self {
        let client = RpcClient::new_with_timeout_and_commitment(
            rpc_url.clone(),
            timeout,
            CommitmentConfig::confirmed(),
        );
        Self {
            url: rpc_url,
            client: Arc::new(client),
            max_retries,
            delay_ms,
        }
    }

    /// Détermine si une erreur du client est temporaire et si une nouvelle tentative doit être effectuée.
    /// Un 429 n'est jamais ré-essayé ici : c'est au pool de changer d'endpoint.
    fn is_retryable(error: &ClientError) -> bool {
        if is_rate_limit_message(&error.to_string()) {
            return false;
        }
        matches!(
            error.kind,
            ClientErrorKind::Reqwest(_) | ClientErrorKind::Io(_)
        )
    }

    fn classify(&self, error: ClientError) -> EngineError {
        EngineError::from_rpc_message(&self.url, error.to_string())
    }

    async fn with_retries<T, F, Fut>(&self, method: &str, call: F) -> Result<T, EngineError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, ClientError>>,
    {
        for attempt in 0..=self.max_retries {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if Self::is_retryable(&e) && attempt < self.max_retries {
                        debug!(endpoint = %self.url, method, attempt, error = %e, "Erreur temporaire, nouvelle tentative.");
                        sleep(Duration::from_millis(self.delay_ms)).await;
                    } else {
                        return Err(self.classify(e));
                    }
                }
            }
        }
        unreachable!()
    }
}

#[async_trait]
impl ChainClient for ResilientRpcClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, EngineError> {
        self.with_retries("get_balance", || self.client.get_balance(address)).await
    }

    async fn get_token_account_amount(&self, token_account: &Pubkey) -> Result<Option<u64>, EngineError> {
        let commitment = self.client.commitment();
        let response = self
            .with_retries("get_account", || {
                self.client.get_account_with_commitment(token_account, commitment)
            })
            .await?;
        match response.value {
            None => Ok(None),
            Some(account) => {
                let state = SplTokenAccount::unpack(&account.data).map_err(|e| EngineError::Rpc {
                    endpoint: self.url.clone(),
                    message: format!("compte {} illisible : {}", token_account, e),
                })?;
                Ok(Some(state.amount))
            }
        }
    }

    async fn get_latest_blockhash(&self) -> Result<Hash, EngineError> {
        self.with_retries("get_latest_blockhash", || self.client.get_latest_blockhash()).await
    }

    /// Envoie et confirme une transaction. Un seul essai : la file décide du requeue.
    async fn send_and_confirm_transaction(&self, transaction: &Transaction) -> Result<Signature, EngineError> {
        match self.client.send_and_confirm_transaction(transaction).await {
            Ok(signature) => Ok(signature),
            Err(e) => match self.classify(e) {
                EngineError::Rpc { message, .. } => Err(EngineError::TransactionFailed(message)),
                other => Err(other),
            },
        }
    }
}
