// DANS : src/rpc/pool.rs

use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::monitoring::metrics;
use crate::rpc::{ChainClient, ResilientRpcClient};

/// Durée pendant laquelle un endpoint limité est évité par la rotation.
const RATE_LIMIT_COOLDOWN_SECS: u64 = 30;

/// Instantané de l'état d'un endpoint du pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcEndpoint {
    pub url: String,
    pub is_rate_limited: bool,
    pub last_failure_at: Option<Instant>,
}

/// Endpoint courant avec son client, tel que le voit un lot de la file.
#[derive(Clone)]
pub struct EndpointHandle {
    pub index: usize,
    pub endpoint: RpcEndpoint,
    pub client: Arc<dyn ChainClient>,
}

struct Slot {
    endpoint: RpcEndpoint,
    client: Arc<dyn ChainClient>,
}

struct PoolState {
    slots: Vec<Slot>,
    cursor: usize,
}

/// Liste ordonnée et fixe d'endpoints (payant d'abord, publics ensuite).
/// Les endpoints ne sont jamais retirés : un échec est supposé transitoire,
/// l'endpoint est seulement évité pendant un délai de refroidissement.
pub struct RpcEndpointPool {
    state: Mutex<PoolState>,
    cooldown: Duration,
}

impl RpcEndpointPool {
    pub fn new(clients: Vec<Arc<dyn ChainClient>>) -> Result<Self, EngineError> {
        if clients.is_empty() {
            return Err(EngineError::InvalidConfig("the RPC pool needs at least one endpoint".into()));
        }
        let slots = clients
            .into_iter()
            .map(|client| Slot {
                endpoint: RpcEndpoint {
                    url: client.url().to_string(),
                    is_rate_limited: false,
                    last_failure_at: None,
                },
                client,
            })
            .collect();
        Ok(Self {
            state: Mutex::new(PoolState { slots, cursor: 0 }),
            cooldown: Duration::from_secs(RATE_LIMIT_COOLDOWN_SECS),
        })
    }

    /// Construit le pool de production à partir des URLs de la config.
    pub fn from_urls(urls: &[String], timeout: Duration) -> Result<Self, EngineError> {
        let clients = urls
            .iter()
            .map(|url| Arc::new(ResilientRpcClient::new(url.clone(), timeout, 2, 300)) as Arc<dyn ChainClient>)
            .collect();
        Self::new(clients)
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current(&self) -> RpcEndpoint {
        let state = self.lock();
        state.slots[state.cursor].endpoint.clone()
    }

    pub fn current_handle(&self) -> EndpointHandle {
        let state = self.lock();
        let slot = &state.slots[state.cursor];
        EndpointHandle {
            index: state.cursor,
            endpoint: slot.endpoint.clone(),
            client: slot.client.clone(),
        }
    }

    /// Marque l'endpoint courant comme limité et avance le curseur.
    /// Le curseur cycle indéfiniment, modulo la taille de la liste.
    pub fn rotate(&self) -> RpcEndpoint {
        let mut state = self.lock();
        let cursor = state.cursor;
        self.rotate_locked(&mut state, cursor)
    }

    /// Rotation conditionnelle : sans effet si une autre requête du même lot
    /// a déjà fait tourner le curseur depuis `failed_index`.
    pub fn rotate_from(&self, failed_index: usize) -> RpcEndpoint {
        let mut state = self.lock();
        if state.cursor != failed_index {
            return state.slots[state.cursor].endpoint.clone();
        }
        self.rotate_locked(&mut state, failed_index)
    }

    fn rotate_locked(&self, state: &mut PoolState, failed_index: usize) -> RpcEndpoint {
        let now = Instant::now();
        {
            let failed = &mut state.slots[failed_index].endpoint;
            failed.is_rate_limited = true;
            failed.last_failure_at = Some(now);
            warn!(endpoint = %failed.url, "[RpcPool] Endpoint limité, rotation.");
        }

        let len = state.slots.len();
        let mut next = (failed_index + 1) % len;
        // On préfère le prochain endpoint hors refroidissement ; à défaut, le suivant tout court.
        for step in 1..=len {
            let candidate = (failed_index + step) % len;
            let endpoint = &mut state.slots[candidate].endpoint;
            if endpoint.is_rate_limited
                && endpoint.last_failure_at.is_some_and(|at| now.duration_since(at) >= self.cooldown)
            {
                endpoint.is_rate_limited = false;
            }
            if !endpoint.is_rate_limited {
                next = candidate;
                break;
            }
        }
        state.cursor = next;
        metrics::ENDPOINT_ROTATIONS.inc();
        let endpoint = state.slots[next].endpoint.clone();
        info!(endpoint = %endpoint.url, "[RpcPool] Nouvel endpoint courant.");
        endpoint
    }

    /// Une réponse réussie lève la marque de limitation de l'endpoint.
    pub fn mark_healthy(&self, index: usize) {
        let mut state = self.lock();
        if let Some(slot) = state.slots.get_mut(index) {
            slot.endpoint.is_rate_limited = false;
        }
    }

    pub fn endpoints(&self) -> Vec<RpcEndpoint> {
        self.lock().slots.iter().map(|s| s.endpoint.clone()).collect()
    }

    /// Lecture simple : en cas de limitation on tourne et on réessaie, au plus
    /// une fois par endpoint. Les autres erreurs remontent telles quelles.
    pub async fn with_rotation<T, F, Fut>(&self, mut op: F) -> Result<T, EngineError>
    where
        F: FnMut(Arc<dyn ChainClient>) -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let mut last_error = None;
        for _ in 0..self.len() {
            let handle = self.current_handle();
            match op(handle.client.clone()).await {
                Ok(value) => {
                    self.mark_healthy(handle.index);
                    return Ok(value);
                }
                Err(error) if error.is_rate_limited() => {
                    metrics::RATE_LIMIT_HITS.inc();
                    self.rotate_from(handle.index);
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }
        Err(last_error.unwrap_or_else(|| EngineError::InvalidConfig("the RPC pool is empty".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature, transaction::Transaction};

    struct NamedClient(String);

    #[async_trait]
    impl ChainClient for NamedClient {
        fn url(&self) -> &str { &self.0 }
        async fn get_balance(&self, _: &Pubkey) -> Result<u64, EngineError> { Ok(0) }
        async fn get_token_account_amount(&self, _: &Pubkey) -> Result<Option<u64>, EngineError> { Ok(None) }
        async fn get_latest_blockhash(&self) -> Result<Hash, EngineError> { Ok(Hash::default()) }
        async fn send_and_confirm_transaction(&self, _: &Transaction) -> Result<Signature, EngineError> {
            Ok(Signature::default())
        }
    }

    fn pool(names: &[&str]) -> RpcEndpointPool {
        let clients = names
            .iter()
            .map(|n| Arc::new(NamedClient(n.to_string())) as Arc<dyn ChainClient>)
            .collect();
        RpcEndpointPool::new(clients).unwrap()
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(RpcEndpointPool::new(Vec::new()).is_err());
    }

    #[test]
    fn rotation_cycles_through_every_endpoint() {
        let pool = pool(&["a", "b", "c"]).with_cooldown(Duration::ZERO);
        assert_eq!(pool.current().url, "a");
        assert_eq!(pool.rotate().url, "b");
        assert_eq!(pool.rotate().url, "c");
        assert_eq!(pool.rotate().url, "a");
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn rotation_skips_endpoints_in_cooldown() {
        let pool = pool(&["a", "b", "c"]);
        pool.rotate(); // a limité -> b
        pool.rotate(); // b limité -> c
        // c limité à son tour : a et b sont encore en refroidissement.
        let after = pool.rotate();
        assert_eq!(after.url, "a", "tout est limité : on avance simplement d'un cran");
        let endpoints = pool.endpoints();
        assert!(endpoints.iter().all(|e| e.is_rate_limited));
    }

    struct LimitedClient;

    #[async_trait]
    impl ChainClient for LimitedClient {
        fn url(&self) -> &str { "limited" }
        async fn get_balance(&self, _: &Pubkey) -> Result<u64, EngineError> {
            Err(EngineError::from_rpc_message("limited", "429 Too Many Requests"))
        }
        async fn get_token_account_amount(&self, _: &Pubkey) -> Result<Option<u64>, EngineError> { Ok(None) }
        async fn get_latest_blockhash(&self) -> Result<Hash, EngineError> { Ok(Hash::default()) }
        async fn send_and_confirm_transaction(&self, _: &Transaction) -> Result<Signature, EngineError> {
            Ok(Signature::default())
        }
    }

    #[tokio::test]
    async fn reads_rotate_past_limited_endpoints() {
        let clients: Vec<Arc<dyn ChainClient>> =
            vec![Arc::new(LimitedClient), Arc::new(LimitedClient), Arc::new(NamedClient("ok".into()))];
        let pool = RpcEndpointPool::new(clients).unwrap();
        let address = Pubkey::new_unique();

        let balance = pool.with_rotation(move |client| async move { client.get_balance(&address).await }).await;
        assert_eq!(balance, Ok(0));
        assert_eq!(pool.current().url, "ok");
        // Le trafic suivant reste sur l'endpoint survivant.
        for _ in 0..5 {
            pool.with_rotation(move |client| async move { client.get_balance(&address).await }).await.unwrap();
            assert_eq!(pool.current().url, "ok");
        }
    }

    #[tokio::test]
    async fn reads_give_up_after_one_round() {
        let clients: Vec<Arc<dyn ChainClient>> = vec![Arc::new(LimitedClient), Arc::new(LimitedClient)];
        let pool = RpcEndpointPool::new(clients).unwrap();
        let address = Pubkey::new_unique();
        let result = pool.with_rotation(move |client| async move { client.get_balance(&address).await }).await;
        assert!(result.unwrap_err().is_rate_limited());
    }

    #[test]
    fn stale_rotation_request_does_not_move_the_cursor() {
        let pool = pool(&["a", "b", "c"]);
        pool.rotate_from(0);
        assert_eq!(pool.current().url, "b");
        // Une deuxième requête du lot échoue encore sur "a" : le curseur ne bouge pas.
        assert_eq!(pool.rotate_from(0).url, "b");
    }
}
