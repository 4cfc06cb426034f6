// DANS : src/execution/queue.rs

use futures::future::join_all;
use solana_sdk::{
    hash::Hash, instruction::Instruction, pubkey::Pubkey, signature::Signature, transaction::Transaction,
};
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::EngineError;
use crate::monitoring::metrics;
use crate::rpc::{ChainClient, RpcEndpointPool};
use crate::wallet::signer::{WalletSigner, connected_key};

/// Intervalle auquel un appelant en attente vérifie si le vidage est libre.
const IDLE_POLL: Duration = Duration::from_millis(50);

pub type ProgressCallback = Arc<dyn Fn(usize) + Send + Sync>;

/// Une transaction à construire, signer et envoyer. Le blockhash est posé au
/// moment du lot, la signature se fait donc dans la file.
pub struct TransactionJob {
    /// Portefeuilles concernés (destinataires d'un financement, source d'une récupération).
    pub targets: Vec<Pubkey>,
    pub instructions: Vec<Instruction>,
    /// Payeur des frais, premier signataire.
    pub signer: Arc<dyn WalletSigner>,
    /// Signataires supplémentaires (propriétaires des comptes débités).
    pub co_signers: Vec<Arc<dyn WalletSigner>>,
}

impl TransactionJob {
    pub fn new(targets: Vec<Pubkey>, instructions: Vec<Instruction>, signer: Arc<dyn WalletSigner>) -> Self {
        Self { targets, instructions, signer, co_signers: Vec::new() }
    }

    pub fn with_co_signer(mut self, signer: Arc<dyn WalletSigner>) -> Self {
        self.co_signers.push(signer);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    Success(Signature),
    Failed(EngineError),
}

/// État terminal d'une transaction, renvoyé à l'appelant qui l'a soumise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutcome {
    /// Rang dans la liste passée à `enqueue`.
    pub position: usize,
    pub targets: Vec<Pubkey>,
    pub status: TransactionStatus,
    /// Nombre d'envois tentés (0 si la transaction n'est jamais partie).
    pub attempts: u32,
}

impl TransactionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, TransactionStatus::Success(_))
    }

    pub fn signature(&self) -> Option<Signature> {
        match &self.status {
            TransactionStatus::Success(signature) => Some(*signature),
            TransactionStatus::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&EngineError> {
        match &self.status {
            TransactionStatus::Failed(error) => Some(error),
            TransactionStatus::Success(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub successful: Vec<TransactionOutcome>,
    pub failed: Vec<TransactionOutcome>,
}

impl BatchReport {
    fn from_outcomes(mut outcomes: Vec<TransactionOutcome>) -> Self {
        outcomes.sort_by_key(|o| o.position);
        let (successful, failed) = outcomes.into_iter().partition(TransactionOutcome::is_success);
        Self { successful, failed }
    }

    pub fn total(&self) -> usize {
        self.successful.len() + self.failed.len()
    }
}

struct PendingJob {
    position: usize,
    job: TransactionJob,
    attempts: u32,
    rate_limit_hits: u32,
    cancel: CancellationToken,
    caller: mpsc::UnboundedSender<TransactionOutcome>,
    processed: Arc<AtomicUsize>,
    progress: Option<ProgressCallback>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PendingJob>,
    draining: bool,
}

/// File de transactions vidée par lots de taille fixe contre le pool d'endpoints.
///
/// Un seul vidage tourne à la fois. Un appel à `enqueue` pendant un vidage
/// ajoute son travail à la liste en attente ; le vidage en cours le prendra, et
/// chaque appelant ne reçoit que ses propres résultats.
pub struct BatchTransactionQueue {
    pool: Arc<RpcEndpointPool>,
    config: QueueConfig,
    state: Mutex<QueueState>,
}

impl BatchTransactionQueue {
    pub fn new(pool: Arc<RpcEndpointPool>, config: QueueConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { pool, config, state: Mutex::new(QueueState::default()) })
    }

    pub fn pool(&self) -> &Arc<RpcEndpointPool> {
        &self.pool
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Soumet `jobs` et attend que chacun ait un état terminal.
    /// `successful.len() + failed.len() == jobs.len()` en toutes circonstances.
    pub async fn enqueue(
        &self,
        jobs: Vec<TransactionJob>,
        on_progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let expected = jobs.len();
        if expected == 0 {
            return BatchReport::default();
        }

        let targets: Vec<Vec<Pubkey>> = jobs.iter().map(|j| j.targets.clone()).collect();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let processed = Arc::new(AtomicUsize::new(0));
        let mut drive = {
            let mut state = self.lock();
            for (position, job) in jobs.into_iter().enumerate() {
                state.pending.push_back(PendingJob {
                    position,
                    job,
                    attempts: 0,
                    rate_limit_hits: 0,
                    cancel: cancel.clone(),
                    caller: sender.clone(),
                    processed: processed.clone(),
                    progress: on_progress.clone(),
                });
            }
            claim_drain(&mut state)
        };
        drop(sender);
        debug!(count = expected, drainer = drive, "[TxQueue] Transactions mises en file.");

        let mut outcomes = Vec::with_capacity(expected);
        loop {
            if drive {
                self.drain().await;
            }
            while let Ok(outcome) = receiver.try_recv() {
                outcomes.push(outcome);
            }
            if outcomes.len() >= expected {
                break;
            }
            match tokio::time::timeout(IDLE_POLL, receiver.recv()).await {
                Ok(Some(outcome)) => outcomes.push(outcome),
                // Tous les émetteurs ont disparu : un vidage a été abandonné en route.
                Ok(None) => break,
                Err(_) => {}
            }
            if outcomes.len() >= expected {
                break;
            }
            drive = claim_drain(&mut self.lock());
        }

        if outcomes.len() < expected {
            let mut seen = vec![false; expected];
            for outcome in &outcomes {
                seen[outcome.position] = true;
            }
            for (position, done) in seen.into_iter().enumerate() {
                if !done {
                    outcomes.push(TransactionOutcome {
                        position,
                        targets: targets[position].clone(),
                        status: TransactionStatus::Failed(EngineError::Cancelled),
                        attempts: 0,
                    });
                }
            }
        }

        let report = BatchReport::from_outcomes(outcomes);
        info!(
            successful = report.successful.len(),
            failed = report.failed.len(),
            "[TxQueue] Toutes les transactions soumises sont terminées."
        );
        report
    }

    async fn drain(&self) {
        let mut release = DrainRelease { queue: self, armed: true };
        loop {
            let batch: Vec<PendingJob> = {
                let mut state = self.lock();
                if state.pending.is_empty() {
                    state.draining = false;
                    release.armed = false;
                    return;
                }
                let take = self.config.batch_size.min(state.pending.len());
                state.pending.drain(..take).collect()
            };

            let (cancelled, live): (Vec<_>, Vec<_>) = batch.into_iter().partition(|j| j.cancel.is_cancelled());
            for job in cancelled {
                settle(job, TransactionStatus::Failed(EngineError::Cancelled));
            }
            if live.is_empty() {
                continue;
            }

            let handle = self.pool.current_handle();
            metrics::BATCHES_PROCESSED.inc();
            info!(size = live.len(), endpoint = %handle.endpoint.url, "[TxQueue] Envoi d'un lot.");

            match handle.client.get_latest_blockhash().await {
                Ok(blockhash) => {
                    let sends = live
                        .into_iter()
                        .map(|job| submit(job, handle.client.clone(), blockhash));
                    for (job, result) in join_all(sends).await {
                        match result {
                            Ok(signature) => {
                                self.pool.mark_healthy(handle.index);
                                settle(job, TransactionStatus::Success(signature));
                            }
                            Err(error) if error.is_rate_limited() => {
                                metrics::RATE_LIMIT_HITS.inc();
                                self.pool.rotate_from(handle.index);
                                self.requeue_or_fail(job, error);
                            }
                            Err(error) => {
                                warn!(targets = ?job.job.targets, error = %error, "[TxQueue] Échec terminal.");
                                settle(job, TransactionStatus::Failed(error));
                            }
                        }
                    }
                }
                Err(error) => {
                    // Sans blockhash, rien n'est parti : le lot entier repart en fin de file.
                    warn!(endpoint = %handle.endpoint.url, error = %error, "[TxQueue] Blockhash indisponible.");
                    if error.is_rate_limited() {
                        metrics::RATE_LIMIT_HITS.inc();
                    }
                    self.pool.rotate_from(handle.index);
                    for job in live {
                        self.requeue_or_fail(job, error.clone());
                    }
                }
            }

            if self.pending_len() > 0 && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }
        }
    }

    fn requeue_or_fail(&self, mut job: PendingJob, error: EngineError) {
        job.rate_limit_hits += 1;
        if job.rate_limit_hits > self.config.max_rate_limit_retries {
            warn!(targets = ?job.job.targets, hits = job.rate_limit_hits, "[TxQueue] Abandon après trop de limitations.");
            settle(job, TransactionStatus::Failed(error));
            return;
        }
        debug!(targets = ?job.job.targets, hits = job.rate_limit_hits, "[TxQueue] Remise en fin de file.");
        self.lock().pending.push_back(job);
    }
}

fn claim_drain(state: &mut QueueState) -> bool {
    if state.draining {
        false
    } else {
        state.draining = true;
        true
    }
}

/// Libère le vidage si son futur est abandonné avant la fin.
struct DrainRelease<'a> {
    queue: &'a BatchTransactionQueue,
    armed: bool,
}

impl Drop for DrainRelease<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.queue.lock().draining = false;
        }
    }
}

async fn submit(
    mut job: PendingJob,
    client: Arc<dyn ChainClient>,
    blockhash: Hash,
) -> (PendingJob, Result<Signature, EngineError>) {
    job.attempts += 1;
    let result = send_job(&job.job, client.as_ref(), blockhash).await;
    (job, result)
}

async fn send_job(job: &TransactionJob, client: &dyn ChainClient, blockhash: Hash) -> Result<Signature, EngineError> {
    let payer = connected_key(job.signer.as_ref())?;
    let mut transaction = Transaction::new_with_payer(&job.instructions, Some(&payer));
    transaction.message.recent_blockhash = blockhash;
    let mut signed = job.signer.sign_transaction(transaction).await?;
    for co_signer in &job.co_signers {
        signed = co_signer.sign_transaction(signed).await?;
    }
    if !signed.is_signed() {
        return Err(EngineError::Signing("transaction is missing required signatures".into()));
    }
    client.send_and_confirm_transaction(&signed).await
}

fn settle(job: PendingJob, status: TransactionStatus) {
    let label = match &status {
        TransactionStatus::Success(_) => "success",
        TransactionStatus::Failed(EngineError::Cancelled) => "cancelled",
        TransactionStatus::Failed(_) => "failed",
    };
    metrics::TRANSACTION_OUTCOMES.with_label_values(&[label]).inc();

    let outcome = TransactionOutcome {
        position: job.position,
        targets: job.job.targets,
        status,
        attempts: job.attempts,
    };
    let processed = job.processed.fetch_add(1, Ordering::SeqCst) + 1;
    if let Some(progress) = &job.progress {
        progress(processed);
    }
    // L'appelant peut avoir abandonné son attente ; le résultat est alors perdu pour lui seul.
    let _ = job.caller.send(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::signer::KeypairSigner;
    use async_trait::async_trait;
    use solana_sdk::{signature::Keypair, system_instruction};
    use std::sync::atomic::AtomicU32;

    /// Endpoint scripté : `failures` premiers envois renvoient `message`, puis succès.
    struct ScriptedClient {
        url: String,
        failures: AtomicU32,
        message: Option<String>,
        sends: AtomicU32,
    }

    impl ScriptedClient {
        fn healthy(url: &str) -> Arc<Self> {
            Arc::new(Self { url: url.into(), failures: AtomicU32::new(0), message: None, sends: AtomicU32::new(0) })
        }

        fn failing(url: &str, message: &str, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                url: url.into(),
                failures: AtomicU32::new(failures),
                message: Some(message.into()),
                sends: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ChainClient for ScriptedClient {
        fn url(&self) -> &str {
            &self.url
        }
        async fn get_balance(&self, _: &Pubkey) -> Result<u64, EngineError> {
            Ok(0)
        }
        async fn get_token_account_amount(&self, _: &Pubkey) -> Result<Option<u64>, EngineError> {
            Ok(None)
        }
        async fn get_latest_blockhash(&self) -> Result<Hash, EngineError> {
            Ok(Hash::new_unique())
        }
        async fn send_and_confirm_transaction(&self, tx: &Transaction) -> Result<Signature, EngineError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.message {
                let left = self.failures.load(Ordering::SeqCst);
                if left > 0 {
                    self.failures.fetch_sub(1, Ordering::SeqCst);
                    return Err(EngineError::from_rpc_message(&self.url, message.clone()));
                }
            }
            Ok(tx.signatures[0])
        }
    }

    fn queue(clients: Vec<Arc<ScriptedClient>>, max_retries: u32) -> BatchTransactionQueue {
        let clients = clients.into_iter().map(|c| c as Arc<dyn ChainClient>).collect();
        let pool = Arc::new(RpcEndpointPool::new(clients).unwrap());
        let config = QueueConfig { batch_size: 8, batch_delay: Duration::ZERO, max_rate_limit_retries: max_retries };
        BatchTransactionQueue::new(pool, config).unwrap()
    }

    fn jobs(n: usize) -> Vec<TransactionJob> {
        let signer = Arc::new(KeypairSigner::new(Keypair::new()));
        (0..n)
            .map(|_| {
                let target = Pubkey::new_unique();
                TransactionJob::new(
                    vec![target],
                    vec![system_instruction::transfer(&signer.pubkey(), &target, 1_000)],
                    signer.clone(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn every_job_is_accounted_for() {
        for n in [0usize, 1, 8, 9, 100] {
            let q = queue(vec![ScriptedClient::healthy("a")], 3);
            let report = q.enqueue(jobs(n), None, &CancellationToken::new()).await;
            assert_eq!(report.total(), n, "n = {n}");
            assert_eq!(report.successful.len(), n);
            assert_eq!(q.pending_len(), 0);
        }
    }

    #[tokio::test]
    async fn rate_limited_jobs_are_retried_on_the_next_endpoint() {
        let limited = ScriptedClient::failing("a", "429 Too Many Requests", u32::MAX);
        let healthy = ScriptedClient::healthy("b");
        let q = queue(vec![limited.clone(), healthy.clone()], 5);

        let report = q.enqueue(jobs(9), None, &CancellationToken::new()).await;
        assert_eq!(report.successful.len(), 9);
        assert_eq!(q.pool().current().url, "b");
        assert_eq!(limited.sends.load(Ordering::SeqCst), 8, "only the first batch hit the limited endpoint");
        assert!(report.successful.iter().take(8).all(|o| o.attempts == 2));
    }

    #[tokio::test]
    async fn other_errors_are_terminal() {
        let client = ScriptedClient::failing("a", "custom program error: 0x1", 1);
        let q = queue(vec![client.clone()], 5);
        let report = q.enqueue(jobs(1), None, &CancellationToken::new()).await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(client.sends.load(Ordering::SeqCst), 1);
        assert!(matches!(report.failed[0].error(), Some(EngineError::Rpc { .. })));
    }

    #[tokio::test]
    async fn retry_budget_bounds_a_fully_limited_pool() {
        let q = queue(vec![ScriptedClient::failing("a", "rate limit exceeded", u32::MAX)], 2);
        let report = q.enqueue(jobs(3), None, &CancellationToken::new()).await;
        assert_eq!(report.failed.len(), 3);
        assert!(report.failed.iter().all(|o| o.attempts == 3 && o.error().is_some_and(EngineError::is_rate_limited)));
    }

    #[tokio::test]
    async fn progress_is_reported_once_per_job() {
        let q = queue(vec![ScriptedClient::failing("a", "429", 4), ScriptedClient::healthy("b")], 5);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressCallback = Arc::new(move |n| sink.lock().unwrap().push(n));

        q.enqueue(jobs(12), Some(progress), &CancellationToken::new()).await;
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, (1..=12).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn cancelled_jobs_are_reported_as_failed() {
        let client = ScriptedClient::healthy("a");
        let q = queue(vec![client.clone()], 5);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = q.enqueue(jobs(10), None, &cancel).await;
        assert_eq!(report.failed.len(), 10);
        assert!(report.failed.iter().all(|o| o.error() == Some(&EngineError::Cancelled) && o.attempts == 0));
        assert_eq!(client.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_callers_receive_only_their_own_outcomes() {
        let q = Arc::new(queue(vec![ScriptedClient::healthy("a")], 5));
        let first = jobs(20);
        let second = jobs(5);
        let second_targets: Vec<Pubkey> = second.iter().map(|j| j.targets[0]).collect();

        let (c1, c2) = (CancellationToken::new(), CancellationToken::new());
        let (a, b) = tokio::join!(q.enqueue(first, None, &c1), q.enqueue(second, None, &c2));
        assert_eq!(a.successful.len(), 20);
        assert_eq!(b.successful.len(), 5);
        let got: Vec<Pubkey> = b.successful.iter().map(|o| o.targets[0]).collect();
        assert_eq!(got, second_targets);
    }
}
