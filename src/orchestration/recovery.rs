// DANS : src/orchestration/recovery.rs

use solana_sdk::{instruction::Instruction, pubkey::Pubkey, signature::Signature, system_instruction};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};
use std::{collections::HashMap, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RecoveryConfig;
use crate::constants::{ATA_MINIMUM_LAMPORTS, RECIPIENTS_PER_TRANSACTION, TX_FEE_LAMPORTS, lamports_to_sol};
use crate::error::EngineError;
use crate::execution::queue::{BatchTransactionQueue, ProgressCallback, TransactionJob};
use crate::orchestration::prompt::OperatorPrompt;
use crate::orchestration::result::{OperationKind, OperationResult, WalletOutcome};
use crate::state::balance_scanner::{BalanceScanner, WalletBalanceSnapshot, WalletState};
use crate::wallet::derivation::DerivedKeypair;
use crate::wallet::signer::{KeypairSigner, WalletSigner, connected_key};

/// Montant rendu au parent par un portefeuille `Excess` qui paie ses propres frais :
/// il reste exactement la réserve ATA sur le portefeuille. `None` si l'excédent
/// ne couvre pas les frais.
pub fn recoverable_lamports(lamports: u64) -> Option<u64> {
    lamports
        .checked_sub(ATA_MINIMUM_LAMPORTS)
        .and_then(|excess| excess.checked_sub(TX_FEE_LAMPORTS))
        .filter(|amount| *amount > 0)
}

fn close_instruction(wallet: &Pubkey, parent: &Pubkey, mint: &Pubkey) -> Result<Instruction, EngineError> {
    let ata = get_associated_token_address(wallet, mint);
    spl_token::instruction::close_account(&spl_token::id(), &ata, parent, wallet, &[])
        .map_err(|e| EngineError::Instruction(format!("close_account for {wallet}: {e}")))
}

struct RecoveryJob {
    wallet: Pubkey,
    amount: u64,
    closes: usize,
    job: TransactionJob,
}

pub struct RecoveryOrchestrator {
    queue: Arc<BatchTransactionQueue>,
    scanner: Arc<BalanceScanner>,
    prompt: Arc<dyn OperatorPrompt>,
    progress: Option<ProgressCallback>,
}

impl RecoveryOrchestrator {
    pub fn new(queue: Arc<BatchTransactionQueue>, scanner: Arc<BalanceScanner>, prompt: Arc<dyn OperatorPrompt>) -> Self {
        Self { queue, scanner, prompt, progress: None }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Rend au parent l'excédent de chaque portefeuille `Excess`, signé par le
    /// portefeuille lui-même. Ceux qui ne peuvent pas payer leurs frais se voient
    /// proposer un complément, sinon ils sont rendus en échec.
    pub async fn recover_excess_sol(
        &self,
        parent: Arc<dyn WalletSigner>,
        wallets: &[DerivedKeypair],
        config: &RecoveryConfig,
        cancel: &CancellationToken,
    ) -> Result<OperationResult, EngineError> {
        let parent_key = connected_key(parent.as_ref())?;
        let addresses: Vec<Pubkey> = wallets.iter().map(|w| w.public_key).collect();
        let snapshots = self.scanner.scan(&addresses, cancel).await;

        let mut failed = Vec::new();
        let mut ready: Vec<(&DerivedKeypair, u64)> = Vec::new();
        let mut short_of_fee: Vec<(&DerivedKeypair, u64)> = Vec::new();
        let mut close_only: Vec<&DerivedKeypair> = Vec::new();

        for wallet in wallets {
            let Some(snapshot) = snapshots.get(&wallet.public_key) else { continue };
            match snapshot.state {
                WalletState::Excess => match recoverable_lamports(snapshot.lamports) {
                    Some(amount) => ready.push((wallet, amount)),
                    None => short_of_fee.push((wallet, snapshot.lamports)),
                },
                WalletState::Unscanned => {
                    warn!(wallet = %wallet.public_key, "[Recovery] Portefeuille non scanné, ignoré.");
                }
                WalletState::AtaOnly | WalletState::Empty => {
                    if config.close_token_accounts
                        && snapshot.lamports >= TX_FEE_LAMPORTS
                        && !self.closable_mints(snapshot, config).is_empty()
                    {
                        close_only.push(wallet);
                    }
                }
            }
        }

        if !short_of_fee.is_empty() {
            let topped_up = self.top_up_fees(&parent, parent_key, &short_of_fee, config, cancel).await;
            for (wallet, lamports) in short_of_fee {
                match topped_up.get(&wallet.public_key) {
                    // Le complément couvre les frais : tout l'excédent peut repartir.
                    Some(Ok(())) => ready.push((wallet, lamports - ATA_MINIMUM_LAMPORTS)),
                    Some(Err(error)) => failed.push(WalletOutcome::failure(wallet.public_key, 0, error.clone())),
                    None => failed.push(WalletOutcome::failure(
                        wallet.public_key,
                        0,
                        EngineError::InsufficientFunds {
                            have: lamports - ATA_MINIMUM_LAMPORTS,
                            need: TX_FEE_LAMPORTS + 1,
                        },
                    )),
                }
            }
        }

        let mut jobs = Vec::with_capacity(ready.len() + close_only.len());
        for (wallet, amount) in ready {
            let snapshot = &snapshots[&wallet.public_key];
            match self.build_job(wallet, parent_key, amount, snapshot, config) {
                Ok(job) => jobs.push(job),
                Err(error) => failed.push(WalletOutcome::failure(wallet.public_key, amount, error)),
            }
        }
        for wallet in close_only {
            let snapshot = &snapshots[&wallet.public_key];
            match self.build_job(wallet, parent_key, 0, snapshot, config) {
                Ok(job) => jobs.push(job),
                Err(error) => failed.push(WalletOutcome::failure(wallet.public_key, 0, error)),
            }
        }

        let total: u64 = jobs.iter().map(|j| j.amount).sum();
        info!(
            wallets = jobs.len(),
            expected_sol = lamports_to_sol(total),
            "[Recovery] Récupération de l'excédent SOL."
        );

        let amounts: HashMap<Pubkey, u64> = jobs.iter().map(|j| (j.wallet, j.amount)).collect();
        let closes: HashMap<Pubkey, usize> = jobs.iter().map(|j| (j.wallet, j.closes)).collect();
        let report = self
            .queue
            .enqueue(jobs.into_iter().map(|j| j.job).collect(), self.progress.clone(), cancel)
            .await;

        let closed: usize = report
            .successful
            .iter()
            .flat_map(|o| o.targets.iter())
            .map(|w| closes.get(w).copied().unwrap_or(0))
            .sum();
        let result = OperationResult::from_report(OperationKind::SolRecovery, &report, &amounts)
            .merge(OperationResult::new(OperationKind::SolRecovery, Vec::new(), failed))
            .with_closed_token_accounts(closed);
        info!(summary = %result.summary(), "[Recovery] Terminé.");
        Ok(result)
    }

    fn closable_mints(&self, snapshot: &WalletBalanceSnapshot, config: &RecoveryConfig) -> Vec<Pubkey> {
        config
            .token_mints
            .iter()
            .filter(|mint| snapshot.open_token_accounts.contains(*mint) && snapshot.token_balance(mint) == 0)
            .copied()
            .collect()
    }

    fn build_job(
        &self,
        wallet: &DerivedKeypair,
        parent: Pubkey,
        amount: u64,
        snapshot: &WalletBalanceSnapshot,
        config: &RecoveryConfig,
    ) -> Result<RecoveryJob, EngineError> {
        let mut instructions = Vec::new();
        if amount > 0 {
            instructions.push(system_instruction::transfer(&wallet.public_key, &parent, amount));
        }
        let mut closes = 0;
        if config.close_token_accounts {
            for mint in self.closable_mints(snapshot, config) {
                instructions.push(close_instruction(&wallet.public_key, &parent, &mint)?);
                closes += 1;
            }
        }
        let signer: Arc<dyn WalletSigner> = Arc::new(KeypairSigner::new(wallet.keypair()?));
        Ok(RecoveryJob {
            wallet: wallet.public_key,
            amount,
            closes,
            job: TransactionJob::new(vec![wallet.public_key], instructions, signer),
        })
    }

    /// Complément de frais payé par le parent, après accord explicite.
    /// Rend, par portefeuille, le résultat du complément ; rien si l'utilisateur refuse.
    async fn top_up_fees(
        &self,
        parent: &Arc<dyn WalletSigner>,
        parent_key: Pubkey,
        wallets: &[(&DerivedKeypair, u64)],
        config: &RecoveryConfig,
        cancel: &CancellationToken,
    ) -> HashMap<Pubkey, Result<(), EngineError>> {
        let mut outcomes = HashMap::new();
        if !config.offer_fee_top_up {
            return outcomes;
        }
        let transactions = wallets.len().div_ceil(RECIPIENTS_PER_TRANSACTION) as u64;
        let cost = wallets.len() as u64 * TX_FEE_LAMPORTS + transactions * TX_FEE_LAMPORTS;
        let question = format!(
            "{} wallets cannot pay their own recovery fee. Send {:.6} SOL from the parent wallet to cover it (total cost {:.6} SOL)?",
            wallets.len(),
            lamports_to_sol(wallets.len() as u64 * TX_FEE_LAMPORTS),
            lamports_to_sol(cost)
        );
        if !self.prompt.confirm(&question).await {
            info!(count = wallets.len(), "[Recovery] Complément de frais refusé.");
            return outcomes;
        }

        let jobs: Vec<TransactionJob> = wallets
            .chunks(RECIPIENTS_PER_TRANSACTION)
            .map(|chunk| {
                let instructions = chunk
                    .iter()
                    .map(|(w, _)| system_instruction::transfer(&parent_key, &w.public_key, TX_FEE_LAMPORTS))
                    .collect();
                let targets = chunk.iter().map(|(w, _)| w.public_key).collect();
                TransactionJob::new(targets, instructions, parent.clone())
            })
            .collect();
        let report = self.queue.enqueue(jobs, None, cancel).await;
        for outcome in &report.successful {
            for target in &outcome.targets {
                outcomes.insert(*target, Ok(()));
            }
        }
        for outcome in &report.failed {
            let error = outcome.error().cloned().unwrap_or(EngineError::Cancelled);
            for target in &outcome.targets {
                outcomes.insert(*target, Err(error.clone()));
            }
        }
        info!(
            topped_up = report.successful.len(),
            failed = report.failed.len(),
            "[Recovery] Complément de frais envoyé."
        );
        outcomes
    }

    /// Vide le solde SPL d'un portefeuille vers l'ATA du parent, puis vérifie
    /// qu'il ne reste rien. La fermeture du compte n'a lieu qu'après cette vérification.
    pub async fn recover_tokens(
        &self,
        parent: Arc<dyn WalletSigner>,
        wallet: &DerivedKeypair,
        mint: &Pubkey,
        close_account: bool,
        cancel: &CancellationToken,
    ) -> Result<Signature, EngineError> {
        let result = self
            .recover_tokens_from_wallets(parent, std::slice::from_ref(wallet), mint, close_account, cancel)
            .await?;
        if let Some(outcome) = result.failed().first() {
            return Err(outcome.error.clone().unwrap_or(EngineError::Cancelled));
        }
        result
            .successful()
            .first()
            .and_then(|o| o.signature)
            .ok_or(EngineError::InsufficientTokens { have: 0, need: 1 })
    }

    /// Version flotte : un transfert par portefeuille, le parent paie les frais
    /// et la création éventuelle de son ATA, chaque portefeuille co-signe.
    pub async fn recover_tokens_from_wallets(
        &self,
        parent: Arc<dyn WalletSigner>,
        wallets: &[DerivedKeypair],
        mint: &Pubkey,
        close_account: bool,
        cancel: &CancellationToken,
    ) -> Result<OperationResult, EngineError> {
        let parent_key = connected_key(parent.as_ref())?;
        let parent_ata = get_associated_token_address(&parent_key, mint);
        let pool = self.queue.pool().clone();

        let mut failed = Vec::new();
        let mut jobs = Vec::new();
        let mut amounts = HashMap::new();
        let mut children: HashMap<Pubkey, Arc<dyn WalletSigner>> = HashMap::new();

        for wallet in wallets {
            let owner = wallet.public_key;
            let ata = get_associated_token_address(&owner, mint);
            let amount = match pool
                .with_rotation(move |client| async move { client.get_token_account_amount(&ata).await })
                .await
            {
                Ok(Some(amount)) if amount > 0 => amount,
                Ok(_) => {
                    failed.push(WalletOutcome::failure(owner, 0, EngineError::InsufficientTokens { have: 0, need: 1 }));
                    continue;
                }
                Err(error) => {
                    failed.push(WalletOutcome::failure(owner, 0, error));
                    continue;
                }
            };

            let transfer = spl_token::instruction::transfer(&spl_token::id(), &ata, &parent_ata, &owner, &[], amount)
                .map_err(|e| EngineError::Instruction(format!("token transfer for {owner}: {e}")));
            let (transfer, child) = match (transfer, wallet.keypair()) {
                (Ok(ix), Ok(kp)) => (ix, Arc::new(KeypairSigner::new(kp)) as Arc<dyn WalletSigner>),
                (Err(error), _) | (_, Err(error)) => {
                    failed.push(WalletOutcome::failure(owner, amount, error));
                    continue;
                }
            };
            let create = create_associated_token_account_idempotent(&parent_key, &parent_key, mint, &spl_token::id());
            jobs.push(TransactionJob::new(vec![owner], vec![create, transfer], parent.clone()).with_co_signer(child.clone()));
            amounts.insert(owner, amount);
            children.insert(owner, child);
        }

        info!(wallets = jobs.len(), mint = %mint, "[Recovery] Récupération des tokens.");
        let report = self.queue.enqueue(jobs, self.progress.clone(), cancel).await;
        let transferred = OperationResult::from_report(OperationKind::TokenRecovery, &report, &amounts);

        // Un transfert confirmé doit avoir vidé le compte ; sinon c'est un échec.
        let mut successful = Vec::new();
        let mut drained = Vec::new();
        for outcome in transferred.successful() {
            let ata = get_associated_token_address(&outcome.wallet, mint);
            let remaining = pool
                .with_rotation(move |client| async move { client.get_token_account_amount(&ata).await })
                .await;
            match remaining {
                Ok(Some(left)) if left > 0 => {
                    warn!(wallet = %outcome.wallet, left, "[Recovery] Solde résiduel après transfert.");
                    failed.push(WalletOutcome::failure(
                        outcome.wallet,
                        outcome.amount,
                        EngineError::RecoveryIncomplete { wallet: outcome.wallet, remaining: left },
                    ));
                }
                Ok(_) => {
                    successful.push(outcome.clone());
                    drained.push(outcome.wallet);
                }
                Err(error) => failed.push(WalletOutcome::failure(outcome.wallet, outcome.amount, error)),
            }
        }
        failed.extend(transferred.failed().iter().cloned());

        // Tokens déjà rendus : une fermeture ratée apparaît en échec à montant nul.
        let mut closed = 0;
        if close_account && !drained.is_empty() {
            let mut close_jobs = Vec::new();
            for owner in &drained {
                let job = close_instruction(owner, &parent_key, mint).and_then(|ix| {
                    let child = children.get(owner).cloned().ok_or(EngineError::SignerNotConnected)?;
                    Ok(TransactionJob::new(vec![*owner], vec![ix], parent.clone()).with_co_signer(child))
                });
                match job {
                    Ok(job) => close_jobs.push(job),
                    Err(error) => {
                        warn!(wallet = %owner, error = %error, "[Recovery] Fermeture du compte token impossible.");
                        failed.push(WalletOutcome::failure(*owner, 0, error));
                    }
                }
            }
            let report = self.queue.enqueue(close_jobs, None, cancel).await;
            closed = report.successful.len();
            for outcome in &report.failed {
                let error = outcome.error().cloned().unwrap_or(EngineError::Cancelled);
                warn!(wallets = ?outcome.targets, error = %error, "[Recovery] Fermeture du compte token échouée.");
                failed.extend(outcome.targets.iter().map(|w| WalletOutcome::failure(*w, 0, error.clone())));
            }
        }

        let result = OperationResult::new(OperationKind::TokenRecovery, successful, failed).with_closed_token_accounts(closed);
        info!(summary = %result.summary(), "[Recovery] Terminé.");
        Ok(result)
    }
}
