// DANS : src/orchestration/distribution.rs

use rand::{Rng, SeedableRng, rngs::StdRng};
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};
use std::{collections::HashMap, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{DistributionConfig, DistributionMode};
use crate::constants::{MAX_WALLETS, TOKEN_ACCOUNT_RENT_LAMPORTS, TX_FEE_LAMPORTS, lamports_to_sol};
use crate::error::EngineError;
use crate::execution::queue::{BatchTransactionQueue, ProgressCallback, TransactionJob};
use crate::orchestration::prompt::OperatorPrompt;
use crate::orchestration::result::{OperationKind, OperationResult};
use crate::wallet::signer::{WalletSigner, connected_key};

/// Parts égales ; le reste de la division va aux premiers portefeuilles.
pub fn equal_split(total: u64, count: usize) -> Vec<u64> {
    if count == 0 {
        return Vec::new();
    }
    let n = count as u64;
    let base = total / n;
    let remainder = (total % n) as usize;
    (0..count).map(|i| base + u64::from(i < remainder)).collect()
}

/// Parts aléatoires d'au moins une unité chacune, dont la somme vaut exactement `total`.
pub fn random_split<R: Rng>(total: u64, count: usize, rng: &mut R) -> Vec<u64> {
    if count == 0 {
        return Vec::new();
    }
    let n = count as u64;
    if total < n {
        return equal_split(total, count);
    }
    let spare = (total - n) as u128;
    let weights: Vec<u128> = (0..count).map(|_| rng.gen_range(1u128..=1_000)).collect();
    let weight_sum: u128 = weights.iter().sum();

    let mut shares: Vec<u64> = weights.iter().map(|w| 1 + (spare * w / weight_sum) as u64).collect();
    let assigned: u64 = shares.iter().sum();
    // Les arrondis laissent moins de `count` unités : une de plus aux premiers.
    for share in shares.iter_mut().take((total - assigned) as usize) {
        *share += 1;
    }
    shares
}

/// Estimation SOL du parent : une signature par transaction, et un loyer
/// d'ATA par destinataire dans le pire cas.
pub fn distribution_fee_estimate(recipients: usize, recipients_per_transaction: usize) -> u64 {
    let transactions = recipients.div_ceil(recipients_per_transaction.max(1)) as u64;
    transactions * TX_FEE_LAMPORTS + recipients as u64 * TOKEN_ACCOUNT_RENT_LAMPORTS
}

pub struct DistributionOrchestrator {
    queue: Arc<BatchTransactionQueue>,
    prompt: Arc<dyn OperatorPrompt>,
    progress: Option<ProgressCallback>,
}

impl DistributionOrchestrator {
    pub fn new(queue: Arc<BatchTransactionQueue>, prompt: Arc<dyn OperatorPrompt>) -> Self {
        Self { queue, prompt, progress: None }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub async fn distribute_tokens(
        &self,
        parent: Arc<dyn WalletSigner>,
        targets: &[Pubkey],
        config: &DistributionConfig,
        cancel: &CancellationToken,
    ) -> Result<OperationResult, EngineError> {
        let mut rng = StdRng::from_entropy();
        self.distribute_tokens_with_rng(parent, targets, config, &mut rng, cancel).await
    }

    pub async fn distribute_tokens_with_rng<R: Rng + Send>(
        &self,
        parent: Arc<dyn WalletSigner>,
        targets: &[Pubkey],
        config: &DistributionConfig,
        rng: &mut R,
        cancel: &CancellationToken,
    ) -> Result<OperationResult, EngineError> {
        let parent_key = connected_key(parent.as_ref())?;
        if targets.is_empty() {
            return Ok(OperationResult::new(OperationKind::Distribution, Vec::new(), Vec::new()));
        }
        if targets.len() > MAX_WALLETS {
            return Err(EngineError::InvalidConfig(format!(
                "cannot distribute to {} wallets, the limit is {MAX_WALLETS}",
                targets.len()
            )));
        }
        config.validate(targets.len())?;

        let shares = match config.mode {
            DistributionMode::Equal => equal_split(config.total_amount, targets.len()),
            DistributionMode::Random => random_split(config.total_amount, targets.len(), rng),
        };

        let pool = self.queue.pool().clone();
        let mint = config.mint;
        let parent_ata = get_associated_token_address(&parent_key, &mint);
        let have_tokens = pool
            .with_rotation(move |client| async move { client.get_token_account_amount(&parent_ata).await })
            .await?
            .unwrap_or(0);
        if have_tokens < config.total_amount {
            warn!(have = have_tokens, need = config.total_amount, "[Distribution] Tokens insuffisants.");
            return Err(EngineError::InsufficientTokens { have: have_tokens, need: config.total_amount });
        }
        let have_sol = pool
            .with_rotation(move |client| async move { client.get_balance(&parent_key).await })
            .await?;
        let fees = distribution_fee_estimate(targets.len(), config.recipients_per_transaction);
        if have_sol < fees {
            return Err(EngineError::InsufficientFunds { have: have_sol, need: fees });
        }

        let question = format!(
            "This will distribute {} tokens of {mint} {} across {} wallets.\nEstimated SOL cost (fees + new token accounts): {:.6} SOL",
            config.total_amount,
            match config.mode {
                DistributionMode::Equal => "equally",
                DistributionMode::Random => "randomly",
            },
            targets.len(),
            lamports_to_sol(fees)
        );
        if !self.prompt.confirm(&question).await {
            return Err(EngineError::Declined);
        }

        let allocations: Vec<(Pubkey, u64)> = targets.iter().copied().zip(shares).collect();
        let mut jobs = Vec::new();
        for chunk in allocations.chunks(config.recipients_per_transaction) {
            let mut instructions: Vec<Instruction> = Vec::with_capacity(chunk.len() * 2);
            for (target, amount) in chunk {
                let target_ata = get_associated_token_address(target, &mint);
                instructions.push(create_associated_token_account_idempotent(
                    &parent_key,
                    target,
                    &mint,
                    &spl_token::id(),
                ));
                instructions.push(
                    spl_token::instruction::transfer(&spl_token::id(), &parent_ata, &target_ata, &parent_key, &[], *amount)
                        .map_err(|e| EngineError::Instruction(format!("token transfer to {target}: {e}")))?,
                );
            }
            let recipients = chunk.iter().map(|(t, _)| *t).collect();
            jobs.push(TransactionJob::new(recipients, instructions, parent.clone()));
        }
        info!(
            wallets = allocations.len(),
            transactions = jobs.len(),
            total = config.total_amount,
            "[Distribution] Distribution des tokens."
        );

        let report = self.queue.enqueue(jobs, self.progress.clone(), cancel).await;
        let amounts: HashMap<Pubkey, u64> = allocations.into_iter().collect();
        let result = OperationResult::from_report(OperationKind::Distribution, &report, &amounts);
        info!(summary = %result.summary(), "[Distribution] Terminé.");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_split_gives_the_remainder_to_the_first_wallets() {
        assert_eq!(equal_split(10, 3), vec![4, 3, 3]);
        assert_eq!(equal_split(9, 3), vec![3, 3, 3]);
        assert!(equal_split(5, 0).is_empty());
    }

    #[test]
    fn random_split_keeps_the_exact_total() {
        let mut rng = StdRng::seed_from_u64(42);
        for (total, count) in [(1_000_000u64, 7usize), (100, 100), (101, 100), (u64::MAX / 2, 50)] {
            let shares = random_split(total, count, &mut rng);
            assert_eq!(shares.len(), count);
            assert_eq!(shares.iter().map(|s| *s as u128).sum::<u128>(), total as u128);
            assert!(shares.iter().all(|s| *s >= 1));
        }
    }

    #[test]
    fn fee_estimate_counts_packed_transactions() {
        assert_eq!(distribution_fee_estimate(9, 4), 3 * TX_FEE_LAMPORTS + 9 * TOKEN_ACCOUNT_RENT_LAMPORTS);
    }
}
