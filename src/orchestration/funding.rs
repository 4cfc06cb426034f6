// DANS : src/orchestration/funding.rs

use rand::{Rng, SeedableRng, rngs::StdRng};
use solana_sdk::{pubkey::Pubkey, system_instruction};
use std::{collections::HashMap, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{AmountSpec, FundingConfig};
use crate::constants::{ATA_MINIMUM_LAMPORTS, MAX_WALLETS, TX_FEE_LAMPORTS, lamports_to_sol};
use crate::error::EngineError;
use crate::execution::queue::{BatchTransactionQueue, ProgressCallback, TransactionJob};
use crate::orchestration::prompt::OperatorPrompt;
use crate::orchestration::result::{OperationKind, OperationResult};
use crate::wallet::signer::{WalletSigner, connected_key};

/// Coût maximal d'un financement, affiché avant confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostBreakdown {
    pub wallet_count: usize,
    pub transaction_count: usize,
    pub amount: AmountSpec,
    /// Réserve de loyer ATA, une par portefeuille.
    pub ata_rent_reserve: u64,
    pub fee_estimate: u64,
    pub funding_min: u64,
    pub funding_max: u64,
}

impl CostBreakdown {
    pub fn new(wallet_count: usize, amount: AmountSpec, recipients_per_transaction: usize) -> Self {
        let n = wallet_count as u64;
        let transaction_count = wallet_count.div_ceil(recipients_per_transaction.max(1));
        Self {
            wallet_count,
            transaction_count,
            amount,
            ata_rent_reserve: n.saturating_mul(ATA_MINIMUM_LAMPORTS),
            fee_estimate: (transaction_count as u64).saturating_mul(TX_FEE_LAMPORTS),
            funding_min: n.saturating_mul(amount.lower_bound()),
            funding_max: n.saturating_mul(amount.upper_bound()),
        }
    }

    pub fn maximum_total(&self) -> u64 {
        self.ata_rent_reserve
            .saturating_add(self.fee_estimate)
            .saturating_add(self.funding_max)
    }

    pub fn describe(&self) -> String {
        let per_wallet = match self.amount {
            AmountSpec::Fixed(amount) => format!("{:.4}", lamports_to_sol(amount)),
            AmountSpec::Range { min, max } => format!(
                "random amounts between {:.4} and {:.4}",
                lamports_to_sol(min),
                lamports_to_sol(max)
            ),
        };
        let funding = if self.funding_min == self.funding_max {
            format!("{:.4}", lamports_to_sol(self.funding_max))
        } else {
            format!("{:.4} - {:.4}", lamports_to_sol(self.funding_min), lamports_to_sol(self.funding_max))
        };
        format!(
            "This will send {per_wallet} SOL to {} subwallets.\n\
             ATA Creation: {:.4} SOL\n\
             Transaction Fees: {:.6} SOL\n\
             Funding Amount: {funding} SOL\n\
             Maximum SOL needed: {:.4} SOL",
            self.wallet_count,
            lamports_to_sol(self.ata_rent_reserve),
            lamports_to_sol(self.fee_estimate),
            lamports_to_sol(self.maximum_total()),
        )
    }
}

/// Montants tirés pour chaque portefeuille, avant tout envoi.
#[derive(Debug, Clone)]
pub struct FundingPlan {
    pub allocations: Vec<(Pubkey, u64)>,
    pub cost: CostBreakdown,
}

/// Tire un montant par portefeuille : fixe, ou uniforme dans `[min, max)`.
/// Aucune garantie sur la somme, seule la borne haute est annoncée.
pub fn plan_funding<R: Rng + ?Sized>(
    targets: &[Pubkey],
    config: &FundingConfig,
    rng: &mut R,
) -> Result<FundingPlan, EngineError> {
    config.validate()?;
    if targets.len() > MAX_WALLETS {
        return Err(EngineError::InvalidConfig(format!(
            "cannot fund {} wallets, the limit is {MAX_WALLETS}",
            targets.len()
        )));
    }
    let allocations = targets
        .iter()
        .map(|target| {
            let amount = match config.amount {
                AmountSpec::Fixed(amount) => amount,
                AmountSpec::Range { min, max } => rng.gen_range(min..max),
            };
            (*target, amount)
        })
        .collect();
    Ok(FundingPlan {
        allocations,
        cost: CostBreakdown::new(targets.len(), config.amount, config.recipients_per_transaction),
    })
}

pub struct FundingOrchestrator {
    queue: Arc<BatchTransactionQueue>,
    prompt: Arc<dyn OperatorPrompt>,
    progress: Option<ProgressCallback>,
}

impl FundingOrchestrator {
    pub fn new(queue: Arc<BatchTransactionQueue>, prompt: Arc<dyn OperatorPrompt>) -> Self {
        Self { queue, prompt, progress: None }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub async fn fund_wallets(
        &self,
        parent: Arc<dyn WalletSigner>,
        targets: &[Pubkey],
        config: &FundingConfig,
        cancel: &CancellationToken,
    ) -> Result<OperationResult, EngineError> {
        let mut rng = StdRng::from_entropy();
        self.fund_wallets_with_rng(parent, targets, config, &mut rng, cancel).await
    }

    /// Variante à générateur injecté, pour des tirages reproductibles.
    pub async fn fund_wallets_with_rng<R: Rng + Send>(
        &self,
        parent: Arc<dyn WalletSigner>,
        targets: &[Pubkey],
        config: &FundingConfig,
        rng: &mut R,
        cancel: &CancellationToken,
    ) -> Result<OperationResult, EngineError> {
        let parent_key = connected_key(parent.as_ref())?;
        let plan = plan_funding(targets, config, rng)?;
        if plan.allocations.is_empty() {
            return Ok(OperationResult::new(OperationKind::Funding, Vec::new(), Vec::new()));
        }

        // Garde préalable : le solde peut encore bouger avant l'exécution.
        let have = self
            .queue
            .pool()
            .with_rotation(move |client| async move { client.get_balance(&parent_key).await })
            .await?;
        let need = plan.cost.maximum_total();
        if need > have {
            warn!(have, need, "[Funding] Solde parent insuffisant.");
            return Err(EngineError::InsufficientFunds { have, need });
        }
        if !self.prompt.confirm(&plan.cost.describe()).await {
            return Err(EngineError::Declined);
        }

        let jobs: Vec<TransactionJob> = plan
            .allocations
            .chunks(config.recipients_per_transaction)
            .map(|chunk| {
                let instructions = chunk
                    .iter()
                    .map(|(target, lamports)| system_instruction::transfer(&parent_key, target, *lamports))
                    .collect();
                let recipients = chunk.iter().map(|(target, _)| *target).collect();
                TransactionJob::new(recipients, instructions, parent.clone())
            })
            .collect();
        info!(
            wallets = plan.allocations.len(),
            transactions = jobs.len(),
            max_total_sol = lamports_to_sol(need),
            "[Funding] Financement des sous-portefeuilles."
        );

        let report = self.queue.enqueue(jobs, self.progress.clone(), cancel).await;
        let amounts: HashMap<Pubkey, u64> = plan.allocations.iter().copied().collect();
        let result = OperationResult::from_report(OperationKind::Funding, &report, &amounts);
        info!(summary = %result.summary(), "[Funding] Terminé.");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::LAMPORTS_PER_SOL;

    #[test]
    fn cost_matches_the_dashboard_example() {
        // 10 portefeuilles à 0.01 SOL : 0.02 de loyer, 3 transactions, 0.1 de financement.
        let cost = CostBreakdown::new(10, AmountSpec::Fixed(LAMPORTS_PER_SOL / 100), 4);
        assert_eq!(cost.transaction_count, 3);
        assert_eq!(cost.ata_rent_reserve, 20_000_000);
        assert_eq!(cost.fee_estimate, 15_000);
        assert_eq!(cost.maximum_total(), 120_015_000);
        assert!(cost.describe().contains("Maximum SOL needed: 0.1200 SOL"));
    }

    #[test]
    fn range_amounts_stay_in_bounds() {
        let targets: Vec<Pubkey> = (0..50).map(|_| Pubkey::new_unique()).collect();
        let (min, max) = (LAMPORTS_PER_SOL / 100, LAMPORTS_PER_SOL / 20);
        let config = FundingConfig::new(AmountSpec::Range { min, max });
        let mut rng = StdRng::seed_from_u64(7);

        let plan = plan_funding(&targets, &config, &mut rng).unwrap();
        assert_eq!(plan.allocations.len(), 50);
        assert!(plan.allocations.iter().all(|(_, a)| (min..max).contains(a)));
        assert_eq!(plan.cost.funding_max, 50 * max);
        assert!(plan.cost.describe().contains("random amounts between 0.0100 and 0.0500"));
    }

    #[test]
    fn too_many_wallets_is_rejected() {
        let targets: Vec<Pubkey> = (0..=MAX_WALLETS).map(|_| Pubkey::new_unique()).collect();
        let config = FundingConfig::new(AmountSpec::Fixed(LAMPORTS_PER_SOL / 100));
        assert!(plan_funding(&targets, &config, &mut StdRng::seed_from_u64(1)).is_err());
    }
}
