// DANS : src/state/balance_scanner.rs

use solana_sdk::pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::constants::ATA_MINIMUM_LAMPORTS;
use crate::monitoring::metrics;
use crate::rpc::RpcEndpointPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WalletState {
    Empty,
    AtaOnly,
    Excess,
    /// La lecture du solde SOL a échoué.
    Unscanned,
}

impl WalletState {
    /// Seuil fixe : la réserve de loyer d'un ATA (0.002 SOL).
    /// Tout solde non nul qui ne dépasse pas ce seuil compte comme `AtaOnly`.
    pub fn classify(lamports: u64) -> Self {
        if lamports == 0 {
            WalletState::Empty
        } else if lamports <= ATA_MINIMUM_LAMPORTS {
            WalletState::AtaOnly
        } else {
            WalletState::Excess
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletBalanceSnapshot {
    pub address: Pubkey,
    pub lamports: u64,
    /// Solde par mint, 0 si l'ATA n'existe pas ou si sa lecture a échoué.
    pub spl_balances: BTreeMap<Pubkey, u64>,
    /// Mints dont l'ATA existe on-chain (candidats à la fermeture).
    pub open_token_accounts: BTreeSet<Pubkey>,
    pub state: WalletState,
}

impl WalletBalanceSnapshot {
    fn unscanned(address: Pubkey) -> Self {
        Self {
            address,
            lamports: 0,
            spl_balances: BTreeMap::new(),
            open_token_accounts: BTreeSet::new(),
            state: WalletState::Unscanned,
        }
    }

    pub fn token_balance(&self, mint: &Pubkey) -> u64 {
        self.spl_balances.get(mint).copied().unwrap_or(0)
    }

    /// Lamports au-dessus de la réserve, 0 hors de l'état `Excess`.
    pub fn excess_lamports(&self) -> u64 {
        match self.state {
            WalletState::Excess => self.lamports - ATA_MINIMUM_LAMPORTS,
            _ => 0,
        }
    }
}

/// Totaux de la flotte, pour l'affichage avant une opération.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetSummary {
    pub wallet_count: usize,
    pub total_lamports: u64,
    pub recoverable_lamports: u64,
    pub token_totals: BTreeMap<Pubkey, u64>,
    pub states: BTreeMap<WalletState, usize>,
}

impl FleetSummary {
    pub fn from_snapshots<'a>(snapshots: impl IntoIterator<Item = &'a WalletBalanceSnapshot>) -> Self {
        let mut summary = FleetSummary::default();
        for snapshot in snapshots {
            summary.wallet_count += 1;
            summary.total_lamports = summary.total_lamports.saturating_add(snapshot.lamports);
            summary.recoverable_lamports = summary.recoverable_lamports.saturating_add(snapshot.excess_lamports());
            for (mint, amount) in &snapshot.spl_balances {
                let total = summary.token_totals.entry(*mint).or_insert(0);
                *total = total.saturating_add(*amount);
            }
            *summary.states.entry(snapshot.state).or_insert(0) += 1;
        }
        summary
    }

    pub fn count(&self, state: WalletState) -> usize {
        self.states.get(&state).copied().unwrap_or(0)
    }
}

/// Scan séquentiel, avec une petite pause entre portefeuilles pour ménager les endpoints.
pub struct BalanceScanner {
    pool: Arc<RpcEndpointPool>,
    config: ScanConfig,
}

impl BalanceScanner {
    pub fn new(pool: Arc<RpcEndpointPool>, config: ScanConfig) -> Self {
        Self { pool, config }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Un échec de lecture sur un portefeuille n'interrompt jamais le scan des autres.
    /// Après annulation, les portefeuilles restants sont rendus `Unscanned`.
    pub async fn scan(
        &self,
        addresses: &[Pubkey],
        cancel: &CancellationToken,
    ) -> BTreeMap<Pubkey, WalletBalanceSnapshot> {
        info!(count = addresses.len(), "[Scanner] Scan des soldes de la flotte.");
        let mut snapshots = BTreeMap::new();
        for (i, address) in addresses.iter().enumerate() {
            if cancel.is_cancelled() {
                snapshots.insert(*address, WalletBalanceSnapshot::unscanned(*address));
                continue;
            }
            if i > 0 && !self.config.per_wallet_delay.is_zero() {
                tokio::time::sleep(self.config.per_wallet_delay).await;
            }
            snapshots.insert(*address, self.scan_wallet(address).await);
        }
        let summary = FleetSummary::from_snapshots(snapshots.values());
        info!(
            excess = summary.count(WalletState::Excess),
            ata_only = summary.count(WalletState::AtaOnly),
            empty = summary.count(WalletState::Empty),
            unscanned = summary.count(WalletState::Unscanned),
            "[Scanner] Scan terminé."
        );
        snapshots
    }

    pub async fn scan_wallet(&self, address: &Pubkey) -> WalletBalanceSnapshot {
        let address = *address;
        metrics::WALLETS_SCANNED.inc();

        let lamports = match self.pool.with_rotation(move |client| async move { client.get_balance(&address).await }).await {
            Ok(lamports) => lamports,
            Err(e) => {
                warn!(wallet = %address, error = %e, "[Scanner] Solde SOL illisible.");
                metrics::SCAN_LOOKUP_FAILURES.with_label_values(&["sol"]).inc();
                let mut snapshot = WalletBalanceSnapshot::unscanned(address);
                self.fill_tokens(&mut snapshot).await;
                return snapshot;
            }
        };

        let mut snapshot = WalletBalanceSnapshot {
            address,
            lamports,
            spl_balances: BTreeMap::new(),
            open_token_accounts: BTreeSet::new(),
            state: WalletState::classify(lamports),
        };
        self.fill_tokens(&mut snapshot).await;
        debug!(wallet = %address, lamports, state = ?snapshot.state, "[Scanner] Portefeuille scanné.");
        snapshot
    }

    async fn fill_tokens(&self, snapshot: &mut WalletBalanceSnapshot) {
        for mint in &self.config.mints {
            let ata = get_associated_token_address(&snapshot.address, mint);
            let amount = match self
                .pool
                .with_rotation(move |client| async move { client.get_token_account_amount(&ata).await })
                .await
            {
                Ok(Some(amount)) => {
                    snapshot.open_token_accounts.insert(*mint);
                    amount
                }
                Ok(None) => 0,
                Err(e) => {
                    warn!(wallet = %snapshot.address, mint = %mint, error = %e, "[Scanner] Solde token illisible.");
                    metrics::SCAN_LOOKUP_FAILURES.with_label_values(&["token"]).inc();
                    0
                }
            };
            snapshot.spl_balances.insert(*mint, amount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::LAMPORTS_PER_SOL;

    #[test]
    fn classification_follows_the_rent_threshold() {
        assert_eq!(WalletState::classify(0), WalletState::Empty);
        assert_eq!(WalletState::classify(1), WalletState::AtaOnly);
        assert_eq!(WalletState::classify(ATA_MINIMUM_LAMPORTS), WalletState::AtaOnly);
        assert_eq!(WalletState::classify(ATA_MINIMUM_LAMPORTS + 1), WalletState::Excess);
        assert_eq!(WalletState::classify(LAMPORTS_PER_SOL / 100), WalletState::Excess);
    }

    #[test]
    fn fleet_summary_totals() {
        let mint = Pubkey::new_unique();
        let mk = |lamports: u64, tokens: u64| WalletBalanceSnapshot {
            address: Pubkey::new_unique(),
            lamports,
            spl_balances: BTreeMap::from([(mint, tokens)]),
            open_token_accounts: BTreeSet::new(),
            state: WalletState::classify(lamports),
        };
        let snapshots = [mk(0, 0), mk(ATA_MINIMUM_LAMPORTS, 5), mk(ATA_MINIMUM_LAMPORTS + 300, 7)];
        let summary = FleetSummary::from_snapshots(&snapshots);

        assert_eq!(summary.wallet_count, 3);
        assert_eq!(summary.total_lamports, 2 * ATA_MINIMUM_LAMPORTS + 300);
        assert_eq!(summary.recoverable_lamports, 300);
        assert_eq!(summary.token_totals[&mint], 12);
        assert_eq!(summary.count(WalletState::Excess), 1);
        assert_eq!(summary.count(WalletState::Unscanned), 0);
    }
}
