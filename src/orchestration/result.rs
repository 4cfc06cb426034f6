// DANS : src/orchestration/result.rs

use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::collections::HashMap;

use crate::constants::lamports_to_sol;
use crate::error::EngineError;
use crate::execution::queue::BatchReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Funding,
    FeeTopUp,
    SolRecovery,
    TokenRecovery,
    Distribution,
}

/// Résultat d'une opération pour un portefeuille. `amount` est en lamports,
/// ou en unités de base du token pour les opérations SPL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletOutcome {
    pub wallet: Pubkey,
    pub amount: u64,
    pub signature: Option<Signature>,
    pub error: Option<EngineError>,
}

impl WalletOutcome {
    pub fn success(wallet: Pubkey, amount: u64, signature: Signature) -> Self {
        Self { wallet, amount, signature: Some(signature), error: None }
    }

    pub fn failure(wallet: Pubkey, amount: u64, error: EngineError) -> Self {
        Self { wallet, amount, signature: None, error: Some(error) }
    }
}

/// Valeur rendue par chaque orchestrateur. Construite une fois, jamais modifiée.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    kind: OperationKind,
    successful: Vec<WalletOutcome>,
    failed: Vec<WalletOutcome>,
    closed_token_accounts: usize,
}

impl OperationResult {
    pub fn new(kind: OperationKind, successful: Vec<WalletOutcome>, failed: Vec<WalletOutcome>) -> Self {
        Self { kind, successful, failed, closed_token_accounts: 0 }
    }

    /// Traduit les transactions de la file en résultats par portefeuille :
    /// une transaction groupée qui échoue fait échouer chacun de ses destinataires.
    pub fn from_report(kind: OperationKind, report: &BatchReport, amounts: &HashMap<Pubkey, u64>) -> Self {
        let amount_of = |wallet: &Pubkey| amounts.get(wallet).copied().unwrap_or(0);
        let successful = report
            .successful
            .iter()
            .flat_map(|outcome| {
                let signature = outcome.signature().unwrap_or_default();
                outcome.targets.iter().map(move |w| WalletOutcome::success(*w, amount_of(w), signature))
            })
            .collect();
        let failed = report
            .failed
            .iter()
            .flat_map(|outcome| {
                let error = outcome.error().cloned().unwrap_or(EngineError::Cancelled);
                outcome
                    .targets
                    .iter()
                    .map(move |w| WalletOutcome::failure(*w, amount_of(w), error.clone()))
            })
            .collect();
        Self::new(kind, successful, failed)
    }

    pub fn with_closed_token_accounts(mut self, closed: usize) -> Self {
        self.closed_token_accounts = closed;
        self
    }

    /// Fusionne deux résultats du même type (ex. lots successifs d'une récupération).
    pub fn merge(mut self, other: OperationResult) -> Self {
        self.successful.extend(other.successful);
        self.failed.extend(other.failed);
        self.closed_token_accounts += other.closed_token_accounts;
        self
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn successful(&self) -> &[WalletOutcome] {
        &self.successful
    }

    pub fn failed(&self) -> &[WalletOutcome] {
        &self.failed
    }

    pub fn closed_token_accounts(&self) -> usize {
        self.closed_token_accounts
    }

    /// Somme déplacée par les transactions réussies.
    pub fn total_amount(&self) -> u64 {
        self.successful.iter().map(|o| o.amount).fold(0u64, u64::saturating_add)
    }

    /// Adresses en échec, conservées pour une nouvelle tentative.
    pub fn failed_wallets(&self) -> Vec<Pubkey> {
        self.failed.iter().map(|o| o.wallet).collect()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn summary(&self) -> String {
        let ok = self.successful.len();
        let ko = self.failed.len();
        let total = self.total_amount();
        match self.kind {
            OperationKind::Funding => {
                format!("Funded {ok} wallets with {} SOL, {ko} failed", format_sol(total))
            }
            OperationKind::FeeTopUp => {
                format!("Topped up {ok} wallets with {} SOL, {ko} failed", format_sol(total))
            }
            OperationKind::SolRecovery => {
                let mut line = format!("Recovered {} SOL from {ok} wallets, {ko} failed", format_sol(total));
                if self.closed_token_accounts > 0 {
                    line.push_str(&format!(", {} token accounts closed", self.closed_token_accounts));
                }
                line
            }
            OperationKind::TokenRecovery => format!("Recovered {total} tokens from {ok} wallets, {ko} failed"),
            OperationKind::Distribution => format!("Distributed {total} tokens to {ok} wallets, {ko} failed"),
        }
    }
}

fn format_sol(lamports: u64) -> String {
    let formatted = format!("{:.9}", lamports_to_sol(lamports));
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}
