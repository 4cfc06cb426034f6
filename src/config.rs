use anyhow::{Context, Result};
use serde::Deserialize;
use solana_sdk::signature::{Keypair, read_keypair_file};
use std::{path::PathBuf, time::Duration};

use crate::constants::{QUEUE_BATCH_SIZE, RECIPIENTS_PER_TRANSACTION, SYSTEM_ACCOUNT_RENT_LAMPORTS};
use crate::error::EngineError;

const PUBLIC_MAINNET_RPC: &str = "https://api.mainnet-beta.solana.com";

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// Clé Helius : si présente, l'endpoint payant passe en tête de liste.
    pub helius_key: Option<String>,
    /// Endpoints publics de secours, séparés par des virgules.
    pub rpc_fallback_urls: Option<String>,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    #[serde(default = "default_keystore_dir")]
    pub keystore_dir: PathBuf,
    /// Keypair locale qui joue le rôle du portefeuille parent pour les outils.
    pub parent_keypair_path: Option<PathBuf>,

    #[serde(default = "default_queue_batch_size")]
    pub queue_batch_size: usize,
    #[serde(default = "default_queue_batch_delay_ms")]
    pub queue_batch_delay_ms: u64,
    #[serde(default = "default_queue_max_rate_limit_retries")]
    pub queue_max_rate_limit_retries: u32,
    #[serde(default = "default_scan_delay_ms")]
    pub scan_delay_ms: u64,
}

fn default_rpc_timeout_secs() -> u64 { 30 }
fn default_keystore_dir() -> PathBuf { PathBuf::from(".tribify") }
fn default_queue_batch_size() -> usize { QUEUE_BATCH_SIZE }
fn default_queue_batch_delay_ms() -> u64 { 500 }
fn default_queue_max_rate_limit_retries() -> u32 { 10 }
fn default_scan_delay_ms() -> u64 { 100 }

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()?;
        Ok(config)
    }

    /// Liste ordonnée des endpoints : l'endpoint payant d'abord, les publics ensuite.
    pub fn rpc_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        if let Some(key) = self.helius_key.as_deref().filter(|k| !k.trim().is_empty()) {
            urls.push(format!("https://rpc.helius.xyz/?api-key={}", key.trim()));
        }
        match self.rpc_fallback_urls.as_deref() {
            Some(list) => urls.extend(
                list.split(',')
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .map(String::from),
            ),
            None => urls.push(PUBLIC_MAINNET_RPC.to_string()),
        }
        if urls.is_empty() {
            urls.push(PUBLIC_MAINNET_RPC.to_string());
        }
        urls
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn parent_keypair(&self) -> Result<Keypair> {
        let path = self
            .parent_keypair_path
            .as_ref()
            .context("PARENT_KEYPAIR_PATH n'est pas défini")?;
        read_keypair_file(path)
            .map_err(|e| anyhow::anyhow!("Lecture de la keypair {:?} impossible : {}", path, e))
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            batch_size: self.queue_batch_size,
            batch_delay: Duration::from_millis(self.queue_batch_delay_ms),
            max_rate_limit_retries: self.queue_max_rate_limit_retries,
        }
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            per_wallet_delay: Duration::from_millis(self.scan_delay_ms),
            ..ScanConfig::default()
        }
    }
}

/// Réglages de la file de transactions.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Transactions envoyées en parallèle par lot. Défaut : 8.
    pub batch_size: usize,
    /// Pause appliquée après chaque lot, quel que soit son résultat. Défaut : 500 ms.
    pub batch_delay: Duration,
    /// Nombre de remises en file pour cause de 429 avant échec terminal. Défaut : 10.
    pub max_rate_limit_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: QUEUE_BATCH_SIZE,
            batch_delay: Duration::from_millis(default_queue_batch_delay_ms()),
            max_rate_limit_retries: default_queue_max_rate_limit_retries(),
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.batch_size == 0 {
            return Err(EngineError::InvalidConfig("batch_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Réglages du scanner de soldes.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Pause entre deux portefeuilles lors d'un scan complet. Défaut : 100 ms.
    pub per_wallet_delay: Duration,
    /// Mints dont on interroge l'ATA. Défaut : TRIBIFY et USDC.
    pub mints: Vec<solana_sdk::pubkey::Pubkey>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            per_wallet_delay: Duration::from_millis(default_scan_delay_ms()),
            mints: vec![crate::constants::TRIBIFY_TOKEN_MINT, crate::constants::USDC_MINT],
        }
    }
}

/// Montant de financement : fixe, ou tiré uniformément dans `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountSpec {
    Fixed(u64),
    Range { min: u64, max: u64 },
}

impl AmountSpec {
    /// Borne haute par portefeuille, utilisée pour le coût maximal affiché.
    pub fn upper_bound(&self) -> u64 {
        match *self {
            AmountSpec::Fixed(amount) => amount,
            AmountSpec::Range { max, .. } => max,
        }
    }

    pub fn lower_bound(&self) -> u64 {
        match *self {
            AmountSpec::Fixed(amount) => amount,
            AmountSpec::Range { min, .. } => min,
        }
    }

    /// Chaque montant doit pouvoir créer un compte neuf : au moins le loyer
    /// d'un compte système.
    pub fn validate(&self) -> Result<(), EngineError> {
        if let AmountSpec::Range { min, max } = *self {
            if min >= max {
                return Err(EngineError::InvalidConfig(format!("invalid funding range [{min}, {max})")));
            }
        }
        let lowest = self.lower_bound();
        if lowest < SYSTEM_ACCOUNT_RENT_LAMPORTS {
            return Err(EngineError::InvalidConfig(format!(
                "funding amount {lowest} lamports is below the rent-exempt minimum of {SYSTEM_ACCOUNT_RENT_LAMPORTS}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FundingConfig {
    pub amount: AmountSpec,
    /// Virements packés par transaction. Indépendant de la taille de lot de la file. Défaut : 4.
    pub recipients_per_transaction: usize,
}

impl FundingConfig {
    pub fn new(amount: AmountSpec) -> Self {
        Self { amount, recipients_per_transaction: RECIPIENTS_PER_TRANSACTION }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.amount.validate()?;
        if self.recipients_per_transaction == 0 {
            return Err(EngineError::InvalidConfig("recipients_per_transaction must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Ferme aussi les ATA vides ; leur loyer revient au parent. Défaut : false.
    pub close_token_accounts: bool,
    /// Propose un complément de frais aux portefeuilles qui ne peuvent pas payer leur propre transaction. Défaut : true.
    pub offer_fee_top_up: bool,
    /// Mints scannés pour la fermeture des ATA. Défaut : TRIBIFY et USDC.
    pub token_mints: Vec<solana_sdk::pubkey::Pubkey>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            close_token_accounts: false,
            offer_fee_top_up: true,
            token_mints: ScanConfig::default().mints,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionMode {
    /// Parts égales, le reste de la division va aux premiers portefeuilles.
    Equal,
    /// Parts aléatoires dont la somme vaut exactement le total.
    Random,
}

#[derive(Debug, Clone)]
pub struct DistributionConfig {
    pub mint: solana_sdk::pubkey::Pubkey,
    /// Montant total en unités de base du token.
    pub total_amount: u64,
    pub mode: DistributionMode,
    pub recipients_per_transaction: usize,
}

impl DistributionConfig {
    pub fn new(mint: solana_sdk::pubkey::Pubkey, total_amount: u64, mode: DistributionMode) -> Self {
        Self { mint, total_amount, mode, recipients_per_transaction: RECIPIENTS_PER_TRANSACTION }
    }

    pub fn validate(&self, wallet_count: usize) -> Result<(), EngineError> {
        if self.total_amount == 0 {
            return Err(EngineError::InvalidConfig("total_amount must be positive".into()));
        }
        if self.recipients_per_transaction == 0 {
            return Err(EngineError::InvalidConfig("recipients_per_transaction must be at least 1".into()));
        }
        if (self.total_amount as u128) < wallet_count as u128 {
            return Err(EngineError::InvalidConfig(format!(
                "cannot split {} units across {} wallets",
                self.total_amount, wallet_count
            )));
        }
        Ok(())
    }
}
