// DANS : src/toolkit.rs

//! Assemblage commun aux outils de `src/bin` : config, logs, pool, file,
//! scanner et coffre, avec la keypair locale comme signataire parent.

use anyhow::{Context, Result};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::execution::queue::{BatchTransactionQueue, ProgressCallback};
use crate::monitoring::logging::setup_logging;
use crate::rpc::RpcEndpointPool;
use crate::state::balance_scanner::BalanceScanner;
use crate::wallet::{
    derivation::DerivedKeypair, keystore::EncryptedKeyStore, signer::KeypairSigner, storage::FileStore,
};

pub struct Toolkit {
    pub config: Config,
    pub parent: Arc<KeypairSigner>,
    pub pool: Arc<RpcEndpointPool>,
    pub queue: Arc<BatchTransactionQueue>,
    pub scanner: Arc<BalanceScanner>,
    pub keystore: EncryptedKeyStore,
}

impl Toolkit {
    pub async fn load() -> Result<Self> {
        setup_logging();
        let config = Config::load().context("Chargement de la configuration")?;
        let parent = Arc::new(KeypairSigner::new(config.parent_keypair()?));

        let urls = config.rpc_urls();
        let pool = Arc::new(RpcEndpointPool::from_urls(&urls, config.rpc_timeout())?);
        let queue = Arc::new(BatchTransactionQueue::new(pool.clone(), config.queue_config())?);
        let scanner = Arc::new(BalanceScanner::new(pool.clone(), config.scan_config()));

        let store = Arc::new(FileStore::open(&config.keystore_dir)?);
        let keystore = EncryptedKeyStore::new(store).bind_to_signer(parent.as_ref()).await?;

        info!(parent = %parent.pubkey(), endpoints = urls.len(), "[Toolkit] Prêt.");
        Ok(Self { config, parent, pool, queue, scanner, keystore })
    }

    /// Ctrl+C : les lots déjà partis vont au bout, le reste est annulé.
    pub fn cancel_on_ctrl_c(&self) -> CancellationToken {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("[Toolkit] Ctrl+C reçu, annulation des lots restants.");
                    on_signal.cancel();
                }
                Err(e) => warn!(error = %e, "[Toolkit] Écoute de Ctrl+C impossible."),
            }
        });
        cancel
    }

    pub fn parent_key(&self) -> Pubkey {
        self.parent.pubkey()
    }

    pub fn load_wallets(&self) -> Result<Vec<DerivedKeypair>> {
        self.keystore
            .load(&self.parent_key())
            .with_context(|| format!("Aucun sous-portefeuille lisible pour {}, lancez derive_wallets", self.parent_key()))
    }
}

/// Compteur de progression affiché sur la sortie standard.
pub fn print_progress(total: usize) -> ProgressCallback {
    Arc::new(move |done| println!("  {done}/{total} transactions terminées"))
}

/// Valeur qui suit un drapeau (`--mint X`) dans les arguments.
pub fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1)).map(String::as_str)
}

pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

/// Arguments positionnels, sans les drapeaux ni leurs valeurs.
pub fn positional(args: &[String], flags_with_value: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    let mut skip = false;
    for arg in args {
        if skip {
            skip = false;
            continue;
        }
        if flags_with_value.contains(&arg.as_str()) {
            skip = true;
            continue;
        }
        if !arg.starts_with("--") {
            out.push(arg.clone());
        }
    }
    out
}
