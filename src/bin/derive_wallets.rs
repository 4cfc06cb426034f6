// DANS : src/bin/derive_wallets.rs

use anyhow::{Context, Result};
use chrono::Utc;
use std::env;
use tribify::EngineError;
use tribify::constants::MAX_WALLETS;
use tribify::orchestration::ConsolePrompt;
use tribify::toolkit::{Toolkit, has_flag, positional};
use tribify::wallet::derivation::derive_from_signer;

#[tokio::main]
async fn main() -> Result<()> {
    println!("--- Génération des sous-portefeuilles ---");
    let args: Vec<String> = env::args().skip(1).collect();
    let force = has_flag(&args, "--force");
    let count: usize = match positional(&args, &[]).first() {
        Some(raw) => raw.parse().with_context(|| format!("Nombre de portefeuilles invalide : {raw}"))?,
        None => MAX_WALLETS,
    };

    let toolkit = Toolkit::load().await?;
    match toolkit.keystore.confirm_replace(&toolkit.parent_key(), &ConsolePrompt, force).await {
        Ok(()) => {}
        Err(EngineError::Declined) => {
            println!("⛔ Génération annulée : le jeu existant est conservé (relancer avec --force pour le remplacer).");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }
    let (seed, keypairs) = derive_from_signer(toolkit.parent.as_ref(), count, Utc::now().timestamp_millis()).await?;
    if keypairs.len() < count.min(MAX_WALLETS) {
        println!("⚠️  {} index n'ont pas pu être dérivés (voir les logs).", count.min(MAX_WALLETS) - keypairs.len());
    }

    toolkit.keystore.save(&seed.parent, &keypairs)?;
    toolkit.keystore.save_seed(&seed.parent, &seed.signature)?;

    println!("Parent : {}", seed.parent);
    for kp in &keypairs {
        println!("  #{:<3} {}  {}", kp.index, kp.public_key, kp.derivation_path);
    }
    println!("\n✅ {} sous-portefeuilles enregistrés dans {:?}.", keypairs.len(), toolkit.config.keystore_dir);
    Ok(())
}
