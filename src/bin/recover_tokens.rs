// DANS : src/bin/recover_tokens.rs

use anyhow::{Context, Result};
use solana_sdk::pubkey::Pubkey;
use std::{env, sync::Arc};
use tribify::constants::TRIBIFY_TOKEN_MINT;
use tribify::orchestration::{ConsolePrompt, RecoveryOrchestrator};
use tribify::toolkit::{Toolkit, flag_value, has_flag};

#[tokio::main]
async fn main() -> Result<()> {
    println!("--- Récupération des tokens ---");
    let args: Vec<String> = env::args().skip(1).collect();
    let mint: Pubkey = match flag_value(&args, "--mint") {
        Some(raw) => raw.parse().with_context(|| format!("Mint invalide : {raw}"))?,
        None => TRIBIFY_TOKEN_MINT,
    };
    let close = has_flag(&args, "--close");

    let toolkit = Toolkit::load().await?;
    let wallets = toolkit.load_wallets()?;
    let orchestrator = RecoveryOrchestrator::new(toolkit.queue.clone(), toolkit.scanner.clone(), Arc::new(ConsolePrompt));
    let result = orchestrator
        .recover_tokens_from_wallets(toolkit.parent.clone(), &wallets, &mint, close, &toolkit.cancel_on_ctrl_c())
        .await?;

    println!("\n{}", result.summary());
    for failure in result.failed() {
        println!("  ❌ {} : {:?}", failure.wallet, failure.error);
    }
    Ok(())
}
