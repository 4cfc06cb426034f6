// DANS : src/bin/distribute_tokens.rs

use anyhow::{Context, Result, bail};
use solana_sdk::pubkey::Pubkey;
use std::{env, sync::Arc};
use tribify::config::{DistributionConfig, DistributionMode};
use tribify::constants::TRIBIFY_TOKEN_MINT;
use tribify::orchestration::{ConsolePrompt, DistributionOrchestrator};
use tribify::toolkit::{Toolkit, flag_value, has_flag, positional, print_progress};

#[tokio::main]
async fn main() -> Result<()> {
    println!("--- Distribution de tokens ---");
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(raw_total) = positional(&args, &["--mint"]).into_iter().next() else {
        bail!("Usage : distribute_tokens <montant total en unités de base> [--random] [--mint MINT]");
    };
    let total: u64 = raw_total.parse().with_context(|| format!("Montant invalide : {raw_total}"))?;
    let mint: Pubkey = match flag_value(&args, "--mint") {
        Some(raw) => raw.parse().with_context(|| format!("Mint invalide : {raw}"))?,
        None => TRIBIFY_TOKEN_MINT,
    };
    let mode = if has_flag(&args, "--random") { DistributionMode::Random } else { DistributionMode::Equal };

    let toolkit = Toolkit::load().await?;
    let wallets = toolkit.load_wallets()?;
    let targets: Vec<_> = wallets.iter().map(|w| w.public_key).collect();

    let config = DistributionConfig::new(mint, total, mode);
    let orchestrator = DistributionOrchestrator::new(toolkit.queue.clone(), Arc::new(ConsolePrompt))
        .with_progress(print_progress(targets.len().div_ceil(config.recipients_per_transaction)));
    let result = orchestrator
        .distribute_tokens(toolkit.parent.clone(), &targets, &config, &toolkit.cancel_on_ctrl_c())
        .await?;

    println!("\n{}", result.summary());
    for failure in result.failed() {
        println!("  ❌ {} : {:?}", failure.wallet, failure.error);
    }
    Ok(())
}
