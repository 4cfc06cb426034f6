// DANS : src/bin/fund_wallets.rs

use anyhow::{Context, Result, bail};
use std::{env, sync::Arc};
use tribify::config::{AmountSpec, FundingConfig};
use tribify::constants::sol_to_lamports;
use tribify::orchestration::{ConsolePrompt, FundingOrchestrator};
use tribify::toolkit::{Toolkit, print_progress};

fn parse_sol(raw: &str) -> Result<u64> {
    let sol: f64 = raw.parse().with_context(|| format!("Montant SOL invalide : {raw}"))?;
    Ok(sol_to_lamports(sol))
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("--- Financement des sous-portefeuilles ---");
    let args: Vec<String> = env::args().skip(1).collect();
    let amount = match args.as_slice() {
        [fixed] => AmountSpec::Fixed(parse_sol(fixed)?),
        [min, max] => AmountSpec::Range { min: parse_sol(min)?, max: parse_sol(max)? },
        _ => bail!("Usage : fund_wallets <SOL par portefeuille> | fund_wallets <SOL min> <SOL max>"),
    };

    let toolkit = Toolkit::load().await?;
    let wallets = toolkit.load_wallets()?;
    let targets: Vec<_> = wallets.iter().map(|w| w.public_key).collect();

    let config = FundingConfig::new(amount);
    let transactions = targets.len().div_ceil(config.recipients_per_transaction.max(1));
    let orchestrator = FundingOrchestrator::new(toolkit.queue.clone(), Arc::new(ConsolePrompt))
        .with_progress(print_progress(transactions));
    let result = orchestrator
        .fund_wallets(toolkit.parent.clone(), &targets, &config, &toolkit.cancel_on_ctrl_c())
        .await?;

    println!("\n{}", result.summary());
    for failure in result.failed() {
        println!("  ❌ {} : {:?}", failure.wallet, failure.error);
    }
    Ok(())
}
