// DANS : src/bin/recover_sol.rs

use anyhow::Result;
use std::{env, sync::Arc};
use tribify::config::RecoveryConfig;
use tribify::orchestration::{ConsolePrompt, RecoveryOrchestrator};
use tribify::toolkit::{Toolkit, has_flag};

#[tokio::main]
async fn main() -> Result<()> {
    println!("--- Récupération de l'excédent SOL ---");
    let args: Vec<String> = env::args().skip(1).collect();
    let config = RecoveryConfig {
        close_token_accounts: has_flag(&args, "--close-atas"),
        offer_fee_top_up: !has_flag(&args, "--no-top-up"),
        ..RecoveryConfig::default()
    };

    let toolkit = Toolkit::load().await?;
    let wallets = toolkit.load_wallets()?;

    let cancel = toolkit.cancel_on_ctrl_c();

    let orchestrator = RecoveryOrchestrator::new(toolkit.queue.clone(), toolkit.scanner.clone(), Arc::new(ConsolePrompt));
    let result = orchestrator
        .recover_excess_sol(toolkit.parent.clone(), &wallets, &config, &cancel)
        .await?;

    println!("\n{}", result.summary());
    for failure in result.failed() {
        println!("  ❌ {} : {:?}", failure.wallet, failure.error);
    }
    Ok(())
}
