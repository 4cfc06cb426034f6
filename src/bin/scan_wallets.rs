// DANS : src/bin/scan_wallets.rs

use anyhow::Result;
use tribify::constants::{TRIBIFY_TOKEN_MINT, USDC_MINT, lamports_to_sol};
use tribify::monitoring::metrics::render_metrics;
use tribify::state::balance_scanner::{FleetSummary, WalletState};
use tribify::toolkit::Toolkit;

#[tokio::main]
async fn main() -> Result<()> {
    println!("--- Scan des soldes de la flotte ---");
    let toolkit = Toolkit::load().await?;
    let wallets = toolkit.load_wallets()?;
    let addresses: Vec<_> = wallets.iter().map(|w| w.public_key).collect();

    let snapshots = toolkit.scanner.scan(&addresses, &toolkit.cancel_on_ctrl_c()).await;
    for wallet in &wallets {
        if let Some(snapshot) = snapshots.get(&wallet.public_key) {
            println!(
                "  #{:<3} {}  {:>12.6} SOL  {:>14} TRIBIFY  {:>12} USDC  {:?}",
                wallet.index,
                wallet.public_key,
                lamports_to_sol(snapshot.lamports),
                snapshot.token_balance(&TRIBIFY_TOKEN_MINT),
                snapshot.token_balance(&USDC_MINT),
                snapshot.state
            );
        }
    }

    let summary = FleetSummary::from_snapshots(snapshots.values());
    println!("\nTotal SOL : {:.6} (récupérable : {:.6})", lamports_to_sol(summary.total_lamports), lamports_to_sol(summary.recoverable_lamports));
    println!(
        "États : {} excess, {} ataOnly, {} empty, {} unscanned",
        summary.count(WalletState::Excess),
        summary.count(WalletState::AtaOnly),
        summary.count(WalletState::Empty),
        summary.count(WalletState::Unscanned)
    );
    println!("\n{}", render_metrics());
    Ok(())
}
