// DANS : src/constants.rs

use solana_sdk::{pubkey, pubkey::Pubkey};

/// Nom de l'application, repris dans le message signé qui sert de graine.
pub const APP_NAME: &str = "Tribify";

pub const TRIBIFY_TOKEN_MINT: Pubkey = pubkey!("672PLqkiNdmByS6N1BQT5YPbEpkZte284huLUCxupump");
pub const USDC_MINT: Pubkey = pubkey!("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Nombre maximal de sous-portefeuilles dérivés d'un même parent.
pub const MAX_WALLETS: usize = 100;

/// Minimum exempté de loyer d'un compte ATA (0.002 SOL).
/// C'est le seuil qui sépare `AtaOnly` de `Excess`.
pub const ATA_MINIMUM_LAMPORTS: u64 = 2_000_000;

/// Solde minimal d'un compte système sans données. Un virement qui crée un
/// compte en dessous de ce seuil est rejeté par le cluster.
pub const SYSTEM_ACCOUNT_RENT_LAMPORTS: u64 = 890_880;

/// Loyer exact d'un compte token SPL (165 octets), payé à la création d'un ATA.
pub const TOKEN_ACCOUNT_RENT_LAMPORTS: u64 = 2_039_280;

/// Frais de base par signature (0.000005 SOL).
pub const TX_FEE_LAMPORTS: u64 = 5_000;

/// Nombre de transactions en vol simultanément dans la file.
pub const QUEUE_BATCH_SIZE: usize = 8;

/// Nombre de virements packés dans une seule transaction de financement.
pub const RECIPIENTS_PER_TRANSACTION: usize = 4;

// --- Clés du stockage persistant ---
pub const PARENT_WALLET_KEY: &str = "tribify_parent_wallet";
pub const KEYPAIRS_KEY_PREFIX: &str = "tribify_keypairs_";
pub const SEED_KEY_PREFIX: &str = "tribify_seed_";

/// Convertit des lamports en SOL pour l'affichage uniquement.
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Convertit un montant SOL saisi par l'utilisateur en lamports, au lamport le plus proche.
pub fn sol_to_lamports(sol: f64) -> u64 {
    if !sol.is_finite() || sol <= 0.0 {
        return 0;
    }
    (sol * LAMPORTS_PER_SOL as f64).round() as u64
}
