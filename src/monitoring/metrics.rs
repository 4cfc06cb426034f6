// DANS : src/monitoring/metrics.rs

use lazy_static::lazy_static;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, TextEncoder, register_int_counter,
    register_int_counter_vec,
};

lazy_static! {
    // --- File de transactions ---
    pub static ref TRANSACTION_OUTCOMES: IntCounterVec = register_int_counter_vec!(
        "tribify_transaction_outcomes_total",
        "Résultats terminaux des transactions traitées par la file",
        &["outcome"] // Labels: "success", "failed", "cancelled"
    ).unwrap();
    pub static ref RATE_LIMIT_HITS: IntCounter = register_int_counter!(
        "tribify_rate_limit_hits_total", "Nombre de réponses 429 / limitation reçues des endpoints"
    ).unwrap();
    pub static ref BATCHES_PROCESSED: IntCounter = register_int_counter!(
        "tribify_batches_processed_total", "Nombre de lots envoyés par la file"
    ).unwrap();

    // --- Pool d'endpoints ---
    pub static ref ENDPOINT_ROTATIONS: IntCounter = register_int_counter!(
        "tribify_endpoint_rotations_total", "Nombre de rotations du curseur du pool RPC"
    ).unwrap();

    // --- Scanner ---
    pub static ref WALLETS_SCANNED: IntCounter = register_int_counter!(
        "tribify_wallets_scanned_total", "Nombre de portefeuilles scannés"
    ).unwrap();
    pub static ref SCAN_LOOKUP_FAILURES: IntCounterVec = register_int_counter_vec!(
        "tribify_scan_lookup_failures_total",
        "Échecs de lecture de solde pendant un scan, remplacés par zéro",
        &["kind"] // Labels: "sol", "token"
    ).unwrap();
}

/// Exposition texte des métriques, affichée par les outils en fin d'exécution.
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
