pub mod balance_scanner;

pub use balance_scanner::{BalanceScanner, FleetSummary, WalletBalanceSnapshot, WalletState};
