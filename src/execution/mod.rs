pub mod queue;

pub use queue::{BatchReport, BatchTransactionQueue, ProgressCallback, TransactionJob, TransactionOutcome, TransactionStatus};
