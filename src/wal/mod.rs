pub mod entry;
pub mod log_file;
pub mod recovery;

pub use entry::{LogBody, LogEntry, PageAction};
pub use log_file::{LogReader, LogScan, LogWriter, create_log};
pub use recovery::{RecoveryOutcome, RecoveryStats, recover};
