//! Database access for ledger rows and upload jobs

pub mod jobs;
pub mod ledger_rows;

pub use jobs::{JobRecord, JobStatus, SqliteJobStatus};
pub use ledger_rows::{
    count_active_rows, deactivate_active_rows, insert_row, insert_sql, BudgetBreakdown,
    CommitmentRow, ExpenseNature, LedgerRow, PaymentOrderRow,
};
