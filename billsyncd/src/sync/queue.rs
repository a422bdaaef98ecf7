// An item that has already failed this many times is attempted at most
// once more, then excluded from list_due until an explicit purge.
pub const MAX_RETRY_COUNT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Insert,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Insert => "insert",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }
}

// Domain entity types the backend accepts; a stored value outside this
// set is rejected when the queue is read, never silently skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetTable {
    Invoices,
    InvoiceItems,
    Customers,
    Payments,
}

impl TargetTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetTable::Invoices => "invoices",
            TargetTable::InvoiceItems => "invoice_items",
            TargetTable::Customers => "customers",
            TargetTable::Payments => "payments",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: i64,
    pub target_table: TargetTable,
    pub target_row_id: String,
    pub action: SyncAction,
    pub payload: String,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: i64,
}

impl QueueItem {
    pub fn is_dormant(&self) -> bool {
        self.retry_count > MAX_RETRY_COUNT
    }
}
