//! Correspondence repository.
//!
//! The [`RepairStore`] trait is the only way the reconciliation pipeline
//! touches persistent state. It is injected as `Arc<dyn RepairStore>`, so
//! the orchestrator can run against SQLite in production and
//! [`InMemoryStore`](memory::InMemoryStore) in tests.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`find_repair_by_key`](RepairStore::find_repair_by_key) | Case-insensitive dedup lookup |
//! | [`find_repair_by_id`](RepairStore::find_repair_by_id) | Lookup by internal id |
//! | [`find_customer`](RepairStore::find_customer) | Search-before-create for customers |
//! | [`create_customer`](RepairStore::create_customer) | Insert a customer |
//! | [`create_repair`](RepairStore::create_repair) | Insert a repair unless its dedup key exists |
//! | [`create_log`](RepairStore::create_log) | Insert a companion log entry |
//! | [`update_repair_vendor`](RepairStore::update_repair_vendor) | Change only `vendor` |
//! | [`append_message`](RepairStore::append_message) | Add to a repair's thread |
//! | [`add_repair_attachment`](RepairStore::add_repair_attachment) | Store a file against a repair |
//! | [`find_log_for_repair`](RepairStore::find_log_for_repair) | Log lookup for attachment fan-out |
//! | [`add_log_attachment`](RepairStore::add_log_attachment) | Store a file against a log entry |
//! | [`list_attachments`](RepairStore::list_attachments) | Files stored against a repair or log |

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    eq_ignore_case, Attachment, CustomerRecord, DedupKey, LogRecord, NewCustomer, NewLog,
    NewRepair, RepairMessage, RepairRecord,
};

/// Result of [`RepairStore::create_repair`].
///
/// A repair whose dedup key already exists is never written twice; the
/// stored record comes back as `Duplicate` instead of an error.
#[derive(Debug, Clone)]
pub enum CreateRepairOutcome {
    Created(RepairRecord),
    Duplicate(RepairRecord),
}

impl CreateRepairOutcome {
    pub fn record(&self) -> &RepairRecord {
        match self {
            Self::Created(r) | Self::Duplicate(r) => r,
        }
    }
}

/// What an attachment row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentOwner {
    Repair,
    Log,
}

impl AttachmentOwner {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Repair => "repair",
            Self::Log => "log",
        }
    }
}

#[async_trait]
pub trait RepairStore: Send + Sync {
    async fn find_repair_by_key(&self, key: &DedupKey) -> Result<Option<RepairRecord>>;

    async fn find_repair_by_id(&self, id: &str) -> Result<Option<RepairRecord>>;

    /// Name match ignoring case, plus email (ignoring case) or phone.
    /// When both contacts are empty the name alone decides.
    async fn find_customer(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        phone: &str,
    ) -> Result<Option<CustomerRecord>>;

    async fn create_customer(&self, customer: NewCustomer) -> Result<CustomerRecord>;

    async fn create_repair(&self, repair: NewRepair) -> Result<CreateRepairOutcome>;

    async fn create_log(&self, log: NewLog) -> Result<LogRecord>;

    /// Returns `false` when no repair has this id.
    async fn update_repair_vendor(&self, id: &str, vendor: &str) -> Result<bool>;

    /// Returns `false` when no repair has this id.
    async fn append_message(&self, id: &str, message: RepairMessage) -> Result<bool>;

    async fn add_repair_attachment(&self, id: &str, attachment: &Attachment) -> Result<()>;

    /// A log whose customer name matches ignoring case and which has a line
    /// item for `repair_number`.
    async fn find_log_for_repair(
        &self,
        customer_name: &str,
        repair_number: &str,
    ) -> Result<Option<LogRecord>>;

    async fn add_log_attachment(&self, id: &str, attachment: &Attachment) -> Result<()>;

    async fn list_attachments(&self, owner: AttachmentOwner, id: &str)
        -> Result<Vec<Attachment>>;
}

/// Contact half of the customer match shared by every backend.
pub(crate) fn contact_matches(customer: &CustomerRecord, email: &str, phone: &str) -> bool {
    let email = email.trim();
    let phone = phone.trim();
    if email.is_empty() && phone.is_empty() {
        return true;
    }
    (!email.is_empty() && eq_ignore_case(email, &customer.email))
        || (!phone.is_empty() && phone == customer.phone.trim())
}
