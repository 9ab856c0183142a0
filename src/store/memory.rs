//! In-memory [`RepairStore`] for tests and dry runs.
//!
//! Plain collections behind `std::sync::RwLock`. The dedup check and the
//! insert in [`create_repair`](RepairStore::create_repair) happen under one
//! write lock, so concurrent creates behave like the SQLite unique index.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    eq_ignore_case, Attachment, CustomerRecord, DedupKey, LogRecord, NewCustomer, NewLog,
    NewRepair, RepairMessage, RepairRecord,
};

use super::{contact_matches, AttachmentOwner, CreateRepairOutcome, RepairStore};

struct StoredAttachment {
    owner: AttachmentOwner,
    owner_id: String,
    attachment: Attachment,
}

pub struct InMemoryStore {
    customers: RwLock<Vec<CustomerRecord>>,
    repairs: RwLock<HashMap<String, RepairRecord>>,
    logs: RwLock<Vec<LogRecord>>,
    attachments: RwLock<Vec<StoredAttachment>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            customers: RwLock::new(Vec::new()),
            repairs: RwLock::new(HashMap::new()),
            logs: RwLock::new(Vec::new()),
            attachments: RwLock::new(Vec::new()),
        }
    }

    pub fn repair_count(&self) -> usize {
        self.repairs.read().unwrap().len()
    }

    pub fn customer_count(&self) -> usize {
        self.customers.read().unwrap().len()
    }

    pub fn log_count(&self) -> usize {
        self.logs.read().unwrap().len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RepairStore for InMemoryStore {
    async fn find_repair_by_key(&self, key: &DedupKey) -> Result<Option<RepairRecord>> {
        let repairs = self.repairs.read().unwrap();
        Ok(repairs.values().find(|r| key.matches(r)).cloned())
    }

    async fn find_repair_by_id(&self, id: &str) -> Result<Option<RepairRecord>> {
        Ok(self.repairs.read().unwrap().get(id).cloned())
    }

    async fn find_customer(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        phone: &str,
    ) -> Result<Option<CustomerRecord>> {
        let customers = self.customers.read().unwrap();
        Ok(customers
            .iter()
            .find(|c| {
                eq_ignore_case(&c.first_name, first_name)
                    && eq_ignore_case(&c.last_name, last_name)
                    && contact_matches(c, email, phone)
            })
            .cloned())
    }

    async fn create_customer(&self, customer: NewCustomer) -> Result<CustomerRecord> {
        let record = CustomerRecord {
            id: Uuid::new_v4().to_string(),
            first_name: customer.first_name,
            last_name: customer.last_name,
            email: customer.email,
            phone: customer.phone,
        };
        self.customers.write().unwrap().push(record.clone());
        Ok(record)
    }

    async fn create_repair(&self, repair: NewRepair) -> Result<CreateRepairOutcome> {
        let key = repair.dedup_key();
        let mut repairs = self.repairs.write().unwrap();
        if let Some(existing) = repairs.values().find(|r| key.matches(r)) {
            return Ok(CreateRepairOutcome::Duplicate(existing.clone()));
        }
        let record = repair.into_record(Uuid::new_v4().to_string(), Utc::now());
        repairs.insert(record.id.clone(), record.clone());
        Ok(CreateRepairOutcome::Created(record))
    }

    async fn create_log(&self, log: NewLog) -> Result<LogRecord> {
        let record = LogRecord {
            id: Uuid::new_v4().to_string(),
            customer_id: log.customer_id,
            customer_name: log.customer_name,
            vendor: log.vendor,
            line_items: log.line_items,
            created_at: Utc::now(),
        };
        self.logs.write().unwrap().push(record.clone());
        Ok(record)
    }

    async fn update_repair_vendor(&self, id: &str, vendor: &str) -> Result<bool> {
        let mut repairs = self.repairs.write().unwrap();
        match repairs.get_mut(id) {
            Some(repair) => {
                repair.vendor = Some(vendor.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn append_message(&self, id: &str, message: RepairMessage) -> Result<bool> {
        let mut repairs = self.repairs.write().unwrap();
        match repairs.get_mut(id) {
            Some(repair) => {
                repair.messages.push(message);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn add_repair_attachment(&self, id: &str, attachment: &Attachment) -> Result<()> {
        if !self.repairs.read().unwrap().contains_key(id) {
            anyhow::bail!("Repair not found: {}", id);
        }
        self.attachments.write().unwrap().push(StoredAttachment {
            owner: AttachmentOwner::Repair,
            owner_id: id.to_string(),
            attachment: attachment.clone(),
        });
        Ok(())
    }

    async fn find_log_for_repair(
        &self,
        customer_name: &str,
        repair_number: &str,
    ) -> Result<Option<LogRecord>> {
        let logs = self.logs.read().unwrap();
        Ok(logs
            .iter()
            .find(|log| {
                eq_ignore_case(&log.customer_name, customer_name)
                    && log
                        .line_items
                        .iter()
                        .any(|item| item.repair_number == repair_number)
            })
            .cloned())
    }

    async fn add_log_attachment(&self, id: &str, attachment: &Attachment) -> Result<()> {
        if !self.logs.read().unwrap().iter().any(|log| log.id == id) {
            anyhow::bail!("Log not found: {}", id);
        }
        self.attachments.write().unwrap().push(StoredAttachment {
            owner: AttachmentOwner::Log,
            owner_id: id.to_string(),
            attachment: attachment.clone(),
        });
        Ok(())
    }

    async fn list_attachments(
        &self,
        owner: AttachmentOwner,
        id: &str,
    ) -> Result<Vec<Attachment>> {
        let attachments = self.attachments.read().unwrap();
        Ok(attachments
            .iter()
            .filter(|a| a.owner == owner && a.owner_id == id)
            .map(|a| a.attachment.clone())
            .collect())
    }
}
