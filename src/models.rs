//! Core data models used throughout the reconciliation pipeline.
//!
//! Stored records ([`RepairRecord`], [`CustomerRecord`], [`LogRecord`]) are
//! owned by the [`RepairStore`](crate::store::RepairStore); the `New*`
//! types are what the orchestrator hands it for creation.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Case-insensitive identity of a repair: `(repairNumber, first, last)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupKey {
    pub repair_number: String,
    pub first_name: String,
    pub last_name: String,
}

impl DedupKey {
    pub fn new(
        repair_number: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            repair_number: repair_number.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    /// Lower-cased name pair used for equality and the storage unique key.
    pub fn name_keys(&self) -> (String, String) {
        (name_key(&self.first_name), name_key(&self.last_name))
    }

    pub fn matches(&self, repair: &RepairRecord) -> bool {
        self.repair_number == repair.repair_number
            && eq_ignore_case(&self.first_name, &repair.customer_first_name)
            && eq_ignore_case(&self.last_name, &repair.customer_last_name)
    }
}

/// Normalized form of a name for case-insensitive exact comparison.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    name_key(a) == name_key(b)
}

/// One entry in a repair's correspondence thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairMessage {
    pub date: DateTime<Utc>,
    pub from: String,
    pub message: String,
}

/// Reply text extracted from an inbound email, before it is dated and stored.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub from: String,
    pub message: String,
}

impl InboundMessage {
    pub fn into_repair_message(self, date: DateTime<Utc>) -> RepairMessage {
        RepairMessage {
            date,
            from: self.from,
            message: self.message,
        }
    }
}

/// Binary payload persisted against a repair or log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    /// Pixel dimensions when the payload decoded as an image.
    pub dimensions: Option<(u32, u32)>,
}

/// Stored repair ticket.
#[derive(Debug, Clone, Serialize)]
pub struct RepairRecord {
    pub id: String,
    pub repair_number: String,
    pub customer_id: Option<String>,
    pub customer_first_name: String,
    pub customer_last_name: String,
    pub email: String,
    pub phone: String,
    pub vendor: Option<String>,
    pub brand: String,
    pub model: String,
    pub material: String,
    pub reference_number: String,
    pub description: String,
    pub repair_notes: String,
    pub card_id: Option<String>,
    pub messages: Vec<RepairMessage>,
    pub search: String,
    pub created_at: DateTime<Utc>,
}

/// Fields for a repair that has not been stored yet.
#[derive(Debug, Clone)]
pub struct NewRepair {
    pub repair_number: String,
    pub customer_id: Option<String>,
    pub customer_first_name: String,
    pub customer_last_name: String,
    pub email: String,
    pub phone: String,
    pub vendor: Option<String>,
    pub brand: String,
    pub model: String,
    pub material: String,
    pub reference_number: String,
    pub description: String,
    pub repair_notes: String,
    pub card_id: Option<String>,
}

impl NewRepair {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(
            &self.repair_number,
            &self.customer_first_name,
            &self.customer_last_name,
        )
    }

    /// Space-joined, lower-cased text used for full-text lookup.
    pub fn search_text(&self) -> String {
        [
            self.repair_number.as_str(),
            &self.customer_first_name,
            &self.customer_last_name,
            &self.email,
            &self.phone,
            &self.brand,
            &self.model,
            &self.material,
            &self.reference_number,
            &self.description,
        ]
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
    }

    pub fn into_record(self, id: String, created_at: DateTime<Utc>) -> RepairRecord {
        let search = self.search_text();
        RepairRecord {
            id,
            repair_number: self.repair_number,
            customer_id: self.customer_id,
            customer_first_name: self.customer_first_name,
            customer_last_name: self.customer_last_name,
            email: self.email,
            phone: self.phone,
            vendor: self.vendor,
            brand: self.brand,
            model: self.model,
            material: self.material,
            reference_number: self.reference_number,
            description: self.description,
            repair_notes: self.repair_notes,
            card_id: self.card_id,
            messages: Vec::new(),
            search,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerRecord {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

/// One line of a [`LogRecord`], pointing back at a repair by number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    pub repair_number: String,
    pub description: String,
}

/// Intake ledger entry created alongside a repair.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub id: String,
    pub customer_id: Option<String>,
    pub customer_name: String,
    pub vendor: Option<String>,
    pub line_items: Vec<LineItem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLog {
    pub customer_id: Option<String>,
    pub customer_name: String,
    pub vendor: Option<String>,
    pub line_items: Vec<LineItem>,
}

/// Full customer name as written on log entries.
pub fn full_name(first: &str, last: &str) -> String {
    format!("{} {}", first.trim(), last.trim()).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_repair() -> NewRepair {
        NewRepair {
            repair_number: "61".to_string(),
            customer_id: None,
            customer_first_name: "David".to_string(),
            customer_last_name: "Knoernschild".to_string(),
            email: "d@example.com".to_string(),
            phone: String::new(),
            vendor: Some("Smea".to_string()),
            brand: "Gucci".to_string(),
            model: String::new(),
            material: "Leather".to_string(),
            reference_number: String::new(),
            description: "Heel".to_string(),
            repair_notes: String::new(),
            card_id: None,
        }
    }

    #[test]
    fn dedup_key_matches_ignoring_case() {
        let record = sample_repair().into_record("r1".to_string(), Utc::now());
        assert!(DedupKey::new("61", "DAVID", "knoernschild").matches(&record));
        assert!(!DedupKey::new("061", "David", "Knoernschild").matches(&record));
        assert!(!DedupKey::new("61", "Davide", "Knoernschild").matches(&record));
    }

    #[test]
    fn search_text_skips_empty_fields() {
        let text = sample_repair().search_text();
        assert_eq!(text, "61 david knoernschild d@example.com gucci leather heel");
    }

    #[test]
    fn full_name_handles_missing_last_name() {
        assert_eq!(full_name("David", ""), "David");
        assert_eq!(full_name("David", "K"), "David K");
    }
}
