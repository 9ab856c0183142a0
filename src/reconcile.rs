//! Reconciliation of board events and inbound replies into repair records.
//!
//! One [`Reconciler`] call handles one event and keeps no state between
//! calls beyond what it writes through the [`RepairStore`].
//!
//! ```text
//! CardEvent ──► get_card ──► repair number? ──► dedup key ──► store
//!                               │ none
//!                               ▼
//!                            ignored
//! InboundEmailEvent ──► repairs+<id>@ ──► repair? ──► S3 ──► MIME ──► append
//! ```
//!
//! "Not found" and "nothing to do" are ordinary [`Outcome`]s. Upstream
//! failures come back as `Err` and the caller decides how to acknowledge.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::card_text::{
    normalize_card_name, parse_card_description, parse_repair_details, parse_repair_number,
    CardDescription,
};
use crate::config::{Config, ListGate};
use crate::email::{parse_email, repair_id_from_recipients, sender_address};
use crate::events::{
    AddAttachmentEvent, CardEvent, CreateCardEvent, InboundEmailEvent, UpdateCardEvent,
};
use crate::image_norm::normalize_attachment;
use crate::models::{
    full_name, Attachment, DedupKey, LineItem, LogRecord, NewCustomer, NewLog, NewRepair,
    RepairRecord,
};
use crate::store::{CreateRepairOutcome, RepairStore};
use crate::traits::{Card, CardApi, ObjectStore};
use crate::trello::trusted_attachment_url;

pub const INCOMING_REPAIR_LIST: &str = "Incoming Repair";
pub const DAILY_LOG_IN_LIST: &str = "Daily Log In";
pub const NEW_CUSTOMER_REPAIR_LIST: &str = "New Customer Repair";

impl ListGate {
    /// Whether a move into `list_name` may change a repair's vendor.
    pub fn admits(self, list_name: &str) -> bool {
        match self {
            // Historical condition, kept verbatim. The two `!=` arms make it
            // true for every list name.
            #[allow(clippy::nonminimal_bool)]
            ListGate::Literal => {
                list_name == NEW_CUSTOMER_REPAIR_LIST
                    || list_name != INCOMING_REPAIR_LIST
                    || list_name != DAILY_LOG_IN_LIST
            }
            ListGate::SkipIntakeLists => {
                list_name != INCOMING_REPAIR_LIST && list_name != DAILY_LOG_IN_LIST
            }
        }
    }
}

/// What a single event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    RepairCreated {
        repair_id: String,
        repair_number: String,
        log_id: String,
    },
    DuplicateSkipped {
        repair_id: String,
    },
    /// A redelivered create found its repair without a companion log and
    /// wrote the missing log.
    LogRestored {
        repair_id: String,
        log_id: String,
    },
    VendorUpdated {
        repair_id: String,
        vendor: String,
    },
    VendorUnchanged {
        repair_id: String,
    },
    AttachmentStored {
        repair_id: String,
        /// Log entry that also received a copy, if the fan-out succeeded.
        log_id: Option<String>,
    },
    MessageAppended {
        repair_id: String,
    },
    /// The card title carries no "Repair <number>".
    NoRepairNumber,
    ListGated {
        list: String,
    },
    RepairNotFound,
    /// The attachment URL is not on a trusted board host; nothing was fetched.
    UntrustedAttachmentUrl,
    /// No recipient matched `<mailbox>+<id>@`.
    NoRepairAddress,
    /// The SES notification had no S3 action to read the message from.
    EmailNotStored,
}

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub list_gate: ListGate,
    pub repair_mailbox: String,
    pub max_dimension: u32,
    pub attachment_hosts: Vec<String>,
}

impl ReconcileSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            list_gate: config.reconcile.list_gate,
            repair_mailbox: config.email.repair_mailbox.clone(),
            max_dimension: config.attachments.max_dimension,
            attachment_hosts: config.trello.attachment_hosts.clone(),
        }
    }
}

/// Repair identity resolved from a card.
struct CardIdentity {
    key: DedupKey,
    description: CardDescription,
}

/// Names come from the description when it supplies a first name,
/// otherwise from the card title.
fn identify(card: &Card) -> Option<CardIdentity> {
    let title = normalize_card_name(&card.name);
    let repair_number = parse_repair_number(&title)?;
    let description = parse_card_description(&card.desc);

    let (first, last) = if !description.first_name.is_empty() {
        (description.first_name.clone(), description.last_name.clone())
    } else {
        parse_repair_details(&title)
            .map(|d| (d.customer_first_name, d.customer_last_name))
            .unwrap_or_default()
    };

    Some(CardIdentity {
        key: DedupKey::new(repair_number, first, last),
        description,
    })
}

pub struct Reconciler {
    store: Arc<dyn RepairStore>,
    cards: Arc<dyn CardApi>,
    objects: Arc<dyn ObjectStore>,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn RepairStore>,
        cards: Arc<dyn CardApi>,
        objects: Arc<dyn ObjectStore>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            store,
            cards,
            objects,
            settings,
        }
    }

    pub async fn handle_card_event(&self, event: &CardEvent) -> Result<Outcome> {
        match event {
            CardEvent::CreateCard(e) => self.create_card(e).await,
            CardEvent::UpdateCard(e) => self.update_card(e).await,
            CardEvent::AddAttachmentToCard(e) => self.add_attachment(e).await,
        }
    }

    async fn create_card(&self, event: &CreateCardEvent) -> Result<Outcome> {
        let card = self.cards.get_card(&event.card_id).await?;
        let Some(identity) = identify(&card) else {
            debug!(card_id = %card.id, name = %card.name, "No repair number in card title");
            return Ok(Outcome::NoRepairNumber);
        };
        let key = identity.key;
        let desc = identity.description;

        let vendor = match (&event.list_name, &card.id_list) {
            (Some(name), _) => Some(name.clone()),
            (None, Some(list_id)) => Some(self.cards.get_list(list_id).await?.name),
            (None, None) => None,
        };

        if let Some(existing) = self.store.find_repair_by_key(&key).await? {
            if self.companion_log(&existing).await?.is_none() {
                let log = self.create_companion_log(&existing).await?;
                warn!(
                    repair_number = %existing.repair_number,
                    repair_id = %existing.id,
                    log_id = %log.id,
                    "Repair had no log entry, created it"
                );
                return Ok(Outcome::LogRestored {
                    repair_id: existing.id,
                    log_id: log.id,
                });
            }
            info!(
                repair_number = %key.repair_number,
                repair_id = %existing.id,
                card_id = %card.id,
                "Repair already exists, skipping duplicate"
            );
            return Ok(Outcome::DuplicateSkipped {
                repair_id: existing.id,
            });
        }

        let customer = match self
            .store
            .find_customer(&key.first_name, &key.last_name, &desc.email, &desc.phone)
            .await?
        {
            Some(customer) => customer,
            None => {
                let created = self
                    .store
                    .create_customer(NewCustomer {
                        first_name: key.first_name.clone(),
                        last_name: key.last_name.clone(),
                        email: desc.email.clone(),
                        phone: desc.phone.clone(),
                    })
                    .await?;
                info!(customer_id = %created.id, "Created customer");
                created
            }
        };

        let new_repair = NewRepair {
            repair_number: key.repair_number.clone(),
            customer_id: Some(customer.id),
            customer_first_name: key.first_name.clone(),
            customer_last_name: key.last_name.clone(),
            email: desc.email,
            phone: desc.phone,
            vendor,
            brand: desc.brand,
            model: desc.model,
            material: desc.material,
            reference_number: desc.reference_number,
            description: desc.select_box,
            repair_notes: desc.repair_options,
            card_id: Some(card.id.clone()),
        };

        let repair = match self.store.create_repair(new_repair).await? {
            CreateRepairOutcome::Created(repair) => repair,
            CreateRepairOutcome::Duplicate(existing) => {
                info!(
                    repair_number = %key.repair_number,
                    repair_id = %existing.id,
                    "Repair created concurrently, skipping duplicate"
                );
                return Ok(Outcome::DuplicateSkipped {
                    repair_id: existing.id,
                });
            }
        };

        let log = self.create_companion_log(&repair).await?;

        info!(
            repair_number = %repair.repair_number,
            repair_id = %repair.id,
            log_id = %log.id,
            card_id = %card.id,
            "Created repair"
        );
        Ok(Outcome::RepairCreated {
            repair_id: repair.id,
            repair_number: repair.repair_number,
            log_id: log.id,
        })
    }

    async fn companion_log(&self, repair: &RepairRecord) -> Result<Option<LogRecord>> {
        let customer_name = full_name(&repair.customer_first_name, &repair.customer_last_name);
        self.store
            .find_log_for_repair(&customer_name, &repair.repair_number)
            .await
    }

    async fn create_companion_log(&self, repair: &RepairRecord) -> Result<LogRecord> {
        self.store
            .create_log(NewLog {
                customer_id: repair.customer_id.clone(),
                customer_name: full_name(&repair.customer_first_name, &repair.customer_last_name),
                vendor: repair.vendor.clone(),
                line_items: vec![LineItem {
                    repair_number: repair.repair_number.clone(),
                    description: repair.description.clone(),
                }],
            })
            .await
            .with_context(|| format!("Failed to create log for repair {}", repair.id))
    }

    async fn update_card(&self, event: &UpdateCardEvent) -> Result<Outcome> {
        let list_name = match &event.list_after_name {
            Some(name) => name.clone(),
            None => self.cards.get_list(&event.list_after_id).await?.name,
        };

        if !self.settings.list_gate.admits(&list_name) {
            info!(
                list = %list_name,
                card_id = %event.card_id,
                "List move gated, vendor untouched"
            );
            return Ok(Outcome::ListGated { list: list_name });
        }
        if !ListGate::SkipIntakeLists.admits(&list_name) {
            warn!(
                list = %list_name,
                card_id = %event.card_id,
                "Vendor set to an intake list; list_gate = \"skip_intake_lists\" would skip this move"
            );
        }

        let card = self.cards.get_card(&event.card_id).await?;
        let Some(identity) = identify(&card) else {
            debug!(card_id = %card.id, "No repair number in card title");
            return Ok(Outcome::NoRepairNumber);
        };

        let Some(repair) = self.store.find_repair_by_key(&identity.key).await? else {
            info!(
                repair_number = %identity.key.repair_number,
                card_id = %card.id,
                "No repair for moved card"
            );
            return Ok(Outcome::RepairNotFound);
        };

        if repair.vendor.as_deref() == Some(list_name.as_str()) {
            debug!(repair_id = %repair.id, list = %list_name, "Vendor unchanged");
            return Ok(Outcome::VendorUnchanged {
                repair_id: repair.id,
            });
        }

        self.store
            .update_repair_vendor(&repair.id, &list_name)
            .await?;
        info!(
            repair_number = %repair.repair_number,
            repair_id = %repair.id,
            from = ?repair.vendor,
            to = %list_name,
            "Updated repair vendor"
        );
        Ok(Outcome::VendorUpdated {
            repair_id: repair.id,
            vendor: list_name,
        })
    }

    async fn add_attachment(&self, event: &AddAttachmentEvent) -> Result<Outcome> {
        let Some(url) = trusted_attachment_url(&event.url, &self.settings.attachment_hosts) else {
            warn!(
                card_id = %event.card_id,
                url = %event.url,
                "Attachment URL not on a trusted host, skipping download"
            );
            return Ok(Outcome::UntrustedAttachmentUrl);
        };

        let card = self.cards.get_card(&event.card_id).await?;
        let Some(identity) = identify(&card) else {
            debug!(card_id = %card.id, "No repair number in card title");
            return Ok(Outcome::NoRepairNumber);
        };

        let Some(repair) = self.store.find_repair_by_key(&identity.key).await? else {
            info!(
                repair_number = %identity.key.repair_number,
                card_id = %card.id,
                "No repair for attachment"
            );
            return Ok(Outcome::RepairNotFound);
        };

        let file = self.cards.download_attachment(url.as_str()).await?;
        let content_type = file.content_type.as_deref().or(event.mime_type.as_deref());
        let attachment = normalize_attachment(
            &event.name,
            content_type,
            file.bytes,
            self.settings.max_dimension,
        );

        self.store
            .add_repair_attachment(&repair.id, &attachment)
            .await?;
        info!(
            repair_number = %repair.repair_number,
            repair_id = %repair.id,
            file = %attachment.file_name,
            "Stored repair attachment"
        );

        let log_id = match self.copy_to_log(&repair, &attachment).await {
            Ok(log_id) => log_id,
            Err(e) => {
                warn!(repair_id = %repair.id, error = %e, "Log attachment fan-out failed");
                None
            }
        };

        Ok(Outcome::AttachmentStored {
            repair_id: repair.id,
            log_id,
        })
    }

    async fn copy_to_log(
        &self,
        repair: &RepairRecord,
        attachment: &Attachment,
    ) -> Result<Option<String>> {
        let Some(log) = self.companion_log(repair).await? else {
            debug!(repair_id = %repair.id, "No log entry to copy attachment onto");
            return Ok(None);
        };
        self.store.add_log_attachment(&log.id, attachment).await?;
        debug!(repair_id = %repair.id, log_id = %log.id, "Copied attachment onto log");
        Ok(Some(log.id))
    }

    pub async fn handle_inbound_email(&self, event: &InboundEmailEvent) -> Result<Outcome> {
        let Some(repair_id) =
            repair_id_from_recipients(event.recipients.as_slice(), &self.settings.repair_mailbox)
        else {
            debug!(recipients = ?event.recipients, "No repair address among recipients");
            return Ok(Outcome::NoRepairAddress);
        };

        let Some(repair) = self.store.find_repair_by_id(&repair_id).await? else {
            info!(repair_id = %repair_id, "Inbound email for unknown repair");
            return Ok(Outcome::RepairNotFound);
        };

        let Some(stored) = &event.stored else {
            warn!(repair_id = %repair.id, "Inbound email has no S3 location");
            return Ok(Outcome::EmailNotStored);
        };

        let raw = self
            .objects
            .get_object(&stored.bucket, &stored.key)
            .await
            .with_context(|| format!("Failed to fetch s3://{}/{}", stored.bucket, stored.key))?;
        let parsed = parse_email(&raw)?;

        let mut inbound = parsed.into_inbound_message();
        if inbound.from.is_empty() {
            if let Some(sender) = &event.sender {
                inbound.from = sender_address(sender);
            }
        }
        let date = event.received_at.unwrap_or_else(Utc::now);

        if !self
            .store
            .append_message(&repair.id, inbound.into_repair_message(date))
            .await?
        {
            return Ok(Outcome::RepairNotFound);
        }

        info!(
            repair_number = %repair.repair_number,
            repair_id = %repair.id,
            "Appended inbound message"
        );
        Ok(Outcome::MessageAppended {
            repair_id: repair.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StoredEmail;
    use crate::models::{CustomerRecord, RepairMessage};
    use crate::store::memory::InMemoryStore;
    use crate::store::AttachmentOwner;
    use crate::traits::{CardList, DownloadedFile};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeCards {
        cards: HashMap<String, Card>,
        lists: HashMap<String, String>,
        files: HashMap<String, DownloadedFile>,
        downloads: Mutex<Vec<String>>,
    }

    impl FakeCards {
        fn with_card(mut self, id: &str, name: &str, desc: &str, list_id: &str) -> Self {
            self.cards.insert(
                id.to_string(),
                Card {
                    id: id.to_string(),
                    name: name.to_string(),
                    desc: desc.to_string(),
                    id_list: Some(list_id.to_string()),
                },
            );
            self
        }

        fn with_list(mut self, id: &str, name: &str) -> Self {
            self.lists.insert(id.to_string(), name.to_string());
            self
        }

        fn with_file(mut self, url: &str, bytes: &[u8], content_type: &str) -> Self {
            self.files.insert(
                url.to_string(),
                DownloadedFile {
                    bytes: bytes.to_vec(),
                    content_type: Some(content_type.to_string()),
                },
            );
            self
        }
    }

    #[async_trait]
    impl CardApi for FakeCards {
        async fn get_card(&self, card_id: &str) -> Result<Card> {
            self.cards
                .get(card_id)
                .cloned()
                .with_context(|| format!("HTTP 404 for card {}", card_id))
        }

        async fn get_list(&self, list_id: &str) -> Result<CardList> {
            let name = self
                .lists
                .get(list_id)
                .with_context(|| format!("HTTP 404 for list {}", list_id))?;
            Ok(CardList {
                id: list_id.to_string(),
                name: name.clone(),
            })
        }

        async fn download_attachment(&self, url: &str) -> Result<DownloadedFile> {
            self.downloads.lock().unwrap().push(url.to_string());
            self.files
                .get(url)
                .cloned()
                .with_context(|| format!("HTTP 404 for {}", url))
        }
    }

    #[derive(Default)]
    struct FakeObjects {
        objects: HashMap<(String, String), Vec<u8>>,
    }

    #[async_trait]
    impl ObjectStore for FakeObjects {
        async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
            self.objects
                .get(&(bucket.to_string(), key.to_string()))
                .cloned()
                .context("NoSuchKey")
        }
    }

    /// Delegates to an in-memory store, failing log writes on request.
    #[derive(Default)]
    struct FaultyStore {
        inner: InMemoryStore,
        failing_log_creates: AtomicUsize,
        refuse_log_attachments: bool,
    }

    #[async_trait]
    impl RepairStore for FaultyStore {
        async fn find_repair_by_key(&self, key: &DedupKey) -> Result<Option<RepairRecord>> {
            self.inner.find_repair_by_key(key).await
        }
        async fn find_repair_by_id(&self, id: &str) -> Result<Option<RepairRecord>> {
            self.inner.find_repair_by_id(id).await
        }
        async fn find_customer(
            &self,
            first: &str,
            last: &str,
            email: &str,
            phone: &str,
        ) -> Result<Option<CustomerRecord>> {
            self.inner.find_customer(first, last, email, phone).await
        }
        async fn create_customer(&self, customer: NewCustomer) -> Result<CustomerRecord> {
            self.inner.create_customer(customer).await
        }
        async fn create_repair(&self, repair: NewRepair) -> Result<CreateRepairOutcome> {
            self.inner.create_repair(repair).await
        }
        async fn create_log(&self, log: NewLog) -> Result<LogRecord> {
            if self.failing_log_creates.load(Ordering::SeqCst) > 0 {
                self.failing_log_creates.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("database is locked");
            }
            self.inner.create_log(log).await
        }
        async fn update_repair_vendor(&self, id: &str, vendor: &str) -> Result<bool> {
            self.inner.update_repair_vendor(id, vendor).await
        }
        async fn append_message(&self, id: &str, message: RepairMessage) -> Result<bool> {
            self.inner.append_message(id, message).await
        }
        async fn add_repair_attachment(&self, id: &str, attachment: &Attachment) -> Result<()> {
            self.inner.add_repair_attachment(id, attachment).await
        }
        async fn find_log_for_repair(
            &self,
            customer_name: &str,
            repair_number: &str,
        ) -> Result<Option<LogRecord>> {
            self.inner.find_log_for_repair(customer_name, repair_number).await
        }
        async fn add_log_attachment(&self, id: &str, attachment: &Attachment) -> Result<()> {
            if self.refuse_log_attachments {
                anyhow::bail!("disk full");
            }
            self.inner.add_log_attachment(id, attachment).await
        }
        async fn list_attachments(
            &self,
            owner: AttachmentOwner,
            id: &str,
        ) -> Result<Vec<Attachment>> {
            self.inner.list_attachments(owner, id).await
        }
    }

    const DESC: &str = "**First Name:** David\n\
                        **Last Name:** Knoernschild\n\
                        **Email:** [d@example.com](mailto:d@example.com)\n\
                        **Brand:** Gucci\n\
                        **Select Box:** Heel replacement\n\
                        **Repair Estimate Options:** [Call first]";

    fn settings(list_gate: ListGate) -> ReconcileSettings {
        ReconcileSettings {
            list_gate,
            repair_mailbox: "repairs".to_string(),
            max_dimension: 1200,
            attachment_hosts: vec!["trello.com".to_string()],
        }
    }

    fn board() -> FakeCards {
        FakeCards::default()
            .with_card("c1", "Repair #61 : David Knoernschild", DESC, "l-smea")
            .with_list("l-smea", "Smea")
            .with_list("l-gyula", "Gyula")
            .with_list("l-incoming", INCOMING_REPAIR_LIST)
    }

    fn reconciler_with(
        store: Arc<dyn RepairStore>,
        cards: FakeCards,
        objects: FakeObjects,
        gate: ListGate,
    ) -> Reconciler {
        Reconciler::new(store, Arc::new(cards), Arc::new(objects), settings(gate))
    }

    fn create(card_id: &str) -> CardEvent {
        CardEvent::CreateCard(CreateCardEvent {
            card_id: card_id.to_string(),
            list_name: None,
        })
    }

    fn moved(card_id: &str, list_id: &str) -> CardEvent {
        CardEvent::UpdateCard(UpdateCardEvent {
            card_id: card_id.to_string(),
            list_after_id: list_id.to_string(),
            list_after_name: None,
        })
    }

    #[test]
    fn literal_gate_admits_everything() {
        for name in [INCOMING_REPAIR_LIST, DAILY_LOG_IN_LIST, NEW_CUSTOMER_REPAIR_LIST, "Gyula"] {
            assert!(ListGate::Literal.admits(name), "{name}");
        }
        assert!(!ListGate::SkipIntakeLists.admits(INCOMING_REPAIR_LIST));
        assert!(!ListGate::SkipIntakeLists.admits(DAILY_LOG_IN_LIST));
        assert!(ListGate::SkipIntakeLists.admits(NEW_CUSTOMER_REPAIR_LIST));
        assert!(ListGate::SkipIntakeLists.admits("Gyula"));
    }

    #[tokio::test]
    async fn create_card_twice_yields_one_repair() {
        let store = Arc::new(InMemoryStore::new());
        let r = reconciler_with(store.clone(), board(), FakeObjects::default(), ListGate::Literal);

        let first = r.handle_card_event(&create("c1")).await.unwrap();
        let Outcome::RepairCreated { repair_id, .. } = first else {
            panic!("expected creation, got {:?}", first);
        };
        let second = r.handle_card_event(&create("c1")).await.unwrap();
        assert_eq!(second, Outcome::DuplicateSkipped { repair_id: repair_id.clone() });

        assert_eq!(store.repair_count(), 1);
        assert_eq!(store.customer_count(), 1);
        assert_eq!(store.log_count(), 1);

        let repair = store.find_repair_by_id(&repair_id).await.unwrap().unwrap();
        assert_eq!(repair.repair_number, "61");
        assert_eq!(repair.customer_first_name, "David");
        assert_eq!(repair.email, "d@example.com");
        assert_eq!(repair.vendor.as_deref(), Some("Smea"));
        assert_eq!(repair.description, "Heel replacement");
        assert_eq!(repair.repair_notes, "Call first");

        let log = store
            .find_log_for_repair("david knoernschild", "61")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.line_items[0].repair_number, "61");
    }

    #[tokio::test]
    async fn redelivered_create_restores_missing_log() {
        let store = Arc::new(FaultyStore {
            failing_log_creates: AtomicUsize::new(1),
            ..FaultyStore::default()
        });
        let r = reconciler_with(store.clone(), board(), FakeObjects::default(), ListGate::Literal);

        assert!(r.handle_card_event(&create("c1")).await.is_err());
        assert_eq!(store.inner.repair_count(), 1);
        assert_eq!(store.inner.log_count(), 0);

        let second = r.handle_card_event(&create("c1")).await.unwrap();
        let Outcome::LogRestored { repair_id, log_id } = second else {
            panic!("expected log restoration, got {:?}", second);
        };
        assert_eq!(store.inner.repair_count(), 1);
        assert_eq!(store.inner.log_count(), 1);

        let log = store
            .find_log_for_repair("David Knoernschild", "61")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.id, log_id);
        assert_eq!(log.vendor.as_deref(), Some("Smea"));
        assert!(log.customer_id.is_some());

        let third = r.handle_card_event(&create("c1")).await.unwrap();
        assert_eq!(third, Outcome::DuplicateSkipped { repair_id });
        assert_eq!(store.inner.log_count(), 1);
    }

    #[tokio::test]
    async fn create_card_reuses_existing_customer() {
        let store = Arc::new(InMemoryStore::new());
        let cards = board().with_card("c2", "Repair #62 - DAVID knoernschild", DESC, "l-smea");
        let r = reconciler_with(store.clone(), cards, FakeObjects::default(), ListGate::Literal);

        r.handle_card_event(&create("c1")).await.unwrap();
        r.handle_card_event(&create("c2")).await.unwrap();
        assert_eq!(store.repair_count(), 2);
        assert_eq!(store.customer_count(), 1);
    }

    #[tokio::test]
    async fn create_card_without_repair_number_is_ignored() {
        let store = Arc::new(InMemoryStore::new());
        let cards = board().with_card("c3", "Call David back", "", "l-smea");
        let r = reconciler_with(store.clone(), cards, FakeObjects::default(), ListGate::Literal);

        let outcome = r.handle_card_event(&create("c3")).await.unwrap();
        assert_eq!(outcome, Outcome::NoRepairNumber);
        assert_eq!(store.repair_count(), 0);
    }

    #[tokio::test]
    async fn title_names_used_when_description_has_none() {
        let store = Arc::new(InMemoryStore::new());
        let cards = board().with_card("c4", "Repair #70 ~ Ann Lee", "", "l-smea");
        let r = reconciler_with(store.clone(), cards, FakeObjects::default(), ListGate::Literal);

        r.handle_card_event(&create("c4")).await.unwrap();
        let found = store
            .find_repair_by_key(&DedupKey::new("70", "ann", "LEE"))
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn upstream_failure_aborts_event() {
        let store = Arc::new(InMemoryStore::new());
        let r = reconciler_with(store.clone(), board(), FakeObjects::default(), ListGate::Literal);
        assert!(r.handle_card_event(&create("missing")).await.is_err());
        assert_eq!(store.repair_count(), 0);
    }

    #[tokio::test]
    async fn move_changes_only_vendor() {
        let store = Arc::new(InMemoryStore::new());
        let r = reconciler_with(store.clone(), board(), FakeObjects::default(), ListGate::Literal);
        r.handle_card_event(&create("c1")).await.unwrap();
        let before = store
            .find_repair_by_key(&DedupKey::new("61", "David", "Knoernschild"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before.vendor.as_deref(), Some("Smea"));

        let outcome = r.handle_card_event(&moved("c1", "l-gyula")).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::VendorUpdated {
                repair_id: before.id.clone(),
                vendor: "Gyula".to_string()
            }
        );

        let after = store.find_repair_by_id(&before.id).await.unwrap().unwrap();
        assert_eq!(after.vendor.as_deref(), Some("Gyula"));
        assert_eq!(after.brand, before.brand);
        assert_eq!(after.description, before.description);
        assert_eq!(after.search, before.search);
        assert_eq!(after.messages, before.messages);
    }

    #[tokio::test]
    async fn move_to_same_vendor_is_noop() {
        let store = Arc::new(InMemoryStore::new());
        let r = reconciler_with(store.clone(), board(), FakeObjects::default(), ListGate::Literal);
        r.handle_card_event(&create("c1")).await.unwrap();

        let outcome = r.handle_card_event(&moved("c1", "l-smea")).await.unwrap();
        assert!(matches!(outcome, Outcome::VendorUnchanged { .. }));
    }

    #[tokio::test]
    async fn intake_list_move_depends_on_gate() {
        let store = Arc::new(InMemoryStore::new());
        let literal =
            reconciler_with(store.clone(), board(), FakeObjects::default(), ListGate::Literal);
        literal.handle_card_event(&create("c1")).await.unwrap();

        let strict = reconciler_with(
            store.clone(),
            board(),
            FakeObjects::default(),
            ListGate::SkipIntakeLists,
        );
        let gated = strict
            .handle_card_event(&moved("c1", "l-incoming"))
            .await
            .unwrap();
        assert_eq!(
            gated,
            Outcome::ListGated {
                list: INCOMING_REPAIR_LIST.to_string()
            }
        );

        let admitted = literal
            .handle_card_event(&moved("c1", "l-incoming"))
            .await
            .unwrap();
        assert!(matches!(admitted, Outcome::VendorUpdated { .. }));
    }

    #[tokio::test]
    async fn move_for_unknown_repair_is_not_found() {
        let store = Arc::new(InMemoryStore::new());
        let r = reconciler_with(store, board(), FakeObjects::default(), ListGate::Literal);
        let outcome = r.handle_card_event(&moved("c1", "l-gyula")).await.unwrap();
        assert_eq!(outcome, Outcome::RepairNotFound);
    }

    const NOTE_URL: &str = "https://trello.com/1/cards/c1/attachments/a1/download/note.txt";

    fn attachment_event(url: &str) -> CardEvent {
        CardEvent::AddAttachmentToCard(AddAttachmentEvent {
            card_id: "c1".to_string(),
            attachment_id: "a1".to_string(),
            name: "note.txt".to_string(),
            url: url.to_string(),
            mime_type: None,
        })
    }

    #[tokio::test]
    async fn attachment_stored_on_repair_and_log() {
        let store = Arc::new(InMemoryStore::new());
        let cards = board().with_file(NOTE_URL, b"hello", "text/plain");
        let r = reconciler_with(store.clone(), cards, FakeObjects::default(), ListGate::Literal);
        let Outcome::RepairCreated {
            repair_id, log_id, ..
        } = r.handle_card_event(&create("c1")).await.unwrap()
        else {
            panic!("expected creation");
        };

        let outcome = r
            .handle_card_event(&attachment_event(NOTE_URL))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::AttachmentStored {
                repair_id: repair_id.clone(),
                log_id: Some(log_id.clone())
            }
        );

        let on_repair = store
            .list_attachments(AttachmentOwner::Repair, &repair_id)
            .await
            .unwrap();
        let on_log = store
            .list_attachments(AttachmentOwner::Log, &log_id)
            .await
            .unwrap();
        assert_eq!(on_repair.len(), 1);
        assert_eq!(on_repair[0].bytes, b"hello");
        assert_eq!(on_log, on_repair);
    }

    #[tokio::test]
    async fn log_fan_out_failure_keeps_repair_attachment() {
        let store = Arc::new(FaultyStore {
            refuse_log_attachments: true,
            ..FaultyStore::default()
        });
        let cards = board().with_file(NOTE_URL, b"hello", "text/plain");
        let r = reconciler_with(store.clone(), cards, FakeObjects::default(), ListGate::Literal);
        let Outcome::RepairCreated { repair_id, .. } =
            r.handle_card_event(&create("c1")).await.unwrap()
        else {
            panic!("expected creation");
        };

        let outcome = r
            .handle_card_event(&attachment_event(NOTE_URL))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::AttachmentStored {
                repair_id: repair_id.clone(),
                log_id: None
            }
        );
        let on_repair = store
            .list_attachments(AttachmentOwner::Repair, &repair_id)
            .await
            .unwrap();
        assert_eq!(on_repair.len(), 1);
    }

    #[tokio::test]
    async fn untrusted_attachment_url_is_never_downloaded() {
        let store = Arc::new(InMemoryStore::new());
        let cards = Arc::new(board().with_file(
            "https://attacker.example/steal",
            b"hello",
            "text/plain",
        ));
        let r = Reconciler::new(
            store.clone(),
            cards.clone(),
            Arc::new(FakeObjects::default()),
            settings(ListGate::Literal),
        );
        let Outcome::RepairCreated { repair_id, .. } =
            r.handle_card_event(&create("c1")).await.unwrap()
        else {
            panic!("expected creation");
        };

        for url in [
            "https://attacker.example/steal",
            "http://trello.com/1/cards/c1/attachments/a1/download/note.txt",
            "https://trello.com.attacker.example/note.txt",
        ] {
            let outcome = r.handle_card_event(&attachment_event(url)).await.unwrap();
            assert_eq!(outcome, Outcome::UntrustedAttachmentUrl, "{url}");
        }

        assert!(cards.downloads.lock().unwrap().is_empty());
        let on_repair = store
            .list_attachments(AttachmentOwner::Repair, &repair_id)
            .await
            .unwrap();
        assert!(on_repair.is_empty());
    }

    #[tokio::test]
    async fn attachment_download_failure_is_an_error() {
        let store = Arc::new(InMemoryStore::new());
        let r = reconciler_with(store.clone(), board(), FakeObjects::default(), ListGate::Literal);
        r.handle_card_event(&create("c1")).await.unwrap();
        assert!(r
            .handle_card_event(&attachment_event("https://trello.com/1/cards/c1/attachments/a9/download/missing.txt"))
            .await
            .is_err());
    }

    const RAW_REPLY: &str = concat!(
        "From: \"David K\" <d@example.com>\r\n",
        "Subject: Re: Repair #61\r\n",
        "Content-Type: text/plain; charset=utf-8\r\n",
        "\r\n",
        "Please go ahead.\r\n",
        "\r\n",
        "On Mon, Jan 1, 2024 at 3:00 PM Shop wrote:\r\n",
        "> Your estimate is ready\r\n",
    );

    fn email_event(recipient: &str) -> InboundEmailEvent {
        InboundEmailEvent {
            recipients: vec![recipient.to_string()],
            sender: Some("d@example.com".to_string()),
            received_at: None,
            stored: Some(StoredEmail {
                bucket: "mail".to_string(),
                key: "inbound/1".to_string(),
            }),
        }
    }

    #[tokio::test]
    async fn inbound_email_appends_stripped_reply() {
        let store = Arc::new(InMemoryStore::new());
        let mut objects = FakeObjects::default();
        objects.objects.insert(
            ("mail".to_string(), "inbound/1".to_string()),
            RAW_REPLY.as_bytes().to_vec(),
        );
        let r = reconciler_with(store.clone(), board(), objects, ListGate::Literal);
        let Outcome::RepairCreated { repair_id, .. } =
            r.handle_card_event(&create("c1")).await.unwrap()
        else {
            panic!("expected creation");
        };

        let to = format!("repairs+{}@shop.example.com", repair_id);
        let outcome = r.handle_inbound_email(&email_event(&to)).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::MessageAppended {
                repair_id: repair_id.clone()
            }
        );

        let repair = store.find_repair_by_id(&repair_id).await.unwrap().unwrap();
        assert_eq!(repair.messages.len(), 1);
        assert_eq!(repair.messages[0].from, "d@example.com");
        assert_eq!(repair.messages[0].message, "Please go ahead.");
    }

    #[tokio::test]
    async fn inbound_email_ignore_cases() {
        let store = Arc::new(InMemoryStore::new());
        let r = reconciler_with(store.clone(), board(), FakeObjects::default(), ListGate::Literal);

        let no_tag = r
            .handle_inbound_email(&email_event("repairs@shop.example.com"))
            .await
            .unwrap();
        assert_eq!(no_tag, Outcome::NoRepairAddress);

        let unknown = r
            .handle_inbound_email(&email_event("repairs+nope@shop.example.com"))
            .await
            .unwrap();
        assert_eq!(unknown, Outcome::RepairNotFound);

        let Outcome::RepairCreated { repair_id, .. } =
            r.handle_card_event(&create("c1")).await.unwrap()
        else {
            panic!("expected creation");
        };
        let mut unstored = email_event(&format!("repairs+{}@shop.example.com", repair_id));
        unstored.stored = None;
        assert_eq!(
            r.handle_inbound_email(&unstored).await.unwrap(),
            Outcome::EmailNotStored
        );
    }
}
