//! Typed webhook payloads.
//!
//! Raw JSON from Trello and SNS/SES is decoded here, at the boundary, into
//! the small set of events the [`Reconciler`](crate::reconcile::Reconciler)
//! understands. Anything else decodes to `None` and is acknowledged without
//! side effects.

use chrono::{DateTime, Utc};
use serde::Deserialize;

// ═══════════════════════════════════════════════════════════════════════
// Trello
// ═══════════════════════════════════════════════════════════════════════

/// A card-board event the reconciler acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum CardEvent {
    CreateCard(CreateCardEvent),
    UpdateCard(UpdateCardEvent),
    AddAttachmentToCard(AddAttachmentEvent),
}

impl CardEvent {
    pub fn card_id(&self) -> &str {
        match self {
            CardEvent::CreateCard(e) => &e.card_id,
            CardEvent::UpdateCard(e) => &e.card_id,
            CardEvent::AddAttachmentToCard(e) => &e.card_id,
        }
    }

    pub fn action_type(&self) -> &'static str {
        match self {
            CardEvent::CreateCard(_) => "createCard",
            CardEvent::UpdateCard(_) => "updateCard",
            CardEvent::AddAttachmentToCard(_) => "addAttachmentToCard",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateCardEvent {
    pub card_id: String,
    /// Name of the list the card was created in, when the payload carries it.
    pub list_name: Option<String>,
}

/// A card moved between lists.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCardEvent {
    pub card_id: String,
    pub list_after_id: String,
    pub list_after_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddAttachmentEvent {
    pub card_id: String,
    pub attachment_id: String,
    pub name: String,
    pub url: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrelloWebhook {
    action: TrelloAction,
}

#[derive(Debug, Deserialize)]
struct TrelloAction {
    #[serde(rename = "type")]
    action_type: String,
    #[serde(default)]
    data: TrelloActionData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrelloActionData {
    card: Option<IdName>,
    list: Option<IdName>,
    list_after: Option<IdName>,
    attachment: Option<TrelloAttachment>,
}

#[derive(Debug, Deserialize)]
struct IdName {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrelloAttachment {
    id: String,
    #[serde(default)]
    name: Option<String>,
    url: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
}

/// Decodes a Trello webhook body.
///
/// Returns `Ok(None)` for action types that are not reconciled, for
/// `updateCard` actions that are not list moves, and for attachment actions
/// without a download URL (links rather than uploads).
pub fn decode_card_event(body: &[u8]) -> Result<Option<CardEvent>, serde_json::Error> {
    let webhook: TrelloWebhook = serde_json::from_slice(body)?;
    let action = webhook.action;
    let Some(card) = action.data.card else {
        return Ok(None);
    };

    let event = match action.action_type.as_str() {
        "createCard" => Some(CardEvent::CreateCard(CreateCardEvent {
            card_id: card.id,
            list_name: action.data.list.and_then(|l| l.name),
        })),
        "updateCard" => action.data.list_after.map(|after| {
            CardEvent::UpdateCard(UpdateCardEvent {
                card_id: card.id,
                list_after_id: after.id,
                list_after_name: after.name,
            })
        }),
        "addAttachmentToCard" => action.data.attachment.and_then(|a| {
            let url = a.url?;
            Some(CardEvent::AddAttachmentToCard(AddAttachmentEvent {
                card_id: card.id,
                name: a.name.unwrap_or_else(|| a.id.clone()),
                attachment_id: a.id,
                url,
                mime_type: a.mime_type.filter(|m| !m.is_empty()),
            }))
        }),
        _ => None,
    };
    Ok(event)
}

// ═══════════════════════════════════════════════════════════════════════
// SNS / SES
// ═══════════════════════════════════════════════════════════════════════

/// Outer SNS HTTP delivery.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnsEnvelope {
    #[serde(rename = "Type")]
    pub message_type: String,
    pub message_id: String,
    #[serde(default)]
    pub token: Option<String>,
    pub topic_arn: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub message: String,
    #[serde(rename = "SubscribeURL", default)]
    pub subscribe_url: Option<String>,
    pub timestamp: String,
    #[serde(default = "default_signature_version")]
    pub signature_version: String,
    pub signature: String,
    #[serde(rename = "SigningCertURL")]
    pub signing_cert_url: String,
}

fn default_signature_version() -> String {
    "1".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnsMessageKind {
    Notification,
    SubscriptionConfirmation,
    UnsubscribeConfirmation,
    Unknown,
}

impl SnsEnvelope {
    pub fn kind(&self) -> SnsMessageKind {
        match self.message_type.as_str() {
            "Notification" => SnsMessageKind::Notification,
            "SubscriptionConfirmation" => SnsMessageKind::SubscriptionConfirmation,
            "UnsubscribeConfirmation" => SnsMessageKind::UnsubscribeConfirmation,
            _ => SnsMessageKind::Unknown,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesNotification {
    #[serde(default)]
    notification_type: Option<String>,
    #[serde(default)]
    event_type: Option<String>,
    mail: SesMail,
    #[serde(default)]
    receipt: Option<SesReceipt>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesMail {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    destination: Vec<String>,
    #[serde(default)]
    common_headers: Option<SesCommonHeaders>,
}

#[derive(Debug, Deserialize)]
struct SesCommonHeaders {
    #[serde(default)]
    from: Vec<String>,
    #[serde(default)]
    to: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SesReceipt {
    #[serde(default)]
    recipients: Vec<String>,
    #[serde(default)]
    action: Option<SesAction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesAction {
    #[serde(rename = "type")]
    action_type: String,
    #[serde(default)]
    bucket_name: Option<String>,
    #[serde(default)]
    object_key: Option<String>,
}

/// Where SES stored the raw message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEmail {
    pub bucket: String,
    pub key: String,
}

/// An inbound email the reconciler may thread onto a repair.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEmailEvent {
    /// Receipt recipients first, then envelope destinations, then `To` headers.
    pub recipients: Vec<String>,
    /// `From` header or envelope source as reported by SES.
    pub sender: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub stored: Option<StoredEmail>,
}

/// Decodes the SNS `Message` of an SES receipt notification.
///
/// Returns `Ok(None)` when the notification is not a received-mail event.
pub fn decode_inbound_email(
    message: &str,
) -> Result<Option<InboundEmailEvent>, serde_json::Error> {
    let ses: SesNotification = serde_json::from_str(message)?;
    let kind = ses
        .event_type
        .as_deref()
        .or(ses.notification_type.as_deref())
        .unwrap_or_default();
    if !kind.eq_ignore_ascii_case("received") {
        return Ok(None);
    }

    let mut recipients = Vec::new();
    let headers = ses.mail.common_headers;
    if let Some(receipt) = &ses.receipt {
        recipients.extend(receipt.recipients.iter().cloned());
    }
    recipients.extend(ses.mail.destination.iter().cloned());
    if let Some(h) = &headers {
        recipients.extend(h.to.iter().cloned());
    }

    let sender = headers
        .and_then(|h| h.from.into_iter().next())
        .or(ses.mail.source);

    let received_at = ses
        .mail
        .timestamp
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let stored = ses
        .receipt
        .and_then(|r| r.action)
        .filter(|a| a.action_type.eq_ignore_ascii_case("s3"))
        .and_then(|a| {
            Some(StoredEmail {
                bucket: a.bucket_name?,
                key: a.object_key?,
            })
        });

    Ok(Some(InboundEmailEvent {
        recipients,
        sender,
        received_at,
        stored,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_card_decoded_with_list_name() {
        let body = json!({
            "action": {
                "type": "createCard",
                "data": {
                    "card": { "id": "c1", "name": "Repair #5 - Ann Lee" },
                    "list": { "id": "l1", "name": "Incoming Repair" }
                }
            }
        });
        let event = decode_card_event(body.to_string().as_bytes()).unwrap();
        assert_eq!(
            event,
            Some(CardEvent::CreateCard(CreateCardEvent {
                card_id: "c1".to_string(),
                list_name: Some("Incoming Repair".to_string()),
            }))
        );
    }

    #[test]
    fn update_card_without_list_move_is_ignored() {
        let body = json!({
            "action": { "type": "updateCard", "data": { "card": { "id": "c1" }, "old": { "name": "x" } } }
        });
        assert_eq!(decode_card_event(body.to_string().as_bytes()).unwrap(), None);
    }

    #[test]
    fn update_card_list_move_decoded() {
        let body = json!({
            "action": {
                "type": "updateCard",
                "data": {
                    "card": { "id": "c1" },
                    "listBefore": { "id": "l1", "name": "Smea" },
                    "listAfter": { "id": "l2", "name": "Gyula" }
                }
            }
        });
        let event = decode_card_event(body.to_string().as_bytes()).unwrap().unwrap();
        assert_eq!(event.card_id(), "c1");
        assert_eq!(event.action_type(), "updateCard");
        match event {
            CardEvent::UpdateCard(u) => {
                assert_eq!(u.list_after_id, "l2");
                assert_eq!(u.list_after_name.as_deref(), Some("Gyula"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn attachment_decoded() {
        let body = json!({
            "action": {
                "type": "addAttachmentToCard",
                "data": {
                    "card": { "id": "c1" },
                    "attachment": {
                        "id": "a1", "name": "bag.jpg",
                        "url": "https://trello.com/1/cards/c1/attachments/a1/download/bag.jpg",
                        "mimeType": "image/jpeg"
                    }
                }
            }
        });
        match decode_card_event(body.to_string().as_bytes()).unwrap() {
            Some(CardEvent::AddAttachmentToCard(a)) => {
                assert_eq!(a.name, "bag.jpg");
                assert_eq!(a.mime_type.as_deref(), Some("image/jpeg"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_action_is_none_and_garbage_is_error() {
        let body = json!({ "action": { "type": "commentCard", "data": { "card": { "id": "c1" } } } });
        assert_eq!(decode_card_event(body.to_string().as_bytes()).unwrap(), None);
        assert!(decode_card_event(b"not json").is_err());
    }

    #[test]
    fn ses_received_notification_decoded() {
        let message = json!({
            "notificationType": "Received",
            "mail": {
                "timestamp": "2024-01-02T03:04:05.000Z",
                "source": "bounce@example.com",
                "destination": ["repairs+abc123@shop.example.com"],
                "commonHeaders": {
                    "from": ["Ann Lee <ann@example.com>"],
                    "to": ["repairs+abc123@shop.example.com"]
                }
            },
            "receipt": {
                "recipients": ["repairs+abc123@shop.example.com"],
                "action": { "type": "S3", "bucketName": "mail", "objectKey": "in/xyz" }
            }
        });
        let event = decode_inbound_email(&message.to_string()).unwrap().unwrap();
        assert_eq!(event.recipients[0], "repairs+abc123@shop.example.com");
        assert_eq!(event.sender.as_deref(), Some("Ann Lee <ann@example.com>"));
        assert_eq!(
            event.stored,
            Some(StoredEmail {
                bucket: "mail".to_string(),
                key: "in/xyz".to_string()
            })
        );
        assert!(event.received_at.is_some());
    }

    #[test]
    fn ses_non_receipt_is_none() {
        let message = json!({ "eventType": "Delivery", "mail": {} });
        assert_eq!(decode_inbound_email(&message.to_string()).unwrap(), None);
    }
}
