//! Webhook authenticity checks.
//!
//! | Module | Protocol |
//! |--------|----------|
//! | [`trello`] | HMAC-SHA1 over the body, base64, `x-trello-webhook` header |
//! | [`sns`] | RSA signature by an SNS-published X.509 certificate |

pub mod sns;
pub mod trello;
