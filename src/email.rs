//! Inbound email handling: MIME parsing, HTML flattening, quoted-history
//! stripping, and plus-address routing.
//!
//! Stripping is a heuristic. Missing a quote boundary leaves history in the
//! message; cutting everything away is guarded by falling back to the full
//! body.

use anyhow::{Context, Result};
use mailparse::{addrparse, DispositionType, MailAddr, MailHeaderMap, ParsedMail};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::InboundMessage;

/// Quote boundaries, tried in order. The first one that leaves reply text
/// above it truncates the body.
static QUOTE_BOUNDARIES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // "On Mon, Jan 1, 2024 at 3:00 PM John <j@x.com> wrote:"
        r"(?m)^[ \t]*On\b[^\n]*\bwrote:[ \t]*$",
        // the same header wrapped once; the first line must carry a date or "<"
        r"(?m)^[ \t]*On\b[^\n]*[0-9<][^\n]*\n[^\n]*\bwrote:[ \t]*$",
        // both "-----Original Message-----" and "-------- Original Message --------"
        r"(?mi)^[ \t]*-{5,}[ \t]*Original Message[ \t]*-{5,}",
        r"(?m)^[ \t]*From:[ \t]",
        r"(?mi)^[ \t]*Begin forwarded message:",
        r"(?m)^[ \t]*>",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

static HTML_DROP_BLOCKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style|head)\b[^>]*>.*?</(script|style|head)\s*>")
        .expect("static regex")
});
static HTML_LINE_BREAKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</(p|div|li|tr|h[1-6]|blockquote)\s*>").expect("static regex")
});
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"));
static INLINE_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\u{A0}]+").expect("static regex"));
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("static regex"));

/// Returns the reply text that precedes any quoted history.
///
/// When no boundary is present the body comes back unchanged; when the cut
/// would leave nothing, the whole body is kept.
pub fn strip_quoted_history(body: &str) -> String {
    let mut quoted_from_start = false;
    for boundary in QUOTE_BOUNDARIES.iter() {
        if let Some(m) = boundary.find(body) {
            let kept = body[..m.start()].trim();
            if !kept.is_empty() {
                return kept.to_string();
            }
            quoted_from_start = true;
        }
    }
    if quoted_from_start {
        body.trim().to_string()
    } else {
        body.to_string()
    }
}

/// Flattens HTML to text: drops script/style, maps block ends to newlines,
/// strips tags, decodes common entities, and normalizes whitespace.
pub fn html_to_text(html: &str) -> String {
    let without_blocks = HTML_DROP_BLOCKS.replace_all(html, "");
    let with_breaks = HTML_LINE_BREAKS.replace_all(&without_blocks, "\n");
    let without_tags = HTML_TAG.replace_all(&with_breaks, "");
    let decoded = decode_entities(&without_tags);

    let lines: Vec<String> = decoded
        .replace("\r\n", "\n")
        .split('\n')
        .map(|line| INLINE_SPACE.replace_all(line, " ").trim().to_string())
        .collect();
    BLANK_LINES
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// A parsed email reduced to what reconciliation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEmail {
    /// Bare address from the `From` header, or the raw header when unparseable.
    pub from: String,
    pub subject: Option<String>,
    /// Plain-text body, or flattened HTML when no text part exists.
    pub body: String,
}

impl ParsedEmail {
    /// Reply text with quoted history removed.
    pub fn into_inbound_message(self) -> InboundMessage {
        InboundMessage {
            message: strip_quoted_history(&self.body),
            from: self.from,
        }
    }
}

/// Parses raw RFC 822 bytes, preferring `text/plain` over `text/html`.
pub fn parse_email(raw: &[u8]) -> Result<ParsedEmail> {
    let mail = mailparse::parse_mail(raw).context("Failed to parse email MIME structure")?;

    let from_header = mail.headers.get_first_value("From").unwrap_or_default();
    let subject = mail.headers.get_first_value("Subject");

    let mut plain = None;
    let mut html = None;
    collect_bodies(&mail, &mut plain, &mut html)?;

    let body = match (plain, html) {
        (Some(text), _) => text.replace("\r\n", "\n"),
        (None, Some(markup)) => html_to_text(&markup),
        (None, None) => String::new(),
    };

    Ok(ParsedEmail {
        from: sender_address(&from_header),
        subject,
        body,
    })
}

/// Depth-first walk keeping the first inline text/plain and text/html parts.
fn collect_bodies(
    part: &ParsedMail<'_>,
    plain: &mut Option<String>,
    html: &mut Option<String>,
) -> Result<()> {
    if part.subparts.is_empty() {
        if part.get_content_disposition().disposition == DispositionType::Attachment {
            return Ok(());
        }
        match part.ctype.mimetype.to_ascii_lowercase().as_str() {
            "text/plain" if plain.is_none() => *plain = Some(part.get_body()?),
            "text/html" if html.is_none() => *html = Some(part.get_body()?),
            _ => {}
        }
        return Ok(());
    }
    for sub in &part.subparts {
        collect_bodies(sub, plain, html)?;
    }
    Ok(())
}

/// Reduces `"Ann Lee" <ann@example.com>` to `ann@example.com`.
pub fn sender_address(header_value: &str) -> String {
    let trimmed = header_value.trim();
    match addrparse(trimmed) {
        Ok(list) => list
            .iter()
            .find_map(|addr| match addr {
                MailAddr::Single(info) => Some(info.addr.clone()),
                MailAddr::Group(group) => group.addrs.first().map(|a| a.addr.clone()),
            })
            .unwrap_or_else(|| trimmed.to_string()),
        Err(_) => trimmed.to_string(),
    }
}

/// Finds `<mailbox>+<id>@…` among recipients and returns the id.
///
/// Recipients may be bare addresses or `Name <addr>` forms; the mailbox
/// comparison ignores case, the id is returned verbatim.
pub fn repair_id_from_recipients<S: AsRef<str>>(
    recipients: &[S],
    mailbox: &str,
) -> Option<String> {
    let pattern = Regex::new(&format!(
        r"(?i)(?:^|[\s<,;:]){}\+([A-Za-z0-9_-]+)@",
        regex::escape(mailbox)
    ))
    .ok()?;
    recipients.iter().find_map(|r| {
        pattern
            .captures(r.as_ref())
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}
