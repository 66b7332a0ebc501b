//! Compliance block — sender identity, postal address, unsubscribe link.
//!
//! Stamped onto every message regardless of how the body was produced.

use uuid::Uuid;

use super::message::{Message, content_fingerprint};
use crate::config::ComplianceConfig;

const LISTED_NOTICE: &str =
    "You received this email because your business information is publicly listed.";

/// Fresh token for one message. Never reused.
pub fn new_unsubscribe_token() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn unsubscribe_url(base: &str, token: &str) -> String {
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{base}{sep}token={token}")
}

/// Minimal HTML escaping for generated text.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Paragraphs split on blank lines, single newlines kept as `<br>`.
pub fn format_html(body: &str) -> String {
    body.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("<p>{}</p>", escape_html(p).replace('\n', "<br>")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn footer_text(config: &ComplianceConfig, url: &str) -> String {
    format!(
        "\n\n---\n{} <{}>\n{}\n\n{}\nUnsubscribe: {}\n",
        config.sender_name, config.sender_email, config.business_address, LISTED_NOTICE, url
    )
}

fn footer_html(config: &ComplianceConfig, url: &str) -> String {
    format!(
        "\n<hr>\n<p style=\"font-size:12px;color:#666\"><strong>{}</strong> &lt;{}&gt;<br>{}<br><br>{} <a href=\"{}\">Unsubscribe</a> from future emails.</p>",
        escape_html(&config.sender_name),
        escape_html(&config.sender_email),
        escape_html(&config.business_address),
        LISTED_NOTICE,
        escape_html(url)
    )
}

/// Build `(html, text)` bodies with the compliance block appended.
pub fn stamp(body: &str, config: &ComplianceConfig, url: &str) -> (String, String) {
    let body = body.trim();
    let html = format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"UTF-8\"></head><body>\n{}{}\n</body></html>",
        format_html(body),
        footer_html(config, url)
    );
    let text = format!("{}{}", body, footer_text(config, url));
    (html, text)
}

/// Rebuild a message around an edited body. Keeps the original token so
/// the link already registered for the contact stays valid.
pub fn restamp(message: &Message, subject: &str, body: &str, config: &ComplianceConfig) -> Message {
    let (html_body, text_body) = stamp(body, config, &message.unsubscribe_url);
    Message {
        subject: subject.to_string(),
        content_hash: content_fingerprint(subject, &html_body, &text_body),
        html_body,
        text_body,
        ..message.clone()
    }
}

/// Both bodies carry the unsubscribe link and the postal address.
pub fn is_stamped(html: &str, text: &str, config: &ComplianceConfig, url: &str) -> bool {
    text.contains(url)
        && html.contains(&escape_html(url))
        && text.contains(&config.business_address)
}
