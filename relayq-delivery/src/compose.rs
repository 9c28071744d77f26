//! Building the message text sent upstream.
//!
//! Content is stored exactly as the client submitted it. At delivery time
//! a client-supplied header block gets its `From` and `To` lines rewritten;
//! anything else gets a minimal header set prepended.

use chrono::{DateTime, FixedOffset};
use relayq_spool::QueuedMessage;

const CRLF: &str = "\r\n";

/// Compose the outgoing message text for `message`, sent as `sender`.
#[must_use]
pub fn compose(message: &QueuedMessage, sender: &str, date: DateTime<FixedOffset>) -> String {
    let lines = split_lines(&message.content);
    let recipients = message.envelope_recipients.join(", ");

    if has_header_block(&lines) {
        rewrite_headers(&lines, sender, &recipients).join(CRLF)
    } else {
        synthesize_headers(message, sender, &recipients, date)
    }
}

fn split_lines(content: &str) -> Vec<&str> {
    content
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect()
}

/// The header block runs up to the first blank line, or the whole content
/// when there is none.
fn header_end(lines: &[&str]) -> usize {
    lines
        .iter()
        .position(|line| line.is_empty())
        .unwrap_or(lines.len())
}

fn header_name(line: &str) -> Option<&str> {
    if line.starts_with([' ', '\t']) {
        return None;
    }

    line.split_once(':').map(|(name, _)| name.trim())
}

fn is_header(line: &str, name: &str) -> bool {
    header_name(line).is_some_and(|key| key.eq_ignore_ascii_case(name))
}

/// A `MIME-Version` or `Content-Type` line marks content the client already
/// formatted as a message.
#[must_use]
pub fn has_header_block(lines: &[&str]) -> bool {
    lines[..header_end(lines)]
        .iter()
        .any(|line| is_header(line, "mime-version") || is_header(line, "content-type"))
}

fn rewrite_headers(lines: &[&str], sender: &str, recipients: &str) -> Vec<String> {
    let end = header_end(lines);
    let mut out = Vec::with_capacity(lines.len() + 2);
    let mut from_written = false;
    let mut to_written = false;
    let mut replacing = false;

    for line in &lines[..end] {
        // Folded continuation of a header being replaced
        if replacing && line.starts_with([' ', '\t']) {
            continue;
        }
        replacing = false;

        if is_header(line, "from") {
            if !from_written {
                out.push(format!("From: {sender}"));
                from_written = true;
            }
            replacing = true;
        } else if is_header(line, "to") {
            if !to_written {
                out.push(format!("To: {recipients}"));
                to_written = true;
            }
            replacing = true;
        } else {
            out.push((*line).to_string());
        }
    }

    let mut missing = Vec::with_capacity(2);
    if !from_written {
        missing.push(format!("From: {sender}"));
    }
    if !to_written {
        missing.push(format!("To: {recipients}"));
    }

    if end == lines.len() {
        // No blank line: the missing headers go first
        missing.extend(out);
        out = missing;
    } else {
        out.extend(missing);
        out.extend(lines[end..].iter().map(|line| (*line).to_string()));
    }

    out
}

fn synthesize_headers(
    message: &QueuedMessage,
    sender: &str,
    recipients: &str,
    date: DateTime<FixedOffset>,
) -> String {
    [
        format!("From: {sender}"),
        format!("To: {recipients}"),
        format!("Subject: {}", message.subject),
        "MIME-Version: 1.0".to_string(),
        "Content-Type: text/plain; charset=\"utf-8\"".to_string(),
        "Content-Transfer-Encoding: 8bit".to_string(),
        format!("Date: {}", date.to_rfc2822()),
        String::new(),
        message.content.clone(),
    ]
    .join(CRLF)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::SystemTime;

    use pretty_assertions::assert_eq;
    use relayq_spool::{MessageId, NewMessage};

    use super::*;

    fn message(recipients: &[&str], content: &str) -> QueuedMessage {
        NewMessage {
            sender: "client@local".to_string(),
            declared_sender: None,
            recipients: recipients.iter().map(ToString::to_string).collect(),
            subject: "Hi".to_string(),
            content: content.to_string(),
        }
        .into_queued(MessageId::generate(), SystemTime::now())
    }

    fn date() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc2822("Tue, 1 Jul 2025 10:52:37 +0200").unwrap()
    }

    #[test]
    fn plain_body_gets_headers() {
        let composed = compose(&message(&["v@y"], "hello"), "relay@x", date());

        assert_eq!(
            composed,
            [
                "From: relay@x",
                "To: v@y",
                "Subject: Hi",
                "MIME-Version: 1.0",
                "Content-Type: text/plain; charset=\"utf-8\"",
                "Content-Transfer-Encoding: 8bit",
                "Date: Tue, 1 Jul 2025 10:52:37 +0200",
                "",
                "hello",
            ]
            .join("\r\n")
        );
    }

    #[test]
    fn subject_only_is_not_a_header_block() {
        let composed = compose(&message(&["v@y"], "Subject: Hi\r\n\r\nhello"), "u@x", date());

        assert!(composed.starts_with("From: u@x\r\nTo: v@y\r\nSubject: Hi\r\n"));
        assert!(composed.ends_with("\r\n\r\nSubject: Hi\r\n\r\nhello"));
    }

    #[test]
    fn existing_from_and_to_are_replaced() {
        let content = "From: someone@else\r\nTo: nobody@else\r\nMIME-Version: 1.0\r\nSubject: Hi\r\n\r\nbody";
        let composed = compose(&message(&["a@y", "b@y"], content), "relay@x", date());

        assert_eq!(
            composed,
            "From: relay@x\r\nTo: a@y, b@y\r\nMIME-Version: 1.0\r\nSubject: Hi\r\n\r\nbody"
        );
    }

    #[test]
    fn missing_headers_inserted_before_blank_line() {
        let content = "Content-Type: text/html\r\nSubject: Hi\r\n\r\n<p>hi</p>\r\nFrom: body text";
        let composed = compose(&message(&["v@y"], content), "relay@x", date());

        assert_eq!(
            composed,
            "Content-Type: text/html\r\nSubject: Hi\r\nFrom: relay@x\r\nTo: v@y\r\n\r\n<p>hi</p>\r\nFrom: body text"
        );
    }

    #[test]
    fn missing_headers_at_top_without_blank_line() {
        let composed = compose(&message(&["v@y"], "MIME-Version: 1.0"), "relay@x", date());

        assert_eq!(composed, "From: relay@x\r\nTo: v@y\r\nMIME-Version: 1.0");
    }

    #[test]
    fn folded_recipient_lines_are_dropped() {
        let content = "To: a@y,\r\n  b@y\r\nMIME-Version: 1.0\r\nX-Long: one\r\n two\r\n\r\nbody";
        let composed = compose(&message(&["v@y"], content), "relay@x", date());

        assert_eq!(
            composed,
            "To: v@y\r\nMIME-Version: 1.0\r\nX-Long: one\r\n two\r\nFrom: relay@x\r\n\r\nbody"
        );
    }

    #[test]
    fn lf_only_content_is_normalised() {
        let composed = compose(
            &message(&["v@y"], "MIME-Version: 1.0\nFrom: a@b\n\nline"),
            "relay@x",
            date(),
        );

        assert_eq!(
            composed,
            "MIME-Version: 1.0\r\nFrom: relay@x\r\nTo: v@y\r\n\r\nline"
        );
    }
}
