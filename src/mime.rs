//! Message body preparation
//!
//! Sanitizes HTML bodies with `ammonia` and resolves `cid:` references to
//! inline attachments as `data:` URIs so the renderer needs no network access.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::graph::MailAttachment;

/// Matches `cid:` references in `src`/`url()` positions
static CID_REFERENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)cid:([^"'\s)>]+)"#).ok());
/// `type/subtype` media type made of RFC 6838 token characters only
static MEDIA_TYPE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9!#$&^_.+-]*/[A-Za-z0-9][A-Za-z0-9!#$&^_.+-]*$").ok()
});
/// Standard base64 alphabet with optional padding
static BASE64_PAYLOAD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").ok());

/// Sanitize an HTML body for rendering
///
/// Scripts and event handlers are removed. Inline `style` attributes and
/// `<style>` blocks are kept so the document keeps its formatting, and `cid:`
/// and `data:` image sources are kept so inline images survive.
pub fn sanitize_html(html: &str) -> String {
    ammonia::Builder::default()
        .rm_clean_content_tags(["style"])
        .add_tags(["style"])
        .add_generic_attributes(["style"])
        .add_url_schemes(["cid", "data"])
        .clean(html)
        .to_string()
}

fn fully_matches(pattern: &LazyLock<Option<Regex>>, value: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(value))
}

/// `data:` URI for an attachment, if its type and bytes are safe to splice
fn data_uri(attachment: &MailAttachment) -> Option<String> {
    let bytes = attachment.content_bytes.as_deref()?.trim();
    let ctype = attachment
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream")
        .trim();
    if !fully_matches(&MEDIA_TYPE, ctype) || !fully_matches(&BASE64_PAYLOAD, bytes) {
        tracing::warn!(attachment_id = %attachment.id, "inline image not embedded: unsafe content type or payload");
        return None;
    }
    Some(format!("data:{ctype};base64,{bytes}"))
}

/// Replace `cid:<id>` references with `data:` URIs
///
/// Content ids are compared without surrounding angle brackets and
/// case-insensitively. References with no matching attachment, or whose
/// attachment carries no content bytes, are left untouched. So are
/// attachments whose content type is not a plain media type or whose bytes
/// are not base64, since both are spliced into already-sanitized markup.
pub fn inline_cid_images<'a>(html: &'a str, attachments: &[MailAttachment]) -> Cow<'a, str> {
    let Some(pattern) = CID_REFERENCE.as_ref() else {
        return Cow::Borrowed(html);
    };
    pattern.replace_all(html, |caps: &Captures<'_>| {
        let wanted = caps[1].trim_matches(['<', '>']);
        attachments
            .iter()
            .find(|a| {
                a.content_id
                    .as_deref()
                    .map(|id| id.trim_matches(['<', '>']))
                    .is_some_and(|id| id.eq_ignore_ascii_case(wanted))
            })
            .and_then(data_uri)
            .unwrap_or_else(|| caps[0].to_owned())
    })
}

/// Prepare a rich body for the renderer: sanitize, then inline images
pub fn prepare_for_render(html: &str, attachments: &[MailAttachment]) -> String {
    let sanitized = sanitize_html(html);
    inline_cid_images(&sanitized, attachments).into_owned()
}

/// Truncate string to maximum characters (Unicode-aware)
///
/// Preserves complete characters, never splitting multi-byte sequences.
pub fn truncate_chars(input: String, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input;
    }
    input.chars().take(max_chars).collect()
}
