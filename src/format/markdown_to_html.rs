//! Markdown → Matrix HTML transcoding.
//!
//! Mirrors the line-scan-then-inline-substitution shape used for the
//! Telegram markdown dialect elsewhere in this codebase, retargeted at
//! Matrix's `formatted_body` HTML subset and hardened with a URL-scheme
//! allow-list, since here the output is trusted HTML rendered by a Matrix
//! client rather than a sandboxed bot API.

use regex::Regex;
use std::sync::LazyLock;

use super::escape_html;

/// A rendered Matrix message body, ready to attach to an `m.room.message`
/// event content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    /// The original markdown, verbatim.
    pub body: String,
    /// `Some("org.matrix.custom.html")`-equivalent marker; Matrix uses the
    /// literal string `"html"` here. `None` when no markdown was detected.
    pub format: Option<String>,
    /// Rendered HTML. `None` when no markdown was detected.
    pub formatted_body: Option<String>,
}

const FENCE_PLACEHOLDER_PREFIX: &str = "\u{0}FENCE";

static FENCED_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```([a-zA-Z0-9_+-]*)\n?(.*?)```").unwrap());
static INLINE_CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`\n]+)`").unwrap());
static BOLD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
static ITALIC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(^|[^*\w])\*([^*\n]+)\*($|[^*\w])").unwrap());
static STRIKE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"~~([^~]+)~~").unwrap());
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\(([^)]+)\)").unwrap());
static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.*)$").unwrap());
static UL_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-*]\s+(.*)$").unwrap());
static OL_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+\.\s+(.*)$").unwrap());

/// Schemes that may survive as an `<a href>`; anything else renders as
/// plain text with the anchor dropped (the security-critical step).
const ALLOWED_SCHEMES: &[&str] = &["http:", "https:", "mailto:"];

/// Convert markdown to a Matrix message body/format/formatted_body triple.
///
/// Processing order: (1) extract fenced code blocks into placeholders; (2)
/// line-scan for blockquotes, headings, and lists; (3) inline replacements
/// for code/bold/italic/strike; (4) link rewriting through the scheme
/// allow-list; (5) restore code blocks; (6) paragraph/line-break wrapping.
///
/// Total and pure: never panics, and identical input always yields
/// identical output.
#[must_use]
pub fn markdown_to_html(input: &str) -> RenderedMessage {
    let mut fences = Vec::new();
    let without_fences = extract_fenced_code(input, &mut fences);

    let mut detected = !fences.is_empty();
    let mut html_lines = Vec::new();
    let mut paragraph_buf: Vec<String> = Vec::new();
    let mut list_buf: Vec<String> = Vec::new();
    let mut list_kind: Option<ListKind> = None;

    for raw_line in without_fences.split('\n') {
        let line = raw_line.trim_end_matches('\r');

        if let Some(caps) = HEADING_RE.captures(line) {
            flush_list(&mut html_lines, &mut list_buf, &mut list_kind);
            flush_paragraph(&mut html_lines, &mut paragraph_buf);
            let level = caps[1].len();
            let text = render_inline(&caps[2], &mut detected);
            html_lines.push(format!("<h{level}>{text}</h{level}>"));
            detected = true;
            continue;
        }

        if let Some(stripped) = line.strip_prefix("> ") {
            flush_list(&mut html_lines, &mut list_buf, &mut list_kind);
            flush_paragraph(&mut html_lines, &mut paragraph_buf);
            let text = render_inline(stripped, &mut detected);
            html_lines.push(format!("<blockquote>{text}</blockquote>"));
            detected = true;
            continue;
        }

        if let Some(caps) = UL_ITEM_RE.captures(line) {
            flush_paragraph(&mut html_lines, &mut paragraph_buf);
            if list_kind != Some(ListKind::Unordered) {
                flush_list(&mut html_lines, &mut list_buf, &mut list_kind);
                list_kind = Some(ListKind::Unordered);
            }
            list_buf.push(render_inline(&caps[1], &mut detected));
            detected = true;
            continue;
        }

        if let Some(caps) = OL_ITEM_RE.captures(line) {
            flush_paragraph(&mut html_lines, &mut paragraph_buf);
            if list_kind != Some(ListKind::Ordered) {
                flush_list(&mut html_lines, &mut list_buf, &mut list_kind);
                list_kind = Some(ListKind::Ordered);
            }
            list_buf.push(render_inline(&caps[1], &mut detected));
            detected = true;
            continue;
        }

        flush_list(&mut html_lines, &mut list_buf, &mut list_kind);

        if line.trim().is_empty() {
            flush_paragraph(&mut html_lines, &mut paragraph_buf);
        } else {
            paragraph_buf.push(line.to_string());
        }
    }
    flush_list(&mut html_lines, &mut list_buf, &mut list_kind);
    flush_paragraph(&mut html_lines, &mut paragraph_buf);

    let mut body_html = html_lines.join("\n");
    body_html = restore_fenced_code(&body_html, &fences);

    if !detected {
        return RenderedMessage {
            body: input.to_string(),
            format: None,
            formatted_body: None,
        };
    }

    RenderedMessage {
        body: input.to_string(),
        format: Some("html".to_string()),
        formatted_body: Some(body_html),
    }
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum ListKind {
    Unordered,
    Ordered,
}

fn flush_list(out: &mut Vec<String>, buf: &mut Vec<String>, kind: &mut Option<ListKind>) {
    if buf.is_empty() {
        *kind = None;
        return;
    }
    let tag = match kind {
        Some(ListKind::Ordered) => "ol",
        _ => "ul",
    };
    let items: String = buf.iter().map(|item| format!("<li>{item}</li>")).collect::<Vec<_>>().join("");
    out.push(format!("<{tag}>{items}</{tag}>"));
    buf.clear();
    *kind = None;
}

fn flush_paragraph(out: &mut Vec<String>, buf: &mut Vec<String>) {
    if buf.is_empty() {
        return;
    }
    let mut rendered_any_markup = false;
    let lines: Vec<String> = buf
        .iter()
        .map(|line| render_inline(line, &mut rendered_any_markup))
        .collect();
    out.push(format!("<p>{}</p>", lines.join("<br/>")));
    buf.clear();
}

/// Apply inline substitutions in the prescribed order: code, bold, italic,
/// strike, then links (with the scheme allow-list). Escapes everything
/// else so stray `<`/`&` in plain text can't reopen a tag.
fn render_inline(line: &str, detected: &mut bool) -> String {
    if line.contains('`') || BOLD_RE.is_match(line) || ITALIC_RE.is_match(line) || STRIKE_RE.is_match(line) || LINK_RE.is_match(line) {
        *detected = true;
    }

    // Escape first so substitutions below introduce only trusted tags.
    let escaped = escape_html(line);

    let with_code = INLINE_CODE_RE.replace_all(&escaped, "<code>$1</code>");
    let with_bold = BOLD_RE.replace_all(&with_code, "<strong>$1</strong>");
    let with_italic = ITALIC_RE.replace_all(&with_bold, "$1<em>$2</em>$3");
    let with_strike = STRIKE_RE.replace_all(&with_italic, "<del>$1</del>");

    LINK_RE
        .replace_all(&with_strike, |caps: &regex::Captures| {
            let text = &caps[1];
            let url = &caps[2];
            if is_allowed_scheme(url) {
                format!("<a href=\"{url}\">{text}</a>")
            } else {
                text.to_string()
            }
        })
        .into_owned()
}

fn is_allowed_scheme(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    ALLOWED_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
}

fn extract_fenced_code(input: &str, fences: &mut Vec<(String, String)>) -> String {
    FENCED_CODE_RE
        .replace_all(input, |caps: &regex::Captures| {
            let lang = caps[1].to_string();
            let code = caps[2].trim_end_matches('\n').to_string();
            let idx = fences.len();
            fences.push((lang, code));
            format!("{FENCE_PLACEHOLDER_PREFIX}{idx}\u{0}")
        })
        .into_owned()
}

fn restore_fenced_code(input: &str, fences: &[(String, String)]) -> String {
    let mut out = input.to_string();
    for (idx, (lang, code)) in fences.iter().enumerate() {
        let placeholder = format!("{FENCE_PLACEHOLDER_PREFIX}{idx}\u{0}");
        let class_attr = if lang.is_empty() {
            String::new()
        } else {
            format!(" class=\"language-{lang}\"")
        };
        let escaped_code = escape_html(code);
        let replacement = format!("<pre><code{class_attr}>{escaped_code}</code></pre>");
        out = out.replace(&placeholder, &replacement);
    }
    // Placeholders can land inside an auto-wrapped <p> when a fence shares
    // a paragraph with plain text; unwrap a <pre> that ends up nested in a
    // stray <p>...</p> from the paragraph flush.
    out.replace("<p><pre>", "<pre>").replace("</pre></p>", "</pre>")
}
