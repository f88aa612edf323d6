//! Matrix HTML → Mattermost markdown transcoding.
//!
//! This direction is a simple tag-driven rewrite rather than a full HTML
//! parser: Matrix clients only ever emit the restricted tag subset from the
//! spec (`strong`, `em`, `del`, `code`, `pre><code`, `a`, `h1`…`h6`,
//! `blockquote`, `ul/li`, `ol/li`, `p`, `br`), so a regex/scan pass over
//! that subset is sufficient and keeps this side of the converter a pure,
//! dependency-light function like its sibling.

use regex::Regex;
use std::sync::LazyLock;

use super::unescape_html;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static PRE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<pre><code(?:\s+class="language-([a-zA-Z0-9_+-]*)")?>(.*?)</code></pre>"#).unwrap());
static A_HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<a\s+href="([^"]*)"[^>]*>(.*?)</a>"#).unwrap());
static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<h([1-6])>(.*?)</h[1-6]>").unwrap());
static STRONG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<strong>(.*?)</strong>").unwrap());
static B_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<b>(.*?)</b>").unwrap());
static EM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<em>(.*?)</em>").unwrap());
static I_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<i>(.*?)</i>").unwrap());
static DEL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<del>(.*?)</del>").unwrap());
static CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<code>(.*?)</code>").unwrap());
static LI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<li>(.*?)</li>").unwrap());
static BLOCKQUOTE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<blockquote>(.*?)</blockquote>").unwrap());
static UL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<ul>(.*?)</ul>").unwrap());
static OL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<ol>(.*?)</ol>").unwrap());
static P_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<p>(.*?)</p>").unwrap());
static BR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<br\s*/?>").unwrap());

/// Convert a Matrix message body to Mattermost markdown.
///
/// When `html_body` is `None` the plain `body` is returned verbatim — the
/// spec's rule for an event with no declared HTML format. Otherwise the
/// HTML body is rewritten tag-by-tag into markdown; any tag outside the
/// recognised subset is stripped, never left dangling in the output.
///
/// Total: never panics, regardless of malformed/unbalanced HTML input.
#[must_use]
pub fn html_to_markdown(body: &str, html_body: Option<&str>) -> String {
    let Some(html) = html_body else {
        return body.to_string();
    };

    let mut out = html.to_string();

    // Fenced code blocks first, so inline substitutions below never touch
    // their contents.
    out = PRE_CODE_RE
        .replace_all(&out, |caps: &regex::Captures| {
            let lang = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let code = unescape_html(&caps[2]);
            format!("```{lang}\n{code}\n```")
        })
        .into_owned();

    out = ol_to_markdown(&out);
    out = ul_to_markdown(&out);
    out = BLOCKQUOTE_RE
        .replace_all(&out, |caps: &regex::Captures| {
            caps[1]
                .lines()
                .map(|line| format!("> {line}"))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .into_owned();

    out = HEADING_RE
        .replace_all(&out, |caps: &regex::Captures| {
            let level: usize = caps[1].parse().unwrap_or(1);
            format!("{} {}", "#".repeat(level), caps[2].trim())
        })
        .into_owned();

    out = A_HREF_RE
        .replace_all(&out, |caps: &regex::Captures| {
            format!("[{}]({})", caps[2].trim(), caps[1].trim())
        })
        .into_owned();

    out = STRONG_RE.replace_all(&out, "**$1**").into_owned();
    out = B_RE.replace_all(&out, "**$1**").into_owned();
    out = DEL_RE.replace_all(&out, "~~$1~~").into_owned();
    out = EM_RE.replace_all(&out, "_$1_").into_owned();
    out = I_RE.replace_all(&out, "_$1_").into_owned();
    out = CODE_RE.replace_all(&out, "`$1`").into_owned();

    out = P_RE.replace_all(&out, "$1\n\n").into_owned();
    out = BR_RE.replace_all(&out, "\n").into_owned();

    // Strip any remaining tag outside the recognised subset.
    out = TAG_RE.replace_all(&out, "").into_owned();

    unescape_html(out.trim().trim_end_matches('\n'))
}

fn ul_to_markdown(input: &str) -> String {
    UL_RE
        .replace_all(input, |caps: &regex::Captures| {
            LI_RE
                .replace_all(&caps[1], |item: &regex::Captures| format!("- {}\n", item[1].trim()))
                .into_owned()
        })
        .into_owned()
}

fn ol_to_markdown(input: &str) -> String {
    OL_RE
        .replace_all(input, |caps: &regex::Captures| {
            let mut counter = 0usize;
            LI_RE
                .replace_all(&caps[1], |item: &regex::Captures| {
                    counter += 1;
                    format!("{counter}. {}\n", item[1].trim())
                })
                .into_owned()
        })
        .into_owned()
}
