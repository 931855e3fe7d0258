//! HTML sanitizing, Markdown rendering and the fixed cleanup pass

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::error::{GmailError, Result};
use crate::models::{ExtractedContent, NormalizedContent};

/// Strips active content from an html body
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, html: &str) -> Result<String>;
}

/// Converts html to Markdown
pub trait MarkdownRenderer: Send + Sync {
    fn render(&self, html: &str, base_url: Option<&str>, include_images: bool) -> Result<String>;
}

static SCRIPT_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<script\b").unwrap());

static SCRIPT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap());

static STYLE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap());

static STYLESHEET_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<link\b[^>]*\bstylesheet\b[^>]*>"#).unwrap());

static OPEN_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"<([A-Za-z][A-Za-z0-9-]*)((?:\s+[^\s=>/"']+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>"']+))?)*)\s*(/?)>"#,
    )
    .unwrap()
});

static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\s+([^\s=>/"']+)(?:\s*=\s*("[^"]*"|'[^']*'|[^\s>"']+))?"#).unwrap()
});

const URL_ATTRIBUTES: [&str; 4] = ["href", "src", "action", "formaction"];

/// Whether an attribute carries styling, an event handler or a script URL
fn is_active_attribute(name: &str, value: Option<&str>) -> bool {
    let name = name.to_ascii_lowercase();
    if name == "style" || name.starts_with("on") {
        return true;
    }
    if !URL_ATTRIBUTES.contains(&name.as_str()) {
        return false;
    }
    value
        .map(|v| v.trim_matches(|c| c == '"' || c == '\''))
        .map(|v| v.trim_start().to_ascii_lowercase().starts_with("javascript:"))
        .unwrap_or(false)
}

/// Rebuild an open tag keeping only its passive attributes
fn clean_open_tag(caps: &Captures) -> String {
    let mut tag = format!("<{}", &caps[1]);
    for attr in ATTRIBUTE.captures_iter(&caps[2]) {
        let value = attr.get(2).map(|m| m.as_str());
        if !is_active_attribute(&attr[1], value) {
            tag.push_str(&attr[0]);
        }
    }
    tag.push_str(&caps[3]);
    tag.push('>');
    tag
}

/// Regex based sanitizer
///
/// Removes `<script>` and `<style>` blocks, stylesheet links, inline `style`
/// and `on*` attributes, and `javascript:` URLs. An unterminated `<script`
/// block is an error, the caller decides what to do with the raw html.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptStyleSanitizer;

impl Sanitizer for ScriptStyleSanitizer {
    fn sanitize(&self, html: &str) -> Result<String> {
        let without_scripts = SCRIPT_BLOCK.replace_all(html, "");
        if SCRIPT_OPEN.is_match(&without_scripts) {
            return Err(GmailError::Sanitize(
                "unterminated <script> element".to_string(),
            ));
        }

        let without_styles = STYLE_BLOCK.replace_all(&without_scripts, "");
        let without_links = STYLESHEET_LINK.replace_all(&without_styles, "");

        let cleaned = OPEN_TAG.replace_all(&without_links, clean_open_tag);

        Ok(cleaned.into_owned())
    }
}

static LINK_TARGET: Lazy<Regex> = Lazy::new(|| Regex::new(r"\]\(([^)\s]+)").unwrap());

static URL_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").unwrap());

/// Markdown through `htmd`; never wraps lines
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmdRenderer;

impl MarkdownRenderer for HtmdRenderer {
    fn render(&self, html: &str, base_url: Option<&str>, include_images: bool) -> Result<String> {
        let mut skip = vec!["script", "style", "head"];
        if !include_images {
            skip.push("img");
        }

        let converter = htmd::HtmlToMarkdown::builder().skip_tags(skip).build();
        let markdown = converter
            .convert(html)
            .map_err(|e| GmailError::Render(e.to_string()))?;

        Ok(match base_url {
            Some(base) => resolve_links(&markdown, base),
            None => markdown,
        })
    }
}

/// Prefix relative link targets with `base`
pub fn resolve_links(markdown: &str, base: &str) -> String {
    let base = base.trim_end_matches('/');
    LINK_TARGET
        .replace_all(markdown, |caps: &Captures| {
            let target = &caps[1];
            if URL_SCHEME.is_match(target) || target.starts_with('#') || target.starts_with("//")
            {
                caps[0].to_string()
            } else if let Some(path) = target.strip_prefix('/') {
                format!("]({}/{}", base, path)
            } else {
                format!("]({}/{}", base, target)
            }
        })
        .into_owned()
}

static DASH_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{3,}").unwrap());

/// Fixed cleanup applied to every rendered body
///
/// Drops every `|`, every run of three or more `-`, and every non-overlapping
/// run of three spaces. This is lossy for tables and rules.
pub fn normalize_markdown(markdown: &str) -> String {
    let without_pipes = markdown.replace('|', "");
    let without_rules = DASH_RUN.replace_all(&without_pipes, "");
    without_rules.replace("   ", "")
}

static LIST_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([-*+])\s+").unwrap());

/// Optional readability pass over rendered Markdown
pub fn tidy_markdown(markdown: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut prev_blank = false;
    let mut in_code = false;

    for raw in markdown.lines() {
        let line = raw.trim_end();
        let blank = line.trim().is_empty();

        if line.trim_start().starts_with("```") {
            if !in_code && !prev_blank && !lines.is_empty() {
                lines.push(String::new());
            }
            lines.push(line.trim_start().to_string());
            in_code = !in_code;
            prev_blank = false;
            if !in_code {
                lines.push(String::new());
                prev_blank = true;
            }
            continue;
        }

        if in_code {
            lines.push(line.to_string());
            continue;
        }

        if blank {
            if !prev_blank {
                lines.push(String::new());
            }
            prev_blank = true;
            continue;
        }
        prev_blank = false;

        if line.starts_with('#') {
            let rest = line.trim_start_matches('#');
            let level = line.len() - rest.len();
            lines.push(format!("{} {}", "#".repeat(level), rest.trim()));
        } else if LIST_MARKER.is_match(line) {
            lines.push(LIST_MARKER.replace(line, "$1 ").into_owned());
        } else {
            lines.push(line.to_string());
        }
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Turns extracted bodies into the html and Markdown that get persisted
pub struct ContentNormalizer {
    sanitizer: Box<dyn Sanitizer>,
    renderer: Box<dyn MarkdownRenderer>,
    base_url: Option<String>,
    tidy: bool,
}

impl Default for ContentNormalizer {
    fn default() -> Self {
        Self::new(Box::new(ScriptStyleSanitizer), Box::new(HtmdRenderer))
    }
}

impl ContentNormalizer {
    pub fn new(sanitizer: Box<dyn Sanitizer>, renderer: Box<dyn MarkdownRenderer>) -> Self {
        Self {
            sanitizer,
            renderer,
            base_url: None,
            tidy: false,
        }
    }

    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_tidy(mut self, tidy: bool) -> Self {
        self.tidy = tidy;
        self
    }

    /// Html wins over plain text when both are present
    pub fn normalize(&self, content: &ExtractedContent) -> Result<NormalizedContent> {
        if let Some(html) = content.html.as_deref() {
            let clean_html = match self.sanitizer.sanitize(html) {
                Ok(clean) => clean,
                Err(e) => {
                    warn!("Sanitizer failed, rendering original html: {}", e);
                    html.to_string()
                }
            };

            let rendered = self
                .renderer
                .render(&clean_html, self.base_url.as_deref(), false)?;
            let mut markdown = normalize_markdown(&rendered);
            if self.tidy {
                markdown = tidy_markdown(&markdown);
            }

            return Ok(NormalizedContent {
                clean_html: Some(clean_html),
                clean_markdown: Some(markdown),
            });
        }

        if let Some(plain) = content.plain.as_deref() {
            debug!("No html body, using plain text as Markdown");
            return Ok(NormalizedContent {
                clean_html: None,
                clean_markdown: Some(plain.to_string()),
            });
        }

        Ok(NormalizedContent::default())
    }
}
