//! MIME tree walk: isolates the plain and html bodies and lists attachments

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use tracing::{debug, trace};

use crate::error::{GmailError, Result};
use crate::models::{AttachmentRef, ExtractedContent, LeafBody, PayloadNode};

/// Filename recorded for attachment parts that carry none
pub const UNNAMED_ATTACHMENT: &str = "unnamed_attachment";

/// Gmail's base64url, with or without trailing padding
const GMAIL_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextSlot {
    Plain,
    Html,
}

impl TextSlot {
    fn for_mime(mime_type: &str) -> Option<Self> {
        if mime_type.eq_ignore_ascii_case("text/plain") {
            Some(TextSlot::Plain)
        } else if mime_type.eq_ignore_ascii_case("text/html") {
            Some(TextSlot::Html)
        } else {
            None
        }
    }
}

fn is_attachment_type(mime_type: &str) -> bool {
    let lower = mime_type.to_ascii_lowercase();
    lower.starts_with("application/") || lower.starts_with("image/")
}

/// Pre-order visitor over a message payload
///
/// The first plain and the first html leaf win; later ones of the same type
/// are dropped. Attachments are recorded but never decoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct MimeExtractor;

impl MimeExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, payload: &PayloadNode) -> Result<ExtractedContent> {
        match payload {
            // Gmail sends `parts: []` with the body on the part itself
            PayloadNode::Container {
                mime_type,
                body,
                children,
            } if children.is_empty() => {
                self.visit_leaf(mime_type, None, body, ExtractedContent::default())
            }
            node => self.visit(node, ExtractedContent::default()),
        }
    }

    fn visit(&self, node: &PayloadNode, acc: ExtractedContent) -> Result<ExtractedContent> {
        match node {
            PayloadNode::Container {
                mime_type,
                children,
                ..
            } => {
                trace!("Entering {} with {} children", mime_type, children.len());
                children
                    .iter()
                    .try_fold(acc, |acc, child| self.visit(child, acc))
            }
            PayloadNode::Leaf {
                mime_type,
                filename,
                body,
            } => self.visit_leaf(mime_type, filename.as_deref(), body, acc),
        }
    }

    fn visit_leaf(
        &self,
        mime_type: &str,
        filename: Option<&str>,
        body: &LeafBody,
        mut acc: ExtractedContent,
    ) -> Result<ExtractedContent> {
        if is_attachment_type(mime_type) {
            acc.attachments.push(AttachmentRef {
                filename: filename
                    .filter(|f| !f.is_empty())
                    .unwrap_or(UNNAMED_ATTACHMENT)
                    .to_string(),
                mime_type: mime_type.to_string(),
                reference_id: match body {
                    LeafBody::Attachment(id) => Some(id.clone()),
                    _ => None,
                },
            });
            return Ok(acc);
        }

        let Some(slot) = TextSlot::for_mime(mime_type) else {
            trace!("Ignoring {} part", mime_type);
            return Ok(acc);
        };

        let data = match body {
            LeafBody::Inline(data) => data,
            LeafBody::Attachment(_) => {
                debug!("Skipping {} part stored as an attachment", mime_type);
                return Ok(acc);
            }
            LeafBody::Empty => return Ok(acc),
        };

        let target = match slot {
            TextSlot::Plain => &mut acc.plain,
            TextSlot::Html => &mut acc.html,
        };
        if target.is_some() {
            trace!("Discarding later {} part", mime_type);
            return Ok(acc);
        }

        let text = decode_text(mime_type, data)?;
        if !text.is_empty() {
            *target = Some(text);
        }
        Ok(acc)
    }
}

/// base64url then UTF-8
pub fn decode_text(mime_type: &str, data: &str) -> Result<String> {
    let cleaned: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    let bytes = GMAIL_BASE64
        .decode(cleaned.as_bytes())
        .map_err(|e| GmailError::Decode {
            mime_type: mime_type.to_string(),
            message: format!("base64url: {}", e),
        })?;

    String::from_utf8(bytes).map_err(|e| GmailError::Decode {
        mime_type: mime_type.to_string(),
        message: format!("utf-8: {}", e),
    })
}
