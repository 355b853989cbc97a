//! Content rendering.
//!
//! Turning blocks into channel markup belongs to a dedicated rendering
//! service. The pipeline only depends on [`ContentRenderer`]; the
//! [`HandlebarsRenderer`] shipped here substitutes `{{data.*}}`,
//! `{{profile.*}}` and `{{brand.*}}` into each block's text.

use crate::error::NotificationResult;
use crate::models::{Block, Channel};
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

/// Rendered output handed to a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderedContent {
    /// Subject line or title, when a block supplies one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Plain text body.
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

impl RenderedContent {
    /// Plain text content with no title or HTML part.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            title: None,
            text: text.into(),
            html: None,
        }
    }
}

/// Variables available to block templates.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub data: &'a Value,
    pub profile: &'a Value,
    pub brand: Option<&'a Value>,
}

pub trait ContentRenderer: Send + Sync {
    fn render(
        &self,
        channel: &Channel,
        blocks: &[Block],
        ctx: RenderContext<'_>,
    ) -> NotificationResult<RenderedContent>;
}

/// Block kinds whose text becomes the title instead of the body.
const TITLE_KINDS: [&str; 2] = ["title", "subject"];

#[derive(Clone)]
pub struct HandlebarsRenderer {
    handlebars: Arc<Handlebars<'static>>,
}

impl HandlebarsRenderer {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        Self {
            handlebars: Arc::new(handlebars),
        }
    }

    /// The channel's blocks in `blockIds` order, or every block when the
    /// channel lists none.
    fn select<'b>(channel: &Channel, blocks: &'b [Block]) -> Vec<&'b Block> {
        if channel.block_ids.is_empty() {
            return blocks.iter().collect();
        }
        channel
            .block_ids
            .iter()
            .filter_map(|id| blocks.iter().find(|b| &b.id == id))
            .collect()
    }
}

impl Default for HandlebarsRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentRenderer for HandlebarsRenderer {
    fn render(
        &self,
        channel: &Channel,
        blocks: &[Block],
        ctx: RenderContext<'_>,
    ) -> NotificationResult<RenderedContent> {
        let vars = json!({
            "data": ctx.data,
            "profile": ctx.profile,
            "brand": ctx.brand,
        });

        let mut title = None;
        let mut paragraphs = Vec::new();
        for block in Self::select(channel, blocks) {
            let rendered = self.handlebars.render_template(&block.content, &vars)?;
            if TITLE_KINDS.contains(&block.kind.as_str()) {
                title.get_or_insert(rendered);
            } else if !rendered.trim().is_empty() {
                paragraphs.push(rendered);
            }
        }

        debug!(
            channel = %channel.id,
            blocks = paragraphs.len(),
            "Rendered channel content"
        );

        let html = (!paragraphs.is_empty()).then(|| {
            paragraphs
                .iter()
                .map(|p| format!("<p>{}</p>", handlebars::html_escape(p)))
                .collect::<Vec<_>>()
                .join("\n")
        });

        Ok(RenderedContent {
            title,
            text: paragraphs.join("\n\n"),
            html,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: &str, kind: &str, content: &str) -> Block {
        Block {
            id: id.into(),
            kind: kind.into(),
            content: content.into(),
        }
    }

    #[test]
    fn test_renders_channel_blocks_in_order() {
        let blocks = vec![
            block("b1", "text", "Hello {{profile.name}}"),
            block("b2", "subject", "Order {{data.order_id}} shipped"),
            block("b3", "text", "Unused"),
            block("b4", "text", "Total: {{data.total}}"),
        ];
        let channel = Channel {
            id: "ch-email".into(),
            taxonomy: "email:*".into(),
            block_ids: vec!["b2".into(), "b1".into(), "b4".into()],
            ..Default::default()
        };
        let data = json!({ "order_id": "A-17", "total": 42 });
        let profile = json!({ "name": "Jane" });

        let content = HandlebarsRenderer::new()
            .render(
                &channel,
                &blocks,
                RenderContext {
                    data: &data,
                    profile: &profile,
                    brand: None,
                },
            )
            .unwrap();

        assert_eq!(content.title.as_deref(), Some("Order A-17 shipped"));
        assert_eq!(content.text, "Hello Jane\n\nTotal: 42");
        assert_eq!(
            content.html.as_deref(),
            Some("<p>Hello Jane</p>\n<p>Total: 42</p>")
        );
    }

    #[test]
    fn test_text_is_not_escaped_but_html_is() {
        let blocks = vec![block("b1", "text", "{{data.snippet}}")];
        let data = json!({ "snippet": "a < b & c" });
        let content = HandlebarsRenderer::new()
            .render(
                &Channel::default(),
                &blocks,
                RenderContext {
                    data: &data,
                    profile: &Value::Null,
                    brand: None,
                },
            )
            .unwrap();

        assert_eq!(content.text, "a < b & c");
        assert_eq!(content.html.as_deref(), Some("<p>a &lt; b &amp; c</p>"));
    }

    #[test]
    fn test_missing_variables_render_empty() {
        let blocks = vec![block("b1", "text", "Hi {{profile.nickname}}!")];
        let content = HandlebarsRenderer::new()
            .render(
                &Channel::default(),
                &blocks,
                RenderContext {
                    data: &Value::Null,
                    profile: &json!({}),
                    brand: None,
                },
            )
            .unwrap();
        assert_eq!(content.text, "Hi !");
    }

    #[test]
    fn test_malformed_template_is_an_error() {
        let blocks = vec![block("b1", "text", "{{#if}}")];
        let result = HandlebarsRenderer::new().render(
            &Channel::default(),
            &blocks,
            RenderContext {
                data: &Value::Null,
                profile: &Value::Null,
                brand: None,
            },
        );
        assert!(matches!(result, Err(crate::error::NotificationError::Template(_))));
    }
}
