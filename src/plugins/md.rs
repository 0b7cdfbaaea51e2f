//! Markdown plugin.

use pulldown_cmark::{Options, Parser, html};
use serde_json::Value;

use crate::error::Result;
use crate::node::Content;
use crate::plugins::Plugin;

/// Renders `.md` content to HTML.
///
/// Parser extensions are configured through the `MD` settings key, e.g.
/// `{"MD": {"EXTENSIONS": ["tables", "strikethrough"]}}`.
pub struct MarkdownPlugin;

impl MarkdownPlugin {
    fn options(&self) -> Options {
        let mut options = Options::empty();
        let plugin_settings = self.plugin_settings();
        let Some(Value::Array(extensions)) = plugin_settings.get("EXTENSIONS") else {
            return options;
        };
        for extension in extensions {
            match extension.as_str() {
                Some("tables") => options.insert(Options::ENABLE_TABLES),
                Some("footnotes") => options.insert(Options::ENABLE_FOOTNOTES),
                Some("strikethrough") => options.insert(Options::ENABLE_STRIKETHROUGH),
                Some("tasklists") => options.insert(Options::ENABLE_TASKLISTS),
                Some("smart-punctuation") => options.insert(Options::ENABLE_SMART_PUNCTUATION),
                _ => {}
            }
        }
        options
    }
}

impl Plugin for MarkdownPlugin {
    fn ext(&self) -> &'static str {
        "md"
    }

    fn render(&self, data: Value) -> Result<Content> {
        match data {
            Value::String(markdown) if !markdown.is_empty() => {
                let parser = Parser::new_ext(&markdown, self.options());
                let mut rendered = String::with_capacity(markdown.len() * 2);
                html::push_html(&mut rendered, parser);
                Ok(Content::text(rendered.trim_end_matches('\n')))
            }
            Value::Null | Value::String(_) => Ok(Content::None),
            other => Ok(Content::from_json(other)),
        }
    }
}
