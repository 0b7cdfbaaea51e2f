//! Plain text plugin.

use crate::plugins::Plugin;

/// Identity plugin for `.txt` content: data is the stored string.
pub struct TextPlugin;

impl Plugin for TextPlugin {
    fn ext(&self) -> &'static str {
        "txt"
    }
}
