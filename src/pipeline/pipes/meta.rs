//! Meta stage
//!
//! Stamps modification and publication timestamps (UTC epoch seconds)
//! onto nodes before they reach storage.

use chrono::Utc;
use serde_json::json;

use crate::error::Result;
use crate::pipeline::{NodeMap, Pipe};

pub struct MetaPipe;

fn utc_timestamp() -> i64 {
    Utc::now().timestamp()
}

impl Pipe for MetaPipe {
    fn set_request(&self, request: &mut NodeMap) -> Result<NodeMap> {
        for node in request.values() {
            node.update_meta(|meta| {
                meta.insert("modified_at".to_owned(), json!(utc_timestamp()));
            });
        }
        Ok(NodeMap::new())
    }

    fn publish_request(&self, request: &mut NodeMap) -> Result<NodeMap> {
        for node in request.values() {
            node.update_meta(|meta| {
                meta.insert("published_at".to_owned(), json!(utc_timestamp()));
            });
        }
        Ok(NodeMap::new())
    }
}
