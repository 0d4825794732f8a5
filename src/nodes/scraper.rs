// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

use async_trait::async_trait;

use super::{
    InputSpec, Node, NodeContext, NodeInputs, NodeSchema, NodeValue, OutputKind, OutputSpec,
};
use crate::Result;

/// Graph handle for a scrape session driven over HTTP
pub struct WebScraper;

#[async_trait]
impl Node for WebScraper {
    fn schema(&self) -> NodeSchema {
        NodeSchema {
            node_id: "WebScraper",
            display_name: "Web Image Scraper",
            category: "webscraper",
            description: "Report the state of a scrape session started from the control panel",
            inputs: vec![InputSpec::text("scraper_id", "", "Scrape session id")],
            outputs: vec![OutputSpec { name: "status", kind: OutputKind::Text }],
        }
    }

    async fn execute(&self, ctx: &NodeContext, inputs: &NodeInputs) -> Result<Vec<NodeValue>> {
        let id = inputs.text("scraper_id")?.trim();
        let line = if id.is_empty() {
            "Scraper session: none".to_string()
        } else {
            match ctx.sessions.status(id) {
                Ok(session) => format!(
                    "Scraper session: {} [{:?}] {}% {}/{} images, {}",
                    id,
                    session.status,
                    session.progress,
                    session.scraped_images,
                    session.total_images,
                    session.current_step
                ),
                Err(_) => format!("Scraper session: {} [unknown]", id),
            }
        };
        Ok(vec![NodeValue::Text(line)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::tests::context;
    use crate::nodes::NodeRegistry;
    use tempfile::TempDir;

    #[test]
    fn test_echoes_unknown_and_empty_ids() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let registry = NodeRegistry::new();

        let out =
            tokio_test::block_on(registry.run("WebScraper", &ctx, NodeInputs::new())).unwrap();
        assert_eq!(out[0].as_text(), Some("Scraper session: none"));

        let inputs = NodeInputs::new().with("scraper_id", "abc");
        let out = tokio_test::block_on(registry.run("WebScraper", &ctx, inputs)).unwrap();
        assert_eq!(out[0].as_text(), Some("Scraper session: abc [unknown]"));
    }
}
