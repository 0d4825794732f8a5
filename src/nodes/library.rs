// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Library lookup nodes

use async_trait::async_trait;
use tracing::{info, warn};

use super::{
    InputSpec, Node, NodeContext, NodeInputs, NodeSchema, NodeValue, OutputKind, OutputSpec,
};
use crate::db::{ImageQuery, ImageRecord};
use crate::library::{existing_files, select, SelectionMode};
use crate::video::{blank_frame, frame_from_image, FrameBatch};
use crate::Result;

/// Edge of the placeholder frame emitted when nothing can be loaded
pub const PLACEHOLDER_SIZE: u32 = 512;

fn filter_inputs() -> Vec<InputSpec> {
    vec![
        InputSpec::text("category", "", "Filter by category. Leave empty for all categories."),
        InputSpec::text("search_query", "", "Substring of the filename or any tag"),
        InputSpec::text(
            "machine_name",
            "",
            "Filter by machine name. Leave empty for all machines.",
        ),
    ]
}

fn query_from(inputs: &NodeInputs) -> Result<ImageQuery> {
    Ok(ImageQuery {
        category: Some(inputs.text("category")?.to_string()),
        search_query: Some(inputs.text("search_query")?.trim().to_string()),
        machine_name: Some(inputs.text("machine_name")?.to_string()),
        min_width: None,
        min_height: None,
        limit: Some(inputs.count("max_results")?),
    })
}

fn load_records(records: &[ImageRecord]) -> FrameBatch {
    let mut frames = Vec::with_capacity(records.len());
    for record in records {
        match image::open(&record.path) {
            Ok(img) => {
                info!("Loaded image: {} ({}x{})", record.filename, img.width(), img.height());
                frames.push(frame_from_image(img));
            }
            Err(e) => warn!("Error loading image {}: {}", record.path, e),
        }
    }
    frames
}

/// Load one or more images chosen from the library
pub struct LoadImageFromLibrary;

#[async_trait]
impl Node for LoadImageFromLibrary {
    fn schema(&self) -> NodeSchema {
        let mut inputs = filter_inputs();
        inputs.extend([
            InputSpec::int("min_width", 0, 0, 8192, "Minimum image width in pixels"),
            InputSpec::int("min_height", 0, 0, 8192, "Minimum image height in pixels"),
            InputSpec::int("max_results", 100, 1, 1000, "Pool size searched before selection"),
            InputSpec::int("count", 1, 1, 64, "Number of images to emit"),
            InputSpec::int(
                "image_index",
                0,
                0,
                999,
                "Index into the pool for 'index' mode, wrapping around",
            ),
            InputSpec::int("seed", 0, 0, u32::MAX as i64, "Seed for 'random' mode"),
            InputSpec::choice(
                "selection_mode",
                &["index", "random", "first", "all"],
                "random",
                "How the pool is reduced to `count` images",
            ),
        ]);
        NodeSchema {
            node_id: "LoadImageFromLibrary",
            display_name: "Load Image from Library",
            category: "webscraper",
            description: "Load images from the library by category, keywords and machine name",
            inputs,
            outputs: vec![OutputSpec { name: "images", kind: OutputKind::Images }],
        }
    }

    async fn execute(&self, ctx: &NodeContext, inputs: &NodeInputs) -> Result<Vec<NodeValue>> {
        let mut query = query_from(inputs)?;
        query.min_width = u32::try_from(inputs.int("min_width")?).ok();
        query.min_height = u32::try_from(inputs.int("min_height")?).ok();

        let mode = SelectionMode::from_parts(
            inputs.text("selection_mode")?,
            u64::try_from(inputs.int("seed")?).ok(),
            Some(inputs.count("image_index")?),
        )?;
        let count = inputs.count("count")?;

        let pool = existing_files(ctx.library.search(&query)?);
        info!("Found {} usable images matching criteria", pool.len());
        let frames = load_records(&select(pool, mode, count));

        if frames.is_empty() {
            warn!("No images found matching the search criteria, emitting a blank frame");
            let blank = blank_frame(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE);
            return Ok(vec![NodeValue::Images(vec![blank])]);
        }
        Ok(vec![NodeValue::Images(frames)])
    }
}

/// Search the library and emit the metadata as JSON
pub struct SearchImageLibrary;

#[async_trait]
impl Node for SearchImageLibrary {
    fn schema(&self) -> NodeSchema {
        let mut inputs = filter_inputs();
        inputs.push(InputSpec::int(
            "max_results",
            20,
            1,
            100,
            "Maximum number of results to return",
        ));
        NodeSchema {
            node_id: "SearchImageLibrary",
            display_name: "Search Image Library",
            category: "webscraper",
            description: "Preview which library images match a set of filters",
            inputs,
            outputs: vec![OutputSpec { name: "results", kind: OutputKind::Text }],
        }
    }

    async fn execute(&self, ctx: &NodeContext, inputs: &NodeInputs) -> Result<Vec<NodeValue>> {
        let records = ctx.library.search(&query_from(inputs)?)?;
        info!("Found {} images matching search criteria", records.len());
        Ok(vec![NodeValue::Text(serde_json::to_string_pretty(&records)?)])
    }
}
