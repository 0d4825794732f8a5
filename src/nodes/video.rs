// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Frame-blend nodes

use async_trait::async_trait;
use tracing::info;

use super::{
    InputSpec, Node, NodeContext, NodeInputs, NodeSchema, NodeValue, OutputKind, OutputSpec,
};
use crate::video::{self, BlendMode, Curve, StitchOptions};
use crate::Result;

const ALL_CURVES: &[&str] = &["linear", "ease_in_out", "cosine", "sigmoid"];

/// Optional clip slots after the two required ones
const EXTRA_CLIPS: [&str; 6] = ["video_3", "video_4", "video_5", "video_6", "video_7", "video_8"];

const OVERLAP_TOOLTIP: &str = "Frames from each clip used for the transition";

fn curve_choice() -> InputSpec {
    InputSpec::choice("interpolation_method", ALL_CURVES, "ease_in_out", "Transition curve")
}

fn stitch_options(inputs: &NodeInputs) -> Result<StitchOptions> {
    Ok(StitchOptions {
        overlap_frames: inputs.count("overlap_frames")?,
        crossfade_frames: inputs.count("crossfade_frames")?,
        interpolation_frames: inputs.count("interpolation_frames")?,
        curve: inputs.text("interpolation_method")?.parse()?,
    })
}

/// Join two clips with interpolated or crossfaded transition frames
pub struct VideoStitchInterpolator;

#[async_trait]
impl Node for VideoStitchInterpolator {
    fn schema(&self) -> NodeSchema {
        NodeSchema {
            node_id: "VideoStitchInterpolator",
            display_name: "Video Stitch Interpolator",
            category: "webscraper/video",
            description: "Stitch two clips with a smooth transition",
            inputs: vec![
                InputSpec::images("video_a", "First clip"),
                InputSpec::images("video_b", "Second clip"),
                InputSpec::int("overlap_frames", 4, 1, 30, OVERLAP_TOOLTIP),
                InputSpec::int("crossfade_frames", 8, 0, 60, "Crossfade length (0 = hard cut)"),
                InputSpec::int(
                    "interpolation_frames",
                    2,
                    0,
                    30,
                    "Generated frames between the clips (0 = none)",
                ),
                curve_choice(),
            ],
            outputs: vec![OutputSpec { name: "stitched_video", kind: OutputKind::Images }],
        }
    }

    async fn execute(&self, _ctx: &NodeContext, inputs: &NodeInputs) -> Result<Vec<NodeValue>> {
        let options = stitch_options(inputs)?;
        let a = inputs.images("video_a")?.clone();
        let b = inputs.images("video_b")?.clone();
        info!("Stitching {} + {} frames", a.len(), b.len());
        let result = video::stitch(a, b, &options);
        info!("Stitched video: {} frames", result.len());
        Ok(vec![NodeValue::Images(result)])
    }
}

/// Chain up to eight clips into one
pub struct VideoStitchMultiple;

#[async_trait]
impl Node for VideoStitchMultiple {
    fn schema(&self) -> NodeSchema {
        let mut inputs = vec![
            InputSpec::images("video_1", "First clip"),
            InputSpec::images("video_2", "Second clip"),
        ];
        inputs.extend(
            EXTRA_CLIPS
                .into_iter()
                .map(|name| InputSpec::optional_images(name, "Optional clip")),
        );
        inputs.extend([
            InputSpec::int("interpolation_frames", 4, 0, 30, "Generated frames at each transition"),
            InputSpec::int("crossfade_frames", 8, 0, 30, "Crossfade length at each transition"),
            InputSpec::int("overlap_frames", 4, 1, 20, OVERLAP_TOOLTIP),
            curve_choice(),
        ]);
        NodeSchema {
            node_id: "VideoStitchMultiple",
            display_name: "Video Stitch All",
            category: "webscraper/video",
            description: "Stitch up to 8 clips into one long video",
            inputs,
            outputs: vec![
                OutputSpec { name: "long_video", kind: OutputKind::Images },
                OutputSpec { name: "total_frames", kind: OutputKind::Int },
            ],
        }
    }

    async fn execute(&self, _ctx: &NodeContext, inputs: &NodeInputs) -> Result<Vec<NodeValue>> {
        let options = stitch_options(inputs)?;
        let mut clips = vec![inputs.images("video_1")?.clone(), inputs.images("video_2")?.clone()];
        clips.extend(
            EXTRA_CLIPS
                .iter()
                .filter_map(|name| inputs.optional_images(name))
                .filter(|clip| !clip.is_empty())
                .cloned(),
        );
        info!("Stitching {} clips", clips.len());
        let result = video::stitch_all(clips, &options)?;
        let total = result.len() as i64;
        info!("Long video complete: {} frames", total);
        Ok(vec![NodeValue::Images(result), NodeValue::Int(total)])
    }
}

/// Blend two frame sequences with a per-pixel mode
pub struct VideoFrameBlender;

#[async_trait]
impl Node for VideoFrameBlender {
    fn schema(&self) -> NodeSchema {
        let modes: Vec<&str> = BlendMode::ALL.iter().map(|m| m.name()).collect();
        NodeSchema {
            node_id: "VideoFrameBlender",
            display_name: "Video Frame Blender",
            category: "webscraper/video",
            description: "Blend two frame sequences",
            inputs: vec![
                InputSpec::images("frames_a", "First sequence"),
                InputSpec::images("frames_b", "Second sequence"),
                InputSpec::float(
                    "blend_factor",
                    0.5,
                    0.0,
                    1.0,
                    0.05,
                    "0.0 = all frames_a, 1.0 = all frames_b",
                ),
                InputSpec::choice("blend_mode", &modes, "mix", "Per-pixel combination"),
            ],
            outputs: vec![OutputSpec { name: "blended_frames", kind: OutputKind::Images }],
        }
    }

    async fn execute(&self, _ctx: &NodeContext, inputs: &NodeInputs) -> Result<Vec<NodeValue>> {
        let mode: BlendMode = inputs.text("blend_mode")?.parse()?;
        let factor = inputs.float("blend_factor")? as f32;
        let (a, b) = (inputs.images("frames_a")?, inputs.images("frames_b")?);
        let result = video::blend_batches(a, b, factor, mode);
        Ok(vec![NodeValue::Images(result)])
    }
}

/// Blend a clip's tail into its head so it loops
pub struct VideoLoopSeamless;

#[async_trait]
impl Node for VideoLoopSeamless {
    fn schema(&self) -> NodeSchema {
        NodeSchema {
            node_id: "VideoLoopSeamless",
            display_name: "Video Loop Seamless",
            category: "webscraper/video",
            description: "Make a clip loop without a visible seam",
            inputs: vec![
                InputSpec::images("video", "Clip to loop"),
                InputSpec::int("blend_frames", 8, 2, 60, "Frames blended at the seam"),
                InputSpec::choice("blend_curve", &ALL_CURVES[..3], "ease_in_out", "Blend curve"),
            ],
            outputs: vec![OutputSpec { name: "looped_video", kind: OutputKind::Images }],
        }
    }

    async fn execute(&self, _ctx: &NodeContext, inputs: &NodeInputs) -> Result<Vec<NodeValue>> {
        let curve: Curve = inputs.text("blend_curve")?.parse()?;
        let clip = inputs.images("video")?.clone();
        let result = video::seamless_loop(clip, inputs.count("blend_frames")?, curve);
        Ok(vec![NodeValue::Images(result)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::tests::context;
    use crate::nodes::NodeRegistry;
    use crate::video::{Frame, FrameBatch};
    use image::Rgb;
    use tempfile::TempDir;

    fn clip(len: usize, level: f32) -> FrameBatch {
        (0..len).map(|_| Frame::from_pixel(4, 4, Rgb([level; 3]))).collect()
    }

    #[tokio::test]
    async fn test_stitch_interpolator_defaults() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let inputs = NodeInputs::new()
            .with_images("video_a", clip(4, 0.0))
            .with_images("video_b", clip(4, 1.0));
        let out = NodeRegistry::new().run("VideoStitchInterpolator", &ctx, inputs).await.unwrap();
        // 3 + 2 interpolated + 3: the seam frames are replaced
        assert_eq!(out[0].clone().into_images().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_stitch_multiple_counts_frames() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let inputs = NodeInputs::new()
            .with_images("video_1", clip(3, 0.0))
            .with_images("video_2", clip(3, 0.5))
            .with_images("video_5", clip(3, 1.0))
            .with_images("video_6", Vec::new())
            .with("interpolation_frames", 1);
        let out = NodeRegistry::new().run("VideoStitchMultiple", &ctx, inputs).await.unwrap();
        let frames = out[0].clone().into_images().unwrap();
        assert_eq!(frames.len(), 7);
        assert_eq!(out[1].as_int(), Some(7));
    }

    #[tokio::test]
    async fn test_frame_blender_factor_bounds() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let registry = NodeRegistry::new();
        let inputs = |factor: f64| {
            NodeInputs::new()
                .with_images("frames_a", clip(2, 0.2))
                .with_images("frames_b", clip(2, 0.8))
                .with("blend_factor", factor)
        };

        let out = registry.run("VideoFrameBlender", &ctx, inputs(1.0)).await.unwrap();
        let frames = out[0].clone().into_images().unwrap();
        assert!((frames[0].get_pixel(0, 0).0[0] - 0.8).abs() < 1e-6);

        assert!(registry.run("VideoFrameBlender", &ctx, inputs(1.5)).await.is_err());
    }

    #[tokio::test]
    async fn test_loop_keeps_length() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let inputs = NodeInputs::new().with_images("video", clip(12, 0.3)).with("blend_frames", 4);
        let out = NodeRegistry::new().run("VideoLoopSeamless", &ctx, inputs).await.unwrap();
        assert_eq!(out[0].clone().into_images().unwrap().len(), 12);
    }
}
