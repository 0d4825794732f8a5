// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Frame batches and the curves and blend modes used to combine them

pub mod blend;

use image::{DynamicImage, Rgb32FImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::{Result, StockpileError};

pub use blend::{
    blend_batches, crossfade, interpolate_frames, seamless_loop, stitch, stitch_all, StitchOptions,
};

/// A single RGB frame with channels in `[0, 1]`
pub type Frame = Rgb32FImage;

/// An ordered sequence of frames
pub type FrameBatch = Vec<Frame>;

/// Weighting curve applied to the blend progress `t`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Curve {
    Linear,
    EaseInOut,
    Cosine,
    Sigmoid,
}

impl Curve {
    pub const ALL: [Curve; 4] = [Curve::Linear, Curve::EaseInOut, Curve::Cosine, Curve::Sigmoid];

    /// Blend weight of the second frame at progress `t` in `[0, 1]`
    pub fn weight(self, t: f32) -> f32 {
        match self {
            Curve::Linear => t,
            Curve::EaseInOut => t * t * (3.0 - 2.0 * t),
            Curve::Cosine => (1.0 - (t * std::f32::consts::PI).cos()) / 2.0,
            Curve::Sigmoid => 1.0 / (1.0 + (-12.0 * (t - 0.5)).exp()),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Curve::Linear => "linear",
            Curve::EaseInOut => "ease_in_out",
            Curve::Cosine => "cosine",
            Curve::Sigmoid => "sigmoid",
        }
    }
}

impl FromStr for Curve {
    type Err = StockpileError;

    fn from_str(s: &str) -> Result<Self> {
        Curve::ALL
            .into_iter()
            .find(|c| c.name() == s.trim())
            .ok_or_else(|| StockpileError::Blend(format!("Unknown curve: {}", s)))
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-pixel combination of two frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    Mix,
    Add,
    Multiply,
    Screen,
    Overlay,
}

impl BlendMode {
    pub const ALL: [BlendMode; 5] = [
        BlendMode::Mix,
        BlendMode::Add,
        BlendMode::Multiply,
        BlendMode::Screen,
        BlendMode::Overlay,
    ];

    /// Combine one channel of `a` with one channel of `b` at `factor`.
    /// The result is clamped to `[0, 1]`.
    pub fn apply(self, a: f32, b: f32, factor: f32) -> f32 {
        let bf = b * factor;
        let value = match self {
            BlendMode::Mix => a * (1.0 - factor) + bf,
            BlendMode::Add => a + bf,
            BlendMode::Multiply => a * (bf + (1.0 - factor)),
            BlendMode::Screen => 1.0 - (1.0 - a) * (1.0 - bf),
            BlendMode::Overlay => {
                if a < 0.5 {
                    2.0 * a * bf
                } else {
                    1.0 - 2.0 * (1.0 - a) * (1.0 - bf)
                }
            }
        };
        value.clamp(0.0, 1.0)
    }

    pub fn name(self) -> &'static str {
        match self {
            BlendMode::Mix => "mix",
            BlendMode::Add => "add",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Overlay => "overlay",
        }
    }
}

impl FromStr for BlendMode {
    type Err = StockpileError;

    fn from_str(s: &str) -> Result<Self> {
        BlendMode::ALL
            .into_iter()
            .find(|m| m.name() == s.trim())
            .ok_or_else(|| StockpileError::Blend(format!("Unknown blend mode: {}", s)))
    }
}

/// Convert any decoded image into a frame
pub fn frame_from_image(image: DynamicImage) -> Frame {
    image.to_rgb32f()
}

/// Quantise a frame back to 8-bit RGB for saving
pub fn frame_to_rgb8(frame: &Frame) -> RgbImage {
    DynamicImage::ImageRgb32F(frame.clone()).to_rgb8()
}

/// A black frame, emitted where a node has nothing to load
pub fn blank_frame(width: u32, height: u32) -> Frame {
    Frame::new(width, height)
}

/// Load every image in a directory, ordered by file name
pub fn load_frames(dir: &Path) -> Result<FrameBatch> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && image::ImageFormat::from_path(p).is_ok())
        .collect();
    paths.sort();

    let mut frames = Vec::with_capacity(paths.len());
    for path in &paths {
        frames.push(frame_from_image(image::open(path)?));
    }
    debug!("Loaded {} frames from {:?}", frames.len(), dir);
    Ok(frames)
}

/// Write frames as numbered PNGs, returning the written paths
pub fn save_frames(frames: &[Frame], dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(frames.len());
    for (i, frame) in frames.iter().enumerate() {
        let path = dir.join(format!("{}_{:05}.png", prefix, i));
        frame_to_rgb8(frame).save(&path)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn test_curves_hit_endpoints_and_midpoint() {
        for curve in [Curve::Linear, Curve::EaseInOut, Curve::Cosine] {
            assert!(curve.weight(0.0).abs() < 1e-6, "{}", curve);
            assert!((curve.weight(1.0) - 1.0).abs() < 1e-6, "{}", curve);
        }
        for curve in Curve::ALL {
            assert!((curve.weight(0.5) - 0.5).abs() < 1e-6, "{}", curve);
        }
        // sigmoid is sharpened around the midpoint
        assert!(Curve::Sigmoid.weight(0.25) < Curve::Linear.weight(0.25));
        assert!(Curve::Sigmoid.weight(0.75) > Curve::Linear.weight(0.75));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("ease_in_out".parse::<Curve>().unwrap(), Curve::EaseInOut);
        assert_eq!("overlay".parse::<BlendMode>().unwrap(), BlendMode::Overlay);
        assert!("bounce".parse::<Curve>().is_err());
        assert!("difference".parse::<BlendMode>().is_err());
    }

    #[test]
    fn test_blend_mode_formulas() {
        assert!((BlendMode::Mix.apply(0.2, 0.8, 0.5) - 0.5).abs() < 1e-6);
        assert_eq!(BlendMode::Add.apply(0.8, 0.8, 1.0), 1.0);
        assert!((BlendMode::Multiply.apply(0.5, 0.5, 1.0) - 0.25).abs() < 1e-6);
        assert!((BlendMode::Screen.apply(0.5, 0.5, 1.0) - 0.75).abs() < 1e-6);
        assert!((BlendMode::Overlay.apply(0.25, 0.5, 1.0) - 0.25).abs() < 1e-6);
        assert!((BlendMode::Overlay.apply(0.75, 0.5, 1.0) - 0.75).abs() < 1e-6);
        // factor 0 leaves a untouched for every mode but overlay's dark branch
        for mode in [BlendMode::Mix, BlendMode::Add, BlendMode::Multiply, BlendMode::Screen] {
            assert!((mode.apply(0.3, 0.9, 0.0) - 0.3).abs() < 1e-6, "{}", mode.name());
        }
    }

    #[test]
    fn test_save_then_load_frames() {
        let dir = TempDir::new().unwrap();
        let frames = vec![
            Frame::from_pixel(4, 3, Rgb([1.0, 0.0, 0.0])),
            Frame::from_pixel(4, 3, Rgb([0.0, 0.0, 1.0])),
        ];
        let written = save_frames(&frames, dir.path(), "clip").unwrap();
        assert_eq!(written.len(), 2);

        let loaded = load_frames(dir.path()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].dimensions(), (4, 3));
        assert_eq!(loaded[1].get_pixel(0, 0), &Rgb([0.0, 0.0, 1.0]));
    }
}
