// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Per-frame blending: mixes, crossfades, stitches and loops

use image::imageops::{self, FilterType};
use image::Rgb;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{BlendMode, Curve, Frame, FrameBatch};
use crate::{Result, StockpileError};

/// Combine two same-sized frames channel by channel
fn combine(a: &Frame, b: &Frame, f: impl Fn(f32, f32) -> f32) -> Frame {
    Frame::from_fn(a.width(), a.height(), |x, y| {
        let pa = a.get_pixel(x, y);
        let pb = b.get_pixel(x, y);
        Rgb(std::array::from_fn(|c| f(pa.0[c], pb.0[c])))
    })
}

/// `a * (1 - alpha) + b * alpha`
fn lerp(a: &Frame, b: &Frame, alpha: f32) -> Frame {
    combine(a, b, |x, y| x * (1.0 - alpha) + y * alpha)
}

/// Resize `frame` to the reference dimensions when they differ
fn match_size(reference: &Frame, frame: &Frame) -> Frame {
    if reference.dimensions() == frame.dimensions() {
        return frame.clone();
    }
    imageops::resize(frame, reference.width(), reference.height(), FilterType::Lanczos3)
}

fn match_batch(reference: &Frame, frames: FrameBatch) -> FrameBatch {
    if frames.iter().any(|f| f.dimensions() != reference.dimensions()) {
        warn!(
            "Frame dimensions differ ({:?} vs {:?}), resizing",
            reference.dimensions(),
            frames.first().map(|f| f.dimensions())
        );
        frames.iter().map(|f| match_size(reference, f)).collect()
    } else {
        frames
    }
}

/// Blend two batches frame by frame over their overlap window. Frames of `b`
/// are resized to match `a`; `factor` is clamped to `[0, 1]`.
pub fn blend_batches(a: &[Frame], b: &[Frame], factor: f32, mode: BlendMode) -> FrameBatch {
    let factor = factor.clamp(0.0, 1.0);
    a.iter()
        .zip(b.iter())
        .map(|(fa, fb)| {
            let fb = match_size(fa, fb);
            combine(fa, &fb, |x, y| mode.apply(x, y, factor))
        })
        .collect()
}

/// `n` in-between frames from `a` to `b`, excluding both endpoints
pub fn interpolate_frames(a: &Frame, b: &Frame, n: usize, curve: Curve) -> FrameBatch {
    let b = match_size(a, b);
    (1..=n)
        .map(|i| {
            let t = i as f32 / (n + 1) as f32;
            lerp(a, &b, curve.weight(t))
        })
        .collect()
}

/// Fade the tail of `a` into the head of `b` over up to `frames` frames.
/// With nothing to fade the batches are concatenated.
pub fn crossfade(a: &[Frame], b: &[Frame], frames: usize, curve: Curve) -> FrameBatch {
    let n = frames.min(a.len()).min(b.len());
    let mut out = Vec::with_capacity(a.len() + b.len() - n);
    out.extend_from_slice(&a[..a.len() - n]);

    let tail = &a[a.len() - n..];
    for (i, (fa, fb)) in tail.iter().zip(&b[..n]).enumerate() {
        let t = (i + 1) as f32 / (n + 1) as f32;
        out.push(lerp(fa, &match_size(fa, fb), curve.weight(t)));
    }

    out.extend(b[n..].iter().map(|f| match a.first() {
        Some(reference) => match_size(reference, f),
        None => f.clone(),
    }));
    out
}

/// Transition settings used when joining clips
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StitchOptions {
    pub overlap_frames: usize,
    pub crossfade_frames: usize,
    pub interpolation_frames: usize,
    pub curve: Curve,
}

impl Default for StitchOptions {
    fn default() -> Self {
        Self {
            overlap_frames: 4,
            crossfade_frames: 8,
            interpolation_frames: 2,
            curve: Curve::EaseInOut,
        }
    }
}

/// Join two clips. Interpolated frames between the last frame of `a` and the
/// first of `b` take precedence; otherwise the overlap windows are
/// crossfaded; otherwise the clips are concatenated.
pub fn stitch(a: FrameBatch, b: FrameBatch, options: &StitchOptions) -> FrameBatch {
    if a.is_empty() || b.is_empty() {
        let mut joined = a;
        joined.extend(b);
        return joined;
    }
    let b = match_batch(&a[a.len() - 1], b);
    let (len_a, len_b) = (a.len(), b.len());

    info!(
        "Stitching {} + {} frames (overlap={}, crossfade={}, interp={}, curve={})",
        len_a, len_b, options.overlap_frames, options.crossfade_frames,
        options.interpolation_frames, options.curve
    );

    let result = if options.interpolation_frames > 0 {
        let between =
            interpolate_frames(&a[len_a - 1], &b[0], options.interpolation_frames, options.curve);
        let mut out = a[..len_a - 1].to_vec();
        out.extend(between);
        out.extend_from_slice(&b[1..]);
        out
    } else if options.crossfade_frames > 0 {
        let start_a = len_a.saturating_sub(options.overlap_frames);
        let end_b = options.overlap_frames.min(len_b);
        let window = options.crossfade_frames.min(options.overlap_frames);

        let mut out = a[..start_a].to_vec();
        out.extend(crossfade(&a[start_a..], &b[..end_b], window, options.curve));
        out.extend_from_slice(&b[end_b..]);
        out
    } else {
        let mut out = a;
        out.extend(b);
        out
    };

    info!("Stitched result: {} frames", result.len());
    result
}

/// Join clips left to right. The first two are required; later empty clips
/// are skipped.
pub fn stitch_all(videos: Vec<FrameBatch>, options: &StitchOptions) -> Result<FrameBatch> {
    if videos.len() < 2 {
        return Err(StockpileError::Blend(format!("Need at least two clips, got {}", videos.len())));
    }

    let mut clips = videos.into_iter();
    let mut result = clips.next().unwrap_or_default();
    for (i, clip) in clips.enumerate() {
        if i > 0 && clip.is_empty() {
            continue;
        }
        result = stitch(result, clip, options);
    }
    Ok(result)
}

/// Make a clip loop by fading its tail towards its head. The clip length is
/// unchanged; fewer than two blend frames leaves the clip as is.
pub fn seamless_loop(video: FrameBatch, blend_frames: usize, curve: Curve) -> FrameBatch {
    let n = blend_frames.min(video.len() / 2);
    if n < 2 {
        return video;
    }

    let len = video.len();
    let mut out = video[..len - n].to_vec();
    for i in 0..n {
        let t = i as f32 / (n - 1) as f32;
        out.push(lerp(&video[len - n + i], &video[i], curve.weight(t)));
    }
    info!("Created seamless loop: {} frames with {} frame blend", out.len(), n);
    out
}
