//! Job compiler.
//!
//! Turns one [`Sequence`] and the batch's [`ResolvedSettings`] into an
//! [`EncodeJob`]: the encoder argument list, the destination path and the
//! expected frame count.

use crate::codec::{codec_tag, max_hw_width};
use crate::probe::{DimensionProbe, Dimensions};
use crate::scan::{Sequence, SequenceId};
use crate::settings::{format_rate, ResolvedSettings, ScalePlan};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

/// A fully resolved encode, ready for the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodeJob {
    /// Encoder arguments, without the executable.
    pub args: Vec<String>,
    pub output_path: PathBuf,
    pub expected_frames: u64,
    pub sequence: SequenceId,
}

/// Scale to apply for this sequence, including the hardware width guard.
fn effective_scale(
    sequence: &Sequence,
    settings: &ResolvedSettings,
    dims: Option<Dimensions>,
) -> ScalePlan {
    if settings.scale.filter.is_some() {
        return settings.scale.clone();
    }
    let (Some(dims), Some(max_width)) = (dims, max_hw_width(settings.encoder)) else {
        return settings.scale.clone();
    };
    if dims.width <= max_width {
        return settings.scale.clone();
    }
    info!(
        sequence = %sequence.id(),
        width = dims.width,
        max_width,
        encoder = settings.encoder,
        "Frame wider than the hardware encoder allows; downscaling"
    );
    ScalePlan::auto_scaled(max_width)
}

/// Deterministic output filename for a sequence.
///
/// `<base>_seq<start>_<codec>[_<profile>]_<in>in-<out>out[_<quality>...]_<res><ext>`
fn output_file_name(sequence: &Sequence, settings: &ResolvedSettings, scale: &ScalePlan) -> String {
    let base = settings
        .output_basename
        .clone()
        .unwrap_or_else(|| sequence.directory_name());

    let mut parts = vec![
        base,
        format!("seq{}", sequence.start_digits),
        codec_tag(settings.encoder),
    ];
    parts.extend(settings.quality.profile_tag());
    parts.push(format!(
        "{}in-{}out",
        format_rate(settings.input_fps),
        format_rate(settings.output_fps)
    ));
    parts.extend(settings.quality.rate_control_tags());
    parts.push(scale.resolution_tag());

    let stem: Vec<String> = parts.into_iter().filter(|p| !p.is_empty()).collect();
    format!("{}{}", stem.join("_"), settings.extension)
}

/// Builds the encode job for `sequence`.
///
/// Pure apart from logging: `dims` is the probed size of the first frame, or
/// `None` when it could not be read, in which case the width guard is skipped.
pub fn compile_job(
    sequence: &Sequence,
    settings: &ResolvedSettings,
    dims: Option<Dimensions>,
) -> EncodeJob {
    let scale = effective_scale(sequence, settings, dims);
    let output_path = settings
        .output_dir
        .join(output_file_name(sequence, settings, &scale));
    let expected_frames = sequence.frame_count() as u64;
    let input = sequence.directory.join(sequence.input_pattern());

    let mut args: Vec<String> = vec![
        "-y".into(),
        "-framerate".into(),
        format_rate(settings.input_fps),
        "-start_number".into(),
        sequence.start_digits.clone(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-vframes".into(),
        expected_frames.to_string(),
    ];

    let filters: Vec<String> = scale
        .filter
        .iter()
        .cloned()
        .chain(
            Some(&settings.pix_fmt)
                .filter(|p| !p.is_empty())
                .map(|p| format!("format={}", p)),
        )
        .collect();
    if !filters.is_empty() {
        args.push("-vf".into());
        args.push(filters.join(","));
    }

    args.push("-c:v".into());
    args.push(settings.encoder.to_string());
    args.extend(settings.quality.encoder_args());
    args.extend([
        "-r".to_string(),
        format_rate(settings.output_fps),
        "-pix_fmt".to_string(),
        settings.pix_fmt.clone(),
        output_path.to_string_lossy().into_owned(),
    ]);

    EncodeJob {
        args,
        output_path,
        expected_frames,
        sequence: sequence.id(),
    }
}

/// Probes the first frame, then compiles.
#[derive(Debug, Clone)]
pub struct JobCompiler<P> {
    settings: ResolvedSettings,
    probe: P,
}

impl<P: DimensionProbe> JobCompiler<P> {
    pub fn new(settings: ResolvedSettings, probe: P) -> Self {
        Self { settings, probe }
    }

    pub fn settings(&self) -> &ResolvedSettings {
        &self.settings
    }

    /// Compiles `sequence`, logging and tolerating a failed dimension probe.
    pub async fn compile(&self, sequence: &Sequence) -> EncodeJob {
        let frame = sequence.first_frame();
        let dims = match self.probe.dimensions(frame).await {
            Ok(dims) => Some(dims),
            Err(e) => {
                warn!(frame = %frame.display(), error = %e, "Could not read frame dimensions");
                None
            }
        };
        compile_job(sequence, &self.settings, dims)
    }
}
