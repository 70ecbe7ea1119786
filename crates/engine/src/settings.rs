//! Encode settings and their validation.
//!
//! [`EncodeSettings`] is what a caller asks for. [`EncodeSettings::resolve`]
//! checks it against the codec catalog once per batch and produces
//! [`ResolvedSettings`], from which every job in the batch is compiled.

use crate::codec::{
    CodecFamily, CodecId, DnxhrProfile, HwAccel, ProResProfile, Vp9Deadline, CRF_RANGE,
    VP9_CPU_USED_RANGE, VP9_CRF_RANGE, X26X_PRESETS,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use timelapse_config::EncoderSafetyConfig;
use tracing::{info, warn};

/// Lowest accepted input frame rate.
pub const MIN_INPUT_FPS: f64 = 0.1;
/// Lowest accepted output frame rate.
pub const MIN_OUTPUT_FPS: f64 = 1.0;
/// Accepted percentage-scale bounds, inclusive.
pub const PERCENT_RANGE: (u32, u32) = (1, 200);

/// Error type for settings that cannot produce a job
#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("{which} frame rate {value} is invalid (minimum {min})")]
    InvalidFrameRate {
        which: &'static str,
        value: f64,
        min: f64,
    },

    #[error("{codec} expects {expected} quality settings")]
    QualityMismatch {
        codec: CodecId,
        expected: &'static str,
    },

    #[error("{field} {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("preset '{preset}' is not valid for {encoder}")]
    UnknownPreset {
        preset: String,
        encoder: &'static str,
    },

    #[error("hardware encoding ({0}) is disabled by configuration")]
    HardwareDisallowed(HwAccel),

    #[error("scale percentage {0} is outside 1..=200")]
    PercentOutOfRange(u32),

    #[error("output path {} exists and is not a directory", .0.display())]
    OutputNotADirectory(PathBuf),
}

/// Requested height of a custom scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomHeight {
    /// Keep aspect ratio (`-2` to the encoder).
    Auto,
    Pixels(i64),
}

/// Requested output resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScaleSpec {
    #[default]
    Original,
    Percent(u32),
    Hd1080,
    Hd720,
    Custom { width: i64, height: CustomHeight },
}

impl FromStr for ScaleSpec {
    type Err = String;

    /// Accepts `original`, `1080p`, `720p`, `N%`, `percent:N` and `WxH`
    /// where `H` may be `auto` or `-2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "original" | "orig" | "none" => return Ok(ScaleSpec::Original),
            "1080p" => return Ok(ScaleSpec::Hd1080),
            "720p" => return Ok(ScaleSpec::Hd720),
            _ => {}
        }

        let percent = lower
            .strip_suffix('%')
            .or_else(|| lower.strip_prefix("percent:"));
        if let Some(p) = percent {
            return p
                .trim()
                .parse::<u32>()
                .map(ScaleSpec::Percent)
                .map_err(|_| format!("invalid percentage '{}'", p));
        }

        let (w, h) = lower
            .split_once('x')
            .ok_or_else(|| format!("unrecognised scale '{}'", s))?;
        let width = w
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("invalid width '{}'", w))?;
        let height = match h.trim() {
            "auto" | "-2" => CustomHeight::Auto,
            other => CustomHeight::Pixels(
                other
                    .parse::<i64>()
                    .map_err(|_| format!("invalid height '{}'", other))?,
            ),
        };
        Ok(ScaleSpec::Custom { width, height })
    }
}

/// Concrete scale filter plus a human description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalePlan {
    /// `scale=` filter expression, `None` for original size.
    pub filter: Option<String>,
    pub description: String,
}

impl ScalePlan {
    pub fn original() -> Self {
        Self {
            filter: None,
            description: "Original".to_string(),
        }
    }

    /// Downscale to `width`, keeping aspect ratio with an even height.
    pub fn auto_scaled(width: u32) -> Self {
        Self {
            filter: Some(format!("scale={}:-2:flags=lanczos", width)),
            description: format!("AutoScaled-{}w", width),
        }
    }

    /// Resolution tag used in output filenames.
    ///
    /// `orig` when no filter is active, otherwise the description up to its
    /// first parenthesis, lowercased with spaces as underscores.
    pub fn resolution_tag(&self) -> String {
        if self.filter.is_none() {
            return "orig".to_string();
        }
        self.description
            .split('(')
            .next()
            .unwrap_or_default()
            .trim()
            .replace(' ', "_")
            .replace("%_of_original", "%orig")
            .to_lowercase()
    }
}

fn is_positive_even(v: i64) -> bool {
    v > 0 && v % 2 == 0
}

/// Maps a [`ScaleSpec`] to a concrete filter.
///
/// An invalid custom size is not an error: it is logged and the plan falls
/// back to no scaling.
pub fn resolve_scale(spec: ScaleSpec) -> Result<ScalePlan, SettingsError> {
    match spec {
        ScaleSpec::Original => Ok(ScalePlan::original()),
        ScaleSpec::Percent(p) => {
            if p < PERCENT_RANGE.0 || p > PERCENT_RANGE.1 {
                return Err(SettingsError::PercentOutOfRange(p));
            }
            Ok(ScalePlan {
                filter: Some(format!(
                    "scale=w=trunc(iw*{}/100/2)*2:h=-2:flags=lanczos",
                    p
                )),
                description: format!("{}% of original (approx, even dimensions)", p),
            })
        }
        ScaleSpec::Hd1080 => Ok(ScalePlan {
            filter: Some("scale=1920:-2:flags=lanczos".to_string()),
            description: "1080p (1920xH)".to_string(),
        }),
        ScaleSpec::Hd720 => Ok(ScalePlan {
            filter: Some("scale=1280:-2:flags=lanczos".to_string()),
            description: "720p (1280xH)".to_string(),
        }),
        ScaleSpec::Custom { width, height } => {
            let height_ok = match height {
                CustomHeight::Auto => true,
                CustomHeight::Pixels(h) => is_positive_even(h),
            };
            if !is_positive_even(width) || !height_ok {
                warn!(
                    width,
                    height = ?height,
                    "Custom scale needs a positive even width and an even or auto height; keeping original size"
                );
                return Ok(ScalePlan {
                    filter: None,
                    description: "Original (Custom Err)".to_string(),
                });
            }
            let (h_expr, h_desc) = match height {
                CustomHeight::Auto => ("-2".to_string(), "(auto_H)".to_string()),
                CustomHeight::Pixels(h) => (h.to_string(), h.to_string()),
            };
            Ok(ScalePlan {
                filter: Some(format!("scale={}:{}:flags=lanczos", width, h_expr)),
                description: format!("Custom {}x{}", width, h_desc),
            })
        }
    }
}

/// Requested quality controls. The variant must fit the codec family and
/// hardware path; anything else is a [`SettingsError::QualityMismatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    Crf { crf: u8, preset: String },
    Vp9 { crf: u8, deadline: Vp9Deadline, cpu_used: u8 },
    ProRes { profile: ProResProfile },
    Dnxhr { profile: DnxhrProfile },
    Hardware { cq: u8, preset: Option<String> },
}

impl Quality {
    /// Catalog defaults for `codec` on the path `hw` resolves to.
    pub fn default_for(codec: CodecId, hw: HwAccel) -> Quality {
        let spec = codec.spec();
        if spec.hw_variant(hw).is_some() {
            return Quality::Hardware {
                cq: spec.default_crf,
                preset: None,
            };
        }
        match spec.family {
            CodecFamily::X26x => Quality::Crf {
                crf: spec.default_crf,
                preset: "medium".to_string(),
            },
            CodecFamily::Vp9 => Quality::Vp9 {
                crf: spec.default_crf,
                deadline: Vp9Deadline::Good,
                cpu_used: 1,
            },
            CodecFamily::ProRes => Quality::ProRes {
                profile: spec.default_prores,
            },
            CodecFamily::Dnxhr => Quality::Dnxhr {
                profile: spec.default_dnxhr,
            },
        }
    }
}

/// Validated quality controls, one variant per (family, hardware vendor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum QualityPlan {
    X26x { crf: u8, preset: String },
    Vp9 { crf: u8, deadline: Vp9Deadline, cpu_used: u8 },
    ProRes { profile: ProResProfile },
    Dnxhr { profile: DnxhrProfile },
    Nvenc { cq: u8, preset: String },
    Qsv { cq: u8 },
    Amf { cq: u8, preset: String },
}

impl QualityPlan {
    /// Encoder flags for this plan, placed after `-c:v`.
    pub fn encoder_args(&self) -> Vec<String> {
        match self {
            QualityPlan::X26x { crf, preset } => {
                vec!["-preset".into(), preset.clone(), "-crf".into(), crf.to_string()]
            }
            QualityPlan::Vp9 {
                crf,
                deadline,
                cpu_used,
            } => vec![
                "-deadline".into(),
                deadline.as_str().into(),
                "-crf".into(),
                crf.to_string(),
                "-b:v".into(),
                "0".into(),
                "-cpu-used".into(),
                cpu_used.to_string(),
            ],
            QualityPlan::ProRes { profile } => {
                vec!["-profile:v".into(), profile.value().to_string()]
            }
            QualityPlan::Dnxhr { profile } => vec!["-profile:v".into(), profile.as_str().into()],
            QualityPlan::Nvenc { cq, preset } => {
                vec!["-cq".into(), cq.to_string(), "-preset:v".into(), preset.clone()]
            }
            QualityPlan::Qsv { cq } => vec!["-global_quality".into(), cq.to_string()],
            // AMF has no single CQ flag; only the quality preset is passed.
            QualityPlan::Amf { preset, .. } => vec!["-quality".into(), preset.clone()],
        }
    }

    /// Profile tag that precedes the rate tag in filenames.
    pub fn profile_tag(&self) -> Option<String> {
        match self {
            QualityPlan::ProRes { profile } => Some(format!("p{}", profile.label().to_lowercase())),
            QualityPlan::Dnxhr { profile } => Some(profile.tag().to_string()),
            _ => None,
        }
    }

    /// Quality and speed tags that follow the rate tag in filenames.
    pub fn rate_control_tags(&self) -> Vec<String> {
        match self {
            QualityPlan::X26x { crf, preset } => vec![format!("crf{}", crf), preset.clone()],
            QualityPlan::Vp9 {
                crf,
                deadline,
                cpu_used,
            } => vec![
                format!("crf{}", crf),
                format!("dl{}", deadline.as_str()),
                format!("cpu{}", cpu_used),
            ],
            QualityPlan::ProRes { .. } | QualityPlan::Dnxhr { .. } => Vec::new(),
            QualityPlan::Nvenc { cq, preset } | QualityPlan::Amf { cq, preset } => {
                vec![format!("cq{}", cq), preset.clone()]
            }
            QualityPlan::Qsv { cq } => vec![format!("cq{}", cq)],
        }
    }
}

/// Everything a caller chooses for one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeSettings {
    pub input_fps: f64,
    pub output_fps: f64,
    pub codec: CodecId,
    pub hwaccel: HwAccel,
    pub quality: Quality,
    /// Overrides the codec's declared pixel format before any adjustment.
    pub pixel_format: Option<String>,
    pub scale: ScaleSpec,
    pub output_dir: PathBuf,
    /// Replaces the source directory name at the front of output filenames.
    pub output_basename: Option<String>,
    /// Log the encoder's diagnostic stream on success too.
    pub verbose: bool,
}

impl EncodeSettings {
    /// Software settings with catalog defaults for `codec`.
    pub fn for_codec(codec: CodecId, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_fps: 24.0,
            output_fps: 24.0,
            codec,
            hwaccel: HwAccel::None,
            quality: Quality::default_for(codec, HwAccel::None),
            pixel_format: None,
            scale: ScaleSpec::Original,
            output_dir: output_dir.into(),
            output_basename: None,
            verbose: false,
        }
    }

    /// Validates the settings and fixes everything that does not depend on
    /// the sequence: encoder, quality plan, pixel format and scale.
    pub fn resolve(&self, safety: &EncoderSafetyConfig) -> Result<ResolvedSettings, SettingsError> {
        check_rate("input", self.input_fps, MIN_INPUT_FPS)?;
        check_rate("output", self.output_fps, MIN_OUTPUT_FPS)?;

        if self.output_dir.exists() && !self.output_dir.is_dir() {
            return Err(SettingsError::OutputNotADirectory(self.output_dir.clone()));
        }

        if self.hwaccel != HwAccel::None && safety.disallow_hardware_encoding {
            return Err(SettingsError::HardwareDisallowed(self.hwaccel));
        }

        let spec = self.codec.spec();
        let (encoder, hw_active) = spec.encoder_for(self.hwaccel);
        if self.hwaccel != HwAccel::None && !hw_active {
            info!(
                codec = %self.codec,
                hwaccel = %self.hwaccel,
                "Codec has no hardware variant; using software encoder"
            );
        }

        let quality = self.quality_plan(encoder, hw_active)?;
        let pix_fmt = resolve_pix_fmt(
            self.pixel_format.as_deref().unwrap_or(spec.pix_fmt),
            encoder,
            &quality,
        );
        let scale = resolve_scale(self.scale)?;

        let output_basename = self
            .output_basename
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(ResolvedSettings {
            codec: self.codec,
            hwaccel: if hw_active { self.hwaccel } else { HwAccel::None },
            encoder,
            extension: spec.extension,
            quality,
            pix_fmt,
            scale,
            input_fps: self.input_fps,
            output_fps: self.output_fps,
            output_dir: self.output_dir.clone(),
            output_basename,
            verbose: self.verbose,
        })
    }

    fn quality_plan(&self, encoder: &'static str, hw_active: bool) -> Result<QualityPlan, SettingsError> {
        let spec = self.codec.spec();
        let mismatch = |expected| SettingsError::QualityMismatch {
            codec: self.codec,
            expected,
        };

        if hw_active {
            let Quality::Hardware { cq, preset } = &self.quality else {
                return Err(mismatch("hardware (cq)"));
            };
            check_range("cq", *cq, CRF_RANGE)?;
            let preset = check_hw_preset(self.hwaccel, encoder, preset.as_deref())?;
            return Ok(match self.hwaccel {
                HwAccel::Nvenc => QualityPlan::Nvenc {
                    cq: *cq,
                    preset: preset.unwrap_or_default(),
                },
                HwAccel::Amf => QualityPlan::Amf {
                    cq: *cq,
                    preset: preset.unwrap_or_default(),
                },
                HwAccel::Qsv | HwAccel::None => QualityPlan::Qsv { cq: *cq },
            });
        }

        match (spec.family, &self.quality) {
            (CodecFamily::X26x, Quality::Crf { crf, preset }) => {
                check_range("crf", *crf, CRF_RANGE)?;
                if !X26X_PRESETS.contains(&preset.as_str()) {
                    return Err(SettingsError::UnknownPreset {
                        preset: preset.clone(),
                        encoder,
                    });
                }
                Ok(QualityPlan::X26x {
                    crf: *crf,
                    preset: preset.clone(),
                })
            }
            (CodecFamily::X26x, _) => Err(mismatch("crf")),
            (
                CodecFamily::Vp9,
                Quality::Vp9 {
                    crf,
                    deadline,
                    cpu_used,
                },
            ) => {
                check_range("crf", *crf, VP9_CRF_RANGE)?;
                check_range("cpu-used", *cpu_used, VP9_CPU_USED_RANGE)?;
                Ok(QualityPlan::Vp9 {
                    crf: *crf,
                    deadline: *deadline,
                    cpu_used: *cpu_used,
                })
            }
            (CodecFamily::Vp9, _) => Err(mismatch("vp9 (crf, deadline, cpu-used)")),
            (CodecFamily::ProRes, Quality::ProRes { profile }) => {
                Ok(QualityPlan::ProRes { profile: *profile })
            }
            (CodecFamily::ProRes, _) => Err(mismatch("ProRes profile")),
            (CodecFamily::Dnxhr, Quality::Dnxhr { profile }) => {
                Ok(QualityPlan::Dnxhr { profile: *profile })
            }
            (CodecFamily::Dnxhr, _) => Err(mismatch("DNxHR profile")),
        }
    }
}

fn check_rate(which: &'static str, value: f64, min: f64) -> Result<(), SettingsError> {
    if value.is_finite() && value >= min {
        Ok(())
    } else {
        Err(SettingsError::InvalidFrameRate { which, value, min })
    }
}

fn check_range(field: &'static str, value: u8, (min, max): (u8, u8)) -> Result<(), SettingsError> {
    if value < min || value > max {
        return Err(SettingsError::OutOfRange {
            field,
            value: value.into(),
            min: min.into(),
            max: max.into(),
        });
    }
    Ok(())
}

fn check_hw_preset(
    hw: HwAccel,
    encoder: &'static str,
    preset: Option<&str>,
) -> Result<Option<String>, SettingsError> {
    match preset {
        None => Ok(hw.default_preset().map(str::to_string)),
        Some(p) if hw.presets().contains(&p) => Ok(Some(p.to_string())),
        Some(p) => Err(SettingsError::UnknownPreset {
            preset: p.to_string(),
            encoder,
        }),
    }
}

/// Applies hardware and profile constraints to the base pixel format.
pub fn resolve_pix_fmt(base: &str, encoder: &str, quality: &QualityPlan) -> String {
    match (encoder, quality) {
        ("hevc_nvenc", _) if base == "yuv422p10le" => "p010le".to_string(),
        ("h264_nvenc", _) if base != "yuv420p" && base != "nv12" => "yuv420p".to_string(),
        (_, QualityPlan::ProRes { profile }) if profile.is_4444() => "yuv444p10le".to_string(),
        (_, QualityPlan::Dnxhr { profile: DnxhrProfile::Hqx }) => "yuv422p10le".to_string(),
        (_, QualityPlan::Dnxhr { .. }) if base != "yuv420p" => "yuv422p".to_string(),
        _ => base.to_string(),
    }
}

/// Settings after validation, shared by every job of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSettings {
    pub codec: CodecId,
    /// Vendor of the active hardware path, `None` on the software path.
    pub hwaccel: HwAccel,
    /// Encoder passed to `-c:v`.
    pub encoder: &'static str,
    pub extension: &'static str,
    pub quality: QualityPlan,
    pub pix_fmt: String,
    pub scale: ScalePlan,
    pub input_fps: f64,
    pub output_fps: f64,
    pub output_dir: PathBuf,
    pub output_basename: Option<String>,
    pub verbose: bool,
}

impl ResolvedSettings {
    pub fn hw_active(&self) -> bool {
        self.hwaccel != HwAccel::None
    }
}

/// Formats a frame rate for arguments and filenames: `24`, `29.97`.
pub fn format_rate(rate: f64) -> String {
    if rate.fract() == 0.0 && rate.abs() < 1e15 {
        format!("{}", rate as i64)
    } else {
        format!("{}", rate)
    }
}

impl fmt::Display for ScalePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}
