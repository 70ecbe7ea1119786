//! Codec catalog.
//!
//! The closed set of output formats the engine can produce, with each
//! format's encoder, container, pixel format, quality vocabulary and
//! hardware variants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Presets accepted by libx264 and libx265.
pub const X26X_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
];

/// Presets accepted by the NVENC encoders.
pub const NVENC_PRESETS: &[&str] = &[
    "default",
    "p1",
    "p2",
    "p3",
    "p4",
    "p5",
    "p6",
    "p7",
    "slow",
    "medium",
    "fast",
    "hp",
    "hq",
    "bd",
    "ll",
    "llhq",
    "llhp",
    "lossless",
    "losslesshp",
];

/// Quality levels accepted by the AMF encoders.
pub const AMF_PRESETS: &[&str] = &["ultrafast", "fast", "balanced", "quality", "highquality"];

/// Inclusive CRF / CQ bounds for x264, x265 and the hardware encoders.
pub const CRF_RANGE: (u8, u8) = (0, 51);
/// Inclusive CRF bounds for libvpx-vp9.
pub const VP9_CRF_RANGE: (u8, u8) = (0, 63);
/// Inclusive `-cpu-used` bounds for libvpx-vp9.
pub const VP9_CPU_USED_RANGE: (u8, u8) = (0, 8);

/// Output format identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodecId {
    H264Mp4,
    H265Mp4,
    H265Mkv,
    Vp9Webm,
    Vp9Mkv,
    ProresHqMov,
    ProresStdMov,
    DnxhrHqxMov,
    DnxhrHqMov,
}

impl CodecId {
    pub const ALL: [CodecId; 9] = [
        CodecId::H264Mp4,
        CodecId::H265Mp4,
        CodecId::H265Mkv,
        CodecId::Vp9Webm,
        CodecId::Vp9Mkv,
        CodecId::ProresHqMov,
        CodecId::ProresStdMov,
        CodecId::DnxhrHqxMov,
        CodecId::DnxhrHqMov,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CodecId::H264Mp4 => "h264-mp4",
            CodecId::H265Mp4 => "h265-mp4",
            CodecId::H265Mkv => "h265-mkv",
            CodecId::Vp9Webm => "vp9-webm",
            CodecId::Vp9Mkv => "vp9-mkv",
            CodecId::ProresHqMov => "prores-hq-mov",
            CodecId::ProresStdMov => "prores-std-mov",
            CodecId::DnxhrHqxMov => "dnxhr-hqx-mov",
            CodecId::DnxhrHqMov => "dnxhr-hq-mov",
        }
    }

    /// Catalog entry for this codec.
    pub fn spec(&self) -> &'static CodecSpec {
        match self {
            CodecId::H264Mp4 => &H264_MP4,
            CodecId::H265Mp4 => &H265_MP4,
            CodecId::H265Mkv => &H265_MKV,
            CodecId::Vp9Webm => &VP9_WEBM,
            CodecId::Vp9Mkv => &VP9_MKV,
            CodecId::ProresHqMov => &PRORES_HQ_MOV,
            CodecId::ProresStdMov => &PRORES_STD_MOV,
            CodecId::DnxhrHqxMov => &DNXHR_HQX_MOV,
            CodecId::DnxhrHqMov => &DNXHR_HQ_MOV,
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CodecId::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let known: Vec<&str> = CodecId::ALL.iter().map(|c| c.as_str()).collect();
                format!("unknown codec '{}' (expected one of: {})", s, known.join(", "))
            })
    }
}

/// Hardware-acceleration mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HwAccel {
    #[default]
    None,
    Nvenc,
    Qsv,
    Amf,
}

impl HwAccel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HwAccel::None => "none",
            HwAccel::Nvenc => "nvenc",
            HwAccel::Qsv => "qsv",
            HwAccel::Amf => "amf",
        }
    }

    /// Preset vocabulary of this vendor's encoders. Empty for `None` and QSV.
    pub fn presets(&self) -> &'static [&'static str] {
        match self {
            HwAccel::Nvenc => NVENC_PRESETS,
            HwAccel::Amf => AMF_PRESETS,
            HwAccel::None | HwAccel::Qsv => &[],
        }
    }

    /// Preset used when none is chosen: `medium`, else `p4`, else the middle entry.
    pub fn default_preset(&self) -> Option<&'static str> {
        let presets = self.presets();
        if presets.is_empty() {
            return None;
        }
        presets
            .iter()
            .find(|p| **p == "medium")
            .or_else(|| presets.iter().find(|p| **p == "p4"))
            .or_else(|| presets.get(presets.len() / 2))
            .copied()
    }
}

impl fmt::Display for HwAccel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HwAccel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "off" | "" => Ok(HwAccel::None),
            "nvenc" | "nvidia" => Ok(HwAccel::Nvenc),
            "qsv" | "intel" => Ok(HwAccel::Qsv),
            "amf" | "amd" => Ok(HwAccel::Amf),
            other => Err(format!("unknown hardware acceleration mode '{}'", other)),
        }
    }
}

/// Quality-control family of a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecFamily {
    /// libx264 / libx265: CRF plus a speed preset
    X26x,
    /// libvpx-vp9: CRF plus deadline and cpu-used
    Vp9,
    /// prores_ks: numeric profile
    ProRes,
    /// dnxhd in DNxHR mode: named profile
    Dnxhr,
}

/// ProRes profile, mapped to prores_ks `-profile:v` values 0..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProResProfile {
    Proxy,
    Lt,
    Standard,
    Hq,
    P4444,
    P4444Xq,
}

impl ProResProfile {
    pub fn value(&self) -> u8 {
        match self {
            ProResProfile::Proxy => 0,
            ProResProfile::Lt => 1,
            ProResProfile::Standard => 2,
            ProResProfile::Hq => 3,
            ProResProfile::P4444 => 4,
            ProResProfile::P4444Xq => 5,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProResProfile::Proxy => "Proxy",
            ProResProfile::Lt => "LT",
            ProResProfile::Standard => "Standard",
            ProResProfile::Hq => "HQ",
            ProResProfile::P4444 => "4444",
            ProResProfile::P4444Xq => "4444XQ",
        }
    }

    /// 4444 profiles carry chroma at full resolution.
    pub fn is_4444(&self) -> bool {
        matches!(self, ProResProfile::P4444 | ProResProfile::P4444Xq)
    }
}

impl FromStr for ProResProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "proxy" | "0" => Ok(ProResProfile::Proxy),
            "lt" | "1" => Ok(ProResProfile::Lt),
            "standard" | "std" | "2" => Ok(ProResProfile::Standard),
            "hq" | "3" => Ok(ProResProfile::Hq),
            "4444" | "4" => Ok(ProResProfile::P4444),
            "4444xq" | "xq" | "5" => Ok(ProResProfile::P4444Xq),
            other => Err(format!("unknown ProRes profile '{}'", other)),
        }
    }
}

/// DNxHR profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DnxhrProfile {
    Hqx,
    Hq,
    Sq,
    Lb,
}

impl DnxhrProfile {
    /// Value passed to `-profile:v`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DnxhrProfile::Hqx => "dnxhr_hqx",
            DnxhrProfile::Hq => "dnxhr_hq",
            DnxhrProfile::Sq => "dnxhr_sq",
            DnxhrProfile::Lb => "dnxhr_lb",
        }
    }

    /// Short form used in output filenames.
    pub fn tag(&self) -> &'static str {
        self.as_str().trim_start_matches("dnxhr_")
    }
}

impl FromStr for DnxhrProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        match lower.trim_start_matches("dnxhr_") {
            "hqx" => Ok(DnxhrProfile::Hqx),
            "hq" => Ok(DnxhrProfile::Hq),
            "sq" => Ok(DnxhrProfile::Sq),
            "lb" => Ok(DnxhrProfile::Lb),
            _ => Err(format!("unknown DNxHR profile '{}'", s)),
        }
    }
}

/// libvpx-vp9 `-deadline` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vp9Deadline {
    Realtime,
    #[default]
    Good,
    Best,
}

impl Vp9Deadline {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vp9Deadline::Realtime => "realtime",
            Vp9Deadline::Good => "good",
            Vp9Deadline::Best => "best",
        }
    }
}

impl FromStr for Vp9Deadline {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "realtime" => Ok(Vp9Deadline::Realtime),
            "good" => Ok(Vp9Deadline::Good),
            "best" => Ok(Vp9Deadline::Best),
            other => Err(format!("unknown VP9 deadline '{}'", other)),
        }
    }
}

/// Hardware encoder names for one codec, by vendor.
#[derive(Debug, Clone, Copy)]
pub struct HwVariants {
    pub nvenc: &'static str,
    pub qsv: &'static str,
    pub amf: &'static str,
}

/// Static description of one output format.
#[derive(Debug)]
pub struct CodecSpec {
    pub id: CodecId,
    /// Human-readable name, shown in `--codec` help.
    pub label: &'static str,
    /// Software encoder name passed to `-c:v`.
    pub encoder: &'static str,
    /// Container extension including the dot.
    pub extension: &'static str,
    pub pix_fmt: &'static str,
    pub family: CodecFamily,
    pub hw: Option<HwVariants>,
    /// Default CRF (x26x / vp9) and hardware CQ.
    pub default_crf: u8,
    pub default_prores: ProResProfile,
    pub default_dnxhr: DnxhrProfile,
}

impl CodecSpec {
    /// Hardware encoder substituted for `hw`, if this codec defines one.
    pub fn hw_variant(&self, hw: HwAccel) -> Option<&'static str> {
        let variants = self.hw?;
        match hw {
            HwAccel::None => None,
            HwAccel::Nvenc => Some(variants.nvenc),
            HwAccel::Qsv => Some(variants.qsv),
            HwAccel::Amf => Some(variants.amf),
        }
    }

    /// Effective encoder for `hw` and whether the hardware path is active.
    pub fn encoder_for(&self, hw: HwAccel) -> (&'static str, bool) {
        match self.hw_variant(hw) {
            Some(encoder) => (encoder, true),
            None => (self.encoder, false),
        }
    }
}

const H264_VARIANTS: HwVariants = HwVariants {
    nvenc: "h264_nvenc",
    qsv: "h264_qsv",
    amf: "h264_amf",
};

const HEVC_VARIANTS: HwVariants = HwVariants {
    nvenc: "hevc_nvenc",
    qsv: "hevc_qsv",
    amf: "hevc_amf",
};

static H264_MP4: CodecSpec = CodecSpec {
    id: CodecId::H264Mp4,
    label: "H.264 (MP4)",
    encoder: "libx264",
    extension: ".mp4",
    pix_fmt: "yuv420p",
    family: CodecFamily::X26x,
    hw: Some(H264_VARIANTS),
    default_crf: 23,
    default_prores: ProResProfile::Hq,
    default_dnxhr: DnxhrProfile::Hqx,
};

static H265_MP4: CodecSpec = CodecSpec {
    id: CodecId::H265Mp4,
    label: "H.265/HEVC (MP4)",
    encoder: "libx265",
    extension: ".mp4",
    pix_fmt: "yuv420p",
    family: CodecFamily::X26x,
    hw: Some(HEVC_VARIANTS),
    default_crf: 28,
    default_prores: ProResProfile::Hq,
    default_dnxhr: DnxhrProfile::Hqx,
};

static H265_MKV: CodecSpec = CodecSpec {
    id: CodecId::H265Mkv,
    label: "H.265/HEVC (MKV)",
    encoder: "libx265",
    extension: ".mkv",
    pix_fmt: "yuv420p",
    family: CodecFamily::X26x,
    hw: Some(HEVC_VARIANTS),
    default_crf: 28,
    default_prores: ProResProfile::Hq,
    default_dnxhr: DnxhrProfile::Hqx,
};

static VP9_WEBM: CodecSpec = CodecSpec {
    id: CodecId::Vp9Webm,
    label: "VP9 (WebM)",
    encoder: "libvpx-vp9",
    extension: ".webm",
    pix_fmt: "yuv420p",
    family: CodecFamily::Vp9,
    hw: None,
    default_crf: 31,
    default_prores: ProResProfile::Hq,
    default_dnxhr: DnxhrProfile::Hqx,
};

static VP9_MKV: CodecSpec = CodecSpec {
    id: CodecId::Vp9Mkv,
    label: "VP9 (MKV)",
    encoder: "libvpx-vp9",
    extension: ".mkv",
    pix_fmt: "yuv420p",
    family: CodecFamily::Vp9,
    hw: None,
    default_crf: 31,
    default_prores: ProResProfile::Hq,
    default_dnxhr: DnxhrProfile::Hqx,
};

static PRORES_HQ_MOV: CodecSpec = CodecSpec {
    id: CodecId::ProresHqMov,
    label: "ProRes HQ (MOV)",
    encoder: "prores_ks",
    extension: ".mov",
    pix_fmt: "yuv422p10le",
    family: CodecFamily::ProRes,
    hw: None,
    default_crf: 0,
    default_prores: ProResProfile::Hq,
    default_dnxhr: DnxhrProfile::Hqx,
};

static PRORES_STD_MOV: CodecSpec = CodecSpec {
    id: CodecId::ProresStdMov,
    label: "ProRes Standard (MOV)",
    encoder: "prores_ks",
    extension: ".mov",
    pix_fmt: "yuv422p10le",
    family: CodecFamily::ProRes,
    hw: None,
    default_crf: 0,
    default_prores: ProResProfile::Standard,
    default_dnxhr: DnxhrProfile::Hqx,
};

static DNXHR_HQX_MOV: CodecSpec = CodecSpec {
    id: CodecId::DnxhrHqxMov,
    label: "DNxHR HQX (MOV)",
    encoder: "dnxhd",
    extension: ".mov",
    pix_fmt: "yuv422p10le",
    family: CodecFamily::Dnxhr,
    hw: None,
    default_crf: 0,
    default_prores: ProResProfile::Hq,
    default_dnxhr: DnxhrProfile::Hqx,
};

static DNXHR_HQ_MOV: CodecSpec = CodecSpec {
    id: CodecId::DnxhrHqMov,
    label: "DNxHR HQ (MOV)",
    encoder: "dnxhd",
    extension: ".mov",
    pix_fmt: "yuv420p",
    family: CodecFamily::Dnxhr,
    hw: None,
    default_crf: 0,
    default_prores: ProResProfile::Hq,
    default_dnxhr: DnxhrProfile::Hq,
};

/// Widest frame the hardware encoder accepts, for encoders with a known limit.
pub fn max_hw_width(encoder: &str) -> Option<u32> {
    match encoder {
        "h264_nvenc" => Some(4096),
        "hevc_nvenc" => Some(8192),
        _ => None,
    }
}

/// Encoder name as it appears in output filenames, e.g. `hevcNvenc`.
pub fn codec_tag(encoder: &str) -> String {
    encoder
        .replace("_nvenc", "Nvenc")
        .replace("_qsv", "QSV")
        .replace("_amf", "AMF")
}
