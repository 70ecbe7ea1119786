//! `timelapse encode`: settings, selection and the interactive batch run.

use crate::display;
use anyhow::{bail, Context, Result};
use clap::builder::{PossibleValue, PossibleValuesParser, TypedValueParser};
use clap::{Args, ValueEnum};
use std::io::{BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use timelapse_engine::codec::{DnxhrProfile, ProResProfile, Vp9Deadline};
use timelapse_engine::encode::with_progress_flag;
use timelapse_engine::{
    discover_candidate_directories, event_channel, run_startup_checks, BatchControl, BatchRunner,
    CodecId, Config, EncodeSettings, FfmpegSupervisor, FfprobeProbe, GpuDetector, HwAccel,
    JobCompiler, Quality, ScaleSpec, SequenceCatalog, SequenceId, SupervisorOptions,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Hardware acceleration choice, `auto` picks from the detected GPU.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwChoice {
    None,
    Nvenc,
    Qsv,
    Amf,
    Auto,
}

/// Codec names with their catalog labels as `--codec` help.
fn codec_parser() -> impl TypedValueParser<Value = CodecId> {
    PossibleValuesParser::new(
        CodecId::ALL
            .iter()
            .map(|c| PossibleValue::new(c.as_str()).help(c.spec().label)),
    )
    .try_map(|s| s.parse::<CodecId>())
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Directory whose subdirectories hold the images
    pub parent: PathBuf,

    /// Only encode sequences in this subdirectory (repeatable)
    #[arg(long = "dir", value_name = "NAME")]
    pub dirs: Vec<String>,

    /// Only encode this sequence, e.g. `day1:0001` (repeatable)
    #[arg(long = "sequence", value_name = "DIR:START")]
    pub sequences: Vec<String>,

    /// Filename prefix before the frame number
    #[arg(long)]
    pub prefix: Option<String>,

    /// Filename suffix after the frame number
    #[arg(long)]
    pub suffix: Option<String>,

    /// Output format
    #[arg(long, default_value = "h264-mp4", value_parser = codec_parser())]
    pub codec: CodecId,

    #[arg(long, value_enum, default_value_t = HwChoice::None)]
    pub hwaccel: HwChoice,

    /// Constant rate factor (software x264/x265/VP9)
    #[arg(long)]
    pub crf: Option<u8>,

    /// Constant quality (hardware encoders)
    #[arg(long)]
    pub cq: Option<u8>,

    /// Speed preset of the selected encoder
    #[arg(long)]
    pub preset: Option<String>,

    /// VP9 deadline: realtime, good or best
    #[arg(long)]
    pub deadline: Option<Vp9Deadline>,

    /// VP9 cpu-used, 0 (slowest) to 8
    #[arg(long)]
    pub cpu_used: Option<u8>,

    /// ProRes profile: proxy, lt, standard, hq, 4444, 4444xq
    #[arg(long)]
    pub prores_profile: Option<ProResProfile>,

    /// DNxHR profile: hqx, hq, sq, lb
    #[arg(long)]
    pub dnxhr_profile: Option<DnxhrProfile>,

    /// Output size: original, 1080p, 720p, percent:N or WxH (H may be auto)
    #[arg(long, default_value = "original")]
    pub scale: ScaleSpec,

    /// Pixel format before codec-specific adjustment
    #[arg(long)]
    pub pix_fmt: Option<String>,

    /// Rate at which images are read
    #[arg(long, default_value_t = 24.0)]
    pub input_fps: f64,

    /// Frame rate of the written video
    #[arg(long, default_value_t = 24.0)]
    pub output_fps: f64,

    /// Directory for the videos; defaults to the configured one
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Base name replacing the source directory name in output files
    #[arg(long)]
    pub name: Option<String>,

    /// Show encoder diagnostics for successful jobs too
    #[arg(long)]
    pub verbose_encoder: bool,

    /// Print events as JSON lines instead of progress bars
    #[arg(long)]
    pub json: bool,

    /// Print the encoder commands without running them
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the ffmpeg/ffprobe availability checks
    #[arg(long)]
    pub skip_checks: bool,
}

pub async fn run(config: Config, args: EncodeArgs) -> Result<ExitCode> {
    let prefix = args.prefix.clone().unwrap_or_else(|| config.scan.prefix.clone());
    let suffix = args.suffix.clone().unwrap_or_else(|| config.scan.suffix.clone());

    if args.skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
    } else {
        let cfg = config.clone();
        let versions = tokio::task::spawn_blocking(move || run_startup_checks(&cfg)).await??;
        info!(ffmpeg = %versions.ffmpeg, ffprobe = %versions.ffprobe, "Startup checks passed");
    }

    let hwaccel = match args.hwaccel {
        HwChoice::None => HwAccel::None,
        HwChoice::Nvenc => HwAccel::Nvenc,
        HwChoice::Qsv => HwAccel::Qsv,
        HwChoice::Amf => HwAccel::Amf,
        HwChoice::Auto => {
            let detected = GpuDetector::new(&config.encoder.nvidia_smi_path)
                .suggest_hwaccel()
                .await;
            info!(hwaccel = %detected, "Hardware acceleration selected automatically");
            detected
        }
    };

    let settings = build_settings(&config, &args, hwaccel)?;
    let resolved = settings
        .resolve(&config.encoder_safety)
        .context("Invalid encode settings")?;

    let directories = discover_candidate_directories(&args.parent, &prefix, &suffix)?;
    let catalog = SequenceCatalog::scan(&directories, &prefix, &suffix);
    let selection = select(&catalog, &args.parent, &args.dirs, &args.sequences)?;
    info!(sequences = selection.len(), codec = %resolved.codec, encoder = resolved.encoder, "Encode selection ready");

    let probe = FfprobeProbe::new(&config.encoder.ffprobe_path);

    if args.dry_run {
        let compiler = JobCompiler::new(resolved, probe);
        for id in &selection {
            let Some(sequence) = catalog.get(id) else {
                continue;
            };
            let job = compiler.compile(sequence).await;
            if args.json {
                println!("{}", serde_json::to_string(&job)?);
            } else {
                let mut line = shell_quote(&config.encoder.ffmpeg_path.to_string_lossy());
                for arg in with_progress_flag(&job.args) {
                    line.push(' ');
                    line.push_str(&shell_quote(&arg));
                }
                println!("{}", line);
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let supervisor = FfmpegSupervisor::new(SupervisorOptions::from(&config.encoder));
    let runner = BatchRunner::new(supervisor, probe);
    let control = runner.control();

    let interrupts = tokio::spawn(handle_interrupts(control.clone()));
    let keys = if std::io::stdin().is_terminal() && !args.json {
        eprintln!("Type s + Enter to skip the current job, q + Enter to stop the batch.");
        Some(tokio::spawn(handle_key_commands(control.clone())))
    } else {
        None
    };

    let (tx, rx) = event_channel();
    let render = tokio::spawn(display::render(rx, args.json));

    let result = runner.run(&catalog, selection, resolved, tx).await;

    interrupts.abort();
    if let Some(keys) = keys {
        keys.abort();
    }
    render.await.context("Progress display stopped unexpectedly")?;

    let summary = result?;
    Ok(if summary.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn build_settings(config: &Config, args: &EncodeArgs, hwaccel: HwAccel) -> Result<EncodeSettings> {
    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| config.output.directory.clone());

    let mut settings = EncodeSettings::for_codec(args.codec, output_dir);
    settings.hwaccel = hwaccel;
    settings.quality = build_quality(args, hwaccel)?;
    settings.input_fps = args.input_fps;
    settings.output_fps = args.output_fps;
    settings.scale = args.scale;
    settings.pixel_format = args.pix_fmt.clone();
    settings.output_basename = args.name.clone();
    settings.verbose = args.verbose_encoder;
    Ok(settings)
}

/// Catalog defaults for the codec with the quality flags applied.
///
/// A flag that has no meaning for the resolved encoder is an error rather
/// than silently ignored.
fn build_quality(args: &EncodeArgs, hwaccel: HwAccel) -> Result<Quality> {
    let mut quality = Quality::default_for(args.codec, hwaccel);

    let applicable: &[&str] = match &mut quality {
        Quality::Crf { crf, preset } => {
            if let Some(v) = args.crf {
                *crf = v;
            }
            if let Some(p) = &args.preset {
                *preset = p.clone();
            }
            &["--crf", "--preset"]
        }
        Quality::Vp9 {
            crf,
            deadline,
            cpu_used,
        } => {
            if let Some(v) = args.crf {
                *crf = v;
            }
            if let Some(d) = args.deadline {
                *deadline = d;
            }
            if let Some(c) = args.cpu_used {
                *cpu_used = c;
            }
            &["--crf", "--deadline", "--cpu-used"]
        }
        Quality::ProRes { profile } => {
            if let Some(p) = args.prores_profile {
                *profile = p;
            }
            &["--prores-profile"]
        }
        Quality::Dnxhr { profile } => {
            if let Some(p) = args.dnxhr_profile {
                *profile = p;
            }
            &["--dnxhr-profile"]
        }
        Quality::Hardware { cq, preset } => {
            if let Some(v) = args.cq.or(args.crf) {
                *cq = v;
            }
            if let Some(p) = &args.preset {
                *preset = Some(p.clone());
            }
            &["--cq", "--crf", "--preset"]
        }
    };

    let given = [
        ("--crf", args.crf.is_some()),
        ("--cq", args.cq.is_some()),
        ("--preset", args.preset.is_some()),
        ("--deadline", args.deadline.is_some()),
        ("--cpu-used", args.cpu_used.is_some()),
        ("--prores-profile", args.prores_profile.is_some()),
        ("--dnxhr-profile", args.dnxhr_profile.is_some()),
    ];
    if let Some((flag, _)) = given
        .iter()
        .find(|(flag, set)| *set && !applicable.contains(flag))
    {
        let (encoder, _) = args.codec.spec().encoder_for(hwaccel);
        bail!("{} does not apply to {} ({})", flag, args.codec, encoder);
    }

    Ok(quality)
}

/// Sequence identifiers to encode, in display order.
///
/// `picks` name single sequences as `DIR:START`; otherwise every sequence in
/// the `dirs` subdirectories (all when empty) is selected.
fn select(
    catalog: &SequenceCatalog,
    parent: &Path,
    dirs: &[String],
    picks: &[String],
) -> Result<Vec<SequenceId>> {
    if !picks.is_empty() {
        return picks
            .iter()
            .map(|pick| {
                let (dir, start) = pick
                    .rsplit_once(':')
                    .with_context(|| format!("Expected DIR:START, got '{}'", pick))?;
                let id = SequenceId {
                    directory: parent.join(dir),
                    start: start.to_string(),
                };
                if catalog.get(&id).is_none() {
                    bail!("No sequence starting at {} in {}", start, dir);
                }
                Ok(id)
            })
            .collect();
    }

    let mut directories: Vec<PathBuf> = if dirs.is_empty() {
        let mut all: Vec<PathBuf> = catalog.iter().map(|s| s.directory.clone()).collect();
        all.dedup();
        all
    } else {
        dirs.iter().map(|d| parent.join(d)).collect()
    };
    directories.dedup();

    let mut selection = Vec::new();
    for dir in &directories {
        let mut sequences: Vec<_> = catalog.in_directory(dir).collect();
        if sequences.is_empty() {
            bail!("No sequences found in {}", dir.display());
        }
        sequences.sort_by(|a, b| {
            (a.start_value, &a.start_digits).cmp(&(b.start_value, &b.start_digits))
        });
        selection.extend(sequences.into_iter().map(|s| s.id()));
    }

    if selection.is_empty() {
        bail!("No image sequences found under {}", parent.display());
    }
    Ok(selection)
}

/// First Ctrl-C cancels the batch, the second exits immediately.
async fn handle_interrupts(control: BatchControl) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    eprintln!("Cancelling batch; press Ctrl-C again to exit immediately.");
    control.cancel_batch().await;

    if tokio::signal::ctrl_c().await.is_ok() {
        std::process::exit(130);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyCommand {
    SkipJob,
    StopBatch,
}

fn parse_key_command(line: &str) -> Option<KeyCommand> {
    match line.trim().to_lowercase().as_str() {
        "s" | "skip" => Some(KeyCommand::SkipJob),
        "q" | "quit" | "stop" => Some(KeyCommand::StopBatch),
        _ => None,
    }
}

/// Reads `s`/`q` commands from the terminal.
///
/// Stdin is read on a plain thread so a pending read never holds up runtime
/// shutdown.
async fn handle_key_commands(control: BatchControl) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if let Some(cmd) = parse_key_command(&line) {
                if tx.send(cmd).is_err() {
                    break;
                }
            }
        }
    });

    while let Some(cmd) = rx.recv().await {
        match cmd {
            KeyCommand::SkipJob => {
                if control.cancel_current().await {
                    eprintln!("Skipping current job.");
                }
            }
            KeyCommand::StopBatch => {
                if control.cancel_batch().await {
                    eprintln!("Stopping batch after cancelling the current job.");
                }
            }
        }
    }
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,%+".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
