use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{Parser, ValueEnum};
use serde::Deserialize;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Encoder {
    X264,
    X265,
    LibaomAv1,
}

impl std::fmt::Display for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::X264 => write!(f, "x264"),
            Self::X265 => write!(f, "x265"),
            Self::LibaomAv1 => write!(f, "libaom-av1"),
        }
    }
}

impl Encoder {
    /// FFmpeg codec library selected with -c:v.
    #[must_use]
    pub const fn codec_name(&self) -> &'static str {
        match self {
            Self::X264 => "libx264",
            Self::X265 => "libx265",
            Self::LibaomAv1 => "libaom-av1",
        }
    }

    /// CRF used when the user does not supply one. These match the FFmpeg
    /// defaults for each library.
    #[must_use]
    pub const fn default_crf(&self) -> i64 {
        match self {
            Self::X264 => 23,
            Self::X265 => 28,
            Self::LibaomAv1 => 32,
        }
    }
}

#[derive(Clone, Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Video encoder to use
    #[arg(short, long, value_enum, default_value_t = Encoder::X264)]
    pub encoder: Encoder,

    /// CRF value(s). Two or more values activate CRF comparison mode
    #[arg(short, long, value_parser = clap::value_parser!(i64).range(0..=63), num_args(1..))]
    pub crf: Vec<i64>,

    /// Encoder preset(s). Two or more presets activate preset comparison mode
    #[arg(short, long, num_args(1..), default_value = "medium")]
    pub preset: Vec<String>,

    /// Compare the presets defined in the custom preset configuration file
    #[arg(long, requires = "crf")]
    pub custom_presets: bool,

    /// Custom preset configuration file
    #[arg(long, default_value = "custom_presets.json")]
    pub custom_presets_file: PathBuf,

    /// libaom-av1 cpu-used option
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=8), default_value_t = 5)]
    pub av1_cpu_used: u8,

    /// Video filter(s) applied to every encode and to the reference stream
    /// during quality scoring
    #[arg(long)]
    pub video_filters: Option<String>,

    /// Additional options appended to the libvmaf filter
    #[arg(long)]
    pub vmaf_options: Option<String>,

    /// Also calculate PSNR
    #[arg(long)]
    pub calculate_psnr: bool,

    /// Also calculate SSIM
    #[arg(long)]
    pub calculate_ssim: bool,

    /// Number of threads the libvmaf filter may use (0 lets libvmaf decide)
    #[arg(short, long, value_parser = clap::value_parser!(usize), default_value_t = 0)]
    pub threads: usize,

    /// Number of decimal places used when rounding reported values
    #[arg(short, long, value_parser = clap::value_parser!(usize), default_value_t = 2)]
    pub decimal_places: usize,

    /// Skip transcoding and only score an existing encode against the source
    #[arg(long, requires = "transcoded_video")]
    pub no_transcoding_mode: bool,

    /// Previously transcoded video to score in no-transcoding mode
    #[arg(long, requires = "no_transcoding_mode")]
    pub transcoded_video: Option<PathBuf>,

    /// Source video file
    pub source: PathBuf,

    /// Output directory (defaults to a directory named after the source file)
    #[arg(short, long)]
    pub output_directory: Option<PathBuf>,
}

impl Config {
    /// CRF held constant while another axis is swept.
    #[must_use]
    pub fn fixed_crf(&self) -> i64 {
        self.crf
            .first()
            .copied()
            .unwrap_or_else(|| self.encoder.default_crf())
    }

    /// Preset held constant while another axis is swept.
    #[must_use]
    pub fn fixed_preset(&self) -> &str {
        self.preset.first().map_or("medium", String::as_str)
    }

    /// Container extension for encoded outputs. Encodes reuse the source
    /// container, except that M4V cannot carry HEVC, so x265 encodes of .m4v
    /// sources switch to .mp4.
    #[must_use]
    pub fn output_extension(&self) -> String {
        let extension = self.source.extension().map_or_else(
            || "mkv".to_owned(),
            |extension| extension.to_string_lossy().to_string(),
        );

        if extension.eq_ignore_ascii_case("m4v") && self.encoder == Encoder::X265 {
            "mp4".to_owned()
        } else {
            extension
        }
    }

    #[must_use]
    pub fn output_root(&self) -> PathBuf {
        self.output_directory.clone().unwrap_or_else(|| {
            self.source
                .file_name()
                .map_or_else(|| PathBuf::from("output"), PathBuf::from)
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CustomPreset {
    pub name: String,
    pub arguments: String,
}

#[derive(Deserialize)]
struct CustomPresetFile {
    presets: Vec<CustomPreset>,
}

/// Reads the custom preset set from its JSON configuration file. Preset
/// names must be unique, since they name output folders and table rows.
pub fn load_custom_presets(path: &Path) -> anyhow::Result<Vec<CustomPreset>> {
    let file = File::open(path)
        .with_context(|| format!("Unable to open custom preset configuration {path:?}"))?;
    let reader = BufReader::new(file);

    let parsed: CustomPresetFile = serde_json::from_reader(reader)
        .with_context(|| format!("Unable to parse custom preset configuration {path:?}"))?;

    if parsed.presets.is_empty() {
        return Err(anyhow!(
            "Custom preset configuration {path:?} does not define any presets"
        ));
    }

    let mut seen = HashSet::new();

    for preset in &parsed.presets {
        if !seen.insert(preset.name.clone()) {
            return Err(anyhow!(
                "Custom preset configuration {path:?} defines the preset {:?} more than once",
                preset.name
            ));
        }
    }

    Ok(parsed.presets)
}
