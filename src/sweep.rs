use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use tracing::info;

use crate::commands::{EncodeSpec, QualityProbeSpec};
use crate::config::{load_custom_presets, Config, CustomPreset};
use crate::media_info::{get_media_info, MediaInfo};
use crate::metrics::{parse_quality_log, vmaf_filter_options};
use crate::process::{estimate_total_frames, run_ffmpeg};
use crate::report::{ResultAccumulator, ResultRow};
use crate::util::{verify_directory, HumanBitrate};

const QUALITY_LOG_FILENAME: &str = "Metrics of each frame.json";

/// The single comparison dimension iterated in one run.
#[derive(Debug)]
pub enum SweepAxis {
    Crf(Vec<i64>),
    Preset(Vec<String>),
    CustomPreset(Vec<CustomPreset>),
}

/// One concrete value drawn from the active axis, together with the folder
/// and file naming it owns.
struct SweepPoint {
    label: String,
    folder_name: String,
    file_stem: String,
    crf: String,
    preset: String,
    custom_arguments: bool,
}

impl SweepAxis {
    /// Axis name used for folder, table and chart naming.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Crf(_) => "CRF",
            Self::Preset(_) => "Preset",
            Self::CustomPreset(_) => "CustomPreset",
        }
    }

    /// Table/chart labels, in sweep order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        match self {
            Self::Crf(values) => values.iter().map(ToString::to_string).collect(),
            Self::Preset(names) => names.clone(),
            Self::CustomPreset(presets) => {
                presets.iter().map(|preset| preset.name.clone()).collect()
            }
        }
    }

    fn points(&self, config: &Config) -> Vec<SweepPoint> {
        match self {
            Self::Crf(values) => values
                .iter()
                .map(|value| SweepPoint {
                    label: value.to_string(),
                    folder_name: format!("CRF {value}"),
                    file_stem: format!("CRF {value}"),
                    crf: value.to_string(),
                    preset: config.fixed_preset().to_owned(),
                    custom_arguments: false,
                })
                .collect(),
            Self::Preset(names) => names
                .iter()
                .map(|name| SweepPoint {
                    label: name.clone(),
                    folder_name: format!("Preset {name}"),
                    file_stem: name.clone(),
                    crf: config.fixed_crf().to_string(),
                    preset: name.clone(),
                    custom_arguments: false,
                })
                .collect(),
            Self::CustomPreset(presets) => presets
                .iter()
                .map(|preset| SweepPoint {
                    label: preset.name.clone(),
                    folder_name: format!("Preset {}", preset.name),
                    file_stem: preset.name.clone(),
                    crf: config.fixed_crf().to_string(),
                    preset: preset.arguments.clone(),
                    custom_arguments: true,
                })
                .collect(),
        }
    }
}

/// Determines the active comparison axis. The three axes are mutually
/// exclusive; requesting more than one is a configuration error rather than
/// a silent priority pick.
pub fn select_axis(config: &Config) -> anyhow::Result<SweepAxis> {
    let requested = [
        config.crf.len() > 1,
        config.preset.len() > 1,
        config.custom_presets,
    ]
    .iter()
    .filter(|requested| **requested)
    .count();

    if requested > 1 {
        return Err(anyhow!(
            "Choose one comparison axis: multiple CRF values, multiple presets, or --custom-presets"
        ));
    }

    if config.crf.len() > 1 {
        Ok(SweepAxis::Crf(config.crf.clone()))
    } else if config.preset.len() > 1 {
        Ok(SweepAxis::Preset(config.preset.clone()))
    } else if config.custom_presets {
        if config.crf.is_empty() {
            return Err(anyhow!(
                "Custom preset comparisons require an explicit --crf value"
            ));
        }

        Ok(SweepAxis::CustomPreset(
            load_custom_presets(&config.custom_presets_file)
                .context("Unable to load custom preset configuration")?,
        ))
    } else {
        // A single preset still runs as a one-point preset sweep.
        Ok(SweepAxis::Preset(vec![config.fixed_preset().to_owned()]))
    }
}

pub fn run(config: &Config) -> anyhow::Result<()> {
    let source_info = get_media_info(&config.source)
        .with_context(|| format!("Unable to read media info for {:?}", config.source))?;

    info!(
        "Source file: {}",
        config
            .source
            .file_name()
            .map_or_else(|| config.source.to_string_lossy().to_string(), |name| name
                .to_string_lossy()
                .to_string())
    );
    info!("Bitrate: {}", HumanBitrate(source_info.bitrate));
    info!(
        "Framerate: {} ({:.3} FPS)",
        source_info.frame_rate_fraction(),
        source_info.frame_rate()
    );

    if let Some(filters) = &config.video_filters {
        info!("Applying video filters: {filters}");
    }

    if config.no_transcoding_mode {
        return score_existing_encode(config, &source_info)
            .context("Unable to score the existing encode");
    }

    let axis = select_axis(config).context("Unable to determine the comparison axis")?;

    run_axis(config, &axis, &source_info)
}

fn run_axis(config: &Config, axis: &SweepAxis, source_info: &MediaInfo) -> anyhow::Result<()> {
    match axis {
        SweepAxis::Crf(values) => {
            info!("CRF comparison mode activated.");
            info!(
                "CRF values {} will be compared using the {} preset.",
                values
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
                config.fixed_preset()
            );
        }
        SweepAxis::Preset(names) => {
            info!("Preset comparison mode activated.");
            info!(
                "Presets {} will be compared at a CRF of {}.",
                names.join(", "),
                config.fixed_crf()
            );
        }
        SweepAxis::CustomPreset(_) => {
            info!("Custom preset comparison mode activated.");
        }
    }

    let axis_directory = config
        .output_root()
        .join(format!("{} Comparison", axis.kind()));

    verify_directory(&axis_directory)
        .with_context(|| format!("Unable to verify output directory {axis_directory:?}"))?;

    let fixed_parameter = match axis {
        SweepAxis::Crf(_) => format!("Preset {}", config.fixed_preset()),
        SweepAxis::Preset(_) | SweepAxis::CustomPreset(_) => format!("CRF {}", config.fixed_crf()),
    };

    let mut accumulator = ResultAccumulator::new(
        config,
        axis_directory.join("Table.txt"),
        axis.kind(),
        true,
        fixed_parameter,
        source_info.bitrate,
    );

    let expected_frames = estimate_total_frames(source_info.duration, source_info.frame_rate());
    let extension = config.output_extension();

    for (index, point) in axis.points(config).into_iter().enumerate() {
        info!("| {} |", point.folder_name);

        let point_directory = axis_directory.join(&point.folder_name);

        verify_directory(&point_directory)
            .with_context(|| format!("Unable to verify output directory {point_directory:?}"))?;

        let output_path = point_directory.join(format!("{}.{extension}", point.file_stem));

        let spec = EncodeSpec {
            source_path: config.source.clone(),
            encoder: config.encoder,
            crf: point.crf.clone(),
            preset: point.preset.clone(),
            output_path: output_path.clone(),
            custom_presets_mode: point.custom_arguments,
            video_filters: config.video_filters.clone(),
            av1_cpu_used: config.av1_cpu_used,
        };

        info!("Transcoding...");

        let encode_time = run_ffmpeg(
            &spec.arguments(),
            expected_frames,
            config.decimal_places,
            "Transcoding",
        )
        .with_context(|| format!("Unable to transcode {}", point.folder_name))?;

        let row = probe_and_build_row(
            config,
            source_info,
            &point_directory,
            output_path,
            point.label,
            Some(encode_time),
        )?;

        let mean = accumulator
            .append(&row)
            .context("Unable to record sweep point results")?;

        info!(
            "Mean VMAF across {} point(s): {mean:.precision$}",
            index + 1,
            precision = config.decimal_places
        );
    }

    let chart_path = axis_directory.join(format!("{} vs VMAF.svg", axis.kind()));

    accumulator
        .finalize(axis.kind(), &axis.labels(), &chart_path)
        .context("Unable to render the comparison chart")?;

    info!("All done! Check out the contents of {axis_directory:?}.");

    Ok(())
}

/// Quality-only mode: the caller already has an encode, so the transcode
/// step is skipped and the row carries no encoding time at all.
fn score_existing_encode(config: &Config, source_info: &MediaInfo) -> anyhow::Result<()> {
    let transcoded = config
        .transcoded_video
        .as_ref()
        .ok_or_else(|| anyhow!("No-transcoding mode requires --transcoded-video"))?;

    let transcoded_name = transcoded
        .file_name()
        .map_or_else(|| transcoded.to_string_lossy().to_string(), |name| {
            name.to_string_lossy().to_string()
        });

    let output_directory = config
        .output_directory
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{transcoded_name} Quality")));

    verify_directory(&output_directory)
        .with_context(|| format!("Unable to verify output directory {output_directory:?}"))?;

    let mut accumulator = ResultAccumulator::new(
        config,
        output_directory.join("Table.txt"),
        "File",
        false,
        String::new(),
        source_info.bitrate,
    );

    let row = probe_and_build_row(
        config,
        source_info,
        &output_directory,
        transcoded.clone(),
        transcoded_name,
        None,
    )?;

    accumulator
        .append(&row)
        .context("Unable to record quality results")?;

    info!("All done! Check out the contents of {output_directory:?}.");

    Ok(())
}

/// Shared tail of every sweep point: probe the encode against the source,
/// parse the score log, and assemble the table row.
#[allow(clippy::as_conversions)]
#[allow(clippy::cast_precision_loss)]
fn probe_and_build_row(
    config: &Config,
    source_info: &MediaInfo,
    point_directory: &std::path::Path,
    encoded_path: PathBuf,
    label: String,
    encode_time: Option<f64>,
) -> anyhow::Result<ResultRow> {
    let size_megabytes = fs::metadata(&encoded_path)
        .with_context(|| format!("Unable to read the file size of {encoded_path:?}"))?
        .len() as f64
        / 1_000_000.0;

    let encoded_info = get_media_info(&encoded_path)
        .with_context(|| format!("Unable to read media info for {encoded_path:?}"))?;

    let log_path = point_directory.join(QUALITY_LOG_FILENAME);

    let probe = QualityProbeSpec {
        distorted_path: encoded_path,
        reference_path: config.source.clone(),
        frame_rate: source_info.frame_rate_fraction(),
        video_filters: config.video_filters.clone(),
        vmaf_options: vmaf_filter_options(config, &log_path),
    };

    info!("Calculating quality metrics...");

    let expected_frames = estimate_total_frames(source_info.duration, source_info.frame_rate());

    run_ffmpeg(
        &probe.arguments(),
        expected_frames,
        config.decimal_places,
        "Scoring",
    )
    .with_context(|| format!("Unable to run the quality probe for {label}"))?;

    let scores = parse_quality_log(&log_path)
        .with_context(|| format!("Unable to read quality scores for {label}"))?;

    Ok(ResultRow {
        label,
        encode_time,
        size_megabytes,
        bitrate: encoded_info.bitrate,
        scores,
    })
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use clap::Parser;

    use super::*;

    #[test]
    fn two_crf_values_activate_crf_comparison() {
        let config =
            Config::parse_from(["video-quality-sweep", "video.mkv", "--crf", "23", "28"]);

        let axis = select_axis(&config).unwrap();

        assert_eq!(axis.kind(), "CRF");
        assert_eq!(axis.labels(), vec!["23".to_owned(), "28".to_owned()]);
    }

    #[test]
    fn presets_activate_preset_comparison_with_a_fixed_crf() {
        let config = Config::parse_from([
            "video-quality-sweep",
            "video.mkv",
            "--preset",
            "fast",
            "medium",
            "slow",
        ]);

        let axis = select_axis(&config).unwrap();

        assert_eq!(axis.kind(), "Preset");

        let points = axis.points(&config);

        assert_eq!(points.len(), 3);
        assert_eq!(points[0].crf, "23");
        assert_eq!(points[0].folder_name, "Preset fast");
        assert_eq!(points[0].file_stem, "fast");
        assert!(!points[0].custom_arguments);
    }

    #[test]
    fn a_single_preset_still_runs_as_a_one_point_sweep() {
        let config = Config::parse_from(["video-quality-sweep", "video.mkv"]);

        let axis = select_axis(&config).unwrap();

        assert_eq!(axis.kind(), "Preset");
        assert_eq!(axis.labels(), vec!["medium".to_owned()]);
    }

    #[test]
    fn requesting_two_axes_is_a_configuration_error() {
        let config = Config::parse_from([
            "video-quality-sweep",
            "video.mkv",
            "--crf",
            "23",
            "28",
            "--preset",
            "fast",
            "slow",
        ]);

        let error = select_axis(&config).unwrap_err();

        assert!(error.to_string().contains("one comparison axis"));
    }

    #[test]
    fn custom_presets_load_from_the_configured_file() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("custom_presets.json");

        let mut file = File::create(&path).unwrap();
        file.write_all(
            br#"{"presets": [
                {"name": "film", "arguments": "-preset slow -tune film"},
                {"name": "grain", "arguments": "-preset slow -tune grain"}
            ]}"#,
        )
        .unwrap();

        let config = Config::parse_from([
            "video-quality-sweep",
            "video.mkv",
            "--custom-presets",
            "--custom-presets-file",
            path.to_str().unwrap(),
            "--crf",
            "23",
        ]);

        let axis = select_axis(&config).unwrap();

        assert_eq!(axis.kind(), "CustomPreset");

        let points = axis.points(&config);

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].label, "film");
        assert_eq!(points[0].preset, "-preset slow -tune film");
        assert!(points[0].custom_arguments);
        assert_eq!(points[0].crf, "23");
    }

    #[test]
    fn duplicate_custom_presets_fail_before_any_folder_is_created() {
        let directory = tempfile::tempdir().unwrap();
        let presets_path = directory.path().join("custom_presets.json");
        let output_root = directory.path().join("output");

        let mut file = File::create(&presets_path).unwrap();
        file.write_all(
            br#"{"presets": [
                {"name": "fast", "arguments": "-preset fast"},
                {"name": "fast", "arguments": "-preset faster"}
            ]}"#,
        )
        .unwrap();

        let config = Config::parse_from([
            "video-quality-sweep",
            "video.mkv",
            "--custom-presets",
            "--custom-presets-file",
            presets_path.to_str().unwrap(),
            "--crf",
            "23",
            "--output-directory",
            output_root.to_str().unwrap(),
        ]);

        assert!(select_axis(&config).is_err());
        assert!(!output_root.exists());
    }

    #[test]
    fn crf_points_use_the_first_configured_preset() {
        let config = Config::parse_from([
            "video-quality-sweep",
            "video.mkv",
            "--crf",
            "23",
            "28",
            "--preset",
            "veryslow",
        ]);

        let axis = select_axis(&config).unwrap();
        let points = axis.points(&config);

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].label, "23");
        assert_eq!(points[0].folder_name, "CRF 23");
        assert_eq!(points[0].preset, "veryslow");
        assert_eq!(points[1].folder_name, "CRF 28");
    }
}
