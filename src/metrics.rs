use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{anyhow, Context};
use serde::Deserialize;
use statrs::statistics::Statistics;

use crate::config::Config;

#[derive(Deserialize)]
struct VmafLogMetrics {
    vmaf: f64,
    psnr_y: Option<f64>,
    float_ssim: Option<f64>,
}

#[derive(Deserialize)]
struct VmafLogFrame {
    metrics: VmafLogMetrics,
}

#[derive(Deserialize)]
struct VmafLog {
    frames: Vec<VmafLogFrame>,
}

/// Mean scores for one encode, averaged over every frame the probe scored.
/// PSNR and SSIM are present only when the probe was asked to compute them.
#[derive(Clone, Debug)]
pub struct QualityScores {
    pub vmaf: f64,
    pub psnr: Option<f64>,
    pub ssim: Option<f64>,
}

/// Reads the per-frame JSON log the libvmaf filter wrote and reduces it to
/// mean scores.
pub fn parse_quality_log(log_path: &Path) -> anyhow::Result<QualityScores> {
    let file =
        File::open(log_path).with_context(|| format!("Unable to open quality log {log_path:?}"))?;
    let reader = BufReader::new(file);

    let log: VmafLog = serde_json::from_reader(reader)
        .with_context(|| format!("Unable to parse quality log {log_path:?}"))?;

    if log.frames.is_empty() {
        return Err(anyhow!(
            "Quality log {log_path:?} does not contain any frames"
        ));
    }

    let vmaf = log
        .frames
        .iter()
        .map(|frame| frame.metrics.vmaf)
        .collect::<Vec<_>>();

    let psnr = log
        .frames
        .iter()
        .filter_map(|frame| frame.metrics.psnr_y)
        .collect::<Vec<_>>();

    let ssim = log
        .frames
        .iter()
        .filter_map(|frame| frame.metrics.float_ssim)
        .collect::<Vec<_>>();

    Ok(QualityScores {
        vmaf: Statistics::mean(&vmaf),
        psnr: (psnr.len() == log.frames.len()).then(|| Statistics::mean(&psnr)),
        ssim: (ssim.len() == log.frames.len()).then(|| Statistics::mean(&ssim)),
    })
}

/// Builds the option string handed to the libvmaf filter. The JSON log is
/// the side channel the sweep reads back after the probe exits.
#[must_use]
pub fn vmaf_filter_options(config: &Config, log_path: &Path) -> String {
    let mut options = format!(
        "log_fmt=json:log_path={}",
        log_path.to_string_lossy().replace('\\', "/")
    );

    if config.threads > 0 {
        options.push_str(&format!(":n_threads={}", config.threads));
    }

    let mut features = vec![];

    if config.calculate_psnr {
        features.push("name=psnr");
    }

    if config.calculate_ssim {
        features.push("name=float_ssim");
    }

    if !features.is_empty() {
        options.push_str(&format!(":feature={}", features.join("|")));
    }

    if let Some(extra) = &config.vmaf_options {
        options.push_str(&format!(":{extra}"));
    }

    options
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use clap::Parser;

    use super::*;

    fn write_log(json: &str) -> (tempfile::TempDir, PathBuf) {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("Metrics of each frame.json");
        let mut file = File::create(&path).unwrap();
        file.write_all(json.as_bytes()).unwrap();
        (directory, path)
    }

    #[test]
    fn scores_are_averaged_over_all_frames() {
        let (_directory, path) = write_log(
            r#"{"frames": [
                {"metrics": {"vmaf": 90.0, "psnr_y": 40.0, "float_ssim": 0.98}},
                {"metrics": {"vmaf": 94.0, "psnr_y": 42.0, "float_ssim": 0.99}}
            ]}"#,
        );

        let scores = parse_quality_log(&path).unwrap();

        assert!((scores.vmaf - 92.0).abs() < 1e-9);
        assert!((scores.psnr.unwrap() - 41.0).abs() < 1e-9);
        assert!((scores.ssim.unwrap() - 0.985).abs() < 1e-9);
    }

    #[test]
    fn optional_metrics_are_absent_when_the_probe_skipped_them() {
        let (_directory, path) = write_log(
            r#"{"frames": [
                {"metrics": {"vmaf": 90.0}},
                {"metrics": {"vmaf": 94.0}}
            ]}"#,
        );

        let scores = parse_quality_log(&path).unwrap();

        assert!(scores.psnr.is_none());
        assert!(scores.ssim.is_none());
    }

    #[test]
    fn empty_logs_are_rejected() {
        let (_directory, path) = write_log(r#"{"frames": []}"#);

        assert!(parse_quality_log(&path).is_err());
    }

    #[test]
    fn filter_options_reference_the_log_path() {
        let config = Config::parse_from(["video-quality-sweep", "video.mkv"]);

        let options = vmaf_filter_options(&config, Path::new("out/Metrics of each frame.json"));

        assert_eq!(
            options,
            "log_fmt=json:log_path=out/Metrics of each frame.json"
        );
    }

    #[test]
    fn filter_options_compose_threads_features_and_extras() {
        let config = Config::parse_from([
            "video-quality-sweep",
            "--threads",
            "4",
            "--calculate-psnr",
            "--calculate-ssim",
            "--vmaf-options",
            "n_subsample=5",
            "video.mkv",
        ]);

        let options = vmaf_filter_options(&config, Path::new("log.json"));

        assert_eq!(
            options,
            "log_fmt=json:log_path=log.json:n_threads=4:feature=name=psnr|name=float_ssim:n_subsample=5"
        );
    }
}
