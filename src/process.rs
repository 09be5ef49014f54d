use std::ffi::OsString;
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::time::Instant;

use anyhow::{anyhow, Context};
use indicatif::ProgressBar;
use tracing::debug;

use crate::commands::BASE_ARGUMENTS;
use crate::util::{create_progress_style, round_to};

/// Tracks completion of one FFmpeg run against an estimated total frame
/// count. The estimate may diverge from the real count (variable frame rate
/// sources, filter-induced drops), so the reported position is clamped
/// rather than trusted.
pub struct ProgressMonitor {
    expected_frames: u64,
    position: u64,
}

impl ProgressMonitor {
    #[must_use]
    pub const fn new(expected_frames: u64) -> Self {
        Self {
            expected_frames,
            position: 0,
        }
    }

    /// Consumes one line of the -progress key=value stream. Only the frame
    /// counter is of interest; every other key is ignored. Returns the
    /// updated position, clamped to the expected total and monotonically
    /// non-decreasing.
    pub fn feed(&mut self, line: &str) -> Option<u64> {
        let (key, value) = line.trim().split_once('=')?;

        if key != "frame" {
            return None;
        }

        let frames = value.trim().parse::<u64>().ok()?;

        self.position = self.position.max(frames.min(self.expected_frames));

        Some(self.position)
    }

    #[must_use]
    pub const fn expected_frames(&self) -> u64 {
        self.expected_frames
    }

    /// Completion percentage, never above 100.
    #[allow(clippy::as_conversions)]
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.expected_frames == 0 {
            return 100.0;
        }

        self.position as f64 * 100.0 / self.expected_frames as f64
    }
}

/// FFmpeg does not announce a total frame count up front, so it is estimated
/// from duration and frame rate. Rounding up and adding one keeps a complete
/// run from stalling just below 100% on rounding alone.
#[allow(clippy::as_conversions)]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[must_use]
pub fn estimate_total_frames(duration: f64, frame_rate: f64) -> u64 {
    (duration * frame_rate).ceil() as u64 + 1
}

/// Runs FFmpeg with the given arguments, following its progress stream until
/// it exits. Returns the elapsed wall time in seconds, rounded to the given
/// number of decimal places.
///
/// No timeout is applied: a hung FFmpeg blocks the sweep indefinitely, and
/// callers needing bounded latency must wrap this in an external watchdog.
pub fn run_ffmpeg(
    arguments: &[OsString],
    expected_frames: u64,
    decimal_places: usize,
    message: &str,
) -> anyhow::Result<f64> {
    debug!(
        "Running: ffmpeg {} {}",
        BASE_ARGUMENTS.join(" "),
        arguments
            .iter()
            .map(|argument| argument.to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let progress_bar = ProgressBar::new(expected_frames);

    progress_bar.set_style(
        create_progress_style(
            "{spinner:.green} [{elapsed_precise}] {msg:24} [{wide_bar:.cyan/blue}] {percent:>3}% ({smooth_per_sec:>6} FPS, ETA: {smooth_eta:>3})"
        )
        .context("Unable to create FFmpeg progress bar style")?,
    );

    progress_bar.set_message(message.to_owned());

    let start = Instant::now();

    let mut child = Command::new("ffmpeg")
        .args(BASE_ARGUMENTS)
        .args(arguments)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("Unable to spawn FFmpeg subprocess. Is ffmpeg on your PATH?")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("Unable to access stdout for FFmpeg subprocess"))?;

    let stderr = BufReader::new(
        child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("Unable to access stderr for FFmpeg subprocess"))?,
    );

    // Drained on its own thread so FFmpeg can never block on a full pipe
    // while this thread follows the progress stream.
    let stderr_thread =
        std::thread::spawn(move || stderr.lines().map_while(Result::ok).collect::<Vec<_>>());

    let mut monitor = ProgressMonitor::new(expected_frames);

    for line in BufReader::new(stdout).lines() {
        let line = line.context("Unable to read progress stream from FFmpeg subprocess")?;

        if let Some(position) = monitor.feed(&line) {
            progress_bar.set_position(position);
        }
    }

    let status = child
        .wait()
        .context("Unable to wait for FFmpeg subprocess")?;

    let diagnostics = stderr_thread.join().unwrap_or_default();

    if !status.success() {
        progress_bar.abandon();

        return Err(anyhow!(
            "FFmpeg exited with status {status} and the following output:\n{}",
            diagnostics.join("\n")
        ));
    }

    progress_bar.set_position(expected_frames);
    progress_bar.finish();

    Ok(round_to(start.elapsed().as_secs_f64(), decimal_places))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_tracks_the_frame_counter() {
        let mut monitor = ProgressMonitor::new(100);

        assert_eq!(monitor.feed("frame=25"), Some(25));
        assert_eq!(monitor.feed("frame=50"), Some(50));
        assert!((monitor.percent() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn monitor_ignores_unrecognized_keys() {
        let mut monitor = ProgressMonitor::new(100);

        assert_eq!(monitor.feed("fps=23.98"), None);
        assert_eq!(monitor.feed("out_time_ms=1500000"), None);
        assert_eq!(monitor.feed("progress=continue"), None);
        assert_eq!(monitor.feed("not a key value pair"), None);
        assert_eq!(monitor.feed("frame=abc"), None);
    }

    #[test]
    fn monitor_clamps_overshoot_to_the_expected_total() {
        let mut monitor = ProgressMonitor::new(100);

        assert_eq!(monitor.feed("frame=250"), Some(100));
        assert!((monitor.percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn monitor_never_moves_backwards() {
        let mut monitor = ProgressMonitor::new(100);

        assert_eq!(monitor.feed("frame=80"), Some(80));
        assert_eq!(monitor.feed("frame=60"), Some(80));
    }

    #[test]
    fn monitor_with_zero_expected_frames_reports_complete() {
        let monitor = ProgressMonitor::new(0);

        assert!((monitor.percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn total_frames_round_up_with_a_margin() {
        assert_eq!(estimate_total_frames(10.0, 24.0), 241);
        assert_eq!(estimate_total_frames(10.5, 23.976), 253);
        assert_eq!(estimate_total_frames(0.0, 24.0), 1);
    }
}
