use std::path::Path;

use anyhow::Context;
use cached::{proc_macro::cached, UnboundCache};
use ffmpeg::{ffi, format, media, Error, Rational};

#[derive(Clone, Debug)]
pub struct MediaInfo {
    /// Duration in seconds.
    pub duration: f64,
    pub frame_rate_numerator: i32,
    pub frame_rate_denominator: i32,
    /// Overall bitrate in bits per second.
    pub bitrate: f64,
}

impl MediaInfo {
    #[must_use]
    pub fn frame_rate(&self) -> f64 {
        f64::from(self.frame_rate_numerator) / f64::from(self.frame_rate_denominator)
    }

    /// Exact rational frame rate for FFmpeg's -r option. Passing the float
    /// instead would accumulate timestamp drift over long inputs.
    #[must_use]
    pub fn frame_rate_fraction(&self) -> String {
        format!(
            "{}/{}",
            self.frame_rate_numerator, self.frame_rate_denominator
        )
    }
}

#[allow(clippy::as_conversions)]
#[allow(clippy::cast_precision_loss)]
#[cached(
    result = true,
    ty = "UnboundCache<String, MediaInfo>",
    create = "{ UnboundCache::with_capacity(8) }",
    convert = r#"{ format!("{}", path.to_string_lossy()) }"#
)]
pub fn get_media_info(path: &Path) -> anyhow::Result<MediaInfo> {
    let mut input_context =
        format::input(&path).with_context(|| format!("Unable to open {path:?} with FFmpeg"))?;

    let (stream_index, frame_rate) = {
        let input = input_context
            .streams()
            .best(media::Type::Video)
            .ok_or(Error::StreamNotFound)
            .with_context(|| format!("Unable to find video stream in {path:?}"))?;

        let frame_rate = if input.avg_frame_rate() > Rational(0, 1) {
            input.avg_frame_rate()
        } else {
            input.rate()
        };

        (input.index(), frame_rate)
    };

    let duration = input_context.duration();

    let duration = if duration >= 0 {
        duration as f64 / f64::from(ffi::AV_TIME_BASE)
    } else {
        // Containers without a duration field fall back to a packet count.
        let frame_count = input_context
            .packets()
            .filter(|(stream, _)| stream.index() == stream_index)
            .count();

        frame_count as f64 / f64::from(frame_rate)
    };

    let bitrate = std::fs::metadata(path)
        .with_context(|| format!("Unable to read the file size of {path:?}"))?
        .len() as f64
        * 8.0
        / duration;

    Ok(MediaInfo {
        duration,
        frame_rate_numerator: frame_rate.numerator(),
        frame_rate_denominator: frame_rate.denominator(),
        bitrate,
    })
}
