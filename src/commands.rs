use std::ffi::OsString;
use std::path::PathBuf;

use crate::config::Encoder;

/// Flags prepended to every FFmpeg invocation: machine-readable progress on
/// stdout, no interactive stats, warnings only, overwrite without prompting.
pub const BASE_ARGUMENTS: [&str; 6] = ["-progress", "-", "-nostats", "-loglevel", "warning", "-y"];

/// One transcode invocation. Built fresh per sweep point and discarded once
/// the subprocess exits.
#[derive(Clone, Debug)]
pub struct EncodeSpec {
    pub source_path: PathBuf,
    pub encoder: Encoder,
    pub crf: String,
    pub preset: String,
    pub output_path: PathBuf,
    pub custom_presets_mode: bool,
    pub video_filters: Option<String>,
    pub av1_cpu_used: u8,
}

impl EncodeSpec {
    #[must_use]
    pub fn arguments(&self) -> Vec<OsString> {
        let mut arguments: Vec<OsString> = vec![
            "-i".into(),
            self.source_path.clone().into(),
            "-map".into(),
            "0:V".into(),
            "-c:v".into(),
            self.encoder.codec_name().into(),
        ];

        // Custom preset strings carry their own rate control arguments.
        if !self.custom_presets_mode {
            arguments.push("-crf".into());
            arguments.push(self.crf.clone().into());
        }

        match self.encoder {
            Encoder::LibaomAv1 => {
                // libaom-av1 interprets -crf as a quality ceiling unless the
                // bitrate is pinned to zero, and takes cpu-used instead of
                // the named presets the other encoders understand.
                arguments.push("-b:v".into());
                arguments.push("0".into());
                arguments.push("-cpu-used".into());
                arguments.push(self.av1_cpu_used.to_string().into());
            }
            Encoder::X264 | Encoder::X265 => {
                if self.custom_presets_mode {
                    arguments.extend(self.preset.split_whitespace().map(OsString::from));
                } else {
                    arguments.push("-preset".into());
                    arguments.push(self.preset.clone().into());
                }
            }
        }

        if let Some(filters) = &self.video_filters {
            arguments.push("-vf".into());
            arguments.push(filters.clone().into());
        }

        arguments.push(self.output_path.clone().into());

        arguments
    }
}

/// One libvmaf scoring invocation comparing an encode against its source.
#[derive(Clone, Debug)]
pub struct QualityProbeSpec {
    pub distorted_path: PathBuf,
    pub reference_path: PathBuf,
    /// Rational frame rate ("num/den") so long inputs cannot drift.
    pub frame_rate: String,
    pub video_filters: Option<String>,
    pub vmaf_options: String,
}

impl QualityProbeSpec {
    #[must_use]
    pub fn arguments(&self) -> Vec<OsString> {
        // Both streams are re-timestamped to start at zero so container
        // timestamp offsets cannot skew frame alignment. The reference
        // additionally receives any extra filter chain before comparison.
        let reference_filters = self
            .video_filters
            .as_ref()
            .map_or_else(String::new, |filters| format!(",{filters}"));

        let filter_graph = format!(
            "[0:v]setpts=PTS-STARTPTS[dist];[1:v]setpts=PTS-STARTPTS{reference_filters}[ref];[dist][ref]libvmaf={}",
            self.vmaf_options
        );

        vec![
            "-r".into(),
            self.frame_rate.clone().into(),
            "-i".into(),
            self.distorted_path.clone().into(),
            "-r".into(),
            self.frame_rate.clone().into(),
            "-i".into(),
            self.reference_path.clone().into(),
            "-map".into(),
            "0:V".into(),
            "-map".into(),
            "1:V".into(),
            "-lavfi".into(),
            filter_graph.into(),
            "-f".into(),
            "null".into(),
            "-".into(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_spec(encoder: Encoder) -> EncodeSpec {
        EncodeSpec {
            source_path: PathBuf::from("source.mkv"),
            encoder,
            crf: "23".to_owned(),
            preset: "medium".to_owned(),
            output_path: PathBuf::from("output.mkv"),
            custom_presets_mode: false,
            video_filters: None,
            av1_cpu_used: 5,
        }
    }

    fn tokens(arguments: &[OsString]) -> Vec<String> {
        arguments
            .iter()
            .map(|argument| argument.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn transcode_arguments_never_contain_empty_tokens() {
        for encoder in [Encoder::X264, Encoder::X265, Encoder::LibaomAv1] {
            let arguments = tokens(&encode_spec(encoder).arguments());

            assert!(!arguments.iter().any(String::is_empty));
            assert!(!arguments.contains(&"-vf".to_owned()));
        }
    }

    #[test]
    fn transcode_arguments_start_with_input_and_stream_mapping() {
        let arguments = tokens(&encode_spec(Encoder::X264).arguments());

        assert_eq!(
            arguments[..6],
            ["-i", "source.mkv", "-map", "0:V", "-c:v", "libx264"]
        );
        assert_eq!(arguments.last().unwrap(), "output.mkv");
    }

    #[test]
    fn custom_presets_mode_omits_the_rate_control_flag() {
        let mut spec = encode_spec(Encoder::X264);
        spec.custom_presets_mode = true;
        spec.preset = "-preset faster -tune film".to_owned();

        let arguments = tokens(&spec.arguments());

        assert!(!arguments.contains(&"-crf".to_owned()));

        // The opaque preset string is split on whitespace, never quoted.
        let position = arguments.iter().position(|token| token == "-tune").unwrap();
        assert_eq!(arguments[position + 1], "film");
    }

    #[test]
    fn av1_pins_bitrate_and_uses_cpu_used_instead_of_presets() {
        let arguments = tokens(&encode_spec(Encoder::LibaomAv1).arguments());

        let position = arguments.iter().position(|token| token == "-b:v").unwrap();
        assert_eq!(arguments[position + 1], "0");
        assert_eq!(arguments[position + 2], "-cpu-used");
        assert_eq!(arguments[position + 3], "5");
        assert!(!arguments.contains(&"-preset".to_owned()));
    }

    #[test]
    fn video_filters_are_appended_before_the_output_path() {
        let mut spec = encode_spec(Encoder::X264);
        spec.video_filters = Some("crop=1920:800".to_owned());

        let arguments = tokens(&spec.arguments());

        let position = arguments.iter().position(|token| token == "-vf").unwrap();
        assert_eq!(arguments[position + 1], "crop=1920:800");
        assert_eq!(position + 2, arguments.len() - 1);
    }

    fn probe_spec() -> QualityProbeSpec {
        QualityProbeSpec {
            distorted_path: PathBuf::from("distorted.mkv"),
            reference_path: PathBuf::from("source.mkv"),
            frame_rate: "24000/1001".to_owned(),
            video_filters: None,
            vmaf_options: "log_fmt=json:log_path=log.json".to_owned(),
        }
    }

    #[test]
    fn probe_graph_retimestamps_both_streams_and_discards_output() {
        let arguments = tokens(&probe_spec().arguments());

        let graph = &arguments[arguments.iter().position(|token| token == "-lavfi").unwrap() + 1];

        assert_eq!(
            graph,
            "[0:v]setpts=PTS-STARTPTS[dist];[1:v]setpts=PTS-STARTPTS[ref];[dist][ref]libvmaf=log_fmt=json:log_path=log.json"
        );

        assert_eq!(arguments[arguments.len() - 3..], ["-f", "null", "-"]);
    }

    #[test]
    fn probe_graph_applies_extra_filters_to_the_reference_only() {
        let mut spec = probe_spec();
        spec.video_filters = Some("scale=1280:720".to_owned());

        let arguments = tokens(&spec.arguments());
        let graph = &arguments[arguments.iter().position(|token| token == "-lavfi").unwrap() + 1];

        assert!(graph.contains("[1:v]setpts=PTS-STARTPTS,scale=1280:720[ref]"));
        assert!(graph.contains("[0:v]setpts=PTS-STARTPTS[dist]"));
    }

    #[test]
    fn probe_uses_the_rational_frame_rate_for_both_inputs() {
        let arguments = tokens(&probe_spec().arguments());

        assert_eq!(arguments[..4], ["-r", "24000/1001", "-i", "distorted.mkv"]);
        assert_eq!(arguments[4..8], ["-r", "24000/1001", "-i", "source.mkv"]);
    }
}
