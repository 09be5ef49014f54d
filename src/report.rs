use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use prettytable::{Cell, Row, Table};
use statrs::statistics::Statistics;

use crate::config::Config;
use crate::metrics::QualityScores;
use crate::util::{generate_score_chart, round_to, HumanBitrate};

/// One row of the comparison table. Immutable once appended; `encode_time`
/// is absent (not zero) when no transcoding occurred.
pub struct ResultRow {
    pub label: String,
    pub encode_time: Option<f64>,
    pub size_megabytes: f64,
    pub bitrate: f64,
    pub scores: QualityScores,
}

/// Owns the only mutable cross-iteration state in a sweep: the result table
/// and the running mean of VMAF scores. Rows are durable on disk before the
/// next sweep point starts, so an aborted sweep leaves a usable partial
/// report behind.
pub struct ResultAccumulator {
    table: Table,
    table_path: PathBuf,
    scores: Vec<f64>,
    decimal_places: usize,
    include_encode_time: bool,
    include_psnr: bool,
    include_ssim: bool,
    source_name: String,
    original_bitrate: f64,
    fixed_parameter: String,
}

impl ResultAccumulator {
    #[must_use]
    pub fn new(
        config: &Config,
        table_path: PathBuf,
        axis_kind: &str,
        include_encode_time: bool,
        fixed_parameter: String,
        original_bitrate: f64,
    ) -> Self {
        let mut column_names = vec![axis_kind.to_owned()];

        if include_encode_time {
            column_names.push("Encoding Time (s)".to_owned());
        }

        column_names.push("Size".to_owned());
        column_names.push("Bitrate".to_owned());
        column_names.push("VMAF".to_owned());

        if config.calculate_psnr {
            column_names.push("PSNR".to_owned());
        }

        if config.calculate_ssim {
            column_names.push("SSIM".to_owned());
        }

        let mut table = Table::new();

        table.set_titles(Row::new(
            column_names.iter().map(|name| Cell::new(name)).collect(),
        ));

        Self {
            table,
            table_path,
            scores: vec![],
            decimal_places: config.decimal_places,
            include_encode_time,
            include_psnr: config.calculate_psnr,
            include_ssim: config.calculate_ssim,
            source_name: config
                .source
                .file_name()
                .map_or_else(|| config.source.to_string_lossy().to_string(), |name| {
                    name.to_string_lossy().to_string()
                }),
            original_bitrate,
            fixed_parameter,
        }
    }

    /// Appends one row, rewrites the table file, and returns the updated
    /// cumulative mean VMAF over every row seen so far.
    pub fn append(&mut self, row: &ResultRow) -> anyhow::Result<f64> {
        let decimal_places = self.decimal_places;
        let mut cells = vec![Cell::new(&row.label)];

        if self.include_encode_time {
            let encode_time = row
                .encode_time
                .ok_or_else(|| anyhow!("Encoding time missing for sweep point {}", row.label))?;

            cells.push(Cell::new(&format!("{encode_time:.decimal_places$}")));
        }

        cells.push(Cell::new(&format!(
            "{:.decimal_places$} MB",
            row.size_megabytes
        )));
        cells.push(Cell::new(&format!("{}", HumanBitrate(row.bitrate))));
        cells.push(Cell::new(&format!("{:.decimal_places$}", row.scores.vmaf)));

        if self.include_psnr {
            cells.push(Cell::new(&row.scores.psnr.map_or_else(
                || "N/A".to_owned(),
                |psnr| format!("{psnr:.decimal_places$}"),
            )));
        }

        if self.include_ssim {
            cells.push(Cell::new(&row.scores.ssim.map_or_else(
                || "N/A".to_owned(),
                |ssim| format!("{ssim:.decimal_places$}"),
            )));
        }

        self.table.add_row(Row::new(cells));
        self.scores.push(row.scores.vmaf);

        let mean = self.mean();

        self.write_table(mean)
            .context("Unable to write result table")?;

        Ok(mean)
    }

    #[must_use]
    pub fn mean(&self) -> f64 {
        round_to(Statistics::mean(&self.scores), self.decimal_places)
    }

    /// Renders the per-axis bar chart from the full ordered series.
    pub fn finalize(
        &self,
        axis_kind: &str,
        labels: &[String],
        chart_path: &Path,
    ) -> anyhow::Result<()> {
        if labels.len() != self.scores.len() {
            return Err(anyhow!(
                "Chart label count ({}) does not match recorded score count ({})",
                labels.len(),
                self.scores.len()
            ));
        }

        generate_score_chart(
            chart_path,
            axis_kind,
            "VMAF",
            labels,
            &self.scores,
            self.mean(),
        )
        .with_context(|| format!("Unable to generate {axis_kind} chart"))?;

        Ok(())
    }

    fn write_table(&self, mean: f64) -> anyhow::Result<()> {
        let decimal_places = self.decimal_places;
        let mut output = self.table.to_string();

        output.push_str(&format!("\nOriginal file: {}", self.source_name));
        output.push_str(&format!(
            "\nOriginal Bitrate: {}",
            HumanBitrate(self.original_bitrate)
        ));
        output.push_str(&format!("\nMean VMAF: {mean:.decimal_places$}"));

        if !self.fixed_parameter.is_empty() {
            output.push_str(&format!("\n{}", self.fixed_parameter));
        }

        output.push('\n');

        fs::write(&self.table_path, output)
            .with_context(|| format!("Unable to write result table to {:?}", self.table_path))?;

        Ok(())
    }
}
