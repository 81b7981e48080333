//! Run artifacts: stamped file names, charts, prediction dumps and the
//! per-epoch scalar stream.
//!
//! Every artifact name embeds the config name and the run timestamp, so runs
//! of the same config never collide.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;

use crate::error::Result;
use crate::training::MetricsHistory;

use super::charts::{generate_line_chart, DataSeries, COLOR_PRIMARY, COLOR_SECONDARY};

/// Identity of one run: config name plus start timestamp.
#[derive(Debug, Clone)]
pub struct RunStamp {
    config: String,
    timestamp: String,
}

impl RunStamp {
    pub fn new(config_name: &str) -> Self {
        Self {
            config: config_name.to_string(),
            timestamp: Local::now().format("%Y%m%d_%H%M%S").to_string(),
        }
    }

    /// `{kind}_{config}_{timestamp}.{ext}`
    pub fn file_name(&self, kind: &str, ext: &str) -> String {
        format!("{}_{}_{}.{}", kind, self.config, self.timestamp, ext)
    }
}

/// Per-epoch scalar stream, one JSON object per line.
///
/// Written for every run regardless of best-ness, so pruned and non-improving
/// runs still leave a trace.
pub struct ScalarLogger {
    writer: BufWriter<File>,
}

#[derive(Serialize)]
struct ScalarEntry<'a> {
    epoch: usize,
    name: &'a str,
    value: f64,
}

impl ScalarLogger {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }

    pub fn log(&mut self, epoch: usize, name: &str, value: f64) -> Result<()> {
        let entry = ScalarEntry { epoch, name, value };
        serde_json::to_writer(&mut self.writer, &entry)?;
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Softmax outputs of the test set, one block per active head.
#[derive(Debug, Default, Serialize)]
pub struct EvalDump {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub race: Option<Vec<Vec<f32>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<Vec<Vec<f32>>>,
}

/// Write the loss curve chart.
pub fn save_loss_chart(
    history: &MetricsHistory,
    stamp: &RunStamp,
    output_dir: &Path,
) -> Result<PathBuf> {
    let path = output_dir.join(stamp.file_name("loss_graph", "svg"));
    let series = vec![
        DataSeries::from_pairs("loss", &history.series("loss"), COLOR_PRIMARY),
        DataSeries::from_pairs("val_loss", &history.series("val_loss"), COLOR_SECONDARY),
    ];
    generate_line_chart("Training loss", "Epoch", "BCE loss", &series, &path)?;
    Ok(path)
}

/// Write the accuracy curve chart.
pub fn save_accuracy_chart(
    history: &MetricsHistory,
    stamp: &RunStamp,
    output_dir: &Path,
) -> Result<PathBuf> {
    let path = output_dir.join(stamp.file_name("accuracy_graph", "svg"));
    let series = vec![
        DataSeries::from_pairs("acc", &history.series("acc"), COLOR_PRIMARY),
        DataSeries::from_pairs("val_acc", &history.series("val_acc"), COLOR_SECONDARY),
    ];
    generate_line_chart("Accuracy", "Epoch", "Accuracy", &series, &path)?;
    Ok(path)
}

/// Write a JSON artifact of the given kind.
pub fn save_json<T: Serialize>(
    value: &T,
    kind: &str,
    stamp: &RunStamp,
    output_dir: &Path,
) -> Result<PathBuf> {
    let path = output_dir.join(stamp.file_name(kind, "json"));
    let file = File::create(&path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(path)
}
