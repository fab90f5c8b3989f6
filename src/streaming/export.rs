//! Data export - session snapshots and enriched records as files

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use super::ExportFormat;
use crate::core::{EnrichedRecord, SessionSink, SessionSnapshot};

const SNAPSHOT_CSV_HEADER: &str =
    "taken_at,source_id,started_at,co2_kg,fuel_kg,frames_processed,attached";
const RECORD_CSV_HEADER: &str =
    "timestamp,source_id,speed,rpm,throttle,maf,co2_g_per_km,trip_co2_kg,eco_score,events";

struct ExportFile {
    writer: BufWriter<File>,
    lines: usize,
}

/// Appends session snapshots to rotating files under one directory
pub struct SnapshotExporter {
    path: PathBuf,
    format: ExportFormat,
    rotate_lines: usize,
    file: Mutex<Option<ExportFile>>,
    written: Mutex<usize>,
}

impl SnapshotExporter {
    pub fn new(path: &Path, format: ExportFormat, rotate_lines: usize) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            format,
            rotate_lines: rotate_lines.max(1),
            file: Mutex::new(None),
            written: Mutex::new(0),
        })
    }

    pub fn write_snapshots(&self, snapshots: &[SessionSnapshot]) -> Result<()> {
        let mut guard = self.file.lock();

        if guard.as_ref().map_or(false, |f| f.lines >= self.rotate_lines) {
            if let Some(mut old) = guard.take() {
                old.writer.flush()?;
            }
        }

        if guard.is_none() {
            let filename = self.next_filename();
            let mut writer = BufWriter::new(open_export_file(&filename)?);
            if self.format == ExportFormat::Csv {
                writeln!(writer, "{}", SNAPSHOT_CSV_HEADER)?;
            }
            info!("Opened snapshot export file {:?}", filename);
            *guard = Some(ExportFile { writer, lines: 0 });
        }

        let file = guard
            .as_mut()
            .ok_or_else(|| anyhow!("export file unavailable"))?;
        for snapshot in snapshots {
            write_snapshot(&mut file.writer, self.format, snapshot)?;
            file.lines += 1;
        }
        file.writer.flush()?;

        *self.written.lock() += snapshots.len();
        Ok(())
    }

    /// Number of snapshots written so far
    pub fn written(&self) -> usize {
        *self.written.lock()
    }

    pub fn close(&self) -> Result<()> {
        if let Some(mut file) = self.file.lock().take() {
            file.writer.flush()?;
        }
        Ok(())
    }

    fn next_filename(&self) -> PathBuf {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S%.3f");
        self.path
            .join(format!("sessions_{}.{}", timestamp, self.format.extension()))
    }
}

#[async_trait]
impl SessionSink for SnapshotExporter {
    fn name(&self) -> &str {
        "snapshot-export"
    }

    async fn persist(&self, snapshots: &[SessionSnapshot]) -> Result<()> {
        self.write_snapshots(snapshots)
    }
}

fn open_export_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| anyhow!("Failed to open export file: {}", e))
}

fn write_snapshot<W: Write>(
    writer: &mut W,
    format: ExportFormat,
    snapshot: &SessionSnapshot,
) -> Result<()> {
    match format {
        ExportFormat::Json => {
            writeln!(writer, "{}", serde_json::to_string(snapshot)?)?;
        }
        ExportFormat::Csv => {
            writeln!(
                writer,
                "{},{},{},{:.9},{:.9},{},{}",
                snapshot.taken_at.to_rfc3339(),
                csv_field(&snapshot.source_id),
                snapshot.started_at.to_rfc3339(),
                snapshot.cumulative_co2_kg,
                snapshot.cumulative_fuel_kg,
                snapshot.frames_processed,
                snapshot.attached
            )?;
        }
        ExportFormat::InfluxLineProtocol => {
            writeln!(
                writer,
                "session,source={} co2_kg={},fuel_kg={},frames={}i,attached={} {}",
                influx_tag(&snapshot.source_id),
                snapshot.cumulative_co2_kg,
                snapshot.cumulative_fuel_kg,
                snapshot.frames_processed,
                snapshot.attached,
                snapshot.taken_at.timestamp_nanos_opt().unwrap_or(0)
            )?;
        }
    }
    Ok(())
}

/// One-shot export of collected data to any writer
pub struct BatchExporter {
    format: ExportFormat,
}

impl BatchExporter {
    pub fn new(format: ExportFormat) -> Self {
        Self { format }
    }

    pub fn export_snapshots<W: Write>(
        &self,
        snapshots: &[SessionSnapshot],
        writer: &mut W,
    ) -> Result<()> {
        if self.format == ExportFormat::Csv {
            writeln!(writer, "{}", SNAPSHOT_CSV_HEADER)?;
        }
        for snapshot in snapshots {
            write_snapshot(writer, self.format, snapshot)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn export_records<W: Write>(&self, records: &[EnrichedRecord], writer: &mut W) -> Result<()> {
        match self.format {
            ExportFormat::Json => {
                for record in records {
                    writeln!(writer, "{}", serde_json::to_string(record)?)?;
                }
            }
            ExportFormat::Csv => {
                writeln!(writer, "{}", RECORD_CSV_HEADER)?;
                for r in records {
                    writeln!(
                        writer,
                        "{},{},{:.2},{:.0},{:.1},{:.2},{:.2},{:.9},{},{}",
                        r.frame.timestamp.to_rfc3339(),
                        csv_field(&r.source_id),
                        r.frame.speed,
                        r.frame.rpm,
                        r.frame.throttle,
                        r.frame.maf,
                        r.emissions.co2_g_per_km,
                        r.trip.co2_kg,
                        r.eco_score.total_score,
                        r.behavior.penalty_count()
                    )?;
                }
            }
            ExportFormat::InfluxLineProtocol => {
                for r in records {
                    writeln!(
                        writer,
                        "telemetry,source={} speed={},rpm={},co2_g_per_km={},eco_score={}i,harsh_braking={},harsh_acceleration={},over_speeding={} {}",
                        influx_tag(&r.source_id),
                        r.frame.speed,
                        r.frame.rpm,
                        r.emissions.co2_g_per_km,
                        r.eco_score.total_score,
                        r.behavior.harsh_braking,
                        r.behavior.harsh_acceleration,
                        r.behavior.over_speeding,
                        r.frame.timestamp.timestamp_nanos_opt().unwrap_or(0)
                    )?;
                }
            }
        }

        writer.flush()?;
        Ok(())
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn influx_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | ' ' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::tests::record_for;

    fn snapshot(id: &str) -> SessionSnapshot {
        let now = Utc::now();
        SessionSnapshot {
            source_id: id.to_string(),
            cumulative_co2_kg: 0.25,
            cumulative_fuel_kg: 0.08,
            started_at: now,
            frames_processed: 12,
            attached: true,
            taken_at: now,
        }
    }

    #[test]
    fn test_csv_snapshots_have_header_and_quoting() {
        let mut out = Vec::new();
        BatchExporter::new(ExportFormat::Csv)
            .export_snapshots(&[snapshot("a"), snapshot("b,c")], &mut out)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], SNAPSHOT_CSV_HEADER);
        assert!(lines[2].contains(",\"b,c\","));
    }

    #[test]
    fn test_influx_escapes_tags() {
        let mut out = Vec::new();
        BatchExporter::new(ExportFormat::InfluxLineProtocol)
            .export_snapshots(&[snapshot("my car")], &mut out)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("session,source=my\\ car co2_kg=0.25,"));
        assert!(text.contains("frames=12i"));
    }

    #[test]
    fn test_json_records_are_one_per_line() {
        let mut out = Vec::new();
        BatchExporter::new(ExportFormat::Json)
            .export_records(&[(*record_for("x")).clone(), (*record_for("y")).clone()], &mut out)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let parsed: Vec<EnrichedRecord> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].source_id, "y");
    }

    #[test]
    fn test_exporter_rotates_files() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = SnapshotExporter::new(dir.path(), ExportFormat::Json, 2).unwrap();

        exporter.write_snapshots(&[snapshot("a"), snapshot("b")]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        exporter.write_snapshots(&[snapshot("c")]).unwrap();
        exporter.close().unwrap();

        assert_eq!(exporter.written(), 3);
        let mut files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        files.sort();
        assert_eq!(files.len(), 2);
        assert_eq!(std::fs::read_to_string(&files[0]).unwrap().lines().count(), 2);
        assert_eq!(std::fs::read_to_string(&files[1]).unwrap().lines().count(), 1);
    }

    #[tokio::test]
    async fn test_sink_writes_batch() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = SnapshotExporter::new(dir.path(), ExportFormat::Csv, 100).unwrap();
        exporter.persist(&[snapshot("a")]).await.unwrap();
        assert_eq!(exporter.written(), 1);
    }
}
