//! Batch orchestration
//!
//! Finds source files and runs one job per file on a rayon pool. Each job
//! owns its own pipeline and writes a distinct output directory, so no state
//! is shared between workers. A failing file is logged and counted; it never
//! stops the rest of the batch.

use anyhow::{Context, Result};
use ndf_converter::{ConversionSummary, ExportConfig};
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// What happened to one source file
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileOutcome {
    Converted { summary: ConversionSummary },
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

/// Results of a whole batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub converted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Effective conversion settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ExportConfig>,
    pub files: Vec<FileReport>,
}

impl BatchReport {
    fn from_reports(files: Vec<FileReport>) -> Self {
        let mut report = BatchReport::default();
        for file in &files {
            match file.outcome {
                FileOutcome::Converted { .. } => report.converted += 1,
                FileOutcome::Skipped { .. } => report.skipped += 1,
                FileOutcome::Failed { .. } => report.failed += 1,
            }
        }
        report.files = files;
        report
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Record a file that was left out before the batch ran
    pub fn push_skipped(&mut self, path: PathBuf, reason: &str) {
        self.skipped += 1;
        self.files.push(FileReport {
            path,
            outcome: FileOutcome::Skipped {
                reason: reason.to_string(),
            },
        });
    }

    pub fn with_config(mut self, config: &ExportConfig) -> Self {
        self.config = Some(config.clone());
        self
    }

    /// Print a human-readable summary to stdout
    pub fn print(&self) {
        println!("\n═══════════════════════════════════════════════");
        println!("  Conversion summary");
        println!("═══════════════════════════════════════════════");
        for file in &self.files {
            match &file.outcome {
                FileOutcome::Converted { summary } => {
                    println!(
                        "✓ {:?}: {} messages, {} files, {} lines",
                        file.path,
                        summary.messages_decoded,
                        summary.files_written.len(),
                        summary.lines_written
                    );
                    if let Some(session) = &summary.session {
                        println!("    session {}", session);
                    }
                    if let Some(duration) = summary.duration {
                        println!("    {:.3} s recorded", duration);
                    }
                    if summary.malformed_records > 0 {
                        println!("    {} malformed records", summary.malformed_records);
                    }
                    if summary.clock_discontinuities > 0 {
                        println!("    {} clock discontinuities", summary.clock_discontinuities);
                    }
                    let gaps: usize = summary.channels.values().map(|r| r.gaps).sum();
                    if gaps > 0 {
                        println!("    {} interval gaps", gaps);
                    }
                    let glitches: usize = summary.channels.values().map(|r| r.glitches).sum();
                    if glitches > 0 {
                        println!("    {} glitches filtered", glitches);
                    }
                    if !summary.empty_channels.is_empty() {
                        println!("    empty channels: {:?}", summary.empty_channels);
                    }
                    if summary.merge_rows_dropped > 0 {
                        println!(
                            "    {} merged rows skipped {:?}",
                            summary.merge_rows_dropped, summary.merge_dropped_per_channel
                        );
                    }
                }
                FileOutcome::Skipped { reason } => println!("- {:?}: skipped ({})", file.path, reason),
                FileOutcome::Failed { error } => println!("✗ {:?}: {}", file.path, error),
            }
        }
        println!(
            "\nConverted {}, skipped {}, failed {} of {} files",
            self.converted,
            self.skipped,
            self.failed,
            self.files.len()
        );
    }

    /// Write the report as pretty JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize summary")?;
        fs::write(path, json).with_context(|| format!("Failed to write summary: {:?}", path))?;
        log::info!("Summary written to {:?}", path);
        Ok(())
    }
}

/// Collect files with one of `extensions` (case-insensitive) from files and directories
///
/// Explicitly named files are taken as given. Results are sorted and
/// deduplicated.
pub fn find_files(inputs: &[PathBuf], extensions: &[&str], recursive: bool) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for input in inputs {
        if input.is_dir() {
            scan_dir(input, extensions, recursive, &mut found)?;
        } else if input.is_file() {
            found.push(input.clone());
        } else {
            anyhow::bail!("Input not found: {:?}", input);
        }
    }
    found.sort();
    found.dedup();
    Ok(found)
}

fn scan_dir(dir: &Path, extensions: &[&str], recursive: bool, found: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("Failed to read directory: {:?}", dir))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                scan_dir(&path, extensions, recursive, found)?;
            }
        } else if extensions.iter().any(|ext| has_extension(&path, ext)) && fs::metadata(&path)?.len() > 0 {
            found.push(path);
        }
    }
    Ok(())
}

/// True if `path` ends in `.<extension>`, ignoring case
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// True if `dir` exists and holds at least one entry
pub fn has_output(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Remove `dir` and everything below it, if present
pub fn clean_output(dir: &Path) -> Result<()> {
    if dir.exists() {
        log::info!("Removing previous output {:?}", dir);
        fs::remove_dir_all(dir).with_context(|| format!("Failed to clean {:?}", dir))?;
    }
    Ok(())
}

/// Run `job` on every file, in parallel when `jobs` allows
///
/// A job returns `Ok(None)` to report the file as skipped.
pub fn run_batch<F>(files: &[PathBuf], jobs: Option<usize>, job: F) -> Result<BatchReport>
where
    F: Fn(&Path) -> Result<Option<ConversionSummary>> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .thread_name(|i| format!("ndf-convert-{i}"))
        .num_threads(jobs.unwrap_or(0))
        .build()
        .context("Failed to build worker pool")?;

    log::info!(
        "Processing {} files on {} threads",
        files.len(),
        pool.current_num_threads()
    );

    let reports: Vec<FileReport> = pool.install(|| {
        files
            .par_iter()
            .map(|path| {
                let outcome = match job(path) {
                    Ok(Some(summary)) => FileOutcome::Converted { summary },
                    Ok(None) => FileOutcome::Skipped {
                        reason: "output exists".to_string(),
                    },
                    Err(e) => {
                        log::error!("{:?}: {:#}", path, e);
                        FileOutcome::Failed {
                            error: format!("{:#}", e),
                        }
                    }
                };
                FileReport {
                    path: path.clone(),
                    outcome,
                }
            })
            .collect()
    });

    Ok(BatchReport::from_reports(reports))
}
