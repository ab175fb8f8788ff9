//! NDF Converter CLI Application
//!
//! Command-line front end for the ndf-converter library. It adds:
//! - TOML configuration files with CLI overrides
//! - Directory traversal and parallel batch conversion
//! - Skip/clean policies for existing output
//! - Grouping of archive files into recording sessions
//! - Progress logging and a per-file summary (optionally as JSON)

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ndf_converter::dump::DumpFormat;
use ndf_converter::export::{channel_path, export_channel};
use ndf_converter::session::{group_sessions, DEFAULT_SESSION_GAP};
use ndf_converter::sources::{read_binary_signal, read_text_signal};
use ndf_converter::{
    ChannelData, ConversionSummary, DecimalSeparator, DumpOptions, ExportConfig, LabChartFormatter,
    Recording, TimeReference, TimeUnit, VoltageUnit,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod batch;
mod config;

use batch::{clean_output, find_files, has_extension, has_output, run_batch, BatchReport};
use config::AppConfig;

/// NDF Converter - Turn NDF telemetry recordings into LabChart text files
#[derive(Parser, Debug)]
#[command(name = "ndf-convert")]
#[command(about = "Convert NDF telemetry recordings to LabChart text", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (TOML)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Export NDF recordings to LabChart text, one E<id>.txt per channel
    ///
    /// Each recording gets its own subdirectory of the output directory.
    /// Existing channel files are appended to; use --clean to regenerate.
    Export {
        /// NDF files or directories containing them
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Also write all channels merged on one time base
        #[arg(long)]
        merge: bool,

        /// Group M<unix>.ndf archives into session_<start> directories
        #[arg(long)]
        sessions: bool,

        /// Pause in seconds that starts a new session (default: 3600)
        #[arg(long, value_name = "SECONDS", requires = "sessions")]
        session_gap: Option<f64>,

        #[command(flatten)]
        export: ExportArgs,

        #[command(flatten)]
        batch: BatchArgs,
    },
    /// Dump raw sample counts of NDF recordings for inspection
    Dump {
        /// NDF files or directories containing them
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Dump layout [default: simple, or the [dump] table]
        #[arg(short, long, value_enum)]
        format: Option<DumpFormatArg>,

        /// Add a per-sample timestamp column
        #[arg(long)]
        timestamps: bool,

        /// Leave out the comment header
        #[arg(long)]
        no_metadata: bool,

        #[command(flatten)]
        export: ExportArgs,

        #[command(flatten)]
        batch: BatchArgs,
    },
    /// Convert a directory of signal files to LabChart text
    ///
    /// Files are taken in name order and numbered from 1; file N becomes
    /// channel N. `.txt` files hold one sample value per line, `.bin` files
    /// a raw stream of little-endian u16 samples.
    Bulk {
        /// Directory of .txt and .bin signal files
        input: PathBuf,

        #[command(flatten)]
        export: ExportArgs,

        #[command(flatten)]
        batch: BatchArgs,
    },
}

/// Conversion options; each one overrides the configuration file
#[derive(Args, Debug, Clone, Default)]
struct ExportArgs {
    /// Sample rate of data channels in Hz
    #[arg(long, value_name = "HZ")]
    sample_rate: Option<f64>,

    /// Full-scale input range in millivolts
    #[arg(long, value_name = "MV")]
    range: Option<f64>,

    /// Interval length in seconds
    #[arg(long, value_name = "SECONDS")]
    interval_length: Option<f64>,

    /// Use commas as decimal separator
    #[arg(long)]
    commas: bool,

    /// Write time in milliseconds
    #[arg(long)]
    ms: bool,

    /// Write voltage in microvolts
    #[arg(long)]
    uv: bool,

    /// Write absolute UNIX time instead of time since the first sample
    #[arg(long)]
    absolute: bool,

    /// Glitch filter threshold in ADC counts (0 disables the filter)
    #[arg(long, value_name = "COUNTS")]
    glitch_threshold: Option<u16>,

    /// Only convert these channels, in this order
    #[arg(long, value_delimiter = ',', value_name = "csv")]
    channels: Option<Vec<u8>>,

    /// Per-channel sample rate override (can be repeated)
    #[arg(long = "channel-rate", value_parser = parse_channel_rate, value_name = "CH=HZ")]
    channel_rates: Vec<(u8, f64)>,
}

/// Output and batch policy
#[derive(Args, Debug, Clone, Default)]
struct BatchArgs {
    /// Output directory
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Skip recordings whose output directory already has files
    #[arg(long)]
    skip_existing: bool,

    /// Delete a recording's previous output before converting it
    #[arg(long, conflicts_with = "skip_existing")]
    clean: bool,

    /// Descend into subdirectories when scanning inputs
    #[arg(short, long)]
    recursive: bool,

    /// Number of worker threads (default: one per core)
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,

    /// Write the conversion summary as JSON
    #[arg(long, value_name = "FILE")]
    summary_json: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DumpFormatArg {
    Simple,
    Detailed,
    Csv,
}

impl From<DumpFormatArg> for DumpFormat {
    fn from(arg: DumpFormatArg) -> Self {
        match arg {
            DumpFormatArg::Simple => DumpFormat::Simple,
            DumpFormatArg::Detailed => DumpFormat::Detailed,
            DumpFormatArg::Csv => DumpFormat::Csv,
        }
    }
}

fn parse_channel_rate(s: &str) -> std::result::Result<(u8, f64), String> {
    let (channel, rate) = s
        .split_once('=')
        .ok_or_else(|| format!("expected CH=HZ, got '{}'", s))?;
    let channel = channel
        .trim()
        .parse::<u8>()
        .map_err(|e| format!("invalid channel '{}': {}", channel, e))?;
    let rate = rate
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid rate '{}': {}", rate, e))?;
    Ok((channel, rate))
}

impl ExportArgs {
    /// Apply the command-line overrides on top of `config`
    fn apply(&self, mut config: ExportConfig) -> ExportConfig {
        if let Some(rate) = self.sample_rate {
            config = config.with_sample_rate(rate);
        }
        if let Some(range) = self.range {
            config = config.with_range_mv(range);
        }
        if let Some(length) = self.interval_length {
            config = config.with_interval_length(length);
        }
        if self.commas {
            config = config.with_decimal_separator(DecimalSeparator::Comma);
        }
        if self.ms {
            config = config.with_time_unit(TimeUnit::Milliseconds);
        }
        if self.uv {
            config = config.with_voltage_unit(VoltageUnit::Microvolts);
        }
        if self.absolute {
            config = config.with_time_reference(TimeReference::Absolute);
        }
        if let Some(threshold) = self.glitch_threshold {
            config = config.with_glitch_threshold(threshold);
        }
        if let Some(channels) = &self.channels {
            config = config.with_channels(channels.clone());
        }
        for &(channel, rate) in &self.channel_rates {
            config = config.with_channel_rate(channel, rate);
        }
        config
    }
}

/// Batch policy after merging the `[batch]` table with the command line
#[derive(Debug, Clone)]
struct BatchPolicy {
    output: PathBuf,
    skip_existing: bool,
    clean: bool,
    recursive: bool,
    jobs: Option<usize>,
    summary_json: Option<PathBuf>,
}

impl BatchPolicy {
    fn resolve(args: &BatchArgs, app: &AppConfig, default_output: PathBuf) -> Self {
        let file = &app.batch;
        Self {
            output: args
                .output
                .clone()
                .or_else(|| file.output_dir.clone())
                .unwrap_or(default_output),
            skip_existing: args.skip_existing || (file.skip_existing && !args.clean),
            clean: args.clean || (file.clean && !args.skip_existing),
            recursive: args.recursive || file.recursive,
            jobs: args.jobs.or(file.jobs),
            summary_json: args.summary_json.clone(),
        }
    }

    /// Apply skip/clean to a recording's output directory
    ///
    /// Returns false when the recording should be skipped.
    fn prepare(&self, recording_dir: &Path) -> Result<bool> {
        if self.clean {
            clean_output(recording_dir)?;
        } else if self.skip_existing && has_output(recording_dir) {
            log::info!("Skipping {:?}: output exists", recording_dir);
            return Ok(false);
        }
        Ok(true)
    }
}

fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.quiet);

    log::info!("NDF Converter CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using converter library v{}", ndf_converter::VERSION);

    let app = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => AppConfig::default(),
    };

    let report = match &cli.command {
        Commands::Export {
            inputs,
            merge,
            sessions,
            session_gap,
            export,
            batch,
        } => {
            let config = resolve_export_config(&app, export)?;
            let policy = BatchPolicy::resolve(batch, &app, PathBuf::from("labchart"));
            let merge = *merge || app.export.merge;
            let grouping = resolve_session_gap(*sessions, *session_gap, &app)?;
            let files = find_files(inputs, &["ndf"], policy.recursive)?;
            run_export(&files, &config, &policy, merge, grouping)?
        }
        Commands::Dump {
            inputs,
            format,
            timestamps,
            no_metadata,
            export,
            batch,
        } => {
            let config = resolve_export_config(&app, export)?;
            let policy = BatchPolicy::resolve(batch, &app, PathBuf::from("ndf_text"));
            let options = resolve_dump_options(&app, *format, *timestamps, *no_metadata);
            let files = find_files(inputs, &["ndf"], policy.recursive)?;
            run_dump(&files, &config, &policy, &options)?
        }
        Commands::Bulk {
            input,
            export,
            batch,
        } => {
            let config = resolve_export_config(&app, export)?;
            let mut default_output = input.clone().into_os_string();
            default_output.push("_labchart");
            let policy = BatchPolicy::resolve(batch, &app, PathBuf::from(default_output));
            run_bulk(input, &config, &policy)?
        }
    };

    finish(&report, &cli.command)
}

/// Session gap in seconds when grouping is on, from the command line or `[batch]`
fn resolve_session_gap(sessions: bool, gap: Option<f64>, app: &AppConfig) -> Result<Option<f64>> {
    if !(sessions || app.batch.sessions) {
        return Ok(None);
    }
    let gap = gap.or(app.batch.session_gap).unwrap_or(DEFAULT_SESSION_GAP);
    if !gap.is_finite() || gap < 0.0 {
        anyhow::bail!("Invalid session gap: {}", gap);
    }
    Ok(Some(gap))
}

/// Dump options from the `[dump]` table with command-line overrides
fn resolve_dump_options(
    app: &AppConfig,
    format: Option<DumpFormatArg>,
    timestamps: bool,
    no_metadata: bool,
) -> DumpOptions {
    let mut options = app.dump;
    if let Some(format) = format {
        options.format = format.into();
    }
    if timestamps {
        options = options.with_timestamps(true);
    }
    if no_metadata {
        options = options.with_metadata(false);
    }
    options
}

/// Build and validate the export configuration before touching any file
fn resolve_export_config(app: &AppConfig, args: &ExportArgs) -> Result<ExportConfig> {
    let config = args.apply(app.export_config()?);
    config.validate().context("Invalid configuration")?;
    log::debug!("Export configuration: {:?}", config);
    Ok(config)
}

fn summary_path(command: &Commands) -> Option<&PathBuf> {
    match command {
        Commands::Export { batch, .. } | Commands::Dump { batch, .. } | Commands::Bulk { batch, .. } => {
            batch.summary_json.as_ref()
        }
    }
}

fn finish(report: &BatchReport, command: &Commands) -> Result<()> {
    report.print();
    if let Some(path) = summary_path(command) {
        report.write_json(path)?;
    }
    if report.has_failures() {
        anyhow::bail!("{} of {} files failed", report.failed, report.files.len());
    }
    Ok(())
}

fn run_export(
    files: &[PathBuf],
    config: &ExportConfig,
    policy: &BatchPolicy,
    merge: bool,
    session_gap: Option<f64>,
) -> Result<BatchReport> {
    if files.is_empty() {
        log::warn!("No NDF files found");
    }
    log::info!("Output directory: {:?}", policy.output);

    // Recording path -> session directory name
    let mut session_of: HashMap<PathBuf, String> = HashMap::new();
    let mut ungrouped = Vec::new();
    let selected: Vec<PathBuf> = match session_gap {
        Some(gap) => {
            for session in group_sessions(files, gap, &config.timing) {
                for path in session.paths() {
                    session_of.insert(path.to_path_buf(), session.name());
                }
            }
            let (grouped, rest): (Vec<PathBuf>, Vec<PathBuf>) =
                files.iter().cloned().partition(|p| session_of.contains_key(p));
            ungrouped = rest;
            grouped
        }
        None => files.to_vec(),
    };

    let mut report = run_batch(&selected, policy.jobs, |path| {
        let session = session_of.get(path);
        let out_root = match session {
            Some(name) => policy.output.join(name),
            None => policy.output.clone(),
        };

        let recording = Recording::open(path).with_context(|| format!("Failed to read {:?}", path))?;
        if !policy.prepare(&out_root.join(recording.name()))? {
            return Ok(None);
        }

        let mut run = recording.convert(config)?;
        run.export_channels(&out_root)?;
        if merge {
            let merged = run.merged_path(&out_root);
            run.export_merged(&merged, config.channels.as_deref())?;
        }
        let mut summary = run.into_summary();
        summary.session = session.cloned();
        Ok(Some(summary))
    })?;

    for path in ungrouped {
        report.push_skipped(path, "no archive start time in name");
    }
    Ok(report.with_config(config))
}

fn run_dump(
    files: &[PathBuf],
    config: &ExportConfig,
    policy: &BatchPolicy,
    options: &DumpOptions,
) -> Result<BatchReport> {
    if files.is_empty() {
        log::warn!("No NDF files found");
    }

    run_batch(files, policy.jobs, |path| {
        let recording = Recording::open(path).with_context(|| format!("Failed to read {:?}", path))?;
        if !policy.prepare(&policy.output.join(recording.name()))? {
            return Ok(None);
        }

        let mut run = recording.convert(config)?;
        run.dump_channels(&policy.output, options)?;
        Ok(Some(run.into_summary()))
    })
    .map(|report| report.with_config(config))
}

/// Signal files to LabChart, file N as channel N
fn run_bulk(input: &Path, config: &ExportConfig, policy: &BatchPolicy) -> Result<BatchReport> {
    if !input.is_dir() {
        anyhow::bail!("Input path is not a directory: {:?}", input);
    }
    let files = find_files(&[input.to_path_buf()], &["txt", "bin"], policy.recursive)?;
    if files.is_empty() {
        log::warn!("No signal files found in {:?}", input);
    }
    std::fs::create_dir_all(&policy.output)
        .with_context(|| format!("Failed to create {:?}", policy.output))?;

    let formatter = LabChartFormatter::new(config.clone());
    run_batch(&files, policy.jobs, |path| {
        let index = files.iter().position(|f| f == path).unwrap_or(0);
        let channel = u8::try_from(index + 1).context("Too many input files for channel numbering")?;
        let target = channel_path(&policy.output, channel);

        if policy.clean && target.exists() {
            std::fs::remove_file(&target).with_context(|| format!("Failed to clean {:?}", target))?;
        } else if policy.skip_existing && target.exists() {
            return Ok(None);
        }

        let data = read_signal(path, channel, config)?;
        if data.is_empty() {
            anyhow::bail!("No samples in {:?}", path);
        }

        let creation = file_creation_label(path)?;
        let stats = export_channel(&target, &formatter, &data, &creation, None)?;

        Ok(Some(ConversionSummary {
            recording: path.display().to_string(),
            creation,
            files_written: vec![target],
            lines_written: stats.lines_written,
            ..Default::default()
        }))
    })
    .map(|report| report.with_config(config))
}

/// Read one bulk input as channel `channel`, by file extension
fn read_signal(path: &Path, channel: u8, config: &ExportConfig) -> Result<ChannelData> {
    let rate = config.rate_for(channel);
    if has_extension(path, "bin") {
        let intervals = read_binary_signal(path, rate, config.interval_length)
            .with_context(|| format!("Failed to read {:?}", path))?;
        return Ok(ChannelData {
            channel_id: channel,
            sample_rate: rate,
            intervals,
        });
    }
    let signal = read_text_signal(path, rate, config.interval_length)
        .with_context(|| format!("Failed to read {:?}", path))?;
    Ok(signal.into_channel(channel, rate))
}

/// Modification time of `path` as a local timestamp
fn file_creation_label(path: &Path) -> Result<String> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("Failed to read modification time of {:?}", path))?;
    let local: chrono::DateTime<chrono::Local> = modified.into();
    Ok(local.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_channel_rate() {
        assert_eq!(parse_channel_rate("3=256"), Ok((3, 256.0)));
        assert_eq!(parse_channel_rate(" 1 = 128.5 "), Ok((1, 128.5)));
        assert!(parse_channel_rate("3:256").is_err());
        assert!(parse_channel_rate("300=1").is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let app: AppConfig = toml::from_str("[export]\nsample_rate = 256.0\nrange_mv = 60.0\n").unwrap();
        let args = ExportArgs {
            sample_rate: Some(1024.0),
            ms: true,
            channels: Some(vec![2, 1]),
            channel_rates: vec![(2, 128.0)],
            ..Default::default()
        };
        let config = resolve_export_config(&app, &args).unwrap();
        assert_eq!(config.sample_rate, 1024.0);
        assert_eq!(config.range_mv, 60.0);
        assert_eq!(config.time_unit, TimeUnit::Milliseconds);
        assert_eq!(config.channels, Some(vec![2, 1]));
        assert_eq!(config.rate_for(2), 128.0);
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let args = ExportArgs {
            sample_rate: Some(-1.0),
            ..Default::default()
        };
        assert!(resolve_export_config(&AppConfig::default(), &args).is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "ndf-convert",
            "export",
            "data",
            "--merge",
            "--channels",
            "1,2",
            "--channel-rate",
            "2=256",
            "-o",
            "out",
            "--skip-existing",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Export {
                inputs,
                merge,
                sessions,
                export,
                batch,
                ..
            } => {
                assert_eq!(inputs, vec![PathBuf::from("data")]);
                assert!(merge);
                assert!(!sessions);
                assert_eq!(export.channels, Some(vec![1, 2]));
                assert_eq!(export.channel_rates, vec![(2, 256.0)]);
                assert_eq!(batch.output, Some(PathBuf::from("out")));
                assert!(batch.skip_existing);
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Cli::try_parse_from(["ndf-convert", "export"]).is_err());
        assert!(Cli::try_parse_from(["ndf-convert", "dump", "x.ndf", "--format", "csv"]).is_ok());
        assert!(
            Cli::try_parse_from(["ndf-convert", "export", "x", "--clean", "--skip-existing"]).is_err()
        );
        assert!(Cli::try_parse_from(["ndf-convert", "export", "x", "--session-gap", "60"]).is_err());
        assert!(
            Cli::try_parse_from(["ndf-convert", "export", "x", "--sessions", "--session-gap", "60"]).is_ok()
        );
    }

    #[test]
    fn test_session_gap_resolution() {
        let app = AppConfig::default();
        assert_eq!(resolve_session_gap(false, None, &app).unwrap(), None);
        assert_eq!(resolve_session_gap(true, None, &app).unwrap(), Some(DEFAULT_SESSION_GAP));
        assert_eq!(resolve_session_gap(true, Some(60.0), &app).unwrap(), Some(60.0));
        assert!(resolve_session_gap(true, Some(-1.0), &app).is_err());

        let from_file: AppConfig = toml::from_str("[batch]
sessions = true
session_gap = 900.0
").unwrap();
        assert_eq!(resolve_session_gap(false, None, &from_file).unwrap(), Some(900.0));
    }

    #[test]
    fn test_dump_options_override_file() {
        let app: AppConfig = toml::from_str("[dump]
format = \"csv\"
include_timestamps = true
").unwrap();
        let options = resolve_dump_options(&app, None, false, false);
        assert_eq!(options.format, DumpFormat::Csv);
        assert!(options.include_timestamps);
        assert!(options.include_metadata);

        let options = resolve_dump_options(&app, Some(DumpFormatArg::Detailed), false, true);
        assert_eq!(options.format, DumpFormat::Detailed);
        assert!(!options.include_metadata);
    }

    fn policy(output: &Path) -> BatchPolicy {
        BatchPolicy {
            output: output.to_path_buf(),
            skip_existing: false,
            clean: false,
            recursive: false,
            jobs: Some(1),
            summary_json: None,
        }
    }

    /// One second of clock and channel 1 data in an archive named after `start`
    fn write_archive(dir: &Path, start: i64) -> PathBuf {
        use ndf_converter::decoder::encode_messages;
        use ndf_converter::formats::container::NDF_MAGIC;
        use ndf_converter::{BigEndianLayout, RawMessage};

        let mut bytes = NDF_MAGIC.to_vec();
        bytes.resize(1024, 0);
        let mut messages = Vec::new();
        for i in 0..512u64 {
            if i % 4 == 0 {
                messages.push(RawMessage::new(0, 0, 64 * i));
            }
            messages.push(RawMessage::new(1, 32768, 64 * i));
        }
        bytes.extend(encode_messages::<BigEndianLayout>(&messages));

        let path = dir.join(format!("M{}.ndf", start));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_export_into_session_directories() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_archive(input.path(), 1555404530);
        write_archive(input.path(), 1555404531);
        write_archive(input.path(), 1558948567);
        std::fs::copy(
            input.path().join("M1555404530.ndf"),
            input.path().join("notes.ndf"),
        )
        .unwrap();

        let files = find_files(&[input.path().to_path_buf()], &["ndf"], false).unwrap();
        let config = ExportConfig::new().with_channels(vec![1]);
        let report = run_export(&files, &config, &policy(out.path()), false, Some(DEFAULT_SESSION_GAP)).unwrap();

        assert_eq!(report.converted, 3);
        assert_eq!(report.skipped, 1);
        assert!(!report.has_failures());
        assert!(out.path().join("session_1555404530/M1555404530/E1.txt").exists());
        assert!(out.path().join("session_1555404530/M1555404531/E1.txt").exists());
        assert!(out.path().join("session_1558948567/M1558948567/E1.txt").exists());

        let sessions: Vec<Option<String>> = report
            .files
            .iter()
            .filter_map(|f| match &f.outcome {
                batch::FileOutcome::Converted { summary } => Some(summary.session.clone()),
                _ => None,
            })
            .collect();
        assert!(sessions.contains(&Some("session_1558948567".to_string())));
        assert_eq!(report.config, Some(config));
    }

    #[test]
    fn test_bulk_reads_text_and_binary() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("a.txt"), "100\n200\n").unwrap();
        let raw: Vec<u8> = [32768u16, 40000, 50000].iter().flat_map(|v| v.to_le_bytes()).collect();
        std::fs::write(input.path().join("b.bin"), raw).unwrap();

        let report = run_bulk(input.path(), &ExportConfig::new().with_glitch_threshold(0), &policy(out.path())).unwrap();
        assert_eq!(report.converted, 2);

        let text = std::fs::read_to_string(out.path().join("E2.txt")).unwrap();
        let data: Vec<&str> = text.lines().skip(5).collect();
        assert_eq!(data.len(), 3);
        assert_eq!(data[0], "0.000000\t0.0000");
        assert!(out.path().join("E1.txt").exists());
    }

    #[test]
    fn test_batch_policy_resolution() {
        let app: AppConfig =
            toml::from_str("[batch]\noutput_dir = \"from_file\"\nskip_existing = true\njobs = 2\n").unwrap();
        let policy = BatchPolicy::resolve(&BatchArgs::default(), &app, PathBuf::from("default"));
        assert_eq!(policy.output, PathBuf::from("from_file"));
        assert!(policy.skip_existing);
        assert_eq!(policy.jobs, Some(2));

        let args = BatchArgs {
            clean: true,
            ..Default::default()
        };
        let policy = BatchPolicy::resolve(&args, &app, PathBuf::from("default"));
        assert!(policy.clean);
        assert!(!policy.skip_existing);
    }
}
