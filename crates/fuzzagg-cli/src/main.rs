use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use fuzzagg_core::{SamplingMode, Thresholds};
use fuzzagg_runner::{
    format_value, writes_to_stdout, AggregateConfig, AggregateResult, ConfigLayer, PipelineError,
    PipelineKind, RunLayout,
};
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "fuzzagg",
    version,
    about = "Align fuzzing run logs onto a shared time grid"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    #[value(name = "instantaneous")]
    Instantaneous,
    #[value(name = "monotonic")]
    Monotonic,
}

impl From<ModeArg> for SamplingMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Instantaneous => SamplingMode::Instantaneous,
            ModeArg::Monotonic => SamplingMode::Monotonic,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PipelineArg {
    #[value(name = "afl")]
    Afl,
    #[value(name = "spf")]
    Spf,
}

impl From<PipelineArg> for PipelineKind {
    fn from(value: PipelineArg) -> Self {
        match value {
            PipelineArg::Afl => PipelineKind::Afl,
            PipelineArg::Spf => PipelineKind::Spf,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct CommonArgs {
    /// YAML file with aggregation settings; flags override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Number of runs to collect
    #[arg(long)]
    runs: Option<usize>,
    /// Index of the first run directory
    #[arg(long)]
    first_run: Option<usize>,
    /// Bucket width in seconds
    #[arg(long = "step")]
    step_s: Option<u64>,
    /// Experiment cutoff in seconds
    #[arg(long = "horizon")]
    horizon_s: Option<u64>,
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    /// Score threshold to report first-crossing times for (repeatable)
    #[arg(long = "threshold")]
    thresholds: Vec<f64>,
    /// Output CSV path (`-` for stdout)
    #[arg(short, long)]
    out: Option<PathBuf>,
    /// Drop runs that fail to load instead of aborting
    #[arg(long)]
    skip_failed: bool,
    #[arg(long)]
    json: bool,
    #[arg(long)]
    verbose: bool,
}

#[derive(Args, Debug, Clone, Default)]
struct SpfArgs {
    /// External cost helper invoked as `<cmd> [args..] <artifact> <cost-file>`
    #[arg(long)]
    cost_cmd: Option<String>,
    /// Extra leading argument for the cost helper (repeatable)
    #[arg(long = "cost-arg", allow_hyphen_values = true)]
    cost_args: Vec<String>,
    /// Field of the helper's `;`-separated row holding the score
    #[arg(long)]
    cost_value_column: Option<usize>,
    #[arg(long)]
    time_column: Option<usize>,
    #[arg(long)]
    artifact_column: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate AFL `plot_data` logs
    Afl {
        /// Run directory prefix; the run index is appended to it
        prefix: String,
        /// Fuzzer output directory inside each run (e.g. `/fuzzer-out`)
        fuzzer_out_dir: String,
        #[arg(long)]
        time_column: Option<usize>,
        #[arg(long)]
        value_column: Option<usize>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Aggregate SPF exports scored by an external cost helper
    Spf {
        /// Run directory prefix; the run index is appended to it
        prefix: String,
        #[command(flatten)]
        spf: SpfArgs,
        /// Directory for the helper's scratch cost files
        #[arg(long, default_value = ".")]
        scratch_dir: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Print the resolved configuration without reading any run
    Describe {
        #[arg(long, value_enum, default_value = "afl")]
        pipeline: PipelineArg,
        #[command(flatten)]
        spf: SpfArgs,
        #[command(flatten)]
        common: CommonArgs,
    },
}

impl Commands {
    fn common(&self) -> &CommonArgs {
        match self {
            Commands::Afl { common, .. }
            | Commands::Spf { common, .. }
            | Commands::Describe { common, .. } => common,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Commands::Afl { .. } => "afl",
            Commands::Spf { .. } => "spf",
            Commands::Describe { .. } => "describe",
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let common = cli.command.common();
    let default_level = if common.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let json_mode = common.json;
    let command_name = cli.command.name();
    match run_command(cli.command) {
        Ok(reply) => {
            reply.emit();
            Ok(())
        }
        Err(err) => {
            if json_mode {
                let payload = match err.downcast_ref::<PipelineError>() {
                    Some(pipeline_err) => json_error(
                        command_name,
                        pipeline_err.code(),
                        pipeline_err.to_string(),
                        pipeline_err.details(),
                    ),
                    None => json_error(command_name, "command_failed", format!("{:#}", err), json!({})),
                };
                emit_json(&payload, ReportStream::Stdout);
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

/// Where the command's own report goes. When the table is streamed to stdout
/// the report moves to stderr so stdout stays a clean CSV.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReportStream {
    Stdout,
    Stderr,
}

impl ReportStream {
    fn for_output(output: &Path) -> Self {
        if writes_to_stdout(output) {
            ReportStream::Stderr
        } else {
            ReportStream::Stdout
        }
    }
}

#[derive(Debug)]
enum Report {
    Json(Value),
    Text(String),
}

#[derive(Debug)]
struct Reply {
    report: Report,
    stream: ReportStream,
}

impl Reply {
    fn emit(&self) {
        match &self.report {
            Report::Json(payload) => emit_json(payload, self.stream),
            Report::Text(text) => emit_text(text, self.stream),
        }
    }
}

fn run_command(command: Commands) -> Result<Reply> {
    match command {
        Commands::Afl {
            prefix,
            fuzzer_out_dir,
            time_column,
            value_column,
            common,
        } => {
            let mut layer = common_layer(&common)?;
            layer.afl_time_column = time_column;
            layer.afl_value_column = value_column;
            let config = resolve_config(&common, layer, PipelineKind::Afl)?;
            let result =
                fuzzagg_runner::aggregate_afl(RunLayout::new(prefix, fuzzer_out_dir), &config)?;
            report(&common, "afl", &config, &result)
        }
        Commands::Spf {
            prefix,
            spf,
            scratch_dir,
            common,
        } => {
            let layer = apply_spf_args(common_layer(&common)?, &spf);
            let config = resolve_config(&common, layer, PipelineKind::Spf)?;
            let result =
                fuzzagg_runner::aggregate_spf(RunLayout::new(prefix, ""), &config, scratch_dir)?;
            report(&common, "spf", &config, &result)
        }
        Commands::Describe {
            pipeline,
            spf,
            common,
        } => {
            let layer = apply_spf_args(common_layer(&common)?, &spf);
            let config = resolve_config(&common, layer, pipeline.into())?;
            let report = if common.json {
                Report::Json(json!({
                    "ok": true,
                    "command": "describe",
                    "config": serde_json::to_value(&config)?,
                }))
            } else {
                let mut text = String::new();
                render_config(&mut text, &config)?;
                Report::Text(text)
            };
            Ok(Reply {
                report,
                stream: ReportStream::Stdout,
            })
        }
    }
}

fn common_layer(common: &CommonArgs) -> Result<ConfigLayer> {
    let thresholds = if common.thresholds.is_empty() {
        None
    } else {
        Some(Thresholds::new(common.thresholds.clone())?)
    };
    Ok(ConfigLayer {
        step_s: common.step_s,
        horizon_s: common.horizon_s,
        runs: common.runs,
        first_run: common.first_run,
        mode: common.mode.map(Into::into),
        thresholds,
        output: common.out.clone(),
        skip_failed: common.skip_failed.then_some(true),
        ..ConfigLayer::default()
    })
}

fn apply_spf_args(mut layer: ConfigLayer, spf: &SpfArgs) -> ConfigLayer {
    layer.spf_time_column = spf.time_column;
    layer.spf_artifact_column = spf.artifact_column;
    layer.spf_cost_value_column = spf.cost_value_column;
    layer.cost_cmd = spf.cost_cmd.as_ref().map(|cmd| {
        let mut full = vec![cmd.clone()];
        full.extend(spf.cost_args.iter().cloned());
        full
    });
    layer
}

fn resolve_config(
    common: &CommonArgs,
    cli_layer: ConfigLayer,
    kind: PipelineKind,
) -> Result<AggregateConfig> {
    let file_layer = match &common.config {
        Some(path) => ConfigLayer::load(path)?,
        None => ConfigLayer::default(),
    };
    file_layer.merge(cli_layer).resolve(kind)
}

fn report(
    common: &CommonArgs,
    command: &str,
    config: &AggregateConfig,
    result: &AggregateResult,
) -> Result<Reply> {
    let stream = ReportStream::for_output(&result.output);
    if common.json {
        return Ok(Reply {
            report: Report::Json(json!({
                "ok": true,
                "command": command,
                "output": result.output.display().to_string(),
                "summary": result.outcome.summary_json(config),
            })),
            stream,
        });
    }
    let mut text = String::new();
    render_config(&mut text, config)?;
    let outcome = &result.outcome;
    writeln!(text, "output: {}", result.output.display())?;
    writeln!(text, "rows: {}", outcome.matrix.row_count())?;
    writeln!(text, "global_max: {}", format_value(outcome.global_max()))?;
    for analysis in &outcome.analyses {
        let crossings: Vec<String> = analysis
            .summary
            .crossings
            .iter()
            .map(|c| match c.first_crossing_s {
                Some(t) => format!(">{}@{}s", format_value(c.threshold), t),
                None => format!(">{}@never", format_value(c.threshold)),
            })
            .collect();
        writeln!(
            text,
            "run {}: events={} max={} final={} crossings=[{}]",
            analysis.run_index,
            analysis.summary.events_seen,
            format_value(analysis.summary.global_max),
            analysis
                .series
                .last_value()
                .map(format_value)
                .unwrap_or_else(|| "-".to_string()),
            crossings.join(", ")
        )?;
    }
    for failure in &outcome.failures {
        writeln!(text, "skipped run {}: {}", failure.run_index, failure.message)?;
    }
    Ok(Reply {
        report: Report::Text(text),
        stream,
    })
}

fn render_config(text: &mut String, config: &AggregateConfig) -> std::fmt::Result {
    writeln!(text, "pipeline: {}", config.kind.as_str())?;
    writeln!(text, "mode: {}", config.mode.as_str())?;
    writeln!(text, "step_s: {}", config.grid.step_s)?;
    writeln!(text, "horizon_s: {}", config.grid.horizon_s)?;
    writeln!(text, "buckets: {}", config.grid.bucket_count())?;
    writeln!(text, "runs: {:?}", config.run_indices())?;
    let thresholds: Vec<String> = config
        .thresholds
        .as_slice()
        .iter()
        .map(|t| format_value(*t))
        .collect();
    writeln!(text, "thresholds: [{}]", thresholds.join(", "))?;
    writeln!(text, "skip_failed: {}", config.skip_failed)?;
    if let Some(cmd) = &config.cost_cmd {
        writeln!(text, "cost_cmd: {:?}", cmd)?;
    }
    writeln!(text, "output_target: {}", config.output.display())
}

fn emit_text(text: &str, stream: ReportStream) {
    let _ = match stream {
        ReportStream::Stdout => io::stdout().lock().write_all(text.as_bytes()),
        ReportStream::Stderr => io::stderr().lock().write_all(text.as_bytes()),
    };
}

fn emit_json(value: &Value, stream: ReportStream) {
    let line = match serde_json::to_string(value) {
        Ok(s) => s,
        Err(_) => "{\"ok\":false,\"error\":{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{}}}".to_string(),
    };
    emit_text(&format!("{}\n", line), stream);
}

fn json_error(command: &str, code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "command": command,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}
