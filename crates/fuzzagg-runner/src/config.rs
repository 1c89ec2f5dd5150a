use anyhow::{anyhow, Context, Result};
use fuzzagg_core::{GridConfig, SamplingMode, Thresholds};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_OUTPUT: &str = "./collected-data.csv";
pub const DEFAULT_FIRST_RUN: usize = 1;

/// Which log format the runs were recorded in.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    /// AFL-style `fuzzer_stats` + `plot_data`.
    Afl,
    /// SPF `import/export-statistics.txt` scored by an external cost helper.
    Spf,
}

impl PipelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Afl => "afl",
            PipelineKind::Spf => "spf",
        }
    }

    pub fn default_mode(&self) -> SamplingMode {
        match self {
            PipelineKind::Afl => SamplingMode::Instantaneous,
            PipelineKind::Spf => SamplingMode::Monotonic,
        }
    }

    pub fn default_runs(&self) -> usize {
        match self {
            PipelineKind::Afl => 10,
            PipelineKind::Spf => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AflColumns {
    pub time: usize,
    pub value: usize,
}

impl Default for AflColumns {
    fn default() -> Self {
        Self { time: 0, value: 12 }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpfColumns {
    pub time: usize,
    pub artifact: usize,
    /// Field of the helper's `;`-separated cost row holding the score.
    pub cost_value: usize,
}

impl Default for SpfColumns {
    fn default() -> Self {
        Self {
            time: 0,
            artifact: 2,
            cost_value: 4,
        }
    }
}

/// One layer of optional settings. The YAML file and the command line each
/// produce a layer; [`ConfigLayer::merge`] stacks them.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub step_s: Option<u64>,
    pub horizon_s: Option<u64>,
    pub runs: Option<usize>,
    pub first_run: Option<usize>,
    pub mode: Option<SamplingMode>,
    pub thresholds: Option<Thresholds>,
    pub output: Option<PathBuf>,
    pub skip_failed: Option<bool>,
    pub afl_time_column: Option<usize>,
    pub afl_value_column: Option<usize>,
    pub spf_time_column: Option<usize>,
    pub spf_artifact_column: Option<usize>,
    pub spf_cost_value_column: Option<usize>,
    pub cost_cmd: Option<Vec<String>>,
}

impl ConfigLayer {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&raw)
            .with_context(|| format!("{} is not a valid aggregation config", path.display()))
    }

    /// Values set in `over` win.
    pub fn merge(self, over: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            step_s: over.step_s.or(self.step_s),
            horizon_s: over.horizon_s.or(self.horizon_s),
            runs: over.runs.or(self.runs),
            first_run: over.first_run.or(self.first_run),
            mode: over.mode.or(self.mode),
            thresholds: over.thresholds.or(self.thresholds),
            output: over.output.or(self.output),
            skip_failed: over.skip_failed.or(self.skip_failed),
            afl_time_column: over.afl_time_column.or(self.afl_time_column),
            afl_value_column: over.afl_value_column.or(self.afl_value_column),
            spf_time_column: over.spf_time_column.or(self.spf_time_column),
            spf_artifact_column: over.spf_artifact_column.or(self.spf_artifact_column),
            spf_cost_value_column: over.spf_cost_value_column.or(self.spf_cost_value_column),
            cost_cmd: over.cost_cmd.or(self.cost_cmd),
        }
    }

    pub fn resolve(self, kind: PipelineKind) -> Result<AggregateConfig> {
        let defaults = GridConfig::default();
        let grid = GridConfig::new(
            self.step_s.unwrap_or(defaults.step_s),
            self.horizon_s.unwrap_or(defaults.horizon_s),
        )?;
        let runs = self.runs.unwrap_or_else(|| kind.default_runs());
        if runs == 0 {
            return Err(anyhow!("run count must be at least 1"));
        }
        let afl_defaults = AflColumns::default();
        let spf_defaults = SpfColumns::default();
        let cost_cmd = match self.cost_cmd {
            Some(cmd) if cmd.is_empty() || cmd[0].trim().is_empty() => {
                return Err(anyhow!("cost_cmd cannot be empty"));
            }
            other => other,
        };
        if kind == PipelineKind::Spf && cost_cmd.is_none() {
            return Err(anyhow!("the spf pipeline requires a cost helper (cost_cmd)"));
        }
        Ok(AggregateConfig {
            kind,
            grid,
            first_run: self.first_run.unwrap_or(DEFAULT_FIRST_RUN),
            runs,
            mode: self.mode.unwrap_or_else(|| kind.default_mode()),
            thresholds: self.thresholds.unwrap_or_default(),
            output: self.output.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
            skip_failed: self.skip_failed.unwrap_or(false),
            afl: AflColumns {
                time: self.afl_time_column.unwrap_or(afl_defaults.time),
                value: self.afl_value_column.unwrap_or(afl_defaults.value),
            },
            spf: SpfColumns {
                time: self.spf_time_column.unwrap_or(spf_defaults.time),
                artifact: self.spf_artifact_column.unwrap_or(spf_defaults.artifact),
                cost_value: self
                    .spf_cost_value_column
                    .unwrap_or(spf_defaults.cost_value),
            },
            cost_cmd,
        })
    }
}

/// Fully resolved settings for one aggregation.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AggregateConfig {
    pub kind: PipelineKind,
    pub grid: GridConfig,
    pub first_run: usize,
    pub runs: usize,
    pub mode: SamplingMode,
    pub thresholds: Thresholds,
    pub output: PathBuf,
    pub skip_failed: bool,
    pub afl: AflColumns,
    pub spf: SpfColumns,
    pub cost_cmd: Option<Vec<String>>,
}

impl AggregateConfig {
    pub fn run_indices(&self) -> Vec<usize> {
        (self.first_run..self.first_run + self.runs).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn defaults_follow_pipeline_kind() {
        let afl = ConfigLayer::default().resolve(PipelineKind::Afl).expect("afl");
        assert_eq!(afl.grid, GridConfig::default());
        assert_eq!(afl.runs, 10);
        assert_eq!(afl.mode, SamplingMode::Instantaneous);
        assert_eq!(afl.thresholds.as_slice(), &[0.0, 64.0]);
        assert_eq!(afl.afl, AflColumns { time: 0, value: 12 });
        assert_eq!(afl.run_indices(), (1..=10).collect::<Vec<_>>());

        let spf = ConfigLayer {
            cost_cmd: Some(vec!["./interface_cost_log".to_string()]),
            ..ConfigLayer::default()
        }
        .resolve(PipelineKind::Spf)
        .expect("spf");
        assert_eq!(spf.runs, 1);
        assert_eq!(spf.mode, SamplingMode::Monotonic);
        assert_eq!(spf.spf.cost_value, 4);
    }

    #[test]
    fn spf_requires_cost_helper() {
        let err = ConfigLayer::default()
            .resolve(PipelineKind::Spf)
            .expect_err("missing helper");
        assert!(err.to_string().contains("cost helper"));
    }

    #[test]
    fn command_line_layer_overrides_file_layer() {
        let file: ConfigLayer = serde_yaml::from_str(
            "step_s: 30\nhorizon_s: 600\nruns: 3\nmode: monotonic\nthresholds: [1, 10]\n",
        )
        .expect("yaml");
        let cli = ConfigLayer {
            horizon_s: Some(900),
            mode: Some(SamplingMode::Instantaneous),
            ..ConfigLayer::default()
        };
        let resolved = file.merge(cli).resolve(PipelineKind::Afl).expect("resolve");
        assert_eq!(resolved.grid.step_s, 30);
        assert_eq!(resolved.grid.horizon_s, 900);
        assert_eq!(resolved.runs, 3);
        assert_eq!(resolved.mode, SamplingMode::Instantaneous);
        assert_eq!(resolved.thresholds.as_slice(), &[1.0, 10.0]);
    }

    #[test]
    fn unordered_thresholds_in_file_are_rejected() {
        let parsed: std::result::Result<ConfigLayer, _> =
            serde_yaml::from_str("thresholds: [64, 0]\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed: std::result::Result<ConfigLayer, _> = serde_yaml::from_str("stepsize: 60\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn invalid_grid_is_rejected() {
        let layer = ConfigLayer {
            step_s: Some(60),
            horizon_s: Some(30),
            ..ConfigLayer::default()
        };
        assert!(layer.resolve(PipelineKind::Afl).is_err());
    }

    #[test]
    fn load_reads_yaml_file() {
        let dir = std::env::temp_dir().join(format!(
            "fuzzagg_config_test_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("aggregate.yaml");
        fs::write(&path, "runs: 5\nfirst_run: 0\noutput: out.csv\n").expect("write");
        let layer = ConfigLayer::load(&path).expect("load");
        assert_eq!(layer.runs, Some(5));
        assert_eq!(layer.first_run, Some(0));
        assert_eq!(layer.output, Some(PathBuf::from("out.csv")));

        fs::write(&path, "").expect("write");
        assert_eq!(ConfigLayer::load(&path).expect("load"), ConfigLayer::default());
        let _ = fs::remove_dir_all(dir);
    }
}
