//! TOML-конфигурация экспериментов: окружение запуска и декларативный список датасетов.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::forecast::DEFAULT_NUM_SAMPLES;
use crate::method::Method;
use crate::process::CommandSpec;

pub const DEFAULT_CONFIG_PATH: &str = "config/experiments.toml";
const DEFAULT_BASE_DIR: &str = "TSForecasting";
const DEFAULT_DATA_DIR: &str = "tsf_data";
const DEFAULT_SCORING_PROGRAM: &str = "Rscript";
const DEFAULT_SCORING_SCRIPT: &str = "utils/error_calc_helper.R";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExperimentsFile {
    base_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    num_samples: Option<usize>,
    methods: Option<Vec<String>>,
    loader: Option<CommandFile>,
    estimator: Option<CommandFile>,
    scoring: Option<CommandFile>,
    #[serde(default, rename = "dataset")]
    datasets: Vec<DatasetFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandFile {
    command: Vec<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatasetFile {
    name: String,
    file: PathBuf,
    lag: usize,
    horizon: Option<usize>,
    #[serde(default, alias = "round")]
    integer_conversion: bool,
    #[serde(default)]
    exclude_methods: Vec<String>,
}

/// Одна запись эксперимента: датасет, лаг, горизонт по умолчанию и округление.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetSpec {
    pub name: String,
    pub file: PathBuf,
    pub lag: usize,
    pub horizon: Option<usize>,
    pub integer_conversion: bool,
    pub exclude_methods: Vec<Method>,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub base_dir: PathBuf,
    pub data_dir: PathBuf,
    pub num_samples: usize,
    pub methods: Vec<Method>,
    pub loader: Option<CommandSpec>,
    pub estimator: Option<CommandSpec>,
    pub scoring: CommandSpec,
}

impl Settings {
    /// Путь к файлу датасета; абсолютные пути не трогаются.
    pub fn dataset_path(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.base_dir.join(&self.data_dir).join(file)
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExperimentsConfig {
    pub settings: Settings,
    pub datasets: Vec<DatasetSpec>,
}

/// Один запланированный прогон (датасет × метод).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSpec {
    pub dataset: DatasetSpec,
    pub method: Method,
}

impl RunSpec {
    pub fn label(&self) -> String {
        format!("{}_{}_lag_{}", self.dataset.name, self.method, self.dataset.lag)
    }
}

fn default_scoring(base_dir: &Path) -> CommandSpec {
    CommandSpec {
        program: DEFAULT_SCORING_PROGRAM.to_string(),
        args: vec![
            "--vanilla".to_string(),
            base_dir.join(DEFAULT_SCORING_SCRIPT).display().to_string(),
        ],
        timeout: None,
    }
}

fn default_settings() -> Settings {
    let base_dir = PathBuf::from(DEFAULT_BASE_DIR);
    Settings {
        scoring: default_scoring(&base_dir),
        base_dir,
        data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        num_samples: DEFAULT_NUM_SAMPLES,
        methods: Method::ALL.to_vec(),
        loader: None,
        estimator: None,
    }
}

fn parse_methods(labels: &[String], context: &str) -> Result<Vec<Method>, String> {
    labels
        .iter()
        .map(|label| {
            label
                .parse::<Method>()
                .map_err(|err| format!("{context}: {err}"))
        })
        .collect()
}

fn resolve_command(section: &str, file: Option<CommandFile>) -> Result<Option<CommandSpec>, String> {
    file.map(|file| {
        CommandSpec::from_argv(&file.command, file.timeout_secs)
            .map_err(|err| format!("[{section}] {err}"))
    })
    .transpose()
}

fn resolve_dataset(file: DatasetFile) -> Result<DatasetSpec, String> {
    if file.name.trim().is_empty() {
        return Err("dataset.name must not be empty".to_string());
    }
    if file.lag == 0 {
        return Err(format!("dataset {}: lag must be > 0", file.name));
    }
    if file.horizon == Some(0) {
        return Err(format!("dataset {}: horizon must be > 0", file.name));
    }
    let exclude_methods = parse_methods(&file.exclude_methods, &file.name)?;
    Ok(DatasetSpec {
        name: file.name,
        file: file.file,
        lag: file.lag,
        horizon: file.horizon,
        integer_conversion: file.integer_conversion,
        exclude_methods,
    })
}

fn resolve_config(file: ExperimentsFile) -> Result<ExperimentsConfig, String> {
    let mut settings = default_settings();
    if let Some(base_dir) = file.base_dir {
        settings.scoring = default_scoring(&base_dir);
        settings.base_dir = base_dir;
    }
    if let Some(data_dir) = file.data_dir {
        settings.data_dir = data_dir;
    }
    if let Some(num_samples) = file.num_samples {
        if num_samples == 0 {
            return Err("num_samples must be > 0".to_string());
        }
        settings.num_samples = num_samples;
    }
    if let Some(methods) = file.methods {
        settings.methods = parse_methods(&methods, "methods")?;
        if settings.methods.is_empty() {
            return Err("methods must not be empty".to_string());
        }
    }
    settings.loader = resolve_command("loader", file.loader)?;
    settings.estimator = resolve_command("estimator", file.estimator)?;
    if let Some(scoring) = resolve_command("scoring", file.scoring)? {
        settings.scoring = scoring;
    }

    let datasets = file
        .datasets
        .into_iter()
        .map(resolve_dataset)
        .collect::<Result<Vec<_>, _>>()?;
    let mut seen = std::collections::HashSet::new();
    if let Some(duplicate) = datasets.iter().find(|spec| !seen.insert(spec.name.as_str())) {
        return Err(format!("dataset {} is listed twice", duplicate.name));
    }

    Ok(ExperimentsConfig { settings, datasets })
}

pub fn parse_config(raw: &str) -> Result<ExperimentsConfig, String> {
    let file: ExperimentsFile = toml::from_str(raw).map_err(|err| err.to_string())?;
    resolve_config(file)
}

/// Загружает конфигурацию; отсутствие файла по умолчанию означает встроенные настройки.
pub fn load_config(path: &Path) -> Result<ExperimentsConfig, String> {
    if !path.exists() {
        if path == Path::new(DEFAULT_CONFIG_PATH) {
            tracing::info!(
                "Experiments config {} not found, using built-in defaults",
                path.display()
            );
            return resolve_config(ExperimentsFile::default());
        }
        return Err(format!("Experiments config {} does not exist", path.display()));
    }

    let raw = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read experiments config {}: {err}", path.display()))?;
    parse_config(&raw)
        .map_err(|err| format!("Invalid experiments config {}: {err}", path.display()))
}

/// Разворачивает датасеты × методы в порядке «метод, затем датасеты», с учётом исключений и фильтров.
pub fn plan_runs(
    config: &ExperimentsConfig,
    method_filter: &[Method],
    dataset_filter: &[String],
) -> Vec<RunSpec> {
    config
        .settings
        .methods
        .iter()
        .filter(|method| method_filter.is_empty() || method_filter.contains(method))
        .flat_map(move |&method| {
            config
                .datasets
                .iter()
                .filter(move |spec| !spec.exclude_methods.contains(&method))
                .filter(move |spec| dataset_filter.is_empty() || dataset_filter.contains(&spec.name))
                .map(move |spec| RunSpec {
                    dataset: spec.clone(),
                    method,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
base_dir = "bench"
methods = ["feed_forward", "wavenet"]

[estimator]
command = ["python3", "bridge.py"]
timeout_secs = 600

[[dataset]]
name = "cif_2016_6"
file = "cif_6_dataset.tsf"
lag = 15
horizon = 6

[[dataset]]
name = "solar_10_minutes"
file = "solar_10_minutes_dataset.tsf"
lag = 50
horizon = 1008
exclude_methods = ["wavenet"]

[[dataset]]
name = "hospital"
file = "hospital_dataset.tsf"
lag = 15
horizon = 12
integer_conversion = true
"#;

    #[test]
    fn parses_sample_config() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.settings.base_dir, PathBuf::from("bench"));
        assert_eq!(config.settings.num_samples, DEFAULT_NUM_SAMPLES);
        assert_eq!(config.settings.scoring.program, "Rscript");
        assert_eq!(
            config.settings.scoring.args,
            vec![
                "--vanilla".to_string(),
                Path::new("bench")
                    .join("utils/error_calc_helper.R")
                    .display()
                    .to_string()
            ]
        );
        let estimator = config.settings.estimator.as_ref().unwrap();
        assert_eq!(estimator.program, "python3");
        assert_eq!(config.datasets.len(), 3);
        assert!(config.datasets[2].integer_conversion);
        assert_eq!(config.datasets[1].exclude_methods, vec![Method::WaveNet]);
        assert_eq!(
            config.settings.dataset_path(&config.datasets[0].file),
            Path::new("bench/tsf_data/cif_6_dataset.tsf")
        );
    }

    #[test]
    fn plans_method_major_order_with_exclusions() {
        let config = parse_config(SAMPLE).unwrap();
        let labels: Vec<String> = plan_runs(&config, &[], &[])
            .iter()
            .map(RunSpec::label)
            .collect();
        assert_eq!(
            labels,
            vec![
                "cif_2016_6_feed_forward_lag_15",
                "solar_10_minutes_feed_forward_lag_50",
                "hospital_feed_forward_lag_15",
                "cif_2016_6_wavenet_lag_15",
                "hospital_wavenet_lag_15",
            ]
        );
    }

    #[test]
    fn filters_runs() {
        let config = parse_config(SAMPLE).unwrap();
        let runs = plan_runs(&config, &[Method::WaveNet], &["hospital".to_string()]);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].label(), "hospital_wavenet_lag_15");
    }

    #[test]
    fn rejects_unknown_method() {
        let err = parse_config("methods = [\"lstm\"]").unwrap_err();
        assert!(err.contains("Unsupported method: lstm"), "{err}");
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(parse_config("num_samples = 0").is_err());
        assert!(parse_config("[scoring]\ncommand = []").is_err());
        let zero_lag = "[[dataset]]\nname = \"x\"\nfile = \"x.tsf\"\nlag = 0";
        assert!(parse_config(zero_lag).is_err());
        let duplicate = "[[dataset]]\nname = \"x\"\nfile = \"a.tsf\"\nlag = 1\n\
                         [[dataset]]\nname = \"x\"\nfile = \"b.tsf\"\nlag = 2";
        assert!(parse_config(duplicate).unwrap_err().contains("listed twice"));
    }

    #[test]
    fn default_config_path_loads() {
        let config = load_config(Path::new(DEFAULT_CONFIG_PATH)).unwrap();
        assert_eq!(config.settings.num_samples, DEFAULT_NUM_SAMPLES);
    }

    #[test]
    fn builtin_settings_without_file() {
        let config = resolve_config(ExperimentsFile::default()).unwrap();
        assert!(config.datasets.is_empty());
        assert_eq!(config.settings.methods, Method::ALL.to_vec());
        assert!(config.settings.estimator.is_none());
    }

    #[test]
    fn missing_custom_config_is_error() {
        assert!(load_config(Path::new("does/not/exist.toml")).is_err());
    }

    #[test]
    fn shipped_config_lists_all_datasets() {
        let raw = include_str!("../config/experiments.toml");
        let config = parse_config(raw).unwrap();
        assert_eq!(config.datasets.len(), 42);
        assert_eq!(plan_runs(&config, &[], &[]).len(), 209);
    }
}
