mod config;
mod dataset;
mod error;
mod forecast;
mod frequency;
mod method;
mod persist;
mod pipeline;
mod process;
mod split;

use clap::{CommandFactory, Parser, Subcommand};
use std::fs::{self, File};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use crate::config::{DEFAULT_CONFIG_PATH, DatasetSpec, ExperimentsConfig, RunSpec, load_config, plan_runs};
use crate::forecast::ExternalForecaster;
use crate::method::Method;
use crate::persist::format_elapsed;
use clap_complete::{Shell, generate};
use tracing_subscriber::EnvFilter;

const APP_ABOUT: &str = "TSBench - benchmark of pretrained neural forecasters on fixed horizons";

#[derive(Parser, Debug)]
#[command(name = "tsbench", about = APP_ABOUT)]
struct Args {
    /// TOML-файл с настройками и списком датасетов.
    #[arg(
        short = 'c',
        long = "config",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_PATH,
        global = true
    )]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Пакетный режим: все датасеты × методы из конфигурации.
    Run {
        /// Ограничить методы (можно повторять).
        #[arg(short = 'm', long = "method", value_enum)]
        methods: Vec<Method>,
        /// Ограничить датасеты по имени (можно повторять).
        #[arg(short = 'd', long = "dataset", value_name = "NAME")]
        datasets: Vec<String>,
        /// Остановиться на первой ошибке вместо перехода к следующему прогону.
        #[arg(long = "fail-fast")]
        fail_fast: bool,
    },
    /// Один прогон по датасету, не обязательно описанному в конфигурации.
    Evaluate {
        /// Имя датасета в именах выходных файлов.
        #[arg(long = "name", value_name = "NAME")]
        name: String,
        /// Файл датасета (относительно каталога данных или абсолютный).
        #[arg(long = "file", value_name = "PATH")]
        file: PathBuf,
        /// Метод прогноза.
        #[arg(short = 'm', long = "method", value_enum)]
        method: Method,
        /// Число прошлых значений, на которые опирается модель.
        #[arg(long = "lag", value_name = "N")]
        lag: usize,
        /// Горизонт, если он не объявлен в датасете.
        #[arg(long = "horizon", value_name = "N")]
        horizon: Option<usize>,
        /// Округлять точечные прогнозы до целых.
        #[arg(long = "integer-conversion")]
        integer_conversion: bool,
    },
    /// Показать план прогонов без запуска.
    List {
        /// Ограничить методы (можно повторять).
        #[arg(short = 'm', long = "method", value_enum)]
        methods: Vec<Method>,
        /// Ограничить датасеты по имени (можно повторять).
        #[arg(short = 'd', long = "dataset", value_name = "NAME")]
        datasets: Vec<String>,
    },
    /// Сгенерировать файлы автодополнения для shell.
    Completions {
        /// Целевой shell.
        #[arg(value_enum)]
        shell: Shell,
        /// Куда сохранить файл (если не указано — stdout).
        #[arg(short = 'o', long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

fn generate_completions(shell: Shell, output: Option<PathBuf>) -> Result<(), String> {
    let mut cmd = Args::command();
    let bin_name = cmd.get_name().to_string();
    if let Some(path) = output {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|err| format!("Failed to create {}: {err}", parent.display()))?;
        }
        let mut file = File::create(&path)
            .map_err(|err| format!("Failed to create {}: {err}", path.display()))?;
        generate(shell, &mut cmd, bin_name, &mut file);
    } else {
        let mut stdout = std::io::stdout();
        generate(shell, &mut cmd, bin_name, &mut stdout);
    }
    Ok(())
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tsbench=info"));
    let ansi = std::io::stderr().is_terminal();
    // stdout отдан под вывод команд (`list`, `completions`).
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(ansi)
        .compact()
        .init();
}

fn headline(message: &str) {
    tracing::info!(status = "start", "{message}");
}

fn info(message: &str) {
    tracing::info!(status = "info", "{message}");
}

fn success(message: &str) {
    tracing::info!(status = "ok", "{message}");
}

fn error(message: &str) {
    tracing::error!(status = "err", "{message}");
}

fn build_forecaster(config: &ExperimentsConfig) -> Result<ExternalForecaster, String> {
    config
        .settings
        .estimator
        .clone()
        .map(ExternalForecaster::new)
        .ok_or_else(|| "No [estimator] command configured".to_string())
}

fn print_plan(runs: &[RunSpec]) {
    for run in runs {
        let horizon = run
            .dataset
            .horizon
            .map_or_else(|| "dataset".to_string(), |h| h.to_string());
        println!(
            "{}\t{}\thorizon={horizon}\tround={}",
            run.label(),
            run.dataset.file.display(),
            run.dataset.integer_conversion
        );
    }
}

async fn run_batch(
    config: &ExperimentsConfig,
    methods: &[Method],
    datasets: &[String],
    fail_fast: bool,
) -> Result<(), String> {
    let runs = plan_runs(config, methods, datasets);
    if runs.is_empty() {
        return Err("No runs planned: check [[dataset]] entries and filters".to_string());
    }
    let forecaster = build_forecaster(config)?;
    tracing::info!(
        mode = "run",
        runs = runs.len(),
        base_dir = %config.settings.base_dir.display(),
        num_samples = config.settings.num_samples,
        fail_fast,
        "Starting batch"
    );

    let summary = pipeline::run_batch(&config.settings, &runs, &forecaster, fail_fast).await;
    if summary.is_success() {
        success(&format!("Finished {} runs", summary.succeeded.len()));
        Ok(())
    } else {
        for (label, err) in &summary.failed {
            error(&format!("{label}: {err}"));
        }
        Err(format!(
            "{} of {} runs failed",
            summary.failed.len(),
            summary.failed.len() + summary.succeeded.len()
        ))
    }
}

async fn evaluate_one(config: &ExperimentsConfig, run: RunSpec) -> Result<(), String> {
    let forecaster = build_forecaster(config)?;
    tracing::info!(
        mode = "evaluate",
        run = %run.label(),
        input = %config.settings.dataset_path(&run.dataset.file).display(),
        "Evaluating single run"
    );
    let outcome = pipeline::evaluate(&config.settings, &run, &forecaster)
        .await
        .map_err(|err| err.to_string())?;
    success(&format!(
        "Saved forecasts for {} series to {} in {}",
        outcome.series,
        outcome.paths.forecast_file.display(),
        format_elapsed(outcome.elapsed)
    ));
    Ok(())
}

fn finish(result: Result<(), String>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error(&err);
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match args.command {
        Command::Completions { shell, output } => {
            if let Err(err) = generate_completions(shell, output) {
                eprintln!("{err}");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Command::List { methods, datasets } => {
            init_logging();
            let config = match load_config(&args.config) {
                Ok(config) => config,
                Err(err) => return finish(Err(err)),
            };
            print_plan(&plan_runs(&config, &methods, &datasets));
            ExitCode::SUCCESS
        }
        Command::Run {
            methods,
            datasets,
            fail_fast,
        } => {
            init_logging();
            headline(APP_ABOUT);
            info(&format!("Loading experiments from {}", args.config.display()));
            let config = match load_config(&args.config) {
                Ok(config) => config,
                Err(err) => return finish(Err(err)),
            };
            finish(run_batch(&config, &methods, &datasets, fail_fast).await)
        }
        Command::Evaluate {
            name,
            file,
            method,
            lag,
            horizon,
            integer_conversion,
        } => {
            init_logging();
            headline(APP_ABOUT);
            let config = match load_config(&args.config) {
                Ok(config) => config,
                Err(err) => return finish(Err(err)),
            };
            if lag == 0 {
                return finish(Err("--lag must be > 0".to_string()));
            }
            if horizon == Some(0) {
                return finish(Err("--horizon must be > 0".to_string()));
            }
            let run = RunSpec {
                dataset: DatasetSpec {
                    name,
                    file,
                    lag,
                    horizon,
                    integer_conversion,
                    exclude_methods: Vec::new(),
                },
                method,
            };
            finish(evaluate_one(&config, run).await)
        }
    }
}
