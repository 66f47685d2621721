//! Запись результатов прогона и вызов внешнего скрипта оценки ошибок.

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::process::{CommandSpec, run_status};

const RESULTS_DIR: &str = "results";
const FORECASTS_DIR: &str = "fixed_horizon_forecasts";
const EXECUTION_TIMES_DIR: &str = "fixed_horizon_execution_times";
const ERRORS_DIR: &str = "fixed_horizon_errors";
const OUTPUT_EXTENSION: &str = "txt";

/// Пути всех артефактов одного прогона `<dataset>_<method>_lag_<lag>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultPaths {
    pub file_stem: String,
    pub forecasts_dir: PathBuf,
    pub execution_times_dir: PathBuf,
    pub errors_dir: PathBuf,
    pub forecast_file: PathBuf,
    pub execution_time_file: PathBuf,
    pub dataset_dump: PathBuf,
    pub results_dump: PathBuf,
}

impl ResultPaths {
    pub fn new(base_dir: &Path, dataset: &str, method: &str, lag: usize) -> Self {
        let results = base_dir.join(RESULTS_DIR);
        let forecasts_dir = results.join(FORECASTS_DIR);
        let execution_times_dir = results.join(EXECUTION_TIMES_DIR);
        let errors_dir = results.join(ERRORS_DIR);
        let file_stem = format!("{dataset}_{method}_lag_{lag}");
        let file_name = format!("{file_stem}.{OUTPUT_EXTENSION}");

        Self {
            forecast_file: forecasts_dir.join(&file_name),
            execution_time_file: execution_times_dir.join(&file_name),
            dataset_dump: forecasts_dir.join(format!("{dataset}_dataset.{OUTPUT_EXTENSION}")),
            results_dump: forecasts_dir.join(format!("{dataset}_results.{OUTPUT_EXTENSION}")),
            file_stem,
            forecasts_dir,
            execution_times_dir,
            errors_dir,
        }
    }
}

fn ensure_dir(dir: &Path) -> Result<(), PipelineError> {
    fs::create_dir_all(dir).map_err(|err| PipelineError::io(dir, err))
}

/// Пишет строки значений через запятую, без заголовка; строки могут быть разной длины.
pub fn write_rows(path: &Path, rows: &[Vec<f64>]) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        ensure_dir(parent)?;
    }
    let file = fs::File::create(path).map_err(|err| PipelineError::io(path, err))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(BufWriter::new(file));
    for row in rows {
        writer
            .write_record(row.iter().map(ToString::to_string))
            .map_err(|source| PipelineError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
    }
    writer.flush().map_err(|err| PipelineError::io(path, err))?;
    Ok(())
}

/// Длительность в виде `[N day[s], ]H:MM:SS[.ffffff]`; часы не превышают 23.
pub fn format_elapsed(elapsed: TimeDelta) -> String {
    let total_micros = elapsed.num_microseconds().unwrap_or(i64::MAX).max(0);
    let micros = total_micros % 1_000_000;
    let total_secs = total_micros / 1_000_000;
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let clock = if micros == 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours}:{minutes:02}:{seconds:02}.{micros:06}")
    };
    match days {
        0 => clock,
        1 => format!("1 day, {clock}"),
        _ => format!("{days} days, {clock}"),
    }
}

pub fn write_forecasts(paths: &ResultPaths, forecasts: &[Vec<f64>]) -> Result<(), PipelineError> {
    ensure_dir(&paths.forecasts_dir)?;
    write_rows(&paths.forecast_file, forecasts)?;
    info!(path = %paths.forecast_file.display(), rows = forecasts.len(), "Saved forecasts");
    Ok(())
}

pub fn write_execution_time(paths: &ResultPaths, elapsed: TimeDelta) -> Result<(), PipelineError> {
    ensure_dir(&paths.execution_times_dir)?;
    let formatted = format_elapsed(elapsed);
    fs::write(&paths.execution_time_file, &formatted)
        .map_err(|err| PipelineError::io(&paths.execution_time_file, err))?;
    info!(elapsed = %formatted, "Execution time");
    Ok(())
}

/// Временные дампы обучающих и тестовых частей; удаляются при выходе из области видимости.
#[derive(Debug)]
pub struct TempDumps {
    pub dataset: PathBuf,
    pub results: PathBuf,
}

impl TempDumps {
    pub fn write(
        paths: &ResultPaths,
        train_rows: &[Vec<f64>],
        test_rows: &[Vec<f64>],
    ) -> Result<Self, PipelineError> {
        let dumps = Self {
            dataset: paths.dataset_dump.clone(),
            results: paths.results_dump.clone(),
        };
        write_rows(&dumps.dataset, train_rows)?;
        write_rows(&dumps.results, test_rows)?;
        Ok(dumps)
    }
}

impl Drop for TempDumps {
    fn drop(&mut self) {
        for path in [&self.dataset, &self.results] {
            if let Err(err) = fs::remove_file(path)
                && err.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %err, "Failed to remove intermediate file");
            }
        }
    }
}

/// Аргументы скрипта оценки в фиксированном порядке.
pub fn scoring_args(
    base_dir: &Path,
    paths: &ResultPaths,
    dumps: &TempDumps,
    seasonality: f64,
) -> Vec<String> {
    vec![
        base_dir.display().to_string(),
        paths.forecast_file.display().to_string(),
        dumps.results.display().to_string(),
        dumps.dataset.display().to_string(),
        seasonality.to_string(),
        paths.file_stem.clone(),
    ]
}

/// Пишет дампы, запускает оценку ошибок; дампы удаляются в любом случае.
pub async fn score(
    scorer: &CommandSpec,
    base_dir: &Path,
    paths: &ResultPaths,
    train_rows: &[Vec<f64>],
    test_rows: &[Vec<f64>],
    seasonality: f64,
) -> Result<(), PipelineError> {
    let dumps = TempDumps::write(paths, train_rows, test_rows)?;
    ensure_dir(&paths.errors_dir)?;
    let args = scoring_args(base_dir, paths, &dumps, seasonality);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    info!(program = %scorer.program, run = %paths.file_stem, "Calculating errors");
    run_status(scorer, &arg_refs).await
}
