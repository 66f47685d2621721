//! Конвейер одного прогона (разбиение → обучение → сэмплы → медиана → запись → оценка) и пакетный запуск.

use chrono::{TimeDelta, Utc};
use itertools::Itertools;
use tqdm::pbar;
use tracing::{error, info, warn};

use crate::config::{RunSpec, Settings};
use crate::dataset::{Dataset, load_dataset};
use crate::error::PipelineError;
use crate::forecast::{ForecastJob, Forecaster, point_forecast, validate_forecasts};
use crate::frequency::resolve_frequency;
use crate::persist::{ResultPaths, format_elapsed, score, write_execution_time, write_forecasts};
use crate::split::{prepare_series, resolve_horizon};

#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub paths: ResultPaths,
    pub series: usize,
    pub horizon: usize,
    pub seasonality: f64,
    pub elapsed: TimeDelta,
}

/// Итог пакета: успешные прогоны и ошибки по меткам прогонов.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl BatchSummary {
    pub const fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Загружает датасет прогона и прогоняет по нему конвейер.
pub async fn evaluate<F: Forecaster>(
    settings: &Settings,
    run: &RunSpec,
    forecaster: &F,
) -> Result<RunOutcome, PipelineError> {
    info!(dataset = %run.dataset.name, method = %run.method, lag = run.dataset.lag, "Started loading");
    let path = settings.dataset_path(&run.dataset.file);
    let dataset = load_dataset(&path, settings.loader.as_ref()).await?;
    evaluate_dataset(settings, run, &dataset, forecaster).await
}

pub async fn evaluate_dataset<F: Forecaster>(
    settings: &Settings,
    run: &RunSpec,
    dataset: &Dataset,
    forecaster: &F,
) -> Result<RunOutcome, PipelineError> {
    let spec = &run.dataset;
    let frequency = resolve_frequency(dataset.frequency.as_deref())?;
    let horizon = resolve_horizon(&spec.name, dataset.horizon, spec.horizon)?;
    let started_at = Utc::now();

    let prepared = prepare_series(&dataset.series, horizon, frequency.tag)?;
    let estimator = run
        .method
        .estimator_config(frequency.tag, horizon, spec.lag);
    let job = ForecastJob {
        estimator: &estimator,
        num_samples: settings.num_samples,
        train: &prepared.train_views,
        test: &prepared.full_views,
    };
    let sampled = forecaster.forecast(&job).await?;
    validate_forecasts(&sampled, prepared.full_views.len(), horizon)?;

    let forecasts = sampled
        .iter()
        .map(|forecast| point_forecast(forecast, spec.integer_conversion))
        .collect_vec();

    let paths = ResultPaths::new(
        &settings.base_dir,
        &spec.name,
        run.method.label(),
        spec.lag,
    );
    write_forecasts(&paths, &forecasts)?;
    let elapsed = Utc::now() - started_at;
    write_execution_time(&paths, elapsed)?;

    score(
        &settings.scoring,
        &settings.base_dir,
        &paths,
        &prepared.train_rows,
        &prepared.test_rows,
        frequency.seasonality,
    )
    .await?;

    Ok(RunOutcome {
        paths,
        series: forecasts.len(),
        horizon,
        seasonality: frequency.seasonality,
        elapsed,
    })
}

/// Прогоняет план последовательно. Ошибка прогона логируется и пропускается,
/// с `fail_fast` пакет останавливается на первой ошибке.
pub async fn run_batch<F: Forecaster>(
    settings: &Settings,
    runs: &[RunSpec],
    forecaster: &F,
    fail_fast: bool,
) -> BatchSummary {
    let mut summary = BatchSummary::default();
    let mut progress = pbar(Some(runs.len()));

    for run in runs {
        let label = run.label();
        match evaluate(settings, run, forecaster).await {
            Ok(outcome) => {
                info!(
                    run = %label,
                    series = outcome.series,
                    horizon = outcome.horizon,
                    seasonality = outcome.seasonality,
                    elapsed = %format_elapsed(outcome.elapsed),
                    status = "ok",
                    "Finished run"
                );
                summary.succeeded.push(label);
            }
            Err(err) => {
                error!(run = %label, error = %err, status = "err", "Run failed");
                summary.failed.push((label, err.to_string()));
                if fail_fast {
                    let remaining = runs.len() - summary.succeeded.len() - summary.failed.len();
                    warn!(remaining, "Stopping batch after failure");
                    break;
                }
            }
        }
        if let Err(err) = progress.update(1) {
            warn!(error = %err, "Failed to update progress bar");
        }
    }

    summary
}
