//! Обучение и сэмплирование через внешнюю библиотеку, свёртка сэмплов в точечный прогноз.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PipelineError;
use crate::method::EstimatorConfig;
use crate::process::{CommandSpec, run_command};
use crate::split::ModelView;

pub const DEFAULT_NUM_SAMPLES: usize = 100;

/// Запрос на один прогон: обучить на `train`, сэмплировать по `test`.
#[derive(Debug, Serialize)]
pub struct ForecastJob<'a> {
    pub estimator: &'a EstimatorConfig,
    pub num_samples: usize,
    pub train: &'a [ModelView],
    pub test: &'a [ModelView],
}

/// Сэмплированные траектории одного ряда: `samples[path][step]`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SampleForecast {
    #[serde(deserialize_with = "nullable_paths")]
    pub samples: Vec<Vec<f64>>,
}

fn nullable_paths<'de, D>(deserializer: D) -> Result<Vec<Vec<f64>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Vec<Vec<Option<f64>>> = Deserialize::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|path| {
            path.into_iter()
                .map(|value| value.unwrap_or(f64::NAN))
                .collect()
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    forecasts: Vec<SampleForecast>,
}

/// Обучение сразу на всех обучающих рядах и сэмплирование траекторий по полным рядам.
pub trait Forecaster {
    fn forecast(
        &self,
        job: &ForecastJob<'_>,
    ) -> impl Future<Output = Result<Vec<SampleForecast>, PipelineError>>;
}

/// Мост к библиотеке моделей: JSON-запрос в stdin, JSON-ответ из stdout.
#[derive(Clone, Debug)]
pub struct ExternalForecaster {
    command: CommandSpec,
}

impl ExternalForecaster {
    pub const fn new(command: CommandSpec) -> Self {
        Self { command }
    }
}

impl Forecaster for ExternalForecaster {
    async fn forecast(&self, job: &ForecastJob<'_>) -> Result<Vec<SampleForecast>, PipelineError> {
        let request = serde_json::to_vec(job)?;
        info!(
            estimator = job.estimator.estimator,
            train_series = job.train.len(),
            num_samples = job.num_samples,
            "Training estimator"
        );
        let stdout = run_command(&self.command, &[], Some(request.as_slice())).await?;
        let response: BridgeResponse = serde_json::from_slice(&stdout)?;
        Ok(response.forecasts)
    }
}

/// Проверяет форму ответа: по прогнозу на ряд, каждая траектория длиной в горизонт.
pub fn validate_forecasts(
    forecasts: &[SampleForecast],
    series_count: usize,
    horizon: usize,
) -> Result<(), PipelineError> {
    if forecasts.len() != series_count {
        return Err(PipelineError::InvalidForecast(format!(
            "expected {series_count} forecasts, got {}",
            forecasts.len()
        )));
    }
    for (idx, forecast) in forecasts.iter().enumerate() {
        if forecast.samples.is_empty() {
            return Err(PipelineError::InvalidForecast(format!(
                "series {} has no sample paths",
                idx + 1
            )));
        }
        if let Some(path) = forecast.samples.iter().find(|path| path.len() != horizon) {
            return Err(PipelineError::InvalidForecast(format!(
                "series {} has a path of length {}, expected {horizon}",
                idx + 1,
                path.len()
            )));
        }
    }
    Ok(())
}

/// Медиана без учёта NaN; для чётного числа значений берётся среднее двух центральных.
/// В отличие от `numpy.median`, одиночная NaN-траектория не делает NaN весь шаг;
/// NaN получается, только если на шаге нет ни одного числа.
pub fn median(values: &[f64]) -> f64 {
    let sorted = values
        .iter()
        .copied()
        .filter(|value| !value.is_nan())
        .sorted_by(f64::total_cmp)
        .collect_vec();
    if sorted.is_empty() {
        return f64::NAN;
    }
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        f64::midpoint(sorted[mid - 1], sorted[mid])
    } else {
        sorted[mid]
    }
}

/// Точечный прогноз: медиана по траекториям на каждом шаге.
pub fn point_forecast(forecast: &SampleForecast, integer_conversion: bool) -> Vec<f64> {
    let steps = forecast.samples.first().map_or(0, Vec::len);
    (0..steps)
        .map(|step| {
            let column = forecast
                .samples
                .iter()
                .filter_map(|path| path.get(step).copied())
                .collect_vec();
            let value = median(&column);
            // Округление к чётному, как у numpy.
            if integer_conversion {
                value.round_ties_even()
            } else {
                value
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn forecast(samples: Vec<Vec<f64>>) -> SampleForecast {
        SampleForecast { samples }
    }

    #[test]
    fn median_of_three_paths_per_step() {
        let sampled = forecast(vec![
            vec![10.0, 12.0, 14.0],
            vec![11.0, 13.0, 15.0],
            vec![9.0, 11.0, 13.0],
        ]);
        assert_eq!(point_forecast(&sampled, false), vec![10.0, 12.0, 14.0]);
        assert_eq!(median(&[9.0, 11.0, 13.0]), 11.0);
    }

    #[test]
    fn even_count_uses_midpoint() {
        assert_eq!(median(&[1.0, 4.0, 2.0, 3.0]), 2.5);
    }

    #[test]
    fn rounding_is_half_to_even() {
        let sampled = forecast(vec![vec![11.0, 12.0], vec![12.0, 13.0]]);
        assert_eq!(point_forecast(&sampled, false), vec![11.5, 12.5]);
        assert_eq!(point_forecast(&sampled, true), vec![12.0, 12.0]);
    }

    #[test]
    fn nan_samples_are_ignored() {
        assert_eq!(median(&[f64::NAN, 5.0, 7.0, 6.0]), 6.0);
        assert!(median(&[f64::NAN, f64::NAN]).is_nan());
    }

    #[test]
    fn bridge_response_maps_nulls_to_nan() {
        let response: BridgeResponse =
            serde_json::from_str(r#"{"forecasts":[{"samples":[[1.0,null]]}]}"#).unwrap();
        assert_eq!(response.forecasts[0].samples[0][0], 1.0);
        assert!(response.forecasts[0].samples[0][1].is_nan());
    }

    #[test]
    fn validation_checks_counts_and_lengths() {
        let good = vec![forecast(vec![vec![1.0, 2.0]])];
        assert!(validate_forecasts(&good, 1, 2).is_ok());
        assert!(validate_forecasts(&good, 2, 2).is_err());
        assert!(validate_forecasts(&good, 1, 3).is_err());
        assert!(validate_forecasts(&[forecast(Vec::new())], 1, 2).is_err());
    }

    #[cfg(unix)]
    fn shell(script: &str) -> CommandSpec {
        CommandSpec::from_argv(
            &["sh".to_string(), "-c".to_string(), script.to_string()],
            Some(10),
        )
        .unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bridge_exchanges_json_over_stdio() {
        use crate::method::Method;
        use crate::split::placeholder_start;

        let dir = tempfile::tempdir().unwrap();
        let captured = dir.path().join("request.json");
        let bridge = ExternalForecaster::new(shell(&format!(
            r#"cat > '{}'; printf '%s' '{{"forecasts":[{{"samples":[[1.5,null],[2.5,3.5]]}}]}}'"#,
            captured.display()
        )));

        let estimator = Method::DeepAr.estimator_config("1D", 2, 4);
        let train = vec![ModelView {
            target: vec![1.0, f64::NAN, 3.0],
            start: placeholder_start(),
            freq: "1D",
        }];
        let test = vec![ModelView {
            target: vec![1.0, f64::NAN, 3.0, 4.0, 5.0],
            start: placeholder_start(),
            freq: "1D",
        }];
        let job = ForecastJob {
            estimator: &estimator,
            num_samples: 7,
            train: &train,
            test: &test,
        };

        let forecasts = bridge.forecast(&job).await.unwrap();
        assert_eq!(forecasts.len(), 1);
        assert_eq!(forecasts[0].samples[0][0], 1.5);
        assert!(forecasts[0].samples[0][1].is_nan());
        assert_eq!(forecasts[0].samples[1], vec![2.5, 3.5]);

        let request: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&captured).unwrap()).unwrap();
        assert_eq!(request["estimator"]["estimator"], "DeepAREstimator");
        assert_eq!(request["estimator"]["prediction_length"], 2);
        assert_eq!(request["estimator"]["context_length"], 4);
        assert_eq!(request["num_samples"], 7);
        assert_eq!(request["train"].as_array().unwrap().len(), 1);
        assert!(request["train"][0]["target"][1].is_null());
        assert_eq!(request["test"][0]["target"].as_array().unwrap().len(), 5);
        assert_eq!(request["test"][0]["start"], "1900-01-01 00:00:00");
        assert_eq!(request["test"][0]["freq"], "1D");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_bridge_is_reported() {
        let bridge = ExternalForecaster::new(CommandSpec::from_argv(&["false".to_string()], None).unwrap());
        let estimator = crate::method::Method::NBeats.estimator_config("1M", 3, 2);
        let job = ForecastJob {
            estimator: &estimator,
            num_samples: 1,
            train: &[],
            test: &[],
        };
        let err = bridge.forecast(&job).await.unwrap_err();
        assert!(matches!(err, PipelineError::CommandFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn malformed_bridge_output_is_a_json_error() {
        let bridge = ExternalForecaster::new(shell("cat > /dev/null; echo not-json"));
        let estimator = crate::method::Method::WaveNet.estimator_config("1H", 2, 2);
        let job = ForecastJob {
            estimator: &estimator,
            num_samples: 1,
            train: &[],
            test: &[],
        };
        let err = bridge.forecast(&job).await.unwrap_err();
        assert!(matches!(err, PipelineError::Json(_)));
    }

    proptest! {
        #[test]
        fn point_forecast_matches_per_step_median(
            paths in prop::collection::vec(prop::collection::vec(-1e3..1e3_f64, 4), 1..50),
            integer_conversion in any::<bool>(),
        ) {
            let sampled = forecast(paths.clone());
            let point = point_forecast(&sampled, integer_conversion);
            prop_assert_eq!(point.len(), 4);
            for (step, value) in point.iter().enumerate() {
                let mut column: Vec<f64> = paths.iter().map(|path| path[step]).collect();
                column.sort_by(f64::total_cmp);
                let n = column.len();
                let expected = if n % 2 == 0 {
                    (column[n / 2 - 1] + column[n / 2]) / 2.0
                } else {
                    column[n / 2]
                };
                let expected = if integer_conversion { expected.round_ties_even() } else { expected };
                prop_assert!((value - expected).abs() < 1e-9);
            }
        }
    }
}
