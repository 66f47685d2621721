//! Разбиение рядов на обучающий префикс и тестовый хвост и сборка представлений для модели.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::dataset::Series;
use crate::error::PipelineError;

/// Заглушка для рядов без записанного начала.
const PLACEHOLDER_START: (i32, u32, u32) = (1900, 1, 1);
const VIEW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Горизонт из датасета имеет приоритет над переданным вызывающей стороной.
pub fn resolve_horizon(
    dataset: &str,
    declared: Option<usize>,
    override_horizon: Option<usize>,
) -> Result<usize, PipelineError> {
    let horizon = declared
        .or(override_horizon)
        .ok_or_else(|| PipelineError::MissingHorizon {
            dataset: dataset.to_string(),
        })?;
    if horizon == 0 {
        return Err(PipelineError::Config(format!(
            "forecast horizon for {dataset} must be > 0"
        )));
    }
    Ok(horizon)
}

#[derive(Clone, Debug, PartialEq)]
pub struct SeriesSplit<'a> {
    pub train: &'a [f64],
    pub test: &'a [f64],
}

/// Отделяет последние `horizon` точек; ряд обязан быть строго длиннее горизонта.
pub fn split_series<'a>(
    label: &str,
    values: &'a [f64],
    horizon: usize,
) -> Result<SeriesSplit<'a>, PipelineError> {
    if horizon >= values.len() {
        return Err(PipelineError::SeriesTooShort {
            series: label.to_string(),
            length: values.len(),
            horizon,
        });
    }
    let (train, test) = values.split_at(values.len() - horizon);
    Ok(SeriesSplit { train, test })
}

/// Запись для библиотеки моделей: целевой ряд и его начало с частотой.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelView {
    pub target: Vec<f64>,
    #[serde(serialize_with = "serialize_start")]
    pub start: NaiveDateTime,
    pub freq: &'static str,
}

fn serialize_start<S: serde::Serializer>(
    start: &NaiveDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&start.format(VIEW_TIME_FORMAT))
}

/// Всё, что нужно одному прогону: представления для обучения/прогноза и дампы для оценки.
#[derive(Clone, Debug, Default)]
pub struct PreparedSeries {
    pub train_views: Vec<ModelView>,
    pub full_views: Vec<ModelView>,
    pub train_rows: Vec<Vec<f64>>,
    pub test_rows: Vec<Vec<f64>>,
}

pub fn placeholder_start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(PLACEHOLDER_START.0, PLACEHOLDER_START.1, PLACEHOLDER_START.2)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

pub fn prepare_series(
    series: &[Series],
    horizon: usize,
    freq: &'static str,
) -> Result<PreparedSeries, PipelineError> {
    let mut prepared = PreparedSeries {
        train_views: Vec::with_capacity(series.len()),
        full_views: Vec::with_capacity(series.len()),
        train_rows: Vec::with_capacity(series.len()),
        test_rows: Vec::with_capacity(series.len()),
    };
    let fallback_start = placeholder_start();

    for (idx, item) in series.iter().enumerate() {
        let split = split_series(&item.label(idx), &item.values, horizon)?;
        let start = item.start.unwrap_or(fallback_start);

        prepared.train_views.push(ModelView {
            target: split.train.to_vec(),
            start,
            freq,
        });
        prepared.full_views.push(ModelView {
            target: item.values.clone(),
            start,
            freq,
        });
        prepared.train_rows.push(split.train.to_vec());
        prepared.test_rows.push(split.test.to_vec());
    }

    Ok(prepared)
}
