//! Загрузка датасетов: JSON-документ (в том числе .json.gz) или вывод внешнего конвертера.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use flate2::read::GzDecoder;
use serde::{Deserialize, Deserializer};
use tracing::info;

use crate::error::PipelineError;
use crate::process::{CommandSpec, run_command};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIME_FORMAT_DASHED: &str = "%Y-%m-%d %H-%M-%S";
const DATE_FORMAT: &str = "%Y-%m-%d";
const JSON_EXTENSION: &str = "json";
const GZIP_EXTENSION: &str = "gz";

/// Один ряд датасета; пропуски хранятся как NaN.
#[derive(Clone, Debug, Deserialize)]
pub struct Series {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub start: Option<NaiveDateTime>,
    #[serde(deserialize_with = "nullable_values")]
    pub values: Vec<f64>,
}

impl Series {
    /// Имя для логов и ошибок: собственное или порядковый номер.
    pub fn label(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("T{}", index + 1))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub horizon: Option<usize>,
    #[serde(default)]
    pub contain_missing_values: bool,
    #[serde(default = "default_equal_length")]
    pub contain_equal_length: bool,
    pub series: Vec<Series>,
}

const fn default_equal_length() -> bool {
    true
}

/// Заменяет `null` в значениях ряда на NaN.
fn nullable_values<'de, D>(deserializer: D) -> Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Option<f64>> = Deserialize::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|value| value.unwrap_or(f64::NAN))
        .collect())
}

fn optional_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Deserialize::deserialize(deserializer)?;
    raw.map(|value| parse_timestamp(&value).map_err(serde::de::Error::custom))
        .transpose()
}

/// Понимает обычный формат, формат .tsf с дефисами во времени и голую дату.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, String> {
    let trimmed = raw.trim();
    if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, TIME_FORMAT) {
        return Ok(parsed);
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, TIME_FORMAT_DASHED) {
        return Ok(parsed);
    }
    NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| format!("unrecognized timestamp '{trimmed}'"))
}

pub fn parse_dataset<R: Read>(reader: R) -> Result<Dataset, PipelineError> {
    Ok(serde_json::from_reader(reader)?)
}

/// Читает датасет по пути; форматы, отличные от JSON, отдаются внешнему конвертеру.
pub async fn load_dataset(
    path: &Path,
    loader: Option<&CommandSpec>,
) -> Result<Dataset, PipelineError> {
    let dataset = match input_kind(path) {
        InputKind::Json => {
            let file = File::open(path).map_err(|err| PipelineError::io(path, err))?;
            parse_dataset(BufReader::new(file))?
        }
        InputKind::GzipJson => {
            let file = File::open(path).map_err(|err| PipelineError::io(path, err))?;
            parse_dataset(GzDecoder::new(BufReader::new(file)))?
        }
        InputKind::External => {
            let command =
                loader.ok_or_else(|| PipelineError::UnsupportedInput(path.to_path_buf()))?;
            let path_arg = path.display().to_string();
            let stdout = run_command(command, &[path_arg.as_str()], None).await?;
            parse_dataset(stdout.as_slice())?
        }
    };

    info!(
        path = %path.display(),
        series = dataset.series.len(),
        frequency = dataset.frequency.as_deref().unwrap_or("-"),
        horizon = ?dataset.horizon,
        missing_values = dataset.contain_missing_values,
        equal_length = dataset.contain_equal_length,
        "Loaded dataset"
    );
    Ok(dataset)
}

#[derive(Debug, PartialEq, Eq)]
enum InputKind {
    Json,
    GzipJson,
    External,
}

fn input_kind(path: &Path) -> InputKind {
    let extension = path.extension().and_then(|ext| ext.to_str());
    match extension {
        Some(JSON_EXTENSION) => InputKind::Json,
        Some(GZIP_EXTENSION)
            if path
                .file_stem()
                .map(Path::new)
                .and_then(|stem| stem.extension())
                .and_then(|ext| ext.to_str())
                == Some(JSON_EXTENSION) =>
        {
            InputKind::GzipJson
        }
        _ => InputKind::External,
    }
}
