//! Ошибки конвейера оценки: конфигурация, неподдерживаемые опции, ввод-вывод и внешние процессы.

use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;

#[derive(Debug)]
pub enum PipelineError {
    /// Горизонт не задан ни в датасете, ни вызывающей стороной.
    MissingHorizon { dataset: String },
    /// Некорректное значение в конфигурации.
    Config(String),
    UnsupportedFrequency(String),
    UnsupportedMethod(String),
    UnsupportedInput(PathBuf),
    /// Ряд не длиннее горизонта: обучающий префикс был бы пустым.
    SeriesTooShort {
        series: String,
        length: usize,
        horizon: usize,
    },
    InvalidForecast(String),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Json(serde_json::Error),
    Csv {
        path: PathBuf,
        source: csv::Error,
    },
    Spawn {
        program: String,
        source: std::io::Error,
    },
    CommandFailed {
        program: String,
        status: ExitStatus,
    },
    Timeout {
        program: String,
        secs: u64,
    },
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHorizon { dataset } => write!(
                f,
                "Forecast horizon required for {dataset}: not declared in the dataset and no override given"
            ),
            Self::Config(message) => write!(f, "Invalid configuration: {message}"),
            Self::UnsupportedFrequency(label) => write!(f, "Unsupported frequency: {label}"),
            Self::UnsupportedMethod(label) => write!(f, "Unsupported method: {label}"),
            Self::UnsupportedInput(path) => write!(
                f,
                "Unsupported dataset input {}: no loader command configured",
                path.display()
            ),
            Self::SeriesTooShort {
                series,
                length,
                horizon,
            } => write!(
                f,
                "Series {series} has {length} points, not enough for horizon {horizon}"
            ),
            Self::InvalidForecast(message) => write!(f, "Invalid forecast output: {message}"),
            Self::Io { path, source } => write!(f, "I/O error on {}: {source}", path.display()),
            Self::Json(err) => write!(f, "JSON error: {err}"),
            Self::Csv { path, source } => write!(f, "CSV error on {}: {source}", path.display()),
            Self::Spawn { program, source } => write!(f, "Failed to start {program}: {source}"),
            Self::CommandFailed { program, status } => write!(f, "{program} exited with {status}"),
            Self::Timeout { program, secs } => write!(f, "{program} timed out after {secs}s"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } | Self::Spawn { source, .. } => Some(source),
            Self::Json(err) => Some(err),
            Self::Csv { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}
