//! Семейства моделей и их конфигурации для внешней библиотеки.

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum Method {
    #[serde(rename = "feed_forward")]
    #[value(name = "feed_forward")]
    FeedForward,
    #[serde(rename = "transformer")]
    #[value(name = "transformer")]
    Transformer,
    #[serde(rename = "deepar")]
    #[value(name = "deepar")]
    DeepAr,
    #[serde(rename = "nbeats")]
    #[value(name = "nbeats")]
    NBeats,
    #[serde(rename = "wavenet")]
    #[value(name = "wavenet")]
    WaveNet,
}

impl Method {
    pub const ALL: [Self; 5] = [
        Self::FeedForward,
        Self::Transformer,
        Self::DeepAr,
        Self::NBeats,
        Self::WaveNet,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::FeedForward => "feed_forward",
            Self::Transformer => "transformer",
            Self::DeepAr => "deepar",
            Self::NBeats => "nbeats",
            Self::WaveNet => "wavenet",
        }
    }

    /// Имя класса оценщика во внешней библиотеке.
    pub const fn estimator_name(self) -> &'static str {
        match self {
            Self::FeedForward => "SimpleFeedForwardEstimator",
            Self::Transformer => "TransformerEstimator",
            Self::DeepAr => "DeepAREstimator",
            Self::NBeats => "NBEATSEstimator",
            Self::WaveNet => "WaveNetEstimator",
        }
    }

    /// WaveNet сам выбирает окно контекста, остальным передаётся лаг.
    pub const fn uses_context_length(self) -> bool {
        !matches!(self, Self::WaveNet)
    }

    pub const fn estimator_config(
        self,
        freq: &'static str,
        prediction_length: usize,
        lag: usize,
    ) -> EstimatorConfig {
        EstimatorConfig {
            method: self,
            estimator: self.estimator_name(),
            freq,
            prediction_length,
            context_length: if self.uses_context_length() {
                Some(lag)
            } else {
                None
            },
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Method {
    type Err = PipelineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|method| method.label() == normalized)
            .ok_or_else(|| PipelineError::UnsupportedMethod(raw.to_string()))
    }
}

/// Параметры оценщика, передаваемые мосту к библиотеке моделей.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EstimatorConfig {
    pub method: Method,
    pub estimator: &'static str,
    pub freq: &'static str,
    pub prediction_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_length: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lag_becomes_context_length() {
        let config = Method::DeepAr.estimator_config("1H", 48, 30);
        assert_eq!(config.estimator, "DeepAREstimator");
        assert_eq!(config.context_length, Some(30));
        assert_eq!(config.prediction_length, 48);
    }

    #[test]
    fn wavenet_has_no_context_length() {
        let config = Method::WaveNet.estimator_config("1D", 30, 9);
        assert_eq!(config.context_length, None);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["method"], "wavenet");
        assert!(json.get("context_length").is_none());
    }

    #[test]
    fn parses_labels_and_aliases() {
        assert_eq!("feed_forward".parse::<Method>().unwrap(), Method::FeedForward);
        assert_eq!("feed-forward".parse::<Method>().unwrap(), Method::FeedForward);
        assert_eq!("NBEATS".parse::<Method>().unwrap(), Method::NBeats);
        assert!(matches!(
            "lstm".parse::<Method>(),
            Err(PipelineError::UnsupportedMethod(label)) if label == "lstm"
        ));
    }

    #[test]
    fn labels_round_trip_through_serde() {
        for method in Method::ALL {
            let json = serde_json::to_string(&method).unwrap();
            assert_eq!(json, format!("\"{}\"", method.label()));
        }
    }
}
