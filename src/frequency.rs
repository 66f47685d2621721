//! Частоты датасетов: тег для библиотеки моделей и период сезонности для масштабирования ошибок.

use crate::error::PipelineError;

/// Частота по умолчанию, если датасет её не объявляет.
const DEFAULT_TAG: &str = "1Y";
const DEFAULT_SEASONALITY: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frequency {
    Minutely,
    TenMinutes,
    HalfHourly,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

/// Сезонность: один период или набор кандидатов (для частот мельче суток).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Seasonality {
    Single(f64),
    Multiple(&'static [f64]),
}

impl Seasonality {
    /// Период для расчёта MASE: минимум из кандидатов.
    pub fn period(self) -> f64 {
        match self {
            Self::Single(period) => period,
            Self::Multiple(candidates) => candidates
                .iter()
                .copied()
                .fold(f64::INFINITY, f64::min),
        }
    }
}

const MINUTELY_PERIODS: [f64; 3] = [1440.0, 10080.0, 525_960.0];
const TEN_MINUTES_PERIODS: [f64; 3] = [144.0, 1008.0, 52596.0];
const HALF_HOURLY_PERIODS: [f64; 3] = [48.0, 336.0, 17532.0];
const HOURLY_PERIODS: [f64; 3] = [24.0, 168.0, 8766.0];

impl Frequency {
    pub const ALL: [Self; 9] = [
        Self::Minutely,
        Self::TenMinutes,
        Self::HalfHourly,
        Self::Hourly,
        Self::Daily,
        Self::Weekly,
        Self::Monthly,
        Self::Quarterly,
        Self::Yearly,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Minutely => "minutely",
            Self::TenMinutes => "10_minutes",
            Self::HalfHourly => "half_hourly",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }

    /// Тег частоты в нотации библиотеки моделей.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Minutely => "1min",
            Self::TenMinutes => "10min",
            Self::HalfHourly => "30min",
            Self::Hourly => "1H",
            Self::Daily => "1D",
            Self::Weekly => "1W",
            Self::Monthly => "1M",
            Self::Quarterly => "1Q",
            Self::Yearly => "1Y",
        }
    }

    pub const fn seasonality(self) -> Seasonality {
        match self {
            Self::Minutely => Seasonality::Multiple(&MINUTELY_PERIODS),
            Self::TenMinutes => Seasonality::Multiple(&TEN_MINUTES_PERIODS),
            Self::HalfHourly => Seasonality::Multiple(&HALF_HOURLY_PERIODS),
            Self::Hourly => Seasonality::Multiple(&HOURLY_PERIODS),
            Self::Daily => Seasonality::Single(7.0),
            Self::Weekly => Seasonality::Single(365.25 / 7.0),
            Self::Monthly => Seasonality::Single(12.0),
            Self::Quarterly => Seasonality::Single(4.0),
            Self::Yearly => Seasonality::Single(1.0),
        }
    }

    pub fn from_label(label: &str) -> Result<Self, PipelineError> {
        Self::ALL
            .into_iter()
            .find(|freq| freq.label() == label)
            .ok_or_else(|| PipelineError::UnsupportedFrequency(label.to_string()))
    }
}

/// Итог разрешения частоты для одного прогона.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolvedFrequency {
    pub tag: &'static str,
    pub seasonality: f64,
}

pub fn resolve_frequency(label: Option<&str>) -> Result<ResolvedFrequency, PipelineError> {
    let Some(label) = label else {
        return Ok(ResolvedFrequency {
            tag: DEFAULT_TAG,
            seasonality: DEFAULT_SEASONALITY,
        });
    };
    let freq = Frequency::from_label(label)?;
    Ok(ResolvedFrequency {
        tag: freq.tag(),
        seasonality: freq.seasonality().period(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hourly_uses_daily_cycle() {
        let resolved = resolve_frequency(Some("hourly")).unwrap();
        assert_eq!(resolved.tag, "1H");
        assert_eq!(resolved.seasonality, 24.0);
    }

    #[test]
    fn missing_label_defaults_to_yearly() {
        let resolved = resolve_frequency(None).unwrap();
        assert_eq!(resolved.tag, "1Y");
        assert_eq!(resolved.seasonality, 1.0);
    }

    #[test]
    fn unknown_label_is_rejected() {
        let err = resolve_frequency(Some("fortnightly")).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFrequency(label) if label == "fortnightly"));
    }

    #[test]
    fn seasonality_is_minimum_or_scalar() {
        for freq in Frequency::ALL {
            let resolved = resolve_frequency(Some(freq.label())).unwrap();
            let expected = match freq.seasonality() {
                Seasonality::Single(period) => period,
                Seasonality::Multiple(candidates) => {
                    *candidates.iter().min_by(|a, b| a.total_cmp(b)).unwrap()
                }
            };
            assert_eq!(resolved.seasonality, expected, "{}", freq.label());
        }
    }

    #[test]
    fn weekly_period_is_fractional() {
        let resolved = resolve_frequency(Some("weekly")).unwrap();
        assert!((resolved.seasonality - 52.178_571).abs() < 1e-6);
    }
}
