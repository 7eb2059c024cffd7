use super::regression::{Regression, RegressionInput, RegressionSettings};
use crate::traits::Handler;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastSettings {
    /// Autoregressive order.
    pub lags: usize,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self { lags: 3 }
    }
}

fn default_horizon() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeSeriesInput {
    pub series: Vec<f64>,
    #[serde(default = "default_horizon")]
    pub horizon: usize,
    #[serde(default)]
    pub settings: ForecastSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forecast {
    pub forecast: Vec<f64>,
    /// Weights on lags, oldest first.
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

/// AR(p) forecast: fits the lag window with the `regression` handler and
/// rolls the fitted model forward `horizon` steps.
pub struct TimeSeries;

impl Handler for TimeSeries {
    const LABEL: &'static str = "time_series";
    const PARAMETERS: &'static [&'static str] = &["series", "horizon", "settings"];

    type Input = TimeSeriesInput;
    type Output = Forecast;

    fn run(&self, input: TimeSeriesInput) -> Result<Forecast> {
        let lags = input.settings.lags;
        if lags == 0 {
            bail!("lags must be at least 1.");
        }
        if input.series.len() <= lags {
            bail!(
                "series needs more than {} observations for {} lags, got {}.",
                lags,
                lags,
                input.series.len()
            );
        }

        let features: Vec<Vec<f64>> = input
            .series
            .windows(lags)
            .take(input.series.len() - lags)
            .map(<[f64]>::to_vec)
            .collect();
        let targets = input.series[lags..].to_vec();

        let model = Regression.run(RegressionInput {
            features,
            targets,
            query: None,
            settings: RegressionSettings::default(),
        })?;

        let mut window = input.series[input.series.len() - lags..].to_vec();
        let mut forecast = Vec::with_capacity(input.horizon);
        for _ in 0..input.horizon {
            let next = model.predict(&window);
            forecast.push(next);
            window.remove(0);
            window.push(next);
        }

        Ok(Forecast {
            forecast,
            coefficients: model.coefficients,
            intercept: model.intercept,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ForecastSettings, TimeSeries, TimeSeriesInput};
    use crate::traits::Handler;

    #[test]
    fn extends_a_linear_trend() {
        let series: Vec<f64> = (1..=12).map(f64::from).collect();
        let out = TimeSeries
            .run(TimeSeriesInput {
                series,
                horizon: 3,
                settings: ForecastSettings::default(),
            })
            .expect("trend is fittable");
        for (got, want) in out.forecast.iter().zip([13.0, 14.0, 15.0]) {
            assert!((got - want).abs() < 1e-6, "got {got}, want {want}");
        }
    }

    #[test]
    fn geometric_series_with_one_lag() {
        let series: Vec<f64> = (0..8).map(|i| 2.0_f64.powi(i)).collect();
        let out = TimeSeries
            .run(TimeSeriesInput {
                series,
                horizon: 2,
                settings: ForecastSettings { lags: 1 },
            })
            .expect("geometric series is fittable");
        assert!((out.coefficients[0] - 2.0).abs() < 1e-9);
        assert!(out.intercept.abs() < 1e-9);
        assert!((out.forecast[1] - 512.0).abs() < 1e-6);
    }

    #[test]
    fn short_series_is_rejected() {
        let err = TimeSeries
            .run(TimeSeriesInput {
                series: vec![1.0, 2.0, 3.0],
                horizon: 1,
                settings: ForecastSettings::default(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("more than 3 observations"));
    }
}
