use crate::conditioning::GlitchReport;
use crate::pipeline::Dashboard;
use crate::signal::TimeSeries;
use serde::{Deserialize, Serialize};

const PAYLOAD_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One chart trace: parallel timestamp and value arrays, `null` where missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesPayload {
    pub x: Vec<String>,
    pub y: Vec<Option<f64>>,
}

impl From<&TimeSeries> for SeriesPayload {
    fn from(series: &TimeSeries) -> Self {
        Self {
            x: series
                .timestamps()
                .map(|t| t.format(PAYLOAD_TIME_FORMAT).to_string())
                .collect(),
            y: series
                .data
                .iter()
                .map(|v| v.is_finite().then_some(*v))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub fusion: String,
    pub glitches: GlitchReport,
    pub window_start: String,
    pub now: String,
}

/// The response body handed to the dashboard front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardPayload {
    pub raw: SeriesPayload,
    pub temp_filt: SeriesPayload,
    pub temp_zb: SeriesPayload,
    pub forecast: SeriesPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast_unavailable: Option<String>,
    pub diagnostics: Diagnostics,
}

impl From<&Dashboard> for DashboardPayload {
    fn from(dash: &Dashboard) -> Self {
        let (forecast, forecast_unavailable) = match &dash.forecast {
            Ok(series) => (SeriesPayload::from(series), None),
            Err(e) => (SeriesPayload::default(), Some(e.to_string())),
        };
        Self {
            raw: (&dash.raw).into(),
            temp_filt: (&dash.temp_filt).into(),
            temp_zb: (&dash.temp_zb).into(),
            forecast,
            forecast_unavailable,
            diagnostics: Diagnostics {
                fusion: dash.fusion.to_string(),
                glitches: dash.glitches,
                window_start: dash.window_start.format(PAYLOAD_TIME_FORMAT).to_string(),
                now: dash.now.format(PAYLOAD_TIME_FORMAT).to_string(),
            },
        }
    }
}

pub fn render_json(dash: &Dashboard) -> serde_json::Result<String> {
    serde_json::to_string(&DashboardPayload::from(dash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForecastError;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_opt(10, 0, 0))
            .expect("time")
    }

    fn dashboard(forecast: Result<TimeSeries, ForecastError>) -> Dashboard {
        let series = TimeSeries::new(t0(), Duration::minutes(2), vec![24.5, f64::NAN, 25.0]);
        Dashboard {
            now: t0() + Duration::hours(1),
            window_start: t0() - Duration::days(7),
            temp_in: series.clone(),
            temp_out: series.clone(),
            raw: series.clone(),
            temp_filt: series.clone(),
            temp_zb: TimeSeries::empty(Duration::minutes(2)),
            hum_zb: TimeSeries::empty(Duration::minutes(2)),
            forecast,
            glitches: GlitchReport::default(),
            fusion: "mean",
        }
    }

    #[test]
    fn missing_values_serialize_as_null() {
        let payload = SeriesPayload::from(&TimeSeries::new(
            t0(),
            Duration::minutes(2),
            vec![24.5, f64::NAN, 25.0],
        ));
        assert_eq!(
            payload.x,
            vec!["2024-05-01 10:00:00", "2024-05-01 10:02:00", "2024-05-01 10:04:00"]
        );
        let json = serde_json::to_value(&payload).expect("json");
        assert_eq!(json["y"], serde_json::json!([24.5, null, 25.0]));
    }

    #[test]
    fn failed_forecast_is_reported_not_fatal() {
        let json = render_json(&dashboard(Err(ForecastError::Degenerate))).expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert!(value["forecast_unavailable"]
            .as_str()
            .is_some_and(|s| s.contains("constant")));
        assert_eq!(value["forecast"]["x"], serde_json::json!([]));
        assert_eq!(value["raw"]["y"][1], serde_json::Value::Null);
        assert_eq!(value["diagnostics"]["fusion"], "mean");
    }

    #[test]
    fn available_forecast_omits_reason() {
        let forecast = TimeSeries::new(t0() + Duration::minutes(5), Duration::minutes(5), vec![25.1, 25.2]);
        let json = render_json(&dashboard(Ok(forecast))).expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert!(value.get("forecast_unavailable").is_none());
        assert_eq!(value["forecast"]["x"][0], "2024-05-01 10:05:00");
    }
}
