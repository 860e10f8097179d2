use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use std::{error::Error, fs, path::PathBuf};
use tempfile::tempdir;

fn workspace_root() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .expect("crates dir")
        .parent()
        .expect("workspace root")
        .to_path_buf()
}

fn sample_path(relative: &str) -> String {
    workspace_root()
        .join(relative)
        .to_string_lossy()
        .to_string()
}

fn longest_run(values: &[f64]) -> usize {
    let mut best = 0;
    let mut run = 0;
    for (i, v) in values.iter().enumerate() {
        run = if i > 0 && values[i - 1] == *v { run + 1 } else { 1 };
        best = best.max(run);
    }
    best
}

fn simulate_glitchy_store(dir: &std::path::Path) {
    cargo_bin_cmd!("tempcheck")
        .args([
            "simulate",
            "--out",
            dir.to_str().expect("utf8 path"),
            "--start",
            "2024-06-01T00:00:00",
            "--hours",
            "48",
            "--glitch-hour",
            "10",
        ])
        .assert()
        .success();
}

#[test]
fn short_store_reports_missing_forecast() -> Result<(), Box<dyn Error>> {
    let output = cargo_bin_cmd!("tempcheck")
        .args([
            "dashboard",
            "--store",
            &sample_path("test_data/store"),
            "--backend",
            "csv",
            "--now",
            "2024-05-01T12:00:00",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let payload: Value = serde_json::from_slice(&output)?;

    let raw_x = payload["raw"]["x"].as_array().expect("raw x");
    assert_eq!(raw_x.len(), 6);
    assert_eq!(raw_x[0], "2024-05-01 10:00:00");
    assert_eq!(payload["temp_zb"]["y"].as_array().map(Vec::len), Some(5));
    let filtered = payload["temp_filt"]["y"].as_array().expect("temp_filt y");
    assert!(filtered.iter().all(Value::is_null));
    assert!(payload["forecast_unavailable"].is_string());
    assert_eq!(payload["forecast"]["x"], serde_json::json!([]));
    Ok(())
}

#[test]
fn simulated_glitch_is_corrected_end_to_end() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    simulate_glitchy_store(temp.path());
    assert!(temp.path().join("temper.db").exists());
    assert!(temp.path().join("zigbee.db").exists());

    let output = cargo_bin_cmd!("tempcheck")
        .args([
            "dashboard",
            "--store",
            temp.path().to_str().expect("utf8 path"),
            "--now",
            "2024-06-03T00:00:00",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let payload: Value = serde_json::from_slice(&output)?;

    assert_eq!(payload["diagnostics"]["fusion"], "mean");
    assert_eq!(payload["diagnostics"]["glitches"]["flagged_b"], 6);
    assert!(payload.get("forecast_unavailable").is_none());
    let forecast_x = payload["forecast"]["x"].as_array().expect("forecast x");
    assert_eq!(forecast_x.len(), 60);
    assert_eq!(forecast_x[0], "2024-06-03 00:00:00");
    let filtered = payload["temp_filt"]["y"].as_array().expect("temp_filt y");
    assert_eq!(filtered.len(), 48 * 30);
    assert!(filtered.iter().all(Value::is_f64));

    // the stuck temp_out run starts at 10:00, the 300th bucket
    let raw = payload["raw"]["y"].as_array().expect("raw y");
    assert_eq!(payload["raw"]["x"][300], "2024-06-01 10:00:00");
    for series in [raw, filtered] {
        let window: Vec<f64> = series[290..320].iter().filter_map(Value::as_f64).collect();
        assert_eq!(window.len(), 30);
        assert!(longest_run(&window) < 6);
    }
    for i in 300..306 {
        let (r, f) = (raw[i].as_f64().expect("raw"), filtered[i].as_f64().expect("filtered"));
        assert!((r - f).abs() < 0.3, "filtered strays from raw at {}", i);
    }
    Ok(())
}

#[test]
fn sqlite_and_csv_fixtures_agree() -> Result<(), Box<dyn Error>> {
    let dashboard = |store: &str, backend: &str| -> Result<Value, Box<dyn Error>> {
        let output = cargo_bin_cmd!("tempcheck")
            .args([
                "dashboard",
                "--store",
                &sample_path(store),
                "--backend",
                backend,
                "--now",
                "2024-05-01T12:00:00",
            ])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        Ok(serde_json::from_slice(&output)?)
    };
    let sqlite = dashboard("test_data/sqlite", "sqlite")?;
    let csv = dashboard("test_data/store", "csv")?;
    assert_eq!(sqlite["raw"], csv["raw"]);
    assert_eq!(sqlite["temp_zb"], csv["temp_zb"]);

    let shared = dashboard("test_data/sqlite/home_temperature.db", "sqlite")?;
    assert_eq!(shared["raw"]["x"].as_array().map(Vec::len), Some(3));
    assert_eq!(shared["temp_zb"]["x"].as_array().map(Vec::len), Some(3));
    Ok(())
}

#[test]
fn config_file_and_flags_select_fusion() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    simulate_glitchy_store(temp.path());
    let store = temp.path().to_str().expect("utf8 path").to_string();

    let output = cargo_bin_cmd!("tempcheck")
        .args([
            "dashboard",
            "--store",
            &store,
            "--now",
            "2024-06-03T00:00:00",
            "--config",
            &sample_path("test_data/calibrated.toml"),
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let payload: Value = serde_json::from_slice(&output)?;
    assert_eq!(payload["diagnostics"]["fusion"], "calibrated");
    assert_eq!(payload["forecast"]["x"].as_array().map(Vec::len), Some(12));

    let output = cargo_bin_cmd!("tempcheck")
        .args([
            "dashboard",
            "--store",
            &store,
            "--now",
            "2024-06-03T00:00:00",
            "--config",
            &sample_path("test_data/calibrated.toml"),
            "--fusion",
            "mean",
            "--no-forecast",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let payload: Value = serde_json::from_slice(&output)?;
    assert_eq!(payload["diagnostics"]["fusion"], "mean");
    assert_eq!(payload["forecast_unavailable"], "forecasting is disabled");
    Ok(())
}

#[test]
fn plot_writes_figure_model() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    simulate_glitchy_store(temp.path());
    let out = temp.path().join("chart.json");

    cargo_bin_cmd!("tempcheck")
        .args([
            "plot",
            "--store",
            temp.path().to_str().expect("utf8 path"),
            "--now",
            "2024-06-03T00:00:00",
            "--out",
            out.to_str().expect("utf8 path"),
            "--format",
            "json",
        ])
        .assert()
        .success();

    let figure: Value = serde_json::from_str(&fs::read_to_string(&out)?)?;
    assert_eq!(figure["series"].as_array().map(Vec::len), Some(4));
    assert_eq!(figure["y"]["range"], serde_json::json!([21.0, 33.0]));
    assert_eq!(figure["x"]["range"][0], -168.0);

    let sensors = temp.path().join("sensors.json");
    cargo_bin_cmd!("tempcheck")
        .args([
            "plot",
            "--store",
            temp.path().to_str().expect("utf8 path"),
            "--now",
            "2024-06-03T00:00:00",
            "--out",
            sensors.to_str().expect("utf8 path"),
            "--format",
            "json",
            "--sensors",
        ])
        .assert()
        .success();
    let figure: Value = serde_json::from_str(&fs::read_to_string(&sensors)?)?;
    let names: Vec<&str> = figure["series"]
        .as_array()
        .expect("series")
        .iter()
        .filter_map(|s| s["Line"]["name"].as_str())
        .collect();
    assert_eq!(names, ["temp_in", "temp_out", "temp_zb"]);
    Ok(())
}

#[test]
fn unreadable_now_fails() {
    cargo_bin_cmd!("tempcheck")
        .args([
            "dashboard",
            "--store",
            &sample_path("test_data/store"),
            "--now",
            "yesterday",
        ])
        .assert()
        .failure();
}
