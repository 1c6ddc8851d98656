use ampwise::config::Config;
use std::fs;

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg = Config::default();
    cfg.entities.charger_switch = Some("switch.wallbox".to_string());
    cfg.entities.ev_min_soc.friday = Some("input_number.ev_min_soc_friday".to_string());
    cfg.simulation
        .states
        .insert("sensor.solar_power".to_string(), "1800".to_string());
    cfg.logging.file = path.with_extension("log").to_string_lossy().to_string();

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.entities.charger_switch.as_deref(), Some("switch.wallbox"));
    assert_eq!(
        loaded.entities.ev_min_soc.friday.as_deref(),
        Some("input_number.ev_min_soc_friday")
    );
    assert_eq!(
        loaded.simulation.states.get("sensor.solar_power").map(String::as_str),
        Some("1800")
    );
    assert_eq!(loaded.logging.file, cfg.logging.file);
    assert!(loaded.validate().is_ok());
}

#[test]
fn config_validation_errors() {
    let mut cfg = Config::default();

    // Levels must be ascending
    cfg.charger.amperage_levels = vec![6, 16, 10];
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.charger.amperage_levels.clear();
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.charger.nominal_voltage = 0.0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.charger.decrease_off_delay_seconds = -1.0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.charger.service_timeout_seconds = 0.0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.solar_surplus.battery_fallback_amperage = 7;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.solar_surplus.interval_seconds = 0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.location.latitude = 91.0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.location.sunset_override = Some("21:15".to_string());
    assert!(cfg.validate().is_ok());
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), b"charger: [unclosed").unwrap();
    let err = Config::from_file(tmp.path()).unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("Serialization error"));
}

#[test]
fn missing_file_is_io_error() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let err = Config::from_file(tmp_dir.path().join("absent.yaml")).unwrap_err();
    assert!(format!("{err}").contains("I/O error"));
}
