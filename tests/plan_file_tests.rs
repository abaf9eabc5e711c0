//! Plan files: save/load, validation and expansion.

use obsseq::calibration::{
    CalibrationTableRow, PROP_BASECAL, PROP_COADDS, PROP_DIFFUSER, PROP_EXPOSURE_TIME,
    PROP_FILTER, PROP_LAMPS, PROP_OBSERVE, PROP_SHUTTER,
};
use obsseq::execution::DATA_LABEL;
use obsseq::metadata::Smartgcal;
use obsseq::plan_file::{NodeSpec, PlanOptions, StaticSpec};
use obsseq::postprocess::ReadModeInjector;
use obsseq::source::{CalibrationSource, ParameterTable, RepeatSource};
use obsseq::types::{CalibrationCategory, ObserveType};
use obsseq::{
    CalibrationKey, Config, PlanFile, ProgramInfo, SequenceDriver, StepSource, SysConfig, Value,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

fn sample_plan() -> PlanFile {
    let mut instrument = Config::new();
    instrument.put_system(
        SysConfig::new("instrument")
            .with("disperser", "R400")
            .with("exposureTime", 60.0),
    );

    PlanFile {
        observation_id: Some("GS-2024A-Q-3-4".into()),
        program: ProgramInfo {
            program_id: Some("GS-2024A-Q-3".into()),
            proprietary_months: 12,
        },
        static_components: vec![StaticSpec {
            name: "instrument".into(),
            key: Some("instrument".into()),
            config: Some(instrument),
            read_mode: Some(ReadModeInjector::default()),
        }],
        sequence: vec![NodeSpec {
            key: Some("filters".into()),
            source: Some(StepSource::ParameterTable(
                ParameterTable::new("instrument").with_column("filter", ["J", "K"]),
            )),
            children: vec![
                NodeSpec {
                    key: Some("science".into()),
                    source: Some(StepSource::Repeat(RepeatSource::new(ObserveType::Object, 2))),
                    ..NodeSpec::default()
                },
                NodeSpec {
                    key: Some("note".into()),
                    annotation: true,
                    ..NodeSpec::default()
                },
                NodeSpec {
                    key: Some("flats".into()),
                    source: Some(StepSource::Calibration(CalibrationSource::new(
                        CalibrationCategory::Flat,
                    ))),
                    ..NodeSpec::default()
                },
            ],
            ..NodeSpec::default()
        }],
        options: PlanOptions::default(),
        calibration_key: vec!["disperser".into()],
        ..PlanFile::default()
    }
}

fn write_table(dir: &TempDir) -> std::path::PathBuf {
    let calibration: BTreeMap<String, String> = [
        (PROP_LAMPS, "QH"),
        (PROP_SHUTTER, "Closed"),
        (PROP_FILTER, "ND1.0"),
        (PROP_DIFFUSER, "IR"),
        (PROP_OBSERVE, "1"),
        (PROP_EXPOSURE_TIME, "2.5"),
        (PROP_COADDS, "1"),
        (PROP_BASECAL, "Night"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let rows = vec![CalibrationTableRow {
        key: CalibrationKey::new().with("disperser", "R400"),
        calibration,
    }];
    let path = dir.path().join("table.json");
    std::fs::write(&path, serde_json::to_string_pretty(&rows).expect("serialize"))
        .expect("write table");
    path
}

#[test]
fn test_plan_round_trip_preserves_expansion() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("plan.json");

    let plan = sample_plan();
    plan.save_to_file(&path).expect("save");
    let loaded = PlanFile::load_from_file(&path).expect("load");
    assert_eq!(loaded, plan);
    loaded.validate().expect("valid");

    let driver = SequenceDriver::new();
    let before = driver
        .expand(
            &Arc::new(plan.to_observation()),
            &plan.sequence_options(None).expect("options"),
        )
        .expect("pass");
    let after = driver
        .expand(
            &Arc::new(loaded.to_observation()),
            &loaded.sequence_options(None).expect("options"),
        )
        .expect("pass");
    assert_eq!(before, after);
}

#[test]
fn test_plan_expansion_with_relative_calibration_table() {
    let dir = TempDir::new().expect("temp dir");
    write_table(&dir);
    let mut plan = sample_plan();
    plan.calibration_table = Some("table.json".into());
    let path = dir.path().join("plan.json");
    plan.save_to_file(&path).expect("save");

    let loaded = PlanFile::load_from_file(&path).expect("load");
    let options = loaded.sequence_options(None).expect("options");
    let sequence = SequenceDriver::new()
        .expand(&Arc::new(loaded.to_observation()), &options)
        .expect("pass");

    // 2 filters x (2 science + 1 flat)
    assert_eq!(sequence.len(), 6);
    assert!(sequence.iter().all(|s| !Smartgcal::mapping_error(s)));
    let flat = &sequence.steps()[2];
    assert_eq!(flat.parameter("calibration", "filter"), Some(&Value::from("ND1.0")));
    assert_eq!(flat.parameter("observe", "class"), Some(&Value::from("partnerCal")));
    assert_eq!(
        sequence.steps()[5].parameter("observe", DATA_LABEL),
        Some(&Value::from("GS-2024A-Q-3-4-006"))
    );
    // Read mode follows the static exposure time
    assert_eq!(
        sequence.steps()[0].parameter("instrument", "readMode"),
        Some(&Value::from("faint"))
    );
}

#[test]
fn test_missing_table_reports_path() {
    let mut plan = sample_plan();
    plan.calibration_table = Some("/nonexistent/table.json".into());
    let err = plan.sequence_options(None).expect_err("missing table");
    assert!(format!("{:#}", err).contains("table.json"));
}

#[test]
fn test_load_rejects_unknown_enum_values() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("plan.json");
    std::fs::write(
        &path,
        r#"{"sequence": [{"source": {"kind": "repeat", "observe_type": "SKY", "count": 1}}]}"#,
    )
    .expect("write");
    assert!(PlanFile::load_from_file(&path).is_err());
}

#[test]
fn test_calibration_node_with_children_invalid() {
    let mut plan = sample_plan();
    plan.sequence[0].children[2].children.push(NodeSpec::default());
    assert!(plan.validate().is_err());
}
