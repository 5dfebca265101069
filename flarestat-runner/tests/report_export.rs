//! Report persistence: JSON round trip, schema gate, realization CSV.

use flarestat_core::AnalysisConfig;
use flarestat_runner::{
    export_json, import_json, save_realizations_csv, save_report, Analysis, AnalysisKind,
    AnalysisRequest, Sources,
};

fn completed(kind: AnalysisKind) -> Analysis {
    let config = AnalysisConfig {
        realizations: 150,
        bootstrap_samples: 100,
        permutation_samples: 100,
        ..Default::default()
    };
    let mut analysis = Analysis::new(AnalysisRequest::new(kind, config));
    analysis.run(&Sources::synthetic()).unwrap();
    analysis
}

#[test]
fn saved_report_loads_back() {
    let analysis = completed(AnalysisKind::Background);
    let report = analysis.report().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    save_report(report, &path).unwrap();

    let loaded = import_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(loaded.request_id, report.request_id);
    assert_eq!(loaded.kind, report.kind);
    assert_eq!(loaded.source, report.source);
    assert_eq!(loaded.degraded_reason, report.degraded_reason);
    assert_eq!(loaded.config, report.config);
}

#[test]
fn json_tags_body_and_provenance() {
    let analysis = completed(AnalysisKind::Bayesian);
    let json = export_json(analysis.report().unwrap()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["kind"], "bayesian");
    assert_eq!(value["source"], "synthetic");
    assert_eq!(value["body"]["type"], "bayesian");
    assert!(value["degraded_reason"].is_string());
}

#[test]
fn newer_schema_is_rejected() {
    let analysis = completed(AnalysisKind::CrossValidation);
    let json = export_json(analysis.report().unwrap()).unwrap();
    let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
    value["schema_version"] = serde_json::json!(99);

    let err = import_json(&value.to_string()).unwrap_err();
    assert!(err.to_string().contains("unsupported schema version"));
}

#[test]
fn realizations_csv_has_one_row_per_realization() {
    let analysis = completed(AnalysisKind::Background);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("realizations.csv");
    save_realizations_csv(analysis.realizations(), &path).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 151);
    assert!(content.starts_with("id,background_level,detection_count"));
}
