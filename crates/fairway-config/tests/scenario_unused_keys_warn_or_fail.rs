use fairway_config::{load_layered_yaml_from_strings, report_unused_keys, ConfigMode, UnusedKeyPolicy};

/// A leftover key from an old deployment is reported under Warn and is an
/// error under Fail. A dry run also reports the store and batch settings it
/// never reads.

const YAML: &str = r#"
store:
  collection: "courses"
fetch:
  timeout_secs: 30
reconcile:
  home_country: "US"
  write_batch_size: 100
legacy:
  firestore_project: "old-project"
"#;

#[test]
fn warn_mode_reports_unused_keys_without_error() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).expect("config load must succeed");

    let report = report_unused_keys(ConfigMode::Sync, &loaded.config_json, UnusedKeyPolicy::Warn)
        .expect("warn mode must not error");

    assert_eq!(report.unused_leaf_pointers, vec!["/legacy/firestore_project".to_string()]);
}

#[test]
fn fail_mode_errors_on_unused_keys() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let err = report_unused_keys(ConfigMode::Sync, &loaded.config_json, UnusedKeyPolicy::Fail)
        .unwrap_err();
    assert!(err.to_string().contains("CONFIG_UNUSED_KEYS"));
}

#[test]
fn dry_run_flags_store_and_batch_settings() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let report =
        report_unused_keys(ConfigMode::DryRun, &loaded.config_json, UnusedKeyPolicy::Warn).unwrap();

    // sorted, deterministic
    assert_eq!(
        report.unused_leaf_pointers,
        vec![
            "/legacy/firestore_project".to_string(),
            "/reconcile/write_batch_size".to_string(),
            "/store/collection".to_string(),
        ]
    );
    assert!(!report
        .unused_leaf_pointers
        .contains(&"/reconcile/home_country".to_string()));
}

#[test]
fn clean_config_passes_fail_mode() {
    let yaml = r#"
fetch:
  timeout_secs: 30
run:
  concurrency: 2
"#;
    let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();
    let report =
        report_unused_keys(ConfigMode::Sync, &loaded.config_json, UnusedKeyPolicy::Fail).unwrap();
    assert!(report.is_clean());
}
