// tests/error_handling.rs

use std::io::Write;
use tempfile::NamedTempFile;
use rungate::config::load_and_validate;
use rungate::errors::RungateError;

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn test_dependency_cycle_returns_structured_error() {
    let file = config_file(
        r#"
[job.A]
cmd = "echo A"
after = ["B"]

[job.B]
cmd = "echo B"
after = ["A"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(RungateError::DependencyCycle(msg)) => {
            assert!(msg.contains("cycle detected"));
            assert!(msg.contains("A") || msg.contains("B"));
        }
        Err(e) => panic!("Expected DependencyCycle error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_unknown_dependency_returns_config_error() {
    let file = config_file(
        r#"
[job.A]
cmd = "echo A"
after = ["NonExistent"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(RungateError::ConfigError(msg)) => {
            assert!(msg.contains("unknown dependency"));
            assert!(msg.contains("NonExistent"));
        }
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_invalid_toml_returns_toml_error() {
    let file = config_file("[job.A\ncmd = ");

    match load_and_validate(file.path()) {
        Err(RungateError::TomlError(_)) => {}
        Err(e) => panic!("Expected TomlError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_unknown_run_date_policy_is_rejected() {
    let file = config_file(
        r#"
[job.A]
cmd = "echo A"
run_date = "tomorrow"
"#,
    );

    assert!(matches!(
        load_and_validate(file.path()),
        Err(RungateError::TomlError(_))
    ));
}

#[test]
fn test_missing_file_returns_io_error() {
    let result = load_and_validate("/definitely/not/here/Rungate.toml");
    assert!(matches!(result, Err(RungateError::IoError(_))));
}

#[test]
fn test_full_job_section_loads() {
    let file = config_file(
        r#"
[config]
ledger_path = ":memory:"
warehouse_path = "warehouse.db"
connect_timeout_secs = 2

[notify]
cmd = "echo notify"
on_success = false
timeout_secs = 10

[job.ingest]
cmd = "ingest --date {run_date}"
run_date = "today"

[job.fraud_scoring]
name = "Fraud scoring"
cmd = "score --date {run_date}"
after = ["ingest"]
source = "transactions"
target = "scored"
params = { threshold = "0.9" }
processed_count = "SELECT COUNT(*) FROM scored WHERE run_date = :run_date"

[job.fraud_scoring.preconditions]
env = ["WAREHOUSE_TOKEN"]
reachable = ["localhost:5432"]

[job.fraud_scoring.source_count]
sql = "SELECT COUNT(*) FROM transactions WHERE run_date = :run_date"

[[job.fraud_scoring.rollup]]
table = "daily_risk"
key = ["run_date", "account_id"]
query = "SELECT run_date, account_id, COUNT(*) AS flagged FROM scored GROUP BY 1, 2"

[[job.fraud_scoring.alert]]
alert_type = "HIGH_RISK"
query = "SELECT account_id FROM scored WHERE risk > 0.9"
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.job.len(), 2);
    assert!(!cfg.notify.on_success);
    assert_eq!(cfg.notify.timeout_secs, 10);

    let job = cfg.job("fraud_scoring").unwrap();
    assert_eq!(job.display_name("fraud_scoring"), "Fraud scoring");
    assert_eq!(job.after, vec!["ingest".to_string()]);
    assert_eq!(job.params.get("threshold").map(String::as_str), Some("0.9"));
    assert_eq!(job.preconditions.reachable, vec!["localhost:5432".to_string()]);
    assert_eq!(job.rollup[0].key.len(), 2);
    assert_eq!(job.alert[0].alert_type, "HIGH_RISK");

    assert!(matches!(cfg.job("nope"), Err(RungateError::JobNotFound(_))));
}
