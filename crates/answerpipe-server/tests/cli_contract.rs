use assert_cmd::Command;
use predicates::prelude::*;

fn answerpipe() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("answerpipe"));
    // Keep these contracts hermetic: no `.env` autoload, no inherited provider config.
    cmd.env("ANSWERPIPE_DOTENV", "0")
        .env_remove("ANSWERPIPE_AGENT_RUNTIME_URL")
        .env_remove("ANSWERPIPE_OPENAI_COMPAT_BASE_URL")
        .env_remove("ANSWERPIPE_GEMINI_API_KEY")
        .env_remove("GEMINI_API_KEY")
        .env_remove("GOOGLE_API_KEY")
        .env_remove("ANSWERPIPE_WEBHOOK_SECRET");
    cmd
}

fn stdout_json(out: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&out.stdout).expect("stdout is json")
}

#[test]
fn version_contract() {
    let out = answerpipe().arg("version").output().unwrap();
    assert!(out.status.success());
    let v = stdout_json(&out);
    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["name"].as_str(), Some("answerpipe"));
    assert!(!v["version"].as_str().unwrap_or("").is_empty());

    answerpipe()
        .args(["version", "--output", "text"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("answerpipe "));
}

#[test]
fn classify_contract_for_scenarios() {
    let out = answerpipe()
        .args(["classify", "Tell me about XYZ University", "--year", "2026"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let v = stdout_json(&out);
    assert_eq!(v["entity"], "education");
    assert_eq!(v["force_verification"], false);
    assert_eq!(v["dispatch_message"], "Tell me about XYZ University");
    assert!(v["contract"]["sections"]
        .as_array()
        .unwrap()
        .contains(&serde_json::json!("Sources")));

    let out = answerpipe()
        .args(["classify", "Champions Trophy 2025 schedule", "--year", "2026"])
        .output()
        .unwrap();
    let v = stdout_json(&out);
    assert_eq!(v["entity"], "generic");
    assert_eq!(v["force_verification"], true);
    assert!(v["dispatch_message"]
        .as_str()
        .unwrap()
        .starts_with("IMPORTANT:"));
}

#[test]
fn classify_rejects_blank_queries() {
    answerpipe()
        .args(["classify", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No query provided"));
}

#[test]
fn doctor_reports_booleans_only() {
    let td = tempfile::tempdir().unwrap();
    let out = answerpipe()
        .args(["doctor", "--data-dir"])
        .arg(td.path())
        .env("ANSWERPIPE_AGENT_RUNTIME_URL", "http://127.0.0.1:9/secret-path")
        .output()
        .unwrap();
    assert!(out.status.success());
    let v = stdout_json(&out);
    assert_eq!(v["kind"], "doctor");
    assert_eq!(v["configured"]["agent"]["agent_runtime"], true);
    assert_eq!(v["configured"]["reformatter"]["gemini"], false);
    assert_eq!(v["ok"], false);

    let checks = v["checks"].as_array().unwrap();
    let data = checks
        .iter()
        .find(|c| c["name"] == "data_dir_writable")
        .unwrap();
    assert_eq!(data["ok"], true);
    assert!(!String::from_utf8_lossy(&out.stdout).contains("secret-path"));
}

#[test]
fn ask_without_providers_fails_cleanly() {
    answerpipe()
        .args(["ask", "how do tides work"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not configured"));
}
