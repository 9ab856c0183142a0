use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use repair_intake::config::load_config;
use repair_intake::models::NewRepair;
use repair_intake::store::sqlite::SqliteStore;
use repair_intake::store::RepairStore;
use repair_intake::{db, migrate};

fn repair_intake_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_repair-intake"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/repairs.sqlite"

[server]
bind = "127.0.0.1:0"

[reconcile]
list_gate = "skip_intake_lists"
"#,
        root.display()
    );

    let config_path = config_dir.join("repair-intake.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = repair_intake_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("TRELLO_WEBHOOK_SECRET")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data").join("repairs.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_init_without_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (_, stderr, success) = run(&missing, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr: {}", stderr);
}

#[test]
fn test_parse_card_needs_no_config() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (stdout, stderr, success) = run(
        &missing,
        &["parse", "card", "Repair #61 :\u{200B} David   Knoernschild"],
    );
    assert!(success, "parse failed: {}", stderr);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["repair_number"], "61");
    assert_eq!(json["details"]["customer_first_name"], "David");
    assert_eq!(json["details"]["customer_last_name"], "Knoernschild");

    let (stdout, _, success) = run(&missing, &["parse", "card", "Repair #\u{200B}61"]);
    assert!(success);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["normalized"], "Repair #61");
    assert_eq!(json["repair_number"], "61");

    let (stdout, _, success) = run(&missing, &["parse", "card", "Repair #123"]);
    assert!(success);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["repair_number"], "123");
    assert!(json["details"].is_null());
}

#[test]
fn test_parse_email_strips_history() {
    let (tmp, config_path) = setup_test_env();
    let eml = tmp.path().join("reply.eml");
    fs::write(
        &eml,
        "From: Ann Lee <ann@example.com>\r\n\
         Subject: Re: Repair #7\r\n\
         Content-Type: text/plain\r\n\
         \r\n\
         Go ahead.\r\n\
         \r\n\
         -----Original Message-----\r\n\
         From: repairs@shop.example.com\r\n",
    )
    .unwrap();

    let (stdout, stderr, success) = run(&config_path, &["parse", "email", eml.to_str().unwrap()]);
    assert!(success, "parse email failed: {}", stderr);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["from"], "ann@example.com");
    assert_eq!(json["message"], "Go ahead.");
}

#[test]
fn test_repair_not_found() {
    let (_tmp, config_path) = setup_test_env();
    run(&config_path, &["init"]);

    let (_, stderr, success) = run(&config_path, &["repair", "missing-id"]);
    assert!(!success);
    assert!(stderr.contains("repair not found"), "stderr: {}", stderr);
}

#[tokio::test]
async fn test_repair_prints_stored_record() {
    let (_tmp, config_path) = setup_test_env();
    let config = load_config(&config_path).unwrap();

    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    let store = SqliteStore::new(pool);
    let id = store
        .create_repair(NewRepair {
            repair_number: "61".to_string(),
            customer_id: None,
            customer_first_name: "David".to_string(),
            customer_last_name: "Knoernschild".to_string(),
            email: String::new(),
            phone: String::new(),
            vendor: Some("Smea".to_string()),
            brand: "Gucci".to_string(),
            model: String::new(),
            material: String::new(),
            reference_number: String::new(),
            description: String::new(),
            repair_notes: String::new(),
            card_id: None,
        })
        .await
        .unwrap()
        .record()
        .id
        .clone();
    store.pool().close().await;

    let (stdout, stderr, success) = run(&config_path, &["repair", &id]);
    assert!(success, "repair failed: {}", stderr);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["id"], id.as_str());
    assert_eq!(json["vendor"], "Smea");
    assert!(json["messages"].as_array().unwrap().is_empty());
    assert!(json["attachments"].as_array().unwrap().is_empty());
}
