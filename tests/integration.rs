use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn nd_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_nd"))
}

const ARTICLES: &str = r#"[
  {"id": "r1", "title": "RBI raises repo rate by 25 basis points",
   "body": "The Reserve Bank of India raised the repo rate by 25 basis points to 6.5 percent on Thursday, citing sticky inflation.",
   "published_at": "2024-02-08T09:00:00Z", "source": "Mint"},
  {"id": "r2", "title": "RBI hikes repo rate by 25 basis points",
   "body": "The Reserve Bank of India raised the repo rate by 25 basis points to 6.5 percent on Thursday, citing sticky inflation.",
   "published_at": "2024-02-08T09:30:00Z", "source": "Business Standard"},
  {"id": "hdfc", "title": "HDFC Bank reports 20 percent jump in quarterly profit",
   "body": "HDFC Bank said net profit rose on strong loan growth and lower provisions.",
   "published_at": "2024-02-09T09:00:00Z"},
  {"id": "banks", "title": "Banks face margin pressure as deposit costs climb",
   "content": "Lenders are paying more for deposits while loan yields stay flat, analysts said.",
   "published_at": "2024-02-10T09:00:00Z"}
]"#;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(root.join("articles.json"), ARTICLES).unwrap();
    fs::write(
        root.join("bad.json"),
        r#"[{"id": "x1", "title": "", "body": "  "}, {"id": "x2", "title": "Infosys wins deal"}]"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/nd.sqlite"

[retrieval]
final_limit = 5

[model]
provider = "hashed"
dims = 256
"#,
        root.display()
    );

    let config_path = config_dir.join("newsdesk.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_nd(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = nd_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run nd binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn articles_path(config_path: &Path) -> String {
    let root = config_path.parent().unwrap().parent().unwrap();
    root.join("articles.json").display().to_string()
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_nd(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_nd(&config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_folds_duplicates() {
    let (_tmp, config_path) = setup_test_env();
    run_nd(&config_path, &["init"]);

    let file = articles_path(&config_path);
    let (stdout, stderr, success) = run_nd(&config_path, &["ingest", &file]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("stories:             3"), "{}", stdout);
    assert!(stdout.contains("duplicates folded:   1"), "{}", stdout);
}

#[test]
fn test_reingest_rejects_every_article() {
    let (_tmp, config_path) = setup_test_env();
    run_nd(&config_path, &["init"]);

    let file = articles_path(&config_path);
    let (_, _, first) = run_nd(&config_path, &["ingest", &file]);
    assert!(first);
    let (stdout, stderr, second) = run_nd(&config_path, &["ingest", &file]);
    assert!(second, "re-ingest failed: {}", stderr);
    assert!(stdout.contains("stories:             0"), "{}", stdout);
    assert!(stdout.contains("rejected:            4"), "{}", stdout);
    assert!(stderr.contains("already ingested into 'story-r1'"), "{}", stderr);

    let (stdout, _, _) = run_nd(&config_path, &["stats", "--json"]);
    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["articles"], 4);
    assert_eq!(stats["stories"], 3);
}

#[test]
fn test_ingest_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();
    run_nd(&config_path, &["init"]);

    let root = config_path.parent().unwrap().parent().unwrap();
    let bad = root.join("bad.json").display().to_string();
    let (stdout, _, success) = run_nd(&config_path, &["ingest", &bad, "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("valid:     1"), "{}", stdout);
    assert!(stdout.contains("rejected:  1"), "{}", stdout);

    let (stdout, _, _) = run_nd(&config_path, &["stats", "--json"]);
    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["articles"], 0);
}

#[test]
fn test_company_query_expands_to_sector() {
    let (_tmp, config_path) = setup_test_env();
    run_nd(&config_path, &["init"]);
    run_nd(&config_path, &["ingest", &articles_path(&config_path)]);

    let (stdout, stderr, success) = run_nd(&config_path, &["query", "HDFC Bank news", "--json"]);
    assert!(success, "query failed: {}", stderr);
    let response: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(response["intent"]["kind"], "company");
    let ids: Vec<&str> = response["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["story"]["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["story-hdfc", "story-banks"]);
}

#[test]
fn test_regulator_query_is_precise() {
    let (_tmp, config_path) = setup_test_env();
    run_nd(&config_path, &["init"]);
    run_nd(&config_path, &["ingest", &articles_path(&config_path)]);

    let (stdout, _, success) = run_nd(&config_path, &["query", "RBI policy changes"]);
    assert!(success);
    assert!(stdout.contains("intent: regulator"), "{}", stdout);
    assert!(stdout.contains("id: story-r1"));
    assert!(!stdout.contains("story-hdfc"));
    assert!(!stdout.contains("story-banks"));
}

#[test]
fn test_get_story_and_missing_story() {
    let (_tmp, config_path) = setup_test_env();
    run_nd(&config_path, &["init"]);
    run_nd(&config_path, &["ingest", &articles_path(&config_path)]);

    let (stdout, _, success) = run_nd(&config_path, &["get", "story-r1"]);
    assert!(success);
    assert!(stdout.contains("members:      r1, r2"), "{}", stdout);
    assert!(stdout.contains("sources:      Mint, Business Standard"));

    let (_, stderr, success) = run_nd(&config_path, &["get", "story-nope"]);
    assert!(!success);
    assert!(stderr.contains("story not found"));
}

#[test]
fn test_stats_breakdown() {
    let (_tmp, config_path) = setup_test_env();
    run_nd(&config_path, &["init"]);
    run_nd(&config_path, &["ingest", &articles_path(&config_path)]);

    let (stdout, _, success) = run_nd(&config_path, &["stats", "--json"]);
    assert!(success);
    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["articles"], 4);
    assert_eq!(stats["stories"], 3);
    assert_eq!(stats["impacts_by_kind"]["direct"], 1);
    assert!(stats["impacts_by_kind"]["regulatory"].as_u64().unwrap() > 0);

    let buckets = &stats["impacts_by_confidence"];
    let total: u64 = ["high", "medium", "low"]
        .iter()
        .map(|b| buckets[*b].as_u64().unwrap())
        .sum();
    assert_eq!(total, stats["impacts"].as_u64().unwrap());
    assert!(buckets["medium"].as_u64().unwrap() > 0);

    let (stdout, _, success) = run_nd(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("By confidence:"), "{}", stdout);
}

#[test]
fn test_stock_news_by_name_or_ticker() {
    let (_tmp, config_path) = setup_test_env();
    run_nd(&config_path, &["init"]);
    run_nd(&config_path, &["ingest", &articles_path(&config_path)]);

    let (stdout, stderr, success) = run_nd(&config_path, &["stock", "hdfcbank", "--json"]);
    assert!(success, "stock failed: {}", stderr);
    let news: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(news["symbol"], "HDFCBANK");
    assert_eq!(news["company"], "HDFC Bank");
    let ids: Vec<&str> = news["stories"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["story"]["id"].as_str().unwrap())
        .collect();
    // RBI touches every bank; the sector story and the HDFC story follow.
    assert_eq!(ids, ["story-banks", "story-hdfc", "story-r1"]);

    let (stdout, _, success) = run_nd(&config_path, &["stock", "HDFC Bank"]);
    assert!(success);
    assert!(stdout.contains("HDFCBANK (HDFC Bank): 3 stories"), "{}", stdout);
    assert!(stdout.contains("impact: direct 1.00 via HDFC Bank"), "{}", stdout);

    let (_, stderr, success) = run_nd(&config_path, &["stock", "Acme Widgets"]);
    assert!(!success);
    assert!(stderr.contains("unknown symbol or company"), "{}", stderr);
}

#[test]
fn test_entities_grouped_by_category() {
    let (_tmp, config_path) = setup_test_env();
    run_nd(&config_path, &["init"]);
    run_nd(&config_path, &["ingest", &articles_path(&config_path)]);

    let (stdout, stderr, success) = run_nd(&config_path, &["entities", "--json"]);
    assert!(success, "entities failed: {}", stderr);
    let groups: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let regulators = groups["regulator"].as_array().unwrap();
    assert_eq!(regulators.len(), 1);
    assert_eq!(regulators[0]["name"], "RBI");
    assert_eq!(regulators[0]["stories"], 1);
    assert!(groups["company"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e["name"] == "HDFC Bank"));
    assert!(groups["sector"].as_array().unwrap().iter().any(|e| e["name"] == "Banking"));

    let (stdout, _, success) = run_nd(&config_path, &["entities"]);
    assert!(success);
    assert!(stdout.contains("--- regulator (1) ---"), "{}", stdout);
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config_path) = setup_test_env();
    fs::write(&config_path, "[db]\npath = \"x\"\n[dedup]\nsimilarity_threshold = 0.0\n").unwrap();
    let (_, stderr, success) = run_nd(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("similarity_threshold"));
}
