use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_export(root: &Path) {
    fs::create_dir_all(root.join("general")).expect("mkdir general");
    fs::create_dir_all(root.join("random")).expect("mkdir random");
    fs::write(
        root.join("channels.json"),
        r#"[{"name": "general"}, {"name": "random"}]"#,
    )
    .expect("write channels");
    fs::write(
        root.join("users.json"),
        r#"[{"id": "U1", "name": "ada", "profile": {"display_name": "Ada L"}},
            {"id": "U2", "name": "grace"}]"#,
    )
    .expect("write users");
    fs::write(
        root.join("general/2024-01-01.json"),
        r#"[
            {"ts": "1704100000.000100", "user": "U1", "text": "plan for <@U2>", "thread_ts": "1704100000.000100",
             "files": [{"id": "F1", "name": "a.png", "url_private": "https://files.slack.com/a.png"}]},
            {"ts": "1704100060.000200", "user": "U2", "text": "sounds good", "thread_ts": "1704100000.000100"},
            {"ts": "1704100120.000300", "user": "U2", "text": "gone",
             "files": [{"id": "F2", "name": "old.pdf", "mode": "tombstone"}]}
        ]"#,
    )
    .expect("write day");
    fs::write(
        root.join("general/2024-01-02.json"),
        r#"[{"ts": "1704190000.000100", "user": "U1", "text": "elsewhere",
             "files": [{"id": "F3", "name": "x.png", "url_private": "https://example.com/x.png"}]}]"#,
    )
    .expect("write day");
    fs::write(root.join("general/notes.json"), "{}").expect("write stray");
}

fn pre_cache(output: &Path) {
    let files = output.join("general/files");
    fs::create_dir_all(&files).expect("mkdir files");
    fs::write(files.join("F1-a.png"), b"png").expect("write cached file");
}

fn viewer(home: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("slack-export-viewer");
    cmd.current_dir(home)
        .env("SEV_HOME", home)
        .env("SEV_CONFIG_PATH", home.join("missing-config.toml"))
        .env_remove("RUST_LOG")
        .env_remove("SEV_TRUSTED_HOSTS")
        .env_remove("SEV_FETCH_WORKERS")
        .env_remove("SEV_CHANNEL_WORKERS");
    cmd
}

#[test]
fn convert_writes_pages_reports_and_ledger() {
    let tmp = tempdir().expect("tempdir");
    let export = tmp.path().join("export");
    let output = tmp.path().join("out");
    write_export(&export);
    pre_cache(&output);

    viewer(tmp.path())
        .arg("convert")
        .arg(&export)
        .arg("--output")
        .arg(&output)
        .args(["--channels", "general"])
        .assert()
        .success()
        .stdout(predicate::str::contains("convert: ok"))
        .stdout(predicate::str::contains(
            "channel general: 4 messages, 1 threads, 2 files available, 1 missing, 1 fetched",
        ))
        .stderr(predicate::str::contains("SEV_WARN code=SKIPPED_FILE"));

    let index = fs::read_to_string(output.join("index.html")).expect("index");
    assert!(index.contains("<h1>Unknown Workspace</h1>"));
    assert!(index.contains("January 2024"));
    assert!(index.contains(r#"href="general/index.html""#));
    assert!(!index.contains(r#"data-name="random""#));

    let page = fs::read_to_string(output.join("general/index.html")).expect("channel page");
    assert!(page.contains("files/F1-a.png"));
    assert!(page.contains("https://example.com/x.png"));
    assert!(page.contains("File tombstone"));
    assert!(page.contains("Show thread (1 replies)"));
    assert!(page.contains("@grace"));

    let text = fs::read_to_string(output.join("general/index.txt")).expect("transcript");
    assert!(text.starts_with("Channel: #general"));
    assert!(text.contains("Thread replies:"));
    assert!(text.contains("[File: a.png -> files/F1-a.png]"));

    let downloaded = fs::read_to_string(output.join("general/files_downloaded.csv")).expect("downloaded");
    assert!(downloaded.starts_with("timestamp,file_id,mode\n"));
    assert!(downloaded.contains(",F1,exists"));
    assert!(downloaded.contains(",F3,downloaded"));

    let missing = fs::read_to_string(output.join("general/files_missing.csv")).expect("missing");
    assert!(missing.contains(",F2,tombstone"));

    let ledger = fs::read_to_string(output.join("ledger.jsonl")).expect("ledger");
    assert_eq!(ledger.lines().count(), 1);
    assert!(ledger.contains(r#""channel":"general""#));
}

#[test]
fn convert_reports_failed_channel_and_exits_nonzero() {
    let tmp = tempdir().expect("tempdir");
    let export = tmp.path().join("export");
    let output = tmp.path().join("out");
    write_export(&export);
    fs::remove_dir_all(export.join("random")).expect("remove random");
    pre_cache(&output);

    viewer(tmp.path())
        .arg("convert")
        .arg(&export)
        .arg("-o")
        .arg(&output)
        .assert()
        .failure()
        .stdout(predicate::str::contains("convert: failed"))
        .stdout(predicate::str::contains("E001_CHANNEL_DIR_MISSING"))
        .stderr(predicate::str::contains("error: convert finished with 1 issue(s)"));

    assert!(output.join("general/index.html").exists());
    assert!(output.join("index.html").exists());
}

#[test]
fn convert_rejects_unknown_channel() {
    let tmp = tempdir().expect("tempdir");
    let export = tmp.path().join("export");
    write_export(&export);

    viewer(tmp.path())
        .arg("convert")
        .arg(&export)
        .arg("-o")
        .arg(tmp.path().join("out"))
        .args(["--channels", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("channel not found in export: nope"));
}

#[test]
fn convert_emits_json_report() {
    let tmp = tempdir().expect("tempdir");
    let export = tmp.path().join("export");
    let output = tmp.path().join("out");
    write_export(&export);
    pre_cache(&output);

    let assert = viewer(tmp.path())
        .arg("convert")
        .arg(&export)
        .arg("-o")
        .arg(&output)
        .args(["--channels", "general", "--json"])
        .assert()
        .success();
    let report: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json report");
    assert_eq!(report["command"], "convert");
    assert_eq!(report["ok"], true);
    assert!(report["issues"].as_array().expect("issues").is_empty());
}
