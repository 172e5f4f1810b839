use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn pbcat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("pbcat");
    path
}

struct TestEnv {
    _tmp: TempDir,
    config_path: PathBuf,
    store_dir: PathBuf,
    archive_dir: PathBuf,
    incoming_dir: PathBuf,
}

fn setup_test_env() -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let store_dir = root.join("pb_files");
    fs::create_dir_all(&store_dir).unwrap();
    let archive_dir = root.join("pb_files_archive");
    let incoming_dir = root.join("incoming");
    fs::create_dir_all(&incoming_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/pbcat.sqlite"

[store]
root = "{}/pb_files"
archive = "{}/pb_files_archive"
"#,
        root.display(),
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("pbcat.toml");
    fs::write(&config_path, config_content).unwrap();

    TestEnv {
        _tmp: tmp,
        config_path,
        store_dir,
        archive_dir,
        incoming_dir,
    }
}

fn run_pbcat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = pbcat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pbcat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// A well-formed PB file for the given identity and budget.
fn sample_pb(country: &str, unit: &str, instance: &str, budget: i64) -> String {
    format!(
        "META\nkey;value\ncountry;{}\nunit;{}\ninstance;{}\nbudget;{}\n\
         currency;EUR\nvote_type;approval\nmax_length;5\n\
         comment;#1: Seeded dataset. #2: Second remark\n\
         PROJECTS\nproject_id;cost;selected;category\n\
         p1;60000;1;Green\np2;40000;0;Roads\n\
         VOTES\nvoter_id;vote\nv1;p1\nv2;p1,p2\nv3;p2\n",
        country, unit, instance, budget
    )
}

fn write_pb(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_init_creates_database() {
    let env = setup_test_env();

    let (stdout, stderr, success) = run_pbcat(&env.config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let env = setup_test_env();

    let (_, _, success1) = run_pbcat(&env.config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_pbcat(&env.config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_fresh_file() {
    let env = setup_test_env();
    run_pbcat(&env.config_path, &["init"]);

    let src = write_pb(
        &env.incoming_dir,
        "Testland_Springfield_2024.pb",
        &sample_pb("Testland", "Springfield", "2024", 100000),
    );

    let (stdout, stderr, success) =
        run_pbcat(&env.config_path, &["ingest", src.to_str().unwrap()]);
    assert!(success, "ingest failed: {} {}", stdout, stderr);
    assert!(stdout.contains("ingested"), "got: {}", stdout);

    // The file moved into the canonical store.
    assert!(!src.exists());
    assert!(env.store_dir.join("Testland_Springfield_2024.pb").exists());

    let (list_out, _, _) = run_pbcat(&env.config_path, &["list"]);
    assert!(list_out.contains("Testland_Springfield_2024.pb"));
    assert!(list_out.contains("1 current dataset"));
}

#[test]
fn test_conflicting_ingest_requires_confirmation() {
    let env = setup_test_env();
    run_pbcat(&env.config_path, &["init"]);

    let first = write_pb(
        &env.incoming_dir,
        "Testland_Springfield_2024.pb",
        &sample_pb("Testland", "Springfield", "2024", 100000),
    );
    run_pbcat(&env.config_path, &["ingest", first.to_str().unwrap()]);

    // Same identity, updated content, no confirmation.
    let second = write_pb(
        &env.incoming_dir,
        "updated.pb",
        &sample_pb("Testland", "Springfield", "2024", 200000),
    );
    let (stdout, _, success) =
        run_pbcat(&env.config_path, &["ingest", second.to_str().unwrap()]);
    assert!(success, "conflict report should not be a failure");
    assert!(stdout.contains("confirmation required"), "got: {}", stdout);
    assert!(stdout.contains("--confirm"));

    // Nothing changed: the incoming file stayed put, the original is still
    // the current version.
    assert!(second.exists());
    let (list_out, _, _) = run_pbcat(&env.config_path, &["list"]);
    assert!(list_out.contains("Testland_Springfield_2024.pb"));
    assert!(list_out.contains("100 000 EUR"));
    assert!(list_out.contains("1 current dataset"));
}

#[test]
fn test_confirmed_supersession_archives_old_version() {
    let env = setup_test_env();
    run_pbcat(&env.config_path, &["init"]);

    let first = write_pb(
        &env.incoming_dir,
        "Testland_Springfield_2024.pb",
        &sample_pb("Testland", "Springfield", "2024", 100000),
    );
    run_pbcat(&env.config_path, &["ingest", first.to_str().unwrap()]);

    let second = write_pb(
        &env.incoming_dir,
        "Testland_Springfield_2024_v2.pb",
        &sample_pb("Testland", "Springfield", "2024", 200000),
    );
    let (stdout, stderr, success) = run_pbcat(
        &env.config_path,
        &["ingest", second.to_str().unwrap(), "--confirm"],
    );
    assert!(success, "confirmed ingest failed: {} {}", stdout, stderr);
    assert!(stdout.contains("supersedes"), "got: {}", stdout);

    // The old file moved into a stamped archive folder, preserving its name.
    let archived: Vec<_> = walk_files(&env.archive_dir);
    assert_eq!(archived.len(), 1);
    assert!(archived[0].ends_with("Testland_Springfield_2024.pb"));

    // Exactly one current row remains for the identity, the new one.
    let (list_out, _, _) = run_pbcat(&env.config_path, &["list"]);
    assert!(list_out.contains("Testland_Springfield_2024_v2.pb"));
    assert!(list_out.contains("200 000 EUR"));
    assert!(list_out.contains("1 current dataset"));
}

#[test]
fn test_ingest_rejects_structurally_invalid_file() {
    let env = setup_test_env();
    run_pbcat(&env.config_path, &["init"]);

    let bad = write_pb(
        &env.incoming_dir,
        "bad.pb",
        "PROJECTS\nid;cost\n1;100\n",
    );
    let (_, stderr, success) = run_pbcat(&env.config_path, &["ingest", bad.to_str().unwrap()]);
    assert!(!success, "structurally invalid file must fail");
    assert!(stderr.contains("project_id"), "got: {}", stderr);

    // Nothing was mutated: file untouched, no catalog entry.
    assert!(bad.exists());
    let (list_out, _, _) = run_pbcat(&env.config_path, &["list"]);
    assert!(list_out.contains("No current datasets"));
}

#[test]
fn test_duplicate_voter_id_rejected() {
    let env = setup_test_env();
    run_pbcat(&env.config_path, &["init"]);

    let bad = write_pb(
        &env.incoming_dir,
        "dup.pb",
        "VOTES\nvoter_id;vote\nv1;1\nv1;2\n",
    );
    let (_, stderr, success) = run_pbcat(&env.config_path, &["ingest", bad.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("voter id"), "got: {}", stderr);
}

#[test]
fn test_delete_soft_deletes_and_archives() {
    let env = setup_test_env();
    run_pbcat(&env.config_path, &["init"]);

    let src = write_pb(
        &env.incoming_dir,
        "Testland_Springfield_2024.pb",
        &sample_pb("Testland", "Springfield", "2024", 100000),
    );
    run_pbcat(&env.config_path, &["ingest", src.to_str().unwrap()]);

    let (stdout, _, success) = run_pbcat(
        &env.config_path,
        &["delete", "Testland_Springfield_2024"],
    );
    assert!(success);
    assert!(stdout.contains("deleted 1 record"), "got: {}", stdout);

    // File left the store for the archive; catalog is empty.
    assert!(!env.store_dir.join("Testland_Springfield_2024.pb").exists());
    let archived = walk_files(&env.archive_dir);
    assert_eq!(archived.len(), 1);
    let (list_out, _, _) = run_pbcat(&env.config_path, &["list"]);
    assert!(list_out.contains("No current datasets"));
}

#[test]
fn test_delete_unknown_identity_reports_zero() {
    let env = setup_test_env();
    run_pbcat(&env.config_path, &["init"]);

    let (stdout, _, success) = run_pbcat(&env.config_path, &["delete", "Nowhere_2020"]);
    assert!(success);
    assert!(stdout.contains("no current records"));
}

#[test]
fn test_replace_keeps_file_name() {
    let env = setup_test_env();
    run_pbcat(&env.config_path, &["init"]);

    let src = write_pb(
        &env.incoming_dir,
        "Testland_Springfield_2024.pb",
        &sample_pb("Testland", "Springfield", "2024", 100000),
    );
    run_pbcat(&env.config_path, &["ingest", src.to_str().unwrap()]);

    let new_content = write_pb(
        &env.incoming_dir,
        "whatever.pb",
        &sample_pb("Testland", "Springfield", "2024", 350000),
    );
    let (stdout, stderr, success) = run_pbcat(
        &env.config_path,
        &[
            "replace",
            "Testland_Springfield_2024.pb",
            new_content.to_str().unwrap(),
        ],
    );
    assert!(success, "replace failed: {} {}", stdout, stderr);
    assert!(stdout.contains("replaced"), "got: {}", stdout);

    // Same file name, new content; old version in a replaced_ archive.
    let (list_out, _, _) = run_pbcat(&env.config_path, &["list"]);
    assert!(list_out.contains("Testland_Springfield_2024.pb"));
    assert!(list_out.contains("350 000 EUR"));
    assert!(list_out.contains("1 current dataset"));

    let archived = walk_files(&env.archive_dir);
    assert_eq!(archived.len(), 1);
    assert!(archived[0]
        .parent()
        .unwrap()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("replaced_"));
}

#[test]
fn test_refresh_full_processes_store() {
    let env = setup_test_env();
    run_pbcat(&env.config_path, &["init"]);

    write_pb(
        &env.store_dir,
        "Testland_Springfield_2024.pb",
        &sample_pb("Testland", "Springfield", "2024", 100000),
    );
    write_pb(
        &env.store_dir,
        "Testland_Shelbyville_2024.pb",
        &sample_pb("Testland", "Shelbyville", "2024", 50000),
    );

    let (stdout, stderr, success) = run_pbcat(&env.config_path, &["refresh", "--full"]);
    assert!(success, "refresh failed: {} {}", stdout, stderr);
    assert!(stdout.contains("\"processed\": 2"), "got: {}", stdout);
    assert!(stdout.contains("\"failed\": 0"));

    let (list_out, _, _) = run_pbcat(&env.config_path, &["list"]);
    assert!(list_out.contains("2 current dataset"));
}

#[test]
fn test_refresh_incremental_skips_unchanged() {
    let env = setup_test_env();
    run_pbcat(&env.config_path, &["init"]);

    write_pb(
        &env.store_dir,
        "Testland_Springfield_2024.pb",
        &sample_pb("Testland", "Springfield", "2024", 100000),
    );
    run_pbcat(&env.config_path, &["refresh"]);

    // Unchanged second run skips everything.
    let (stdout, _, _) = run_pbcat(&env.config_path, &["refresh"]);
    assert!(stdout.contains("\"skipped\": 1"), "got: {}", stdout);
    assert!(stdout.contains("\"processed\": 0"));

    // Touching the file makes the next run pick it up again.
    std::thread::sleep(std::time::Duration::from_secs(1));
    write_pb(
        &env.store_dir,
        "Testland_Springfield_2024.pb",
        &sample_pb("Testland", "Springfield", "2024", 999999),
    );
    let (stdout, _, _) = run_pbcat(&env.config_path, &["refresh"]);
    assert!(stdout.contains("\"processed\": 1"), "got: {}", stdout);

    // Still exactly one current row for the identity, with the new budget.
    let (list_out, _, _) = run_pbcat(&env.config_path, &["list"]);
    assert!(list_out.contains("1 current dataset"));
    assert!(list_out.contains("999 999 EUR"));
}

#[test]
fn test_refresh_isolates_bad_files() {
    let env = setup_test_env();
    run_pbcat(&env.config_path, &["init"]);

    write_pb(
        &env.store_dir,
        "good.pb",
        &sample_pb("Testland", "Springfield", "2024", 100000),
    );
    write_pb(&env.store_dir, "broken.pb", "VOTES\nballot;vote\nx;1\n");

    let (stdout, _, success) = run_pbcat(&env.config_path, &["refresh", "--full"]);
    assert!(success, "a bad file must not fail the batch");
    assert!(stdout.contains("\"processed\": 1"), "got: {}", stdout);
    assert!(stdout.contains("\"failed\": 1"));
    assert!(stdout.contains("[ERR]"));
}

#[test]
fn test_refresh_deactivates_disappeared_files() {
    let env = setup_test_env();
    run_pbcat(&env.config_path, &["init"]);

    let path = write_pb(
        &env.store_dir,
        "Testland_Springfield_2024.pb",
        &sample_pb("Testland", "Springfield", "2024", 100000),
    );
    run_pbcat(&env.config_path, &["refresh"]);

    fs::remove_file(&path).unwrap();
    run_pbcat(&env.config_path, &["refresh", "--full"]);

    let (list_out, _, _) = run_pbcat(&env.config_path, &["list"]);
    assert!(list_out.contains("No current datasets"), "got: {}", list_out);
}

#[test]
fn test_check_valid_file() {
    let env = setup_test_env();

    let src = write_pb(
        &env.incoming_dir,
        "Testland_Springfield_2024.pb",
        &sample_pb("Testland", "Springfield", "2024", 100000),
    );
    let (stdout, _, success) = run_pbcat(&env.config_path, &["check", src.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("structurally correct"));
    assert!(stdout.contains("Testland_Springfield_2024"));
    assert!(stdout.contains("k≤5"));
}

#[test]
fn test_check_invalid_file() {
    let env = setup_test_env();

    let bad = write_pb(&env.incoming_dir, "bad.pb", "PROJECTS\nid;cost\n1;100\n");
    let (_, stderr, success) = run_pbcat(&env.config_path, &["check", bad.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("project_id"), "got: {}", stderr);
}

#[test]
fn test_stats_over_current_rows() {
    let env = setup_test_env();
    run_pbcat(&env.config_path, &["init"]);

    write_pb(
        &env.store_dir,
        "Testland_Springfield_2024.pb",
        &sample_pb("Testland", "Springfield", "2024", 100000),
    );
    write_pb(
        &env.store_dir,
        "Testland_Shelbyville_2023.pb",
        &sample_pb("Testland", "Shelbyville", "2023", 50000),
    );
    run_pbcat(&env.config_path, &["refresh", "--full"]);

    let (stdout, _, success) = run_pbcat(&env.config_path, &["stats"]);
    assert!(success);
    let line_value = |label: &str| {
        stdout
            .lines()
            .find(|l| l.contains(label))
            .unwrap_or_else(|| panic!("no {} line in: {}", label, stdout))
            .split_whitespace()
            .last()
            .unwrap()
            .to_string()
    };
    assert_eq!(line_value("Datasets:"), "2");
    assert_eq!(line_value("Countries:"), "1");
    assert!(stdout.contains("approval"));
}

#[test]
fn test_comments_aggregation() {
    let env = setup_test_env();
    run_pbcat(&env.config_path, &["init"]);

    write_pb(
        &env.store_dir,
        "Testland_Springfield_2024.pb",
        &sample_pb("Testland", "Springfield", "2024", 100000),
    );
    run_pbcat(&env.config_path, &["refresh", "--full"]);

    let (stdout, _, success) = run_pbcat(&env.config_path, &["comments"]);
    assert!(success);
    assert!(stdout.contains("Seeded dataset"), "got: {}", stdout);
    assert!(stdout.contains("Second remark"));
    assert!(stdout.contains("Testland_Springfield_2024.pb"));
}

#[test]
fn test_current_uniqueness_across_mixed_operations() {
    let env = setup_test_env();
    run_pbcat(&env.config_path, &["init"]);

    // Seed via refresh, supersede interactively, then refresh again: the
    // identity must still resolve to exactly one current row.
    write_pb(
        &env.store_dir,
        "Testland_Springfield_2024.pb",
        &sample_pb("Testland", "Springfield", "2024", 100000),
    );
    run_pbcat(&env.config_path, &["refresh", "--full"]);

    std::thread::sleep(std::time::Duration::from_secs(1));
    let update = write_pb(
        &env.incoming_dir,
        "Testland_Springfield_2024_v2.pb",
        &sample_pb("Testland", "Springfield", "2024", 150000),
    );
    let (stdout, stderr, success) = run_pbcat(
        &env.config_path,
        &["ingest", update.to_str().unwrap(), "--confirm"],
    );
    assert!(success, "ingest failed: {} {}", stdout, stderr);

    run_pbcat(&env.config_path, &["refresh", "--full"]);

    let (list_out, _, _) = run_pbcat(&env.config_path, &["list"]);
    assert!(list_out.contains("1 current dataset"), "got: {}", list_out);
    assert!(list_out.contains("Testland_Springfield_2024_v2.pb"));
}

fn walk_files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if !dir.exists() {
        return out;
    }
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        for entry in fs::read_dir(&d).unwrap() {
            let entry = entry.unwrap();
            let p = entry.path();
            if p.is_dir() {
                stack.push(p);
            } else {
                out.push(p);
            }
        }
    }
    out
}
