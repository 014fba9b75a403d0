use assert_cmd::Command;
use predicates::prelude::*;
use std::fmt::Write as _;
use tempfile::tempdir;

fn cli_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("pwnfilter"))
}

fn corpus(n: u64) -> String {
    let mut s = String::new();
    for i in 0..n {
        let d = i.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        writeln!(s, "{d:016X}{:016X}{:08X}:{}", !d, i as u32, i + 1).unwrap();
    }
    s
}

#[test]
fn gen_then_info() {
    let tmp = tempdir().expect("tempdir");
    let input = tmp.path().join("pwned.txt");
    let output = tmp.path().join("filter.tar.gz");
    std::fs::write(&input, corpus(500)).unwrap();

    cli_cmd()
        .args(["-q", "gen"])
        .arg(&input)
        .arg(&output)
        .args(["-s", "5", "-e", "1e-6", "-m", "-1"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("inserted : 500 of 500 lines")
                .and(predicate::str::contains("filters  :")),
        );
    assert!(output.exists());

    cli_cmd()
        .args(["-q", "info"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("shards   : 5"));
}

#[test]
fn gen_json_report_with_config_file() {
    let tmp = tempdir().expect("tempdir");
    let input = tmp.path().join("pwned.txt");
    let output = tmp.path().join("filter.tar.gz");
    let config = tmp.path().join("build.json");
    std::fs::write(&input, corpus(300)).unwrap();
    std::fs::write(&config, r#"{ "shards": 3, "error_rate": 1e-5, "max_entries": 100 }"#).unwrap();

    let out = cli_cmd()
        .args(["-q", "gen"])
        .arg(&input)
        .arg(&output)
        .arg("--config")
        .arg(&config)
        .args(["--shards", "2", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(report["plan"]["shards"], 2);
    assert_eq!(report["stats"]["accepted"], 100);
    assert_eq!(report["stats"]["cutover"], true);
}

#[test]
fn impossible_error_budget_fails_cleanly() {
    let tmp = tempdir().expect("tempdir");
    let input = tmp.path().join("pwned.txt");
    let output = tmp.path().join("filter.tar.gz");
    std::fs::write(&input, corpus(10)).unwrap();

    cli_cmd()
        .args(["-q", "gen"])
        .arg(&input)
        .arg(&output)
        .args(["-s", "200", "-e", "0.01"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config"));
    assert!(!output.exists());
}

#[test]
fn info_rejects_garbage() {
    let tmp = tempdir().expect("tempdir");
    let bogus = tmp.path().join("bogus.tar.gz");
    std::fs::write(&bogus, b"not a container").unwrap();

    cli_cmd().args(["-q", "info"]).arg(&bogus).assert().failure();
}

#[test]
fn archive_mode_requires_url() {
    let tmp = tempdir().expect("tempdir");
    cli_cmd()
        .args(["-q", "fetch", "--mode", "archive"])
        .arg(tmp.path().join("dl.bin"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("--url"));
}
