use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn write_tone(path: &Path) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 48_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for n in 0..4_800 {
        writer.write_sample(((n % 96) as i16 - 48) * 200).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn no_sources_is_an_error() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("polyplay"));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("at least one source"));
}

#[test]
fn probe_only_prints_each_stream_format() {
    let dir = tempfile::tempdir().unwrap();
    write_tone(&dir.path().join("tone.wav"));
    std::fs::write(dir.path().join("broken.mp3"), b"nothing here").unwrap();

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("polyplay"));
    cmd.arg("--probe-only")
        .arg("--root")
        .arg(dir.path())
        .args(["tone.wav", "broken.mp3"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("tone.wav: 48000 Hz / 16 bit / 1 ch"))
        .stdout(predicate::str::contains("broken.mp3:"));
}

#[test]
fn probe_only_succeeds_when_every_source_decodes() {
    let dir = tempfile::tempdir().unwrap();
    write_tone(&dir.path().join("tone.wav"));

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("polyplay"));
    cmd.arg("--probe-only")
        .arg("--root")
        .arg(dir.path())
        .arg("tone.wav")
        .assert()
        .success()
        .stdout(predicate::str::contains("48000 Hz"));
}

#[test]
fn positive_gain_is_rejected() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("polyplay"));
    cmd.args(["bed.mp3", "-g", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("0 db or lower"));
}

#[test]
fn more_gains_than_sources_is_rejected() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("polyplay"));
    cmd.args(["bed.mp3", "-g", "0", "-g", "-6db"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("2 gains given for 1 sources"));
}

#[test]
fn missing_config_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("polyplay"));
    cmd.arg("--config")
        .arg(dir.path().join("session.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn config_file_supplies_sources() {
    let dir = tempfile::tempdir().unwrap();
    write_tone(&dir.path().join("bed.wav"));
    let config = dir.path().join("session.json");
    let body = serde_json::json!({
        "storage_root": dir.path(),
        "sources": [{ "path": "bed.wav", "gain_db": "-3db" }],
    });
    std::fs::write(&config, body.to_string()).unwrap();

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("polyplay"));
    cmd.arg("--config")
        .arg(&config)
        .arg("--probe-only")
        .assert()
        .success()
        .stdout(predicate::str::contains("bed.wav: 48000 Hz"));
}
