use assert_cmd::Command;
use predicates::prelude::*;

fn picker() -> Command {
    Command::cargo_bin("map-picker").expect("map-picker binary")
}

#[test]
fn prints_version() {
    picker()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    picker()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Map Picker"))
        .stdout(predicate::str::contains("--maps"))
        .stdout(predicate::str::contains("--version"));
}

#[test]
fn rejects_unknown_arguments() {
    picker()
        .arg("--bogus")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown argument '--bogus'"));
}

#[test]
fn missing_maps_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    picker()
        .env("MAP_PICKER_LOG__FILE", dir.path().join("picker.log"))
        .args(["--maps"])
        .arg(dir.path().join("absent"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}
