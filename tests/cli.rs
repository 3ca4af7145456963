use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn tubescribe(cwd: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("tubescribe").unwrap();
    cmd.current_dir(cwd.path())
        .env("HOME", cwd.path())
        .env("XDG_CONFIG_HOME", cwd.path().join(".config"))
        .env_remove("LEMONFOX_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_mentions_table_argument() {
    let dir = TempDir::new().unwrap();
    tubescribe(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[TABLE]"));
}

#[test]
fn missing_table_file_fails() {
    let dir = TempDir::new().unwrap();
    tubescribe(&dir)
        .arg("absent.csv")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Table file not found"));
}

#[test]
fn no_table_in_directory_fails() {
    let dir = TempDir::new().unwrap();
    tubescribe(&dir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No table file (*.csv) found"));
}

#[test]
fn missing_api_key_fails_before_processing() {
    let dir = TempDir::new().unwrap();
    fs_err::write(dir.path().join("videos.csv"), "name,url\nTalk,https://youtu.be/dQw4w9WgXcQ\n").unwrap();

    tubescribe(&dir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("API key must be configured"));

    assert!(!dir.path().join("input_data").exists());
    assert!(!dir.path().join("temp_audio").exists());
}

#[test]
fn show_config_masks_api_key() {
    let dir = TempDir::new().unwrap();
    tubescribe(&dir)
        .args(["--show-config", "--output-dir", "transcripts"])
        .env("LEMONFOX_API_KEY", "supersecretkey")
        .assert()
        .success()
        .stdout(predicate::str::contains("**********tkey"))
        .stdout(predicate::str::contains("Output Dir: transcripts"))
        .stdout(predicate::str::contains("supersecret").not());
}

#[test]
fn config_file_in_working_directory_is_used() {
    let dir = TempDir::new().unwrap();
    fs_err::write(
        dir.path().join("config.yaml"),
        "app:\n  table_extension: tsv\n",
    )
    .unwrap();

    tubescribe(&dir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No table file (*.tsv) found"));
}
