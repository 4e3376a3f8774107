use assert_cmd::Command;

fn relaysave() -> Command {
    Command::cargo_bin("relaysave").unwrap()
}

#[test]
fn help_lists_transfer_flags() {
    let output = relaysave().arg("--help").assert().success().get_output().clone();
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--storage", "--cache-ttl", "--retry", "--json"] {
        assert!(stdout.contains(flag), "missing {flag}");
    }
}

#[test]
fn url_is_required() {
    relaysave().assert().failure();
}

#[test]
fn quiet_conflicts_with_verbose() {
    relaysave()
        .args(["-q", "-v", "https://example.com/file"])
        .assert()
        .failure();
}

#[test]
fn unsupported_scheme_exits_with_error() {
    let dir = tempfile::tempdir().unwrap();
    relaysave()
        .current_dir(dir.path())
        .arg("ftp://example.com/file")
        .assert()
        .code(1);
}

#[test]
fn unreadable_config_exits_with_error() {
    let dir = tempfile::tempdir().unwrap();
    relaysave()
        .current_dir(dir.path())
        .args(["--config", "missing.toml", "https://example.com/file"])
        .assert()
        .code(1);
    assert!(!dir.path().join("cache").exists());
}

#[test]
fn invalid_config_values_exit_with_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("config.toml"), "threads = 0\n").unwrap();
    relaysave()
        .current_dir(dir.path())
        .arg("https://example.com/file")
        .assert()
        .code(1);
}

#[test]
fn invalid_environment_override_exits_with_error() {
    let dir = tempfile::tempdir().unwrap();
    relaysave()
        .current_dir(dir.path())
        .env("RELAYSAVE_WORKERS", "0")
        .arg("https://example.com/file")
        .assert()
        .code(1);
}
