use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_cli_pack_list_check_cat_cycle() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Setup: a small application directory
    let dir = tempdir()?;
    let src = dir.path().join("app");
    fs::create_dir_all(src.join("lib"))?;
    fs::create_dir_all(src.join("docs"))?;
    fs::write(src.join("package.json"), r#"{"name":"app","main":"index.js"}"#)?;
    fs::write(src.join("index.js"), "require('./lib/util')")?;
    fs::write(src.join("lib/util.js"), "module.exports = 42")?;
    fs::write(src.join("docs/guide.md"), "# guide")?;
    let archive = dir.path().join("out/app.asar");

    // 2. Pack, leaving docs out
    let mut cmd = Command::cargo_bin("asarpack")?;
    cmd.arg("pack").arg(&src).arg("-o").arg(&archive).arg("--exclude").arg("docs");
    cmd.assert().success().stdout(predicate::str::contains("Packed 3 files"));
    assert!(archive.exists());

    // 3. List
    let mut cmd = Command::cargo_bin("asarpack")?;
    cmd.arg("list").arg(&archive);
    cmd.assert().success().stdout(
        predicate::str::contains("/lib/util.js")
            .and(predicate::str::contains("/package.json"))
            .and(predicate::str::contains("docs").not()),
    );

    // 4. Check the entry point
    let mut cmd = Command::cargo_bin("asarpack")?;
    cmd.arg("check").arg(&archive).arg("index.js");
    cmd.assert().success();

    // 5. Print a packed file
    let mut cmd = Command::cargo_bin("asarpack")?;
    cmd.arg("cat").arg(&archive).arg("lib/util.js");
    cmd.assert().success().stdout("module.exports = 42");

    Ok(())
}

#[test]
fn test_cli_check_missing_entry_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let src = dir.path().join("app");
    fs::create_dir_all(&src)?;
    fs::write(src.join("index.js"), "1")?;
    let archive = dir.path().join("app.asar");

    Command::cargo_bin("asarpack")?
        .arg("pack")
        .arg(&src)
        .arg("--output")
        .arg(&archive)
        .assert()
        .success();

    Command::cargo_bin("asarpack")?
        .arg("check")
        .arg(&archive)
        .arg("main.js")
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"main.js\"").and(predicate::str::contains("does not exist.")));

    Ok(())
}

#[test]
fn test_cli_unpack_flag_writes_mirror() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let src = dir.path().join("app");
    fs::create_dir_all(src.join("assets"))?;
    fs::write(src.join("assets/icon.png"), [0x89, b'P', b'N', b'G'])?;
    fs::write(src.join("index.js"), "1")?;
    let archive = dir.path().join("app.asar");

    Command::cargo_bin("asarpack")?
        .env_remove("CI")
        .env_remove("USE_HARD_LINKS")
        .args(["pack", "--unpack", "*.png", "-o"])
        .arg(&archive)
        .arg(&src)
        .assert()
        .success()
        .stdout(predicate::str::contains("unpacked 1 files"));

    assert_eq!(fs::read(dir.path().join("app.asar.unpacked/assets/icon.png"))?, vec![0x89, b'P', b'N', b'G']);
    Ok(())
}

#[test]
fn test_cli_missing_source_reports_error() {
    let dir = tempdir().unwrap();
    Command::cargo_bin("asarpack")
        .unwrap()
        .arg("pack")
        .arg(dir.path().join("nope"))
        .arg("-o")
        .arg(dir.path().join("x.asar"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}
