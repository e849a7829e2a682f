//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, std::path::Path, tempfile::tempdir};

const TUXCORE_HEX: &str = "\
:100000000C9434000C9451000C9451000C94510049
:0C1DF000C8100304000000000000000008
:00000001FF
";

const FUXUSB_HEX: &str = "\
:0C001000C80405060000000000000000000D
:00000001FF
";

const EEPROM: &str = ":04000000DEADBEEFC4\n:00000001FF\n";

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tuxflash");
    cmd.env_remove("TUXFLASH_PRETEND")
        .env_remove("TUXFLASH_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("write firmware file");
    path
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("tuxflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    cli_cmd()
        .arg("-V")
        .assert()
        .success()
        .stdout(predicate::str::contains("tuxflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn completions_exit_zero() {
    cli_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tuxflash"));
}

#[test]
fn exit_code_two_without_subcommand() {
    cli_cmd().assert().failure().code(2);
}

#[test]
fn exit_code_two_for_unknown_command() {
    cli_cmd()
        .arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_flash_without_files() {
    cli_cmd().arg("flash").assert().failure().code(2);
}

#[test]
fn exit_code_two_for_batch_on_missing_directory() {
    let dir = tempdir().expect("tempdir should be created");
    cli_cmd()
        .args(["--pretend", "main"])
        .arg(dir.path().join("missing"))
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("not a directory"));
}

#[test]
fn info_json_describes_flash_image() {
    let dir = tempdir().expect("tempdir should be created");
    let path = write(dir.path(), "tuxcore.hex", TUXCORE_HEX);

    let output = cli_cmd()
        .arg("info")
        .arg("--json")
        .arg(&path)
        .output()
        .expect("command should execute");
    assert!(output.status.success());

    let info: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(info["kind"], "flash");
    assert_eq!(info["cpu"], "tuxcore");
    assert_eq!(info["memory"], "FLASH");
    assert_eq!(info["bootloader_address"], "0x30");
    assert_eq!(info["version"]["text"], "2.3.4");
    assert_eq!(info["pages"], 2);
}

#[test]
fn info_json_error_keeps_stdout_clean() {
    let dir = tempdir().expect("tempdir should be created");

    cli_cmd()
        .arg("info")
        .arg("--json")
        .arg(dir.path().join("not_exists.hex"))
        .assert()
        .failure()
        .code(5)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn bad_checksum_exits_five() {
    let dir = tempdir().expect("tempdir should be created");
    let path = write(dir.path(), "tuxcore.eep", ":04000000DEADBEEF52\n:00000001FF\n");

    cli_cmd()
        .arg("info")
        .arg(&path)
        .assert()
        .failure()
        .code(5)
        .stderr(predicate::str::contains("checksum"));
}

#[test]
fn unknown_extension_exits_five_without_touching_the_device() {
    let dir = tempdir().expect("tempdir should be created");
    let path = write(dir.path(), "firmware.bin", "not a hex file");

    cli_cmd()
        .arg("flash")
        .arg(&path)
        .assert()
        .failure()
        .code(5)
        .stderr(predicate::str::contains("FAIL"));
}

#[test]
fn pretend_routes_files_and_exits_zero() {
    let dir = tempdir().expect("tempdir should be created");
    let hex = write(dir.path(), "tuxcore.hex", TUXCORE_HEX);
    let eep = write(dir.path(), "tuxaudio.eep", EEPROM);

    cli_cmd()
        .arg("--pretend")
        .arg("flash")
        .arg(&hex)
        .arg(&eep)
        .assert()
        .success()
        .stderr(predicate::str::contains("[pretend]"))
        .stderr(predicate::str::contains("tuxcore FLASH"))
        .stderr(predicate::str::contains("tuxaudio EEPROM"));
}

#[test]
fn pretend_from_environment() {
    let dir = tempdir().expect("tempdir should be created");
    let hex = write(dir.path(), "tuxcore.hex", TUXCORE_HEX);

    cli_cmd()
        .env("TUXFLASH_PRETEND", "1")
        .arg("flash")
        .arg(&hex)
        .assert()
        .success()
        .stderr(predicate::str::contains("[pretend]"));
}

#[test]
fn batch_skips_bad_files_and_reports_first_failure() {
    let dir = tempdir().expect("tempdir should be created");
    write(dir.path(), "tuxcore.hex", TUXCORE_HEX);
    write(dir.path(), "tuxcore.eep", EEPROM);
    // tuxaudio.hex is missing, tuxaudio.eep is corrupt.
    write(dir.path(), "tuxaudio.eep", ":04000000DEADBEEF52\n");

    cli_cmd()
        .arg("--pretend")
        .arg("main")
        .arg(dir.path())
        .assert()
        .failure()
        .code(5)
        .stderr(predicate::str::contains("tuxcore EEPROM"))
        .stderr(predicate::str::contains("FAIL").count(2));
}

#[test]
fn invalid_local_config_is_a_warning() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("tuxflash.toml"), "invalid toml [[[").expect("write config");

    cli_cmd()
        .current_dir(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Failed to parse config file"));
}

#[test]
fn quiet_pretend_prints_nothing() {
    let dir = tempdir().expect("tempdir should be created");
    let hex = write(dir.path(), "tuxcore.hex", TUXCORE_HEX);

    cli_cmd()
        .args(["-q", "-p", "flash"])
        .arg(&hex)
        .assert()
        .success()
        .stderr(predicate::str::is_empty());
}

#[cfg(unix)]
#[test]
fn usb_cpu_in_dfu_mode_is_programmed_without_opening_the_dongle() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().expect("tempdir should be created");
    let calls = dir.path().join("calls.log");
    let programmer = write(
        dir.path(),
        "dfu-programmer",
        &format!("#!/bin/sh\necho \"$@\" >> '{}'\n", calls.display()),
    );
    fs::set_permissions(&programmer, fs::Permissions::from_mode(0o755))
        .expect("make programmer executable");
    let config = write(
        dir.path(),
        "cfg.toml",
        &format!("[dfu]\nprogram = '{}'\n\n[driver]\nnotify = false\n", programmer.display()),
    );
    let firmware = write(dir.path(), "fuxusb.hex", FUXUSB_HEX);

    cli_cmd()
        .arg("--config")
        .arg(&config)
        .arg("flash")
        .arg(&firmware)
        .assert()
        .success()
        .stderr(predicate::str::contains("Waiting for the dongle").not())
        .stderr(predicate::str::contains("OK"));

    let log = fs::read_to_string(&calls).expect("programmer should have been called");
    let expected = vec![
        "at89c5130 get bootloader-version".to_string(),
        "at89c5130 erase".to_string(),
        format!("at89c5130 flash {}", firmware.display()),
        "at89c5130 configure HSB 0x7b".to_string(),
        "at89c5130 start".to_string(),
    ];
    assert_eq!(log.lines().map(str::to_string).collect::<Vec<_>>(), expected);
}
