//! Integration tests for the portalctl binary
//!
//! Only subcommands that never touch the system are exercised here.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn portalctl() -> Command {
    Command::cargo_bin("portalctl").unwrap()
}

#[test]
fn test_help_command() {
    portalctl()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Captive portal access point control"));
}

#[test]
fn test_rules_preview() {
    portalctl()
        .args(["rules", "--interface", "wlan0", "--port", "8080"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "iptables -t nat -A PREROUTING -i wlan0 -p tcp --dport 80 -j REDIRECT --to-ports 8080",
        ))
        .stdout(predicate::str::contains("ufw allow in on wlan0 to any port 67 proto udp"))
        .stdout(predicate::str::contains("MASQUERADE").not());
}

#[test]
fn test_rules_cleanup_preview_with_upstream() {
    portalctl()
        .args(["rules", "-i", "wlan0", "-u", "eth0", "--cleanup"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ufw delete allow in on wlan0 to any port 8080 proto tcp"))
        .stdout(predicate::str::contains("iptables -t nat -D POSTROUTING -o eth0 -j MASQUERADE"))
        .stdout(predicate::str::contains(" -A ").not());
}

#[test]
fn test_rules_json_output() {
    let output = portalctl()
        .args(["--json", "rules", "--interface", "wlan0"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let lines: Vec<String> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(lines.len(), 10);
}

#[test]
fn test_validate_rejects_short_password() {
    portalctl()
        .args([
            "validate", "--interface", "wlan0", "--ssid", "Lobby", "--password", "short",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least 8 characters"));
}

#[test]
fn test_validate_open_network() {
    portalctl()
        .args(["validate", "-i", "wlan0", "-s", "Lobby", "--security", "open"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_validate_from_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("portalctl.toml");
    fs::write(
        &path,
        r#"
[access_point]
interface = "wlan1"
ssid = "Lobby"
password = "correcthorse"
"#,
    )
    .unwrap();

    portalctl()
        .arg("--config")
        .arg(&path)
        .arg("validate")
        .assert()
        .success();

    portalctl()
        .arg("--config")
        .arg(&path)
        .args(["validate", "--channel", "99"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid WiFi channel 99"));
}

#[test]
fn test_missing_config_file() {
    portalctl()
        .args(["--config", "/nonexistent/portalctl.toml", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config"));
}

#[test]
fn test_ap_dry_run() {
    portalctl()
        .args([
            "ap", "--interface", "wlan0", "--ssid", "Lobby", "--security", "open", "--dry-run",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("# start"))
        .stdout(predicate::str::contains("nmcli connection add type wifi ifname wlan0"))
        .stdout(predicate::str::contains("--keep-in-foreground &"))
        .stdout(predicate::str::contains("# stop"))
        .stdout(predicate::str::contains("nmcli connection delete wifiportal"));
}

#[test]
fn test_ap_dry_run_hostapd_backend() {
    portalctl()
        .args([
            "ap", "-i", "wlan0", "-s", "Lobby", "-p", "correcthorse", "--backend", "hostapd",
            "--dry-run",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("iw reg set US"))
        .stdout(predicate::str::contains("nmcli device set wlan0 managed yes"));
}
