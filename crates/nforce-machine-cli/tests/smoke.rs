#![cfg(not(target_arch = "wasm32"))]

use std::process::{Command, Output};

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_nforce-machine"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run nforce-machine CLI")
}

#[test]
fn prints_bus_tree_by_default() {
    let output = run(&[]);
    assert!(
        output.status.success(),
        "stderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("nforcepc (nForce PC)"));
    assert!(stdout.contains("bus pci.0 (PciRoot)"));
    assert!(stdout.contains("nvnet"));
    assert!(stdout.contains("gsi 13 <- x86-cpu@sys0"));
}

#[test]
fn json_summary_reflects_flags() {
    let output = run(&["--json", "--accel", "kvm", "--ram", "128", "--netdev", "user0"]);
    assert!(
        output.status.success(),
        "stderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let summary: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(summary["strategy"], "hardware-assisted");
    assert_eq!(summary["ram"]["below_4g"], 128u64 * 1024 * 1024);
    assert_eq!(summary["ferr"], "host");

    let nic = summary["devices"]
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d["type"] == "nvnet")
        .expect("NIC should be present");
    assert_eq!(nic["props"]["netdev"], "user0");
    assert_eq!(nic["props"]["default-boot"], true);
}

#[test]
fn config_file_is_loaded_and_flags_override_it() {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let path = tmp.path().join("machine.json");
    std::fs::write(
        &path,
        r#"{"ram_size_bytes": 33554432, "cpu_model": "pentium2",
            "drives": [{"channel": 0, "unit": 0, "media": "disk", "backend": "hd0"}]}"#,
    )
    .expect("failed to write config");

    let output = run(&[
        "--config",
        path.to_str().expect("path should be UTF-8"),
        "--cpu",
        "qemu32",
        "--json",
    ]);
    assert!(
        output.status.success(),
        "stderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["cpu_model"], "qemu32");
    assert_eq!(summary["ram"]["below_4g"], 32u64 * 1024 * 1024);
    let devices = summary["devices"].as_array().unwrap();
    assert!(devices
        .iter()
        .any(|d| d["type"] == "ide-hd" && d["props"]["drive"] == "hd0"));
    assert!(!devices.iter().any(|d| d["type"] == "ide-cd"));
}

#[test]
fn invalid_configuration_exits_non_zero() {
    let output = run(&["--cpus", "2"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to build machine topology"), "{stderr}");
    assert!(stderr.contains("cpu_count=2"), "{stderr}");
}

#[test]
fn lists_machine_types() {
    let output = run(&["--list-machines"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("nforcepc"));
}
