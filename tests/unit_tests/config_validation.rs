// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::PathBuf};

use pebble_rpc::cfg::config::Config;
use serial_test::serial;

fn write_temp_ini(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("pebble-rpc-test-{name}-{}.ini", std::process::id()));
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn loads_sections_and_applies_defaults_for_missing_keys() {
    let path = write_temp_ini(
        "sections",
        "[App]\nName=demo\nBindUrl=loopback://demo\n\n[FlowControl]\nMaxTaskNum=5\n",
    );
    let cfg = Config::load_from_file(&path).unwrap();
    fs::remove_file(&path).ok();

    assert_eq!(cfg.app.name, "demo");
    assert_eq!(cfg.app.bind_url, "loopback://demo");
    assert_eq!(cfg.flow_control.max_task_num, 5);
    // Not set in the file: falls back to Config::default()'s value.
    assert_eq!(cfg.coroutine.max_coroutine_num, 10_000);
}

#[test]
#[serial]
fn env_override_wins_over_file_value() {
    let path = write_temp_ini("env-override", "[App]\nName=from-file\nBindUrl=loopback://x\n");
    unsafe {
        std::env::set_var("APP_NAME", "from-env");
    }
    let cfg = Config::load_from_file(&path).unwrap();
    unsafe {
        std::env::remove_var("APP_NAME");
    }
    fs::remove_file(&path).ok();

    assert_eq!(cfg.app.name, "from-env");
}

#[test]
fn empty_bind_url_fails_validation() {
    let path = write_temp_ini("empty-bind-url", "[App]\nName=demo\nBindUrl=\n");
    let err = Config::load_from_file(&path).unwrap_err();
    fs::remove_file(&path).ok();
    assert!(err.to_string().contains("BindUrl"));
}
