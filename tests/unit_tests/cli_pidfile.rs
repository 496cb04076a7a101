// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::PathBuf;

use pebble_rpc::cfg::cli::{Action, Cli, read_pid, write_pid};

fn temp_pid_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("pebble-rpc-test-{name}-{}.pid", std::process::id()))
}

#[test]
fn write_then_read_pid_round_trips() {
    let path = temp_pid_path("roundtrip");
    write_pid(&path, 4242).unwrap();
    assert_eq!(read_pid(&path).unwrap(), 4242);
    std::fs::remove_file(&path).ok();
}

#[test]
fn read_pid_rejects_garbage_contents() {
    let path = temp_pid_path("garbage");
    std::fs::write(&path, "not-a-pid").unwrap();
    assert!(read_pid(&path).is_err());
    std::fs::remove_file(&path).ok();
}

#[test]
fn parse_rejects_value_flag_with_no_value() {
    let args: Vec<String> = ["--pid_file"].into_iter().map(String::from).collect();
    assert!(Cli::parse(&args).is_err());
}

#[test]
fn parse_last_action_flag_wins() {
    let args: Vec<String> = ["--stop", "--reload"].into_iter().map(String::from).collect();
    let cli = Cli::parse(&args).unwrap();
    assert_eq!(cli.action, Action::Reload);
}
