// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Command-line parsing for the `pebble-server` binary and the
//! `--stop`/`--reload` signaling path, §10.4 of `SPEC_FULL.md`. Hand-rolled
//! rather than pulling in a CLI-parsing crate: the surface is four flags
//! and two value options.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Reload,
    PrintVersion,
}

#[derive(Debug, Clone)]
pub struct Cli {
    pub action: Action,
    pub conf_file: PathBuf,
    pub pid_file: PathBuf,
}

impl Cli {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut action = Action::Start;
        let mut conf_file = PathBuf::from("conf/pebble.ini");
        let mut pid_file = PathBuf::from("/var/run/pebble-server.pid");

        let mut iter = args.iter().peekable();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--start" => action = Action::Start,
                "--stop" => action = Action::Stop,
                "--reload" => action = Action::Reload,
                "-v" | "--version" => action = Action::PrintVersion,
                "--conf_file" => {
                    let v = iter.next().context("--conf_file requires a value")?;
                    conf_file = PathBuf::from(v);
                }
                "--pid_file" => {
                    let v = iter.next().context("--pid_file requires a value")?;
                    pid_file = PathBuf::from(v);
                }
                other => bail!("unrecognized argument: {other}"),
            }
        }

        Ok(Cli { action, conf_file, pid_file })
    }
}

pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);

    let abs = if p.is_absolute() { p.to_path_buf() } else { std::env::current_dir().context("cannot get current working dir")?.join(p) };

    abs.canonicalize().with_context(|| format!("failed to canonicalize path {abs:?}"))
}

pub fn read_pid(pid_file: &Path) -> Result<i32> {
    let s = fs::read_to_string(pid_file).with_context(|| format!("failed to read pid file {pid_file:?}"))?;
    s.trim().parse::<i32>().with_context(|| format!("pid file {pid_file:?} does not contain a valid pid"))
}

pub fn write_pid(pid_file: &Path, pid: i32) -> Result<()> {
    fs::write(pid_file, pid.to_string()).with_context(|| format!("failed to write pid file {pid_file:?}"))
}

/// Sends `SIGUSR1` (stop) or `SIGUSR2` (reload) to the pid recorded in
/// `pid_file`.
pub fn signal_running_process(pid_file: &Path, action: &Action) -> Result<()> {
    let pid = read_pid(pid_file)?;
    let sig = match action {
        Action::Stop => libc::SIGUSR1,
        Action::Reload => libc::SIGUSR2,
        _ => bail!("signal_running_process called with a non-signaling action"),
    };
    let rc = unsafe { libc::kill(pid, sig) };
    if rc != 0 {
        bail!("kill({pid}, {sig}) failed: {}", std::io::Error::last_os_error());
    }
    Ok(())
}
