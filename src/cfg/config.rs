// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! INI-backed process configuration, §6 of `SPEC_FULL.md`. One sub-struct
//! per section (`[App]`, `[Coroutine]`, `[Log]`, `[Stat]`, `[FlowControl]`,
//! `[Broadcast]`), each read through the `ini` crate and then validated and
//! defaulted the way the original `INIReader`-based configuration in
//! `examples/original_source/src/common/ini_reader.h` is consumed by
//! `PebbleServer::LoadOptionsFromIni`. An env var named after the section
//! (e.g. `APP_NAME`) overrides the file value before defaulting, matching
//! this crate's own prior `cfg::config` convention of a single
//! `validate_and_normalize` pass after load.

use std::{env, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use ini::Ini;

#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub coroutine: CoroutineConfig,
    pub log: LogConfig,
    pub stat: StatConfig,
    pub flow_control: FlowControlConfig,
    pub broadcast: BroadcastConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub name: String,
    pub bind_url: String,
    pub tick_interval: Duration,
    pub pid_file: String,
}

#[derive(Debug, Clone)]
pub struct CoroutineConfig {
    pub max_coroutine_num: u32,
    pub stack_size_bytes: u32,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub dir: String,
    pub max_file_size_mb: u32,
    pub max_file_num: u32,
}

#[derive(Debug, Clone)]
pub struct StatConfig {
    pub enabled: bool,
    pub report_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct FlowControlConfig {
    pub max_task_num: u64,
    pub max_message_age_ms: i64,
}

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub max_channel_num: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            app: AppConfig {
                name: "pebble-server".to_string(),
                bind_url: "loopback://pebble".to_string(),
                tick_interval: Duration::from_millis(10),
                pid_file: "/var/run/pebble-server.pid".to_string(),
            },
            coroutine: CoroutineConfig { max_coroutine_num: 10_000, stack_size_bytes: 0 },
            log: LogConfig { level: "info".to_string(), dir: "./log".to_string(), max_file_size_mb: 100, max_file_num: 10 },
            stat: StatConfig { enabled: true, report_interval: Duration::from_secs(60) },
            flow_control: FlowControlConfig { max_task_num: 100_000, max_message_age_ms: 5_000 },
            broadcast: BroadcastConfig { max_channel_num: 1_000 },
        }
    }
}

fn get_str(ini: &Ini, section: &str, key: &str, default: &str) -> String {
    ini.get_from(Some(section), key).map(str::to_string).unwrap_or_else(|| default.to_string())
}

fn get_num<T: std::str::FromStr>(ini: &Ini, section: &str, key: &str, default: T) -> T {
    ini.get_from(Some(section), key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn get_bool(ini: &Ini, section: &str, key: &str, default: bool) -> bool {
    match ini.get_from(Some(section), key) {
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        _ => default,
    }
}

fn env_override(section: &str, key: &str) -> Option<String> {
    let name = format!("{}_{}", section.to_uppercase(), key.to_uppercase());
    env::var(name).ok()
}

impl Config {
    /// Parse an INI file and validate/normalize it, matching the original
    /// `INIReader::Parse` followed by application-side sanity checks.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let ini = Ini::load_from_file(path.as_ref())
            .with_context(|| format!("failed to parse INI config at {:?}", path.as_ref()))?;
        let mut cfg = Config::from_ini(&ini);
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    fn from_ini(ini: &Ini) -> Self {
        let default = Config::default();
        Config {
            app: AppConfig {
                name: env_override("App", "Name").unwrap_or_else(|| get_str(ini, "App", "Name", &default.app.name)),
                bind_url: env_override("App", "BindUrl")
                    .unwrap_or_else(|| get_str(ini, "App", "BindUrl", &default.app.bind_url)),
                tick_interval: Duration::from_millis(get_num(ini, "App", "TickIntervalMs", default.app.tick_interval.as_millis() as u64)),
                pid_file: get_str(ini, "App", "PidFile", &default.app.pid_file),
            },
            coroutine: CoroutineConfig {
                max_coroutine_num: get_num(ini, "Coroutine", "MaxCoroutineNum", default.coroutine.max_coroutine_num),
                stack_size_bytes: get_num(ini, "Coroutine", "StackSizeBytes", default.coroutine.stack_size_bytes),
            },
            log: LogConfig {
                level: env_override("Log", "Level").unwrap_or_else(|| get_str(ini, "Log", "Level", &default.log.level)),
                dir: get_str(ini, "Log", "Dir", &default.log.dir),
                max_file_size_mb: get_num(ini, "Log", "MaxFileSizeMB", default.log.max_file_size_mb),
                max_file_num: get_num(ini, "Log", "MaxFileNum", default.log.max_file_num),
            },
            stat: StatConfig {
                enabled: get_bool(ini, "Stat", "Enabled", default.stat.enabled),
                report_interval: Duration::from_secs(get_num(ini, "Stat", "ReportIntervalSec", default.stat.report_interval.as_secs())),
            },
            flow_control: FlowControlConfig {
                max_task_num: get_num(ini, "FlowControl", "MaxTaskNum", default.flow_control.max_task_num),
                max_message_age_ms: get_num(ini, "FlowControl", "MaxMessageAgeMs", default.flow_control.max_message_age_ms),
            },
            broadcast: BroadcastConfig {
                max_channel_num: get_num(ini, "Broadcast", "MaxChannelNum", default.broadcast.max_channel_num),
            },
        }
    }

    /// Validates invariants not expressible through defaulting alone.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(!self.app.name.is_empty(), "App.Name must not be empty");
        ensure!(!self.app.bind_url.is_empty(), "App.BindUrl must not be empty");
        ensure!(self.coroutine.max_coroutine_num > 0, "Coroutine.MaxCoroutineNum must be > 0");

        // 0 disables the corresponding overload check (§4.8); negative
        // values make no sense, so clamp up to 0.
        if self.flow_control.max_message_age_ms < 0 {
            self.flow_control.max_message_age_ms = 0;
        }

        Ok(())
    }

    pub fn summary(&self) -> String {
        format!(
            "app={} bind={} coroutine_cap={} log_level={} flow_control(max_task={},max_age_ms={})",
            self.app.name,
            self.app.bind_url,
            self.coroutine.max_coroutine_num,
            self.log.level,
            self.flow_control.max_task_num,
            self.flow_control.max_message_age_ms
        )
    }
}
