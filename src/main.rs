// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{cell::RefCell, rc::Rc};

use anyhow::{Context, Result};
use pebble_rpc::{
    cfg::{
        cli::{Action, Cli, resolve_config_path, signal_running_process, write_pid},
        config::Config,
        logger::init_logger,
    },
    control::{CONTROL_FUNCTION_NAME, ControlState, control_handler},
    coroutine::CoroutineScheduler,
    overload::OverloadGovernor,
    processor::ProcessorRegistry,
    rpc::RpcEngine,
    server::{AppEventHandler, Server, TickStats},
    timer::SequenceTimer,
    transport::{MessageTransport, loopback::LoopbackTransport},
};
use tracing::info;

struct App {
    control: Rc<ControlState>,
}

impl AppEventHandler for App {
    fn on_init(&mut self) -> Result<(), String> {
        info!("pebble-server starting up");
        Ok(())
    }

    fn on_stop(&mut self) {
        info!("pebble-server stopped");
    }

    fn on_update(&mut self, _now_ms: i64, stats: TickStats) {
        self.control.record_tick(stats);
    }

    fn on_reload(&mut self) {
        info!("pebble-server reloaded");
    }

    fn wants_reload(&mut self) -> bool {
        self.control.take_reload_request()
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = Cli::parse(&args)?;

    if cli.action == Action::PrintVersion {
        println!("pebble-server {}", pebble_rpc::cfg::cli::VERSION);
        return Ok(());
    }

    if matches!(cli.action, Action::Stop | Action::Reload) {
        return signal_running_process(&cli.pid_file, &cli.action);
    }

    let conf_path = resolve_config_path(cli.conf_file.to_string_lossy().as_ref())
        .context("failed to resolve config path")?;
    let cfg = Config::load_from_file(&conf_path).context("failed to load config")?;

    let _guard = init_logger(&cfg.log, &cfg.app.name)?;
    write_pid(&cli.pid_file, std::process::id() as i32).ok();

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, async move {
        run_server(cfg).await;
    });

    Ok(())
}

async fn run_server(cfg: Config) {
    let transport = Rc::new(LoopbackTransport::new());
    let timer = Rc::new(RefCell::new(SequenceTimer::new()));
    let scheduler = CoroutineScheduler::new();

    let engine = Rc::new(RpcEngine::new(
        transport.clone() as Rc<dyn MessageTransport>,
        timer,
        scheduler,
    ));

    let control_state = Rc::new(ControlState::new());
    control_state.set_config_summary(cfg.summary());
    engine
        .add_request_function(CONTROL_FUNCTION_NAME, control_handler(control_state.clone()))
        .expect("control function registered exactly once at startup");

    let listener = transport.bind(&cfg.app.bind_url).expect("bind_url is well-formed");

    let mut processors = ProcessorRegistry::new();
    processors.attach(listener, engine.clone());
    // Single-engine deployment: every connection handle accepted off
    // `listener` should dispatch here too, not just the listener handle
    // itself (which only ever carries "new connection" notifications).
    processors.set_default(engine.clone());

    let overload = OverloadGovernor::new(cfg.flow_control.max_task_num, cfg.flow_control.max_message_age_ms);
    let mut server = Server::new(transport, processors, overload);

    let mut app = App { control: control_state };
    server
        .run(&mut app, || {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0)
        })
        .await;
}
