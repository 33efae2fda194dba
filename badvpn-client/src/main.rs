#![forbid(unsafe_code)]

//! Wiring glue: loads a [`ClientConfig`], brings up one [`Reactor`], routes
//! a local TAP-equivalent through a [`DataProtoDevice`], and wires each
//! configured peer's transport through [`session::SessionContext`].

mod session;
mod tap;

use std::cell::{Cell, RefCell};
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use badvpn_core::{ClientConfig, ConfigEvent, PeerId, Reactor, Timer};
use badvpn_dataproto::DataProtoDevice;
use badvpn_pipeline::split;
use clap::Parser;
use tracing::{error, info, warn};

use session::SessionContext;
use tap::LoopbackTap;

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);
const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Single-reactor BadVPN dataplane client: reads a peer list from a
/// TOML file and keeps each peer's DataProto channel alive until
/// interrupted.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "badvpn-client.toml")]
    config: std::path::PathBuf,

    /// Parse and validate the configuration, then exit without starting
    /// the reactor.
    #[arg(long)]
    check_config: bool,
}

fn main() -> ExitCode {
    badvpn_telemetry::init_tracing();
    let cli = Cli::parse();

    let config = match ClientConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %cli.config.display(), "failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.check_config {
        info!(peers = config.peers.len(), local_id = config.local_id, "configuration OK");
        return ExitCode::SUCCESS;
    }

    match run(config, cli.config) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: ClientConfig, config_path: std::path::PathBuf) -> badvpn_core::Result<i32> {
    let reactor = Reactor::new()?;
    let local_id = PeerId::new(config.local_id);

    let tap = LoopbackTap::new(config.frame_mtu);
    let (tap_pass, tap_recv) = split(tap);
    let device = DataProtoDevice::new(Box::new(tap_recv), round_robin_router(&config));

    let ctx = SessionContext::new(
        reactor.clone(),
        local_id,
        config.keepalive.clone(),
        config.frame_mtu,
        config.max_overhead,
        device,
        tap_pass,
    );

    for peer in &config.peers {
        match ctx.wire_peer(peer) {
            Ok(()) => info!(peer = peer.id, "peer wired"),
            Err(e) => warn!(peer = peer.id, "failed to wire peer: {e}"),
        }
    }

    let _shutdown_timer = install_shutdown_poll(&reactor);
    let _config_watch = install_config_watch(&reactor, config_path);

    info!(peers = config.peers.len(), "reactor starting");
    let code = reactor.run()?;
    info!(code, "reactor exited");
    Ok(code)
}

/// The routing decision (which configured peer a TAP frame belongs to) is a
/// MAC/IP forwarding table in a real deployment, built from traffic the
/// tunnel has already seen — out of scope here, same as TAP device binding
/// itself. This instead cycles through the configured peer list, which
/// keeps every peer reachable for demonstration and testing without
/// pretending to implement real forwarding.
fn round_robin_router(config: &ClientConfig) -> impl FnMut(&[u8]) -> Option<PeerId> {
    let peer_ids: Vec<PeerId> = config.peers.iter().map(|p| PeerId::new(p.id)).collect();
    let next = Cell::new(0usize);
    move |_frame| {
        if peer_ids.is_empty() {
            return None;
        }
        let idx = next.get();
        next.set((idx + 1) % peer_ids.len());
        Some(peer_ids[idx])
    }
}

/// Installs a Ctrl-C handler and a reactor-owned timer that polls the flag
/// it sets. `Reactor::quit` must run on the reactor's own thread, and the
/// reactor isn't `Send`, so the signal handler thread can only set a flag —
/// this is what actually stops the loop. The returned value must be kept
/// alive for as long as the reactor runs; dropping it cancels the timer.
fn install_shutdown_poll(reactor: &Reactor) -> Rc<RefCell<Option<Timer>>> {
    let requested = Arc::new(AtomicBool::new(false));
    let handler_flag = requested.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    }) {
        warn!("failed to install Ctrl-C handler: {e}");
    }

    let slot: Rc<RefCell<Option<Timer>>> = Rc::new(RefCell::new(None));
    let slot_for_handler = slot.clone();
    let reactor_for_handler = reactor.clone();
    let timer = reactor.create_timer(SHUTDOWN_POLL_INTERVAL, move || {
        if requested.load(Ordering::SeqCst) {
            info!("shutdown requested, stopping reactor");
            reactor_for_handler.quit(0);
            return;
        }
        if let Some(timer) = slot_for_handler.borrow().as_ref() {
            timer.schedule();
        }
    });
    timer.schedule();
    *slot.borrow_mut() = Some(timer);
    slot
}

/// Keeps the pieces of the config-reload path alive together: the
/// background `notify` watcher, the pending job its events are drained
/// through, and the timer that sets the job (nothing else wakes the
/// reactor when a filesystem event arrives on the watcher's own thread).
struct ConfigWatch {
    _watcher: Box<dyn notify::Watcher + Send>,
    _timer: Rc<RefCell<Option<Timer>>>,
}

/// Watches `path` for changes and logs the result of re-parsing it. Peer
/// transports are not live-reconciled against a changed config — doing so
/// safely would mean diffing the running peer set against the new one and
/// tearing down/rebuilding `DataProtoDest`s for whatever changed, which is
/// a reconciliation loop this wiring layer doesn't implement. A restart
/// picks up config changes; this path exists so an operator watching logs
/// finds out immediately that a reload would be needed, and rejects edits
/// that don't even parse.
fn install_config_watch(reactor: &Reactor, path: std::path::PathBuf) -> Option<ConfigWatch> {
    let (rx, watcher) = match badvpn_core::watch_file(path) {
        Ok(v) => v,
        Err(e) => {
            warn!("config watch not installed: {e}");
            return None;
        }
    };

    let job = reactor.pending_group().add_job(move || {
        while let Ok(event) = rx.try_recv() {
            match event {
                ConfigEvent::Changed(cfg) => {
                    info!(peers = cfg.peers.len(), "config file changed on disk (restart to apply)")
                }
                ConfigEvent::Invalid(e) => warn!("config file changed but no longer parses: {e}"),
            }
        }
    });

    let slot: Rc<RefCell<Option<Timer>>> = Rc::new(RefCell::new(None));
    let slot_for_handler = slot.clone();
    let timer = reactor.create_timer(CONFIG_POLL_INTERVAL, move || {
        job.set();
        if let Some(timer) = slot_for_handler.borrow().as_ref() {
            timer.schedule();
        }
    });
    timer.schedule();
    *slot.borrow_mut() = Some(timer);

    Some(ConfigWatch { _watcher: watcher, _timer: slot })
}
