//! Mist node: process entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Install the boot logger, print the boot banner
//!   3. Spawn the `main` worker thread running a current-thread runtime
//!   4. Load config, switch the logger to the configured level and sink
//!   5. Build the collaborator set (radio, optional mesh, signature, mist)
//!   6. Supervisor bring-up, then heartbeat forever
//!
//! A fatal bring-up failure parks the worker thread for good. A worker that
//! panics takes the process down with a non-zero status.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use mist_node::comms::bootstrap::Drivers;
use mist_node::comms::loopback::{LoopbackConfig, LoopbackDriver};
use mist_node::config::{self, Config};
use mist_node::error::AppError;
use mist_node::logger::{self, LogHandle};
use mist_node::mist::{MistExample, MistMiddleware};
use mist_node::signature::FileSignatureStore;
use mist_node::supervisor::{self, HaltPolicy, NodeServices, NodeSettings, Supervisor};

fn main() {
    // .env is optional.
    let _ = dotenvy::dotenv();

    let log = match logger::init_boot() {
        Ok(log) => log,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        major = env!("CARGO_PKG_VERSION_MAJOR"),
        minor = env!("CARGO_PKG_VERSION_MINOR"),
        patch = env!("CARGO_PKG_VERSION_PATCH"),
        "{} starting",
        env!("CARGO_PKG_NAME")
    );

    let worker = std::thread::Builder::new()
        .name("main".into())
        .spawn(move || node_main(log));

    match worker {
        Ok(handle) => {
            let code = worker_exit_code(handle.join());
            if code != 0 {
                std::process::exit(code);
            }
        }
        Err(e) => {
            eprintln!("error: cannot spawn main thread: {e}");
            std::process::exit(1);
        }
    }
}

/// Process exit code for a worker thread that returned.
fn worker_exit_code(joined: std::thread::Result<()>) -> i32 {
    match joined {
        Ok(()) => 0,
        Err(_) => {
            eprintln!("error: main thread panicked");
            1
        }
    }
}

fn node_main(log: LogHandle) {
    let result = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| AppError::Runtime(e.to_string()))
        .and_then(|rt| rt.block_on(run(log)));

    match result {
        Ok(()) => {}
        // Already logged by the supervisor; stay silent from here on.
        Err(AppError::Node(e)) if HaltPolicy::is_fatal(&e) => supervisor::halt(),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(log: LogHandle) -> Result<(), AppError> {
    let config = config::load()?;

    log.switch(&config.log_level, false, config.log_file.as_deref())?;

    info!(
        node = %config.node_name,
        channel = config.radio.channel,
        pan_id = format_args!("{:04X}", config.radio.pan_id),
        multi_hop = config.comms.multi_hop,
        signature = %config.signature_path.display(),
        "config loaded"
    );

    let services = build_services(&config)?;
    let supervisor = Supervisor::new(NodeSettings::from(&config), services);

    // Never cancelled: the node runs until power-cycle.
    let shutdown = CancellationToken::new();
    supervisor.run(shutdown).await?;
    Ok(())
}

fn build_services(config: &Config) -> Result<NodeServices, AppError> {
    let radio = Arc::new(LoopbackDriver::new(LoopbackConfig {
        start_delay: config.loopback.start_delay,
        ..Default::default()
    }));

    let drivers = if config.comms.multi_hop {
        multi_hop_drivers(radio)?
    } else {
        Drivers::single_hop(radio)
    };

    Ok(NodeServices {
        signature: Arc::new(FileSignatureStore::new(&config.signature_path)),
        drivers,
        middleware: Arc::new(MistMiddleware::new()),
        example: Arc::new(MistExample::new()),
    })
}

#[cfg(feature = "multi-hop")]
fn multi_hop_drivers(radio: Arc<LoopbackDriver>) -> Result<Drivers, AppError> {
    use mist_node::comms::mesh::MeshStackDriver;
    Ok(Drivers::multi_hop(radio, Arc::new(MeshStackDriver::new())))
}

#[cfg(not(feature = "multi-hop"))]
fn multi_hop_drivers(_radio: Arc<LoopbackDriver>) -> Result<Drivers, AppError> {
    Err(AppError::Config(
        "comms.multi_hop is set but this build lacks the `multi-hop` feature".into(),
    ))
}
