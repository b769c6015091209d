//! kitedb server entry point.

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kite_engine::MemEngine;
use kite_net::{NetworkServer, ProcMap, ServerOptions};
use kite_store::Store;
use kitedb::{Config, DbServer};

#[derive(Parser, Debug)]
#[command(name = "kitedb-server", version, about = "kitedb server")]
struct Args {
    /// Accepted for compatibility; the process stays in the foreground.
    #[arg(short = 'd')]
    daemon: bool,

    /// Path to the JSON configuration file.
    conf: PathBuf,

    /// Lifecycle command: only `start` is supported.
    #[arg(short = 's')]
    command: Option<String>,
}

static SHUTDOWN: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn handle_signal(_sig: libc::c_int) {
    if let Some(flag) = SHUTDOWN.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        libc::signal(
            libc::SIGINT,
            handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGTERM,
            handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
    }
}

fn main() {
    let args = Args::parse();

    if let Some(command) = &args.command {
        if command != "start" {
            eprintln!("unsupported -s command: {}", command);
            process::exit(1);
        }
    }

    let config = match Config::load(&args.conf) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let filter = EnvFilter::try_new(&config.log.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.daemon {
        warn!("-d is accepted but daemonization is not performed");
    }

    let store = if config.binlog.capacity > 0 {
        Store::open_with_capacity(Arc::new(MemEngine::new()), config.binlog.capacity)
    } else {
        Store::open(Arc::new(MemEngine::new()))
    };
    let meta = Store::open_meta(Arc::new(MemEngine::new()));

    let serv = match DbServer::new(store, meta, &config) {
        Ok(serv) => Arc::new(serv),
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let mut proc_map = ProcMap::new();
    DbServer::register(&mut proc_map);

    let opts = ServerOptions {
        ip: config.server.ip.clone(),
        port: config.server.port,
        readers: config.server.readers,
        writers: config.server.writers,
        password: if config.server.auth.is_empty() {
            None
        } else {
            Some(config.server.auth.clone())
        },
        allow: config.server.allow.clone(),
        deny: config.server.deny.clone(),
    };

    let mut server = match NetworkServer::bind(opts, Arc::clone(&serv), proc_map) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let _ = SHUTDOWN.set(server.shutdown_handle());
    install_signal_handlers();

    info!(version = kitedb::VERSION, "kitedb-server starting");
    if let Err(e) = server.serve() {
        eprintln!("server error: {}", e);
        process::exit(1);
    }

    serv.stop_slaves();
    info!("kitedb-server stopped");
}
