use std::io::{stdin, BufReader, IsTerminal};
use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use log::info;

use sqlexec_cli::config::{load_datasources, DEFAULT_CONFIG_DIR};
use sqlexec_cli::engine::Engine;
use sqlexec_cli::{server, session, trace};

#[derive(Debug, Parser)]
#[command(version, author, about = "SQL execution engine server and shell")]
pub struct Args {
    /// Serve the line protocol on this port; without it, run the shell.
    #[clap(short, long)]
    port: Option<u16>,

    #[clap(long, default_value = "127.0.0.1")]
    host: String,

    /// Directory holding datasources.json and logs/.
    #[clap(short = 'c', long = "config-dir", default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

    /// Debug log lines on or off.
    #[clap(long, default_value_t = true, action = clap::ArgAction::Set)]
    debug: bool,

    /// Force non-interactive mode even on a terminal.
    #[clap(short = 'n', long, default_value = "false")]
    non_interactive: bool,
}

/// Exit codes: 0 clean shutdown, 1 configuration error, 2 bind error.
#[tokio::main]
pub async fn main() {
    let args = Args::parse();

    let log_dir = args.config_dir.join("logs");
    let _log_guard = match trace::init(&log_dir, args.debug) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("cannot initialize logging: {}", err);
            None
        }
    };
    info!("sqlexec start args: {:?}", &args);

    let configs = match load_datasources(&args.config_dir) {
        Ok(configs) => configs,
        Err(err) => {
            eprintln!("configuration error: {:#}", err);
            exit(1);
        }
    };

    let engine = match Engine::open(configs) {
        Ok(engine) => Arc::new(engine),
        Err(err) => {
            eprintln!("configuration error: {}", err);
            exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        println!("received Ctrl+C!");
        r.store(false, Ordering::SeqCst);
    }) {
        log::warn!("cannot install Ctrl-C handler: {}", err);
    }

    if let Some(port) = args.port {
        if let Err(err) = server::serve(engine.clone(), &args.host, port, running).await {
            eprintln!("cannot bind {}:{}: {}", args.host, port, err);
            let _ = engine.close();
            exit(2);
        }
    } else {
        let is_repl = stdin().is_terminal() && !args.non_interactive;
        let mut session = session::Session::new(engine.clone(), is_repl, running);
        if is_repl {
            session.handle_repl().await;
        } else if let Err(err) = session.handle_reader(BufReader::new(stdin().lock())).await {
            eprintln!("error: {}", err);
        }
    }

    if let Err(err) = engine.close() {
        eprintln!("shutdown error: {}", err);
    }
    info!("sqlexec stopped");
}
