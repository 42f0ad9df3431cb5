use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use serlog::console::{self, Console};
use serlog::setup;
use serlog::{Cli, Clock, Session, WriterExit};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    // The local offset can only be determined reliably while the process is
    // still single threaded.
    let clock = Clock::local();
    let cli = Cli::parse();

    match run(&cli, clock) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, clock: Clock) -> anyhow::Result<()> {
    if cli.list {
        for port in setup::list_ports()? {
            println!("{port}");
        }
        return Ok(());
    }

    let port = match &cli.port {
        Some(port) => port.clone(),
        None => {
            let ports = setup::list_ports()?;
            setup::prompt_port(&ports, &mut std::io::stdin().lock(), &mut std::io::stdout())?
        }
    };
    let baud_rate = match cli.baud {
        Some(baud_rate) => baud_rate,
        None => setup::prompt_baud_rate(&mut std::io::stdin().lock(), &mut std::io::stdout())?,
    };

    let log_path = setup::log_file_path(&cli.log_dir, &port, clock.now())?;
    println!("Logging to file: {}", log_path.display());

    let config = cli.session_config(port, baud_rate, log_path);
    let session = Session::open(&config, clock, Console::stdout())
        .with_context(|| format!("unable to start session on {}", config.port))?;

    let shutdown = session.shutdown();
    ctrlc::set_handler(move || {
        if shutdown.request() {
            log::info!("interrupted, shutting down");
        }
    })
    .context("unable to install Ctrl-C handler")?;

    let summary = session.run(console::spawn_stdin_pump());
    log::info!(
        "session ended ({}), {} log entries written",
        summary.writer_exit,
        summary.entries_written
    );
    if let Some(e) = &summary.reader_error {
        log::warn!("device stopped responding during the session: {e}");
    }
    match summary.writer_exit {
        WriterExit::ConnectionLost | WriterExit::Panicked => {
            anyhow::bail!("session ended abnormally: {}", summary.writer_exit)
        }
        _ => Ok(()),
    }
}
