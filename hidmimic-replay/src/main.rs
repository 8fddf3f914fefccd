use anyhow::Context;
use clap::Parser;
use hidmimic::manager::READY_POLL;
use hidmimic::{DeviceManager, LinuxBackend, ProfileRegistry, ReplayScheduler, Session};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay a HID recording through uhid", long_about = None)]
struct Args {
    /// Path to device recording
    #[arg(value_name = "recording.hid")]
    recording: PathBuf,

    /// Show debugging information
    #[arg(long)]
    verbose: bool,

    /// Longest real pause between two events, in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 2.0)]
    max_gap: f64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let denied = e
                .downcast_ref::<hidmimic::Error>()
                .is_some_and(hidmimic::Error::is_permission_denied);
            if denied {
                eprintln!("Insufficient permissions, please run me as root.");
            } else {
                error!("{:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let session = Session::from_path(&args.recording)
        .with_context(|| format!("Failed to load {}", args.recording.display()))?;
    let max_gap = Duration::try_from_secs_f64(args.max_gap)
        .context("--max-gap must be a non-negative number of seconds")?;
    info!(
        "Loaded {} device(s) and {} events from {}",
        session.devices.len(),
        session.events.len(),
        args.recording.display()
    );

    let registry = ProfileRegistry::builtin();
    let mut manager = DeviceManager::new(LinuxBackend::from_env());

    let outcome = tokio::select! {
        result = replay(&mut manager, &session, &registry, max_gap) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };
    manager.destroy_all();
    outcome
}

async fn replay(
    manager: &mut DeviceManager<LinuxBackend>,
    session: &Session,
    registry: &ProfileRegistry,
    max_gap: Duration,
) -> anyhow::Result<()> {
    manager.create_session(session, registry)?;
    info!("Waiting for the kernel to bind {} device(s)", manager.len());
    manager.wait_until_ready(READY_POLL).await?;

    let mut enter = spawn_line_reader();
    let mut scheduler = ReplayScheduler::new(max_gap);
    loop {
        let again = if scheduler.passes() == 0 { "" } else { "re" };
        print!("Hit enter to {}start replaying the events", again);
        std::io::stdout().flush()?;

        // Keep answering the kernel while waiting for the user
        tokio::select! {
            line = enter.recv() => {
                if line.is_none() {
                    info!("End of input, stopping");
                    return Ok(());
                }
            }
            result = manager.pump_forever() => result?,
        }
        scheduler.inject_events(manager, session).await?;
    }
}

/// Read stdin lines on a plain thread. Tokio's stdin would keep the
/// runtime from shutting down while a read is pending.
fn spawn_line_reader() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx.send(()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}
