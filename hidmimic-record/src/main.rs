use anyhow::{Context, bail};
use clap::Parser;
use hidmimic::{LinuxBackend, RecordingWriter};
use hidmimic::hidraw::{self, AttachedDevice, ReportReader};
use std::fs::File;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Record a HID device", long_about = None)]
struct Args {
    /// Path to the hidraw device node
    #[arg(value_name = "/dev/hidrawX")]
    device: Option<PathBuf>,

    /// The file to record to (default: stdout)
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let dev_root = LinuxBackend::from_env().dev_root;

    let path = match args.device {
        Some(path) => path,
        None => select_device(&dev_root)?,
    };
    let device = AttachedDevice::open(&path)?;

    let out: Box<dyn Write> = match &args.output {
        Some(file) => Box::new(
            File::create(file).with_context(|| format!("Failed to create {}", file.display()))?,
        ),
        None => Box::new(io::stdout()),
    };
    let mut writer = RecordingWriter::new(out);
    writer.write_device(&device.descriptor(0)?)?;
    info!("Recording {}, press Ctrl-C to stop", device.summary_line());

    let reader = ReportReader::new(&device)?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    // The first report defines time zero
    let mut start: Option<Instant> = None;
    let mut count = 0usize;
    loop {
        tokio::select! {
            report = reader.read_report() => {
                let report = report.with_context(|| format!("Reading {} failed", path.display()))?;
                let now = Instant::now();
                let start = *start.get_or_insert(now);
                writer.write_event(0, now - start, &report)?;
                count += 1;
            }
            _ = &mut ctrl_c => break,
        }
    }
    info!("Recorded {} events", count);
    Ok(())
}

/// List the hidraw nodes and ask which one to record
fn select_device(dev_root: &Path) -> anyhow::Result<PathBuf> {
    let mut out: Box<dyn Write> = if io::stdout().is_terminal() {
        Box::new(io::stdout())
    } else {
        Box::new(io::stderr())
    };

    let devices = hidraw::open_all(&hidraw::enumerate(dev_root)?);
    let numbers: Vec<u32> = devices
        .iter()
        .filter_map(|device| {
            device
                .path
                .file_name()?
                .to_str()?
                .strip_prefix("hidraw")?
                .parse()
                .ok()
        })
        .collect();
    let (Some(lo), Some(hi)) = (numbers.iter().min(), numbers.iter().max()) else {
        bail!("No hidraw device available");
    };

    writeln!(out, "Available devices:")?;
    for device in &devices {
        writeln!(out, "{}:\t{}", device.path.display(), device.name)?;
    }
    write!(out, "Select the device event number [{}-{}]: ", lo, hi)?;
    out.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    match line.trim().parse::<u32>() {
        Ok(num) if (*lo..=*hi).contains(&num) => Ok(dev_root.join(format!("hidraw{}", num))),
        _ => bail!("Invalid device"),
    }
}
