use clap::Parser;
use hidmimic::{IdentityFilter, LinuxBackend};
use hidmimic::hidraw::{self, AttachedDevice};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "List HID devices", long_about = None)]
struct Args {
    /// Display detailed information about the devices shown, including
    /// their report descriptors
    #[arg(short, long)]
    verbose: bool,

    /// Show only /dev/hidraw<devnum>
    #[arg(short = 's', value_name = "devnum")]
    devnum: Option<u32>,

    /// Show only devices with the given bus (decimal) and/or vendor and
    /// product ID (hexadecimal)
    #[arg(short = 'd', value_name = "[[bus]:][vendor]:[product]")]
    filter: Option<IdentityFilter>,

    /// Do not scan /dev, show only the device whose file is given
    #[arg(short = 'D', value_name = "/dev/hidrawX")]
    file: Option<PathBuf>,

    /// Print the devices as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns false when no device is left to show
fn run(args: &Args) -> anyhow::Result<bool> {
    let dev_root = LinuxBackend::from_env().dev_root;

    let devices = if let Some(devnum) = args.devnum {
        hidraw::open_all(&[dev_root.join(format!("hidraw{}", devnum))])
    } else if let Some(file) = &args.file {
        hidraw::open_all(std::slice::from_ref(file))
    } else {
        let mut devices = hidraw::open_all(&hidraw::enumerate(&dev_root)?);
        // Only a scan is filtered; explicit devices are always shown
        if let Some(filter) = &args.filter {
            devices.retain(|device| filter.matches(&device.identity()));
        }
        devices
    };
    if devices.is_empty() {
        return Ok(false);
    }

    if args.json {
        let summaries = devices
            .iter()
            .map(|device| device.summary(args.verbose))
            .collect::<hidmimic::Result<Vec<_>>>()?;
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(true);
    }

    for (n, device) in devices.iter().enumerate() {
        if args.verbose && n > 0 {
            println!();
        }
        print_device(device, args.verbose)?;
    }
    Ok(true)
}

fn print_device(device: &AttachedDevice, verbose: bool) -> anyhow::Result<()> {
    println!("{}", device.summary_line());
    if verbose {
        println!("Report Descriptor:");
        println!("{}", hidraw::dump_bytes(device.report_descriptor()?, "  "));
    }
    Ok(())
}
