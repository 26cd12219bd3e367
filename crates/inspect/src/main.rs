//! uvc-inspect
//!
//! Dumps the video function of a USB camera: entity graph, video chains,
//! streaming formats and, for a live device, the control ranges.

mod report;
mod usb;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uvc_common::{DriverConfig, UsbId, load_config, setup_logging};
use uvc_driver::transport::NoStrings;
use uvc_driver::{ControlTransport, DeviceDescription};
use uvc_protocol::UsbSpeed;

#[derive(Parser, Debug)]
#[command(name = "uvc-inspect")]
#[command(author, version, about = "Inspect the video function of a USB camera")]
#[command(long_about = "
Parses the video class descriptors of a camera the way the host driver does
and prints what the driver would bind to.

EXAMPLES:
    # List cameras on the bus
    uvc-inspect list

    # Inspect a connected camera, including control ranges
    uvc-inspect device 046d:0825

    # Parse a saved configuration descriptor
    uvc-inspect dump config.bin --device 046d:0825 --speed high

    # Show the effective driver configuration
    uvc-inspect config
")]
struct Args {
    /// Driver configuration file (quirk overrides are taken from it)
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<String>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List devices with a video interface
    List,
    /// Inspect a connected device
    Device {
        /// vendor:product in hex
        id: UsbId,
        /// Skip the control queries
        #[arg(long)]
        no_controls: bool,
    },
    /// Parse a raw configuration descriptor from a file
    Dump {
        path: PathBuf,
        /// vendor:product used for the quirk lookup
        #[arg(long, default_value = "0000:0000")]
        device: UsbId,
        #[arg(long, value_enum, default_value_t = Speed::High)]
        speed: Speed,
    },
    /// Print the effective driver configuration
    Config,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Speed {
    Low,
    Full,
    High,
    Super,
    SuperPlus,
}

impl From<Speed> for UsbSpeed {
    fn from(speed: Speed) -> Self {
        match speed {
            Speed::Low => UsbSpeed::Low,
            Speed::Full => UsbSpeed::Full,
            Speed::High => UsbSpeed::High,
            Speed::Super => UsbSpeed::Super,
            Speed::SuperPlus => UsbSpeed::SuperPlus,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level).context("Failed to setup logging")?;

    let config = match &args.config {
        Some(path) => load_config(path).context("Failed to load configuration")?,
        None => DriverConfig::load_or_default(),
    };
    let overrides = config
        .quirk_overrides()
        .context("Invalid quirk override in configuration")?;

    match args.command {
        Command::List => {
            let devices = usb::list_video_devices()?;
            if args.json {
                let entries: Vec<_> = devices
                    .iter()
                    .map(|(id, bus, address)| {
                        serde_json::json!({ "device": id, "bus": bus, "address": address })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if devices.is_empty() {
                println!("No video devices found");
            } else {
                for (id, bus, address) in devices {
                    println!("{}  bus {:03} address {:03}", id, bus, address);
                }
            }
        }
        Command::Device { id, no_controls } => {
            let (description, camera) = usb::open(id)?;
            let camera = Arc::new(camera);
            let control = (!no_controls).then(|| camera.clone() as Arc<dyn ControlTransport>);
            let report = report::build(&description, camera.as_ref(), &overrides, control)?;
            print_report(&report, args.json)?;
        }
        Command::Dump { path, device, speed } => {
            let raw = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            info!("Read {} bytes from {}", raw.len(), path.display());
            let description = DeviceDescription::from_configuration(device, speed.into(), &raw)
                .context("Failed to parse configuration descriptor")?;
            let report = report::build(&description, &NoStrings, &overrides, None)?;
            print_report(&report, args.json)?;
        }
        Command::Config => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", config.to_toml()?);
            }
        }
    }

    Ok(())
}

fn print_report(report: &report::Report, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report::render(report));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_dump_arguments() {
        let args = Args::try_parse_from([
            "uvc-inspect",
            "--json",
            "dump",
            "config.bin",
            "--device",
            "046d:0825",
            "--speed",
            "super-plus",
        ])
        .unwrap();
        assert!(args.json);
        match args.command {
            Command::Dump { device, speed, .. } => {
                assert_eq!(device, UsbId::new(0x046d, 0x0825));
                assert_eq!(UsbSpeed::from(speed), UsbSpeed::SuperPlus);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_dump_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.bin");
        let raw = uvc_common::test_utils::concat(&[
            vec![9, 2, 0, 0, 1, 1, 0, 0x80, 250],
            vec![9, 4, 0, 0, 0, 0x0e, 1, 0, 0],
            uvc_common::test_utils::simple_camera_control_interface(0x0100),
        ]);
        std::fs::write(&path, &raw).unwrap();

        let data = std::fs::read(&path).unwrap();
        let description =
            DeviceDescription::from_configuration(UsbId::new(0, 0), UsbSpeed::Full, &data).unwrap();
        let report = report::build(&description, &NoStrings, &[], None).unwrap();
        assert_eq!(report.chains.len(), 1);
        assert!(report.streams.is_empty());
    }
}
