//! # Peripage CLI
//!
//! Command-line interface for Peripage thermal printers.
//!
//! ## Usage
//!
//! ```bash
//! # Print a photo on an A6+ bound to /dev/rfcomm0
//! peripage print-image photo.jpg
//!
//! # Print a QR code on an A6 by MAC address, darker
//! peripage print-qr "https://example.com" --device 04:7F:0E:B0:CA:57 --model a6 --density dark
//!
//! # Print text in the built-in font; "-" reads stdin
//! peripage print-text "Shopping list:" --model a40
//! fortune | peripage print-text -
//!
//! # Save the dithered raster instead of printing
//! peripage print-image photo.jpg --png preview.png
//!
//! # Show name, firmware, battery, ...
//! peripage info
//!
//! # Bind a paired printer to /dev/rfcomm0 (needs root)
//! sudo peripage bind 04:7F:0E:B0:CA:57
//! ```
//!
//! Set `RUST_LOG=peripage=debug` to see every packet.

use std::io::{Read, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use peripage::{
    PeripageError, PrinterModel, Session,
    config::PeripageConfig,
    job::{Payload, PrintJobController, SessionHandle},
    protocol::commands::{DeviceQuery, Density},
    render::{BitmapSource, DitheringAlgorithm, MonochromeRaster, source::DEFAULT_QR_SIZE},
    transport::{AckMode, RfcommConnector, bluetooth},
};

/// Peripage - Bluetooth thermal printer utility
#[derive(Parser, Debug)]
#[command(name = "peripage")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print an image file
    PrintImage {
        /// Image to print (PNG, JPEG, GIF, BMP, ...)
        file: PathBuf,

        #[command(flatten)]
        printer: PrinterArgs,
    },

    /// Print a QR code
    PrintQr {
        /// Text or URL to encode
        payload: String,

        /// QR code size in pixels before fitting to the paper
        #[arg(long, default_value_t = DEFAULT_QR_SIZE)]
        size: u32,

        #[command(flatten)]
        printer: PrinterArgs,
    },

    /// Print plain text in the printer's built-in font
    PrintText {
        /// Text to print, or "-" to read stdin
        text: String,

        #[command(flatten)]
        printer: PrinterArgs,
    },

    /// Query printer properties
    Info {
        #[command(flatten)]
        printer: PrinterArgs,
    },

    /// Bind a paired printer's MAC address to an RFCOMM device
    Bind {
        /// Bluetooth MAC address (XX:XX:XX:XX:XX:XX)
        mac: String,

        /// RFCOMM device number (/dev/rfcommN)
        #[arg(long, default_value_t = 0)]
        channel: u8,
    },
}

/// Options shared by every command that talks to a printer.
#[derive(Args, Debug)]
struct PrinterArgs {
    /// TOML config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// RFCOMM device path or MAC address [default: /dev/rfcomm0]
    #[arg(long)]
    device: Option<String>,

    /// Printer model: a6, a6+, a40, a40+
    #[arg(long)]
    model: Option<String>,

    #[arg(long, value_enum)]
    density: Option<DensityArg>,

    #[arg(long, value_enum)]
    dither: Option<DitherArg>,

    /// Link MTU including the 4-byte link header
    #[arg(long)]
    mtu: Option<usize>,

    /// Packets in flight before waiting (with --ack explicit)
    #[arg(long)]
    window: Option<usize>,

    /// Rejections of one packet before giving up
    #[arg(long)]
    retries: Option<u32>,

    #[arg(long, value_enum)]
    ack: Option<AckArg>,

    /// Run-length compress raster bands
    #[arg(long)]
    compress: bool,

    /// Blank rows fed after the image
    #[arg(long)]
    feed: Option<u8>,

    /// Write the dithered raster to a PNG instead of printing
    #[arg(long, value_name = "FILE")]
    png: Option<PathBuf>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DensityArg {
    Light,
    Normal,
    Dark,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DitherArg {
    FloydSteinberg,
    Bayer,
    Threshold,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum AckArg {
    Implicit,
    Explicit,
}

impl PrinterArgs {
    /// Config file (or defaults) with command-line overrides applied.
    fn resolve(&self) -> Result<PeripageConfig, PeripageError> {
        let mut config = match &self.config {
            Some(path) => PeripageConfig::load(path)?,
            None => PeripageConfig::default(),
        };

        if let Some(device) = &self.device {
            config.address = Some(device.clone());
        }
        if let Some(model) = &self.model {
            config.printer = PrinterModel::by_name(model)?;
        }
        if let Some(density) = self.density {
            config.encode.density = match density {
                DensityArg::Light => Density::Light,
                DensityArg::Normal => Density::Normal,
                DensityArg::Dark => Density::Dark,
            };
        }
        if let Some(dither) = self.dither {
            config.dithering = match dither {
                DitherArg::FloydSteinberg => DitheringAlgorithm::FloydSteinberg,
                DitherArg::Bayer => DitheringAlgorithm::Bayer,
                DitherArg::Threshold => DitheringAlgorithm::Threshold,
            };
        }
        if let Some(mtu) = self.mtu {
            config.link.mtu = mtu;
        }
        if let Some(window) = self.window {
            config.session.window = window;
        }
        if let Some(retries) = self.retries {
            config.session.retries = retries;
        }
        if let Some(ack) = self.ack {
            config.session.ack_mode = match ack {
                AckArg::Implicit => AckMode::Implicit,
                AckArg::Explicit => AckMode::Explicit,
            };
        }
        if self.compress {
            config.encode.compress = true;
        }
        if let Some(feed) = self.feed {
            config.encode.feed_rows = feed;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), PeripageError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::PrintImage { file, printer } => {
            let config = printer.resolve()?;
            let source = BitmapSource::new(config.printer, config.dithering);
            let raster = source.load_bitmap(&file)?;
            output(raster, &config, printer.png)
        }

        Commands::PrintQr {
            payload,
            size,
            printer,
        } => {
            let config = printer.resolve()?;
            let source = BitmapSource::new(config.printer, config.dithering);
            let raster = source.render_qr(&payload, size)?;
            output(raster, &config, printer.png)
        }

        Commands::PrintText { text, printer } => {
            if printer.png.is_some() {
                return Err(PeripageError::Job("--png only applies to images".to_string()));
            }
            let config = printer.resolve()?;
            let text = if text == "-" {
                let mut input = String::new();
                std::io::stdin().read_to_string(&mut input)?;
                input
            } else {
                text
            };
            print(Payload::Text(text), &config)
        }

        Commands::Info { printer } => {
            let config = printer.resolve()?;
            let mut session = connect(&config)?;

            println!("Printer:  {}", session.identity().unwrap_or("?"));
            for (label, query) in [
                ("Serial", DeviceQuery::SerialNumber),
                ("Firmware", DeviceQuery::Firmware),
                ("Hardware", DeviceQuery::Hardware),
                ("IP", DeviceQuery::Ip),
            ] {
                let reply = session.query(query)?;
                println!("{:<9} {}", format!("{}:", label), DeviceQuery::decode_text(&reply));
            }

            let mac = session.query(DeviceQuery::Mac)?;
            let mac: Vec<String> = mac.iter().take(6).map(|b| format!("{:02X}", b)).collect();
            println!("MAC:      {}", mac.join(":"));

            let battery = session.query(DeviceQuery::Battery)?;
            match DeviceQuery::decode_battery(&battery) {
                Some(level) => println!("Battery:  {}%", level),
                None => println!("Battery:  ?"),
            }

            session.finish()?;
            Ok(())
        }

        Commands::Bind { mac, channel } => {
            if !bluetooth::is_valid_mac(&mac) {
                return Err(PeripageError::Job(format!("invalid MAC address '{}'", mac)));
            }
            let device = match bluetooth::find_rfcomm_for_mac(&mac).map_err(channel_error)? {
                Some(device) => device,
                None => bluetooth::setup_rfcomm(&mac, channel).map_err(channel_error)?,
            };
            println!("{} is bound to {}", mac.to_uppercase(), device);
            Ok(())
        }
    }
}

fn channel_error(e: peripage::transport::ChannelError) -> PeripageError {
    PeripageError::Job(format!("bind failed: {}", e))
}

fn connect(config: &PeripageConfig) -> Result<Session, PeripageError> {
    let address = config
        .address
        .clone()
        .unwrap_or_else(|| bluetooth::DEFAULT_DEVICE.to_string());

    let mut connector = RfcommConnector::default();
    let mut session = Session::new(config.session.clone())?;
    session.connect(&mut connector, &address)?;
    Ok(session)
}

/// Print the raster, or save it when `png` is given.
fn output(
    raster: MonochromeRaster,
    config: &PeripageConfig,
    png: Option<PathBuf>,
) -> Result<(), PeripageError> {
    if let Some(path) = png {
        let image = image::GrayImage::from_fn(raster.width(), raster.height(), |x, y| {
            image::Luma([if raster.pixel(x, y) { 0 } else { 255 }])
        });
        image
            .save(&path)
            .map_err(|e| PeripageError::Image(format!("Failed to save PNG: {}", e)))?;
        println!("Saved {}x{} raster to {}", raster.width(), raster.height(), path.display());
        return Ok(());
    }

    print(Payload::Raster(raster), config)
}

/// Run one job on a fresh session and wait for it.
fn print(payload: Payload, config: &PeripageConfig) -> Result<(), PeripageError> {
    let session = connect(config)?;
    let handle = SessionHandle::spawn(session, PrintJobController::from_config(config), config.queue);

    let id = handle.submit_job(payload)?;
    if let Some(progress) = handle.subscribe_progress(id) {
        for update in progress {
            eprint!("\rPrinting... {:>3.0}%", update.fraction() * 100.0);
            let _ = std::io::stderr().flush();
        }
        eprintln!();
    }

    let job = handle
        .wait(id)
        .ok_or_else(|| PeripageError::Job(format!("{} vanished", id)))?;
    let mut session = handle.shutdown()?;

    if !job.is_success() {
        return Err(PeripageError::Job(format!("{} ended with {:?}", id, job.result)));
    }

    session.finish()?;
    println!("Printed {} bytes", job.bytes_acked);
    Ok(())
}
