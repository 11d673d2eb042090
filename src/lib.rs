//! # Peripage - Thermal Printer Library
//!
//! Peripage is a Rust library for printing on Peripage thermal printers
//! via Bluetooth. It provides:
//!
//! - **Rendering**: Image files and QR codes to dithered 1-bit rasters
//! - **Encoding**: Rasters to Peripage command frames and link-sized packets
//! - **Transport**: A Bluetooth RFCOMM session with flow control and retries
//! - **Jobs**: End-to-end prints with progress, cancellation and a job queue
//!
//! ## Quick Start
//!
//! ```no_run
//! use peripage::{
//!     job::{JobControl, PrintJobController},
//!     printer::PrinterModel,
//!     render::{BitmapSource, DitheringAlgorithm},
//!     transport::{RfcommConnector, Session, SessionConfig},
//!     config::PeripageConfig,
//! };
//!
//! let config = PeripageConfig {
//!     printer: PrinterModel::A6_PLUS,
//!     ..Default::default()
//! };
//!
//! // Dither a photo to the printer's width
//! let source = BitmapSource::new(config.printer, DitheringAlgorithm::FloydSteinberg);
//! let raster = source.load_bitmap("photo.jpg")?;
//!
//! // Connect and handshake
//! let mut session = Session::new(SessionConfig::default())?;
//! session.connect(&mut RfcommConnector::default(), "/dev/rfcomm0")?;
//!
//! // Print and disconnect
//! let job = PrintJobController::from_config(&config)
//!     .print_image(&raster, &mut session, &JobControl::new());
//! assert!(job.is_success());
//! session.finish()?;
//!
//! # Ok::<(), peripage::PeripageError>(())
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`render`] | Bitmap loading, QR rendering and dithering |
//! | [`encode`] | Command frames and packet chunking |
//! | [`protocol`] | Peripage command builders |
//! | [`transport`] | Channels and the printer session |
//! | [`job`] | Print jobs and the per-printer job queue |
//! | [`printer`] | Printer models |
//! | [`config`] | TOML configuration |
//! | [`error`] | Error types |
//!
//! ## Supported Printers
//!
//! - Peripage A6 (384 dots)
//! - Peripage A6+ (576 dots)
//! - Peripage A40 / A40+ (1728 / 1848 dots)

pub mod config;
pub mod encode;
pub mod error;
pub mod job;
pub mod printer;
pub mod protocol;
pub mod render;
pub mod transport;

// Re-exports for convenience
pub use error::PeripageError;
pub use printer::PrinterModel;
pub use transport::Session;
