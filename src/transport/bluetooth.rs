//! # Bluetooth RFCOMM Transport
//!
//! This module provides communication with Peripage printers over the
//! Bluetooth Serial Port Profile (SPP) via RFCOMM.
//!
//! ## Bluetooth Setup (Linux)
//!
//! Before using this transport, the printer must be paired. The connector
//! accepts either an RFCOMM device path or the printer's MAC address:
//!
//! ```bash
//! # 1. Find the printer's Bluetooth address
//! $ bluetoothctl
//! [bluetooth]# scan on
//! # Look for "PeriPage+XXXX"
//!
//! # 2. Pair with the printer
//! [bluetooth]# pair 04:7F:0E:XX:XX:XX
//!
//! # 3. Bind to an RFCOMM device (or let `peripage bind` do it)
//! $ sudo rfcomm bind 0 04:7F:0E:XX:XX:XX 1
//! ```
//!
//! Given a MAC, the connector looks up an existing `/dev/rfcommN` binding and,
//! if `bind_channel` is set, creates one.
//!
//! ## TTY Configuration
//!
//! The RFCOMM device is opened in raw mode so binary data is transmitted
//! without modification:
//!
//! - **No input processing**: Disable IGNBRK, BRKINT, PARMRK, ISTRIP, etc.
//! - **No output processing**: Disable OPOST (no CR/LF translation)
//! - **8-bit characters**: CS8 (8 data bits, no parity)
//! - **No echo**: Disable ECHO, ECHONL
//! - **Non-canonical mode**: Disable ICANON (no line buffering)
//!
//! Reads wait with `poll(2)` so every read honours its timeout.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use super::{Channel, ChannelError, Connector};

/// Default RFCOMM device path
pub const DEFAULT_DEVICE: &str = "/dev/rfcomm0";

/// RFCOMM channel the printer's SPP service listens on
const SPP_CHANNEL: &str = "1";

/// Largest single read from the tty
const READ_BUFFER: usize = 512;

/// # RFCOMM Connector
///
/// Resolves an address (device path or MAC) to an open [`RfcommChannel`].
///
/// ## Example
///
/// ```no_run
/// use peripage::transport::{Connector, RfcommConnector};
///
/// let mut connector = RfcommConnector::default();
/// let channel = connector.open("04:7F:0E:B0:CA:57")?;
/// # Ok::<(), peripage::transport::ChannelError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct RfcommConnector {
    /// Create `/dev/rfcommN` for a MAC with no binding yet (requires root)
    pub bind_channel: Option<u8>,
}

impl Connector for RfcommConnector {
    fn open(&mut self, address: &str) -> Result<Box<dyn Channel>, ChannelError> {
        let device = self.resolve(address)?;
        tracing::debug!(address, device = %device, "opening rfcomm device");
        Ok(Box::new(RfcommChannel::open(&device)?))
    }
}

impl RfcommConnector {
    fn resolve(&self, address: &str) -> Result<String, ChannelError> {
        if !is_valid_mac(address) {
            return Ok(address.to_string());
        }

        if let Some(device) = find_rfcomm_for_mac(address)? {
            return Ok(device);
        }

        match self.bind_channel {
            Some(channel) => setup_rfcomm(address, channel),
            None => Err(ChannelError::Refused(format!(
                "no rfcomm device bound to {} (run `peripage bind {}`)",
                address, address
            ))),
        }
    }
}

/// # Bluetooth Printer Channel
///
/// An open RFCOMM tty configured for raw binary I/O.
pub struct RfcommChannel {
    file: Option<File>,
    path: String,
}

impl RfcommChannel {
    /// Open an RFCOMM device.
    ///
    /// ## Errors
    ///
    /// - [`ChannelError::Timeout`] if the radio connect timed out
    /// - [`ChannelError::Refused`] if the device doesn't exist, permission
    ///   is denied, the printer is off, or TTY configuration fails
    pub fn open<P: AsRef<Path>>(device: P) -> Result<Self, ChannelError> {
        let path = device.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::TimedOut => ChannelError::Timeout,
                _ => ChannelError::Refused(format!("Failed to open {}: {}", path.display(), e)),
            })?;

        configure_tty_raw(&file)
            .map_err(|e| ChannelError::Refused(format!("tty setup failed: {}", e)))?;

        Ok(Self {
            file: Some(file),
            path: path.display().to_string(),
        })
    }

    fn file(&mut self) -> Result<&mut File, ChannelError> {
        let path = &self.path;
        self.file
            .as_mut()
            .ok_or_else(|| ChannelError::LinkDropped(format!("{} is closed", path)))
    }
}

impl Channel for RfcommChannel {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, ChannelError> {
        let file = self.file()?;
        let n = file.write(bytes).map_err(link_error)?;
        file.flush().map_err(link_error)?;
        Ok(n)
    }

    fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, ChannelError> {
        let file = self.file()?;
        wait_readable(file, timeout)?;

        let mut buf = [0u8; READ_BUFFER];
        match file.read(&mut buf) {
            Ok(0) => Err(ChannelError::LinkDropped("end of stream".to_string())),
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(ChannelError::Timeout),
            Err(e) => Err(link_error(e)),
        }
    }

    fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
            tracing::debug!(device = %self.path, "closed rfcomm device");
        }
    }
}

impl Drop for RfcommChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Any I/O failure on an established radio link means the link is gone.
fn link_error(e: io::Error) -> ChannelError {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ChannelError::Timeout,
        _ => ChannelError::LinkDropped(e.to_string()),
    }
}

/// Block until the tty has data or `timeout` elapses. Signals that
/// interrupt the wait do not shorten it.
#[cfg(unix)]
fn wait_readable(file: &File, timeout: Duration) -> Result<(), ChannelError> {
    use std::os::unix::io::AsRawFd;

    let deadline = Instant::now() + timeout;
    let mut pfd = libc::pollfd {
        fd: file.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let timeout_ms = remaining.as_millis().min(i32::MAX as u128) as i32;

        pfd.revents = 0;
        let result = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                tracing::trace!("poll interrupted, resuming");
                continue;
            }
            return Err(ChannelError::LinkDropped(format!("poll failed: {}", err)));
        }
        if result == 0 {
            return Err(ChannelError::Timeout);
        }
        if pfd.revents & libc::POLLIN == 0 && pfd.revents & (libc::POLLHUP | libc::POLLERR) != 0 {
            return Err(ChannelError::LinkDropped("hang-up on rfcomm device".to_string()));
        }
        return Ok(());
    }
}

#[cfg(not(unix))]
fn wait_readable(_file: &File, _timeout: Duration) -> Result<(), ChannelError> {
    Ok(())
}

/// Configure a file descriptor for raw TTY mode.
///
/// ## What Gets Disabled
///
/// - **Input flags**: IGNBRK, BRKINT, PARMRK, ISTRIP, INLCR, IGNCR, ICRNL, IXON, IXOFF, IXANY
/// - **Output flags**: OPOST
/// - **Local flags**: ECHO, ECHONL, ICANON, ISIG, IEXTEN
/// - **Control flags**: CSIZE, PARENB (then CS8 is set)
///
/// IXON/IXOFF must be off: 0x11 and 0x13 appear in raster data and in the
/// vendor query bytes.
#[cfg(unix)]
fn configure_tty_raw(file: &File) -> io::Result<()> {
    use std::mem::MaybeUninit;
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();

    let mut termios = MaybeUninit::uninit();
    if unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let mut termios = unsafe { termios.assume_init() };

    termios.c_iflag &= !(libc::IGNBRK
        | libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON
        | libc::IXOFF
        | libc::IXANY);
    termios.c_oflag &= !libc::OPOST;
    termios.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);
    termios.c_cflag &= !(libc::CSIZE | libc::PARENB);
    termios.c_cflag |= libc::CS8;

    // Reads return whatever is buffered; poll() does the waiting
    termios.c_cc[libc::VMIN] = 0;
    termios.c_cc[libc::VTIME] = 0;

    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) } != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

#[cfg(not(unix))]
fn configure_tty_raw(_file: &File) -> io::Result<()> {
    Ok(())
}

// ============================================================================
// RFCOMM SETUP HELPERS
// ============================================================================

/// Validate a Bluetooth MAC address format (XX:XX:XX:XX:XX:XX).
pub fn is_valid_mac(mac: &str) -> bool {
    let parts: Vec<&str> = mac.split(':').collect();
    if parts.len() != 6 {
        return false;
    }
    parts
        .iter()
        .all(|part| part.len() == 2 && part.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Find an existing RFCOMM device bound to the given MAC address.
///
/// Checks `/proc/net/rfcomm` and falls back to the `rfcomm -a` command.
pub fn find_rfcomm_for_mac(mac: &str) -> Result<Option<String>, ChannelError> {
    let mac_upper = mac.to_uppercase();

    if let Ok(contents) = fs::read_to_string("/proc/net/rfcomm")
        && let Some(device) = device_for_mac(&contents, &mac_upper)
    {
        return Ok(Some(device));
    }

    let output = match Command::new("rfcomm").arg("-a").output() {
        Ok(output) => output,
        // No bluez tools installed: nothing can be bound either
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ChannelError::Refused(format!(
                "Failed to run 'rfcomm -a': {}",
                e
            )));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(device_for_mac(&stdout, &mac_upper))
}

/// Scan `rfcommN: XX:XX:... channel N ...` lines for a MAC.
fn device_for_mac(listing: &str, mac_upper: &str) -> Option<String> {
    listing
        .lines()
        .filter(|line| line.to_uppercase().contains(mac_upper))
        .filter_map(|line| line.split(':').next())
        .map(|name| format!("/dev/{}", name.trim()))
        .find(|path| Path::new(path).exists())
}

/// Set up an RFCOMM device for a Bluetooth MAC address.
///
/// Runs:
/// 1. `bluetoothctl connect <MAC>` - connect to device
/// 2. `l2ping -c 1 <MAC>` - verify connectivity
/// 3. `rfcomm bind <channel> <MAC> 1` - create /dev/rfcommN
///
/// **Requires root privileges** for `rfcomm bind`.
pub fn setup_rfcomm(mac: &str, channel: u8) -> Result<String, ChannelError> {
    let mac_upper = mac.to_uppercase();
    let device_path = format!("/dev/rfcomm{}", channel);

    tracing::info!(mac = %mac_upper, "connecting via bluetoothctl");
    let output = run("bluetoothctl", &["connect", &mac_upper])?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !(stdout.contains("Connection successful") || stdout.contains("already connected")) {
        // l2ping below is the real check
        tracing::warn!(output = %stdout.trim(), "bluetoothctl did not confirm connection");
    }

    thread::sleep(Duration::from_millis(500));

    let output = run("l2ping", &["-c", "1", &mac_upper])?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ChannelError::Refused(format!(
            "Device {} not reachable: {}",
            mac_upper,
            stderr.trim()
        )));
    }

    tracing::info!(device = %device_path, "binding rfcomm");
    let output = run(
        "rfcomm",
        &["bind", &channel.to_string(), &mac_upper, SPP_CHANNEL],
    )?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ChannelError::Refused(format!(
            "rfcomm bind failed: {}",
            stderr.trim()
        )));
    }

    thread::sleep(Duration::from_millis(500));

    if !Path::new(&device_path).exists() {
        return Err(ChannelError::Refused(format!(
            "Device {} was not created",
            device_path
        )));
    }

    Ok(device_path)
}

fn run(program: &str, args: &[&str]) -> Result<std::process::Output, ChannelError> {
    Command::new(program)
        .args(args)
        .output()
        .map_err(|e| ChannelError::Refused(format!("Failed to run {}: {}", program, e)))
}

// ============================================================================
// TESTS
// ============================================================================
