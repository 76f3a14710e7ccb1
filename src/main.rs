// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// XMODEM sender
mod checksum;
mod config;
mod packet;
mod progress;
mod protocol;
mod serial;
mod session;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use serialport::{DataBits, Parity, StopBits};
use config::{SessionConfig, Target};
use progress::{BarReporter, LogReporter, ProgressReporter};
use serial::RealSerialPort;
use session::{TransferError, TransferSession};

#[derive(Parser)]
#[command(name = "xmsend")]
#[command(about = "Send a binary image to a serial device using the XMODEM protocol", long_about = None)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name="BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name="BITS")]
    stop_bits: u8,

    /// Receiving end; picks the default delay between bytes
    #[arg(long, value_enum, default_value = "fpga")]
    target: Target,

    /// Delay in milliseconds between sending each byte of a packet (overrides --target)
    #[arg(long, value_name = "MS")]
    byte_delay: Option<u64>,

    /// Transmissions of a single packet before giving up
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..))]
    retries: u32,

    /// EOT transmissions before giving up on the final acknowledgement
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..))]
    eot_retries: u32,

    /// Seconds to wait for the receiver to request the transfer
    #[arg(long, default_value = "10", value_name = "SECS",
          value_parser = clap::value_parser!(u64).range(..=86400))]
    handshake_timeout: u64,

    /// Seconds to wait for the reply to each packet
    #[arg(long, default_value = "2", value_name = "SECS")]
    reply_timeout: u64,

    /// Show a progress bar instead of per-packet log lines
    #[arg(short = 'P', long)]
    show_progress: bool,

    /// Log verbosity (default: info, or warn with --show-progress)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,

    /// Binary file to send
    file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn init_logging(cli: &Cli) {
    let level = cli.log_level.unwrap_or(if cli.show_progress { LogLevel::Warn } else { LogLevel::Info });
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.as_filter()))
        .format_timestamp(None)
        .init();
}

fn session_config(cli: &Cli) -> SessionConfig {
    let byte_delay = cli.byte_delay
        .map(Duration::from_millis)
        .unwrap_or_else(|| cli.target.byte_delay());

    SessionConfig::new()
        .with_handshake_timeout(Duration::from_secs(cli.handshake_timeout))
        .with_reply_timeout(Duration::from_secs(cli.reply_timeout))
        .with_byte_delay(byte_delay)
        .with_retry_limit(cli.retries)
        .with_eot_retry_limit(cli.eot_retries)
}

fn load_image(path: &Path) -> std::io::Result<Vec<u8>> {
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("File not found: {}", path.display()),
        ));
    }
    std::fs::read(path)
}

/// Sets `cancel` on the first Ctrl-C; a second one exits immediately
fn install_interrupt_handler(cancel: Arc<AtomicBool>) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("interrupt".to_string())
        .spawn(move || {
            runtime.block_on(async {
                while tokio::signal::ctrl_c().await.is_ok() {
                    if cancel.swap(true, Ordering::SeqCst) {
                        eprintln!("Interrupted again, exiting");
                        std::process::exit(TransferError::Interrupted.exit_code());
                    }
                    warn!("Interrupt received, stopping after the current packet");
                }
            })
        })?;
    Ok(())
}

/// What the operator should look at for each failure
fn hint(err: &TransferError) -> &'static str {
    match err {
        TransferError::HandshakeTimeout => "check the cabling and that the receiver is waiting for a transfer",
        TransferError::TooManyRetries { .. } => "check line quality and try a larger --byte-delay",
        TransferError::ReceiverCancelled => "the receiver refused the image; check it fits the target",
        TransferError::EotNotAcknowledged { .. } => "the payload was delivered but the receiver never confirmed the end",
        TransferError::Link(_) => "check that the serial port is still present",
        TransferError::Interrupted => "transfer stopped by user",
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let data_bits = match parse_data_bits(cli.data_bits) {
        Ok(db) => db,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let parity = match parse_parity(&cli.parity) {
        Ok(p) => p,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let stop_bits = match parse_stop_bits(cli.stop_bits) {
        Ok(sb) => sb,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let image = match load_image(&cli.file) {
        Ok(image) => image,
        Err(e) => {
            error!("File can't be opened: {}", e);
            std::process::exit(1);
        }
    };
    info!("file:    {}", cli.file.display());

    info!("Settings: {} baud, {:?}, {:?}, {:?}", cli.baud, data_bits, parity, stop_bits);
    let serial_port = match RealSerialPort::open(&cli.port, cli.baud, data_bits, parity, stop_bits) {
        Ok(port) => port,
        Err(e) => {
            error!("Failed to open serial port: {}", e);
            std::process::exit(TransferError::Link(e.into()).exit_code());
        }
    };

    let cancel = Arc::new(AtomicBool::new(false));
    if let Err(e) = install_interrupt_handler(cancel.clone()) {
        warn!("Ctrl-C will not cancel cleanly: {}", e);
    }

    let reporter: Box<dyn ProgressReporter> = if cli.show_progress {
        Box::new(BarReporter::new(packet::block_count(image.len())))
    } else {
        Box::new(LogReporter)
    };

    let session = TransferSession::new(Box::new(serial_port), image, session_config(&cli))
        .with_reporter(reporter)
        .with_cancel_flag(cancel);

    match session::run(Box::new(session)) {
        Ok(report) => {
            info!(
                "Sent {} packets ({} retransmitted, {} checksum)",
                report.packets_sent, report.retransmissions, report.mode
            );
        }
        Err(e) => {
            error!("Send failed: {}", e);
            error!("Hint: {}", hint(&e));
            std::process::exit(e.exit_code());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["xmsend", "--port", "/dev/ttyUSB0", "image.bin"]).unwrap();
        assert_eq!(cli.baud, 115200);
        assert_eq!(cli.target, Target::Fpga);
        assert_eq!(cli.file, PathBuf::from("image.bin"));

        let config = session_config(&cli);
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn test_byte_delay_overrides_target() {
        let cli = Cli::try_parse_from([
            "xmsend", "-p", "COM3", "--target", "sim", "image.bin",
        ]).unwrap();
        assert_eq!(session_config(&cli).byte_delay, Duration::from_millis(5));

        let cli = Cli::try_parse_from([
            "xmsend", "-p", "COM3", "--target", "sim-trace", "--byte-delay", "1", "image.bin",
        ]).unwrap();
        assert_eq!(session_config(&cli).byte_delay, Duration::from_millis(1));
    }

    #[test]
    fn test_handshake_timeout_bounded() {
        let result = Cli::try_parse_from([
            "xmsend", "-p", "COM3", "--handshake-timeout", "86401", "image.bin",
        ]);
        assert!(result.is_err());

        let cli = Cli::try_parse_from([
            "xmsend", "-p", "COM3", "--handshake-timeout", "86400", "image.bin",
        ]).unwrap();
        assert_eq!(session_config(&cli).handshake_timeout, Duration::from_secs(86400));
    }

    #[test]
    fn test_zero_retries_rejected() {
        let result = Cli::try_parse_from(["xmsend", "-p", "COM3", "--retries", "0", "image.bin"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_serial_settings() {
        assert_eq!(parse_data_bits(7), Ok(DataBits::Seven));
        assert!(parse_data_bits(9).is_err());
        assert_eq!(parse_parity("EVEN"), Ok(Parity::Even));
        assert!(parse_parity("mark").is_err());
        assert_eq!(parse_stop_bits(2), Ok(StopBits::Two));
        assert!(parse_stop_bits(3).is_err());
    }

    #[test]
    fn test_load_image() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"\x7fELF firmware").unwrap();
        file.flush().unwrap();

        assert_eq!(load_image(file.path()).unwrap(), b"\x7fELF firmware");
    }

    #[test]
    fn test_load_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_image(&dir.path().join("missing.bin")).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
