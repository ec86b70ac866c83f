//! # Modbus RTU Transport Layer
//!
//! This module moves RTU frames over a half-duplex serial line.
//!
//! ## Layers
//!
//! ### Channels (`SerialChannel`)
//! - `SerialPortChannel`: a real device opened through `tokio-serial`, with RTS
//!   driving the RS-485 transceiver direction
//! - `StreamChannel`: any async byte stream (PTY, pipe, in-memory duplex) with the
//!   transmit-enable contract checked in software
//!
//! ### Link (`RtuLink`)
//! - Sends a frame with the transmitter asserted only while bytes go out
//! - Detects the end of a received frame from line silence: RTU carries no length
//!   field, so a gap longer than the baud-rate derived character interval ends the
//!   frame
//! - Keeps per-link statistics and optional hex packet logging
//!
//! ## Timing
//!
//! Two waits are used when receiving. The response timeout bounds the wait for the
//! first byte ("did anyone answer?"); the character interval bounds every later
//! gap ("has the device finished?"). A zero response timeout turns reception into
//! a non-blocking check, which is how the slave polls.
//!
//! ```rust,no_run
//! use modbus_rtu::config::SerialConfig;
//! use modbus_rtu::transport::{RtuLink, SerialPortChannel};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SerialConfig::default();
//! let channel = SerialPortChannel::open(&config)?;
//! let mut link = RtuLink::new(channel, config.line_timing()).with_packet_logging(true);
//!
//! link.send_frame(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]).await?;
//! let reply = link.receive_frame().await?;
//! println!("{} bytes", reply.len());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::time::timeout;
use tokio_serial::{ClearBuffer, SerialPort, SerialStream};
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::error::{ModbusError, ModbusResult};
use crate::utils::format::bytes_to_hex;
use crate::MAX_RTU_FRAME_SIZE;

/// Inter-character silence threshold per baud rate, in microseconds
const CHAR_INTERVAL_TABLE: [(u32, u64); 11] = [
    (110, 3_200_000),
    (300, 1_600_000),
    (600, 800_000),
    (1200, 400_000),
    (2400, 200_000),
    (4800, 100_000),
    (9600, 50_000),
    (19200, 25_000),
    (38400, 12_500),
    (57600, 8_333),
    (115200, 4_167),
];

const FALLBACK_BAUD_RATE: u32 = 9600;

/// Whether the baud rate has an entry in the character interval table
pub fn is_supported_baud_rate(baud_rate: u32) -> bool {
    CHAR_INTERVAL_TABLE.iter().any(|(rate, _)| *rate == baud_rate)
}

/// Silence that ends a frame at `baud_rate`
///
/// 0 means 9600. Unknown rates log a warning and use the 9600 entry.
pub fn char_interval_timeout(baud_rate: u32) -> Duration {
    let lookup = |rate: u32| {
        CHAR_INTERVAL_TABLE
            .iter()
            .find(|(entry, _)| *entry == rate)
            .map(|(_, micros)| Duration::from_micros(*micros))
    };

    let rate = if baud_rate == 0 { FALLBACK_BAUD_RATE } else { baud_rate };
    match lookup(rate) {
        Some(interval) => interval,
        None => {
            warn!("Unknown baud rate {}, using the {} baud character interval", baud_rate, FALLBACK_BAUD_RATE);
            Duration::from_micros(50_000)
        }
    }
}

/// Receive timing attached to one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTiming {
    /// Wait for the first byte of a frame
    pub response_timeout: Duration,
    /// Longest gap between two bytes of the same frame
    pub char_interval: Duration,
}

impl LineTiming {
    /// Timing for `baud_rate` with the default one second response timeout
    pub fn for_baud_rate(baud_rate: u32) -> Self {
        Self {
            response_timeout: Duration::from_millis(crate::config::DEFAULT_RESPONSE_TIMEOUT_MS),
            char_interval: char_interval_timeout(baud_rate),
        }
    }

    /// Replace the first-byte wait
    pub fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }
}

impl Default for LineTiming {
    fn default() -> Self {
        Self::for_baud_rate(FALLBACK_BAUD_RATE)
    }
}

/// Byte-level access to a half-duplex serial line
///
/// Implementations must keep the transmitter released while reading. The link
/// asserts it right before writing a frame and releases it right after.
#[async_trait]
pub trait SerialChannel: Send {
    /// Write all bytes and wait until they have left the driver
    ///
    /// Returns the number of bytes written.
    async fn write(&mut self, bytes: &[u8]) -> ModbusResult<usize>;

    /// Wait up to `max_wait` for one byte
    ///
    /// `Ok(None)` means nothing arrived in time. A zero wait still returns a
    /// byte that is already buffered. Read failures, including the far end
    /// closing, are errors.
    async fn read_byte(&mut self, max_wait: Duration) -> ModbusResult<Option<u8>>;

    /// Throw away anything received but not yet read
    async fn discard_input(&mut self) -> ModbusResult<()>;

    /// Drive the transmit-enable signal
    fn set_transmit_enable(&mut self, enabled: bool) -> ModbusResult<()>;
}

async fn read_one<R>(reader: &mut R, max_wait: Duration) -> ModbusResult<Option<u8>>
where
    R: AsyncRead + Unpin + Send,
{
    let mut buffer = [0u8; 1];
    match timeout(max_wait, reader.read(&mut buffer)).await {
        Err(_) => Ok(None),
        Ok(Ok(0)) => Err(ModbusError::io("Serial channel closed by peer")),
        Ok(Ok(_)) => Ok(Some(buffer[0])),
        Ok(Err(e)) => Err(ModbusError::io(format!("Serial read error: {}", e))),
    }
}

/// Serial device channel backed by `tokio-serial`
pub struct SerialPortChannel {
    port: SerialStream,
    device: String,
    rts_direction_control: bool,
}

impl SerialPortChannel {
    /// Open and configure the device (8 data bits, 1 stop bit)
    pub fn open(config: &SerialConfig) -> ModbusResult<Self> {
        config.validate()?;
        let baud_rate = config.effective_baud_rate();
        debug!("RTU: {} @{}baud parity={}", config.device, baud_rate, config.parity);

        let builder = tokio_serial::new(&config.device, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(config.parity.into())
            .timeout(config.response_timeout());

        let port = SerialStream::open(&builder).map_err(|e| {
            ModbusError::connection(format!("Failed to open serial port {}: {}", config.device, e))
        })?;

        let mut channel = Self {
            port,
            device: config.device.clone(),
            rts_direction_control: config.rts_direction_control,
        };
        channel.set_transmit_enable(false)?;

        info!("RTU opened: {}", channel.device);
        Ok(channel)
    }

    /// Device path this channel was opened on
    pub fn device(&self) -> &str {
        &self.device
    }
}

#[async_trait]
impl SerialChannel for SerialPortChannel {
    async fn write(&mut self, bytes: &[u8]) -> ModbusResult<usize> {
        self.port
            .write_all(bytes)
            .await
            .map_err(|e| ModbusError::io(format!("Failed to write to {}: {}", self.device, e)))?;
        self.port
            .flush()
            .await
            .map_err(|e| ModbusError::io(format!("Failed to drain {}: {}", self.device, e)))?;
        Ok(bytes.len())
    }

    async fn read_byte(&mut self, max_wait: Duration) -> ModbusResult<Option<u8>> {
        read_one(&mut self.port, max_wait).await
    }

    async fn discard_input(&mut self) -> ModbusResult<()> {
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn set_transmit_enable(&mut self, enabled: bool) -> ModbusResult<()> {
        if self.rts_direction_control {
            self.port.write_request_to_send(enabled)?;
        }
        Ok(())
    }
}

/// Channel over any async byte stream
///
/// The transmit-enable signal is tracked in software and enforced: writing
/// while released or reading while asserted is a protocol error.
#[derive(Debug)]
pub struct StreamChannel<S> {
    stream: S,
    transmitting: bool,
}

impl<S> StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a stream; the transmitter starts released
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            transmitting: false,
        }
    }

    /// Whether the transmitter is currently asserted
    pub fn is_transmitting(&self) -> bool {
        self.transmitting
    }

    /// Give back the wrapped stream
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl StreamChannel<DuplexStream> {
    /// Two connected in-memory channels, each end buffering up to `max_buf_size` bytes
    pub fn pair(max_buf_size: usize) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(max_buf_size);
        (Self::new(a), Self::new(b))
    }
}

#[async_trait]
impl<S> SerialChannel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, bytes: &[u8]) -> ModbusResult<usize> {
        if !self.transmitting {
            return Err(ModbusError::protocol("Write attempted with transmitter released"));
        }
        self.stream
            .write_all(bytes)
            .await
            .map_err(|e| ModbusError::io(format!("Stream write error: {}", e)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| ModbusError::io(format!("Stream flush error: {}", e)))?;
        Ok(bytes.len())
    }

    async fn read_byte(&mut self, max_wait: Duration) -> ModbusResult<Option<u8>> {
        if self.transmitting {
            return Err(ModbusError::protocol("Read attempted with transmitter asserted"));
        }
        read_one(&mut self.stream, max_wait).await
    }

    async fn discard_input(&mut self) -> ModbusResult<()> {
        let mut discarded = 0usize;
        while read_one(&mut self.stream, Duration::ZERO).await?.is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!("Discarded {} stale input bytes", discarded);
        }
        Ok(())
    }

    fn set_transmit_enable(&mut self, enabled: bool) -> ModbusResult<()> {
        self.transmitting = enabled;
        Ok(())
    }
}

/// Link statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub crc_errors: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Result of a non-blocking receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameState {
    /// Nothing was waiting on the line
    Empty,
    /// One frame, terminated by line silence
    Complete(Vec<u8>),
}

/// Log packet with direction, in the `[MODBUS-RTU]` hex dump format
fn log_packet(direction: &str, data: &[u8]) {
    match data.first() {
        Some(id) => info!("[MODBUS-RTU] {} slave:{} {}", direction, id, bytes_to_hex(data)),
        None => info!("[MODBUS-RTU] {} {}", direction, bytes_to_hex(data)),
    }
}

/// Frame-level transport over one serial channel
pub struct RtuLink<C> {
    channel: C,
    timing: LineTiming,
    stats: TransportStats,
    packet_logging: bool,
}

impl<C: SerialChannel> RtuLink<C> {
    /// Create a link with its own timing
    pub fn new(channel: C, timing: LineTiming) -> Self {
        Self {
            channel,
            timing,
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    /// Enable or disable hex packet logging
    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    pub fn timing(&self) -> LineTiming {
        self.timing
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    pub(crate) fn record_crc_error(&mut self) {
        self.stats.crc_errors += 1;
        self.stats.errors += 1;
    }

    pub(crate) fn record_error(&mut self) {
        self.stats.errors += 1;
    }

    /// Transmit one complete frame
    ///
    /// Stale input is discarded first. The transmitter is asserted before the
    /// first byte and released after the last, and the release is attempted
    /// even when the write fails.
    pub async fn send_frame(&mut self, frame: &[u8]) -> ModbusResult<()> {
        if let Err(e) = self.channel.discard_input().await {
            self.stats.errors += 1;
            return Err(e);
        }

        if let Err(e) = self.channel.set_transmit_enable(true) {
            self.stats.errors += 1;
            return Err(e);
        }
        let written = self.channel.write(frame).await;
        let released = self.channel.set_transmit_enable(false);

        let written = match (written, released) {
            (Ok(count), Ok(())) => count,
            (Err(e), _) | (Ok(_), Err(e)) => {
                self.stats.errors += 1;
                return Err(e);
            }
        };
        if written != frame.len() {
            self.stats.errors += 1;
            return Err(ModbusError::io(format!("Short write: {} of {} bytes", written, frame.len())));
        }

        self.stats.frames_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;
        if self.packet_logging {
            log_packet("send", frame);
        }
        Ok(())
    }

    /// Receive one frame, waiting up to the response timeout for it to start
    ///
    /// # Errors
    ///
    /// - `Timeout` when no byte arrives within the response timeout
    /// - `Io` on channel failure or when more than 256 bytes arrive without a
    ///   silent interval
    pub async fn receive_frame(&mut self) -> ModbusResult<Vec<u8>> {
        match self.collect_frame(self.timing.response_timeout).await? {
            Some(frame) => Ok(frame),
            None => {
                self.stats.timeouts += 1;
                self.stats.errors += 1;
                Err(ModbusError::timeout(
                    "waiting for response",
                    self.timing.response_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Non-blocking receive: returns at once when the line is idle
    ///
    /// When a first byte is already buffered the rest of the frame is collected
    /// up to the next silent interval. Nothing is kept between calls.
    pub async fn poll_frame(&mut self) -> ModbusResult<FrameState> {
        Ok(match self.collect_frame(Duration::ZERO).await? {
            Some(frame) => FrameState::Complete(frame),
            None => FrameState::Empty,
        })
    }

    async fn collect_frame(&mut self, first_byte_wait: Duration) -> ModbusResult<Option<Vec<u8>>> {
        let first = match self.channel.read_byte(first_byte_wait).await {
            Ok(Some(byte)) => byte,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.stats.errors += 1;
                return Err(e);
            }
        };

        let mut frame = Vec::with_capacity(MAX_RTU_FRAME_SIZE);
        frame.push(first);

        loop {
            match self.channel.read_byte(self.timing.char_interval).await {
                Ok(Some(byte)) => {
                    if frame.len() >= MAX_RTU_FRAME_SIZE {
                        self.stats.errors += 1;
                        return Err(ModbusError::io(format!(
                            "Receive overrun: more than {} bytes without a silent interval",
                            MAX_RTU_FRAME_SIZE
                        )));
                    }
                    frame.push(byte);
                }
                Ok(None) => break,
                Err(e) => {
                    self.stats.errors += 1;
                    return Err(e);
                }
            }
        }

        self.stats.frames_received += 1;
        self.stats.bytes_received += frame.len() as u64;
        if self.packet_logging {
            log_packet("receive", &frame);
        }
        Ok(Some(frame))
    }
}
