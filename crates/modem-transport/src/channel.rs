//! The modem channel
//!
//! A [`Channel`] holds exclusive ownership of the transport for its
//! lifetime. Reads go through a [`FramedRead`] with the [`AtLineCodec`], so
//! [`Channel::next_line`] only ever yields whole lines and is safe to use as
//! a `tokio::select!` branch: dropping the future loses no buffered bytes.

use crate::codec::{AtLineCodec, Line, DEFAULT_MAX_LINE_LENGTH};
use crate::error::{Result, TransportError};
use crate::power::PowerControl;
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedRead;
use tracing::{debug, error, trace, warn};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Channel tuning
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Upper bound for writing one payload
    pub write_timeout: Duration,
    /// Lines longer than this are discarded
    pub max_line_length: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(2),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

/// Line-framed, exclusively owned modem transport
pub struct Channel {
    name: String,
    reader: FramedRead<BoxedReader, AtLineCodec>,
    writer: BoxedWriter,
    power: Option<Box<dyn PowerControl>>,
    config: ChannelConfig,
    closed: bool,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("power", &self.power)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Channel {
    /// Wrap a bidirectional stream
    pub fn new<T>(name: impl Into<String>, io: T, config: ChannelConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        Self::from_parts(name, reader, writer, config)
    }

    /// Build from independent read and write halves
    pub fn from_parts<R, W>(name: impl Into<String>, reader: R, writer: W, config: ChannelConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let codec = AtLineCodec::new(config.max_line_length);
        Self {
            name: name.into(),
            reader: FramedRead::new(Box::new(reader) as BoxedReader, codec),
            writer: Box::new(writer),
            power: None,
            config,
            closed: false,
        }
    }

    /// Open a character device such as `/dev/ttySAC0`
    ///
    /// The node is opened twice, once per direction, so a blocked read never
    /// holds up a write. Line discipline (baud rate, raw mode) is the host's
    /// business.
    pub async fn open_device(path: impl AsRef<Path>, config: ChannelConfig) -> Result<Self> {
        let path = path.as_ref();
        let target = path.display().to_string();
        let open_err = |source| TransportError::Open {
            target: target.clone(),
            source,
        };

        let read_half = tokio::fs::OpenOptions::new()
            .read(true)
            .open(path)
            .await
            .map_err(open_err)?;
        let write_half = tokio::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(open_err)?;

        debug!("Opened modem device {}", target);
        Ok(Self::from_parts(target.clone(), read_half, write_half, config))
    }

    /// Connect to a modem exposed over TCP, e.g. an emulator
    pub async fn connect_tcp(addr: &str, config: ChannelConfig) -> Result<Self> {
        let stream = tokio::net::TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Open {
                target: addr.to_string(),
                source,
            })?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        debug!("Connected to modem at {}", addr);
        Ok(Self::from_parts(addr, reader, writer, config))
    }

    /// Attach a power side-channel
    pub fn with_power(mut self, power: impl PowerControl + 'static) -> Self {
        self.power = Some(Box::new(power));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Write the full payload
    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TransportError::Disconnected);
        }

        let writer = &mut self.writer;
        let write = async move {
            writer.write_all(bytes).await?;
            writer.flush().await
        };

        match tokio::time::timeout(self.config.write_timeout, write).await {
            Ok(Ok(())) => {
                trace!("-> {:?}", String::from_utf8_lossy(bytes));
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Write to {} failed: {}", self.name, e);
                self.closed = true;
                Err(TransportError::Disconnected)
            }
            Err(_) => {
                warn!(
                    "Write to {} did not complete within {:?}",
                    self.name, self.config.write_timeout
                );
                Err(TransportError::Timeout(self.config.write_timeout))
            }
        }
    }

    /// Wait for the next complete line
    pub async fn next_line(&mut self) -> Result<Line> {
        if self.closed {
            return Err(TransportError::Disconnected);
        }

        match self.reader.next().await {
            Some(Ok(line)) => Ok(line),
            Some(Err(e)) => {
                error!("Read from {} failed: {}", self.name, e);
                self.closed = true;
                Err(TransportError::Disconnected)
            }
            None => {
                debug!("{} reached end of stream", self.name);
                self.closed = true;
                Err(TransportError::Disconnected)
            }
        }
    }

    /// Let the next `> ` be reported as [`Line::Prompt`]
    pub fn expect_prompt(&mut self, armed: bool) {
        let codec = self.reader.decoder_mut();
        if armed {
            codec.arm_prompt();
        } else {
            codec.disarm_prompt();
        }
    }

    /// Energize or cut the device, if it has a power node
    pub async fn set_power(&mut self, on: bool) -> Result<()> {
        match &self.power {
            Some(power) => power.set_power(on).await,
            None => {
                trace!("{} has no power control, ignoring set_power({})", self.name, on);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn channel_pair(buffer: usize) -> (Channel, tokio::io::DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(buffer);
        (Channel::new("test", ours, ChannelConfig::default()), theirs)
    }

    #[tokio::test]
    async fn yields_whole_lines() {
        let (mut channel, mut modem) = channel_pair(256);
        modem.write_all(b"\r\n+CSQ: 17,99\r\n\r\nOK\r\n").await.unwrap();

        assert_eq!(channel.next_line().await.unwrap(), Line::Text("+CSQ: 17,99".into()));
        assert_eq!(channel.next_line().await.unwrap(), Line::Text("OK".into()));
    }

    #[tokio::test]
    async fn send_writes_payload() {
        let (mut channel, mut modem) = channel_pair(256);
        channel.send(b"AT+CSQ\r\n").await.unwrap();

        let mut buf = [0u8; 8];
        modem.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"AT+CSQ\r\n");
    }

    #[tokio::test]
    async fn scripted_exchange() {
        let mock = tokio_test::io::Builder::new()
            .write(b"AT+CPIN?\r")
            .read(b"\r\n+CPIN: READY\r\n\r\nOK\r\n")
            .build();
        let mut channel = Channel::new("mock", mock, ChannelConfig::default());

        channel.send(b"AT+CPIN?\r").await.unwrap();
        assert_eq!(channel.next_line().await.unwrap(), Line::Text("+CPIN: READY".into()));
        assert_eq!(channel.next_line().await.unwrap(), Line::Text("OK".into()));
    }

    #[tokio::test]
    async fn end_of_stream_is_disconnect() {
        let (mut channel, modem) = channel_pair(64);
        drop(modem);

        assert!(matches!(channel.next_line().await, Err(TransportError::Disconnected)));
        assert!(channel.is_closed());
        assert!(matches!(channel.send(b"AT\r\n").await, Err(TransportError::Disconnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_times_out() {
        let (ours, _modem) = tokio::io::duplex(4);
        let config = ChannelConfig {
            write_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        let mut channel = Channel::new("stalled", ours, config);

        let result = channel.send(b"AT+COPS=?\r\n").await;
        assert!(matches!(result, Err(TransportError::Timeout(d)) if d == Duration::from_millis(500)));
        assert!(!channel.is_closed());
    }

    #[tokio::test]
    async fn prompt_is_reported_when_expected() {
        let (mut channel, mut modem) = channel_pair(64);
        channel.expect_prompt(true);
        modem.write_all(b"\r\n> ").await.unwrap();
        assert_eq!(channel.next_line().await.unwrap(), Line::Prompt);
    }

    #[tokio::test]
    async fn missing_power_control_is_ignored() {
        let (mut channel, _modem) = channel_pair(64);
        channel.set_power(true).await.unwrap();
        channel.set_power(false).await.unwrap();
    }
}
