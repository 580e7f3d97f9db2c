//! Scripted fake modem for driving a real engine

#![allow(dead_code)]

use gsmd_modem_core::command::CommandSpec;
use gsmd_modem_core::profile::{DeviceProfile, OperationCatalog};
use gsmd_modem_core::{Engine, ModemConfig, ModemEvent, ModemHandle};
use gsmd_modem_transport::{Channel, ChannelConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const READ_LIMIT: Duration = Duration::from_secs(30);

/// Standard device without an init sequence, so tests start on a quiet line
#[derive(Debug, Default)]
pub struct QuietModem;

impl DeviceProfile for QuietModem {
    fn name(&self) -> &'static str {
        "quiet"
    }

    fn init_commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }
}

impl OperationCatalog for QuietModem {}

/// The device side of the line
pub struct FakeModem {
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeModem {
    /// Next frame written by the engine, up to `\r` or Ctrl-Z
    pub async fn next_frame(&mut self) -> String {
        let mut frame = Vec::new();
        loop {
            let byte = tokio::time::timeout(READ_LIMIT, self.reader.read_u8())
                .await
                .expect("engine wrote nothing")
                .expect("engine closed the line");
            match byte {
                b'\n' if frame.is_empty() => continue,
                b'\r' | 0x1a => break,
                other => frame.push(other),
            }
        }
        String::from_utf8(frame).expect("frame is not utf-8")
    }

    /// Expect `AT<command>`
    pub async fn expect(&mut self, command: &str) {
        assert_eq!(self.next_frame().await, format!("AT{}", command));
    }

    pub async fn reply(&mut self, lines: &[&str]) {
        let mut bytes = Vec::new();
        for line in lines {
            bytes.extend_from_slice(b"\r\n");
            bytes.extend_from_slice(line.as_bytes());
            bytes.extend_from_slice(b"\r\n");
        }
        self.writer.write_all(&bytes).await.expect("engine hung up");
    }

    /// Expect `AT<command>` and answer with `lines`
    pub async fn respond(&mut self, command: &str, lines: &[&str]) {
        self.expect(command).await;
        self.reply(lines).await;
    }

    pub async fn prompt(&mut self) {
        self.writer.write_all(b"\r\n> ").await.expect("engine hung up");
    }

    /// Answer `count` commands with `OK`, returning them
    pub async fn acknowledge(&mut self, count: usize) -> Vec<String> {
        let mut seen = Vec::with_capacity(count);
        for _ in 0..count {
            seen.push(self.next_frame().await);
            self.reply(&["OK"]).await;
        }
        seen
    }
}

pub struct Harness {
    pub handle: ModemHandle,
    pub modem: FakeModem,
    pub events: broadcast::Receiver<ModemEvent>,
    pub task: JoinHandle<()>,
}

/// Engine logs on the test writer, filtered by `RUST_LOG`
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn spawn(build: impl FnOnce(Channel) -> (Engine, ModemHandle)) -> Harness {
    init_logging();
    let (ours, theirs) = tokio::io::duplex(4096);
    let channel = Channel::new("fake", ours, ChannelConfig::default());
    let (engine, handle) = build(channel);
    let events = handle.subscribe();
    let task = tokio::spawn(engine.run());
    let (reader, writer) = tokio::io::split(theirs);
    Harness {
        handle,
        modem: FakeModem { reader, writer },
        events,
        task,
    }
}

/// Engine on a quiet standard device
pub fn quiet_engine(config: ModemConfig) -> Harness {
    spawn(|channel| Engine::with_profile(channel, config, Arc::new(QuietModem)))
}

/// Engine with the profile from `config`, init sequence included
pub fn engine(config: ModemConfig) -> Harness {
    spawn(|channel| Engine::new(channel, config))
}

/// Wait for the first event matching `pred`
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<ModemEvent>,
    pred: impl Fn(&ModemEvent) -> bool,
) -> ModemEvent {
    tokio::time::timeout(READ_LIMIT, async {
        loop {
            let event = events.recv().await.expect("event stream ended");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event did not arrive")
}

/// Every event currently buffered
pub fn drain_events(events: &mut broadcast::Receiver<ModemEvent>) -> Vec<ModemEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
