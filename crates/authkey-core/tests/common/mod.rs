//! Scripted authenticator for integration tests.
//!
//! Each open spawns a device task on the far end of an in-memory pipe. The
//! device prints its prompt, then echoes every command line and answers with
//! whatever the test's handler returns.

#![allow(dead_code)]

use async_trait::async_trait;
use authkey_core::protocol::{
    PortEnumerator, PortInfo, ProtocolError, StreamTransport, Transport, TransportOpener,
};
use authkey_core::{ClientConfig, DeviceClient};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

pub const VID: u16 = 0x1209;
pub const PID: u16 = 0xA7E1;
pub const PROMPT: &str = ">>> ";

/// One thing the device does in reply to a command
#[derive(Debug, Clone)]
pub enum Step {
    Say(String),
    Pause(Duration),
    /// Drop the connection, as if the cable was pulled
    Hangup,
}

pub fn say(text: &str) -> Step {
    Step::Say(text.to_string())
}

/// Reply body followed by the prompt
pub fn reply(body: &str) -> Vec<Step> {
    vec![Step::Say(format!("{}{}", body, PROMPT))]
}

/// Handler input: the command line and how often it was seen before,
/// counted across reconnects
pub type Handler = Arc<dyn Fn(&str, usize) -> Vec<Step> + Send + Sync>;

#[derive(Clone)]
pub struct FakeDevice {
    handler: Handler,
    /// Command lines received, across all connections
    pub received: Arc<Mutex<Vec<String>>>,
    /// Number of opens
    pub opens: Arc<AtomicUsize>,
    pub echo: bool,
}

impl FakeDevice {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, usize) -> Vec<Step> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            received: Arc::new(Mutex::new(Vec::new())),
            opens: Arc::new(AtomicUsize::new(0)),
            echo: true,
        }
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Client wired to this device, which is always plugged in
    pub fn client(&self) -> DeviceClient {
        self.client_with(&ClientConfig::default())
    }

    pub fn client_with(&self, config: &ClientConfig) -> DeviceClient {
        DeviceClient::with_parts(config, Box::new(PluggedIn), Box::new(self.clone()))
    }

    async fn run(self, stream: DuplexStream) {
        let (rd, mut wr) = tokio::io::split(stream);
        let mut lines = BufReader::new(rd).lines();

        if wr.write_all(b"authkey shell\r\n>>> ").await.is_err() {
            return;
        }

        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim_end_matches('\r').to_string();
            let nth = {
                let mut received = self.received.lock().unwrap();
                let nth = received.iter().filter(|seen| **seen == line).count();
                received.push(line.clone());
                nth
            };

            if self.echo && wr.write_all(format!("{}\r\n", line).as_bytes()).await.is_err() {
                return;
            }
            for step in (self.handler)(&line, nth) {
                match step {
                    Step::Say(text) => {
                        if wr.write_all(text.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                    Step::Pause(d) => tokio::time::sleep(d).await,
                    Step::Hangup => return,
                }
            }
        }
    }
}

#[async_trait]
impl TransportOpener for FakeDevice {
    async fn open(
        &self,
        port: &PortInfo,
        _baud_rate: u32,
    ) -> Result<Box<dyn Transport>, ProtocolError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let (client, device) = tokio::io::duplex(4096);
        tokio::spawn(self.clone().run(device));
        Ok(Box::new(StreamTransport::new(client, port.name.clone())))
    }
}

/// The authenticator is always attached
pub struct PluggedIn;

impl PortEnumerator for PluggedIn {
    fn ports(&self) -> Vec<PortInfo> {
        vec![
            PortInfo::named("/dev/ttyS0"),
            PortInfo::usb("/dev/ttyACM0", VID, PID),
        ]
    }
}

/// Route `RUST_LOG` output to the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
