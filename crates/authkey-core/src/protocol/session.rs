//! Session management
//!
//! Owns the single transport of a client: discovery, opening, the
//! shell-ready probe, retry with backoff, and connection events.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    locator::DeviceLocator,
    serial::{PortInfo, TransportOpener},
    transport::{Terminator, Transport},
};
use crate::config::ClientConfig;

/// Capacity of the event channel; slow subscribers see `Lagged`
const EVENT_CAPACITY: usize = 32;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No transport held
    Disconnected,
    /// Discovery/open/probe in progress
    Connecting,
    /// Shell answered the probe
    Connected,
}

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolEventKind {
    /// Discovery and connection attempts started
    Connecting,
    /// The device shell answered
    Connected,
    /// The device waits for a keypad PIN
    PinRequested,
    /// `close()` was called
    Closed,
}

/// Notification published by a client; carries only the client's id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolEvent {
    /// Publishing client
    pub client_id: Uuid,
    /// What happened
    pub kind: ProtocolEventKind,
}

/// Holds at most one live transport and re-establishes it on demand
pub struct SessionManager {
    id: Uuid,
    locator: DeviceLocator,
    opener: Box<dyn TransportOpener>,
    transport: Option<Box<dyn Transport>>,
    port: Option<PortInfo>,
    state: SessionState,
    events: broadcast::Sender<ProtocolEvent>,
    probe_marker: Terminator,
    baud_rate: u32,
    probe_timeout: Duration,
    retry_delay: Duration,
    max_retry_delay: Duration,
}

impl SessionManager {
    /// Disconnected session; nothing is opened until first use
    pub fn new(
        config: &ClientConfig,
        locator: DeviceLocator,
        opener: Box<dyn TransportOpener>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id: Uuid::new_v4(),
            locator,
            opener,
            transport: None,
            port: None,
            state: SessionState::Disconnected,
            events,
            probe_marker: Terminator::literal(config.profile.end_marker.clone()),
            baud_rate: config.baud_rate,
            probe_timeout: config.probe_timeout(),
            retry_delay: config.retry_delay(),
            max_retry_delay: config.max_retry_delay(),
        }
    }

    /// Identifier carried by every event of this session
    pub fn client_id(&self) -> Uuid {
        self.id
    }

    /// Current state; a held transport that reports closure counts as
    /// disconnected
    pub fn state(&self) -> SessionState {
        if self.holds_closed_transport() {
            SessionState::Disconnected
        } else {
            self.state
        }
    }

    /// Port of the live session, if any
    pub fn port(&self) -> Option<&PortInfo> {
        if self.holds_closed_transport() {
            None
        } else {
            self.port.as_ref()
        }
    }

    fn holds_closed_transport(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_closed())
    }

    /// Whether a transport is held and has not reported closure
    pub fn is_connected(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| !t.is_closed())
    }

    /// Subscribe to connection and PIN events
    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, kind: ProtocolEventKind) {
        let event = ProtocolEvent {
            client_id: self.id,
            kind,
        };
        if self.events.send(event).is_err() {
            debug!("event {:?} has no subscribers", kind);
        }
    }

    /// The live transport, connecting first if needed.
    ///
    /// Never fails: an absent or unresponsive device is retried until it
    /// answers. Wrap the call in a timeout to bound it.
    pub async fn transport(&mut self) -> &mut dyn Transport {
        let transport = match self.transport.take() {
            Some(t) if !t.is_closed() => t,
            Some(_) => {
                info!("Serial channel closed, reconnecting");
                self.mark_disconnected();
                self.connect().await
            }
            None => self.connect().await,
        };
        self.transport.insert(transport).as_mut()
    }

    /// Drop the held transport without publishing anything
    pub fn invalidate(&mut self) {
        if self.transport.take().is_some() {
            debug!("session invalidated");
        }
        self.mark_disconnected();
    }

    /// Close the transport (if any) and publish `Closed` exactly once
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                debug!("close: error while closing transport: {}", e);
            }
            info!("Disconnected from authenticator");
        }
        self.mark_disconnected();
        self.publish(ProtocolEventKind::Closed);
    }

    fn mark_disconnected(&mut self) {
        self.port = None;
        self.state = SessionState::Disconnected;
    }

    async fn connect(&mut self) -> Box<dyn Transport> {
        self.state = SessionState::Connecting;
        self.publish(ProtocolEventKind::Connecting);

        let mut delay = self.retry_delay;
        loop {
            let port = self.locator.wait_for_device().await;

            match self.opener.open(&port, self.baud_rate).await {
                Ok(mut transport) => {
                    match transport
                        .read_until(&self.probe_marker, Some(self.probe_timeout))
                        .await
                    {
                        Ok(_) => {
                            info!("Connected to authenticator on {}", port.name);
                            self.port = Some(port);
                            self.state = SessionState::Connected;
                            self.publish(ProtocolEventKind::Connected);
                            return transport;
                        }
                        Err(e) => {
                            warn!("Shell on {} not ready: {}", port.name, e);
                            if let Err(e) = transport.close().await {
                                debug!("connect: close after failed probe: {}", e);
                            }
                        }
                    }
                }
                Err(e) => warn!("Failed to open {}: {}", port.name, e),
            }

            debug!("connect: retrying in {}ms", delay.as_millis());
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2).min(self.max_retry_delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{locator::PortEnumerator, ProtocolError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct OnePort;

    impl PortEnumerator for OnePort {
        fn ports(&self) -> Vec<PortInfo> {
            vec![PortInfo::usb("/dev/ttyACM0", 0x1209, 0xA7E1)]
        }
    }

    /// Transport whose probe either succeeds or times out
    struct ProbeTransport {
        ready: bool,
        closed: bool,
    }

    #[async_trait]
    impl Transport for ProbeTransport {
        async fn write_str(&mut self, _data: &str) -> Result<(), ProtocolError> {
            Ok(())
        }

        async fn read_until(
            &mut self,
            _terminator: &Terminator,
            _deadline: Option<Duration>,
        ) -> Result<String, ProtocolError> {
            if self.ready {
                Ok(">>> ".to_string())
            } else {
                Err(ProtocolError::Timeout)
            }
        }

        async fn close(&mut self) -> Result<(), ProtocolError> {
            self.closed = true;
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    enum Outcome {
        OpenFails,
        NotReady,
        Ready,
    }

    struct ScriptedOpener {
        script: Mutex<VecDeque<Outcome>>,
        opens: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl TransportOpener for ScriptedOpener {
        async fn open(
            &self,
            port: &PortInfo,
            _baud_rate: u32,
        ) -> Result<Box<dyn Transport>, ProtocolError> {
            *self.opens.lock().unwrap() += 1;
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Outcome::Ready);
            match next {
                Outcome::OpenFails => Err(ProtocolError::SerialError(format!(
                    "{} busy",
                    port.name
                ))),
                Outcome::NotReady => Ok(Box::new(ProbeTransport {
                    ready: false,
                    closed: false,
                })),
                Outcome::Ready => Ok(Box::new(ProbeTransport {
                    ready: true,
                    closed: false,
                })),
            }
        }
    }

    fn make_session(script: Vec<Outcome>, config: &ClientConfig) -> (SessionManager, Arc<Mutex<usize>>) {
        let opens = Arc::new(Mutex::new(0));
        let locator = DeviceLocator::new(Box::new(OnePort), 0x1209, 0xA7E1, config.poll_interval());
        let opener = ScriptedOpener {
            script: Mutex::new(script.into()),
            opens: opens.clone(),
        };
        (SessionManager::new(config, locator, Box::new(opener)), opens)
    }

    fn drain(rx: &mut broadcast::Receiver<ProtocolEvent>) -> Vec<ProtocolEventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_ready() {
        let config = ClientConfig::default();
        let (mut session, opens) = make_session(
            vec![Outcome::OpenFails, Outcome::NotReady, Outcome::Ready],
            &config,
        );
        let mut rx = session.subscribe();

        let start = tokio::time::Instant::now();
        session.transport().await;
        assert_eq!(*opens.lock().unwrap(), 3);
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.port().map(|p| p.name.as_str()), Some("/dev/ttyACM0"));
        assert_eq!(
            drain(&mut rx),
            vec![ProtocolEventKind::Connecting, ProtocolEventKind::Connected]
        );

        // held transport is reused
        session.transport().await;
        assert_eq!(*opens.lock().unwrap(), 3);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_to_cap() {
        let config = ClientConfig {
            max_retry_delay_ms: 4000,
            ..ClientConfig::default()
        };
        let (mut session, _) = make_session(
            vec![
                Outcome::OpenFails,
                Outcome::OpenFails,
                Outcome::OpenFails,
                Outcome::OpenFails,
                Outcome::Ready,
            ],
            &config,
        );

        let start = tokio::time::Instant::now();
        session.transport().await;
        // 1 + 2 + 4 + 4
        assert!(start.elapsed() >= Duration::from_secs(11));
        assert!(start.elapsed() < Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_without_transport() {
        let config = ClientConfig::default();
        let (mut session, opens) = make_session(vec![], &config);
        let mut rx = session.subscribe();

        session.close().await;
        assert_eq!(drain(&mut rx), vec![ProtocolEventKind::Closed]);
        assert_eq!(*opens.lock().unwrap(), 0);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_transport_is_replaced() {
        let config = ClientConfig::default();
        let (mut session, opens) = make_session(vec![], &config);

        session.transport().await.close().await.unwrap();
        assert!(!session.is_connected());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.port().is_none());

        session.transport().await;
        assert_eq!(*opens.lock().unwrap(), 2);
        assert!(session.is_connected());
    }

    #[test]
    fn test_events_carry_client_id() {
        let config = ClientConfig::default();
        let (session, _) = make_session(vec![], &config);
        let mut rx = session.subscribe();
        session.publish(ProtocolEventKind::PinRequested);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.client_id, session.client_id());
        assert_eq!(event.kind, ProtocolEventKind::PinRequested);
    }
}
