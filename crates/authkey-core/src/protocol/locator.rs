//! Device discovery
//!
//! Picks the authenticator out of the enumerated serial ports by USB
//! vendor/product id. An unplugged device is a normal, long-lived state, so
//! [`DeviceLocator::wait_for_device`] polls forever.

use std::time::Duration;
use tracing::{debug, info};

use super::serial::{list_ports, PortInfo};

/// Source of the currently attached serial ports
pub trait PortEnumerator: Send + Sync {
    /// Ports visible right now
    fn ports(&self) -> Vec<PortInfo>;
}

/// Enumerates the ports of this machine
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn ports(&self) -> Vec<PortInfo> {
        list_ports()
    }
}

/// First port whose vendor and product ids both match
pub fn find_device(ports: &[PortInfo], vid: u16, pid: u16) -> Option<PortInfo> {
    ports.iter().find(|p| p.matches(vid, pid)).cloned()
}

/// Finds the authenticator among attached serial ports
pub struct DeviceLocator {
    enumerator: Box<dyn PortEnumerator>,
    vid: u16,
    pid: u16,
    poll_interval: Duration,
}

impl DeviceLocator {
    /// Locator for `vid:pid`, polling every `poll_interval` while absent
    pub fn new(
        enumerator: Box<dyn PortEnumerator>,
        vid: u16,
        pid: u16,
        poll_interval: Duration,
    ) -> Self {
        Self {
            enumerator,
            vid,
            pid,
            poll_interval,
        }
    }

    /// Single enumeration pass, no retry
    pub fn find_device(&self) -> Option<PortInfo> {
        let ports = self.enumerator.ports();
        debug!(
            "find_device: {} ports, looking for {:04x}:{:04x}",
            ports.len(),
            self.vid,
            self.pid
        );
        find_device(&ports, self.vid, self.pid)
    }

    /// Poll until the device shows up. Never times out; drop the future to
    /// give up.
    pub async fn wait_for_device(&self) -> PortInfo {
        let mut announced = false;
        loop {
            if let Some(port) = self.find_device() {
                info!("Found authenticator on {}", port.name);
                return port;
            }
            if !announced {
                info!(
                    "Waiting for authenticator {:04x}:{:04x} to be plugged in",
                    self.vid, self.pid
                );
                announced = true;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const VID: u16 = 0x1209;
    const PID: u16 = 0xA7E1;

    /// Returns nothing for the first `misses` calls, then the device
    struct LatePorts {
        misses: usize,
        calls: Arc<AtomicUsize>,
    }

    impl PortEnumerator for LatePorts {
        fn ports(&self) -> Vec<PortInfo> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.misses {
                vec![PortInfo::named("/dev/ttyS0")]
            } else {
                vec![
                    PortInfo::named("/dev/ttyS0"),
                    PortInfo::usb("/dev/ttyACM3", VID, PID),
                ]
            }
        }
    }

    #[test]
    fn test_find_first_match() {
        let ports = vec![
            PortInfo::usb("/dev/ttyACM0", VID, 0x0001),
            PortInfo::named("/dev/ttyUSB0"),
            PortInfo::usb("/dev/ttyACM1", VID, PID),
            PortInfo::usb("/dev/ttyACM2", VID, PID),
        ];
        let found = find_device(&ports, VID, PID).unwrap();
        assert_eq!(found.name, "/dev/ttyACM1");
    }

    #[test]
    fn test_find_none() {
        assert!(find_device(&[], VID, PID).is_none());
        let ports = vec![PortInfo::usb("/dev/ttyACM0", 0x2341, PID)];
        assert!(find_device(&ports, VID, PID).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_polls_until_present() {
        let calls = Arc::new(AtomicUsize::new(0));
        let locator = DeviceLocator::new(
            Box::new(LatePorts {
                misses: 3,
                calls: calls.clone(),
            }),
            VID,
            PID,
            Duration::from_secs(1),
        );

        let start = tokio::time::Instant::now();
        let port = locator.wait_for_device().await;
        assert_eq!(port.name, "/dev/ttyACM3");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_secs(4));
    }
}
