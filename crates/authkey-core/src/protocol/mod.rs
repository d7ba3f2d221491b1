//! Device Protocol
//!
//! Implements the line-oriented CLI protocol spoken by the authenticator's
//! serial console: discovery, session recovery, command/response framing and
//! the interactive PIN challenge.

pub mod commands;
mod error;
mod executor;
pub mod locator;
mod session;
pub mod serial;
pub mod transport;

pub use commands::DeviceCommand;
pub use error::ProtocolError;
pub use executor::{sanitize, CommandExecutor, ExecOptions};
pub use locator::{find_device, DeviceLocator, PortEnumerator, SystemPorts};
pub use serial::{list_ports, open_port, PortInfo, SerialOpener, SerialTransport, TransportOpener};
pub use session::{ProtocolEvent, ProtocolEventKind, SessionManager, SessionState};
pub use transport::{ReadBuffer, StreamTransport, Terminator, Transport};

/// Default baud rate for the device console
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// USB vendor ID of the authenticator
pub const DEVICE_VID: u16 = 0x1209;

/// USB product ID of the authenticator
pub const DEVICE_PID: u16 = 0xA7E1;

/// Prefix of every token command understood by the firmware CLI
pub const COMMAND_PREFIX: &str = "totp";

/// CLI prompt printed once the device has finished a response
pub const END_OF_RESPONSE: &str = ">>> ";

/// Printed when the device blocks waiting for a keypad PIN
pub const PIN_REQUEST: &str = "Enter PIN:";

/// Printed when the operator declines a command on the device
pub const COMMAND_CANCELLED: &str = "Cancelled";

/// Printed by the shell for commands it does not (yet) know
pub const COMMAND_NOT_FOUND: &str = "command not found";

/// Line ending appended to every command
pub const LINE_ENDING: &str = "\r\n";

/// Shell-ready probe deadline in milliseconds
pub const PROBE_TIMEOUT_MS: u64 = 1000;

/// Echo-skip deadline in milliseconds
pub const ECHO_TIMEOUT_MS: u64 = 1000;

/// Main response deadline in milliseconds
pub const RESPONSE_TIMEOUT_MS: u64 = 5000;

/// Delay between connection/command retries in milliseconds
pub const RETRY_DELAY_MS: u64 = 1000;

/// Device discovery poll interval in milliseconds
pub const POLL_INTERVAL_MS: u64 = 1000;
