//! # authkey Core Library
//!
//! Protocol client for authkey hardware authenticators.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial port discovery by USB vendor/product id
//! - Session handling with automatic reconnect
//! - Line-oriented command execution with PIN prompt handling
//! - Parsing of the device's tabular token listings
//!
//! ## Example
//!
//! ```rust,ignore
//! use authkey_core::{ClientConfig, DeviceClient};
//!
//! let mut client = DeviceClient::new(ClientConfig::default())?;
//! let mut events = client.subscribe();
//!
//! client.wait_for_app().await?;
//! for token in client.list_tokens().await? {
//!     println!("{:?}", token.get("Name"));
//! }
//! client.close().await;
//! ```

pub mod client;
pub mod config;
pub mod protocol;
pub mod table;

pub use client::DeviceClient;
pub use config::{ClientConfig, DeviceProfile};
pub use table::{parse_table, TokenRecord};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::DeviceClient;
    pub use crate::config::{ClientConfig, DeviceProfile};
    pub use crate::protocol::{
        DeviceCommand, ExecOptions, PortInfo, ProtocolError, ProtocolEvent, ProtocolEventKind,
        SessionState, Terminator,
    };
    pub use crate::table::{parse_table, TokenRecord};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
