//! Device client
//!
//! The object UI code holds on to: one per attached authenticator, created
//! explicitly and passed to whoever needs it. Operations take `&mut self`, so
//! commands on one client are serialized by construction.

use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::protocol::{
    CommandExecutor, DeviceCommand, DeviceLocator, ExecOptions, PortEnumerator, PortInfo,
    ProtocolError, ProtocolEvent, SerialOpener, SessionManager, SessionState, SystemPorts,
    TransportOpener,
};
use crate::table::{parse_table, TokenRecord};

/// Column holding the token name in listings; not sent as an option
const NAME_COLUMN: &str = "Name";

/// Protocol client for one authenticator
pub struct DeviceClient {
    executor: CommandExecutor,
}

impl DeviceClient {
    /// Client using the machine's serial ports
    pub fn new(config: ClientConfig) -> Result<Self, ProtocolError> {
        config.validate()?;
        Ok(Self::with_parts(
            &config,
            Box::new(SystemPorts),
            Box::new(SerialOpener),
        ))
    }

    /// Client with custom port enumeration and transport opening
    pub fn with_parts(
        config: &ClientConfig,
        ports: Box<dyn PortEnumerator>,
        opener: Box<dyn TransportOpener>,
    ) -> Self {
        let locator = DeviceLocator::new(
            ports,
            config.profile.vid,
            config.profile.pid,
            config.poll_interval(),
        );
        let session = SessionManager::new(config, locator, opener);
        Self {
            executor: CommandExecutor::new(config, session),
        }
    }

    /// Id carried by this client's events
    pub fn client_id(&self) -> Uuid {
        self.executor.session().client_id()
    }

    /// Subscribe to connecting/connected/PIN/closed events
    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolEvent> {
        self.executor.session().subscribe()
    }

    /// Session state
    pub fn state(&self) -> SessionState {
        self.executor.session().state()
    }

    /// Port of the current session
    pub fn port(&self) -> Option<&PortInfo> {
        self.executor.session().port()
    }

    /// Wait until a transport to the device is open and its shell answers.
    /// Issues no command.
    pub async fn wait_for_device(&mut self) {
        self.executor.session_mut().transport().await;
    }

    /// Wait until the token application (not just the shell) responds
    pub async fn wait_for_app(&mut self) -> Result<(), ProtocolError> {
        let output = self.run(&DeviceCommand::Status).await?;
        debug!("wait_for_app: status answered {:?}", output);
        Ok(())
    }

    /// Tokens stored on the device, in device order
    pub async fn list_tokens(&mut self) -> Result<Vec<TokenRecord>, ProtocolError> {
        match self.run(&DeviceCommand::List).await? {
            Some(text) => Ok(parse_table(&text)),
            None => Ok(Vec::new()),
        }
    }

    /// Store a new token. `fields` become `--column value` options; a `Name`
    /// column is ignored in favor of `name`.
    ///
    /// Returns `false` when the operator cancelled on the device.
    pub async fn add_token(
        &mut self,
        name: &str,
        fields: &TokenRecord,
    ) -> Result<bool, ProtocolError> {
        let command = DeviceCommand::Add {
            name: name.to_string(),
            fields: option_fields(fields),
        };
        Ok(self.run(&command).await?.is_some())
    }

    /// Change fields of a stored token
    pub async fn update_token(
        &mut self,
        name: &str,
        fields: &TokenRecord,
    ) -> Result<bool, ProtocolError> {
        let command = DeviceCommand::Update {
            name: name.to_string(),
            fields: option_fields(fields),
        };
        Ok(self.run(&command).await?.is_some())
    }

    /// Remove a stored token
    pub async fn delete_token(&mut self, name: &str) -> Result<bool, ProtocolError> {
        let command = DeviceCommand::Delete {
            name: name.to_string(),
        };
        Ok(self.run(&command).await?.is_some())
    }

    /// Run a token command with default options. Read-only commands are
    /// resent after a lost connection; mutations fail with the disconnect
    /// error instead.
    pub async fn run(&mut self, command: &DeviceCommand) -> Result<Option<String>, ProtocolError> {
        let line = command.to_line(&self.executor.profile().command_prefix);
        let options = ExecOptions::default().with_resend_on_disconnect(!command.is_mutation());
        self.executor.execute(&line, &options).await
    }

    /// Run an arbitrary command line
    pub async fn execute(
        &mut self,
        command: &str,
        options: &ExecOptions,
    ) -> Result<Option<String>, ProtocolError> {
        self.executor.execute(command, options).await
    }

    /// Close the session; always publishes `Closed`
    pub async fn close(&mut self) {
        self.executor.session_mut().close().await;
    }
}

fn option_fields(record: &TokenRecord) -> Vec<(String, String)> {
    record
        .fields()
        .iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case(NAME_COLUMN))
        .cloned()
        .collect()
}
