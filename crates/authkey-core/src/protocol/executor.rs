//! Command execution
//!
//! Request/response state machine on top of the session: write a command
//! line, skip its echo, collect output until the prompt, and deal with the
//! three things the shell can say instead of a plain answer (unknown command,
//! PIN prompt, cancellation).
//!
//! Detection matches the prompt, the PIN sentinel and the cancelled sentinel
//! anywhere in the accumulated output. A stored value that contains one of
//! those strings verbatim ends the read early.
//!
//! A channel lost mid-command is reported as an error unless the caller
//! marked the command safe to resend.

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    session::{ProtocolEventKind, SessionManager},
    transport::{Terminator, Transport},
    ProtocolError,
};
use crate::config::{ClientConfig, DeviceProfile};

/// Per-call framing and cleanup options
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Discard the first line read (the device echoes the command)
    pub skip_echo: bool,
    /// Remove the prompt that ended the response
    pub strip_end_marker: bool,
    /// Remove empty and whitespace-only lines
    pub strip_blank_lines: bool,
    /// Remove ANSI/VT escape sequences and backspace erases
    pub strip_control_sequences: bool,
    /// Response terminator; `None` uses the profile's prompt
    pub end_marker: Option<Terminator>,
    /// Reconnect and send the command again if the channel drops before the
    /// response is complete. Only for commands that are safe to repeat.
    pub resend_on_disconnect: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            skip_echo: true,
            strip_end_marker: true,
            strip_blank_lines: true,
            strip_control_sequences: true,
            end_marker: None,
            resend_on_disconnect: false,
        }
    }
}

impl ExecOptions {
    /// Raw output: nothing skipped or stripped
    pub fn raw() -> Self {
        Self {
            skip_echo: false,
            strip_end_marker: false,
            strip_blank_lines: false,
            strip_control_sequences: false,
            end_marker: None,
            resend_on_disconnect: false,
        }
    }

    /// Stop reads at `marker` instead of the prompt
    pub fn with_end_marker(mut self, marker: Terminator) -> Self {
        self.end_marker = Some(marker);
        self
    }

    /// Set [`ExecOptions::resend_on_disconnect`]
    pub fn with_resend_on_disconnect(mut self, resend: bool) -> Self {
        self.resend_on_disconnect = resend;
        self
    }
}

fn control_sequence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // CSI, OSC (BEL or ST terminated), two-byte ESC, backspace erase, lone backspace
        Regex::new(concat!(
            r"\x1b\[[0-?]*[ -/]*[@-~]",
            r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)",
            r"|\x1b[@-Z\\-_78=>]",
            r"|\x08 \x08",
            r"|\x08",
        ))
        .expect("control sequence pattern is valid")
    })
}

/// Remove terminal escape sequences and erase sequences
pub fn strip_control_sequences(text: &str) -> String {
    control_sequence_regex().replace_all(text, "").into_owned()
}

/// Remove empty and whitespace-only lines, keeping each kept line's ending
pub fn strip_blank_lines(text: &str) -> String {
    text.split_inclusive('\n')
        .filter(|line| !line.trim().is_empty())
        .collect()
}

/// Apply the cleanup steps selected in `options` to a raw response
pub fn sanitize(raw: &str, end_marker: &Terminator, options: &ExecOptions) -> String {
    let mut text = if options.strip_end_marker {
        end_marker.strip_from(raw)
    } else {
        raw.to_string()
    };
    if options.strip_control_sequences {
        text = strip_control_sequences(&text);
    }
    if options.strip_blank_lines {
        text = strip_blank_lines(&text);
    }
    text
}

/// Write one command and read up to the detection pattern
async fn exchange(
    transport: &mut dyn Transport,
    line: &str,
    detect: &Terminator,
    skip_echo: bool,
    echo_timeout: Duration,
    response_timeout: Duration,
) -> Result<String, ProtocolError> {
    transport.discard_input();
    transport.write_str(line).await?;

    if skip_echo {
        let echo = transport
            .read_until(&Terminator::literal("\n"), Some(echo_timeout))
            .await?;
        debug!("exchange: skipped echo {:?}", echo.trim_end());
    }

    transport.read_until(detect, Some(response_timeout)).await
}

/// Read past the PIN prompt. A repeated prompt (wrong PIN) keeps waiting;
/// only output after the last prompt is returned.
async fn wait_for_pin(
    transport: &mut dyn Transport,
    detect: &Terminator,
    pin_request: &str,
) -> Result<String, ProtocolError> {
    loop {
        let text = transport.read_until(detect, None).await?;
        if !text.contains(pin_request) {
            return Ok(text);
        }
        debug!("wait_for_pin: device asked again: {:?}", text.trim());
    }
}

/// Runs commands over the session's transport
pub struct CommandExecutor {
    session: SessionManager,
    profile: DeviceProfile,
    echo_timeout: Duration,
    response_timeout: Duration,
    not_found_retry: Duration,
}

impl CommandExecutor {
    /// Executor over `session` using the config's deadlines and profile
    pub fn new(config: &ClientConfig, session: SessionManager) -> Self {
        Self {
            session,
            profile: config.profile.clone(),
            echo_timeout: config.echo_timeout(),
            response_timeout: config.response_timeout(),
            not_found_retry: config.not_found_retry(),
        }
    }

    /// Underlying session
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Underlying session, mutably
    pub fn session_mut(&mut self) -> &mut SessionManager {
        &mut self.session
    }

    /// Firmware constants in use
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Prompt, PIN sentinel or cancelled sentinel, whichever comes first
    fn detection_pattern(&self, end_marker: &Terminator) -> Result<Terminator, ProtocolError> {
        Terminator::pattern(&format!(
            "(?:{})|{}|{}",
            end_marker.regex_source(),
            regex::escape(&self.profile.pin_request),
            regex::escape(&self.profile.cancelled),
        ))
    }

    /// Consume output up to the next prompt so it can't leak into the
    /// following command's echo
    async fn resync(&mut self, end_marker: &Terminator) {
        if !self.session.is_connected() {
            return;
        }
        let echo_timeout = self.echo_timeout;
        let transport = self.session.transport().await;
        if let Err(e) = transport.read_until(end_marker, Some(echo_timeout)).await {
            debug!("resync: no prompt after cancellation: {}", e);
            if e.is_disconnect() {
                self.session.invalidate();
            }
        }
    }

    /// Drop the lost session; `Ok` when the command may be sent again
    fn on_disconnect(
        &mut self,
        command: &str,
        err: ProtocolError,
        options: &ExecOptions,
    ) -> Result<(), ProtocolError> {
        self.session.invalidate();
        if options.resend_on_disconnect {
            warn!("Lost device while running {:?}: {}, resending", command, err);
            Ok(())
        } else {
            warn!("Lost device while running {:?}: {}", command, err);
            Err(err)
        }
    }

    /// Run one command.
    ///
    /// Returns `Ok(None)` when the device cancelled the command, otherwise
    /// the sanitized output. A response that does not arrive within the
    /// deadline fails with [`ProtocolError::Timeout`]. Unknown-command answers
    /// are retried; a lost connection is retried only with
    /// [`ExecOptions::resend_on_disconnect`]. `PinRequested` is published once
    /// per attempt, however often the device repeats the prompt.
    pub async fn execute(
        &mut self,
        command: &str,
        options: &ExecOptions,
    ) -> Result<Option<String>, ProtocolError> {
        let end_marker = options
            .end_marker
            .clone()
            .unwrap_or_else(|| Terminator::literal(self.profile.end_marker.clone()));
        if end_marker.matches_empty() {
            return Err(ProtocolError::Config(format!(
                "end marker {:?} matches empty input",
                end_marker.regex_source()
            )));
        }
        let detect = self.detection_pattern(&end_marker)?;
        let line = format!("{}{}", command, self.profile.line_ending);

        let mut retries = 0u32;
        let response = loop {
            let transport = self.session.transport().await;
            let raw = match exchange(
                transport,
                &line,
                &detect,
                options.skip_echo,
                self.echo_timeout,
                self.response_timeout,
            )
            .await
            {
                Ok(raw) => raw,
                Err(e) if e.is_disconnect() => {
                    self.on_disconnect(command, e, options)?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if raw.contains(&self.profile.command_not_found) {
                retries += 1;
                warn!(
                    "Shell did not recognize {:?} (retry {}), trying again in {}ms",
                    command,
                    retries,
                    self.not_found_retry.as_millis()
                );
                tokio::time::sleep(self.not_found_retry).await;
                continue;
            }

            if !raw.contains(&self.profile.pin_request) {
                break raw;
            }

            info!("Device is waiting for PIN entry");
            self.session.publish(ProtocolEventKind::PinRequested);
            let transport = self.session.transport().await;
            match wait_for_pin(transport, &detect, &self.profile.pin_request).await {
                Ok(after_pin) => break after_pin,
                Err(e) if e.is_disconnect() => self.on_disconnect(command, e, options)?,
                Err(e) => return Err(e),
            }
        };

        if response.contains(&self.profile.cancelled) {
            info!("Device cancelled {:?}", command);
            self.resync(&end_marker).await;
            return Ok(None);
        }

        Ok(Some(sanitize(&response, &end_marker, options)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sanitize_default() {
        let raw = "line1\r\n\r\nline2\r\n>>> ";
        let out = sanitize(raw, &Terminator::literal(">>> "), &ExecOptions::default());
        assert_eq!(out, "line1\r\nline2\r\n");
    }

    #[test]
    fn test_sanitize_raw_keeps_everything() {
        let raw = "a\r\n\r\n\x1b[32mb\x1b[0m\r\n>>> ";
        let out = sanitize(raw, &Terminator::literal(">>> "), &ExecOptions::raw());
        assert_eq!(out, raw);
    }

    #[test]
    fn test_strip_control_sequences() {
        assert_eq!(strip_control_sequences("\x1b[1;32mok\x1b[0m"), "ok");
        assert_eq!(strip_control_sequences("\x1b[2K\rab"), "\rab");
        assert_eq!(strip_control_sequences("abc\x08 \x08d"), "abcd");
        assert_eq!(strip_control_sequences("\x1b]0;title\x07x"), "x");
        assert_eq!(strip_control_sequences("\x1b7saved\x1b8"), "saved");
    }

    #[test]
    fn test_strip_blank_lines() {
        assert_eq!(strip_blank_lines("a\n \t\nb\n"), "a\nb\n");
        assert_eq!(strip_blank_lines("\r\n\r\n"), "");
        assert_eq!(strip_blank_lines("a\r\n   "), "a\r\n");
        assert_eq!(strip_blank_lines("a\r\nb"), "a\r\nb");
    }

    #[test]
    fn test_sanitize_pattern_marker() {
        let marker = Terminator::pattern(r"\$ $").unwrap();
        let out = sanitize("x\n$ ", &marker, &ExecOptions::default());
        assert_eq!(out, "x\n");
    }
}
