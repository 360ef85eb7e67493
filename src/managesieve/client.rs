//! The ManageSieve session state machine and command set.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, info, instrument, warn};

use crate::error::{AuthError, Error, ProtocolError, ServerError, TransportError};

use super::response::{Completion, CompletionLine, ResponseLine, parse_response_line, parse_script_list_line};
use super::sasl::{self, Credentials, Step};
use super::transport::{OutboundString, Transport, quote_or_literal};

const DEFAULT_PORT: u16 = 4190;
const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Server-announced capabilities, refreshed after connect and after
/// `STARTTLS` (the post-handshake re-announce supersedes the plaintext
/// one, since an active attacker could have altered it).
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub implementation: Option<String>,
    pub sasl: Vec<String>,
    pub sieve: Vec<String>,
    pub starttls: bool,
    pub maxredirects: Option<u32>,
    pub notify: Vec<String>,
    pub language: Option<String>,
    pub version: Option<String>,
    pub unauthenticate: bool,
    pub rename: bool,
    pub other: HashMap<String, String>,
}

impl Capabilities {
    fn absorb(&mut self, name: &str, value: Option<String>) {
        match name.to_ascii_uppercase().as_str() {
            "IMPLEMENTATION" => self.implementation = value,
            "SASL" => {
                self.sasl = value
                    .map(|v| super::response::split_mechanisms(&v))
                    .unwrap_or_default()
            }
            "SIEVE" => {
                self.sieve = value
                    .map(|v| super::response::split_mechanisms(&v))
                    .unwrap_or_default()
            }
            "STARTTLS" => self.starttls = true,
            "MAXREDIRECTS" => self.maxredirects = value.and_then(|v| v.parse().ok()),
            "NOTIFY" => {
                self.notify = value
                    .map(|v| super::response::split_mechanisms(&v))
                    .unwrap_or_default()
            }
            "LANGUAGE" => self.language = value,
            "VERSION" => self.version = value,
            "UNAUTHENTICATE" => self.unauthenticate = true,
            "RENAME" => self.rename = true,
            other => {
                self.other.insert(other.to_string(), value.unwrap_or_default());
            }
        }
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Greeted,
    Authenticated,
    LoggedOut,
    Error,
}

/// The result of `LISTSCRIPTS`: every script name, and which (if any) is
/// active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptListing {
    pub active: Option<String>,
    pub names: Vec<String>,
}

/// Connection-time options.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Attempt `STARTTLS` when the server advertises it.
    pub starttls: bool,
    /// Wall-clock deadline applied to every I/O operation.
    pub timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            starttls: true,
            timeout: DEFAULT_DEADLINE,
        }
    }
}

pub struct SieveClient {
    transport: Transport,
    state: SessionState,
    capabilities: Capabilities,
    host: String,
}

impl std::fmt::Debug for SieveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SieveClient")
            .field("state", &self.state)
            .field("host", &self.host)
            .finish()
    }
}

impl SieveClient {
    #[instrument(skip(opts))]
    pub async fn connect(host: &str, port: Option<u16>, opts: ConnectOptions) -> Result<Self, Error> {
        let port = port.unwrap_or(DEFAULT_PORT);
        let mut transport = Transport::connect(host, port, opts.timeout).await?;
        info!(host, port, "connected");

        let capabilities = read_capability_block(&mut transport).await?;
        let mut client = SieveClient {
            transport,
            state: SessionState::Greeted,
            capabilities,
            host: host.to_string(),
        };

        if opts.starttls && client.capabilities.starttls {
            client.starttls().await?;
        }

        Ok(client)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    #[instrument(skip(self))]
    pub async fn starttls(&mut self) -> Result<(), Error> {
        if !self.capabilities.starttls {
            return Err(ProtocolError::StartTlsUnsupported.into());
        }
        self.transport.write_line("STARTTLS").await.map_err(|e| self.poison(e))?;
        let completion = self.read_simple_completion().await?;
        expect_ok(completion)?;

        let transport = std::mem::replace(
            &mut self.transport,
            unsafe_placeholder(),
        );
        match transport.upgrade_tls(&self.host).await {
            Ok(upgraded) => self.transport = upgraded,
            Err(e) => {
                self.state = SessionState::Error;
                return Err(e.into());
            }
        }
        debug!("TLS handshake complete");

        self.capabilities = read_capability_block(&mut self.transport).await?;
        Ok(())
    }

    #[instrument(skip(self, password, token))]
    pub async fn authenticate(
        &mut self,
        username: &str,
        password: &str,
        mechanism: &str,
        token: Option<&str>,
    ) -> Result<(), Error> {
        if !self
            .capabilities
            .sasl
            .iter()
            .any(|m| m.eq_ignore_ascii_case(mechanism))
        {
            return Err(AuthError::UnsupportedMechanism(mechanism.to_string()).into());
        }

        let creds = Credentials {
            username: username.to_string(),
            password: password.to_string(),
            realm: None,
            token: token.map(|t| t.to_string()),
        };
        let mut mech = sasl::by_name(mechanism, creds)
            .ok_or_else(|| AuthError::UnsupportedMechanism(mechanism.to_string()))?;

        let mut line = format!("AUTHENTICATE \"{}\"", mech.name());
        if let Some(initial) = mech.initial_response() {
            let encoded = BASE64.encode(&initial);
            line.push(' ');
            line.push_str(&quote(&encoded));
        }
        self.transport.write_line(&line).await.map_err(|e| self.poison(e))?;

        loop {
            let raw = self.transport.read_line().await.map_err(|e| self.poison(e))?;
            if let Some((length, _)) = parse_literal_header_line(&raw) {
                let encoded_challenge = self.transport.read_literal(length).await.map_err(|e| self.poison(e))?;
                let challenge = BASE64.decode(&encoded_challenge).map_err(|e| {
                    AuthError::ExchangeFailed(format!("challenge was not valid base64: {e}"))
                })?;
                let response = match mech.step(&challenge)? {
                    Step::Respond(resp) => resp,
                    Step::Done => Vec::new(),
                };
                let encoded_response = BASE64.encode(&response);
                self.transport
                    .write_line(&quote(&encoded_response))
                    .await
                    .map_err(|e| self.poison(e))?;
                continue;
            }

            match parse_response_line(&raw).map_err(ProtocolError::Malformed)? {
                ResponseLine::Completion(c) => match c.verdict {
                    Completion::Ok => {
                        self.state = SessionState::Authenticated;
                        return Ok(());
                    }
                    Completion::No => {
                        return Err(AuthError::Rejected(c.human.unwrap_or_default()).into());
                    }
                    Completion::Bye => {
                        self.state = SessionState::Disconnected;
                        return Err(ServerError(c.human.unwrap_or_default()).into());
                    }
                },
                ResponseLine::Capability { .. } | ResponseLine::LiteralHeader { .. } => {
                    return Err(ProtocolError::Malformed(
                        "unexpected response during SASL exchange".to_string(),
                    )
                    .into());
                }
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn capability(&mut self) -> Result<Capabilities, Error> {
        self.transport.write_line("CAPABILITY").await.map_err(|e| self.poison(e))?;
        let caps = read_capability_block(&mut self.transport).await?;
        self.capabilities = caps.clone();
        Ok(caps)
    }

    #[instrument(skip(self))]
    pub async fn listscripts(&mut self) -> Result<ScriptListing, Error> {
        self.transport.write_line("LISTSCRIPTS").await.map_err(|e| self.poison(e))?;
        let mut names = Vec::new();
        let mut active = None;
        loop {
            let raw = self.transport.read_line().await.map_err(|e| self.poison(e))?;
            if let Ok((name, is_active)) = parse_script_list_line(&raw) {
                if is_active {
                    active = Some(name.clone());
                }
                names.push(name);
                continue;
            }
            match parse_response_line(&raw).map_err(ProtocolError::Malformed)? {
                ResponseLine::Completion(c) => {
                    expect_ok(c)?;
                    break;
                }
                other => {
                    return Err(
                        ProtocolError::Malformed(format!("unexpected line in LISTSCRIPTS: {other:?}")).into(),
                    );
                }
            }
        }
        Ok(ScriptListing { active, names })
    }

    #[instrument(skip(self))]
    pub async fn getscript(&mut self, name: &str) -> Result<String, Error> {
        self.transport
            .write_line(&format!("GETSCRIPT {}", quote(name)))
            .await
            .map_err(|e| self.poison(e))?;

        let raw = self.transport.read_line().await.map_err(|e| self.poison(e))?;
        if let Some((length, _)) = parse_literal_header_line(&raw) {
            let bytes = self.transport.read_literal(length).await.map_err(|e| self.poison(e))?;
            let completion = self.read_simple_completion().await?;
            expect_ok(completion)?;
            return Ok(String::from_utf8_lossy(&bytes).to_string());
        }

        match parse_response_line(&raw).map_err(ProtocolError::Malformed)? {
            ResponseLine::Completion(c) if c.verdict == Completion::No => {
                Err(ServerError(c.human.unwrap_or_else(|| format!("script {name} not found"))).into())
            }
            other => Err(ProtocolError::Malformed(format!("unexpected GETSCRIPT response: {other:?}")).into()),
        }
    }

    #[instrument(skip(self, content))]
    pub async fn putscript(&mut self, name: &str, content: &str) -> Result<(), Error> {
        self.write_command_with_string("PUTSCRIPT", &[name], content).await?;
        let completion = self.read_simple_completion().await?;
        expect_ok(completion)
    }

    #[instrument(skip(self))]
    pub async fn deletescript(&mut self, name: &str) -> Result<(), Error> {
        self.transport
            .write_line(&format!("DELETESCRIPT {}", quote(name)))
            .await
            .map_err(|e| self.poison(e))?;
        let completion = self.read_simple_completion().await?;
        expect_ok(completion)
    }

    #[instrument(skip(self))]
    pub async fn setactive(&mut self, name: &str) -> Result<(), Error> {
        self.transport
            .write_line(&format!("SETACTIVE {}", quote(name)))
            .await
            .map_err(|e| self.poison(e))?;
        let completion = self.read_simple_completion().await?;
        expect_ok(completion)
    }

    #[instrument(skip(self))]
    pub async fn havespace(&mut self, name: &str, size: u64) -> Result<bool, Error> {
        self.transport
            .write_line(&format!("HAVESPACE {} {}", quote(name), size))
            .await
            .map_err(|e| self.poison(e))?;
        match self.read_simple_completion().await?.verdict {
            Completion::Ok => Ok(true),
            Completion::No => Ok(false),
            Completion::Bye => {
                self.state = SessionState::Disconnected;
                Err(ServerError("server closed the connection".to_string()).into())
            }
        }
    }

    /// Renames a script. Uses the native `RENAMESCRIPT` command when the
    /// server advertises `RENAME`; otherwise simulates it with
    /// `GETSCRIPT`/`PUTSCRIPT`/`SETACTIVE`/`DELETESCRIPT`, rolling back the
    /// new script on any intermediate failure.
    #[instrument(skip(self))]
    pub async fn renamescript(&mut self, old: &str, new: &str) -> Result<(), Error> {
        if self.capabilities.rename {
            self.transport
                .write_line(&format!("RENAMESCRIPT {} {}", quote(old), quote(new)))
                .await
                .map_err(|e| self.poison(e))?;
            let completion = self.read_simple_completion().await?;
            return expect_ok(completion);
        }

        warn!("server lacks RENAME, simulating renamescript");
        let listing = self.listscripts().await?;
        let was_active = listing.active.as_deref() == Some(old);

        let body = self.getscript(old).await?;
        self.putscript(new, &body).await?;

        if was_active {
            if let Err(e) = self.setactive(new).await {
                let _ = self.deletescript(new).await;
                return Err(e);
            }
        }

        if let Err(e) = self.deletescript(old).await {
            let _ = self.deletescript(new).await;
            return Err(e);
        }

        Ok(())
    }

    /// Validates a script server-side without storing it (a supplement
    /// beyond the mandatory command set, present on most deployed servers).
    #[instrument(skip(self, content))]
    pub async fn checkscript(&mut self, content: &str) -> Result<Option<String>, Error> {
        self.write_command_with_string("CHECKSCRIPT", &[], content).await?;
        let completion = self.read_simple_completion().await?;
        match completion.verdict {
            Completion::Ok => Ok(completion.human),
            Completion::No => Err(ServerError(completion.human.unwrap_or_default()).into()),
            Completion::Bye => {
                self.state = SessionState::Disconnected;
                Err(ServerError("server closed the connection".to_string()).into())
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn logout(&mut self) -> Result<(), Error> {
        self.transport.write_line("LOGOUT").await.map_err(|e| self.poison(e))?;
        let _ = self.read_simple_completion().await;
        self.state = SessionState::LoggedOut;
        Ok(())
    }

    async fn write_command_with_string(
        &mut self,
        command: &str,
        leading_args: &[&str],
        body: &str,
    ) -> Result<(), Error> {
        let mut line = command.to_string();
        for arg in leading_args {
            line.push(' ');
            line.push_str(&quote(arg));
        }
        match quote_or_literal(body) {
            OutboundString::Quoted(q) => {
                line.push(' ');
                line.push_str(&q);
                self.transport.write_line(&line).await.map_err(|e| self.poison(e))?;
            }
            OutboundString::Literal(raw) => {
                line.push_str(&format!(" {{{}+}}", raw.len()));
                self.transport.write_line(&line).await.map_err(|e| self.poison(e))?;
                self.transport
                    .write_literal_body(raw.as_bytes())
                    .await
                    .map_err(|e| self.poison(e))?;
            }
        }
        Ok(())
    }

    async fn read_simple_completion(&mut self) -> Result<CompletionLine, Error> {
        let raw = self.transport.read_line().await.map_err(|e| self.poison(e))?;
        if let Some((length, _)) = parse_literal_header_line(&raw) {
            let _ = self.transport.read_literal(length).await.map_err(|e| self.poison(e))?;
            let raw = self.transport.read_line().await.map_err(|e| self.poison(e))?;
            return self.finish_completion(raw);
        }
        self.finish_completion(raw)
    }

    fn finish_completion(&mut self, raw: String) -> Result<CompletionLine, Error> {
        match parse_response_line(&raw).map_err(ProtocolError::Malformed)? {
            ResponseLine::Completion(c) => {
                if c.verdict == Completion::Bye {
                    self.state = SessionState::Disconnected;
                }
                Ok(c)
            }
            other => Err(
                ProtocolError::Malformed(format!("expected a tagged completion, found {other:?}")).into(),
            ),
        }
    }

    fn poison(&mut self, e: TransportError) -> Error {
        self.state = SessionState::Error;
        Error::Transport(e)
    }
}

fn expect_ok(completion: CompletionLine) -> Result<(), Error> {
    match completion.verdict {
        Completion::Ok => Ok(()),
        Completion::No => Err(ServerError(completion.human.unwrap_or_default()).into()),
        Completion::Bye => Err(ServerError("server closed the connection".to_string()).into()),
    }
}

fn quote(s: &str) -> String {
    match quote_or_literal(s) {
        OutboundString::Quoted(q) => q,
        OutboundString::Literal(raw) => format!("{{{}+}}\r\n{raw}", raw.len()),
    }
}

fn parse_literal_header_line(raw: &str) -> Option<(usize, bool)> {
    match parse_response_line(raw) {
        Ok(ResponseLine::LiteralHeader { length, synchronizing }) => Some((length, synchronizing)),
        _ => None,
    }
}

async fn read_capability_block(transport: &mut Transport) -> Result<Capabilities, Error> {
    let mut capabilities = Capabilities::default();
    loop {
        let raw = transport.read_line().await?;
        match parse_response_line(&raw).map_err(ProtocolError::Malformed)? {
            ResponseLine::Capability { name, value } => capabilities.absorb(&name, value),
            ResponseLine::Completion(c) => {
                expect_ok(c)?;
                break;
            }
            ResponseLine::LiteralHeader { .. } => {
                return Err(ProtocolError::Malformed(
                    "unexpected literal in capability block".to_string(),
                )
                .into());
            }
        }
    }
    Ok(capabilities)
}

/// A never-constructed placeholder used only to satisfy `mem::replace`
/// while moving `self.transport` out during the STARTTLS upgrade; the real
/// value is written back before this one could ever be observed.
fn unsafe_placeholder() -> Transport {
    unreachable!("placeholder transport must be replaced before use")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_absorb_covers_known_fields() {
        let mut caps = Capabilities::default();
        caps.absorb("IMPLEMENTATION", Some("Example v1".to_string()));
        caps.absorb("SASL", Some("PLAIN LOGIN".to_string()));
        caps.absorb("SIEVE", Some("fileinto vacation".to_string()));
        caps.absorb("STARTTLS", None);
        caps.absorb("MAXREDIRECTS", Some("5".to_string()));
        caps.absorb("RENAME", None);
        caps.absorb("UNKNOWNTHING", Some("x".to_string()));

        assert_eq!(caps.implementation.as_deref(), Some("Example v1"));
        assert_eq!(caps.sasl, vec!["PLAIN", "LOGIN"]);
        assert_eq!(caps.sieve, vec!["fileinto", "vacation"]);
        assert!(caps.starttls);
        assert_eq!(caps.maxredirects, Some(5));
        assert!(caps.rename);
        assert_eq!(caps.other.get("UNKNOWNTHING"), Some(&"x".to_string()));
    }

    #[test]
    fn quote_wraps_plain_names() {
        assert_eq!(quote("myscript"), "\"myscript\"");
    }

    #[test]
    fn expect_ok_maps_no_to_server_error() {
        let completion = CompletionLine {
            verdict: Completion::No,
            code: None,
            human: Some("quota exceeded".to_string()),
        };
        match expect_ok(completion) {
            Err(Error::Server(ServerError(msg))) => assert_eq!(msg, "quota exceeded"),
            other => panic!("{other:?}"),
        }
    }
}
