//! Server endpoint tokens of the form `host:port:mode`.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// How bytes travel to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Mode letter `t`.
    Plaintext,
    /// Mode letter `s`.
    Tls,
}

impl TransportKind {
    fn letter(self) -> char {
        match self {
            Self::Plaintext => 't',
            Self::Tls => 's',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
}

impl Endpoint {
    /// Parse a `host:port:mode` token.
    ///
    /// The token is split from the right so that bare IPv6 hosts
    /// (`::1:50001:t`) keep their colons.
    pub fn parse(token: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidEndpoint {
            token: token.to_owned(),
            reason: reason.to_owned(),
        };

        let mut parts = token.rsplitn(3, ':');
        let mode = parts.next().ok_or_else(|| invalid("missing mode"))?;
        let port = parts.next().ok_or_else(|| invalid("expected host:port:mode"))?;
        let host = parts.next().ok_or_else(|| invalid("expected host:port:mode"))?;

        let transport = match mode {
            "t" => TransportKind::Plaintext,
            "s" => TransportKind::Tls,
            other => {
                return Err(invalid(&format!(
                    "unknown mode `{other}`; expected `t` (plaintext) or `s` (TLS)"
                )))
            }
        };

        let port: u16 = port
            .parse()
            .map_err(|e| invalid(&format!("invalid port `{port}`: {e}")))?;
        if port == 0 {
            return Err(invalid("port must be non-zero"));
        }

        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        if host.contains(&['/', '\\', '\0'][..]) {
            return Err(invalid("host must not contain path separators"));
        }

        Ok(Self {
            host: host.to_owned(),
            port,
            transport,
        })
    }

    /// The `host:port` pair handed to the resolver.
    pub fn socket_addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.port, self.transport.letter())
    }
}
