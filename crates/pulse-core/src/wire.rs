//! Pulse wire format: the discovery beacon and the heartbeat handshake lines.
//!
//! These constants ARE the protocol. The beacon is a fixed, versionless ASCII
//! marker; the handshake is line-oriented text over TCP. Changing anything here
//! breaks interoperability with every running instance on the network.

// ── Constants ─────────────────────────────────────────────────────────────────

/// Fixed beacon payload. A datagram is a beacon only if its payload is exactly
/// these bytes (or, with port advertisement, these bytes plus a port line).
pub const SIGNATURE: &[u8] = b"INSEcosystem_TestTask\n";

/// IPv4 multicast group and port for discovery beacons.
pub const MULTICAST_ADDR: &str = "239.0.0.0:9999";

/// Default beacon interval in milliseconds.
pub const ANNOUNCE_INTERVAL_MS: u64 = 1000;

/// Well-known TCP port assumed for every discovered peer.
pub const DEFAULT_PEER_PORT: u16 = 8000;

/// Receive buffer size for discovery datagrams.
pub const MAX_DATAGRAM_SIZE: usize = 8192;

/// Longest handshake line accepted, terminator included.
pub const MAX_LINE_LEN: usize = 1024;

/// Handshake line terminator.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Prefix of the inbound listener's reply line.
pub const GREETING_PREFIX: &str = "Hello from ";

// ── Beacon ────────────────────────────────────────────────────────────────────

/// A decoded discovery beacon.
///
/// The sender's address never travels in the payload; receivers take it from
/// the datagram source. `port` is only present when the sender advertises its
/// listen port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beacon {
    pub port: Option<u16>,
}

impl Beacon {
    /// The legacy beacon: signature only.
    pub fn plain() -> Self {
        Self { port: None }
    }

    /// A beacon advertising the sender's TCP listen port.
    pub fn with_port(port: u16) -> Self {
        Self { port: Some(port) }
    }

    /// Serialize for the wire.
    ///
    /// Layout: `SIGNATURE` followed, when a port is advertised, by the decimal
    /// port and a line terminator.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = SIGNATURE.to_vec();
        if let Some(port) = self.port {
            out.extend_from_slice(port.to_string().as_bytes());
            out.push(LINE_TERMINATOR);
        }
        out
    }

    /// Parse a datagram payload.
    ///
    /// With `accept_port` false only the exact signature is a beacon. With it
    /// true, the exact signature is still accepted (no port) alongside the
    /// port-advertising form.
    pub fn decode(payload: &[u8], accept_port: bool) -> Result<Self, WireError> {
        if payload == SIGNATURE {
            return Ok(Self::plain());
        }
        if !accept_port || !payload.starts_with(SIGNATURE) {
            return Err(WireError::BadSignature(payload.len()));
        }

        let rest = &payload[SIGNATURE.len()..];
        let digits = rest
            .strip_suffix(&[LINE_TERMINATOR])
            .ok_or_else(|| WireError::InvalidPort(String::from_utf8_lossy(rest).into_owned()))?;
        let text = std::str::from_utf8(digits)
            .map_err(|_| WireError::InvalidPort(String::from_utf8_lossy(digits).into_owned()))?;
        match text.parse::<u16>() {
            Ok(port) if port != 0 && text.bytes().all(|b| b.is_ascii_digit()) => {
                Ok(Self::with_port(port))
            }
            _ => Err(WireError::InvalidPort(text.to_string())),
        }
    }
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// The line a heartbeat client writes: its identity token.
pub fn identity_line(id: &str) -> String {
    format!("{id}\n")
}

/// The line the inbound listener writes back.
pub fn greeting(id: &str) -> String {
    format!("{GREETING_PREFIX}{id}\n")
}

/// Extract the remote identity from a greeting line, if it is one.
pub fn parse_greeting(line: &str) -> Option<&str> {
    line.trim_end_matches(['\r', '\n'])
        .strip_prefix(GREETING_PREFIX)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("payload of {0} bytes does not match the beacon signature")]
    BadSignature(usize),

    #[error("invalid advertised port: {0:?}")]
    InvalidPort(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
