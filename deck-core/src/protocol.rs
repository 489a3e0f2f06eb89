//! The line-oriented command grammar and response status lines.
//!
//! A request is one line: `NAME[: KEY: VALUE[ KEY: VALUE ...]]`.
//! Responses are one status line, optionally followed by `key: value`
//! lines and a terminating blank line. Parameter order is preserved on
//! both sides so serialization is deterministic.

use std::fmt;

// ── Status lines ─────────────────────────────────────────────────

/// Exact protocol status lines. These must match byte-for-byte; deck
/// control clients switch on the leading token.
pub mod status {
    pub const OK: &str = "200 ok";

    // Errors (100–199)
    pub const ERR_SYNTAX: &str = "100 syntax error";
    pub const ERR_UNSUPPORTED_PARAMETER: &str = "101 unsupported parameter";
    pub const ERR_INVALID_VALUE: &str = "102 invalid value";
    pub const ERR_UNSUPPORTED: &str = "103 unsupported";
    pub const ERR_DISK_FULL: &str = "104 disk full";
    pub const ERR_NO_DISK: &str = "105 no disk";
    pub const ERR_DISK_ERROR: &str = "106 disk error";
    pub const ERR_TIMELINE_EMPTY: &str = "107 timeline empty";
    pub const ERR_INTERNAL: &str = "108 internal error";
    pub const ERR_OUT_OF_RANGE: &str = "109 out of range";
    pub const ERR_NO_INPUT: &str = "110 no input";
    pub const ERR_REMOTE_DISABLED: &str = "111 remote control disabled";
    pub const ERR_CONNECTION_REJECTED: &str = "120 connection rejected";
    pub const ERR_INVALID_STATE: &str = "150 invalid state";
    pub const ERR_INVALID_CODEC: &str = "151 invalid codec";
    pub const ERR_INVALID_FORMAT: &str = "160 invalid format";
    pub const ERR_INVALID_TOKEN: &str = "161 invalid token";
    pub const ERR_FORMAT_NOT_PREPARED: &str = "162 format not prepared";

    // Info blocks (200–299)
    pub const HELP: &str = "201 help:";
    pub const SLOT_INFO: &str = "202 slot info:";
    pub const CLIPS_INFO: &str = "205 clips info:";
    pub const DISK_LIST: &str = "206 disk list:";
    pub const TRANSPORT_INFO: &str = "208 transport info:";
    pub const NOTIFY_INFO: &str = "209 notify:";
    pub const REMOTE_INFO: &str = "210 remote info:";
    pub const CLIPS_COUNT: &str = "214 clips count:";

    // Asynchronous pushes (500–599)
    pub const ASYNC_CONNECTION_INFO: &str = "500 connection info:";
    pub const ASYNC_TRANSPORT_INFO: &str = "508 transport info:";
    pub const ASYNC_DISPLAY_TIMECODE: &str = "513 display timecode:";
    pub const ASYNC_TIMELINE_POSITION: &str = "514 timeline position:";
}

// ── Command ──────────────────────────────────────────────────────

/// A parsed command or a structured response: a name plus ordered
/// key/value parameters.
///
/// Parameters are an insertion-ordered list of pairs, not a map, so
/// clients see response fields in a fixed order, so serialization must
/// be deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Command {
    name: String,
    parameters: Vec<(String, String)>,
}

impl Command {
    /// A command with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    /// Parse one request line.
    ///
    /// The name is the text before the first colon. The remainder is
    /// read as alternating `KEY:` / `VALUE` tokens; a key may span
    /// several words with the last one carrying the trailing colon
    /// (`clip id: 2`), a value is a single word. Running out of tokens
    /// mid-pair (a key that never sees its colon, or a key with no
    /// value) terminates parameter parsing and the rest of the line
    /// is dropped. This permissiveness on malformed input is part of
    /// the protocol's observable behavior.
    ///
    /// An empty line yields a command with an empty name, which the
    /// caller treats as a no-op.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let Some((name, rest)) = line.split_once(':') else {
            return Self::new(line);
        };

        let mut cmd = Self::new(name.trim());
        let mut tokens = rest.split(' ').filter(|t| !t.trim().is_empty());
        loop {
            // Gather key words until one ends with ':'.
            let mut key = String::new();
            let key = loop {
                let Some(tok) = tokens.next() else {
                    return cmd; // ran out before the key completed
                };
                let tok = tok.trim();
                match tok.strip_suffix(':') {
                    Some(last) => {
                        if !key.is_empty() {
                            key.push(' ');
                        }
                        key.push_str(last);
                        break key;
                    }
                    None => {
                        if !key.is_empty() {
                            key.push(' ');
                        }
                        key.push_str(tok);
                    }
                }
            };
            let Some(value) = tokens.next() else {
                return cmd; // key with no value
            };
            cmd.push(key, value.trim());
        }
    }

    /// Render the command as wire text: `NAME:\r\n` followed by one
    /// `key: value\r\n` line per parameter, in insertion order.
    pub fn marshall(&self) -> String {
        let mut out = String::with_capacity(64);
        out.push_str(&self.name);
        if !self.name.ends_with(':') {
            out.push(':');
        }
        out.push_str("\r\n");
        for (key, value) in &self.parameters {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a parameter value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Append a parameter, preserving insertion order.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.parameters.push((key.into(), value.into()));
    }

    /// Iterate parameters in insertion order.
    pub fn parameters(&self) -> impl Iterator<Item = (&str, &str)> {
        self.parameters
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (k, v) in &self.parameters {
            write!(f, " {k}: {v}")?;
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
