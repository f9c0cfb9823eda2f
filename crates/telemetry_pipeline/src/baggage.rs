//! W3C Baggage: application key/value pairs that travel with a trace.
//!
//! Baggage rides in its own `baggage` header next to `traceparent`. Values
//! are percent-encoded on the wire and decoded on parse, so any UTF-8
//! string can be carried. Member properties (the `;key=value` suffix) are
//! not interpreted, only kept so they reach the next hop.

use crate::propagation::PropagationError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Member {
    key: String,
    value: String,
    properties: Option<String>,
}

impl Member {
    fn header_value(&self) -> String {
        let mut out = format!("{}={}", self.key, encode(&self.value));
        if let Some(properties) = &self.properties {
            out.push(';');
            out.push_str(properties);
        }
        out
    }
}

/// Ordered set of baggage members with unique keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Baggage {
    members: Vec<Member>,
}

impl Baggage {
    /// Maximum number of list members.
    pub const MAX_MEMBERS: usize = 180;
    /// Maximum encoded size of one member.
    pub const MAX_MEMBER_BYTES: usize = 4096;
    /// Maximum encoded size of the whole header value.
    pub const MAX_HEADER_BYTES: usize = 8192;

    pub fn new() -> Self {
        Self::default()
    }

    /// Builds baggage from entries in order. A repeated key overwrites the
    /// earlier value.
    pub fn from_entries<I, K, V>(entries: I) -> Result<Self, PropagationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut baggage = Self::new();
        for (key, value) in entries {
            baggage = baggage.with_entry(key, value)?;
        }
        Ok(baggage)
    }

    /// Returns a copy with `key` set to `value`. An existing key keeps its
    /// position and loses its properties.
    pub fn with_entry(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, PropagationError> {
        let member = Member {
            key: key.into(),
            value: value.into(),
            properties: None,
        };
        if !is_token(&member.key) {
            let reason = format!("bad key {:?}", member.key);
            return Err(PropagationError::InvalidBaggage(reason));
        }
        if member.header_value().len() > Self::MAX_MEMBER_BYTES {
            return Err(PropagationError::InvalidBaggage(format!(
                "member {} longer than {} bytes",
                member.key,
                Self::MAX_MEMBER_BYTES
            )));
        }

        let mut next = self.clone();
        next.upsert(member);
        if next.members.len() > Self::MAX_MEMBERS {
            return Err(PropagationError::InvalidBaggage(format!(
                "more than {} members",
                Self::MAX_MEMBERS
            )));
        }
        if next.header_value().len() > Self::MAX_HEADER_BYTES {
            return Err(PropagationError::InvalidBaggage(format!(
                "header longer than {} bytes",
                Self::MAX_HEADER_BYTES
            )));
        }
        Ok(next)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.member(key).map(|m| m.value.as_str())
    }

    /// Raw `;`-separated properties attached to `key`, if any.
    pub fn properties(&self, key: &str) -> Option<&str> {
        self.member(key).and_then(|m| m.properties.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.members
            .iter()
            .map(|m| (m.key.as_str(), m.value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Renders the `baggage` header value.
    pub fn header_value(&self) -> String {
        self.members
            .iter()
            .map(Member::header_value)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parses a `baggage` header value.
    ///
    /// Malformed members are skipped. A repeated key keeps its first position
    /// and its last value. Parsing stops once the member or byte limit would
    /// be exceeded.
    pub fn parse_header(value: &str) -> Self {
        let mut baggage = Self::new();
        let mut bytes = 0;
        for raw in value.split(',') {
            if raw.trim().is_empty() {
                continue;
            }
            let Some(member) = parse_member(raw) else {
                tracing::debug!(member = raw, "skipping malformed baggage member");
                continue;
            };
            let len = member.header_value().len();
            if len > Self::MAX_MEMBER_BYTES {
                tracing::debug!(key = %member.key, len, "skipping oversized baggage member");
                continue;
            }
            let replaces = baggage.member(&member.key).is_some();
            if !replaces && baggage.members.len() == Self::MAX_MEMBERS {
                tracing::debug!("baggage truncated at {} members", Self::MAX_MEMBERS);
                break;
            }
            let separator = usize::from(!baggage.members.is_empty());
            if bytes + separator + len > Self::MAX_HEADER_BYTES {
                tracing::debug!("baggage truncated at {} bytes", Self::MAX_HEADER_BYTES);
                break;
            }
            bytes += separator + len;
            baggage.upsert(member);
        }
        baggage
    }

    fn member(&self, key: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.key == key)
    }

    fn upsert(&mut self, member: Member) {
        match self.members.iter_mut().find(|m| m.key == member.key) {
            Some(existing) => *existing = member,
            None => self.members.push(member),
        }
    }
}

fn parse_member(raw: &str) -> Option<Member> {
    let (pair, properties) = match raw.split_once(';') {
        Some((pair, properties)) => (pair, parse_properties(properties)),
        None => (raw, None),
    };
    let (key, value) = pair.split_once('=')?;
    let (key, value) = (key.trim(), value.trim());
    if !is_token(key) || !value.bytes().all(is_baggage_octet) {
        return None;
    }
    Some(Member {
        key: key.to_string(),
        value: decode(value)?,
        properties,
    })
}

/// Keeps well-formed `key` / `key=value` properties, trimmed, in order.
fn parse_properties(raw: &str) -> Option<String> {
    let properties: Vec<String> = raw
        .split(';')
        .filter_map(|property| match property.split_once('=') {
            Some((key, value)) => {
                let (key, value) = (key.trim(), value.trim());
                (is_token(key) && value.bytes().all(is_baggage_octet))
                    .then(|| format!("{key}={value}"))
            }
            None => {
                let key = property.trim();
                is_token(key).then(|| key.to_string())
            }
        })
        .collect();
    (!properties.is_empty()).then(|| properties.join(";"))
}

/// Non-alphanumeric characters allowed in an RFC 7230 `token`.
const TOKEN_SYMBOLS: &[u8] = b"!#$%&'*+-.^_`|~";

fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_token_char)
}

fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || TOKEN_SYMBOLS.contains(&b)
}

/// Printable ASCII except space, `"`, `,`, `;` and `\`.
fn is_baggage_octet(b: u8) -> bool {
    b.is_ascii_graphic() && !b"\",;\\".contains(&b)
}

fn encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        if is_baggage_octet(b) && b != b'%' {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Reverses [`encode`]. `None` on a truncated escape or non-UTF-8 result.
fn decode(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = value.get(i + 1..i + 3)?;
            if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
