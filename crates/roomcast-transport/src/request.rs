//! The HTTP request target a client used to open its connection.

/// Path and query string captured during the WebSocket upgrade.
///
/// Roomcast clients encode the room in the path (`/ws/{room}`) and the
/// bearer credential in the query (`?token=...`), so the lifecycle
/// controller needs both after the handshake has completed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    path: String,
    query: Option<String>,
}

impl ConnectRequest {
    /// Creates a request target from its raw parts.
    pub fn new(path: impl Into<String>, query: Option<String>) -> Self {
        Self {
            path: path.into(),
            query,
        }
    }

    /// Parses a target such as `/ws/general?token=abc`.
    pub fn parse(target: &str) -> Self {
        match target.split_once('?') {
            Some((path, query)) => Self::new(path, Some(query.to_string())),
            None => Self::new(target, None),
        }
    }

    /// The raw request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns the percent-decoded path remainder after `prefix`.
    ///
    /// `None` when the path does not start with `prefix` or nothing
    /// follows it.
    pub fn path_suffix(&self, prefix: &str) -> Option<String> {
        let rest = self.path.strip_prefix(prefix)?;
        if rest.is_empty() {
            return None;
        }
        Some(percent_decode(rest))
    }

    /// Returns the first percent-decoded value for `name` in the query.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query
            .as_deref()?
            .split('&')
            .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| percent_decode(&value.replace('+', " ")))
    }
}

/// Decodes `%XX` escapes. Malformed escapes are kept verbatim.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = decoded {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
