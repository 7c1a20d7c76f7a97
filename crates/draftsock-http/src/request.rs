use std::collections::HashMap;

use bytes::Bytes;

/// Canonicalize a header name to `Title-Case-Per-Hyphenated-Segment`.
///
/// `sec-websocket-key` becomes `Sec-Websocket-Key`. Every later lookup in
/// the protocol layer uses this single spelling, regardless of how the
/// client cased the header.
pub fn canonicalize_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for ch in name.trim().chars() {
        let ch = if upper {
            ch.to_ascii_uppercase()
        } else {
            ch.to_ascii_lowercase()
        };
        upper = matches!(ch, '-' | ' ' | '\t');
        out.push(ch);
    }
    out
}

/// Request headers, keyed by canonicalized name.
///
/// A repeated header keeps every value in arrival order; [`Headers::get`]
/// returns the first.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: HashMap<String, Vec<String>>,
}

impl Headers {
    /// First value of a header, if present. `name` must be canonicalized.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of a header, in arrival order.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries.get(name).map_or(&[], Vec::as_slice)
    }

    /// Whether the header is present at all.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, name: String, value: String) {
        self.entries.entry(name).or_default().push(value);
    }
}

/// A parsed upgrade request: headers, request target, query params, body.
///
/// Built once per unupgraded socket read and discarded after the handshake
/// succeeds or the socket is closed.
#[derive(Debug, Clone, Default)]
pub struct ParsedRequest {
    /// Canonicalized request headers.
    pub headers: Headers,
    /// Request target from the `GET <path> HTTP...` line, query included.
    pub path: String,
    /// Decoded query parameters, in order of appearance.
    pub params: Vec<(String, String)>,
    /// Raw bytes following the blank line that ends the header section.
    pub body: Bytes,
}

impl ParsedRequest {
    /// Parse a raw buffer read from a not-yet-upgraded socket.
    ///
    /// Never fails: anything that does not look like a header line is
    /// skipped, a missing request line leaves `path` empty, and a missing
    /// blank line leaves `body` empty.
    pub fn parse(raw: &[u8]) -> Self {
        let (head, body) = split_head_body(raw);
        let head = String::from_utf8_lossy(head);

        let mut headers = Headers::default();
        let mut path = String::new();

        for line in fold_lines(&head) {
            if path.is_empty() {
                if let Some(target) = request_target(&line) {
                    path = target.to_string();
                }
            }
            if let Some((name, value)) = line.split_once(": ") {
                if !name.is_empty() {
                    headers.push(canonicalize_header_name(name), value.trim().to_string());
                }
            }
        }

        let params = match path.split_once('?') {
            Some((_, query)) => parse_query(query),
            None => Vec::new(),
        };

        Self {
            headers,
            path,
            params,
            body: Bytes::copy_from_slice(body),
        }
    }

    /// First query parameter with the given name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

fn split_head_body(raw: &[u8]) -> (&[u8], &[u8]) {
    match raw.windows(4).position(|window| window == b"\r\n\r\n") {
        Some(at) => (&raw[..at], &raw[at + 4..]),
        None => (raw, &[]),
    }
}

/// Split the header section into lines, folding classic HTTP continuation
/// lines (CRLF followed by space or tab) into the preceding line.
fn fold_lines(head: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in head.split("\r\n") {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(previous) = lines.last_mut() {
                previous.push(' ');
                previous.push_str(line.trim_start_matches([' ', '\t']));
                continue;
            }
        }
        lines.push(line.to_string());
    }
    lines
}

fn request_target(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("GET ")?;
    let end = rest.rfind(" HTTP")?;
    Some(&rest[..end])
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (percent_decode(key), percent_decode(value)),
            None => (percent_decode(pair), String::new()),
        })
        .collect()
}

/// Decode `%XX` escapes and `+`-as-space, the encoding browsers use for
/// query strings. Invalid escapes pass through untouched.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => match hex_pair(bytes[i + 1], bytes[i + 2]) {
                Some(byte) => {
                    out.push(byte);
                    i += 3;
                }
                None => {
                    out.push(b'%');
                    i += 1;
                }
            },
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}
