use bytes::Bytes;

/// A fully parsed HTTP request.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: String,
    /// Header fields, in the order they were received.
    pub fields: Vec<HttpField>,
    pub body: Bytes,
    /// Set when the client sent `Connection: keep-alive`.
    pub keep_alive: bool,
}

impl Request {
    /// Find the first header field with the given name, compared case-insensitively.
    pub fn field(&self, name: &str) -> Option<&HttpField> {
        self.fields.iter().find(|field| field.is(name))
    }

    /// The target without its query string.
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _query)) => path,
            None => &self.target,
        }
    }
}

/// A single `Name: value` header line.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HttpField {
    pub name: Bytes,
    pub value: Bytes,
}

impl HttpField {
    /// Split a header line on its first colon.
    ///
    /// Lines without a colon are kept whole as the name, with an empty value.
    pub(crate) fn parse(line: Bytes) -> Self {
        let Some(split) = line.iter().position(|byte| *byte == b':') else {
            return Self {
                name: line,
                value: Bytes::new(),
            };
        };

        let name = line.slice(trim_range(&line[..split]));
        let value = trim_range(&line[split + 1..]);
        let value = line.slice(split + 1 + value.start..split + 1 + value.end);

        Self { name, value }
    }

    /// Check if this field has the given name, compared case-insensitively.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name.as_bytes())
    }

    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

/// Byte range of `bytes` with surrounding ASCII whitespace removed.
pub(crate) fn trim_range(bytes: &[u8]) -> std::ops::Range<usize> {
    let start = bytes
        .iter()
        .position(|byte| !byte.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|byte| !byte.is_ascii_whitespace())
        .map_or(start, |index| index + 1);

    start..end
}
