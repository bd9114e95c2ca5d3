//! Request parsing.

use std::collections::HashMap;

use thiserror::Error;

/// The raw bytes could not be split into a well-formed request.
///
/// Always answered with a 400-class response.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The request had no request line at all.
    #[error("request has no request line")]
    MissingRequestLine,

    /// The first line did not split into method, target, and version.
    #[error("malformed request line: '{line}'")]
    MalformedRequestLine {
        /// The offending line.
        line: String,
    },
}

/// A parsed HTTP request.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Request method (`GET`, `POST`, ...).
    pub method: String,
    /// Full request target, including any query string.
    pub target: String,
    /// Target with the `?...` suffix removed.
    pub path: String,
    /// Header map; keys stored lowercase.
    pub headers: HashMap<String, String>,
    /// Body bytes (everything after the blank line).
    pub body: Vec<u8>,
    /// The raw request bytes as read from the socket.
    pub raw: Vec<u8>,
}

impl Request {
    /// Parse raw request bytes.
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        let (head, body) = split_head_body(raw);
        let head_text = String::from_utf8_lossy(head);
        let mut lines = head_text.split("\r\n");

        let request_line = lines.next().ok_or(ParseError::MissingRequestLine)?;
        if request_line.trim().is_empty() {
            return Err(ParseError::MissingRequestLine);
        }

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(ParseError::MalformedRequestLine {
                line: request_line.to_string(),
            });
        }
        let method = parts[0].to_string();
        let target = parts[1].to_string();

        let path = match target.find('?') {
            Some(pos) => target[..pos].to_string(),
            None => target.clone(),
        };

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        Ok(Self {
            method,
            target,
            path,
            headers,
            body: body.to_vec(),
            raw: raw.to_vec(),
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The query string, if the target carried one.
    pub fn query(&self) -> Option<&str> {
        self.target.find('?').map(|pos| &self.target[pos + 1..])
    }

    /// Decompose the query string into key/value pairs.
    ///
    /// Pairs split on `&`, keys from values on the first `=`; a key
    /// without `=` maps to the empty string.
    pub fn query_params(&self) -> HashMap<String, String> {
        let mut params = HashMap::new();
        if let Some(query) = self.query() {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                match pair.split_once('=') {
                    Some((key, value)) => params.insert(key.to_string(), value.to_string()),
                    None => params.insert(pair.to_string(), String::new()),
                };
            }
        }
        params
    }
}

/// Split raw bytes at the header/body separator.
fn split_head_body(raw: &[u8]) -> (&[u8], &[u8]) {
    match raw.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(pos) => (&raw[..pos], &raw[pos + 4..]),
        None => (raw, &[][..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_request_line() {
        let raw = b"GET /api/users HTTP/1.1\r\nHost: x\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "/api/users");
        assert_eq!(req.path, "/api/users");
        assert_eq!(req.header("host"), Some("x"));
        assert_eq!(req.header("Host"), Some("x"));
        assert!(req.body.is_empty());
        assert_eq!(req.raw, raw);
    }

    #[test]
    fn test_path_strips_query() {
        let raw = b"GET /search?q=rust&page=2 HTTP/1.1\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.target, "/search?q=rust&page=2");
        assert_eq!(req.path, "/search");
        let params = req.query_params();
        assert_eq!(params.get("q").map(String::as_str), Some("rust"));
        assert_eq!(params.get("page").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_body_extraction() {
        let raw = b"POST /submit HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.body, b"hello");
        assert_eq!(req.header("content-length"), Some("5"));
    }

    #[test]
    fn test_malformed_first_line_rejected() {
        assert!(matches!(
            Request::parse(b"GARBAGE\r\n\r\n"),
            Err(ParseError::MalformedRequestLine { .. })
        ));
        assert!(matches!(
            Request::parse(b"GET /too many parts HTTP/1.1\r\n\r\n"),
            Err(ParseError::MalformedRequestLine { .. })
        ));
        assert!(matches!(
            Request::parse(b""),
            Err(ParseError::MissingRequestLine)
        ));
    }

    #[test]
    fn test_value_with_colon_survives() {
        let raw = b"GET / HTTP/1.1\r\nReferer: http://example.com/a\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.header("referer"), Some("http://example.com/a"));
    }

    #[test]
    fn test_key_only_query_param() {
        let raw = b"GET /x?debug&q=1 HTTP/1.1\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        let params = req.query_params();
        assert_eq!(params.get("debug").map(String::as_str), Some(""));
        assert_eq!(params.get("q").map(String::as_str), Some("1"));
    }
}
