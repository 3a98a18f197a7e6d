//! Netscape cookie file parsing.
//!
//! Browser extensions export session cookies as the classic Netscape format:
//! seven TAB-separated fields per line. Parsing is lenient: malformed lines
//! are collected as warnings so one bad line does not discard a usable
//! export, but a non-empty file that yields zero cookies is an error.

use std::fmt;
use std::io::BufRead;

use serde::{Deserialize, Serialize};

/// A single workspace session cookie.
///
/// The value is kept out of `Debug` output so transcripts and logs never
/// carry live credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionCookie {
    /// Cookie domain (e.g. `.workspace.example`).
    pub domain: String,
    /// Whether subdomains match.
    pub tailmatch: bool,
    /// URL path scope.
    pub path: String,
    /// HTTPS-only flag.
    pub secure: bool,
    /// Unix expiry timestamp (0 = session cookie).
    pub expires: u64,
    /// Cookie name.
    pub name: String,
    value: String,
}

impl SessionCookie {
    /// Creates a cookie entry.
    #[must_use]
    pub fn new(
        domain: String,
        tailmatch: bool,
        path: String,
        secure: bool,
        expires: u64,
        name: String,
        value: String,
    ) -> Self {
        Self {
            domain,
            tailmatch,
            path,
            secure,
            expires,
            name,
            value,
        }
    }

    /// Returns the cookie value. Sensitive; never log it.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Renders the `Set-Cookie`-style header string for jar insertion.
    #[must_use]
    pub fn header_string(&self) -> String {
        let mut header = format!(
            "{}={}; Domain={}; Path={}",
            self.name, self.value, self.domain, self.path
        );
        if self.secure {
            header.push_str("; Secure");
        }
        header
    }
}

impl fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCookie")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Errors raised while parsing a cookie export.
#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    /// I/O error reading the export.
    #[error("failed to read cookie file: {0}")]
    Io(#[from] std::io::Error),

    /// A non-empty file produced no valid cookies.
    #[error("no valid cookies found ({malformed_count} lines failed to parse)")]
    NoCookiesFound {
        /// Number of malformed lines encountered.
        malformed_count: usize,
    },
}

/// Parse outcome: cookies plus per-line warnings for malformed entries.
#[derive(Debug)]
pub struct CookieParse {
    /// Successfully parsed cookies.
    pub cookies: Vec<SessionCookie>,
    /// `(line number, reason)` for each skipped line.
    pub warnings: Vec<(usize, String)>,
}

/// Parses a Netscape-format cookie export.
///
/// Blank lines and `#` comments (including the standard header) are skipped.
///
/// # Errors
///
/// Returns [`CookieError::Io`] on read failure, or
/// [`CookieError::NoCookiesFound`] when data lines exist but none parse.
pub fn parse_netscape_cookies(reader: impl BufRead) -> Result<CookieParse, CookieError> {
    let mut cookies = Vec::new();
    let mut warnings = Vec::new();
    let mut data_lines = 0;

    for (idx, line_result) in reader.lines().enumerate() {
        let line_number = idx + 1;
        let line = line_result?;
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        data_lines += 1;

        match parse_cookie_line(line) {
            Ok(cookie) => cookies.push(cookie),
            Err(reason) => warnings.push((line_number, reason)),
        }
    }

    if cookies.is_empty() && data_lines > 0 {
        return Err(CookieError::NoCookiesFound {
            malformed_count: warnings.len(),
        });
    }

    Ok(CookieParse { cookies, warnings })
}

fn parse_cookie_line(line: &str) -> Result<SessionCookie, String> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 7 {
        return Err(format!(
            "expected 7 TAB-separated fields, found {}",
            fields.len()
        ));
    }

    let tailmatch = parse_bool_field(fields[1], "tailmatch")?;
    let secure = parse_bool_field(fields[3], "secure")?;
    let expires: u64 = fields[4]
        .parse()
        .map_err(|_| format!("invalid expiry timestamp '{}'", fields[4]))?;

    if fields[5].is_empty() {
        return Err("cookie name is empty".to_string());
    }

    Ok(SessionCookie::new(
        fields[0].to_string(),
        tailmatch,
        fields[2].to_string(),
        secure,
        expires,
        fields[5].to_string(),
        fields[6].to_string(),
    ))
}

fn parse_bool_field(raw: &str, field: &str) -> Result<bool, String> {
    match raw {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        other => Err(format!("invalid {field} flag '{other}'")),
    }
}
