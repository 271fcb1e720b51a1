//! Per-request cookie jar: parses the incoming `Cookie` header, tracks
//! changes, and serialises them back as `Set-Cookie` lines.

use hashbrown::HashMap;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use shovel_common::ShovelError;
use std::time::SystemTime;

use crate::request::Request;

pub type Result<T> = shovel_common::Result<T>;

/// Cookie name/value limit from the data model: `set` enforces a
/// 4096-byte name+value limit.
const MAX_NAME_VALUE_BYTES: usize = 4096;

const ENCODE_SET: &AsciiSet = &CONTROLS.add(b'=').add(b';').add(b',').add(b' ').add(b'%');

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

impl Default for SameSite {
    fn default() -> Self {
        SameSite::Strict
    }
}

#[derive(Debug, Clone)]
pub struct SetCookieOptions {
    pub path: String,
    pub same_site: SameSite,
    pub expires: Option<SystemTime>,
    pub domain: Option<String>,
    pub partitioned: bool,
}

impl Default for SetCookieOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            same_site: SameSite::default(),
            expires: None,
            domain: None,
            partitioned: false,
        }
    }
}

#[derive(Debug, Clone)]
enum Change {
    Set {
        value: String,
        options: SetCookieOptions,
    },
    Delete,
}

/// Bound to one request for its whole lifetime; changes made during a
/// fetch are serialised into that fetch's own response and never leak
/// into another request.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    parsed: HashMap<String, String>,
    changes: HashMap<String, Change>,
}

impl CookieJar {
    pub fn from_request(request: &Request) -> Self {
        let parsed = request
            .cookie_header()
            .map(parse_cookie_header)
            .unwrap_or_default();
        Self {
            parsed,
            changes: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        match self.changes.get(name) {
            Some(Change::Set { value, .. }) => Some(value.clone()),
            Some(Change::Delete) => None,
            None => self.parsed.get(name).cloned(),
        }
    }

    pub fn get_all(&self, name: Option<&str>) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let mut seen = hashbrown::HashSet::new();
        for key in self.changes.keys().chain(self.parsed.keys()) {
            if !seen.insert(key.clone()) {
                continue;
            }
            if let Some(filter) = name {
                if filter != key {
                    continue;
                }
            }
            if let Some(value) = self.get(key) {
                out.push((key.clone(), value));
            }
        }
        out
    }

    pub fn set(&mut self, name: &str, value: &str, options: Option<SetCookieOptions>) -> Result<()> {
        if name.len() + value.len() > MAX_NAME_VALUE_BYTES {
            return Err(ShovelError::InvalidArgument(format!(
                "cookie '{name}' exceeds the {MAX_NAME_VALUE_BYTES}-byte name+value limit"
            )));
        }
        self.changes.insert(
            name.to_string(),
            Change::Set {
                value: value.to_string(),
                options: options.unwrap_or_default(),
            },
        );
        Ok(())
    }

    pub fn delete(&mut self, name: &str) {
        self.changes.insert(name.to_string(), Change::Delete);
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn set_cookie_lines(&self) -> Vec<String> {
        self.changes
            .iter()
            .map(|(name, change)| serialize_change(name, change))
            .collect()
    }
}

fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in header.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (name, value) = match pair.split_once('=') {
            Some((n, v)) => (n, v),
            None => (pair, ""),
        };
        let name = percent_decode_str(name.trim()).decode_utf8_lossy().into_owned();
        let value = percent_decode_str(value.trim()).decode_utf8_lossy().into_owned();
        map.insert(name, value);
    }
    map
}

fn serialize_change(name: &str, change: &Change) -> String {
    let encoded_name = utf8_percent_encode(name, ENCODE_SET).to_string();
    match change {
        Change::Delete => {
            let encoded_value = utf8_percent_encode("", ENCODE_SET).to_string();
            format!(
                "{encoded_name}={encoded_value}; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT; SameSite=Strict; Secure"
            )
        }
        Change::Set { value, options } => {
            let encoded_value = utf8_percent_encode(value, ENCODE_SET).to_string();
            let mut line = format!(
                "{encoded_name}={encoded_value}; Path={}; SameSite={}; Secure",
                options.path,
                options.same_site.as_str()
            );
            if let Some(domain) = &options.domain {
                line.push_str(&format!("; Domain={domain}"));
            }
            if let Some(expires) = options.expires {
                let dt: chrono::DateTime<chrono::Utc> = expires.into();
                line.push_str(&format!(
                    "; Expires={}",
                    dt.format("%a, %d %b %Y %H:%M:%S GMT")
                ));
            }
            if options.partitioned {
                line.push_str("; Partitioned");
            }
            line
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::COOKIE;
    use url::Url;

    fn request_with_cookie(header: &str) -> Request {
        let mut req = Request::new(http::Method::GET, Url::parse("http://local/x").unwrap());
        req.headers.insert(COOKIE, header.parse().unwrap());
        req
    }

    #[test]
    fn test_parses_multiple_cookies_and_trims_whitespace() {
        let jar = CookieJar::from_request(&request_with_cookie("a=1;  b=2 ; c="));
        assert_eq!(jar.get("a"), Some("1".to_string()));
        assert_eq!(jar.get("b"), Some("2".to_string()));
        assert_eq!(jar.get("c"), Some("".to_string()));
    }

    #[test]
    fn test_parsing_uri_decodes_names_and_values() {
        let jar = CookieJar::from_request(&request_with_cookie("na%20me=val%3Due"));
        assert_eq!(jar.get("na me"), Some("val=ue".to_string()));
    }

    #[test]
    fn test_set_shadows_parsed_value_without_mutating_it() {
        let mut jar = CookieJar::from_request(&request_with_cookie("a=1"));
        jar.set("a", "2", None).unwrap();
        assert_eq!(jar.get("a"), Some("2".to_string()));
    }

    #[test]
    fn test_delete_hides_a_parsed_cookie() {
        let mut jar = CookieJar::from_request(&request_with_cookie("a=1"));
        jar.delete("a");
        assert_eq!(jar.get("a"), None);
    }

    #[test]
    fn test_set_rejects_oversized_name_value() {
        let mut jar = CookieJar::default();
        let huge = "x".repeat(MAX_NAME_VALUE_BYTES + 1);
        assert!(jar.set("a", &huge, None).is_err());
    }

    #[test]
    fn test_set_cookie_line_has_default_path_and_same_site() {
        let mut jar = CookieJar::default();
        jar.set("session", "abc", None).unwrap();
        let lines = jar.set_cookie_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("Path=/"));
        assert!(lines[0].contains("SameSite=Strict"));
        assert!(lines[0].contains("Secure"));
    }

    #[test]
    fn test_delete_emits_expired_cookie() {
        let mut jar = CookieJar::default();
        jar.delete("session");
        let lines = jar.set_cookie_lines();
        assert!(lines[0].contains("Expires=Thu, 01 Jan 1970"));
    }

    #[test]
    fn test_no_changes_means_no_set_cookie_lines() {
        let jar = CookieJar::from_request(&request_with_cookie("a=1"));
        assert!(!jar.has_changes());
        assert!(jar.set_cookie_lines().is_empty());
    }
}
