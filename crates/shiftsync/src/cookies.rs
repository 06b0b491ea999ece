//! Session cookie jar.
//!
//! A [`SessionCookies`] value is an ordered set of [`CookieRecord`]s unique by
//! `(name, domain, path)`. It is what the portal session *is*: the jar captured
//! after a login, handed back to callers, and fed into the next call.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `SameSite` attribute of a cookie.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
    #[default]
    Unset,
}

impl SameSite {
    #[inline]
    fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }
}

/// A single browser cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default, skip_serializing_if = "SameSite::is_unset")]
    pub same_site: SameSite,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_path() -> String {
    "/".to_string()
}

impl CookieRecord {
    /// Create a session cookie with path `/` and no attributes.
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: default_path(),
            secure: false,
            http_only: false,
            same_site: SameSite::Unset,
            expires_at: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Identity of this cookie within a jar.
    #[inline]
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.name, &self.domain, &self.path)
    }

    #[inline]
    fn same_key(&self, other: &CookieRecord) -> bool {
        self.key() == other.key()
    }
}

/// Ordered cookie jar, unique by `(name, domain, path)`.
///
/// Inserting a record whose key is already present replaces it in place, so the
/// original ordering survives refreshes. New keys are appended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<CookieRecord>", into = "Vec<CookieRecord>")]
pub struct SessionCookies {
    records: Vec<CookieRecord>,
}

impl SessionCookies {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CookieRecord> {
        self.records.iter()
    }

    /// Look up a cookie by its full key.
    pub fn get(&self, name: &str, domain: &str, path: &str) -> Option<&CookieRecord> {
        self.records
            .iter()
            .find(|c| c.key() == (name, domain, path))
    }

    /// First cookie with the given name, regardless of domain or path.
    pub fn find_by_name(&self, name: &str) -> Option<&CookieRecord> {
        self.records.iter().find(|c| c.name == name)
    }

    /// Insert a record, returning the one it replaced.
    pub fn insert(&mut self, record: CookieRecord) -> Option<CookieRecord> {
        match self.records.iter_mut().find(|c| c.same_key(&record)) {
            Some(existing) => Some(std::mem::replace(existing, record)),
            None => {
                self.records.push(record);
                None
            }
        }
    }

    /// Insert every record of `other` into this jar.
    pub fn merge(&mut self, other: impl IntoIterator<Item = CookieRecord>) {
        for record in other {
            self.insert(record);
        }
    }

    /// Render as a `Cookie` request header value.
    pub fn to_header(&self) -> String {
        self.records
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Parse a `Cookie` header style string (`a=1; b=2`).
    ///
    /// Every record is scoped to `domain` with path `/`. Fragments without an
    /// `=` or with an empty name are skipped.
    pub fn parse_header(header: &str, domain: &str) -> Self {
        header
            .split(';')
            .filter_map(|part| {
                let (name, value) = part.trim().split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some(CookieRecord::new(name, value.trim(), domain))
            })
            .collect()
    }
}

impl From<Vec<CookieRecord>> for SessionCookies {
    fn from(records: Vec<CookieRecord>) -> Self {
        records.into_iter().collect()
    }
}

impl From<SessionCookies> for Vec<CookieRecord> {
    fn from(cookies: SessionCookies) -> Self {
        cookies.records
    }
}

impl FromIterator<CookieRecord> for SessionCookies {
    fn from_iter<I: IntoIterator<Item = CookieRecord>>(iter: I) -> Self {
        let mut jar = SessionCookies::new();
        jar.merge(iter);
        jar
    }
}

impl IntoIterator for SessionCookies {
    type Item = CookieRecord;
    type IntoIter = std::vec::IntoIter<CookieRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a SessionCookies {
    type Item = &'a CookieRecord;
    type IntoIter = std::slice::Iter<'a, CookieRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl fmt::Display for SessionCookies {
    /// Names only; values are credentials.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.records.iter().map(|c| c.name.as_str()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_replaces_in_place() {
        let mut jar = SessionCookies::new();
        jar.insert(CookieRecord::new("SESSION", "old", "portal.example"));
        jar.insert(CookieRecord::new("XSRF", "tok", "portal.example"));

        let previous = jar.insert(CookieRecord::new("SESSION", "new", "portal.example"));

        assert_eq!(previous.map(|c| c.value), Some("old".to_string()));
        assert_eq!(jar.len(), 2);
        let names: Vec<_> = jar.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["SESSION", "XSRF"]);
        assert_eq!(
            jar.get("SESSION", "portal.example", "/").map(|c| c.value.as_str()),
            Some("new")
        );
    }

    #[test]
    fn test_key_includes_domain_and_path() {
        let mut jar = SessionCookies::new();
        jar.insert(CookieRecord::new("id", "a", "portal.example"));
        jar.insert(CookieRecord::new("id", "b", "login.idp.example"));
        jar.insert(CookieRecord::new("id", "c", "portal.example").with_path("/schedule"));

        assert_eq!(jar.len(), 3);
        assert_eq!(jar.find_by_name("id").map(|c| c.value.as_str()), Some("a"));
    }

    #[test]
    fn test_merge_appends_new_keys() {
        let mut jar: SessionCookies = vec![
            CookieRecord::new("a", "1", "d"),
            CookieRecord::new("b", "2", "d"),
        ]
        .into();
        jar.merge(vec![
            CookieRecord::new("b", "20", "d"),
            CookieRecord::new("c", "3", "d"),
        ]);

        assert_eq!(jar.to_header(), "a=1; b=20; c=3");
    }

    #[test]
    fn test_parse_header() {
        let jar = SessionCookies::parse_header(" SESSION=abc ; flag ; =x; XSRF=t=k", "portal.example");

        assert_eq!(jar.len(), 2);
        assert_eq!(jar.to_header(), "SESSION=abc; XSRF=t=k");
        assert!(jar.iter().all(|c| c.domain == "portal.example" && c.path == "/"));
    }

    #[test]
    fn test_deserialize_dedupes() {
        let json = r#"[
            {"name":"a","value":"1","domain":"d"},
            {"name":"a","value":"2","domain":"d","path":"/"}
        ]"#;
        let jar: SessionCookies = serde_json::from_str(json).unwrap();
        assert_eq!(jar.len(), 1);
        assert_eq!(jar.find_by_name("a").unwrap().value, "2");
    }

    #[test]
    fn test_serialize_omits_unset_fields() {
        let jar: SessionCookies = vec![CookieRecord::new("a", "1", "d").http_only(true)].into();
        let json = serde_json::to_value(&jar).unwrap();

        let record = &json[0];
        assert_eq!(record["httpOnly"], true);
        assert!(record.get("expiresAt").is_none());
        assert!(record.get("sameSite").is_none());
    }

    #[test]
    fn test_display_hides_values() {
        let jar: SessionCookies = vec![CookieRecord::new("SESSION", "secret-value", "d")].into();
        let shown = jar.to_string();
        assert_eq!(shown, "[SESSION]");
    }
}
