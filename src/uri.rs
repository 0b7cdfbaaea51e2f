//! Content URIs
//!
//! A content address has the form `scheme://namespace@path.ext#version?query`
//! where every part except `path` is optional. Parsing is total: any
//! well-formed string yields a URI, with an empty scheme replaced by the
//! configured default (`URI_DEFAULT_SCHEME`, typically `i18n`).
//!
//! A [`Uri`] is immutable. Equality, ordering and hashing are defined by the
//! rendered string, so a URI can be compared directly against string
//! literals in tests and used as a map key. Derived URIs are produced with
//! the `with_*` methods, which re-render from parts.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::conf::settings;
use crate::error::{Error, Result};

pub const SCHEME_SEPARATOR: &str = "://";
pub const NAMESPACE_SEPARATOR: char = '@';
pub const PATH_SEPARATOR: char = '/';
pub const EXT_SEPARATOR: char = '.';
pub const VERSION_SEPARATOR: char = '#';
pub const QUERY_SEPARATOR: char = '?';
pub const QUERY_PARAMETER_SEPARATOR: char = '&';
pub const QUERY_VARIABLE_SEPARATOR: char = '=';

/// Everything except alphanumerics and `_ . - ~` is percent-encoded in
/// query strings; spaces are encoded as `+`.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b' ');

/// Named URI parts, used for `has_parts` requirements at the backend
/// manager boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriPart {
    Scheme,
    Namespace,
    Path,
    Ext,
    Version,
    Query,
}

impl UriPart {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheme => "scheme",
            Self::Namespace => "namespace",
            Self::Path => "path",
            Self::Ext => "ext",
            Self::Version => "version",
            Self::Query => "query",
        }
    }
}

/// Ordered query mapping: key to list of values.
///
/// Insertion order is preserved; re-inserting an existing key replaces its
/// values but keeps the original position. Value lists hold at most one
/// element in practice (the last occurrence of a duplicate key wins).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    pairs: Vec<(String, Vec<String>)>,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, values: Vec<String>) {
        let key = key.into();
        if let Some(pair) = self.pairs.iter_mut().find(|(k, _)| *k == key) {
            pair.1 = values;
        } else {
            self.pairs.push((key, values));
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// An immutable content address.
#[derive(Clone, Debug, Default)]
pub struct Uri {
    rendered: String,
    scheme: Option<String>,
    namespace: Option<String>,
    path: Option<String>,
    ext: Option<String>,
    version: Option<String>,
    query: Option<Query>,
}

impl Uri {
    /// Parse a URI string. Parsing is total and never fails; defaults are
    /// applied afterwards (empty scheme becomes the configured default,
    /// other empty parts become absent).
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let (base, version) = match input.find(VERSION_SEPARATOR) {
            Some(i) => (&input[..i], Some(&input[i + 1..])),
            None => (input, None),
        };
        let (base, querystring) = match base.find(QUERY_SEPARATOR) {
            Some(i) => (&base[..i], Some(&base[i + 1..])),
            None => (base, None),
        };

        let query = querystring.map(parse_query).filter(|q| !q.is_empty());

        // Right-partitioned separators: the last occurrence wins.
        let (scheme, rest) = match base.rfind(SCHEME_SEPARATOR) {
            Some(i) => (&base[..i], &base[i + SCHEME_SEPARATOR.len()..]),
            None => ("", base),
        };
        let (namespace, rest) = match rest.rfind(NAMESPACE_SEPARATOR) {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => ("", rest),
        };
        let (mut path, mut ext) = match rest.rfind(EXT_SEPARATOR) {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => ("", rest),
        };
        if ext.contains(PATH_SEPARATOR) {
            path = rest;
            ext = "";
        }
        if path.is_empty() && !ext.is_empty() {
            path = ext;
            ext = "";
        }

        let scheme = if scheme.is_empty() {
            Some(default_scheme())
        } else {
            Some(scheme.to_owned())
        };

        Self::from_parts(
            scheme.as_deref(),
            non_empty(namespace),
            non_empty(path),
            non_empty(ext),
            version.filter(|v| !v.is_empty()),
            query,
        )
    }

    /// Render a URI from its parts. Empty strings count as absent. The
    /// default scheme is *not* applied here; `parse` is the only place
    /// defaults happen.
    #[must_use]
    pub fn from_parts(
        scheme: Option<&str>,
        namespace: Option<&str>,
        path: Option<&str>,
        ext: Option<&str>,
        version: Option<&str>,
        query: Option<Query>,
    ) -> Self {
        let scheme = scheme.filter(|s| !s.is_empty()).map(str::to_owned);
        let namespace = namespace.filter(|s| !s.is_empty()).map(str::to_owned);
        let path = path.filter(|s| !s.is_empty()).map(str::to_owned);
        let ext = ext.filter(|s| !s.is_empty()).map(str::to_owned);
        let version = version.filter(|s| !s.is_empty()).map(str::to_owned);
        let query = query.filter(|q| !q.is_empty());

        let mut rendered = String::new();
        if let Some(scheme) = &scheme {
            rendered.push_str(scheme);
            rendered.push_str(SCHEME_SEPARATOR);
        }
        if let Some(namespace) = &namespace {
            rendered.push_str(namespace);
            rendered.push(NAMESPACE_SEPARATOR);
        }
        if let Some(path) = &path {
            rendered.push_str(path);
            if let Some(ext) = &ext {
                rendered.push(EXT_SEPARATOR);
                rendered.push_str(ext);
            }
            if let Some(query) = &query {
                rendered.push(QUERY_SEPARATOR);
                for (i, (key, values)) in query.iter().enumerate() {
                    if i > 0 {
                        rendered.push(QUERY_PARAMETER_SEPARATOR);
                    }
                    rendered.push_str(&encode_component(key));
                    rendered.push(QUERY_VARIABLE_SEPARATOR);
                    if let Some(first) = values.first() {
                        rendered.push_str(&encode_component(first));
                    }
                }
            }
            if let Some(version) = &version {
                rendered.push(VERSION_SEPARATOR);
                rendered.push_str(version);
            }
        }

        Self {
            rendered,
            scheme,
            namespace,
            path,
            ext,
            version,
            query,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn ext(&self) -> Option<&str> {
        self.ext.as_deref()
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    #[must_use]
    pub fn query(&self) -> Option<&Query> {
        self.query.as_ref()
    }

    #[must_use]
    pub fn with_scheme(&self, scheme: Option<&str>) -> Self {
        Self::from_parts(
            scheme,
            self.namespace(),
            self.path(),
            self.ext(),
            self.version(),
            self.query.clone(),
        )
    }

    #[must_use]
    pub fn with_namespace(&self, namespace: Option<&str>) -> Self {
        Self::from_parts(
            self.scheme(),
            namespace,
            self.path(),
            self.ext(),
            self.version(),
            self.query.clone(),
        )
    }

    #[must_use]
    pub fn with_path(&self, path: Option<&str>) -> Self {
        Self::from_parts(
            self.scheme(),
            self.namespace(),
            path,
            self.ext(),
            self.version(),
            self.query.clone(),
        )
    }

    #[must_use]
    pub fn with_ext(&self, ext: Option<&str>) -> Self {
        Self::from_parts(
            self.scheme(),
            self.namespace(),
            self.path(),
            ext,
            self.version(),
            self.query.clone(),
        )
    }

    #[must_use]
    pub fn with_version(&self, version: Option<&str>) -> Self {
        Self::from_parts(
            self.scheme(),
            self.namespace(),
            self.path(),
            self.ext(),
            version,
            self.query.clone(),
        )
    }

    #[must_use]
    pub fn with_query(&self, query: Option<Query>) -> Self {
        Self::from_parts(
            self.scheme(),
            self.namespace(),
            self.path(),
            self.ext(),
            self.version(),
            query,
        )
    }

    /// True when every listed part is present and non-empty.
    #[must_use]
    pub fn has_parts(&self, parts: &[UriPart]) -> bool {
        parts.iter().all(|part| match part {
            UriPart::Scheme => self.scheme.is_some(),
            UriPart::Namespace => self.namespace.is_some(),
            UriPart::Path => self.path.is_some(),
            UriPart::Ext => self.ext.is_some(),
            UriPart::Version => self.version.is_some(),
            UriPart::Query => self.query.is_some(),
        })
    }

    /// Validate that all listed parts are present, or fail with
    /// [`Error::InvalidUri`] naming the full requirement.
    pub fn require_parts(&self, parts: &[UriPart]) -> Result<()> {
        if self.has_parts(parts) {
            Ok(())
        } else {
            let required = parts
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            Err(Error::InvalidUri {
                uri: self.rendered.clone(),
                required,
            })
        }
    }

    /// A URI with scheme, namespace, path and ext; everything needed to
    /// address a stored node apart from its version.
    #[must_use]
    pub fn is_absolute(&self) -> bool {
        self.has_parts(&[
            UriPart::Scheme,
            UriPart::Namespace,
            UriPart::Path,
            UriPart::Ext,
        ])
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() { None } else { Some(s) }
}

fn default_scheme() -> String {
    settings()
        .get_str("URI_DEFAULT_SCHEME")
        .unwrap_or_else(|| "i18n".to_owned())
}

fn parse_query(querystring: &str) -> Query {
    let mut query = Query::new();
    for pair in querystring.split(QUERY_PARAMETER_SEPARATOR) {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.find(QUERY_VARIABLE_SEPARATOR) {
            Some(i) => (&pair[..i], &pair[i + 1..]),
            None => (pair, ""),
        };
        let key = decode_component(key);
        let value = decode_component(value);
        let values = if value.is_empty() { vec![] } else { vec![value] };
        query.insert(key, values);
    }
    query
}

/// Percent-encode a query component, with spaces as `+`.
#[must_use]
pub fn encode_component(s: &str) -> String {
    utf8_percent_encode(s, QUERY_ENCODE_SET)
        .to_string()
        .replace(' ', "+")
}

/// Decode a percent-encoded query component, with `+` as space.
#[must_use]
pub fn decode_component(s: &str) -> String {
    let s = s.replace('+', " ");
    match percent_decode_str(&s).decode_utf8() {
        Ok(Cow::Borrowed(_)) => s,
        Ok(Cow::Owned(decoded)) => decoded,
        Err(_) => s,
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl PartialEq for Uri {
    fn eq(&self, other: &Self) -> bool {
        self.rendered == other.rendered
    }
}

impl Eq for Uri {}

impl PartialOrd for Uri {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Uri {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rendered.cmp(&other.rendered)
    }
}

impl std::hash::Hash for Uri {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.rendered.hash(state);
    }
}

impl PartialEq<str> for Uri {
    fn eq(&self, other: &str) -> bool {
        self.rendered == other
    }
}

impl PartialEq<&str> for Uri {
    fn eq(&self, other: &&str) -> bool {
        self.rendered == *other
    }
}

impl PartialEq<String> for Uri {
    fn eq(&self, other: &String) -> bool {
        self.rendered == *other
    }
}

impl From<&str> for Uri {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<&String> for Uri {
    fn from(s: &String) -> Self {
        Self::parse(s)
    }
}

impl From<String> for Uri {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<&Uri> for Uri {
    fn from(uri: &Uri) -> Self {
        uri.clone()
    }
}

impl FromStr for Uri {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl Serialize for Uri {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.rendered)
    }
}

impl<'de> Deserialize<'de> for Uri {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_full() {
        let uri = Uri::parse("i18n://sv-se@page/title.txt#draft");
        assert_eq!(uri.scheme(), Some("i18n"));
        assert_eq!(uri.namespace(), Some("sv-se"));
        assert_eq!(uri.path(), Some("page/title"));
        assert_eq!(uri.ext(), Some("txt"));
        assert_eq!(uri.version(), Some("draft"));
        assert_eq!(uri, "i18n://sv-se@page/title.txt#draft");
    }

    #[test]
    fn test_parse_defaults_scheme() {
        let uri = Uri::parse("page/title");
        assert_eq!(uri.scheme(), Some("i18n"));
        assert_eq!(uri.namespace(), None);
        assert_eq!(uri.path(), Some("page/title"));
        assert_eq!(uri.ext(), None);
        assert!(!uri.is_absolute());
        assert_eq!(uri, "i18n://page/title");
    }

    #[test]
    fn test_parse_dot_in_path_is_not_ext() {
        // A dot before the last slash does not start an extension.
        let uri = Uri::parse("i18n://sv-se@page.section/title");
        assert_eq!(uri.path(), Some("page.section/title"));
        assert_eq!(uri.ext(), None);
    }

    #[test]
    fn test_parse_bare_word_promotes_ext_to_path() {
        let uri = Uri::parse("title");
        assert_eq!(uri.path(), Some("title"));
        assert_eq!(uri.ext(), None);
    }

    #[test]
    fn test_clone_parts() {
        let uri = Uri::parse("page/title").with_namespace(Some("sv-se"));
        assert_eq!(uri, "i18n://sv-se@page/title");
        let uri = uri.with_ext(Some("txt"));
        assert_eq!(uri, "i18n://sv-se@page/title.txt");
        assert!(uri.is_absolute());
        let uri = uri.with_scheme(None);
        assert_eq!(uri, "sv-se@page/title.txt");
    }

    #[test]
    fn test_from_parts() {
        let uri = Uri::from_parts(
            Some("i18n"),
            Some("sv-se"),
            Some("page/title"),
            Some("txt"),
            None,
            None,
        );
        assert_eq!(uri, "i18n://sv-se@page/title.txt");
    }

    #[test]
    fn test_query_parsing() {
        let uri = Uri::parse("i18n://sv-se@page/title.txt?width=100&flag#1");
        let query = uri.query().expect("query parsed");
        assert_eq!(query.get("width"), Some(&["100".to_owned()][..]));
        assert_eq!(query.get("flag"), Some(&[][..]));
        assert_eq!(uri.version(), Some("1"));
        assert_eq!(uri, "i18n://sv-se@page/title.txt?width=100&flag=#1");
    }

    #[test]
    fn test_query_duplicate_key_last_wins() {
        let uri = Uri::parse("page/title?a=1&a=2");
        let query = uri.query().expect("query parsed");
        assert_eq!(query.get("a"), Some(&["2".to_owned()][..]));
        assert_eq!(query.len(), 1);
    }

    #[test]
    fn test_query_percent_decoding() {
        let uri = Uri::parse("page/title?name=sv+se%21");
        let query = uri.query().expect("query parsed");
        assert_eq!(query.get("name"), Some(&["sv se!".to_owned()][..]));
        // Re-rendered with the same encoding.
        assert_eq!(uri, "i18n://page/title?name=sv+se%21");
    }

    #[test]
    fn test_query_cleared() {
        let uri = Uri::parse("page/title?a=1");
        assert_eq!(uri.with_query(None), "i18n://page/title");
    }

    #[test]
    fn test_version_split_is_first_hash() {
        let uri = Uri::parse("page/title#1#2");
        assert_eq!(uri.version(), Some("1#2"));
    }

    #[test]
    fn test_require_parts() {
        let uri = Uri::parse("page/title");
        assert!(uri.require_parts(&[UriPart::Path]).is_ok());
        let err = uri
            .require_parts(&[UriPart::Namespace, UriPart::Path])
            .unwrap_err();
        assert!(err.to_string().contains("namespace, path"));
    }

    #[test]
    fn test_roundtrip_after_parse() {
        for input in [
            "i18n://sv-se@page/title.txt#draft",
            "i18n://sv-se@page/title.md#2",
            "l10n://global@foo/bar",
            "sv-se@label/email",
            "i18n://sv-se@a.txt",
        ] {
            let uri = Uri::parse(input);
            assert_eq!(Uri::parse(uri.as_str()), uri);
        }
    }

    proptest! {
        #[test]
        fn test_parts_roundtrip(
            scheme in "[a-z][a-z0-9]{0,7}",
            namespace in "[a-z][a-z0-9-]{0,11}",
            path in "[a-z][a-z0-9]{0,7}(/[a-z][a-z0-9]{0,7}){0,3}",
            ext in "[a-z]{1,4}",
            version in "(draft|[1-9][0-9]{0,3})",
        ) {
            let uri = Uri::from_parts(
                Some(&scheme),
                Some(&namespace),
                Some(&path),
                Some(&ext),
                Some(&version),
                None,
            );
            let reparsed = Uri::parse(uri.as_str());
            prop_assert_eq!(reparsed, uri);
        }
    }
}
