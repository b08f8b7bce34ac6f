use serde::Deserialize;
use url::Url;

use crate::error::RelayError;

/// Query parameters of a relay request.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayParams {
    pub url: String,
    pub limit: Option<u64>,
}

impl RelayParams {
    /// Reads `url` and `limit` from the query string. The first occurrence of
    /// each wins. An empty `url` counts as missing; `limit` is read from its
    /// leading digits, see [`parse_limit`].
    pub fn from_url(url: &Url) -> Result<Self, RelayError> {
        let mut target = None;
        let mut limit = None;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "url" if target.is_none() => target = Some(value.into_owned()),
                "limit" if limit.is_none() => limit = Some(value.into_owned()),
                _ => {}
            }
        }

        let url = target
            .filter(|u| !u.is_empty())
            .ok_or(RelayError::MissingUrl)?;
        let limit = limit.as_deref().and_then(parse_limit);

        Ok(Self { url, limit })
    }
}

/// Reads the leading decimal digits of `raw` (after whitespace and an optional
/// `+`), so `10abc` and `10.5` both give 10. No digits, or a leading `-`,
/// gives `None`. Values past `u64::MAX` saturate.
pub fn parse_limit(raw: &str) -> Option<u64> {
    let raw = raw.trim_start();
    let raw = raw.strip_prefix('+').unwrap_or(raw);
    let digits = raw.bytes().take_while(u8::is_ascii_digit);

    let mut seen = false;
    let value = digits.fold(0u64, |acc, d| {
        seen = true;
        acc.saturating_mul(10).saturating_add(u64::from(d - b'0'))
    });
    seen.then_some(value)
}

/// Options for the HTML to Markdown conversion. Missing fields fall back to
/// the defaults, so `{}` is a valid configuration.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ConvertConfig {
    pub include_links: bool,
    pub include_images: bool,
    pub bullet_marker: String,
    /// Deeper headings are rendered as bold paragraphs.
    pub max_heading_level: u8,
    /// Elements dropped together with their content.
    pub ignore: Vec<String>,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            include_links: true,
            include_images: true,
            bullet_marker: "*".to_string(),
            max_heading_level: 6,
            ignore: ["head", "script", "style", "noscript", "template"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }
}

impl ConvertConfig {
    /// Parses the `CONVERT_CONFIG` worker variable. `None` yields the defaults.
    pub fn from_json_var(raw: Option<&str>) -> Result<Self, serde_json::Error> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self::default()),
            Some(json) => serde_json::from_str(json),
        }
    }

    pub fn ignores(&self, tag: &str) -> bool {
        self.ignore.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}
