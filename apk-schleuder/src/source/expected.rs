use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::http::HttpClient;
use crate::types::SourceError;

/// An expected value as written in the configuration file: a literal, or a
/// rule for deriving it from the source's own metadata.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ValueConfig {
    Literal(String),
    Derived(ExtractorConfig),
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ExtractorConfig {
    /// Take the attribute (or text) of the single element matching `css`.
    Css {
        css: String,
        #[serde(default)]
        attr: Option<String>,
        #[serde(default)]
        pattern: Option<String>,
        /// Lowercase and drop whitespace and `<br>` before matching `pattern`.
        #[serde(default)]
        squash: bool,
    },
    /// Take the value at JSON pointer `json`.
    Json {
        json: String,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        pattern: Option<String>,
    },
}

#[derive(Clone, Debug)]
pub enum Query {
    Css {
        selector: Selector,
        attr: Option<String>,
        squash: bool,
    },
    Json {
        pointer: String,
        url: Option<String>,
    },
}

/// Compiled extraction rule, validated when the source is built.
#[derive(Clone, Debug)]
pub struct Extractor {
    source: String,
    query: Query,
    pattern: Option<Regex>,
}

/// Compiled expected value, evaluated uniformly at the point of use.
#[derive(Clone, Debug)]
pub enum Expected {
    Literal(String),
    Derived(Extractor),
}

impl Expected {
    pub fn compile(config: &ValueConfig) -> Result<Self, String> {
        match config {
            ValueConfig::Literal(value) => Ok(Expected::Literal(value.clone())),
            ValueConfig::Derived(extractor) => Extractor::compile(extractor).map(Expected::Derived),
        }
    }

    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Expected::Literal(value) => Some(value),
            Expected::Derived(_) => None,
        }
    }
}

fn compile_pattern(pattern: Option<&str>) -> Result<Option<Regex>, String> {
    pattern
        .map(|p| Regex::new(p).map_err(|err| format!("invalid pattern `{p}`: {err}")))
        .transpose()
}

impl Extractor {
    pub fn compile(config: &ExtractorConfig) -> Result<Self, String> {
        match config {
            ExtractorConfig::Css {
                css,
                attr,
                pattern,
                squash,
            } => Ok(Self {
                source: css.clone(),
                query: Query::Css {
                    selector: Selector::parse(css)
                        .map_err(|err| format!("invalid CSS selector `{css}`: {err}"))?,
                    attr: attr.clone(),
                    squash: *squash,
                },
                pattern: compile_pattern(pattern.as_deref())?,
            }),
            ExtractorConfig::Json { json, url, pattern } => {
                if !json.is_empty() && !json.starts_with('/') {
                    return Err(format!("JSON pointer `{json}` must start with `/`"));
                }
                if let Some(url) = url {
                    reqwest::Url::parse(url).map_err(|err| format!("invalid URL `{url}`: {err}"))?;
                }
                Ok(Self {
                    source: json.clone(),
                    query: Query::Json {
                        pointer: json.clone(),
                        url: url.clone(),
                    },
                    pattern: compile_pattern(pattern.as_deref())?,
                })
            }
        }
    }

    /// Shorthand for built-in CSS rules of site adapters.
    pub fn css(css: &str, attr: Option<&str>) -> Result<Self, String> {
        Self::compile(&ExtractorConfig::Css {
            css: css.to_string(),
            attr: attr.map(str::to_string),
            pattern: None,
            squash: false,
        })
    }

    /// Document this extractor reads: its own URL, or the source's metadata document.
    pub fn document_url<'a>(&'a self, default: &'a str) -> &'a str {
        match &self.query {
            Query::Json { url: Some(url), .. } => url,
            _ => default,
        }
    }

    /// Apply the rule to an already fetched document.
    pub fn extract(&self, document: &str) -> Result<String, SourceError> {
        let raw = match &self.query {
            Query::Css {
                selector,
                attr,
                squash,
            } => {
                let text = select_single(document, selector, attr.as_deref(), &self.source)?;
                if *squash { squash_text(&text) } else { text }
            }
            Query::Json { pointer, .. } => json_value(document, pointer)?,
        };

        match &self.pattern {
            Some(pattern) => apply_pattern(pattern, &raw),
            None => Ok(raw),
        }
    }
}

fn select_single(
    html: &str,
    selector: &Selector,
    attr: Option<&str>,
    source: &str,
) -> Result<String, SourceError> {
    let document = Html::parse_document(html);
    let mut matches = document.select(selector);
    let first = matches.next();
    let extra = matches.count();
    let element = match (first, extra) {
        (Some(element), 0) => element,
        (None, _) => {
            return Err(SourceError::unavailable(format!(
                "expected one result for selector `{source}`, found none"
            )));
        }
        (Some(_), extra) => {
            return Err(SourceError::unavailable(format!(
                "expected one result for selector `{source}`, found {}",
                extra + 1
            )));
        }
    };

    let value = match attr {
        Some(name) => element
            .value()
            .attr(name)
            .ok_or_else(|| {
                SourceError::unavailable(format!("`{source}` has no attribute `{name}`"))
            })?
            .to_string(),
        None => element.text().collect::<String>(),
    };
    Ok(value.trim().to_string())
}

fn squash_text(text: &str) -> String {
    text.to_lowercase()
        .replace("<br>", "")
        .replace("<br/>", "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

fn json_value(document: &str, pointer: &str) -> Result<String, SourceError> {
    let value: Value = serde_json::from_str(document)
        .map_err(|err| SourceError::unavailable(format!("metadata is not valid JSON: {err}")))?;
    match value.pointer(pointer) {
        Some(Value::String(text)) => Ok(text.trim().to_string()),
        Some(Value::Number(number)) => Ok(number.to_string()),
        Some(other) => Err(SourceError::unavailable(format!(
            "`{pointer}` is not a scalar: {other}"
        ))),
        None => Err(SourceError::unavailable(format!(
            "`{pointer}` not present in metadata"
        ))),
    }
}

fn apply_pattern(pattern: &Regex, text: &str) -> Result<String, SourceError> {
    let captures = pattern.captures(text).ok_or_else(|| {
        SourceError::unavailable(format!("pattern `{pattern}` did not match `{text}`"))
    })?;
    let found = captures
        .name("value")
        .or_else(|| captures.get(1))
        .or_else(|| captures.get(0))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    Ok(found)
}

/// Per-source memo of fetched metadata documents, keyed by URL.
#[derive(Debug)]
pub struct Documents {
    http: HttpClient,
    cache: Mutex<HashMap<String, Arc<str>>>,
}

impl Documents {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Fetch `url` once per source instance.
    pub async fn get(&self, url: &str) -> Result<Arc<str>, SourceError> {
        let mut cache = self.cache.lock().await;
        if let Some(document) = cache.get(url) {
            return Ok(document.clone());
        }
        let document: Arc<str> = Arc::from(self.http.get_text(url).await?);
        cache.insert(url.to_string(), document.clone());
        Ok(document)
    }

    /// Evaluate `expected`, fetching its document relative to `metadata_url` if needed.
    pub async fn evaluate(&self, expected: &Expected, metadata_url: &str) -> Result<String, SourceError> {
        match expected {
            Expected::Literal(value) => Ok(value.clone()),
            Expected::Derived(extractor) => self.extract(extractor, metadata_url).await,
        }
    }

    pub async fn extract(&self, extractor: &Extractor, metadata_url: &str) -> Result<String, SourceError> {
        let document = self.get(extractor.document_url(metadata_url)).await?;
        extractor.extract(&document)
    }
}
