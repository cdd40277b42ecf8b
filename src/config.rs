//! Stub configuration.
//!
//! Defines request matchers, response definitions, and registry settings.

use crate::error::RenderError;
use crate::http::{HttpHeaders, NOT_CONFIGURED_STATUS};
use crate::matcher::MatchContext;
use crate::renderer::FileSource;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Main configuration for a stub registry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct StubServerConfig {
    /// List of stub definitions
    #[serde(default)]
    pub stubs: Vec<StubDefinition>,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl StubServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, stub) in self.stubs.iter().enumerate() {
            stub.validate()
                .map_err(|e| anyhow::anyhow!("Stub {}: {}", i, e))?;
        }
        Ok(())
    }
}

/// A single stub definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StubDefinition {
    /// Unique identifier for this stub
    pub id: String,

    /// Optional name/description
    #[serde(default)]
    pub name: Option<String>,

    /// Request matcher
    pub request: RequestMatcher,

    /// Response to return
    pub response: ResponseDefinition,

    /// Priority (higher = matched first, ties go to the earlier stub)
    #[serde(default)]
    pub priority: i32,

    /// Whether this stub is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl StubDefinition {
    /// Validate the stub definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.id.is_empty() {
            anyhow::bail!("Stub id cannot be empty");
        }
        self.request.validate()?;
        self.response.validate()?;
        Ok(())
    }
}

/// Request matching configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestMatcher {
    /// HTTP method(s) to match (empty = any)
    #[serde(default)]
    pub method: Vec<String>,

    /// Path matching
    #[serde(default)]
    pub path: Option<PathMatcher>,

    /// Query parameter matching
    #[serde(default)]
    pub query: HashMap<String, QueryMatcher>,

    /// Header matching
    #[serde(default)]
    pub headers: HashMap<String, HeaderMatcher>,

    /// Body matching
    #[serde(default)]
    pub body: Option<BodyMatcher>,
}

impl RequestMatcher {
    /// Validate the request matcher.
    pub fn validate(&self) -> anyhow::Result<()> {
        for method in &self.method {
            method.parse::<crate::http::RequestMethod>()?;
        }
        if let Some(path) = &self.path {
            path.validate()?;
        }
        for (name, qm) in &self.query {
            if let QueryMatcher::Regex { pattern } = qm {
                validate_regex(pattern).map_err(|e| anyhow::anyhow!("Query {}: {}", name, e))?;
            }
        }
        for (name, hm) in &self.headers {
            if let HeaderMatcher::Regex { pattern } = hm {
                validate_regex(pattern).map_err(|e| anyhow::anyhow!("Header {}: {}", name, e))?;
            }
        }
        if let Some(body) = &self.body {
            body.validate()?;
        }
        Ok(())
    }
}

fn validate_regex(pattern: &str) -> anyhow::Result<()> {
    regex::Regex::new(pattern).map_err(|e| anyhow::anyhow!("Invalid regex: {}", e))?;
    Ok(())
}

/// Path matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PathMatcher {
    /// Exact path match
    Exact { value: String },
    /// Path prefix match
    Prefix { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// Glob pattern match
    Glob { pattern: String },
    /// Path with parameters (e.g., /users/{id})
    Template { template: String },
}

impl PathMatcher {
    /// Validate the path matcher.
    pub fn validate(&self) -> anyhow::Result<()> {
        match self {
            PathMatcher::Regex { pattern } => validate_regex(pattern)?,
            PathMatcher::Glob { pattern } => {
                globset::Glob::new(pattern).map_err(|e| anyhow::anyhow!("Invalid glob: {}", e))?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Query parameter matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryMatcher {
    /// Exact value match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// Parameter must be present (any value)
    Present,
    /// Parameter must be absent
    Absent,
}

/// Header matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeaderMatcher {
    /// Exact value match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// Header must be present (any value)
    Present,
    /// Header must be absent
    Absent,
    /// Value must contain substring
    Contains { value: String },
}

/// Body matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodyMatcher {
    /// Exact body match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// JSON path matching
    JsonPath {
        /// JSON path expressions and expected values
        expressions: BTreeMap<String, serde_json::Value>,
    },
    /// Body must contain substring
    Contains { value: String },
    /// Body must be valid JSON (any structure)
    Json,
    /// Body must be empty
    Empty,
}

impl BodyMatcher {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self {
            BodyMatcher::Regex { pattern } => validate_regex(pattern)?,
            BodyMatcher::JsonPath { expressions } => {
                for expr in expressions.keys() {
                    crate::matcher::parse_json_path(expr)
                        .map_err(|e| anyhow::anyhow!("Invalid JSON path {}: {}", expr, e))?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Declarative description of a response.
///
/// Definitions from configuration are always `configured`; the only
/// unconfigured definition is [`ResponseDefinition::not_configured`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response headers, in declared order
    #[serde(default)]
    pub headers: HttpHeaders,

    /// Response body
    #[serde(default)]
    pub body: Option<ResponseBody>,

    /// Names of transformers to apply, in order
    #[serde(default)]
    pub transformers: Vec<String>,

    #[serde(skip, default = "default_true")]
    configured: bool,

    /// Values captured while matching the request
    #[serde(skip)]
    match_context: MatchContext,
}

fn default_status() -> u16 {
    200
}

impl Default for ResponseDefinition {
    fn default() -> Self {
        Self::new(default_status())
    }
}

impl ResponseDefinition {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HttpHeaders::new(),
            body: None,
            transformers: Vec::new(),
            configured: true,
            match_context: MatchContext::default(),
        }
    }

    /// Shorthand for a definition with a plain text body.
    pub fn with_text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status).with_body(ResponseBody::Text {
            content: body.into(),
        })
    }

    /// The sentinel returned when no stub matches.
    pub fn not_configured() -> Self {
        Self {
            configured: false,
            ..Self::new(NOT_CONFIGURED_STATUS)
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: ResponseBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_transformer(mut self, name: impl Into<String>) -> Self {
        self.transformers.push(name.into());
        self
    }

    pub(crate) fn with_match_context(mut self, context: MatchContext) -> Self {
        self.match_context = context;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn match_context(&self) -> &MatchContext {
        &self.match_context
    }

    /// Validate the response definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.status < 100 || self.status > 599 {
            anyhow::bail!("Invalid status code: {}", self.status);
        }
        if let Some(name) = self.transformers.iter().find(|t| t.trim().is_empty()) {
            anyhow::bail!("Invalid transformer name: {:?}", name);
        }
        Ok(())
    }
}

/// Response body source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Plain text body
    Text { content: String },
    /// JSON body
    Json { content: serde_json::Value },
    /// Base64 encoded binary
    Base64 { content: String },
    /// Load from file
    File { path: String },
    /// Raw bytes, produced when a file body is resolved
    #[serde(skip)]
    Binary { content: Vec<u8> },
}

impl ResponseBody {
    /// Get the body content as bytes, reading file bodies through `files`.
    pub fn to_bytes(&self, files: &dyn FileSource) -> Result<Vec<u8>, RenderError> {
        match self {
            ResponseBody::Text { content } => Ok(content.as_bytes().to_vec()),
            ResponseBody::Json { content } => serde_json::to_vec(content)
                .map_err(|e| RenderError::InvalidBody(e.to_string())),
            ResponseBody::Base64 { content } => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(content)
                    .map_err(|e| RenderError::InvalidBody(format!("Invalid base64: {}", e)))
            }
            ResponseBody::File { path } => {
                files.read(path).map_err(|source| RenderError::BodySource {
                    path: path.clone(),
                    source,
                })
            }
            ResponseBody::Binary { content } => Ok(content.clone()),
        }
    }

    /// Get content type for this body.
    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseBody::Text { .. } => "text/plain",
            ResponseBody::Json { .. } => "application/json",
            ResponseBody::Base64 { .. } => "application/octet-stream",
            ResponseBody::File { .. } => "application/octet-stream",
            ResponseBody::Binary { .. } => "application/octet-stream",
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log all matched stubs
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log unmatched requests
    #[serde(default = "default_true")]
    pub log_unmatched: bool,

    /// Content type for bodies whose kind does not imply one
    #[serde(default = "default_content_type")]
    pub default_content_type: String,

    /// Case-insensitive header matching
    #[serde(default = "default_true")]
    pub case_insensitive_headers: bool,

    /// Directory that `file` bodies are resolved against
    #[serde(default)]
    pub files_root: Option<PathBuf>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
            default_content_type: default_content_type(),
            case_insensitive_headers: true,
            files_root: None,
        }
    }
}

fn default_content_type() -> String {
    "application/json".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::FsFileSource;

    #[test]
    fn test_parse_simple_stub() {
        let yaml = r#"
stubs:
  - id: hello-world
    request:
      method: [GET]
      path:
        type: exact
        value: /hello
    response:
      status: 200
      body:
        type: text
        content: "Hello, World!"
"#;
        let config = StubServerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.stubs.len(), 1);
        assert_eq!(config.stubs[0].id, "hello-world");
        assert!(config.stubs[0].response.is_configured());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config =
            StubServerConfig::from_yaml(include_str!("../config/default-stubs.yaml")).unwrap();
        assert_eq!(config.stubs.len(), 3);
        assert!(config.settings.files_root.is_none());
    }

    #[test]
    fn test_parse_json_response() {
        let yaml = r#"
stubs:
  - id: json-response
    request:
      path:
        type: prefix
        value: /api
    response:
      status: 200
      headers:
        Content-Type: application/json
        X-Trace: [a, b]
      body:
        type: json
        content:
          message: "success"
          code: 0
"#;
        let config = StubServerConfig::from_yaml(yaml).unwrap();
        let response = &config.stubs[0].response;
        assert_eq!(response.headers.len(), 3);

        if let Some(ResponseBody::Json { content }) = &response.body {
            assert_eq!(content["message"], "success");
        } else {
            panic!("Expected JSON body");
        }
    }

    #[test]
    fn test_parse_transformers() {
        let yaml = r#"
stubs:
  - id: user-by-id
    request:
      method: [GET]
      path:
        type: template
        template: /users/{id}
    response:
      status: 200
      transformers: [response-template]
      body:
        type: json
        content:
          id: "{{path.id}}"
"#;
        let config = StubServerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.stubs[0].response.transformers, vec!["response-template"]);
    }

    #[test]
    fn test_configured_flag_not_read_from_yaml() {
        let yaml = r#"
stubs:
  - id: sneaky
    request: {}
    response:
      status: 404
      configured: false
"#;
        assert!(StubServerConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_patterns() {
        let bad_status = r#"
stubs:
  - id: bad
    request: {}
    response:
      status: 42
"#;
        assert!(StubServerConfig::from_yaml(bad_status).is_err());

        let bad_regex = r#"
stubs:
  - id: bad
    request:
      headers:
        x-id:
          type: regex
          pattern: "(unclosed"
    response:
      status: 200
"#;
        assert!(StubServerConfig::from_yaml(bad_regex).is_err());

        let bad_method = r#"
stubs:
  - id: bad
    request:
      method: [FETCH]
    response:
      status: 200
"#;
        assert!(StubServerConfig::from_yaml(bad_method).is_err());
    }

    #[test]
    fn test_not_configured_definition() {
        let def = ResponseDefinition::not_configured();
        assert!(!def.is_configured());
        assert_eq!(def.status, NOT_CONFIGURED_STATUS);
        assert!(def.headers.is_empty());
        assert!(def.body.is_none());
        assert!(ResponseDefinition::default().is_configured());
    }

    #[test]
    fn test_response_body_to_bytes() {
        let files = FsFileSource::new(None);

        let text = ResponseBody::Text {
            content: "hello".to_string(),
        };
        assert_eq!(text.to_bytes(&files).unwrap(), b"hello");

        let json = ResponseBody::Json {
            content: serde_json::json!({"key": "value"}),
        };
        let bytes = json.to_bytes(&files).unwrap();
        assert!(String::from_utf8(bytes).unwrap().contains("key"));

        let b64 = ResponseBody::Base64 {
            content: "aGk=".to_string(),
        };
        assert_eq!(b64.to_bytes(&files).unwrap(), b"hi");

        let broken = ResponseBody::Base64 {
            content: "***".to_string(),
        };
        assert!(matches!(
            broken.to_bytes(&files),
            Err(RenderError::InvalidBody(_))
        ));
    }
}
