//! Request matching logic.
//!
//! Matches incoming requests against stub definitions. Every pattern,
//! including JSON path expressions, is compiled when the matcher is built, so
//! matching a request cannot fail.

use crate::config::{
    BodyMatcher, GlobalSettings, HeaderMatcher, PathMatcher, QueryMatcher, RequestMatcher,
    StubDefinition,
};
use crate::http::{Request, RequestMethod};
use jsonpath_rust::JsonPath;
use regex::Regex;
use std::collections::HashMap;

/// Context captured during matching (for template variables).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchContext {
    /// Path parameters extracted from template matching
    pub path_params: HashMap<String, String>,
    /// Regex capture groups
    pub captures: HashMap<String, String>,
}

/// Result of matching a request against stubs.
#[derive(Debug)]
pub struct MatchResult<'a> {
    /// The matched stub
    pub stub: &'a StubDefinition,
    /// Context captured during matching
    pub context: MatchContext,
}

/// Request matcher engine.
pub struct Matcher {
    stubs: Vec<CompiledStub>,
    /// Indices into `stubs`, highest priority first, declaration order on ties
    order: Vec<usize>,
    case_insensitive_headers: bool,
}

struct CompiledStub {
    definition: StubDefinition,
    methods: Vec<RequestMethod>,
    path: Option<CompiledPathMatcher>,
    query: Vec<(String, CompiledValueMatcher)>,
    headers: Vec<(String, CompiledValueMatcher)>,
    body: Option<CompiledBodyMatcher>,
}

enum CompiledPathMatcher {
    Exact(String),
    Prefix(String),
    Regex(Regex),
    Glob(globset::GlobMatcher),
    Template(PathTemplate),
}

enum CompiledValueMatcher {
    Exact(String),
    Regex(Regex),
    Present,
    Absent,
    Contains(String),
}

enum CompiledBodyMatcher {
    Exact(String),
    Regex(Regex),
    JsonPath(Vec<(JsonPath, serde_json::Value)>),
    Contains(String),
    Json,
    Empty,
}

struct PathTemplate {
    segments: Vec<TemplateSegment>,
}

enum TemplateSegment {
    Literal(String),
    Param(String),
}

impl PathTemplate {
    fn parse(template: &str) -> Self {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut in_param = false;
        let mut param_name = String::new();

        for ch in template.chars() {
            if ch == '{' && !in_param {
                if !current.is_empty() {
                    segments.push(TemplateSegment::Literal(std::mem::take(&mut current)));
                }
                in_param = true;
                param_name.clear();
            } else if ch == '}' && in_param {
                segments.push(TemplateSegment::Param(std::mem::take(&mut param_name)));
                in_param = false;
            } else if in_param {
                param_name.push(ch);
            } else {
                current.push(ch);
            }
        }

        if !current.is_empty() {
            segments.push(TemplateSegment::Literal(current));
        }

        Self { segments }
    }

    fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut remaining = path;

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                TemplateSegment::Literal(lit) => {
                    remaining = remaining.strip_prefix(lit.as_str())?;
                }
                TemplateSegment::Param(name) => {
                    // A parameter runs up to the following literal, or to the
                    // end of the current path segment.
                    let end_pos = match self.segments.get(i + 1) {
                        Some(TemplateSegment::Literal(next_lit)) => {
                            remaining.find(next_lit.as_str())?
                        }
                        _ => remaining.find('/').unwrap_or(remaining.len()),
                    };

                    if end_pos == 0 {
                        return None;
                    }

                    params.insert(name.clone(), remaining[..end_pos].to_string());
                    remaining = &remaining[end_pos..];
                }
            }
        }

        // Must consume entire path
        if remaining.is_empty() {
            Some(params)
        } else {
            None
        }
    }
}

impl Matcher {
    /// Compile matchers for the given stubs.
    pub fn new(stubs: Vec<StubDefinition>, settings: &GlobalSettings) -> anyhow::Result<Self> {
        let mut matcher = Self {
            stubs: Vec::with_capacity(stubs.len()),
            order: Vec::new(),
            case_insensitive_headers: settings.case_insensitive_headers,
        };
        for stub in stubs {
            matcher.push(stub)?;
        }
        Ok(matcher)
    }

    /// Add a stub after construction.
    pub fn push(&mut self, stub: StubDefinition) -> anyhow::Result<()> {
        stub.validate()
            .map_err(|e| anyhow::anyhow!("Stub {}: {}", stub.id, e))?;
        self.stubs.push(CompiledStub::compile(stub)?);

        let mut order: Vec<usize> = (0..self.stubs.len()).collect();
        // Stable sort keeps declaration order among equal priorities.
        order.sort_by(|a, b| {
            self.stubs[*b]
                .definition
                .priority
                .cmp(&self.stubs[*a].definition.priority)
        });
        self.order = order;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    /// Stub definitions in declaration order.
    pub fn stubs(&self) -> impl Iterator<Item = &StubDefinition> {
        self.stubs.iter().map(|s| &s.definition)
    }

    /// Find the best matching stub for a request.
    pub fn find_match(&self, request: &Request) -> Option<MatchResult<'_>> {
        self.order
            .iter()
            .map(|&idx| &self.stubs[idx])
            .filter(|stub| stub.definition.enabled)
            .find_map(|stub| {
                stub.matches(request, self.case_insensitive_headers)
                    .map(|context| MatchResult {
                        stub: &stub.definition,
                        context,
                    })
            })
    }
}

impl CompiledStub {
    fn compile(definition: StubDefinition) -> anyhow::Result<Self> {
        let request: &RequestMatcher = &definition.request;

        let methods = request
            .method
            .iter()
            .map(|m| m.parse::<RequestMethod>())
            .collect::<anyhow::Result<Vec<RequestMethod>>>()?;

        let path = match &request.path {
            None => None,
            Some(PathMatcher::Exact { value }) => Some(CompiledPathMatcher::Exact(value.clone())),
            Some(PathMatcher::Prefix { value }) => {
                Some(CompiledPathMatcher::Prefix(value.clone()))
            }
            Some(PathMatcher::Regex { pattern }) => {
                Some(CompiledPathMatcher::Regex(Regex::new(pattern)?))
            }
            Some(PathMatcher::Glob { pattern }) => Some(CompiledPathMatcher::Glob(
                globset::Glob::new(pattern)?.compile_matcher(),
            )),
            Some(PathMatcher::Template { template }) => {
                Some(CompiledPathMatcher::Template(PathTemplate::parse(template)))
            }
        };

        let mut query = request
            .query
            .iter()
            .map(|(name, qm)| {
                let compiled = match qm {
                    QueryMatcher::Exact { value } => CompiledValueMatcher::Exact(value.clone()),
                    QueryMatcher::Regex { pattern } => {
                        CompiledValueMatcher::Regex(Regex::new(pattern)?)
                    }
                    QueryMatcher::Present => CompiledValueMatcher::Present,
                    QueryMatcher::Absent => CompiledValueMatcher::Absent,
                };
                Ok::<_, anyhow::Error>((name.clone(), compiled))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        query.sort_by(|a, b| a.0.cmp(&b.0));

        let mut headers = request
            .headers
            .iter()
            .map(|(name, hm)| {
                let compiled = match hm {
                    HeaderMatcher::Exact { value } => CompiledValueMatcher::Exact(value.clone()),
                    HeaderMatcher::Regex { pattern } => {
                        CompiledValueMatcher::Regex(Regex::new(pattern)?)
                    }
                    HeaderMatcher::Present => CompiledValueMatcher::Present,
                    HeaderMatcher::Absent => CompiledValueMatcher::Absent,
                    HeaderMatcher::Contains { value } => {
                        CompiledValueMatcher::Contains(value.clone())
                    }
                };
                Ok::<_, anyhow::Error>((name.clone(), compiled))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let body = match &request.body {
            None => None,
            Some(BodyMatcher::Exact { value }) => Some(CompiledBodyMatcher::Exact(value.clone())),
            Some(BodyMatcher::Regex { pattern }) => {
                Some(CompiledBodyMatcher::Regex(Regex::new(pattern)?))
            }
            Some(BodyMatcher::JsonPath { expressions }) => {
                let compiled = expressions
                    .iter()
                    .map(|(expr, expected)| {
                        let path = parse_json_path(expr).map_err(|reason| {
                            anyhow::anyhow!("Invalid JSON path {}: {}", expr, reason)
                        })?;
                        Ok::<_, anyhow::Error>((path, expected.clone()))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?;
                Some(CompiledBodyMatcher::JsonPath(compiled))
            }
            Some(BodyMatcher::Contains { value }) => {
                Some(CompiledBodyMatcher::Contains(value.clone()))
            }
            Some(BodyMatcher::Json) => Some(CompiledBodyMatcher::Json),
            Some(BodyMatcher::Empty) => Some(CompiledBodyMatcher::Empty),
        };

        Ok(Self {
            definition,
            methods,
            path,
            query,
            headers,
            body,
        })
    }

    fn matches(&self, request: &Request, case_insensitive_headers: bool) -> Option<MatchContext> {
        let mut context = MatchContext::default();

        if !self.methods.is_empty() && !self.methods.contains(&request.method()) {
            return None;
        }

        if let Some(path_matcher) = &self.path {
            if !matches_path(path_matcher, request.path(), &mut context) {
                return None;
            }
        }

        for (name, matcher) in &self.query {
            if !matcher.matches(request.query_param(name)) {
                return None;
            }
        }

        for (name, matcher) in &self.headers {
            let value = if case_insensitive_headers {
                request.headers().get(name)
            } else {
                request.headers().get_exact(name)
            };
            if !matcher.matches(value) {
                return None;
            }
        }

        if let Some(body_matcher) = &self.body {
            if !matches_body(body_matcher, request.body()) {
                return None;
            }
        }

        Some(context)
    }
}


fn matches_body(matcher: &CompiledBodyMatcher, body: &[u8]) -> bool {
    let body_str = std::str::from_utf8(body).ok();

    match matcher {
        CompiledBodyMatcher::Exact(value) => body_str == Some(value.as_str()),
        CompiledBodyMatcher::Regex(regex) => body_str.is_some_and(|bs| regex.is_match(bs)),
        CompiledBodyMatcher::JsonPath(expressions) => {
            match body_str.and_then(|bs| serde_json::from_str::<serde_json::Value>(bs).ok()) {
                Some(json) => matches_json_paths(&json, expressions),
                None => false,
            }
        }
        CompiledBodyMatcher::Contains(value) => body_str.is_some_and(|bs| bs.contains(value)),
        CompiledBodyMatcher::Json => {
            body_str.is_some_and(|bs| serde_json::from_str::<serde_json::Value>(bs).is_ok())
        }
        CompiledBodyMatcher::Empty => body.is_empty(),
    }
}

fn matches_json_paths(
    json: &serde_json::Value,
    expressions: &[(JsonPath, serde_json::Value)],
) -> bool {
    expressions.iter().all(|(path, expected)| {
        let results = path.find(json);

        // A null expectation only asks that the path resolves to something.
        match (&results, expected.is_null()) {
            (serde_json::Value::Null, _) => false,
            (serde_json::Value::Array(found), true) => !found.is_empty(),
            (_, true) => true,
            (serde_json::Value::Array(found), false) => {
                found.iter().any(|v| v == expected) || results == *expected
            }
            (_, false) => results == *expected,
        }
    })
}

impl CompiledValueMatcher {
    fn matches(&self, value: Option<&str>) -> bool {
        match self {
            CompiledValueMatcher::Exact(expected) => value == Some(expected.as_str()),
            CompiledValueMatcher::Regex(regex) => value.is_some_and(|v| regex.is_match(v)),
            CompiledValueMatcher::Present => value.is_some(),
            CompiledValueMatcher::Absent => value.is_none(),
            CompiledValueMatcher::Contains(needle) => value.is_some_and(|v| v.contains(needle)),
        }
    }
}

fn matches_path(matcher: &CompiledPathMatcher, path: &str, context: &mut MatchContext) -> bool {
    match matcher {
        CompiledPathMatcher::Exact(value) => path == value,
        CompiledPathMatcher::Prefix(value) => path.starts_with(value),
        CompiledPathMatcher::Regex(regex) => {
            if let Some(captures) = regex.captures(path) {
                for (i, cap) in captures.iter().enumerate().skip(1) {
                    if let Some(m) = cap {
                        context.captures.insert(i.to_string(), m.as_str().to_string());
                    }
                }
                for name in regex.capture_names().flatten() {
                    if let Some(m) = captures.name(name) {
                        context.captures.insert(name.to_string(), m.as_str().to_string());
                    }
                }
                true
            } else {
                false
            }
        }
        CompiledPathMatcher::Glob(glob) => glob.is_match(path),
        CompiledPathMatcher::Template(template) => match template.matches(path) {
            Some(params) => {
                context.path_params = params;
                true
            }
            None => false,
        },
    }
}

/// Parse a JSON path expression.
pub(crate) fn parse_json_path(expr: &str) -> Result<JsonPath, String> {
    JsonPath::try_from(expr).map_err(|e| e.to_string())
}
