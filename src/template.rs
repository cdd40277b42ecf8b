//! The `response-template` transformer.
//!
//! Renders Handlebars templates in response bodies and header values using
//! the request and the values captured while matching it. Rendering is a
//! pure function of its inputs: the `uuid` and `random` helpers draw from a
//! generator seeded by the request, so equal requests render equally.

use crate::config::{ResponseBody, ResponseDefinition};
use crate::error::TransformError;
use crate::http::{HttpHeaders, Request};
use crate::renderer::ResponseTransformer;
use handlebars::{handlebars_helper, Handlebars};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Name stubs use to request template rendering.
pub const RESPONSE_TEMPLATE: &str = "response-template";

/// Context for template rendering.
#[derive(Debug, Serialize)]
pub struct TemplateContext {
    /// Path parameters from URL template matching
    pub path: HashMap<String, String>,
    /// Query parameters (first value per name)
    pub query: HashMap<String, String>,
    /// Request headers (first value per name)
    pub headers: HashMap<String, String>,
    /// Regex capture groups
    pub captures: HashMap<String, String>,
    /// Request method
    pub method: String,
    /// Request path
    pub request_path: String,
    /// Full request URL
    pub url: String,
    /// Client address
    pub client_ip: String,
    /// Request body (as string, if text)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Request body as JSON (if parseable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
    /// Stable hash of the request, seeds `uuid` and `random`
    pub seed: u64,
}

impl TemplateContext {
    fn new(request: &Request, definition: &ResponseDefinition) -> Self {
        let body = request.body_as_str().map(String::from);
        let json = body.as_deref().and_then(|s| serde_json::from_str(s).ok());
        let matched = definition.match_context();

        let mut query = HashMap::new();
        for (k, v) in request.query_params() {
            query.entry(k.clone()).or_insert_with(|| v.clone());
        }

        Self {
            path: matched.path_params.clone(),
            query,
            headers: first_values(request.headers()),
            captures: matched.captures.clone(),
            method: request.method().to_string(),
            request_path: request.path().to_string(),
            url: request.url().to_string(),
            client_ip: request.client_ip().to_string(),
            body,
            json,
            seed: request_seed(request),
        }
    }
}

fn request_seed(request: &Request) -> u64 {
    let mut hasher = DefaultHasher::new();
    request.method().hash(&mut hasher);
    request.url().hash(&mut hasher);
    for (name, value) in request.headers().iter() {
        name.to_ascii_lowercase().hash(&mut hasher);
        value.hash(&mut hasher);
    }
    request.body().hash(&mut hasher);
    request.client_ip().hash(&mut hasher);
    hasher.finish()
}

/// Generator for one helper call, derived from the request seed and `salt`.
fn request_rng(ctx: &handlebars::Context, salt: impl Hash) -> StdRng {
    let seed = ctx
        .data()
        .get("seed")
        .and_then(|v| v.as_u64())
        .unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    salt.hash(&mut hasher);
    StdRng::seed_from_u64(hasher.finish())
}

fn first_values(headers: &HttpHeaders) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (k, v) in headers.iter() {
        out.entry(k.to_string()).or_insert_with(|| v.to_string());
    }
    out
}

/// Handlebars-backed response transformer.
pub struct ResponseTemplateTransformer {
    handlebars: Handlebars<'static>,
}

impl ResponseTemplateTransformer {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("json", Box::new(json_helper));
        handlebars.register_helper("uuid", Box::new(uuid_helper));
        handlebars.register_helper("random", Box::new(random_helper));
        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("upper", Box::new(upper));
        handlebars.register_helper("lower", Box::new(lower));

        // Responses are not HTML.
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    fn render_str(&self, template: &str, ctx: &TemplateContext) -> Result<String, TransformError> {
        if !template.contains("{{") {
            return Ok(template.to_string());
        }
        Ok(self.handlebars.render_template(template, ctx)?)
    }

    fn render_json_value(
        &self,
        value: &serde_json::Value,
        ctx: &TemplateContext,
    ) -> Result<serde_json::Value, TransformError> {
        match value {
            serde_json::Value::String(s) => Ok(serde_json::Value::String(self.render_str(s, ctx)?)),
            serde_json::Value::Array(arr) => arr
                .iter()
                .map(|v| self.render_json_value(v, ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(serde_json::Value::Array),
            serde_json::Value::Object(obj) => {
                let mut rendered = serde_json::Map::new();
                for (k, v) in obj {
                    rendered.insert(k.clone(), self.render_json_value(v, ctx)?);
                }
                Ok(serde_json::Value::Object(rendered))
            }
            _ => Ok(value.clone()),
        }
    }

    fn render_body(
        &self,
        body: ResponseBody,
        ctx: &TemplateContext,
    ) -> Result<ResponseBody, TransformError> {
        Ok(match body {
            ResponseBody::Text { content } => ResponseBody::Text {
                content: self.render_str(&content, ctx)?,
            },
            ResponseBody::Json { content } => ResponseBody::Json {
                content: self.render_json_value(&content, ctx)?,
            },
            // Resolved file bodies are templated when they are text.
            ResponseBody::Binary { content } => match String::from_utf8(content) {
                Ok(text) => ResponseBody::Binary {
                    content: self.render_str(&text, ctx)?.into_bytes(),
                },
                Err(e) => ResponseBody::Binary {
                    content: e.into_bytes(),
                },
            },
            other => other,
        })
    }
}

impl Default for ResponseTemplateTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseTransformer for ResponseTemplateTransformer {
    fn name(&self) -> &str {
        RESPONSE_TEMPLATE
    }

    fn transform(
        &self,
        request: &Request,
        mut definition: ResponseDefinition,
    ) -> Result<ResponseDefinition, TransformError> {
        let ctx = TemplateContext::new(request, &definition);

        let mut headers = HttpHeaders::new();
        for (name, value) in definition.headers.iter() {
            headers.append(name, self.render_str(value, &ctx)?);
        }
        definition.headers = headers;

        if let Some(body) = definition.body.take() {
            definition.body = Some(self.render_body(body, &ctx)?);
        }

        Ok(definition)
    }
}

// Custom Handlebars helpers

handlebars_helper!(upper: |s: str| s.to_uppercase());
handlebars_helper!(lower: |s: str| s.to_lowercase());

fn json_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let param = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    match serde_json::from_str::<serde_json::Value>(param) {
        Ok(json) => out.write(&serde_json::to_string_pretty(&json).unwrap_or_default())?,
        Err(_) => out.write(param)?,
    }
    Ok(())
}

fn uuid_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    ctx: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    // An optional argument names a distinct id for the same request.
    let salt = h.param(0).map(|v| v.value().to_string());
    let mut rng = request_rng(ctx, ("uuid", salt));
    // Version 4, RFC 4122 variant.
    let uuid = format!(
        "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
        rng.gen::<u32>(),
        rng.gen::<u16>(),
        rng.gen::<u16>() & 0x0fff,
        (rng.gen::<u16>() & 0x3fff) | 0x8000,
        rng.gen::<u64>() & 0xffff_ffff_ffff,
    );
    out.write(&uuid)?;
    Ok(())
}

fn random_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    ctx: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let min = h.param(0).and_then(|v| v.value().as_i64()).unwrap_or(0);
    let max = h.param(1).and_then(|v| v.value().as_i64()).unwrap_or(100);
    let value = if max > min {
        request_rng(ctx, ("random", min, max)).gen_range(min..=max)
    } else {
        min
    };
    out.write(&value.to_string())?;
    Ok(())
}

fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let fallback = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");

    let rendered = match h.param(0).map(|v| v.value()) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        Some(serde_json::Value::String(_)) | Some(serde_json::Value::Null) | None => {
            fallback.to_string()
        }
        Some(other) => other.to_string(),
    };
    out.write(&rendered)?;
    Ok(())
}
