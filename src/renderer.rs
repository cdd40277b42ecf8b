//! Response rendering.
//!
//! Turns a [`ResponseDefinition`] into a concrete [`Response`], resolving
//! file-backed bodies and running the named transformers in declared order.

use crate::config::{GlobalSettings, ResponseBody, ResponseDefinition};
use crate::error::{RenderError, TransformError};
use crate::http::{Request, Response};
use crate::template::ResponseTemplateTransformer;
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Produces a concrete response for a matched definition.
pub trait ResponseRenderer: Send + Sync {
    fn render(
        &self,
        request: &Request,
        definition: &ResponseDefinition,
    ) -> Result<Response, RenderError>;
}

impl<F> ResponseRenderer for F
where
    F: Fn(&Request, &ResponseDefinition) -> Result<Response, RenderError> + Send + Sync,
{
    fn render(
        &self,
        request: &Request,
        definition: &ResponseDefinition,
    ) -> Result<Response, RenderError> {
        self(request, definition)
    }
}

/// A named post-processing step applied while rendering.
///
/// Transformers must not depend on anything but their inputs and whatever
/// they read themselves; the request is only ever borrowed.
pub trait ResponseTransformer: Send + Sync {
    fn name(&self) -> &str;

    fn transform(
        &self,
        request: &Request,
        definition: ResponseDefinition,
    ) -> Result<ResponseDefinition, TransformError>;
}

/// Source of `file` response bodies.
pub trait FileSource: Send + Sync {
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;
}

/// Reads body files from the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct FsFileSource {
    root: Option<PathBuf>,
}

impl FsFileSource {
    /// Relative paths resolve against `root` when one is given.
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

impl FileSource for FsFileSource {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let requested = Path::new(path);
        let resolved = match &self.root {
            Some(root) => {
                if requested.is_absolute()
                    || requested
                        .components()
                        .any(|c| matches!(c, Component::ParentDir))
                {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        format!("body file {} is outside {}", path, root.display()),
                    ));
                }
                root.join(requested)
            }
            None => requested.to_path_buf(),
        };
        std::fs::read(resolved)
    }
}

/// Default renderer: body resolution plus a registry of named transformers.
pub struct StubResponseRenderer {
    files: Arc<dyn FileSource>,
    transformers: HashMap<String, Arc<dyn ResponseTransformer>>,
    default_content_type: String,
}

impl StubResponseRenderer {
    /// Create a renderer with the built-in transformers registered.
    pub fn new(settings: &GlobalSettings) -> Self {
        Self::with_file_source(settings, Arc::new(FsFileSource::new(settings.files_root.clone())))
    }

    pub fn with_file_source(settings: &GlobalSettings, files: Arc<dyn FileSource>) -> Self {
        Self {
            files,
            transformers: HashMap::new(),
            default_content_type: settings.default_content_type.clone(),
        }
        .with_transformer(Arc::new(ResponseTemplateTransformer::new()))
    }

    /// Register a transformer, replacing any with the same name.
    pub fn with_transformer(mut self, transformer: Arc<dyn ResponseTransformer>) -> Self {
        self.transformers
            .insert(transformer.name().to_string(), transformer);
        self
    }

    fn lookup(&self, names: &[String]) -> Result<Vec<&Arc<dyn ResponseTransformer>>, RenderError> {
        names
            .iter()
            .map(|name| {
                self.transformers
                    .get(name)
                    .ok_or_else(|| RenderError::UnknownTransformer(name.clone()))
            })
            .collect()
    }

    /// Replace a `file` body with its contents.
    fn resolve_body_source(
        &self,
        mut definition: ResponseDefinition,
    ) -> Result<ResponseDefinition, RenderError> {
        if let Some(body @ ResponseBody::File { .. }) = &definition.body {
            let content = body.to_bytes(self.files.as_ref())?;
            definition.body = Some(ResponseBody::Binary { content });
        }
        Ok(definition)
    }

    fn materialize(&self, definition: ResponseDefinition) -> Result<Response, RenderError> {
        let mut headers = definition.headers;
        let body = match &definition.body {
            Some(body) => {
                if !headers.contains("content-type") {
                    // File contents carry no type of their own.
                    let content_type = match body {
                        ResponseBody::Binary { .. } | ResponseBody::File { .. } => {
                            self.default_content_type.as_str()
                        }
                        _ => body.content_type(),
                    };
                    headers.append("Content-Type", content_type);
                }
                body.to_bytes(self.files.as_ref())?
            }
            None => Vec::new(),
        };

        Ok(Response::new(definition.status, headers, body))
    }
}

impl ResponseRenderer for StubResponseRenderer {
    fn render(
        &self,
        request: &Request,
        definition: &ResponseDefinition,
    ) -> Result<Response, RenderError> {
        if !definition.is_configured() {
            return Ok(Response::not_configured());
        }

        // Resolve every name up front so a misconfigured stub fails before
        // any transformer runs.
        let transformers = self.lookup(&definition.transformers)?;

        let mut current = self.resolve_body_source(definition.clone())?;
        for transformer in transformers {
            debug!(transformer = transformer.name(), "Applying response transformer");
            current = transformer
                .transform(request, current)
                .map_err(|source| RenderError::Transformer {
                    name: transformer.name().to_string(),
                    source,
                })?;
        }

        self.materialize(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct Suffix(&'static str);

    impl ResponseTransformer for Suffix {
        fn name(&self) -> &str {
            self.0
        }

        fn transform(
            &self,
            _request: &Request,
            mut definition: ResponseDefinition,
        ) -> Result<ResponseDefinition, TransformError> {
            let content = match definition.body.take() {
                Some(ResponseBody::Text { content }) => content,
                Some(ResponseBody::Binary { content }) => String::from_utf8(content)
                    .map_err(|e| TransformError::Other(e.to_string()))?,
                _ => return Err(TransformError::Other("expected text body".to_string())),
            };
            definition.body = Some(ResponseBody::Text {
                content: format!("{}{}", content, self.0),
            });
            Ok(definition)
        }
    }

    fn renderer() -> StubResponseRenderer {
        StubResponseRenderer::new(&GlobalSettings::default())
            .with_transformer(Arc::new(Suffix("-a")))
            .with_transformer(Arc::new(Suffix("-b")))
    }

    #[test]
    fn test_renders_status_headers_and_body() {
        let definition = ResponseDefinition::with_text(201, "created")
            .with_header("X-First", "1")
            .with_header("X-Second", "2");

        let response = renderer()
            .render(&Request::builder().build(), &definition)
            .unwrap();

        assert_eq!(response.status(), 201);
        assert_eq!(response.body_as_string(), "created");
        let names: Vec<_> = response.headers().iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["X-First", "X-Second", "Content-Type"]);
        assert_eq!(response.headers().get("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_declared_content_type_kept() {
        let definition =
            ResponseDefinition::with_text(200, "<p/>").with_header("content-type", "text/html");
        let response = renderer()
            .render(&Request::builder().build(), &definition)
            .unwrap();

        assert_eq!(response.headers().get_all("Content-Type").count(), 1);
        assert_eq!(response.headers().get("Content-Type"), Some("text/html"));
    }

    #[test]
    fn test_not_configured_skips_transformers() {
        let mut definition = ResponseDefinition::not_configured();
        definition.transformers.push("does-not-exist".to_string());

        let response = renderer()
            .render(&Request::builder().build(), &definition)
            .unwrap();
        assert_eq!(response, Response::not_configured());
    }

    #[test]
    fn test_transformers_apply_in_declared_order() {
        let request = Request::builder().build();

        let ab = ResponseDefinition::with_text(200, "x")
            .with_transformer("-a")
            .with_transformer("-b");
        assert_eq!(renderer().render(&request, &ab).unwrap().body_as_string(), "x-a-b");

        let ba = ResponseDefinition::with_text(200, "x")
            .with_transformer("-b")
            .with_transformer("-a");
        assert_eq!(renderer().render(&request, &ba).unwrap().body_as_string(), "x-b-a");
    }

    #[test]
    fn test_unknown_transformer_is_error() {
        let definition = ResponseDefinition::with_text(200, "x")
            .with_transformer("-a")
            .with_transformer("missing");

        let err = renderer()
            .render(&Request::builder().build(), &definition)
            .unwrap_err();
        assert!(matches!(err, RenderError::UnknownTransformer(name) if name == "missing"));
    }

    #[test]
    fn test_transformer_failure_is_error() {
        let definition = ResponseDefinition::new(200).with_transformer("-a");
        let err = renderer()
            .render(&Request::builder().build(), &definition)
            .unwrap_err();
        assert!(matches!(err, RenderError::Transformer { name, .. } if name == "-a"));
    }

    #[test]
    fn test_file_body_resolved_before_transformers() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("greeting.txt")).unwrap();
        file.write_all(b"hello").unwrap();

        let settings = GlobalSettings {
            files_root: Some(dir.path().to_path_buf()),
            ..GlobalSettings::default()
        };
        let renderer =
            StubResponseRenderer::new(&settings).with_transformer(Arc::new(Suffix("!")));
        let definition = ResponseDefinition::new(200)
            .with_body(ResponseBody::File {
                path: "greeting.txt".to_string(),
            })
            .with_transformer("!");

        let response = renderer
            .render(&Request::builder().build(), &definition)
            .unwrap();
        assert_eq!(response.body_as_string(), "hello!");
    }

    #[test]
    fn test_binary_file_body() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blob.bin"), [0xff, 0x00, 0xfe]).unwrap();

        let settings = GlobalSettings {
            files_root: Some(dir.path().to_path_buf()),
            default_content_type: "application/x-test".to_string(),
            ..GlobalSettings::default()
        };
        let definition = ResponseDefinition::new(200).with_body(ResponseBody::File {
            path: "blob.bin".to_string(),
        });

        let response = StubResponseRenderer::new(&settings)
            .render(&Request::builder().build(), &definition)
            .unwrap();
        assert_eq!(response.body(), &[0xff, 0x00, 0xfe]);
        assert_eq!(response.headers().get("content-type"), Some("application/x-test"));
    }

    #[test]
    fn test_missing_or_escaping_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = GlobalSettings {
            files_root: Some(dir.path().to_path_buf()),
            ..GlobalSettings::default()
        };
        let renderer = StubResponseRenderer::new(&settings);
        let request = Request::builder().build();

        for path in ["missing.txt", "../outside.txt"] {
            let definition = ResponseDefinition::new(200).with_body(ResponseBody::File {
                path: path.to_string(),
            });
            let err = renderer.render(&request, &definition).unwrap_err();
            assert!(matches!(err, RenderError::BodySource { .. }));
        }
    }

    #[test]
    fn test_closure_renderer() {
        let renderer = |_: &Request, d: &ResponseDefinition| -> Result<Response, RenderError> {
            Ok(Response::builder().status(d.status).build())
        };
        let response = renderer
            .render(&Request::builder().build(), &ResponseDefinition::new(204))
            .unwrap();
        assert_eq!(response.status(), 204);
    }
}
