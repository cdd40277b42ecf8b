//! Zentinel Mock Dispatch
//!
//! The request dispatch core of an HTTP stub server. Given an already-parsed
//! request it selects the best matching stub, renders a concrete response,
//! notifies request listeners and logs the transaction.
//!
//! # Features
//!
//! - **Request Matching**: Match by path, method, headers, query params, body
//! - **Priorities**: Higher priority stubs win; ties go to the earlier stub
//! - **Transformers**: Named post-processing steps, applied in declared order
//! - **Dynamic Templates**: The `response-template` transformer renders Handlebars
//! - **Listeners**: Observe every request/response pair, failures isolated
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zentinel_mock_dispatch::{
//!     InMemoryStubServer, Request, StubRequestHandler, StubResponseRenderer, TracingNotifier,
//! };
//!
//! let stubs = InMemoryStubServer::from_yaml(r#"
//! stubs:
//!   - id: hello-world
//!     request:
//!       method: [GET]
//!       path:
//!         type: exact
//!         value: /hello
//!     response:
//!       status: 200
//!       body:
//!         type: json
//!         content:
//!           message: "Hello, World!"
//! "#)?;
//! let renderer = StubResponseRenderer::new(stubs.settings());
//! let handler = StubRequestHandler::new(Arc::new(stubs), Arc::new(renderer))
//!     .with_notifier(Arc::new(TracingNotifier));
//!
//! let response = handler.handle(&Request::builder().url("/hello").build())?;
//! assert_eq!(response.status(), 200);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod listener;
pub mod matcher;
pub mod notifier;
pub mod renderer;
pub mod stub_server;
pub mod template;

pub use config::{ResponseBody, ResponseDefinition, StubDefinition, StubServerConfig};
pub use error::{HandlerError, MatchError, RenderError, TransformError};
pub use handler::{HandlerStats, StubRequestHandler};
pub use http::{HttpHeaders, Request, RequestMethod, Response};
pub use listener::{RequestJournal, RequestListener};
pub use notifier::{CapturingNotifier, Notifier, TracingNotifier};
pub use renderer::{FileSource, FsFileSource, ResponseRenderer, ResponseTransformer, StubResponseRenderer};
pub use stub_server::{InMemoryStubServer, StubServer};
