//! Request handler.
//!
//! [`StubRequestHandler`] is the entry point for the network layer: it asks
//! the stub registry for a definition, renders it, notifies listeners and
//! logs one line per request.

use crate::error::HandlerError;
use crate::http::{Request, Response};
use crate::listener::RequestListener;
use crate::notifier::{error_chain, Notifier};
use crate::renderer::ResponseRenderer;
use crate::stub_server::StubServer;
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Request counters for one handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerStats {
    pub requests_total: u64,
    pub requests_matched: u64,
    pub requests_unmatched: u64,
    pub requests_failed: u64,
}

/// Dispatches requests to stubs.
///
/// `handle` may be called from many threads at once. Listeners may be added
/// at any time; a request uses the listeners registered when it started.
///
/// The notifier can be swapped with [`set_notifier`](Self::set_notifier)
/// while traffic flows. Each request reads it once, so its lines all go to
/// one sink, but requests in flight during a swap may log to either the old
/// or the new one.
pub struct StubRequestHandler {
    stub_server: Arc<dyn StubServer>,
    renderer: Arc<dyn ResponseRenderer>,
    listeners: RwLock<Vec<Arc<dyn RequestListener>>>,
    notifier: RwLock<Option<Arc<dyn Notifier>>>,
    requests_total: AtomicU64,
    requests_matched: AtomicU64,
    requests_unmatched: AtomicU64,
    requests_failed: AtomicU64,
}

impl StubRequestHandler {
    pub fn new(stub_server: Arc<dyn StubServer>, renderer: Arc<dyn ResponseRenderer>) -> Self {
        Self {
            stub_server,
            renderer,
            listeners: RwLock::new(Vec::new()),
            notifier: RwLock::new(None),
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_unmatched: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
        }
    }

    pub fn with_notifier(self, notifier: Arc<dyn Notifier>) -> Self {
        self.set_notifier(Some(notifier));
        self
    }

    /// Replace the notifier. `None` turns logging off.
    pub fn set_notifier(&self, notifier: Option<Arc<dyn Notifier>>) {
        *self.notifier.write() = notifier;
    }

    /// Append a listener. Registering the same listener twice notifies it twice.
    pub fn add_request_listener(&self, listener: Arc<dyn RequestListener>) {
        self.listeners.write().push(listener);
    }

    pub fn stats(&self) -> HandlerStats {
        HandlerStats {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_matched: self.requests_matched.load(Ordering::Relaxed),
            requests_unmatched: self.requests_unmatched.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
        }
    }

    /// Handle one request.
    ///
    /// A "no stub matched" outcome is a successful not-configured response.
    /// Registry and rendering failures are returned without retry or
    /// fallback. A panicking notifier never reaches the caller.
    pub fn handle(&self, request: &Request) -> Result<Response, HandlerError> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let notifier = self.notifier.read().clone();

        let response = match self.serve(request) {
            Ok(response) => response,
            Err(err) => {
                self.requests_failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    method = %request.method(),
                    url = %request.url(),
                    error = %error_chain(&err),
                    "Request handling failed"
                );
                if let Some(notifier) = &notifier {
                    let message = format!(
                        "Failed to handle {} - {} {}",
                        request.client_ip(),
                        request.method(),
                        request.url()
                    );
                    guarded(|| notifier.error_with_cause(&message, &err));
                }
                return Err(err);
            }
        };

        self.notify_listeners(request, &response, notifier.as_deref());

        if let Some(notifier) = &notifier {
            let message = format!(
                "{} - {} {}",
                request.client_ip(),
                request.method(),
                request.url()
            );
            guarded(|| notifier.info(&message));
        }

        Ok(response)
    }

    fn serve(&self, request: &Request) -> Result<Response, HandlerError> {
        let definition = self.stub_server.serve_stub_for(request)?;
        let response = self.renderer.render(request, &definition)?;

        if definition.is_configured() {
            self.requests_matched.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
        }

        Ok(response)
    }

    fn notify_listeners(
        &self,
        request: &Request,
        response: &Response,
        notifier: Option<&dyn Notifier>,
    ) {
        let listeners = self.listeners.read().clone();

        for (index, listener) in listeners.iter().enumerate() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                listener.request_received(request, response)
            }));

            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => format!("Request listener {} failed: {:#}", index, err),
                Err(payload) => format!(
                    "Request listener {} panicked: {}",
                    index,
                    panic_message(payload.as_ref())
                ),
            };

            debug!(listener = index, url = %request.url(), "{}", message);
            if let Some(notifier) = notifier {
                guarded(|| notifier.error(&message));
            }
        }
    }
}

/// Run a notifier call, containing any panic it raises.
fn guarded(log: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(log)) {
        warn!(
            panic = panic_message(payload.as_ref()),
            "Request notifier panicked"
        );
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&str>() {
        *text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.as_str()
    } else {
        "unknown panic payload"
    }
}
