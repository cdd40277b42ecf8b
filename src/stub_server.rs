//! Stub registry.
//!
//! [`StubServer`] is the contract the request handler consumes: given a
//! request, return the best matching response definition, or the
//! not-configured sentinel when nothing matches.

use crate::config::{GlobalSettings, ResponseDefinition, StubDefinition, StubServerConfig};
use crate::error::MatchError;
use crate::http::Request;
use crate::matcher::Matcher;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

/// Selects the response definition for a request.
///
/// For an unchanged set of stubs, equal requests must yield equal
/// definitions.
pub trait StubServer: Send + Sync {
    fn serve_stub_for(&self, request: &Request) -> Result<ResponseDefinition, MatchError>;
}

impl<F> StubServer for F
where
    F: Fn(&Request) -> Result<ResponseDefinition, MatchError> + Send + Sync,
{
    fn serve_stub_for(&self, request: &Request) -> Result<ResponseDefinition, MatchError> {
        self(request)
    }
}

/// Stub registry held in memory.
///
/// Stubs may be added while requests are being served; each lookup sees
/// the stub set as it was when the lookup started.
pub struct InMemoryStubServer {
    matcher: RwLock<Matcher>,
    settings: GlobalSettings,
}

impl InMemoryStubServer {
    /// Build a registry from configuration, compiling every matcher.
    pub fn new(config: StubServerConfig) -> anyhow::Result<Self> {
        let matcher = Matcher::new(config.stubs, &config.settings)?;

        info!(
            stubs = matcher.len(),
            enabled = matcher.stubs().filter(|s| s.enabled).count(),
            "Stub registry initialized"
        );

        Ok(Self {
            matcher: RwLock::new(matcher),
            settings: config.settings,
        })
    }

    /// Create from a YAML configuration string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Self::new(StubServerConfig::from_yaml(yaml)?)
    }

    /// Register another stub. It takes part in matching from the next lookup.
    pub fn add_stub(&self, stub: StubDefinition) -> anyhow::Result<()> {
        let id = stub.id.clone();
        self.matcher.write().push(stub)?;
        debug!(stub_id = %id, "Stub added");
        Ok(())
    }

    pub fn stub_count(&self) -> usize {
        self.matcher.read().len()
    }

    pub fn settings(&self) -> &GlobalSettings {
        &self.settings
    }
}

impl StubServer for InMemoryStubServer {
    fn serve_stub_for(&self, request: &Request) -> Result<ResponseDefinition, MatchError> {
        let matcher = self.matcher.read();

        match matcher.find_match(request) {
            Some(result) => {
                if self.settings.log_matches {
                    debug!(
                        stub_id = %result.stub.id,
                        method = %request.method(),
                        path = %request.path(),
                        "Request matched stub"
                    );
                }
                Ok(result
                    .stub
                    .response
                    .clone()
                    .with_match_context(result.context))
            }
            None => {
                if self.settings.log_unmatched {
                    warn!(
                        method = %request.method(),
                        path = %request.path(),
                        "No matching stub found"
                    );
                }
                Ok(ResponseDefinition::not_configured())
            }
        }
    }
}
