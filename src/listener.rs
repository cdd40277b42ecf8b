//! Request listeners.
//!
//! Listeners observe every handled request after its response is produced,
//! whether or not a stub matched.

use crate::http::{Request, Response};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Observer notified after each handled request.
///
/// An `Err` is reported by the handler and never affects the response.
pub trait RequestListener: Send + Sync {
    fn request_received(&self, request: &Request, response: &Response) -> anyhow::Result<()>;
}

impl<F> RequestListener for F
where
    F: Fn(&Request, &Response) -> anyhow::Result<()> + Send + Sync,
{
    fn request_received(&self, request: &Request, response: &Response) -> anyhow::Result<()> {
        self(request, response)
    }
}

/// A request and the response it was served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedRequest {
    pub request: Request,
    pub response: Response,
    /// When the journal recorded the pair
    pub logged_at: DateTime<Utc>,
}

/// Records served requests for later verification.
#[derive(Debug, Default)]
pub struct RequestJournal {
    entries: Mutex<Vec<LoggedRequest>>,
}

impl RequestJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests recorded at or after `since`, oldest first.
    pub fn requests_since(&self, since: DateTime<Utc>) -> Vec<LoggedRequest> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.logged_at >= since)
            .cloned()
            .collect()
    }

    /// All recorded requests, oldest first.
    pub fn requests(&self) -> Vec<LoggedRequest> {
        self.entries.lock().clone()
    }

    pub fn count_matching<P>(&self, predicate: P) -> usize
    where
        P: Fn(&Request) -> bool,
    {
        self.entries
            .lock()
            .iter()
            .filter(|e| predicate(&e.request))
            .count()
    }

    /// Requests that were served the not-configured response.
    pub fn unmatched(&self) -> Vec<Request> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.response == Response::not_configured())
            .map(|e| e.request.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn reset(&self) {
        self.entries.lock().clear();
    }
}

impl RequestListener for RequestJournal {
    fn request_received(&self, request: &Request, response: &Response) -> anyhow::Result<()> {
        self.entries.lock().push(LoggedRequest {
            request: request.clone(),
            response: response.clone(),
            logged_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestMethod;

    #[test]
    fn test_journal_records_in_order() {
        let journal = RequestJournal::new();
        let first = Request::builder().url("/a").build();
        let second = Request::builder()
            .method(RequestMethod::Post)
            .url("/b")
            .build();
        let ok = Response::builder().status(200).body("ok").build();

        journal.request_received(&first, &ok).unwrap();
        journal
            .request_received(&second, &Response::not_configured())
            .unwrap();

        let logged = journal.requests();
        assert_eq!(logged.len(), 2);
        assert!(logged[0].logged_at <= logged[1].logged_at);
        assert_eq!(logged[0].request, first);
        assert_eq!(logged[0].response, ok);
        assert_eq!(logged[1].request, second);
        assert_eq!(journal.unmatched(), vec![second]);
        assert_eq!(journal.count_matching(|r| r.method() == RequestMethod::Post), 1);

        journal.reset();
        assert!(journal.is_empty());
    }

    #[test]
    fn test_requests_since() {
        let journal = RequestJournal::new();
        let response = Response::not_configured();
        journal
            .request_received(&Request::builder().url("/old").build(), &response)
            .unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        assert!(journal.requests_since(cutoff).is_empty());

        let all = journal.requests_since(DateTime::<Utc>::MIN_UTC);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].request.path(), "/old");
    }

    #[test]
    fn test_closure_listener() {
        let listener = |request: &Request, _: &Response| -> anyhow::Result<()> {
            anyhow::ensure!(request.path() != "/fail", "refusing {}", request.path());
            Ok(())
        };

        let response = Response::not_configured();
        assert!(listener
            .request_received(&Request::builder().build(), &response)
            .is_ok());
        assert!(listener
            .request_received(&Request::builder().url("/fail").build(), &response)
            .is_err());
    }
}
