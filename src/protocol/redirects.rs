//! Redirect history of a response.

use std::slice;

use super::request::Request;
use super::response::Response;

/// The ordered responses of a redirect chain.
///
/// The history is carried from hop to hop while a connection follows
/// redirects, and can be queried by request identity so a session with
/// redirect caching enabled can jump straight to the end of a chain it
/// has already walked.
#[derive(Debug, Clone, Default)]
pub struct Redirects {
    responses: Vec<Response>,
}

impl Redirects {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a response to the chain.
    pub(crate) fn add(&mut self, response: Response) {
        self.responses.push(response);
    }

    /// Returns the terminal entry of a chain containing `request`, if the
    /// history has walked a chain starting from (or through) it.
    pub fn find(&self, request: &Request) -> Option<&Response> {
        let fingerprint = request.fingerprint();
        if self.responses.iter().any(|r| r.request().fingerprint() == fingerprint) {
            self.responses.last()
        } else {
            None
        }
    }

    /// Number of entries in the chain.
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    /// Returns true when no redirects have been taken.
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Iterates the chain in hop order.
    pub fn iter(&self) -> slice::Iter<'_, Response> {
        self.responses.iter()
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;

    fn request_for(url: &str) -> Request {
        let mut request = Request::new();
        request.set_url(Url::parse(url).unwrap());
        request
    }

    #[test]
    fn find_returns_chain_end_for_known_hop() {
        let first = request_for("http://example.com/old");
        let second = request_for("http://example.com/new");

        let mut redirects = Redirects::new();
        redirects.add(Response::new(first.clone()));
        redirects.add(Response::new(second.clone()));

        let hit = redirects.find(&first).unwrap();
        assert_eq!(hit.request().fingerprint(), second.fingerprint());
    }

    #[test]
    fn find_misses_unknown_request() {
        let mut redirects = Redirects::new();
        redirects.add(Response::new(request_for("http://example.com/a")));

        let unknown = request_for("http://example.com/elsewhere");
        assert!(redirects.find(&unknown).is_none());
    }
}
