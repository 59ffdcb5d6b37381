//! The response under construction and its completed form.

use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};

use super::cookie::{Cookie, CookieJar};
use super::error::Error;
use super::redirects::Redirects;
use super::request::Request;

/// An HTTP response.
///
/// A response is bound to the request that produced it and is filled in by
/// the connection as the exchange progresses. Once the request future
/// resolves, the response is complete: status, headers, body (unless a body
/// callback consumed it), collected cookies, the redirect history taken to
/// get here, and the completion status in [`error`](Self::error).
#[derive(Debug, Clone)]
pub struct Response {
    request: Request,
    version: Version,
    status: StatusCode,
    reason: String,
    headers: HeaderMap,
    raw: Bytes,
    cookies: CookieJar,
    redirects: Redirects,
    redirect_count: u32,
    error: Error,
}

impl Response {
    /// Creates an empty response bound to `request`.
    pub(crate) fn new(request: Request) -> Self {
        Self {
            request,
            version: Version::HTTP_11,
            status: StatusCode::OK,
            reason: String::new(),
            headers: HeaderMap::new(),
            raw: Bytes::new(),
            cookies: CookieJar::new(),
            redirects: Redirects::new(),
            redirect_count: 0,
            error: Error::success(),
        }
    }

    /// The request this response answers.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Negotiated HTTP version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Response status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Reason phrase from the status line.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The accumulated body. Empty when a body callback consumed the data.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Cookies collected from `Set-Cookie` headers.
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    /// Prior responses of the redirect chain that led here.
    pub fn redirects(&self) -> &Redirects {
        &self.redirects
    }

    /// Number of redirect hops taken.
    pub fn redirect_count(&self) -> u32 {
        self.redirect_count
    }

    /// Completion status. [`Error::is_success`] distinguishes a normal
    /// completion from a terminal failure.
    pub fn error(&self) -> &Error {
        &self.error
    }

    pub(crate) fn set_status_line(&mut self, version: Version, status: StatusCode, reason: String) {
        self.version = version;
        self.status = status;
        self.reason = reason;
    }

    pub(crate) fn set_headers(&mut self, headers: HeaderMap) {
        self.headers = headers;
    }

    pub(crate) fn add_cookie(&mut self, cookie: Cookie) {
        self.cookies.add(cookie);
    }

    pub(crate) fn set_raw(&mut self, raw: Bytes) {
        self.raw = raw;
    }

    pub(crate) fn set_error(&mut self, error: Error) {
        self.error = error;
    }

    pub(crate) fn set_redirects(&mut self, redirects: Redirects) {
        self.redirects = redirects;
    }

    pub(crate) fn take_redirects(&mut self) -> Redirects {
        std::mem::take(&mut self.redirects)
    }

    pub(crate) fn set_redirect_count(&mut self, count: u32) {
        self.redirect_count = count;
    }
}
