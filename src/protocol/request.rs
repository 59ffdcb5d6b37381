//! The outgoing request: accumulated options, header finalization and wire
//! serialization.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{
    ACCEPT_ENCODING, AUTHORIZATION, CONNECTION, CONTENT_LENGTH, COOKIE, HOST, USER_AGENT,
};
use http::{HeaderMap, HeaderValue, Method};
use url::Url;

use super::auth::Auth;
use super::cookie::CookieJar;
use super::error::Error;
use super::response::Response;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_REDIRECT_LIMIT: u32 = 10;

/// One delivery to a streaming body consumer: a chunk as it arrives off the
/// wire, or the end-of-stream marker carrying the completion status.
#[derive(Debug, Clone)]
pub enum BodyEvent {
    /// A piece of the response body
    Chunk(Bytes),
    /// No more body data will be delivered
    End(Error),
}

/// Streaming consumer for response body data. While set, the response
/// accumulates no raw body of its own.
pub type BodyCallback = Arc<dyn Fn(BodyEvent) + Send + Sync>;

/// Invoked with the finished response before the future is fulfilled.
pub type FinalCallback = Arc<dyn Fn(&Response) + Send + Sync>;

/// TLS settings for an https request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    pub(crate) verify_peer: Option<bool>,
    pub(crate) verify_path: Option<PathBuf>,
    pub(crate) verify_file: Option<PathBuf>,
    pub(crate) certificate_file: Option<PathBuf>,
    pub(crate) private_key_file: Option<PathBuf>,
}

impl TlsOptions {
    /// Whether the server certificate is verified. Defaults to true.
    pub fn verify_peer(&self) -> bool {
        self.verify_peer.unwrap_or(true)
    }

    /// Directory of additional trusted CA certificates in PEM form.
    pub fn verify_path(&self) -> Option<&PathBuf> {
        self.verify_path.as_ref()
    }

    /// A trusted CA bundle file in PEM form.
    pub fn verify_file(&self) -> Option<&PathBuf> {
        self.verify_file.as_ref()
    }

    /// Client certificate chain file in PEM form.
    pub fn certificate_file(&self) -> Option<&PathBuf> {
        self.certificate_file.as_ref()
    }

    /// Client private key file in PEM form.
    pub fn private_key_file(&self) -> Option<&PathBuf> {
        self.private_key_file.as_ref()
    }
}

/// Identity of a prepared request, used to match redirect history entries
/// and to decide connection reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fingerprint {
    scheme: String,
    host: String,
    port: u16,
    path: String,
    query: Option<String>,
    method: Method,
}

/// An HTTP request under construction.
///
/// The session mutates a request through its options until it is sent;
/// from the connection's point of view a started request is immutable.
#[derive(Clone)]
pub struct Request {
    url: Url,
    method: Method,
    headers: HeaderMap,
    params: Vec<(String, String)>,
    body: Bytes,
    auth: Option<Auth>,
    cookies: CookieJar,
    timeout: Duration,
    store_timeout: Duration,
    redirect: bool,
    redirect_limit: u32,
    keep_alive: bool,
    cache_redirects: bool,
    throw_on_error: bool,
    gzip: bool,
    body_callback: Option<BodyCallback>,
    final_callback: Option<FinalCallback>,
    tls: TlsOptions,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            // placeholder origin until a url option is applied
            url: Url::parse("http://localhost/").unwrap(),
            method: Method::GET,
            headers: HeaderMap::new(),
            params: Vec::new(),
            body: Bytes::new(),
            auth: None,
            cookies: CookieJar::new(),
            timeout: DEFAULT_TIMEOUT,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            redirect: true,
            redirect_limit: DEFAULT_REDIRECT_LIMIT,
            keep_alive: true,
            cache_redirects: false,
            throw_on_error: false,
            gzip: false,
            body_callback: None,
            final_callback: None,
            tls: TlsOptions::default(),
        }
    }
}

impl Request {
    /// Creates a request with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the configured credentials.
    pub fn auth(&self) -> Option<&Auth> {
        self.auth.as_ref()
    }

    /// Returns the cookies that will be sent with the request.
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    /// Deadline for the whole exchange.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Retention window of the finished response.
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// Whether 3xx responses are followed.
    pub fn redirect(&self) -> bool {
        self.redirect
    }

    /// Maximum number of redirect hops.
    pub fn redirect_limit(&self) -> u32 {
        self.redirect_limit
    }

    /// Whether the connection may be reused by a later request.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Whether known redirect chains are short-circuited.
    pub fn cache_redirects(&self) -> bool {
        self.cache_redirects
    }

    /// Whether the future fails instead of carrying an error response.
    pub fn throw_on_error(&self) -> bool {
        self.throw_on_error
    }

    /// Whether `Accept-Encoding: gzip` is offered. Decoding is left to the
    /// body callback.
    pub fn gzip(&self) -> bool {
        self.gzip
    }

    /// Returns the streaming body consumer, if any.
    pub fn body_callback(&self) -> Option<&BodyCallback> {
        self.body_callback.as_ref()
    }

    /// Returns the completion callback, if any.
    pub fn final_callback(&self) -> Option<&FinalCallback> {
        self.final_callback.as_ref()
    }

    /// Returns the TLS settings.
    pub fn tls(&self) -> &TlsOptions {
        &self.tls
    }

    /// URL scheme, `http` or `https`.
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Host component of the URL.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Explicit or scheme-default port.
    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }

    /// Returns true when the request goes over TLS.
    pub fn is_https(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// The request target as it appears on the request line.
    pub fn target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }

    pub(crate) fn set_url(&mut self, url: Url) {
        self.url = url;
    }

    pub(crate) fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub(crate) fn set_headers(&mut self, headers: HeaderMap) {
        self.headers = headers;
    }

    pub(crate) fn add_params(&mut self, params: Vec<(String, String)>) {
        self.params.extend(params);
    }

    pub(crate) fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    pub(crate) fn set_auth(&mut self, auth: Option<Auth>) {
        self.auth = auth;
    }

    pub(crate) fn set_cookies(&mut self, cookies: CookieJar) {
        self.cookies = cookies;
    }

    pub(crate) fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub(crate) fn set_store_timeout(&mut self, store_timeout: Duration) {
        self.store_timeout = store_timeout;
    }

    pub(crate) fn set_redirect(&mut self, redirect: bool) {
        self.redirect = redirect;
    }

    pub(crate) fn set_redirect_limit(&mut self, limit: u32) {
        self.redirect_limit = limit;
    }

    pub(crate) fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    pub(crate) fn set_cache_redirects(&mut self, cache_redirects: bool) {
        self.cache_redirects = cache_redirects;
    }

    pub(crate) fn set_throw_on_error(&mut self, throw_on_error: bool) {
        self.throw_on_error = throw_on_error;
    }

    pub(crate) fn set_gzip(&mut self, gzip: bool) {
        self.gzip = gzip;
    }

    pub(crate) fn set_body_callback(&mut self, callback: BodyCallback) {
        self.body_callback = Some(callback);
    }

    pub(crate) fn set_final_callback(&mut self, callback: FinalCallback) {
        self.final_callback = Some(callback);
    }

    pub(crate) fn tls_mut(&mut self) -> &mut TlsOptions {
        &mut self.tls
    }

    /// Returns true when `other` addresses the same scheme, host and port,
    /// so an open connection to it can carry this request.
    pub(crate) fn shares_origin(&self, other: &Request) -> bool {
        self.scheme() == other.scheme() && self.host() == other.host() && self.port() == other.port()
    }

    pub(crate) fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            scheme: self.scheme().to_string(),
            host: self.host().to_string(),
            port: self.port(),
            path: self.url.path().to_string(),
            query: self.url.query().map(str::to_string),
            method: self.method.clone(),
        }
    }

    /// Finalizes the request before it is sent: merges query params into the
    /// URL and fills in the computed headers. Headers already set by the
    /// caller are left untouched, except `Host` and `Content-Length` which
    /// are derived from the URL and body and must stay consistent across
    /// redirect hops.
    pub fn prepare(&mut self) {
        if !self.params.is_empty() {
            let params = std::mem::take(&mut self.params);
            let mut pairs = self.url.query_pairs_mut();
            for (name, value) in params {
                pairs.append_pair(&name, &value);
            }
        }

        let host = self.host_header_value();
        // url hosts are ASCII (punycode), always a valid header value
        self.headers.insert(HOST, HeaderValue::try_from(host).unwrap());

        self.headers
            .entry(USER_AGENT)
            .or_insert(HeaderValue::from_static(concat!("arequests/", env!("CARGO_PKG_VERSION"))));

        let connection = if self.keep_alive { "keep-alive" } else { "close" };
        self.headers.entry(CONNECTION).or_insert(HeaderValue::from_static(connection));

        if self.gzip {
            self.headers.entry(ACCEPT_ENCODING).or_insert(HeaderValue::from_static("gzip"));
        }

        let method_carries_body = self.method == Method::POST
            || self.method == Method::PUT
            || self.method == Method::PATCH;
        if !self.body.is_empty() || method_carries_body {
            self.headers.insert(CONTENT_LENGTH, HeaderValue::from(self.body.len() as u64));
        }

        if let Some(auth) = &self.auth {
            // base64 output is ASCII
            self.headers.entry(AUTHORIZATION).or_insert(HeaderValue::try_from(auth.basic()).unwrap());
        }
    }

    /// Serializes the request line, headers and body into `dst`.
    ///
    /// The `Cookie` header is rendered from the jar at write time so cookie
    /// merges performed after [`prepare`](Self::prepare) still take effect.
    pub(crate) fn write_to(&self, dst: &mut BytesMut) {
        dst.extend_from_slice(self.method.as_str().as_bytes());
        dst.put_u8(b' ');
        dst.extend_from_slice(self.target().as_bytes());
        dst.extend_from_slice(b" HTTP/1.1\r\n");

        for (name, value) in &self.headers {
            dst.extend_from_slice(name.as_str().as_bytes());
            dst.extend_from_slice(b": ");
            dst.extend_from_slice(value.as_bytes());
            dst.extend_from_slice(b"\r\n");
        }

        if !self.headers.contains_key(COOKIE) {
            if let Some(cookies) = self.cookies.to_header_value() {
                dst.extend_from_slice(b"cookie: ");
                dst.extend_from_slice(cookies.as_bytes());
                dst.extend_from_slice(b"\r\n");
            }
        }

        dst.extend_from_slice(b"\r\n");
        dst.extend_from_slice(&self.body);
    }

    fn host_header_value(&self) -> String {
        let host = self.host();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_for(url: &str) -> Request {
        let mut request = Request::new();
        request.set_url(Url::parse(url).unwrap());
        request
    }

    #[test]
    fn prepare_fills_computed_headers() {
        let mut request = request_for("http://example.com/index.html");
        request.prepare();

        assert_eq!(request.headers().get(HOST).unwrap(), "example.com");
        assert_eq!(request.headers().get(CONNECTION).unwrap(), "keep-alive");
        assert!(request.headers().get(USER_AGENT).is_some());
        assert!(request.headers().get(CONTENT_LENGTH).is_none());
    }

    #[test]
    fn prepare_keeps_explicit_port_in_host() {
        let mut request = request_for("http://example.com:8080/");
        request.prepare();
        assert_eq!(request.headers().get(HOST).unwrap(), "example.com:8080");
    }

    #[test]
    fn prepare_merges_params_into_query() {
        let mut request = request_for("http://example.com/search?q=1");
        request.add_params(vec![("lang".into(), "en".into())]);
        request.prepare();
        assert_eq!(request.target(), "/search?q=1&lang=en");
    }

    #[test]
    fn post_gets_content_length() {
        let mut request = request_for("http://example.com/submit");
        request.set_method(Method::POST);
        request.set_body(Bytes::from_static(b"a=1"));
        request.prepare();
        assert_eq!(request.headers().get(CONTENT_LENGTH).unwrap(), "3");
    }

    #[test]
    fn wire_request_reparses() {
        let mut request = request_for("http://example.com/a/b?k=v");
        request.set_auth(Some(Auth::new("u", "p")));
        request.prepare();

        let mut wire = BytesMut::new();
        request.write_to(&mut wire);

        let mut headers = [httparse::EMPTY_HEADER; 16];
        let mut parsed = httparse::Request::new(&mut headers);
        let status = parsed.parse(&wire).unwrap();
        assert!(status.is_complete());

        assert_eq!(parsed.method, Some("GET"));
        assert_eq!(parsed.path, Some("/a/b?k=v"));
        assert_eq!(parsed.version, Some(1));

        let host = parsed.headers.iter().find(|h| h.name.eq_ignore_ascii_case("host")).unwrap();
        assert_eq!(host.value, b"example.com");
        let auth =
            parsed.headers.iter().find(|h| h.name.eq_ignore_ascii_case("authorization")).unwrap();
        assert_eq!(auth.value, b"Basic dTpw");
    }

    #[test]
    fn cookies_are_rendered_at_write_time() {
        let mut request = request_for("http://example.com/");
        request.prepare();

        let mut jar = CookieJar::new();
        jar.add(crate::protocol::Cookie::new("sid", "42"));
        request.set_cookies(jar);

        let mut wire = BytesMut::new();
        request.write_to(&mut wire);
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.contains("cookie: sid=42\r\n"));
    }

    #[test]
    fn fingerprint_distinguishes_method_and_target() {
        let mut get = request_for("http://example.com/a");
        let mut post = request_for("http://example.com/a");
        post.set_method(Method::POST);
        assert_ne!(get.fingerprint(), post.fingerprint());

        let other_path = request_for("http://example.com/b");
        assert_ne!(get.fingerprint(), other_path.fingerprint());

        get.set_method(Method::POST);
        assert_eq!(get.fingerprint(), post.fingerprint());
    }

    #[test]
    fn shares_origin_ignores_path() {
        let a = request_for("http://example.com/a");
        let b = request_for("http://example.com/b?x=1");
        let c = request_for("https://example.com/a");
        assert!(a.shares_origin(&b));
        assert!(!a.shares_origin(&c));
    }
}
