//! The session: option accumulation, connection reuse and request dispatch.
//!
//! A session keeps one request being built up through [`Opt`] values and
//! at most one connection, the one that carried the previous request.
//! Sending selects between reusing that connection's socket (same scheme,
//! host and port, cookies merged forward) and opening a fresh one, then
//! hands back a [`ResponseFuture`].

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use url::Url;

use crate::connection::Connection;
use crate::connection::ResponseResult;
use crate::protocol::{
    Auth, BodyCallback, CookieJar, Error, ErrorKind, FinalCallback, Request, Response,
};
use crate::service::Service;

/// A request option, applied through [`Session::set_option`].
///
/// Options accumulate on the session's request and stay in effect for
/// subsequent requests until overwritten.
pub enum Opt {
    /// Absolute request URL
    Url(String),
    /// URL scheme, `http` or `https`
    Protocol(String),
    /// Host component of the URL
    Domain(String),
    /// Port component of the URL
    Port(u16),
    /// Path component of the URL
    Path(String),
    /// Raw query string
    Query(String),
    /// Query parameters, appended URL-encoded at prepare time
    Params(Vec<(String, String)>),
    /// Request method
    Method(Method),
    /// Request headers, replacing previously set ones
    Headers(HeaderMap),
    /// Request body
    Data(Bytes),
    /// Basic authentication credentials
    Auth(Auth),
    /// Cookies sent with the request
    Cookies(CookieJar),
    /// Exchange deadline in seconds
    Timeout(u64),
    /// Retention window of the finished response in seconds
    StoreTimeout(u64),
    /// Follow 301/302/303 responses
    Redirect(bool),
    /// Maximum number of redirect hops
    RedirectLimit(u32),
    /// Keep the connection open for reuse
    KeepAlive(bool),
    /// Short-circuit redirect chains walked before
    CacheRedirects(bool),
    /// Fail the future instead of returning an error-carrying response
    ThrowOnError(bool),
    /// Offer `Accept-Encoding: gzip`; decoding is up to the caller
    Gzip(bool),
    /// Streaming consumer for body data
    BodyCallback(BodyCallback),
    /// Callback invoked with the finished response
    FinalCallback(FinalCallback),
    /// Client certificate and private key files, as a pair
    SslAuth(PathBuf, PathBuf),
    /// Trusted CA bundle file, shorthand for [`Opt::VerifyFile`]
    SslCerts(PathBuf),
    /// Verify the server certificate (default true)
    VerifyPeer(bool),
    /// Directory of trusted CA certificates
    VerifyPath(PathBuf),
    /// Trusted CA bundle file
    VerifyFile(PathBuf),
    /// Client certificate chain file
    CertificateFile(PathBuf),
    /// Client private key file
    PrivateKeyFile(PathBuf),
}

/// An option value that could not be applied.
#[derive(Error, Debug)]
pub enum OptionError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid protocol: {0}")]
    InvalidProtocol(String),

    #[error("invalid port: {0}")]
    InvalidPort(u16),
}

/// A sequence of requests sharing options, cookies and, when possible,
/// a connection.
pub struct Session {
    handle: Handle,
    request: Request,
    connection: Option<Connection>,
}

impl Session {
    /// Creates a session on the given service.
    pub fn new(service: &Service) -> Session {
        Session { handle: service.handle(), request: Request::new(), connection: None }
    }

    /// Applies one request option.
    pub fn set_option(&mut self, opt: Opt) -> Result<(), OptionError> {
        match opt {
            Opt::Url(url) => self.request.set_url(Url::parse(&url)?),
            Opt::Protocol(protocol) => {
                if protocol != "http" && protocol != "https" {
                    return Err(OptionError::InvalidProtocol(protocol));
                }
                let mut url = self.request.url().clone();
                url.set_scheme(&protocol)
                    .map_err(|_| OptionError::InvalidProtocol(protocol))?;
                self.request.set_url(url);
            }
            Opt::Domain(domain) => {
                let mut url = self.request.url().clone();
                url.set_host(Some(&domain))?;
                self.request.set_url(url);
            }
            Opt::Port(port) => {
                let mut url = self.request.url().clone();
                url.set_port(Some(port)).map_err(|_| OptionError::InvalidPort(port))?;
                self.request.set_url(url);
            }
            Opt::Path(path) => {
                let mut url = self.request.url().clone();
                url.set_path(&path);
                self.request.set_url(url);
            }
            Opt::Query(query) => {
                let mut url = self.request.url().clone();
                url.set_query(Some(&query));
                self.request.set_url(url);
            }
            Opt::Params(params) => self.request.add_params(params),
            Opt::Method(method) => self.request.set_method(method),
            Opt::Headers(headers) => self.request.set_headers(headers),
            Opt::Data(data) => self.request.set_body(data),
            Opt::Auth(auth) => self.request.set_auth(Some(auth)),
            Opt::Cookies(cookies) => self.request.set_cookies(cookies),
            Opt::Timeout(secs) => self.request.set_timeout(Duration::from_secs(secs)),
            Opt::StoreTimeout(secs) => self.request.set_store_timeout(Duration::from_secs(secs)),
            Opt::Redirect(redirect) => self.request.set_redirect(redirect),
            Opt::RedirectLimit(limit) => self.request.set_redirect_limit(limit),
            Opt::KeepAlive(keep_alive) => self.request.set_keep_alive(keep_alive),
            Opt::CacheRedirects(cache) => self.request.set_cache_redirects(cache),
            Opt::ThrowOnError(throw) => self.request.set_throw_on_error(throw),
            Opt::Gzip(gzip) => self.request.set_gzip(gzip),
            Opt::BodyCallback(callback) => self.request.set_body_callback(callback),
            Opt::FinalCallback(callback) => self.request.set_final_callback(callback),
            Opt::SslAuth(certificate, key) => {
                let tls = self.request.tls_mut();
                tls.certificate_file = Some(certificate);
                tls.private_key_file = Some(key);
            }
            Opt::SslCerts(file) => self.request.tls_mut().verify_file = Some(file),
            Opt::VerifyPeer(verify) => self.request.tls_mut().verify_peer = Some(verify),
            Opt::VerifyPath(path) => self.request.tls_mut().verify_path = Some(path),
            Opt::VerifyFile(file) => self.request.tls_mut().verify_file = Some(file),
            Opt::CertificateFile(file) => self.request.tls_mut().certificate_file = Some(file),
            Opt::PrivateKeyFile(file) => self.request.tls_mut().private_key_file = Some(file),
        }
        Ok(())
    }

    /// The request as currently accumulated.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Sends a GET request.
    pub fn get(&mut self) -> ResponseFuture {
        self.request.set_method(Method::GET);
        self.send()
    }

    /// Sends a POST request.
    pub fn post(&mut self) -> ResponseFuture {
        self.request.set_method(Method::POST);
        self.send()
    }

    /// Sends a PUT request.
    pub fn put(&mut self) -> ResponseFuture {
        self.request.set_method(Method::PUT);
        self.send()
    }

    /// Sends a PATCH request.
    pub fn patch(&mut self) -> ResponseFuture {
        self.request.set_method(Method::PATCH);
        self.send()
    }

    /// Sends a DELETE request.
    pub fn delete(&mut self) -> ResponseFuture {
        self.request.set_method(Method::DELETE);
        self.send()
    }

    /// Sends a HEAD request.
    pub fn head(&mut self) -> ResponseFuture {
        self.request.set_method(Method::HEAD);
        self.send()
    }

    /// Sends the accumulated request.
    ///
    /// When the previous connection is to the same scheme, host and port,
    /// its open socket is adopted and its response cookies are merged into
    /// the request (request cookies win on name collisions). With redirect
    /// caching enabled, a request matching a previously walked redirect
    /// chain jumps straight to the chain's end.
    pub fn send(&mut self) -> ResponseFuture {
        if self.request.cache_redirects() {
            if let Some(prior) = self.connection.as_ref().and_then(|conn| conn.completed()) {
                if let Some(hit) = prior.redirects().find(&self.request) {
                    let target = hit.request();
                    self.request.set_url(target.url().clone());
                    self.request.set_auth(target.auth().cloned());
                    self.request.set_cookies(target.cookies().clone());
                }
            }
        }

        self.request.prepare();

        let connection = match &self.connection {
            Some(prior) if !prior.is_expired() => match prior.completed() {
                Some(response) if response.request().shares_origin(&self.request) => {
                    let mut cookies = self.request.cookies().clone();
                    cookies.update(response.cookies());
                    self.request.set_cookies(cookies);
                    Connection::reuse(self.handle.clone(), self.request.clone(), prior)
                }
                _ => Connection::new(self.handle.clone(), self.request.clone()),
            },
            _ => Connection::new(self.handle.clone(), self.request.clone()),
        };

        let receiver = connection.start();
        self.connection = Some(connection);
        ResponseFuture { receiver }
    }

    /// The connection carrying the most recent request, if any.
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    /// True once the previous response's retention window has elapsed.
    pub fn is_expired(&self) -> bool {
        self.connection.as_ref().map(Connection::is_expired).unwrap_or(false)
    }
}

/// Resolves to the response once the exchange reaches a terminal state.
///
/// The future yields `Ok(response)` even for failed exchanges (inspect
/// [`Response::error`]); only with the throw-on-error option does a failed
/// exchange resolve to `Err`.
pub struct ResponseFuture {
    receiver: Option<oneshot::Receiver<ResponseResult>>,
}

impl ResponseFuture {
    /// Blocks the calling thread until the response is available.
    ///
    /// This is the synchronous boundary of the API and must not be called
    /// from async context.
    pub fn wait(self) -> Result<Response, Error> {
        match self.receiver {
            Some(receiver) => receiver.blocking_recv().unwrap_or_else(|_| Err(canceled())),
            None => Err(canceled()),
        }
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.receiver.as_mut() {
            Some(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|result| result.unwrap_or_else(|_| Err(canceled()))),
            None => Poll::Ready(Err(canceled())),
        }
    }
}

fn canceled() -> Error {
    Error::new(ErrorKind::Canceled, "connection driver dropped")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        let service = Service::new().unwrap();
        let mut session = Session::new(&service);
        session.set_option(Opt::Url("http://example.com/".into())).unwrap();
        session
    }

    #[test]
    fn url_option_rejects_garbage() {
        let service = Service::new().unwrap();
        let mut session = Session::new(&service);
        assert!(session.set_option(Opt::Url("not a url".into())).is_err());
    }

    #[test]
    fn url_pieces_compose() {
        let mut session = session();
        session.set_option(Opt::Protocol("https".into())).unwrap();
        session.set_option(Opt::Domain("other.example".into())).unwrap();
        session.set_option(Opt::Port(8443)).unwrap();
        session.set_option(Opt::Path("/api/v1".into())).unwrap();
        session.set_option(Opt::Query("q=1".into())).unwrap();

        let request = session.request();
        assert_eq!(request.scheme(), "https");
        assert_eq!(request.host(), "other.example");
        assert_eq!(request.port(), 8443);
        assert_eq!(request.target(), "/api/v1?q=1");
    }

    #[test]
    fn invalid_protocol_is_rejected() {
        let mut session = session();
        assert!(matches!(
            session.set_option(Opt::Protocol("ftp".into())),
            Err(OptionError::InvalidProtocol(_))
        ));
    }

    #[test]
    fn options_accumulate_on_the_request() {
        let mut session = session();
        session.set_option(Opt::Timeout(7)).unwrap();
        session.set_option(Opt::Redirect(false)).unwrap();
        session.set_option(Opt::RedirectLimit(2)).unwrap();
        session.set_option(Opt::Auth("u:p".parse().unwrap())).unwrap();

        let request = session.request();
        assert_eq!(request.timeout(), Duration::from_secs(7));
        assert!(!request.redirect());
        assert_eq!(request.redirect_limit(), 2);
        assert_eq!(request.auth().unwrap().user(), "u");
    }
}
