//! The per-request connection state machine.
//!
//! A [`Connection`] owns everything one HTTP exchange needs: the stream,
//! the decoders, the buffers and the response under construction. Starting
//! it spawns a driver task that walks the exchange from DNS resolution to
//! body completion, follows redirects, restarts once on a stale keep-alive
//! socket, and finally fulfils the response future. The finished response
//! and (for keep-alive) the open stream stay available to the session until
//! the dispose window elapses and the connection expires.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use http::header::{CONNECTION, LOCATION, SET_COOKIE};
use http::{HeaderMap, StatusCode};
use tokio::net::lookup_host;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::codec::Decoder;
use tracing::{debug, error, trace};

use super::state::{ConnState, StateCell};
use crate::codec::body::PayloadDecoder;
use crate::codec::{HeaderDecoder, StatusDecoder};
use crate::protocol::{
    BodyEvent, Cookie, Error, ErrorKind, PayloadItem, Redirects, Request, Response,
};
use crate::stream::{is_socket_closed, Stream};

/// What a fulfilled request future resolves to.
pub(crate) type ResponseResult = Result<Response, Error>;

/// Stops the exchange after a terminal state has been recorded.
struct Halt;

type StageResult = Result<(), Halt>;

/// A single HTTP exchange with its lifecycle around it.
pub struct Connection {
    handle: Handle,
    shared: Arc<Shared>,
    driver: Mutex<Option<Driver>>,
    receiver: Mutex<Option<oneshot::Receiver<ResponseResult>>>,
}

/// State observable from outside the driver task: the session polls it for
/// reuse and expiry, the dispose timer clears it.
struct Shared {
    state: StateCell,
    parked: Mutex<Option<Stream>>,
    completed: Mutex<Option<Response>>,
}

impl Shared {
    fn expire(&self) {
        self.state.set(ConnState::Expired);
        self.parked.lock().unwrap().take();
        self.completed.lock().unwrap().take();
    }
}

impl Connection {
    /// Creates a connection for `request` with a fresh stream.
    pub(crate) fn new(handle: Handle, request: Request) -> Connection {
        Self::build(handle, request, None, Redirects::new())
    }

    /// Creates a connection that adopts the open stream of `prior` and
    /// carries its redirect history forward.
    pub(crate) fn reuse(handle: Handle, request: Request, prior: &Connection) -> Connection {
        let stream = prior.shared.parked.lock().unwrap().take();
        let redirects =
            prior.completed().map(|response| response.redirects().clone()).unwrap_or_default();
        Self::build(handle, request, stream, redirects)
    }

    fn build(
        handle: Handle,
        request: Request,
        stream: Option<Stream>,
        redirects: Redirects,
    ) -> Connection {
        let shared = Arc::new(Shared {
            state: StateCell::new(),
            parked: Mutex::new(None),
            completed: Mutex::new(None),
        });
        let (tx, rx) = oneshot::channel();

        let mut response = Response::new(request);
        response.set_redirects(redirects);

        let reused = stream.is_some();
        let driver = Driver {
            shared: Arc::clone(&shared),
            response,
            stream,
            reused,
            read_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
            raw: BytesMut::new(),
            tx,
        };

        Connection {
            handle,
            shared,
            driver: Mutex::new(Some(driver)),
            receiver: Mutex::new(Some(rx)),
        }
    }

    /// Spawns the driver task. The returned receiver resolves exactly once,
    /// when the exchange reaches a terminal state.
    pub(crate) fn start(&self) -> Option<oneshot::Receiver<ResponseResult>> {
        if let Some(driver) = self.driver.lock().unwrap().take() {
            self.handle.spawn(driver.run());
        }
        self.receiver.lock().unwrap().take()
    }

    /// Current state of the exchange.
    pub fn state(&self) -> ConnState {
        self.shared.state.get()
    }

    /// True once the dispose window has elapsed and the retained response
    /// and socket have been released.
    pub fn is_expired(&self) -> bool {
        self.shared.state.get() == ConnState::Expired
    }

    /// The finished response, while it is still retained.
    pub(crate) fn completed(&self) -> Option<Response> {
        self.shared.completed.lock().unwrap().clone()
    }
}

/// Owns the exchange while it runs. Everything here is touched only by the
/// single spawned task, so the stages need no synchronization of their own.
struct Driver {
    shared: Arc<Shared>,
    response: Response,
    stream: Option<Stream>,
    reused: bool,
    read_buf: BytesMut,
    write_buf: BytesMut,
    raw: BytesMut,
    tx: oneshot::Sender<ResponseResult>,
}

impl Driver {
    async fn run(mut self) {
        let request = self.response.request();
        debug!(method = %request.method(), url = %request.url(), "starting request");

        let deadline = Instant::now() + request.timeout();
        if timeout_at(deadline, self.exchange()).await.is_err() {
            self.set_timeout();
        }

        self.end().await;
    }

    /// Drives one request to a terminal state. The loop re-enters for a
    /// redirect hop or for the one-shot restart on a stale reused socket.
    async fn exchange(&mut self) -> StageResult {
        loop {
            let mut stream = match self.stream.take() {
                Some(stream) if self.reused && stream.is_open() => {
                    trace!("adopted keep-alive stream, skipping connect");
                    stream
                }
                _ => {
                    self.reused = false;
                    self.connect_stream().await?
                }
            };

            // WRITE
            self.set_state(ConnState::Write);
            self.write_buf.clear();
            self.response.request().write_to(&mut self.write_buf);
            if let Err(e) = stream.write_all(&mut self.write_buf).await {
                if is_socket_closed(&e) && self.reused {
                    self.restart();
                    continue;
                }
                return Err(self.fail(ConnState::WriteError, e));
            }
            trace!("request written");

            // READ_STATUS
            self.set_state(ConnState::ReadStatus);
            match stream.read_until(&mut self.read_buf, b"\r\n").await {
                Ok(true) => {}
                Ok(false) => {
                    // peer EOF before the status line
                    if self.reused {
                        self.restart();
                        continue;
                    }
                    return Err(
                        self.fail(ConnState::ReadStatusError, "connection closed before status")
                    );
                }
                Err(e) => {
                    if is_socket_closed(&e) && self.reused {
                        self.restart();
                        continue;
                    }
                    return Err(self.fail(ConnState::ReadStatusError, e));
                }
            }
            let status_line = match StatusDecoder.decode(&mut self.read_buf) {
                Ok(Some(line)) => line,
                Ok(None) | Err(_) => {
                    return Err(self.fail(ConnState::ReadStatusDataError, "bad status data"))
                }
            };
            trace!(status = %status_line.status, "status line parsed");
            self.response.set_status_line(
                status_line.version,
                status_line.status,
                status_line.reason,
            );

            // READ_HEADERS
            self.set_state(ConnState::ReadHeaders);
            let mut header_decoder = HeaderDecoder::new(
                self.response.request().method().clone(),
                self.response.status(),
            );
            let (headers, payload) = loop {
                match header_decoder.decode(&mut self.read_buf) {
                    Ok(Some(item)) => break item,
                    Ok(None) => {
                        let got = match stream.read_at_least(&mut self.read_buf, 1).await {
                            Ok(got) => got,
                            Err(e) => return Err(self.fail(ConnState::ReadHeadersError, e)),
                        };
                        if got == 0 {
                            let message = if self.read_buf.is_empty() {
                                "no headers"
                            } else {
                                "bad headers data"
                            };
                            return Err(self.fail(ConnState::ReadHeadersError, message));
                        }
                    }
                    Err(e) => return Err(self.fail(ConnState::ReadHeadersError, e)),
                }
            };
            self.install_headers(headers);

            // body framing per the dispatched decoder
            self.read_body(&mut stream, payload).await?;

            // redirect chaining or completion
            let status = self.response.status();
            if is_redirect_code(status) && self.response.request().redirect() {
                drop(stream);
                self.perform_redirect()?;
                continue;
            }

            self.stream = Some(stream);
            self.set_success();
            return Ok(());
        }
    }

    /// RESOLVE, CONNECT and HANDSHAKE for a fresh stream.
    async fn connect_stream(&mut self) -> Result<Stream, Halt> {
        let request = self.response.request();
        let host = request.host().to_string();
        let port = request.port();
        let is_https = request.is_https();
        let tls = request.tls().clone();

        self.set_state(ConnState::Resolve);
        let endpoints: Vec<SocketAddr> = match lookup_host((host.as_str(), port)).await {
            Ok(endpoints) => endpoints.collect(),
            Err(e) => return Err(self.fail(ConnState::ResolveError, e)),
        };
        if endpoints.is_empty() {
            return Err(self.fail(ConnState::ResolveError, "no addresses resolved"));
        }
        trace!(host = %host, endpoints = endpoints.len(), "resolved");

        self.set_state(ConnState::Connect);
        let stream = match Stream::connect(&endpoints).await {
            Ok(stream) => stream,
            Err(e) => return Err(self.fail(ConnState::ConnectError, e)),
        };

        self.set_state(ConnState::Handshake);
        if is_https {
            match stream.handshake(&host, &tls).await {
                Ok(stream) => Ok(stream),
                Err(e) => Err(self.fail(ConnState::HandshakeError, e)),
            }
        } else {
            Ok(stream)
        }
    }

    async fn read_body(&mut self, stream: &mut Stream, payload: PayloadDecoder) -> StageResult {
        if payload.is_empty() {
            Ok(())
        } else if payload.is_length() {
            self.read_content_length(stream, payload).await
        } else if payload.is_chunked() {
            self.read_chunked(stream, payload).await
        } else {
            self.read_until_eof(stream, payload).await
        }
    }

    /// READ_CONTENT_LENGTH: exactly the declared number of body bytes.
    async fn read_content_length(
        &mut self,
        stream: &mut Stream,
        mut payload: PayloadDecoder,
    ) -> StageResult {
        self.set_state(ConnState::ReadContentLength);
        loop {
            match payload.decode(&mut self.read_buf) {
                Ok(Some(PayloadItem::Chunk(bytes))) => self.deliver(bytes),
                Ok(Some(PayloadItem::Eof)) => return Ok(()),
                Ok(None) => {
                    let need = usize::try_from(payload.remaining()).unwrap_or(usize::MAX).max(1);
                    let got = match stream.read_at_least(&mut self.read_buf, need).await {
                        Ok(got) => got,
                        Err(e) => return Err(self.fail(ConnState::ReadContentLengthError, e)),
                    };
                    if got == 0 {
                        return Err(self.fail(
                            ConnState::ReadContentLengthError,
                            "connection closed before body complete",
                        ));
                    }
                }
                Err(e) => return Err(self.fail(ConnState::ReadContentLengthError, e)),
            }
        }
    }

    /// READ_CHUNK_HEADER / READ_CHUNK_DATA: chunked transfer encoding.
    ///
    /// An EOF between chunks completes the body, tolerating servers that
    /// drop the connection instead of sending the zero chunk. An EOF inside
    /// chunk data is a truncation error.
    async fn read_chunked(&mut self, stream: &mut Stream, mut payload: PayloadDecoder) -> StageResult {
        loop {
            let reading_data = payload.reading_chunk_data();
            self.set_state(if reading_data {
                ConnState::ReadChunkData
            } else {
                ConnState::ReadChunkHeader
            });

            match payload.decode(&mut self.read_buf) {
                Ok(Some(PayloadItem::Chunk(bytes))) => self.deliver(bytes),
                Ok(Some(PayloadItem::Eof)) => return Ok(()),
                Ok(None) => {
                    let need = usize::try_from(payload.remaining()).unwrap_or(usize::MAX).max(1);
                    let got = match stream.read_at_least(&mut self.read_buf, need).await {
                        Ok(got) => got,
                        Err(e) => return Err(self.fail(self.chunk_error_state(&payload), e)),
                    };
                    if got == 0 {
                        if payload.reading_chunk_data() {
                            return Err(self.fail(
                                ConnState::ReadChunkDataError,
                                "connection closed inside chunk",
                            ));
                        }
                        return Ok(());
                    }
                }
                Err(e) => {
                    let state = self.chunk_error_state(&payload);
                    return Err(self.fail(state, e));
                }
            }
        }
    }

    fn chunk_error_state(&self, payload: &PayloadDecoder) -> ConnState {
        if payload.reading_chunk_data() {
            ConnState::ReadChunkDataError
        } else {
            ConnState::ReadChunkHeaderError
        }
    }

    /// READ_UNTIL_EOF: everything until the peer closes the stream.
    async fn read_until_eof(
        &mut self,
        stream: &mut Stream,
        mut payload: PayloadDecoder,
    ) -> StageResult {
        self.set_state(ConnState::ReadUntilEof);
        loop {
            match payload.decode(&mut self.read_buf) {
                Ok(Some(PayloadItem::Chunk(bytes))) => self.deliver(bytes),
                Ok(Some(PayloadItem::Eof)) => return Ok(()),
                Ok(None) => {
                    let got = match stream.read_at_least(&mut self.read_buf, 1).await {
                        Ok(got) => got,
                        Err(e) => return Err(self.fail(ConnState::ReadUntilEofError, e)),
                    };
                    if got == 0 {
                        return Ok(());
                    }
                }
                Err(e) => return Err(self.fail(ConnState::ReadUntilEofError, e)),
            }
        }
    }

    /// Routes a body chunk to the streaming callback or the raw buffer.
    fn deliver(&mut self, bytes: Bytes) {
        if let Some(callback) = self.response.request().body_callback() {
            callback(BodyEvent::Chunk(bytes));
        } else {
            self.raw.extend_from_slice(&bytes);
        }
    }

    /// Moves collected cookies out of the header block and installs it.
    fn install_headers(&mut self, headers: HeaderMap) {
        let host = self.response.request().host().to_string();
        let path = self.response.request().url().path().to_string();

        for value in headers.get_all(SET_COOKIE) {
            if let Ok(text) = value.to_str() {
                if let Some(mut cookie) = Cookie::parse(text) {
                    cookie.stamp_origin(host.clone(), path.clone());
                    self.response.add_cookie(cookie);
                }
            }
        }

        self.response.set_headers(headers);
    }

    /// Rebinds the exchange to the redirect target: a re-prepared request,
    /// a fresh response carrying the grown history and hop count, and
    /// cleared buffers. The caller re-enters the loop at RESOLVE.
    fn perform_redirect(&mut self) -> StageResult {
        if self.response.redirect_count() >= self.response.request().redirect_limit() {
            return Err(self.fail(ConnState::RedirectExhausted, "redirect exhausted"));
        }

        let location =
            match self.response.headers().get(LOCATION).and_then(|value| value.to_str().ok()) {
                Some(location) => location.to_string(),
                None => return Err(self.fail(ConnState::RedirectError, "no Location")),
            };

        let target = match self.response.request().url().join(&location) {
            Ok(url) => url,
            Err(e) => return Err(self.fail(ConnState::RedirectError, format!("bad Location: {e}"))),
        };
        debug!(target = %target, "following redirect");

        let mut redirects = self.response.take_redirects();
        if redirects.is_empty() {
            redirects.add(self.response.clone());
        }
        let redirect_count = self.response.redirect_count() + 1;

        let mut request = self.response.request().clone();
        request.set_url(target);
        request.prepare();

        let mut response = Response::new(request);
        response.set_redirect_count(redirect_count);
        redirects.add(response.clone());
        response.set_redirects(redirects);
        self.response = response;

        self.reused = false;
        self.read_buf.clear();
        self.write_buf.clear();
        self.raw.clear();

        Ok(())
    }

    /// Drops the stale socket and decoder state so the loop re-enters the
    /// fresh-connection path. Clearing the reused flag makes the restart a
    /// one-shot: any later socket-closed failure is terminal.
    fn restart(&mut self) {
        debug!("stale keep-alive socket, restarting with a fresh connection");
        self.reused = false;
        self.read_buf.clear();
        self.write_buf.clear();
        self.raw.clear();
    }

    fn set_state(&self, state: ConnState) {
        self.shared.state.set(state);
    }

    fn set_success(&mut self) {
        if self.shared.state.get().is_terminal() {
            return;
        }
        self.shared.state.set(ConnState::Success);
        self.response.set_error(Error::success());
    }

    fn set_timeout(&mut self) {
        if self.shared.state.get().is_terminal() {
            return;
        }
        debug!("deadline expired before completion");
        self.shared.state.set(ConnState::Timeout);
        self.response.set_error(Error::new(ErrorKind::Timeout, "timeout"));
    }

    /// Records a failing terminal state and its error on the response.
    fn fail<S: ToString>(&mut self, state: ConnState, message: S) -> Halt {
        if self.shared.state.get().is_terminal() {
            return Halt;
        }
        let message = message.to_string();
        error!(state = ?state, cause = %message, "request failed");

        self.shared.state.set(state);
        let kind = state.error_kind().unwrap_or(ErrorKind::Canceled);
        self.response.set_error(Error::new(kind, message));
        Halt
    }

    /// Wraps the exchange up, in order: final callback, dispose timer,
    /// stream disposition, body move, body-callback end signal, and the
    /// one-shot fulfilment of the future.
    async fn end(mut self) {
        let request = self.response.request().clone();

        if let Some(callback) = request.final_callback() {
            callback(&self.response);
        }

        let connection_close = self
            .response
            .headers()
            .get(CONNECTION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.eq_ignore_ascii_case("close"))
            .unwrap_or(false);

        match self.stream.take() {
            Some(stream) if request.keep_alive() && !connection_close && stream.is_open() => {
                *self.shared.parked.lock().unwrap() = Some(stream);
            }
            Some(mut stream) => stream.close().await,
            None => {}
        }

        self.response.set_raw(std::mem::take(&mut self.raw).freeze());

        if let Some(callback) = request.body_callback() {
            callback(BodyEvent::End(self.response.error().clone()));
        }

        *self.shared.completed.lock().unwrap() = Some(self.response.clone());

        // armed only after the retained response and parked stream are in
        // place, so even a zero retention window releases both
        let shared = Arc::clone(&self.shared);
        let store_timeout = request.store_timeout();
        tokio::spawn(async move {
            sleep(store_timeout).await;
            shared.expire();
        });

        let result = if request.throw_on_error() && !self.response.error().is_success() {
            Err(self.response.error().clone())
        } else {
            Ok(self.response)
        };
        let _ = self.tx.send(result);
        debug!("connection finished");
    }
}

fn is_redirect_code(status: StatusCode) -> bool {
    status == StatusCode::MOVED_PERMANENTLY
        || status == StatusCode::FOUND
        || status == StatusCode::SEE_OTHER
}
