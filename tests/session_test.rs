//! End-to-end exchanges against scripted TCP servers.
//!
//! Each test binds a listener on a loopback port and serves canned
//! responses from a plain thread, so the client's own service runtime is
//! the only async machinery involved.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use arequests::{BodyEvent, Error, ErrorKind, Opt, Service, Session};

fn spawn_server<F>(script: F) -> SocketAddr
where
    F: FnOnce(TcpListener, SocketAddr) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || script(listener, addr));
    addr
}

/// Reads one request head (all tests send bodyless requests).
fn read_head(stream: &mut TcpStream) -> Vec<u8> {
    let mut head = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = match stream.read(&mut chunk) {
            Ok(n) => n,
            Err(_) => break,
        };
        if n == 0 {
            break;
        }
        head.extend_from_slice(&chunk[..n]);
        if head.windows(4).any(|window| window == b"\r\n\r\n") {
            break;
        }
    }
    head
}

fn session_for(service: &Service, addr: SocketAddr) -> Session {
    let mut session = service.session();
    session.set_option(Opt::Url(format!("http://{addr}/"))).unwrap();
    session
}

#[test]
fn content_length_body() {
    let addr = spawn_server(|listener, _| {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").unwrap();
    });

    let service = Service::new().unwrap();
    let mut session = session_for(&service, addr);
    session.set_option(Opt::KeepAlive(false)).unwrap();

    let response = session.get().wait().unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(&response.raw()[..], b"hello");
    assert_eq!(response.error().kind(), ErrorKind::Success);
}

#[test]
fn content_length_zero_is_immediate_success() {
    let addr = spawn_server(|listener, _| {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").unwrap();
    });

    let service = Service::new().unwrap();
    let mut session = session_for(&service, addr);

    let response = session.get().wait().unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(response.raw().is_empty());
    assert!(response.error().is_success());
}

#[test]
fn chunked_body_is_reassembled() {
    let addr = spawn_server(|listener, _| {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        stream
            .write_all(
                b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                  5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
            )
            .unwrap();
    });

    let service = Service::new().unwrap();
    let mut session = session_for(&service, addr);

    let response = session.get().wait().unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(&response.raw()[..], b"hello world");
    assert!(response.error().is_success());
}

#[test]
fn chunked_zero_chunk_only() {
    let addr = spawn_server(|listener, _| {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n")
            .unwrap();
    });

    let service = Service::new().unwrap();
    let mut session = session_for(&service, addr);

    let response = session.get().wait().unwrap();
    assert!(response.raw().is_empty());
    assert!(response.error().is_success());
}

#[test]
fn body_until_connection_close() {
    let addr = spawn_server(|listener, _| {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        stream.write_all(b"HTTP/1.1 200 OK\r\n\r\nstream until close").unwrap();
    });

    let service = Service::new().unwrap();
    let mut session = session_for(&service, addr);

    let response = session.get().wait().unwrap();
    assert_eq!(&response.raw()[..], b"stream until close");
    assert!(response.error().is_success());
}

#[test]
fn head_response_body_is_skipped() {
    let addr = spawn_server(|listener, _| {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        // HEAD responses declare a length but carry no body
        stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n").unwrap();
    });

    let service = Service::new().unwrap();
    let mut session = session_for(&service, addr);

    let response = session.head().wait().unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(response.raw().is_empty());
    assert!(response.error().is_success());
}

#[test]
fn redirect_is_followed_with_history() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        let (mut first, _) = listener.accept().unwrap();
        read_head(&mut first);
        let moved = format!(
            "HTTP/1.1 301 Moved Permanently\r\nLocation: http://{addr}/b\r\nContent-Length: 0\r\n\r\n"
        );
        first.write_all(moved.as_bytes()).unwrap();

        let (mut second, _) = listener.accept().unwrap();
        let head = read_head(&mut second);
        assert!(head.starts_with(b"GET /b "));
        second.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").unwrap();
    });

    let service = Service::new().unwrap();
    let mut session = service.session();
    session.set_option(Opt::Url(format!("http://{addr}/a"))).unwrap();
    session.set_option(Opt::RedirectLimit(3)).unwrap();

    let response = session.get().wait().unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(&response.raw()[..], b"ok");
    assert_eq!(response.redirect_count(), 1);
    assert_eq!(response.redirects().len(), 2);
    assert!(response.error().is_success());
}

#[test]
fn redirect_without_location_is_an_error() {
    let addr = spawn_server(|listener, _| {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        stream
            .write_all(b"HTTP/1.1 301 Moved Permanently\r\nContent-Length: 0\r\n\r\n")
            .unwrap();
    });

    let service = Service::new().unwrap();
    let mut session = session_for(&service, addr);

    let response = session.get().wait().unwrap();
    assert_eq!(response.error().kind(), ErrorKind::Redirect);
}

#[test]
fn redirect_limit_zero_exhausts_on_first_hop() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        let moved = format!(
            "HTTP/1.1 302 Found\r\nLocation: http://{addr}/next\r\nContent-Length: 0\r\n\r\n"
        );
        stream.write_all(moved.as_bytes()).unwrap();
    });

    let service = Service::new().unwrap();
    let mut session = service.session();
    session.set_option(Opt::Url(format!("http://{addr}/"))).unwrap();
    session.set_option(Opt::RedirectLimit(0)).unwrap();

    let response = session.get().wait().unwrap();
    assert_eq!(response.error().kind(), ErrorKind::RedirectExhausted);
}

#[test]
fn throw_on_error_fails_the_future() {
    let addr = spawn_server(|listener, _| {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        stream
            .write_all(b"HTTP/1.1 301 Moved Permanently\r\nContent-Length: 0\r\n\r\n")
            .unwrap();
    });

    let service = Service::new().unwrap();
    let mut session = session_for(&service, addr);
    session.set_option(Opt::ThrowOnError(true)).unwrap();

    let error = session.get().wait().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Redirect);
}

#[test]
fn keep_alive_reuses_the_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (head_tx, head_rx) = mpsc::channel();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nSet-Cookie: sid=42; Path=/\r\nContent-Length: 0\r\n\r\n")
            .unwrap();

        // second request arrives on the same socket
        let head = read_head(&mut stream);
        head_tx.send(head).unwrap();
        stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").unwrap();
    });

    let service = Service::new().unwrap();
    let mut session = service.session();
    session.set_option(Opt::Url(format!("http://{addr}/"))).unwrap();

    let first = session.get().wait().unwrap();
    assert!(first.error().is_success());
    assert_eq!(first.cookies().get("sid").unwrap().value(), "42");

    let second = session.get().wait().unwrap();
    assert!(second.error().is_success());

    // the reused request carried the collected cookie
    let head = head_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let head = String::from_utf8(head).unwrap();
    assert!(head.contains("cookie: sid=42"), "second request head: {head}");
}

#[test]
fn stale_keep_alive_socket_restarts_once() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        // first exchange completes, then the server drops the socket
        let (mut first, _) = listener.accept().unwrap();
        read_head(&mut first);
        first.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").unwrap();
        drop(first);

        // the restarted second request arrives on a fresh socket
        let (mut second, _) = listener.accept().unwrap();
        read_head(&mut second);
        second.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nok2").unwrap();
    });

    let service = Service::new().unwrap();
    let mut session = service.session();
    session.set_option(Opt::Url(format!("http://{addr}/"))).unwrap();

    let first = session.get().wait().unwrap();
    assert_eq!(&first.raw()[..], b"ok");

    let second = session.get().wait().unwrap();
    assert_eq!(second.status().as_u16(), 200);
    assert_eq!(&second.raw()[..], b"ok2");
    assert!(second.error().is_success());
}

#[test]
fn restart_fires_only_once() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        let (mut first, _) = listener.accept().unwrap();
        read_head(&mut first);
        first.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").unwrap();
        drop(first);

        // the restart's fresh connection is closed without a response
        let (mut second, _) = listener.accept().unwrap();
        read_head(&mut second);
        drop(second);
    });

    let service = Service::new().unwrap();
    let mut session = service.session();
    session.set_option(Opt::Url(format!("http://{addr}/"))).unwrap();

    let first = session.get().wait().unwrap();
    assert!(first.error().is_success());

    let second = session.get().wait().unwrap();
    assert_eq!(second.error().kind(), ErrorKind::ReadStatus);
}

#[test]
fn deadline_times_the_request_out() {
    let addr = spawn_server(|listener, _| {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        // never respond
        thread::sleep(Duration::from_secs(5));
    });

    let service = Service::new().unwrap();
    let mut session = session_for(&service, addr);
    session.set_option(Opt::Timeout(1)).unwrap();

    let started = Instant::now();
    let response = session.get().wait().unwrap();
    assert_eq!(response.error().kind(), ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[test]
fn zero_deadline_times_out_before_io() {
    // a bound listener that never accepts: the connection sits in the
    // backlog and no response ever arrives
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let service = Service::new().unwrap();
    let mut session = service.session();
    session.set_option(Opt::Url(format!("http://{addr}/"))).unwrap();
    session.set_option(Opt::Timeout(0)).unwrap();

    let response = session.get().wait().unwrap();
    assert_eq!(response.error().kind(), ErrorKind::Timeout);
    drop(listener);
}

#[test]
fn body_callback_streams_chunks() {
    let addr = spawn_server(|listener, _| {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        stream
            .write_all(
                b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                  5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
            )
            .unwrap();
    });

    let collected: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let completion: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));

    let chunks = Arc::clone(&collected);
    let end = Arc::clone(&completion);

    let service = Service::new().unwrap();
    let mut session = session_for(&service, addr);
    session
        .set_option(Opt::BodyCallback(Arc::new(move |event| match event {
            BodyEvent::Chunk(bytes) => chunks.lock().unwrap().extend_from_slice(&bytes),
            BodyEvent::End(error) => *end.lock().unwrap() = Some(error),
        })))
        .unwrap();

    let response = session.get().wait().unwrap();

    // the callback consumed the body, the response kept none of it
    assert!(response.raw().is_empty());
    assert_eq!(&collected.lock().unwrap()[..], b"hello world");

    let completion = completion.lock().unwrap().clone().unwrap();
    assert_eq!(completion.kind(), ErrorKind::Success);
}

#[test]
fn truncated_content_length_is_an_error() {
    let addr = spawn_server(|listener, _| {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort").unwrap();
    });

    let service = Service::new().unwrap();
    let mut session = session_for(&service, addr);

    let response = session.get().wait().unwrap();
    assert_eq!(response.error().kind(), ErrorKind::ReadContentLength);
}

#[test]
fn chunked_eof_between_chunks_is_tolerated() {
    let addr = spawn_server(|listener, _| {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        // the zero terminator never arrives, the socket just closes
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n")
            .unwrap();
    });

    let service = Service::new().unwrap();
    let mut session = session_for(&service, addr);

    let response = session.get().wait().unwrap();
    assert_eq!(&response.raw()[..], b"hello");
    assert!(response.error().is_success());
}

#[test]
fn chunked_eof_inside_chunk_is_an_error() {
    let addr = spawn_server(|listener, _| {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nff\r\nhel")
            .unwrap();
    });

    let service = Service::new().unwrap();
    let mut session = session_for(&service, addr);

    let response = session.get().wait().unwrap();
    assert_eq!(response.error().kind(), ErrorKind::ReadChunkData);
}

#[test]
fn final_callback_sees_the_response() {
    let addr = spawn_server(|listener, _| {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").unwrap();
    });

    let seen: Arc<Mutex<Option<u16>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&seen);

    let service = Service::new().unwrap();
    let mut session = session_for(&service, addr);
    session
        .set_option(Opt::FinalCallback(Arc::new(move |response| {
            *slot.lock().unwrap() = Some(response.status().as_u16());
        })))
        .unwrap();

    let response = session.get().wait().unwrap();
    assert!(response.error().is_success());
    assert_eq!(*seen.lock().unwrap(), Some(200));
}

#[test]
fn cached_redirect_chain_is_short_circuited() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (head_tx, head_rx) = mpsc::channel();

    thread::spawn(move || {
        let (mut first, _) = listener.accept().unwrap();
        read_head(&mut first);
        let moved = format!(
            "HTTP/1.1 301 Moved Permanently\r\nLocation: http://{addr}/b\r\nContent-Length: 0\r\n\r\n"
        );
        first.write_all(moved.as_bytes()).unwrap();

        // redirect target; the connection stays open for reuse
        let (mut second, _) = listener.accept().unwrap();
        read_head(&mut second);
        second.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").unwrap();

        // the cached follow-up arrives on the same socket
        let head = read_head(&mut second);
        head_tx.send(head).unwrap();
        second.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nok2").unwrap();
    });

    let service = Service::new().unwrap();
    let mut session = service.session();
    session.set_option(Opt::Url(format!("http://{addr}/a"))).unwrap();
    session.set_option(Opt::CacheRedirects(true)).unwrap();

    let first = session.get().wait().unwrap();
    assert_eq!(&first.raw()[..], b"ok");
    assert_eq!(first.redirect_count(), 1);

    // the session still points at /a; the cached chain rewrites it to /b
    let second = session.get().wait().unwrap();
    assert_eq!(&second.raw()[..], b"ok2");
    assert_eq!(second.redirect_count(), 0);

    let head = head_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(head.starts_with(b"GET /b "), "cached request went to the wrong target");
}

#[test]
fn short_store_timeout_expires_the_connection() {
    let addr = spawn_server(|listener, _| {
        let (mut stream, _) = listener.accept().unwrap();
        read_head(&mut stream);
        stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").unwrap();
    });

    let service = Service::new().unwrap();
    let mut session = session_for(&service, addr);
    session.set_option(Opt::StoreTimeout(0)).unwrap();

    let response = session.get().wait().unwrap();
    assert!(response.error().is_success());

    // the dispose timer runs on the service loop; give it a moment
    let deadline = Instant::now() + Duration::from_secs(5);
    while !session.is_expired() {
        assert!(Instant::now() < deadline, "connection never expired");
        thread::sleep(Duration::from_millis(10));
    }
}
