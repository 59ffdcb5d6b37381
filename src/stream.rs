//! Unified plaintext/TLS byte stream.
//!
//! A [`Stream`] starts as a plain TCP connection and is upgraded in place
//! by [`Stream::handshake`] when the request scheme is https. The value is
//! movable so a freshly built connection can adopt the open socket of a
//! previously completed one.

use std::fs::File;
use std::io;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use bytes::BytesMut;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::RootCertStore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::trace;

use crate::protocol::TlsOptions;

/// Reads are capped so a peer that never sends the expected delimiter
/// cannot grow the buffer without bound.
const MAX_READ_BUFFER: usize = 1024 * 1024;

/// A duplex byte stream over TCP, optionally wrapped in TLS.
pub(crate) enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    Closed,
}

impl Stream {
    /// Connects to the first reachable endpoint, trying them in order.
    pub(crate) async fn connect(endpoints: &[SocketAddr]) -> io::Result<Stream> {
        let mut last_error = None;

        for endpoint in endpoints {
            match TcpStream::connect(endpoint).await {
                Ok(tcp) => {
                    trace!(%endpoint, "connected");
                    return Ok(Stream::Plain(tcp));
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no endpoints")))
    }

    /// Upgrades a plaintext stream to TLS. Already upgraded (or closed)
    /// streams pass through unchanged, which makes the call a no-op for
    /// plain http exchanges.
    pub(crate) async fn handshake(self, host: &str, options: &TlsOptions) -> io::Result<Stream> {
        let tcp = match self {
            Stream::Plain(tcp) => tcp,
            other => return Ok(other),
        };

        let config = client_config(options)?;
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid server name"))?;

        let tls = connector.connect(server_name, tcp).await?;
        trace!(host, "tls handshake complete");
        Ok(Stream::Tls(Box::new(tls)))
    }

    /// Drains `src` into the stream and flushes it.
    pub(crate) async fn write_all(&mut self, src: &mut BytesMut) -> io::Result<()> {
        match self {
            Stream::Plain(tcp) => {
                tcp.write_all_buf(src).await?;
                tcp.flush().await
            }
            Stream::Tls(tls) => {
                tls.write_all_buf(src).await?;
                tls.flush().await
            }
            Stream::Closed => Err(not_connected()),
        }
    }

    /// Appends bytes to `buf` until `delimiter` is present in it. Returns
    /// false when the peer closed the stream before the delimiter arrived;
    /// the delimiter itself stays in the buffer.
    pub(crate) async fn read_until(
        &mut self,
        buf: &mut BytesMut,
        delimiter: &[u8],
    ) -> io::Result<bool> {
        loop {
            if contains(buf, delimiter) {
                return Ok(true);
            }
            if buf.len() > MAX_READ_BUFFER {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "read buffer limit exceeded"));
            }
            if self.read_some(buf).await? == 0 {
                return Ok(false);
            }
        }
    }

    /// Appends at least `n` freshly read bytes to `buf`, or fewer when the
    /// peer closes first. Returns the number of bytes actually read.
    pub(crate) async fn read_at_least(&mut self, buf: &mut BytesMut, n: usize) -> io::Result<usize> {
        let mut read = 0;
        while read < n {
            let got = self.read_some(buf).await?;
            if got == 0 {
                break;
            }
            read += got;
        }
        Ok(read)
    }

    /// Returns true while the stream has an underlying socket.
    pub(crate) fn is_open(&self) -> bool {
        !matches!(self, Stream::Closed)
    }

    /// Shuts the stream down and leaves it closed.
    pub(crate) async fn close(&mut self) {
        match std::mem::replace(self, Stream::Closed) {
            Stream::Plain(mut tcp) => {
                let _ = tcp.shutdown().await;
            }
            Stream::Tls(mut tls) => {
                let _ = tls.shutdown().await;
            }
            Stream::Closed => {}
        }
    }

    /// One read into `buf`. A clean EOF and a TLS truncation both report
    /// as zero bytes so callers see a single end-of-stream signal.
    async fn read_some(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        let result = match self {
            Stream::Plain(tcp) => tcp.read_buf(buf).await,
            Stream::Tls(tls) => tls.read_buf(buf).await,
            Stream::Closed => Err(not_connected()),
        };

        match result {
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(0),
            other => other,
        }
    }
}

/// The error union that marks a reused keep-alive socket as stale: the peer
/// is gone, even though the stream still looked open when it was adopted.
pub(crate) fn is_socket_closed(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream is closed")
}

fn contains(buf: &[u8], delimiter: &[u8]) -> bool {
    buf.windows(delimiter.len()).any(|window| window == delimiter)
}

fn client_config(options: &TlsOptions) -> io::Result<rustls::ClientConfig> {
    let mut roots = RootCertStore::empty();

    if let Some(file) = options.verify_file() {
        let certs = read_pem_certs(file)?;
        roots.add_parsable_certificates(certs);
    } else if let Some(dir) = options.verify_path() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                if let Ok(certs) = read_pem_certs(&path) {
                    roots.add_parsable_certificates(certs);
                }
            }
        }
    } else {
        let native = rustls_native_certs::load_native_certs();
        roots.add_parsable_certificates(native.certs);
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);

    let mut config = match (options.certificate_file(), options.private_key_file()) {
        (Some(cert_path), Some(key_path)) => {
            let certs = read_pem_certs(cert_path)?;
            let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "no private key in key file")
                })?;
            builder.with_client_auth_cert(certs, key).map_err(io::Error::other)?
        }
        _ => builder.with_no_client_auth(),
    };

    if !options.verify_peer() {
        config.dangerous().set_certificate_verifier(Arc::new(danger::NoVerify));
    }

    Ok(config)
}

fn read_pem_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::certs(&mut reader).collect()
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    /// Accepts any server certificate. Installed only when peer
    /// verification has been switched off for the request.
    #[derive(Debug)]
    pub(super) struct NoVerify;

    impl ServerCertVerifier for NoVerify {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::ECDSA_NISTP521_SHA512,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ED25519,
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_closed_classification() {
        for kind in [
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::BrokenPipe,
        ] {
            assert!(is_socket_closed(&io::Error::new(kind, "x")), "{kind:?}");
        }
        assert!(!is_socket_closed(&io::Error::new(io::ErrorKind::TimedOut, "x")));
        assert!(!is_socket_closed(&io::Error::new(io::ErrorKind::InvalidData, "x")));
    }

    #[test]
    fn delimiter_search() {
        assert!(contains(b"abc\r\ndef", b"\r\n"));
        assert!(!contains(b"abc\rdef", b"\r\n"));
        assert!(contains(b"head\r\n\r\nbody", b"\r\n\r\n"));
    }
}
