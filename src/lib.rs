//! An asynchronous HTTP/1.1 client built around sessions.
//!
//! A [`Service`] owns the event loop; a [`Session`] accumulates request
//! options and produces one future per request. Connections handle
//! redirects, per-request deadlines, cookie collection and keep-alive
//! socket reuse (with a one-shot restart when a reused socket turns out
//! to be stale).
//!
//! ```no_run
//! use arequests::{Opt, Service};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = Service::new()?;
//! let mut session = service.session();
//! session.set_option(Opt::Url("http://example.com/".into()))?;
//!
//! let response = session.get().wait()?;
//! println!("{} ({} bytes)", response.status(), response.raw().len());
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod protocol;
pub mod session;
pub mod service;

mod stream;

pub use protocol::{Auth, BodyEvent, Cookie, CookieJar, Error, ErrorKind, Request, Response};
pub use service::Service;
pub use session::{Opt, OptionError, ResponseFuture, Session};

pub(crate) use help::ensure;

mod help {

    macro_rules! ensure {
        ($predicate:expr, $error:expr) => {
            if !$predicate {
                return Err($error);
            }
        };
    }
    pub(crate) use ensure;
}
