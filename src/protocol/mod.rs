mod message;
pub use message::PayloadItem;

mod auth;
pub use auth::Auth;
pub use auth::InvalidAuth;

mod cookie;
pub use cookie::Cookie;
pub use cookie::CookieJar;

mod error;
pub use error::Error;
pub use error::ErrorKind;
pub use error::ParseError;

mod redirects;
pub use redirects::Redirects;

mod request;
pub use request::BodyCallback;
pub use request::BodyEvent;
pub use request::FinalCallback;
pub use request::Request;
pub use request::TlsOptions;

mod response;
pub use response::Response;
