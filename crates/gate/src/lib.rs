//! # gate
//!
//! The request-facing half of the proxy: an HTTP listener that resolves each
//! inbound `(host, path)` against the rule table, runs the cookie-borne
//! token through the admission gates, and only then forwards the request
//! to the configured upstream, either as a plain HTTP forward or as a raw
//! WebSocket splice.
//!
//! Every denial records a ban event before the `500` goes out; admission
//! success never bans.

mod admission;
mod cookie;
mod forward;
mod remote;
mod server;

pub use admission::{authorize, Denial};
pub use cookie::{parse_netclave_cookies, TokenCookie};
pub use forward::Forwarder;
pub use remote::remote_address;
pub use server::{Gate, GateState};
