//! # envelope-codec
//!
//! Cryptographic plumbing shared by every conversation the proxy has with a
//! remote peer: RSA key handling and the signed (optionally encrypted) JSON
//! envelope that wraps each payload on the wire.
//!
//! The envelope contract is symmetric: both sides sign with their own
//! private key and, when confidentiality is required, encrypt to the other
//! side's public key. Payloads are opaque bytes to this crate; callers JSON-
//! encode structured data before sealing.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use envelope_codec::{generate_keypair, seal};
//!
//! let (public_pem, private_pem) = generate_keypair().unwrap();
//! let wire = seal(b"\"hello\"", "my-id", &private_pem, None).unwrap();
//! println!("{wire}");
//! ```

mod envelope;
mod error;
mod keys;

pub use envelope::{open, open_self_certified, seal, Envelope, KeyDirectory};
pub use error::CodecError;
pub use keys::{generate_keypair, sign, verify};
