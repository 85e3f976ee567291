//! C1 — the ES256 JWT authentication token provider shared by every
//! connection on a client.

mod token;

pub use token::TokenProvider;
