//! C2 (connection factory) and C3 (stream multiplexer), wired together.

mod factory;
mod handler;
mod stream;

pub(crate) use factory::ConnectionFactory;
pub(crate) use handler::ConnectionHandle;
pub use stream::{RawResponse, RequestSpec};
