//! Client side of the token lifecycle: durable token storage and a request
//! interceptor that keeps at most one refresh in flight per session.

mod api_client;
mod error;
mod gate;
mod storage;
mod transport;

pub use api_client::*;
pub use error::ClientError;
pub use gate::*;
pub use storage::*;
pub use transport::*;
