mod error;
mod handler;
mod router;

pub use error::{ApiError, ApiErrorCode, ErrorResponse, recover_error};
pub use handler::{MessageResponse, TokenResponse};
pub use router::{AUTH_HEADER, routes};
