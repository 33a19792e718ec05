mod auth_service_impl;
mod clock;
mod jwt_codec;
mod password_hasher;
mod refresh_minter;

pub use auth_service_impl::*;
pub use clock::*;
pub use jwt_codec::*;
pub use password_hasher::*;
pub use refresh_minter::*;
