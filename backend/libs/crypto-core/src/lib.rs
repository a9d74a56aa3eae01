//! Token primitives shared by chat services.

pub mod jwt;

pub use jwt::{bearer_token, Claims, JwtError, JwtIssuer, JwtValidator};
