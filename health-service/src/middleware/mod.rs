pub mod auth;

pub use auth::{auth_middleware, portal_auth_middleware, AuthPartner, AuthUser};
