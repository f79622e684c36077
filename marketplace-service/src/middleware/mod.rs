pub mod auth;

pub use auth::{
    auth_middleware, AccessTokenClaims, AuthUser, CurrentUser, JwtVerifier, RedisBlacklist,
    TokenBlacklist,
};
