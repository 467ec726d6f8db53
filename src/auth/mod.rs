//! Authentication and authorization for GrainHero
//!
//! Provides:
//! - JWT token generation and validation
//! - Role ordering for operation authorization
//! - Password hashing with Argon2
//! - Request authentication against stored users

pub mod guard;
pub mod jwt;
pub mod password;
pub mod permissions;

pub use guard::{authenticate, authenticate_token, AuthContext};
pub use jwt::{
    extract_token_from_header, extract_token_from_query, Claims, JwtValidator, TokenInput,
};
pub use password::{check_password_policy, hash_password, verify_password};
pub use permissions::Role;
