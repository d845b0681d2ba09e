pub mod verify;

pub use verify::{bearer_token, AuthContext, Claims, JwtVerifier};
