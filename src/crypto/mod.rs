//! At-rest encryption for stored credentials and signing of OAuth state.

mod engine;

pub use engine::{CryptoEngine, CryptoError};
