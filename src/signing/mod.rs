pub mod hmac;

pub use hmac::{InstructionSigner, QuerySigner};
