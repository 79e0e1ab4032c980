// Node identity and signatures

mod identity;

pub use identity::{Identity, verify_signature};
