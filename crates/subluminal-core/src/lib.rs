mod canonical;
mod redact;

pub use canonical::{args_hash, canonicalize, hash_bytes, hash_reader};
pub use redact::{REDACTED, Redactor};
