//! The script interpreter (spec §4.1): a stateless evaluator over a stack
//! of byte-strings, configured by a flag set, with P2SH and witness v0
//! semantics layered on top of the base opcode machine.

pub mod error;
pub mod flags;
pub mod interpreter;
pub mod num;
pub mod sighash;

pub use error::ScriptError;
pub use flags::ScriptFlags;
pub use interpreter::{execute, verify, SignatureChecker, TransactionSignatureChecker};
pub use num::ScriptNum;
pub use sighash::{signature_hash, SignatureVersion};
