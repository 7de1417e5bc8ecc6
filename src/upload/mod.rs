//! Chunked upload protocol
//!
//! A per-file upload session accepts an ordered stream of byte chunks over
//! independent requests, enforces size and ordering limits, incrementally
//! verifies integrity via a chained hash, recovers abandoned sessions
//! through an inactivity watchdog, and finalizes by reconciling the
//! assembled file's hash against a client-supplied value.
//!
//! Modules:
//! - `types`: upload key and error taxonomy
//! - `validate`: pure request checks (serial, filename, size ceilings)
//! - `session`: the session state machine, registry, and timeout supervisor
//! - `hash_chain`: the hash-chain finalizer

pub mod hash_chain;
pub mod session;
pub mod types;
pub mod validate;

pub use session::{SessionHandle, SessionRegistry, UploadSession};
pub use types::{UploadError, UploadKey, SERIAL_LEN};
