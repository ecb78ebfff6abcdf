//! Batch operations
//!
//! Several composed requests can be sent in one `$batch` call and their
//! responses split back out, in submission order.

pub mod batch;
pub mod batch_response;

pub use batch::{BatchEnvelope, convert_to_batch, convert_to_batch_with};
pub use batch_response::parse_batch_response;
