//! Email parsing: header decoding, part classification and the MIME walk.

pub mod header;
pub mod message;
pub mod part;
