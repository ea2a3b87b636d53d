//! Streaming handles: [`reader::ObjectReader`] for ranged reads and
//! [`writer::ObjectWriter`] for buffered multipart writes.

pub mod reader;
pub mod writer;
