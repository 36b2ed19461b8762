//! The DIS (Data-is-Strings) wire codec: a self-describing, length-prefixed
//! ASCII encoding for integers, strings and floating point values, with
//! commit-or-rewind semantics on every read so a caller can retry an
//! alternate decoding after a failed one.

mod cursor;
mod reader;
mod writer;

pub use cursor::DisCursor;
pub use reader::{read_double, read_int, read_long_double, read_string, read_string_fixed, read_uint};
pub use writer::{write_double, write_int, write_long_double, write_string, write_uint};
