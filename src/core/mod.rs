// Core modules implementing the wire codec, batch normalization, result decoding and errors.
pub mod bitmap;
pub mod codec;
pub mod cursor;
pub mod decode;
pub mod error;
pub mod normalize;
pub mod types;
