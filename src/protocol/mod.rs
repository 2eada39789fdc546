//! C1 Frame Codec: the binary framing protocol (spec §4.1, §6).

pub mod codec;
pub mod frame;
pub mod methods;

pub use codec::{decode, decode_batch_payload, encode, encode_batch_payload, CodecConfig};
pub use frame::{Frame, FrameFlags, FrameType, Method, HEADER_LEN, MAGIC, PROTOCOL_VERSION};
