//! Framed message passing between a tool process and a player process.
//! Blocking, single-threaded transport with re-entrant synchronous calls.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod param;
pub mod registry;
pub mod transport;
pub mod wire;

#[cfg(test)]
pub(crate) mod testing;

pub use config::WireConfig;
pub use endpoint::{current_endpoint, Context, CurrentEndpoint, Dispatched, Endpoint};
pub use error::{DecodeError, Direction, ProtocolError};
pub use message::{Handle, Message, MessageName, ID_NAME, MAX_NAME_LEN, REPLY_NAME};
pub use param::{Blob, Decode, Encode, ParamReader, StrArray, Transform, Vec3};
pub use registry::{symbol_for, Factory, HandlerResult, Loader, Registry, Role, SendMode, WireFunc};
pub use transport::{CancelToken, Dispatch, SyncOptions, Transport, TransportState};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError, HEADER_LEN, MAX_FRAME_LEN};
