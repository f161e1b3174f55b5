//! # eko-shared
//!
//! Types and wire formats shared by the Eko server and its clients: ids,
//! entities, packet catalog, framer, payload codec, handshake messages and
//! field validation.

pub mod codec;
pub mod constants;
pub mod error;
pub mod frame;
pub mod id;
pub mod identity;
pub mod protocol;
pub mod types;
pub mod validation;

pub use codec::Encoding;
pub use error::{CodecError, EkoError, FrameError, IdentityError, ValidationError};
pub use frame::{Framer, Packet};
pub use id::{Id, IdGenerator};
pub use identity::{AuthReply, Identity};
pub use protocol::{ErrorCode, ErrorInfo, PacketType, Payload};
pub use types::*;
