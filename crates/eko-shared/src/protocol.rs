//! Packet types and payload bodies.
//!
//! The 6-bit type tag of every packet selects one body type below. The tag
//! values are declared once, in the `packets!` invocation, and both the
//! [`PacketType`] enum and the [`Payload`] enum are generated from it.

use serde::{Deserialize, Serialize};

use crate::codec::{self, Encoding};
use crate::error::CodecError;
use crate::id::Id;
use crate::types::{
    Destination, Frequency, FrequencyPerms, Member, Message, Network, TrustEntry, User,
};

macro_rules! packets {
    ($( $(#[$doc:meta])* $name:ident($body:ty) = $tag:literal, $dir:ident; )*) => {
        /// Closed set of packet type tags.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum PacketType {
            $( $(#[$doc])* $name = $tag, )*
        }

        impl PacketType {
            pub fn from_tag(tag: u8) -> Option<Self> {
                match tag {
                    $( $tag => Some(Self::$name), )*
                    _ => None,
                }
            }

            pub fn tag(self) -> u8 {
                self as u8
            }

            /// Client-to-server packet types. Everything else is server-sent.
            pub fn is_request(self) -> bool {
                match self {
                    $( Self::$name => packets!(@request $dir), )*
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$name => stringify!($name), )*
                }
            }
        }

        /// A decoded packet body; the variant carries the type tag.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Payload {
            $( $name($body), )*
        }

        impl Payload {
            pub fn kind(&self) -> PacketType {
                match self {
                    $( Self::$name(_) => PacketType::$name, )*
                }
            }

            pub fn encode(&self, encoding: Encoding) -> Result<Vec<u8>, CodecError> {
                match self {
                    $( Self::$name(body) => codec::encode(encoding, body), )*
                }
            }

            pub fn decode(
                kind: PacketType,
                encoding: Encoding,
                bytes: &[u8],
            ) -> Result<Self, CodecError> {
                match kind {
                    $( PacketType::$name => Ok(Self::$name(codec::decode(encoding, bytes)?)), )*
                }
            }
        }

        $(
            impl From<$body> for Payload {
                fn from(body: $body) -> Self {
                    Self::$name(body)
                }
            }
        )*
    };
    (@request push) => { false };
    (@request request) => { true };
}

packets! {
    /// Error or success (code 0) reply to a request.
    Error(ErrorInfo) = 0, push;
    UserProfileInfo(UserProfileInfo) = 1, push;
    NetworksInfo(NetworksInfo) = 2, push;
    FrequenciesInfo(FrequenciesInfo) = 3, push;
    MembersInfo(MembersInfo) = 4, push;
    MessagesInfo(MessagesInfo) = 5, push;
    TrustInfo(TrustInfo) = 6, push;
    BlocksInfo(BlocksInfo) = 7, push;

    CreateNetwork(CreateNetwork) = 16, request;
    UpdateNetwork(UpdateNetwork) = 17, request;
    TransferNetwork(TransferNetwork) = 18, request;
    DeleteNetwork(DeleteNetwork) = 19, request;
    SetNetworkUser(SetNetworkUser) = 20, request;
    GetBannedMembers(GetBannedMembers) = 21, request;
    GetMembers(GetMembers) = 22, request;

    CreateFrequency(CreateFrequency) = 24, request;
    UpdateFrequency(UpdateFrequency) = 25, request;
    DeleteFrequency(DeleteFrequency) = 26, request;
    SwapFrequencies(SwapFrequencies) = 27, request;

    SendMessage(SendMessage) = 32, request;
    EditMessage(EditMessage) = 33, request;
    DeleteMessage(DeleteMessage) = 34, request;
    RequestMessages(RequestMessages) = 35, request;

    SetUserData(SetUserData) = 40, request;
    GetUserData(GetUserData) = 41, request;
    TrustUser(TrustUser) = 42, request;
    BlockUser(BlockUser) = 43, request;
    GetTrustedUsers(GetTrustedUsers) = 44, request;
    GetBlockedUsers(GetBlockedUsers) = 45, request;
    DeleteUser(DeleteUser) = 46, request;
}

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum ErrorCode {
    Ok,
    ProtocolViolation,
    AuthFailure,
    Unauthorized,
    NotFound,
    Conflict,
    Validation,
    RateLimited,
    Timeout,
    Internal,
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> u16 {
        match code {
            ErrorCode::Ok => 0,
            ErrorCode::ProtocolViolation => 1,
            ErrorCode::AuthFailure => 2,
            ErrorCode::Unauthorized => 3,
            ErrorCode::NotFound => 4,
            ErrorCode::Conflict => 5,
            ErrorCode::Validation => 6,
            ErrorCode::RateLimited => 7,
            ErrorCode::Timeout => 8,
            ErrorCode::Internal => 9,
        }
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Ok,
            1 => Self::ProtocolViolation,
            2 => Self::AuthFailure,
            3 => Self::Unauthorized,
            4 => Self::NotFound,
            5 => Self::Conflict,
            6 => Self::Validation,
            7 => Self::RateLimited,
            8 => Self::Timeout,
            9 => Self::Internal,
            other => return Err(format!("unknown error code {other}")),
        })
    }
}

// ---------------------------------------------------------------------------
// Server-sent bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn ok() -> Self {
        Self {
            code: ErrorCode::Ok,
            message: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == ErrorCode::Ok
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfileInfo {
    pub users: Vec<User>,
}

/// `set = true` replaces the client's whole network list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NetworksInfo {
    pub networks: Vec<Network>,
    #[serde(default)]
    pub removed: Vec<Id>,
    #[serde(default)]
    pub set: bool,
}

/// Always the complete, position-ordered frequency list of one network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrequenciesInfo {
    pub network_id: Id,
    pub frequencies: Vec<Frequency>,
    #[serde(default)]
    pub removed: Vec<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MembersInfo {
    pub network_id: Id,
    pub members: Vec<Member>,
    #[serde(default)]
    pub removed: Vec<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagesInfo {
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrustInfo {
    pub entries: Vec<TrustEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlocksInfo {
    pub blocked: Vec<Id>,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateNetwork {
    pub name: String,
    pub icon: String,
    pub bg_hex: String,
    pub fg_hex: String,
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateNetwork {
    pub network_id: Id,
    pub name: String,
    pub icon: String,
    pub bg_hex: String,
    pub fg_hex: String,
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferNetwork {
    pub network_id: Id,
    pub user_id: Id,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteNetwork {
    pub network_id: Id,
}

/// Each `Some` field is a requested change; `None` leaves it as is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SetNetworkUser {
    pub network_id: Id,
    pub user_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ban_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetBannedMembers {
    pub network_id: Id,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetMembers {
    pub network_id: Id,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateFrequency {
    pub network_id: Id,
    pub name: String,
    pub hex_color: String,
    pub perms: FrequencyPerms,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateFrequency {
    pub frequency_id: Id,
    pub name: String,
    pub hex_color: String,
    pub perms: FrequencyPerms,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteFrequency {
    pub frequency_id: Id,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SwapFrequencies {
    pub network_id: Id,
    pub pos1: u32,
    pub pos2: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendMessage {
    pub destination: Destination,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditMessage {
    pub message_id: Id,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteMessage {
    pub message_id: Id,
}

/// History page: up to `limit` messages older than `before` (newest when
/// absent), answered in ascending id order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestMessages {
    pub destination: Destination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SetUserData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public_dm: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetUserData {
    pub user_ids: Vec<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrustUser {
    pub user_id: Id,
    pub trust: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockUser {
    pub user_id: Id,
    pub block: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GetTrustedUsers {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GetBlockedUsers {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DeleteUser {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags_fit_six_bits() {
        for tag in 0..=u8::MAX {
            if let Some(kind) = PacketType::from_tag(tag) {
                assert!(tag < 64, "{} uses tag {tag}", kind.name());
                assert_eq!(kind.tag(), tag);
            }
        }
    }

    #[test]
    fn test_request_direction() {
        assert!(PacketType::SendMessage.is_request());
        assert!(PacketType::DeleteUser.is_request());
        assert!(!PacketType::Error.is_request());
        assert!(!PacketType::MessagesInfo.is_request());
    }

    #[test]
    fn test_error_code_is_numeric() {
        let info = ErrorInfo {
            code: ErrorCode::Conflict,
            message: "nope".into(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["code"], 5);
        assert!(ErrorCode::try_from(42).is_err());
    }

    #[test]
    fn test_payload_roundtrip_both_encodings() {
        let payloads: Vec<Payload> = vec![
            SendMessage {
                destination: Destination::Channel(Id(99)),
                content: "hello".into(),
            }
            .into(),
            SetNetworkUser {
                network_id: Id(1),
                user_id: Id(2),
                banned: Some(true),
                ban_reason: Some("spam".into()),
                ..Default::default()
            }
            .into(),
            GetTrustedUsers {}.into(),
            ErrorInfo::ok().into(),
        ];

        for payload in payloads {
            for encoding in [Encoding::Json, Encoding::MsgPack] {
                let bytes = payload.encode(encoding).unwrap();
                let back = Payload::decode(payload.kind(), encoding, &bytes).unwrap();
                assert_eq!(back, payload);
            }
        }
    }

    #[test]
    fn test_set_network_user_omits_unchanged_fields() {
        let body = SetNetworkUser {
            network_id: Id(1),
            user_id: Id(2),
            member: Some(true),
            ..Default::default()
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"network_id":1,"user_id":2,"member":true}"#);

        let bare: SetNetworkUser = serde_json::from_str(r#"{"network_id":1,"user_id":2}"#).unwrap();
        assert_eq!(
            bare,
            SetNetworkUser {
                network_id: Id(1),
                user_id: Id(2),
                ..SetNetworkUser::default()
            }
        );
        assert_eq!(SetNetworkUser::default().user_id, Id(0));
    }

    #[test]
    fn test_decode_with_wrong_body_fails() {
        let bytes = br#"{"unrelated":true}"#;
        assert!(Payload::decode(PacketType::SendMessage, Encoding::Json, bytes).is_err());
    }
}
