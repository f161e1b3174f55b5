//! Payload body encodings, selected by the 2-bit encoding tag.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::constants::MAX_PAYLOAD_SIZE;
use crate::error::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Encoding {
    #[default]
    Json = 0,
    MsgPack = 1,
}

impl Encoding {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Json),
            1 => Some(Self::MsgPack),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Encode a body. Structs are written as named maps in both encodings so
/// optional fields can be omitted by either side.
pub fn encode<T: Serialize>(encoding: Encoding, value: &T) -> Result<Vec<u8>, CodecError> {
    let bytes = match encoding {
        Encoding::Json => serde_json::to_vec(value)?,
        Encoding::MsgPack => rmp_serde::to_vec_named(value)?,
    };
    if bytes.len() > MAX_PAYLOAD_SIZE {
        return Err(CodecError::TooLarge(bytes.len()));
    }
    Ok(bytes)
}

pub fn decode<T: DeserializeOwned>(encoding: Encoding, bytes: &[u8]) -> Result<T, CodecError> {
    match encoding {
        Encoding::Json => Ok(serde_json::from_slice(bytes)?),
        Encoding::MsgPack => Ok(rmp_serde::from_slice(bytes)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Body {
        name: String,
        #[serde(default)]
        flag: Option<bool>,
    }

    #[test]
    fn test_tags() {
        assert_eq!(Encoding::from_tag(0), Some(Encoding::Json));
        assert_eq!(Encoding::from_tag(1), Some(Encoding::MsgPack));
        assert_eq!(Encoding::from_tag(2), None);
        assert_eq!(Encoding::MsgPack.tag(), 1);
    }

    #[test]
    fn test_both_encodings_roundtrip() {
        let body = Body {
            name: "eko".into(),
            flag: Some(true),
        };
        for encoding in [Encoding::Json, Encoding::MsgPack] {
            let bytes = encode(encoding, &body).unwrap();
            let back: Body = decode(encoding, &bytes).unwrap();
            assert_eq!(back, body);
        }
    }

    #[test]
    fn test_missing_optional_field() {
        let back: Body = decode(Encoding::Json, br#"{"name":"x"}"#).unwrap();
        assert_eq!(back.flag, None);
    }

    #[test]
    fn test_oversized_body_rejected() {
        let body = Body {
            name: "x".repeat(MAX_PAYLOAD_SIZE),
            flag: None,
        };
        assert!(matches!(
            encode(Encoding::Json, &body),
            Err(CodecError::TooLarge(_))
        ));
    }
}
