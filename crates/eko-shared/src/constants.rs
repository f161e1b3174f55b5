/// Wire protocol version carried in byte 0 of every packet and handshake message
pub const PROTOCOL_VERSION: u8 = 1;

/// Application name
pub const APP_NAME: &str = "Eko";

/// Default TLS port for the packet protocol
pub const DEFAULT_PORT: u16 = 7223;

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Ed25519 signature size in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Authentication nonce size in bytes
pub const NONCE_SIZE: usize = 32;

/// Server challenge: version || nonce
pub const CHALLENGE_SIZE: usize = 1 + NONCE_SIZE;

/// Client reply: version || public key || signature
pub const AUTH_REPLY_SIZE: usize = 1 + PUBKEY_SIZE + SIGNATURE_SIZE;

/// A nonce older than this is reissued; signatures over it are rejected
pub const NONCE_LIFETIME_SECS: u64 = 60;

/// Fixed packet header: version, encoding/type, u16 length
pub const HEADER_SIZE: usize = 4;

/// Maximum packet size, header included
pub const MAX_PACKET_SIZE: usize = 65_535;

/// Maximum payload size
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

// Field limits, in bytes

pub const MAX_NAME_BYTES: usize = 32;
pub const MAX_DESCRIPTION_BYTES: usize = 200;
pub const MAX_ICON_BYTES: usize = 16;
pub const MAX_BAN_REASON_BYTES: usize = 64;
pub const MAX_CONTENT_BYTES: usize = 2000;

/// Maximum number of frequencies in one network
pub const MAX_FREQUENCIES: usize = 64;

/// Default and maximum page size for message history
pub const DEFAULT_PAGE_SIZE: u16 = 50;
pub const MAX_PAGE_SIZE: u16 = 100;

/// Name of the frequency created with every network
pub const DEFAULT_FREQUENCY_NAME: &str = "main";

/// Name shown for tombstoned accounts
pub const DELETED_USER_NAME: &str = "Deleted User";
