//! Ed25519 challenge/response handshake.
//!
//! ```text
//! server → client   01 || nonce(32)
//! client → server   01 || public_key(32) || signature(nonce)(64)
//! ```
//!
//! The handshake runs on the raw stream before any framing. The caller
//! bounds it with the auth deadline.

use std::io::ErrorKind;
use std::time::{Duration, Instant};

use eko_shared::constants::{AUTH_REPLY_SIZE, CHALLENGE_SIZE, NONCE_SIZE};
use eko_shared::identity::{encode_challenge, generate_nonce};
use eko_shared::{AuthReply, IdentityError, User};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::ServerError;
use crate::store::Store;

/// A nonce and when it was handed out.
#[derive(Debug, Clone)]
pub struct Challenge {
    nonce: [u8; NONCE_SIZE],
    issued_at: Instant,
}

impl Challenge {
    pub fn issue() -> Self {
        Self {
            nonce: generate_nonce(),
            issued_at: Instant::now(),
        }
    }

    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    pub fn is_stale(&self, lifetime: Duration) -> bool {
        self.issued_at.elapsed() > lifetime
    }

    pub fn to_bytes(&self) -> [u8; CHALLENGE_SIZE] {
        encode_challenge(&self.nonce)
    }
}

/// Run the handshake on `stream` and resolve the user behind the key,
/// creating the account on first contact.
pub async fn authenticate<S>(
    stream: &mut S,
    store: &Store,
    nonce_lifetime: Duration,
) -> Result<User, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut challenge = Challenge::issue();
    send_challenge(stream, &challenge).await?;

    let mut raw = [0u8; AUTH_REPLY_SIZE];
    loop {
        stream.read_exact(&mut raw).await.map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => {
                ServerError::AuthFailure("connection closed during handshake".into())
            }
            _ => ServerError::Io(e),
        })?;
        if !challenge.is_stale(nonce_lifetime) {
            break;
        }
        // A signature over an expired nonce is never checked.
        debug!("Nonce expired before reply, reissuing");
        challenge = Challenge::issue();
        send_challenge(stream, &challenge).await?;
    }

    let reply = AuthReply::parse(&raw).map_err(|e| ServerError::AuthFailure(e.to_string()))?;
    reply.verify(challenge.nonce()).map_err(|e| match e {
        IdentityError::InvalidKeyBytes => ServerError::AuthFailure("invalid public key".into()),
        _ => ServerError::AuthFailure("bad signature".into()),
    })?;

    let public_key = reply.public_key;
    let candidate_id = store.next_id();
    store
        .transact(move |tx| {
            let user = match tx.find_user_by_key(&public_key)? {
                Some(user) => user,
                None => {
                    let user = User {
                        id: candidate_id,
                        name: format!("user-{}", hex::encode(&public_key[..4])),
                        description: String::new(),
                        public_key,
                        is_public_dm: true,
                        is_deleted: false,
                    };
                    tx.insert_user(&user)?;
                    info!(user_id = %user.id, key = %user.short_key(), "Created account");
                    user
                }
            };

            let status = tx.account_status(user.id)?;
            if status.is_banned {
                return Err(ServerError::AuthFailure("account is banned".into()));
            }
            if status.is_deleted {
                return Err(ServerError::AuthFailure("account was deleted".into()));
            }
            Ok(user)
        })
        .await
}

async fn send_challenge<S>(stream: &mut S, challenge: &Challenge) -> Result<(), ServerError>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&challenge.to_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
