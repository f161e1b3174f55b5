//! Per-packet request processing: decode, rate limit, route to a handler
//! under the soft deadline, and turn the result into the direct reply.

use std::time::Instant;

use eko_shared::{ErrorCode, Packet, PacketType, Payload};
use tracing::{debug, warn};

use crate::error::ServerError;
use crate::handlers;
use crate::metrics;
use crate::server::ServerState;
use crate::session::Session;

/// What the reader loop does after one request.
#[derive(Debug)]
pub struct Outcome {
    pub response: Payload,
    /// Close the connection once `response` is queued.
    pub close: bool,
}

impl Outcome {
    fn error(err: &ServerError) -> Self {
        Self {
            response: err.to_error_info().into(),
            close: err.is_fatal(),
        }
    }
}

/// Requests that change state draw from the per-user bucket; reads are free.
fn is_rate_limited(kind: PacketType) -> bool {
    !matches!(
        kind,
        PacketType::GetBannedMembers
            | PacketType::GetMembers
            | PacketType::RequestMessages
            | PacketType::GetUserData
            | PacketType::GetTrustedUsers
            | PacketType::GetBlockedUsers
    )
}

fn code_label(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::Ok => "ok",
        ErrorCode::ProtocolViolation => "protocol_violation",
        ErrorCode::AuthFailure => "auth_failure",
        ErrorCode::Unauthorized => "unauthorized",
        ErrorCode::NotFound => "not_found",
        ErrorCode::Conflict => "conflict",
        ErrorCode::Validation => "validation",
        ErrorCode::RateLimited => "rate_limited",
        ErrorCode::Timeout => "timeout",
        ErrorCode::Internal => "internal",
    }
}

pub async fn dispatch(state: &ServerState, session: &Session, packet: Packet) -> Outcome {
    let kind = packet.kind;
    session.set_encoding(packet.encoding);

    let outcome = process(state, session, packet).await;
    let code = match &outcome.response {
        Payload::Error(info) => info.code,
        _ => ErrorCode::Ok,
    };
    metrics::counters::requests_total(kind.name(), code_label(code));
    outcome
}

async fn process(state: &ServerState, session: &Session, packet: Packet) -> Outcome {
    let kind = packet.kind;
    if !kind.is_request() {
        return Outcome::error(&ServerError::Validation(format!(
            "{} is not a request",
            kind.name()
        )));
    }

    let payload = match packet.decode() {
        Ok(payload) => payload,
        Err(e) => {
            debug!(conn_id = session.conn_id, kind = kind.name(), error = %e, "Undecodable body");
            return Outcome::error(&ServerError::Validation(format!(
                "malformed {} body",
                kind.name()
            )));
        }
    };

    if is_rate_limited(kind) {
        if !state.request_limiter.check(&session.user_id).await {
            metrics::counters::rate_limited_total("request");
            let strikes = session.record_strike();
            let close = strikes >= state.config.rate_limit_strikes;
            if close {
                warn!(
                    conn_id = session.conn_id,
                    user_id = %session.user_id,
                    strikes,
                    "Closing connection after repeated rate limiting"
                );
            }
            return Outcome {
                close,
                ..Outcome::error(&ServerError::RateLimited)
            };
        }
        session.reset_strikes();
    }

    let started = Instant::now();
    let result = tokio::time::timeout(
        state.config.handler_timeout,
        handlers::handle(state, session, payload),
    )
    .await
    .unwrap_or(Err(ServerError::Timeout));
    metrics::histograms::handler_latency_seconds(kind.name(), started.elapsed().as_secs_f64());

    match result {
        Ok(response) => Outcome {
            response,
            close: false,
        },
        Err(err) => {
            debug!(conn_id = session.conn_id, kind = kind.name(), error = %err, "Request failed");
            Outcome::error(&err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::session::test_session;
    use crate::store::Store;
    use bytes::Bytes;
    use eko_shared::protocol::{BlockUser, GetUserData, NetworksInfo};
    use eko_shared::{Encoding, Id};

    fn state(config: ServerConfig) -> ServerState {
        ServerState::new(config, Store::in_memory(0).unwrap())
    }

    fn code_of(outcome: &Outcome) -> ErrorCode {
        match &outcome.response {
            Payload::Error(info) => info.code,
            other => panic!("expected an error reply, got {other:?}"),
        }
    }

    fn packet(payload: impl Into<Payload>) -> Packet {
        Packet::new(Encoding::Json, &payload.into()).unwrap()
    }

    #[tokio::test]
    async fn test_push_types_are_rejected() {
        let state = state(ServerConfig::default());
        let (session, _rx) = test_session(1, Id(1));
        let outcome = dispatch(&state, &session, packet(NetworksInfo::default())).await;
        assert_eq!(code_of(&outcome), ErrorCode::Validation);
        assert!(!outcome.close);
    }

    #[tokio::test]
    async fn test_malformed_body_is_validation() {
        let state = state(ServerConfig::default());
        let (session, _rx) = test_session(1, Id(1));
        let packet = Packet {
            encoding: Encoding::Json,
            kind: PacketType::SendMessage,
            payload: Bytes::from_static(b"{\"destination\":"),
        };
        let outcome = dispatch(&state, &session, packet).await;
        assert_eq!(code_of(&outcome), ErrorCode::Validation);
        assert!(!outcome.close);
    }

    #[tokio::test]
    async fn test_last_encoding_is_remembered() {
        let state = state(ServerConfig::default());
        let (session, _rx) = test_session(1, Id(1));
        let request = Packet::new(
            Encoding::MsgPack,
            &GetUserData { user_ids: vec![] }.into(),
        )
        .unwrap();
        dispatch(&state, &session, request).await;
        assert_eq!(session.encoding(), Encoding::MsgPack);
    }

    #[tokio::test]
    async fn test_rate_limit_strikes_escalate_to_close() {
        let state = state(ServerConfig {
            request_rate: 0.0,
            request_burst: 1.0,
            rate_limit_strikes: 3,
            ..ServerConfig::default()
        });
        let (session, _rx) = test_session(1, Id(1));
        let block = || {
            packet(BlockUser {
                user_id: Id(2),
                block: true,
            })
        };

        // The single token is spent; the unknown target is a NotFound.
        let first = dispatch(&state, &session, block()).await;
        assert_eq!(code_of(&first), ErrorCode::NotFound);

        for _ in 0..2 {
            let limited = dispatch(&state, &session, block()).await;
            assert_eq!(code_of(&limited), ErrorCode::RateLimited);
            assert!(!limited.close);
        }
        let last = dispatch(&state, &session, block()).await;
        assert_eq!(code_of(&last), ErrorCode::RateLimited);
        assert!(last.close);

        // Reads never touch the bucket.
        let read = dispatch(&state, &session, packet(GetUserData { user_ids: vec![] })).await;
        assert!(matches!(read.response, Payload::UserProfileInfo(_)));
    }
}
