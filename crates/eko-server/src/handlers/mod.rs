//! Request handlers, one module per area.
//!
//! Each handler loads, authorizes and writes inside a single store
//! transaction, then fans out the resulting pushes. The returned payload is
//! the direct reply: an `ErrorInfo` with code 0 for plain acknowledgements,
//! or the requested data.

mod frequencies;
mod members;
mod messages;
mod networks;
mod users;

use eko_shared::{ErrorInfo, Payload};

use crate::error::ServerError;
use crate::server::ServerState;
use crate::session::Session;

pub(crate) fn ok() -> Payload {
    ErrorInfo::ok().into()
}

/// Route one decoded request to its handler.
pub async fn handle(
    state: &ServerState,
    session: &Session,
    payload: Payload,
) -> Result<Payload, ServerError> {
    match payload {
        Payload::CreateNetwork(body) => networks::create(state, session, body).await,
        Payload::UpdateNetwork(body) => networks::update(state, session, body).await,
        Payload::TransferNetwork(body) => networks::transfer(state, session, body).await,
        Payload::DeleteNetwork(body) => networks::delete(state, session, body).await,
        Payload::SetNetworkUser(body) => members::set_network_user(state, session, body).await,
        Payload::GetBannedMembers(body) => members::get_banned(state, session, body).await,
        Payload::GetMembers(body) => members::get_members(state, session, body).await,

        Payload::CreateFrequency(body) => frequencies::create(state, session, body).await,
        Payload::UpdateFrequency(body) => frequencies::update(state, session, body).await,
        Payload::DeleteFrequency(body) => frequencies::delete(state, session, body).await,
        Payload::SwapFrequencies(body) => frequencies::swap(state, session, body).await,

        Payload::SendMessage(body) => messages::send(state, session, body).await,
        Payload::EditMessage(body) => messages::edit(state, session, body).await,
        Payload::DeleteMessage(body) => messages::delete(state, session, body).await,
        Payload::RequestMessages(body) => messages::history(state, session, body).await,

        Payload::SetUserData(body) => users::set_user_data(state, session, body).await,
        Payload::GetUserData(body) => users::get_user_data(state, session, body).await,
        Payload::TrustUser(body) => users::trust_user(state, session, body).await,
        Payload::BlockUser(body) => users::block_user(state, session, body).await,
        Payload::GetTrustedUsers(body) => users::get_trusted(state, session, body).await,
        Payload::GetBlockedUsers(body) => users::get_blocked(state, session, body).await,
        Payload::DeleteUser(body) => users::delete_user(state, session, body).await,

        Payload::Error(_)
        | Payload::UserProfileInfo(_)
        | Payload::NetworksInfo(_)
        | Payload::FrequenciesInfo(_)
        | Payload::MembersInfo(_)
        | Payload::MessagesInfo(_)
        | Payload::TrustInfo(_)
        | Payload::BlocksInfo(_) => Err(ServerError::Validation(format!(
            "{} is not a request",
            payload.kind().name()
        ))),
    }
}
