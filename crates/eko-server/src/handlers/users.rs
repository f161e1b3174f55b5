use std::collections::BTreeSet;

use eko_shared::protocol::{
    BlockUser, BlocksInfo, DeleteUser, GetBlockedUsers, GetTrustedUsers, GetUserData,
    MembersInfo, SetUserData, TrustInfo, TrustUser, UserProfileInfo,
};
use eko_shared::{validation, Id, Payload};
use tracing::info;

use super::ok;
use crate::authorizer::{self, Decision};
use crate::error::ServerError;
use crate::server::ServerState;
use crate::session::Session;

/// Most profiles one `GetUserData` may ask for.
const MAX_PROFILE_BATCH: usize = 100;

pub(super) async fn set_user_data(
    state: &ServerState,
    session: &Session,
    body: SetUserData,
) -> Result<Payload, ServerError> {
    if let Some(name) = &body.name {
        validation::name("name", name)?;
    }
    if let Some(description) = &body.description {
        validation::description(description)?;
    }

    let user_id = session.user_id;
    let (user, audience) = state
        .store
        .transact(move |tx| {
            let user = tx.update_user_profile(
                user_id,
                body.name.as_deref(),
                body.description.as_deref(),
                body.is_public_dm,
            )?;
            // Everyone who can see this user in a member list.
            let mut audience = BTreeSet::from([user_id]);
            for network in tx.networks_of_user(user_id)? {
                audience.extend(tx.active_member_ids(network.id)?);
            }
            Ok((user, audience.into_iter().collect::<Vec<Id>>()))
        })
        .await?;

    state
        .fanout
        .to_users(&audience, &UserProfileInfo { users: vec![user] }.into())
        .await;
    Ok(ok())
}

pub(super) async fn get_user_data(
    state: &ServerState,
    _session: &Session,
    body: GetUserData,
) -> Result<Payload, ServerError> {
    if body.user_ids.len() > MAX_PROFILE_BATCH {
        return Err(ServerError::Validation(format!(
            "at most {MAX_PROFILE_BATCH} users per request"
        )));
    }
    let users = state
        .store
        .transact(move |tx| Ok(tx.get_users(&body.user_ids)?))
        .await?;
    Ok(UserProfileInfo { users }.into())
}

pub(super) async fn trust_user(
    state: &ServerState,
    session: &Session,
    body: TrustUser,
) -> Result<Payload, ServerError> {
    let actor = session.user_id;
    if body.user_id == actor {
        return Err(ServerError::Validation("cannot trust yourself".into()));
    }

    state
        .store
        .transact(move |tx| {
            let target = tx.get_user(body.user_id)?;
            if !body.trust {
                tx.remove_trust(actor, target.id)?;
                return Ok(());
            }
            if target.is_deleted {
                return Err(ServerError::NotFound("user no longer exists".into()));
            }
            if tx.is_blocked(actor, target.id)? || tx.is_blocked(target.id, actor)? {
                return Err(ServerError::Conflict(
                    "cannot trust across a block".into(),
                ));
            }
            tx.set_trust(actor, target.id, &target.public_key)?;
            Ok(())
        })
        .await?;
    Ok(ok())
}

pub(super) async fn block_user(
    state: &ServerState,
    session: &Session,
    body: BlockUser,
) -> Result<Payload, ServerError> {
    let actor = session.user_id;
    if body.user_id == actor {
        return Err(ServerError::Validation("cannot block yourself".into()));
    }

    state
        .store
        .transact(move |tx| {
            let target = tx.get_user(body.user_id)?;
            if body.block {
                if tx.add_block(actor, target.id)? {
                    tx.remove_trust_between(actor, target.id)?;
                }
            } else {
                tx.remove_block(actor, target.id)?;
            }
            Ok(())
        })
        .await?;
    Ok(ok())
}

pub(super) async fn get_trusted(
    state: &ServerState,
    session: &Session,
    _body: GetTrustedUsers,
) -> Result<Payload, ServerError> {
    let actor = session.user_id;
    let entries = state
        .store
        .transact(move |tx| Ok(tx.trust_entries(actor)?))
        .await?;
    Ok(TrustInfo { entries }.into())
}

pub(super) async fn get_blocked(
    state: &ServerState,
    session: &Session,
    _body: GetBlockedUsers,
) -> Result<Payload, ServerError> {
    let actor = session.user_id;
    let blocked = state
        .store
        .transact(move |tx| Ok(tx.blocked_by(actor)?))
        .await?;
    Ok(BlocksInfo { blocked }.into())
}

pub(super) async fn delete_user(
    state: &ServerState,
    session: &Session,
    _body: DeleteUser,
) -> Result<Payload, ServerError> {
    let user_id = session.user_id;
    let left = state
        .store
        .transact(move |tx| {
            if let Decision::Deny(reason) =
                authorizer::delete_account(tx.count_owned_networks(user_id)?)
            {
                return Err(ServerError::Conflict(reason.into()));
            }
            let mut left = Vec::new();
            for network_id in tx.tombstone_user(user_id)? {
                left.push((network_id, tx.active_member_ids(network_id)?));
            }
            Ok(left)
        })
        .await?;

    info!(%user_id, networks = left.len(), "Account deleted");

    for (network_id, members) in left {
        state.registry.unsubscribe_user(user_id, network_id);
        let removed = MembersInfo {
            network_id,
            members: Vec::new(),
            removed: vec![user_id],
        };
        state
            .fanout
            .to_network(network_id, &members, &removed.into())
            .await;
    }

    // This session gets its reply first; every other one goes now.
    for other in state.registry.sessions_of(user_id) {
        if other.conn_id != session.conn_id {
            other.close();
        }
    }
    session.close_after_reply();
    Ok(ok())
}
