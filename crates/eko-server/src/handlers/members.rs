use eko_shared::protocol::{
    FrequenciesInfo, GetBannedMembers, GetMembers, MembersInfo, NetworksInfo, SetNetworkUser,
};
use eko_shared::{validation, Frequency, Id, Member, Network, Payload};
use eko_store::StoreError;
use tracing::info;

use super::ok;
use crate::authorizer::{self, Decision, MemberAction};
use crate::error::ServerError;
use crate::server::ServerState;
use crate::session::Session;

/// The membership row after a [`SetNetworkUser`], and the steps that lead
/// there.
#[derive(Debug)]
struct Plan {
    actions: Vec<MemberAction>,
    /// `None` when the row is to be deleted.
    next: Option<Member>,
    /// First invalid step. Reported only once every action is authorized.
    rejected: Option<ServerError>,
}

impl Plan {
    fn validated(mut self) -> Result<Self, ServerError> {
        match self.rejected.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Work out which actions a request amounts to, given the current row.
/// Fields that already hold the requested value are not actions. An invalid
/// step is still listed so the caller can authorize it before saying why it
/// is invalid.
fn plan(network_id: Id, user_id: Id, current: Option<&Member>, body: &SetNetworkUser) -> Plan {
    let mut banned = current.is_some_and(|m| m.is_banned);
    let mut ban_reason = current.and_then(|m| m.ban_reason.clone());
    let mut member = current.is_some_and(|m| m.is_member);
    let mut admin = current.is_some_and(|m| m.is_admin);
    let mut muted = current.is_some_and(|m| m.is_muted);
    let mut actions = Vec::new();
    let mut rejected = None;

    match body.banned {
        Some(true) if !banned => {
            let reason = body.ban_reason.as_deref().unwrap_or_default();
            if body.ban_reason.is_none() {
                rejected.get_or_insert(ServerError::Validation("a ban needs a reason".into()));
            } else if let Err(e) = validation::ban_reason(reason) {
                rejected.get_or_insert(e.into());
            }
            actions.push(MemberAction::Ban);
            banned = true;
            ban_reason = Some(reason.to_string());
            member = false;
            admin = false;
            muted = false;
        }
        Some(false) if banned => {
            actions.push(MemberAction::Unban);
            banned = false;
            ban_reason = None;
        }
        _ => {}
    }

    match body.member {
        Some(true) if !member => {
            if banned {
                rejected.get_or_insert(ServerError::Conflict(
                    "user is banned from this network".into(),
                ));
            }
            actions.push(MemberAction::Add);
            member = true;
        }
        Some(false) if member => {
            actions.push(MemberAction::Kick);
            member = false;
            admin = false;
            muted = false;
        }
        _ => {}
    }

    match body.admin {
        Some(true) if !admin => {
            if !member {
                rejected.get_or_insert(ServerError::Conflict("user is not a member".into()));
            }
            actions.push(MemberAction::Promote);
            admin = true;
        }
        Some(false) if admin => {
            actions.push(MemberAction::Demote);
            admin = false;
        }
        _ => {}
    }

    match body.muted {
        Some(true) if !muted => {
            if !member {
                rejected.get_or_insert(ServerError::Conflict("user is not a member".into()));
            }
            actions.push(MemberAction::Mute);
            muted = true;
        }
        Some(false) if muted => {
            actions.push(MemberAction::Unmute);
            muted = false;
        }
        _ => {}
    }

    let next = (member || banned).then(|| Member {
        network_id,
        user_id,
        is_member: member,
        is_admin: admin,
        is_muted: muted,
        is_banned: banned,
        ban_reason,
    });
    Plan {
        actions,
        next,
        rejected,
    }
}

fn decide(
    actor: Id,
    actor_member: Option<&Member>,
    network: &Network,
    target: Id,
    target_member: Option<&Member>,
    action: MemberAction,
) -> Decision {
    match (actor == target, action) {
        (true, MemberAction::Add) => authorizer::join_network(network, target_member),
        (true, MemberAction::Kick) => authorizer::leave_network(actor, network),
        _ => authorizer::manage_member(actor, actor_member, network, target, target_member, action),
    }
}

struct Applied {
    network: Network,
    row: Option<Member>,
    members: Vec<Id>,
    became_active: bool,
    lost_active: bool,
    frequencies: Vec<Frequency>,
}

pub(super) async fn set_network_user(
    state: &ServerState,
    session: &Session,
    body: SetNetworkUser,
) -> Result<Payload, ServerError> {
    let actor = session.user_id;
    let target = body.user_id;
    let network_id = body.network_id;

    let applied = state
        .store
        .transact(move |tx| {
            let network = tx.get_network(network_id)?;
            let user = tx.get_user(target)?;
            if user.is_deleted {
                return Err(ServerError::NotFound("user no longer exists".into()));
            }
            let actor_member = tx.get_member(network_id, actor)?;
            let current = tx.get_member(network_id, target)?;

            let plan = plan(network_id, target, current.as_ref(), &body);
            if plan.actions.is_empty() {
                return Ok(None);
            }
            for action in &plan.actions {
                decide(
                    actor,
                    actor_member.as_ref(),
                    &network,
                    target,
                    current.as_ref(),
                    *action,
                )
                .check()?;
            }
            let plan = plan.validated()?;

            // The owner-protection trigger re-checks the write; a refusal
            // there is a permission error, not a conflict.
            let write = match &plan.next {
                Some(row) => tx.upsert_member(row),
                None => tx.delete_member(network_id, target).map(|_| ()),
            };
            write.map_err(|e| match e {
                StoreError::Constraint(_) => {
                    ServerError::Unauthorized("the owner cannot be managed".into())
                }
                other => other.into(),
            })?;

            let was_active = current.as_ref().is_some_and(Member::is_active);
            let is_active = plan.next.as_ref().is_some_and(Member::is_active);
            let frequencies = if is_active && !was_active {
                tx.list_frequencies(network_id)?
            } else {
                Vec::new()
            };

            info!(
                %network_id,
                %actor,
                %target,
                actions = ?plan.actions,
                "Membership changed"
            );

            Ok(Some(Applied {
                members: tx.active_member_ids(network_id)?,
                network,
                row: plan.next,
                became_active: is_active && !was_active,
                lost_active: was_active && !is_active,
                frequencies,
            }))
        })
        .await?;

    let Some(applied) = applied else {
        return Ok(ok());
    };
    push_membership_change(state, target, applied).await;
    Ok(ok())
}

async fn push_membership_change(state: &ServerState, target: Id, applied: Applied) {
    let network_id = applied.network.id;
    let target_only = [target];

    if applied.lost_active {
        // Unsubscribe first so nothing network-scoped reaches the target
        // past this point.
        state.registry.unsubscribe_user(target, network_id);
        state
            .fanout
            .to_users(
                &target_only,
                &NetworksInfo {
                    removed: vec![network_id],
                    ..Default::default()
                }
                .into(),
            )
            .await;
    }

    if applied.became_active {
        state.registry.subscribe_user(target, network_id);
        state
            .fanout
            .to_users(
                &target_only,
                &NetworksInfo {
                    networks: vec![applied.network.clone()],
                    ..Default::default()
                }
                .into(),
            )
            .await;
        state
            .fanout
            .to_users(
                &target_only,
                &FrequenciesInfo {
                    network_id,
                    frequencies: applied.frequencies,
                    removed: Vec::new(),
                }
                .into(),
            )
            .await;
    }

    let members_info = match applied.row.filter(Member::is_active) {
        Some(row) => MembersInfo {
            network_id,
            members: vec![row],
            removed: Vec::new(),
        },
        None => MembersInfo {
            network_id,
            members: Vec::new(),
            removed: vec![target],
        },
    };
    state
        .fanout
        .to_network(network_id, &applied.members, &members_info.into())
        .await;

    let others: Vec<Id> = applied
        .members
        .iter()
        .copied()
        .filter(|id| !(applied.became_active && *id == target))
        .collect();
    state
        .fanout
        .to_network(
            network_id,
            &others,
            &NetworksInfo {
                networks: vec![applied.network],
                ..Default::default()
            }
            .into(),
        )
        .await;
}

pub(super) async fn get_banned(
    state: &ServerState,
    session: &Session,
    body: GetBannedMembers,
) -> Result<Payload, ServerError> {
    let actor = session.user_id;
    let network_id = body.network_id;
    let members = state
        .store
        .transact(move |tx| {
            tx.get_network(network_id)?;
            let actor_member = tx.get_member(network_id, actor)?;
            authorizer::view_banned(actor_member.as_ref()).check()?;
            Ok(tx.banned_members(network_id)?)
        })
        .await?;

    Ok(MembersInfo {
        network_id,
        members,
        removed: Vec::new(),
    }
    .into())
}

pub(super) async fn get_members(
    state: &ServerState,
    session: &Session,
    body: GetMembers,
) -> Result<Payload, ServerError> {
    let actor = session.user_id;
    let network_id = body.network_id;
    let members = state
        .store
        .transact(move |tx| {
            tx.get_network(network_id)?;
            let actor_member = tx.get_member(network_id, actor)?;
            authorizer::view_members(actor_member.as_ref()).check()?;
            Ok(tx.active_members(network_id)?)
        })
        .await?;

    Ok(MembersInfo {
        network_id,
        members,
        removed: Vec::new(),
    }
    .into())
}
