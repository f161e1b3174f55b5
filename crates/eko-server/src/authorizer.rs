//! Permission rules.
//!
//! Every function here is pure: handlers load the rows involved inside
//! their transaction and ask for a [`Decision`] before writing anything.

use eko_shared::{Frequency, FrequencyPerms, Id, Member, Message, Network};

use crate::error::ServerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(&'static str),
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }

    /// `Deny` becomes [`ServerError::Unauthorized`].
    pub fn check(self) -> Result<(), ServerError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(ServerError::Unauthorized(reason.to_string())),
        }
    }
}

fn active(member: Option<&Member>) -> bool {
    member.is_some_and(Member::is_active)
}

fn active_admin(member: Option<&Member>) -> bool {
    member.is_some_and(Member::is_active_admin)
}

// ---------------------------------------------------------------------------
// Frequencies
// ---------------------------------------------------------------------------

pub fn send_to_channel(actor: Option<&Member>, frequency: &Frequency) -> Decision {
    let Some(member) = actor.filter(|m| m.is_active()) else {
        return Decision::Deny("not a member of this network");
    };
    if member.is_muted {
        return Decision::Deny("muted in this network");
    }
    if frequency.perms == FrequencyPerms::ReadWrite || member.is_admin {
        Decision::Allow
    } else {
        Decision::Deny("frequency is read-only")
    }
}

pub fn read_channel(actor: Option<&Member>, frequency: &Frequency) -> Decision {
    let Some(member) = actor.filter(|m| m.is_active()) else {
        return Decision::Deny("not a member of this network");
    };
    if frequency.perms == FrequencyPerms::NoAccess && !member.is_admin {
        return Decision::Deny("no access to this frequency");
    }
    Decision::Allow
}

pub fn manage_frequencies(actor: Option<&Member>) -> Decision {
    if active_admin(actor) {
        Decision::Allow
    } else {
        Decision::Deny("only admins can manage frequencies")
    }
}

// ---------------------------------------------------------------------------
// Direct messages
// ---------------------------------------------------------------------------

/// What the DM rule needs to know about a sender and a receiver.
#[derive(Debug, Clone, Copy, Default)]
pub struct DmContext {
    pub receiver_blocked_sender: bool,
    pub sender_blocked_receiver: bool,
    pub receiver_public_dm: bool,
    /// A DM already exists between the two, in either direction, or the
    /// receiver trusts the sender.
    pub open_signal: bool,
    pub receiver_deleted: bool,
}

pub fn send_dm(ctx: &DmContext) -> Decision {
    if ctx.receiver_deleted {
        return Decision::Deny("account no longer exists");
    }
    if ctx.receiver_blocked_sender || ctx.sender_blocked_receiver {
        return Decision::Deny("blocked");
    }
    if ctx.receiver_public_dm || ctx.open_signal {
        Decision::Allow
    } else {
        Decision::Deny("user does not accept direct messages")
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

pub fn edit_message(actor: Id, message: &Message) -> Decision {
    if message.sender_id != actor {
        return Decision::Deny("only the sender can edit a message");
    }
    if message.deleted {
        return Decision::Deny("message was deleted");
    }
    Decision::Allow
}

/// `actor_member` is the actor's row in the message's network, `None` for
/// DMs.
pub fn delete_message(actor: Id, message: &Message, actor_member: Option<&Member>) -> Decision {
    if message.sender_id == actor {
        return Decision::Allow;
    }
    if message.frequency_id().is_some() && active_admin(actor_member) {
        return Decision::Allow;
    }
    Decision::Deny("cannot delete this message")
}

// ---------------------------------------------------------------------------
// Networks and members
// ---------------------------------------------------------------------------

pub fn manage_network(actor: Id, network: &Network) -> Decision {
    if network.owner_id == actor {
        Decision::Allow
    } else {
        Decision::Deny("only the owner can do this")
    }
}

pub fn join_network(network: &Network, existing: Option<&Member>) -> Decision {
    if existing.is_some_and(|m| m.is_banned) {
        return Decision::Deny("banned from this network");
    }
    if !network.is_public {
        return Decision::Deny("network is private");
    }
    Decision::Allow
}

pub fn leave_network(actor: Id, network: &Network) -> Decision {
    if network.owner_id == actor {
        Decision::Deny("the owner cannot leave; transfer or delete the network")
    } else {
        Decision::Allow
    }
}

pub fn view_members(actor: Option<&Member>) -> Decision {
    if active(actor) {
        Decision::Allow
    } else {
        Decision::Deny("not a member of this network")
    }
}

pub fn view_banned(actor: Option<&Member>) -> Decision {
    if active_admin(actor) {
        Decision::Allow
    } else {
        Decision::Deny("only admins can list bans")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberAction {
    Add,
    Kick,
    Mute,
    Unmute,
    Promote,
    Demote,
    Ban,
    Unban,
}

/// An admin acting on another user's membership.
pub fn manage_member(
    actor: Id,
    actor_member: Option<&Member>,
    network: &Network,
    target: Id,
    target_member: Option<&Member>,
    action: MemberAction,
) -> Decision {
    if !active_admin(actor_member) {
        return Decision::Deny("only admins can manage members");
    }
    if target == network.owner_id {
        return Decision::Deny("the owner cannot be managed");
    }
    let target_is_admin = active_admin(target_member);
    let needs_owner = matches!(action, MemberAction::Demote | MemberAction::Ban) && target_is_admin;
    if needs_owner && actor != network.owner_id {
        return Decision::Deny("only the owner can demote or ban an admin");
    }
    Decision::Allow
}

pub fn delete_account(owned_networks: u64) -> Decision {
    if owned_networks == 0 {
        Decision::Allow
    } else {
        Decision::Deny("transfer or delete owned networks first")
    }
}
