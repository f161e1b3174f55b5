use eko_shared::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use eko_shared::protocol::{DeleteMessage, EditMessage, MessagesInfo, RequestMessages, SendMessage};
use eko_shared::{codec, validation, Destination, Encoding, Id, Message, Payload, Ping};
use eko_store::Tx;

use super::ok;
use crate::authorizer::{self, DmContext};
use crate::error::ServerError;
use crate::fanout::Conversation;
use crate::server::ServerState;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mention {
    Everyone,
    Admins,
    User(Id),
}

/// `@everyone`, `@admins` and `@<user id>` words, in order of appearance.
fn mentions(content: &str) -> impl Iterator<Item = Mention> + '_ {
    content.split_whitespace().filter_map(|word| {
        let tag = word
            .strip_prefix('@')?
            .trim_end_matches(|c: char| matches!(c, ',' | '.' | '!' | '?' | ':' | ';'));
        match tag {
            "everyone" => Some(Mention::Everyone),
            "admins" => Some(Mention::Admins),
            digits if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
                digits.parse().ok().map(|n| Mention::User(Id(n)))
            }
            _ => None,
        }
    })
}

/// The first mention that names something real.
fn resolve_ping(tx: &Tx<'_>, content: &str) -> Result<Option<Ping>, ServerError> {
    for mention in mentions(content) {
        match mention {
            Mention::Everyone => return Ok(Some(Ping::Everyone)),
            Mention::Admins => return Ok(Some(Ping::Admins)),
            Mention::User(id) => {
                if !tx.get_users(&[id])?.is_empty() {
                    return Ok(Some(Ping::User(id)));
                }
            }
        }
    }
    Ok(None)
}

/// Who gets a message push.
enum Audience {
    /// Subscribed sessions of these network members.
    Network { network_id: Id, members: Vec<Id> },
    /// Every session of these users.
    Users(Vec<Id>),
}

fn audience(tx: &Tx<'_>, message: &Message) -> Result<Audience, ServerError> {
    match message.destination {
        Destination::Channel(frequency_id) => {
            let frequency = tx.get_frequency(frequency_id)?;
            let blockers = tx.blockers_of(message.sender_id)?;
            let members = tx
                .active_members(frequency.network_id)?
                .into_iter()
                .filter(|m| authorizer::read_channel(Some(m), &frequency).is_allowed())
                .map(|m| m.user_id)
                .filter(|id| !blockers.contains(id))
                .collect();
            Ok(Audience::Network {
                network_id: frequency.network_id,
                members,
            })
        }
        Destination::Dm(receiver) => {
            let mut users = vec![message.sender_id];
            if !tx.is_blocked(receiver, message.sender_id)? {
                users.push(receiver);
            }
            Ok(Audience::Users(users))
        }
    }
}

async fn publish(state: &ServerState, message: Message, audience: Audience) {
    let payload: Payload = MessagesInfo {
        messages: vec![message],
    }
    .into();
    match audience {
        Audience::Network {
            network_id,
            members,
        } => state.fanout.to_network(network_id, &members, &payload).await,
        Audience::Users(users) => state.fanout.to_users(&users, &payload).await,
    };
}

/// Drop the oldest messages until the page fits in one packet. The client
/// pages backwards from the oldest message it got, so nothing is skipped.
fn fit_page(mut page: MessagesInfo, encoding: Encoding) -> MessagesInfo {
    while page.messages.len() > 1 && codec::encode(encoding, &page).is_err() {
        page.messages.remove(0);
    }
    page
}

pub(super) async fn send(
    state: &ServerState,
    session: &Session,
    body: SendMessage,
) -> Result<Payload, ServerError> {
    validation::content(&body.content)?;
    let sender = session.user_id;
    if body.destination == Destination::Dm(sender) {
        return Err(ServerError::Validation("cannot message yourself".into()));
    }

    // Held until the push is queued: ids of one conversation reach every
    // session in ascending order.
    let _order = state
        .fanout
        .lock(Conversation::of(sender, body.destination))
        .await;
    let id = state.store.next_id();

    let (message, audience) = state
        .store
        .transact(move |tx| {
            let ping = match body.destination {
                Destination::Channel(frequency_id) => {
                    let frequency = tx.get_frequency(frequency_id)?;
                    let member = tx.get_member(frequency.network_id, sender)?;
                    authorizer::send_to_channel(member.as_ref(), &frequency).check()?;
                    resolve_ping(tx, &body.content)?
                }
                Destination::Dm(receiver) => {
                    let target = tx.get_user(receiver)?;
                    let ctx = DmContext {
                        receiver_blocked_sender: tx.is_blocked(receiver, sender)?,
                        sender_blocked_receiver: tx.is_blocked(sender, receiver)?,
                        receiver_public_dm: target.is_public_dm,
                        open_signal: tx.dm_exists(sender, receiver)?
                            || tx.trusts(receiver, sender)?,
                        receiver_deleted: target.is_deleted,
                    };
                    authorizer::send_dm(&ctx).check()?;
                    None
                }
            };

            let message = Message {
                id,
                sender_id: sender,
                destination: body.destination,
                content: body.content,
                ping,
                edited: false,
                deleted: false,
            };
            tx.insert_message(&message)?;
            let audience = audience(tx, &message)?;
            Ok((message, audience))
        })
        .await?;

    publish(state, message, audience).await;
    Ok(ok())
}

pub(super) async fn edit(
    state: &ServerState,
    session: &Session,
    body: EditMessage,
) -> Result<Payload, ServerError> {
    validation::content(&body.content)?;
    let actor = session.user_id;

    let (message, audience) = state
        .store
        .transact(move |tx| {
            let message = tx.get_message(body.message_id)?;
            authorizer::edit_message(actor, &message).check()?;
            let edited = tx.edit_message(message.id, &body.content)?;
            let audience = audience(tx, &edited)?;
            Ok((edited, audience))
        })
        .await?;

    publish(state, message, audience).await;
    Ok(ok())
}

pub(super) async fn delete(
    state: &ServerState,
    session: &Session,
    body: DeleteMessage,
) -> Result<Payload, ServerError> {
    let actor = session.user_id;

    let deleted = state
        .store
        .transact(move |tx| {
            let message = tx.get_message(body.message_id)?;
            let actor_member = match message.destination {
                Destination::Channel(frequency_id) => {
                    let frequency = tx.get_frequency(frequency_id)?;
                    tx.get_member(frequency.network_id, actor)?
                }
                Destination::Dm(_) => None,
            };
            authorizer::delete_message(actor, &message, actor_member.as_ref()).check()?;

            if !tx.tombstone_message(message.id)? {
                return Ok(None);
            }
            let tombstone = tx.get_message(message.id)?;
            let audience = audience(tx, &tombstone)?;
            Ok(Some((tombstone, audience)))
        })
        .await?;

    if let Some((tombstone, audience)) = deleted {
        publish(state, tombstone, audience).await;
    }
    Ok(ok())
}

pub(super) async fn history(
    state: &ServerState,
    session: &Session,
    body: RequestMessages,
) -> Result<Payload, ServerError> {
    let viewer = session.user_id;
    let limit = body
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let messages = state
        .store
        .transact(move |tx| match body.destination {
            Destination::Channel(frequency_id) => {
                let frequency = tx.get_frequency(frequency_id)?;
                let member = tx.get_member(frequency.network_id, viewer)?;
                authorizer::read_channel(member.as_ref(), &frequency).check()?;
                Ok(tx.channel_history(frequency_id, viewer, body.before, limit)?)
            }
            Destination::Dm(peer) => {
                tx.get_user(peer)?;
                Ok(tx.dm_history(viewer, peer, body.before, limit)?)
            }
        })
        .await?;

    Ok(fit_page(MessagesInfo { messages }, session.encoding()).into())
}
