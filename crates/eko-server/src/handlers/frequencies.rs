use eko_shared::constants::MAX_FREQUENCIES;
use eko_shared::protocol::{
    CreateFrequency, DeleteFrequency, FrequenciesInfo, SwapFrequencies, UpdateFrequency,
};
use eko_shared::{validation, Frequency, Id, Payload};
use eko_store::Tx;

use super::ok;
use crate::authorizer;
use crate::error::ServerError;
use crate::server::ServerState;
use crate::session::Session;

/// Frequency list and audience of a network after a change.
struct Changed {
    network_id: Id,
    frequencies: Vec<Frequency>,
    removed: Vec<Id>,
    members: Vec<Id>,
}

impl Changed {
    fn load(tx: &Tx<'_>, network_id: Id, removed: Vec<Id>) -> Result<Self, ServerError> {
        Ok(Self {
            network_id,
            frequencies: tx.list_frequencies(network_id)?,
            removed,
            members: tx.active_member_ids(network_id)?,
        })
    }
}

fn require_admin(tx: &Tx<'_>, network_id: Id, actor: Id) -> Result<(), ServerError> {
    tx.get_network(network_id)?;
    let member = tx.get_member(network_id, actor)?;
    authorizer::manage_frequencies(member.as_ref()).check()
}

async fn publish(state: &ServerState, changed: Changed) {
    let payload: Payload = FrequenciesInfo {
        network_id: changed.network_id,
        frequencies: changed.frequencies,
        removed: changed.removed,
    }
    .into();
    state
        .fanout
        .to_network(changed.network_id, &changed.members, &payload)
        .await;
}

pub(super) async fn create(
    state: &ServerState,
    session: &Session,
    body: CreateFrequency,
) -> Result<Payload, ServerError> {
    validation::name("name", &body.name)?;
    validation::hex_color("hex_color", &body.hex_color)?;

    let actor = session.user_id;
    let id = state.store.next_id();
    let changed = state
        .store
        .transact(move |tx| {
            require_admin(tx, body.network_id, actor)?;
            if tx.count_frequencies(body.network_id)? >= MAX_FREQUENCIES as u64 {
                return Err(ServerError::Conflict(format!(
                    "a network holds at most {MAX_FREQUENCIES} frequencies"
                )));
            }
            tx.insert_frequency(id, body.network_id, &body.name, &body.hex_color, body.perms)?;
            Changed::load(tx, body.network_id, Vec::new())
        })
        .await?;

    publish(state, changed).await;
    Ok(ok())
}

pub(super) async fn update(
    state: &ServerState,
    session: &Session,
    body: UpdateFrequency,
) -> Result<Payload, ServerError> {
    validation::name("name", &body.name)?;
    validation::hex_color("hex_color", &body.hex_color)?;

    let actor = session.user_id;
    let changed = state
        .store
        .transact(move |tx| {
            let frequency = tx.get_frequency(body.frequency_id)?;
            require_admin(tx, frequency.network_id, actor)?;
            tx.update_frequency(frequency.id, &body.name, &body.hex_color, body.perms)?;
            Changed::load(tx, frequency.network_id, Vec::new())
        })
        .await?;

    publish(state, changed).await;
    Ok(ok())
}

pub(super) async fn delete(
    state: &ServerState,
    session: &Session,
    body: DeleteFrequency,
) -> Result<Payload, ServerError> {
    let actor = session.user_id;
    let changed = state
        .store
        .transact(move |tx| {
            let frequency = tx.get_frequency(body.frequency_id)?;
            require_admin(tx, frequency.network_id, actor)?;
            if tx.count_frequencies(frequency.network_id)? <= 1 {
                return Err(ServerError::Conflict(
                    "a network needs at least one frequency".into(),
                ));
            }
            tx.delete_frequency(frequency.id)?;
            Changed::load(tx, frequency.network_id, vec![frequency.id])
        })
        .await?;

    publish(state, changed).await;
    Ok(ok())
}

pub(super) async fn swap(
    state: &ServerState,
    session: &Session,
    body: SwapFrequencies,
) -> Result<Payload, ServerError> {
    let actor = session.user_id;
    let changed = state
        .store
        .transact(move |tx| {
            require_admin(tx, body.network_id, actor)?;
            if body.pos1.abs_diff(body.pos2) != 1 {
                return Err(ServerError::Conflict("positions must be adjacent".into()));
            }
            let count = tx.count_frequencies(body.network_id)?;
            if u64::from(body.pos1.max(body.pos2)) >= count {
                return Err(ServerError::Conflict("position out of range".into()));
            }
            tx.swap_frequency_positions(body.network_id, body.pos1, body.pos2)?;
            Changed::load(tx, body.network_id, Vec::new())
        })
        .await?;

    publish(state, changed).await;
    Ok(ok())
}
