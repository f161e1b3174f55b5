use eko_shared::protocol::{
    CreateNetwork, DeleteNetwork, FrequenciesInfo, NetworksInfo, TransferNetwork, UpdateNetwork,
};
use eko_shared::{validation, Network, Payload};
use tracing::info;

use super::ok;
use crate::authorizer;
use crate::error::ServerError;
use crate::server::ServerState;
use crate::session::Session;

fn validate_look(name: &str, icon: &str, bg_hex: &str, fg_hex: &str) -> Result<(), ServerError> {
    validation::name("name", name)?;
    validation::icon(icon)?;
    validation::hex_color("bg_hex", bg_hex)?;
    validation::hex_color("fg_hex", fg_hex)?;
    Ok(())
}

fn networks_info(network: Network) -> Payload {
    NetworksInfo {
        networks: vec![network],
        ..Default::default()
    }
    .into()
}

pub(super) async fn create(
    state: &ServerState,
    session: &Session,
    body: CreateNetwork,
) -> Result<Payload, ServerError> {
    validate_look(&body.name, &body.icon, &body.bg_hex, &body.fg_hex)?;

    let network = Network {
        id: state.store.next_id(),
        owner_id: session.user_id,
        name: body.name,
        icon: body.icon,
        bg_hex: body.bg_hex,
        fg_hex: body.fg_hex,
        is_public: body.is_public,
    };
    let frequency_id = state.store.next_id();

    let row = network.clone();
    let main = state
        .store
        .transact(move |tx| Ok(tx.create_network(&row, frequency_id)?))
        .await?;

    info!(network_id = %network.id, owner = %network.owner_id, "Network created");

    let owner = [session.user_id];
    state.registry.subscribe_user(session.user_id, network.id);
    state
        .fanout
        .to_users(&owner, &networks_info(network.clone()))
        .await;
    state
        .fanout
        .to_users(
            &owner,
            &FrequenciesInfo {
                network_id: network.id,
                frequencies: vec![main],
                removed: Vec::new(),
            }
            .into(),
        )
        .await;
    Ok(ok())
}

pub(super) async fn update(
    state: &ServerState,
    session: &Session,
    body: UpdateNetwork,
) -> Result<Payload, ServerError> {
    validate_look(&body.name, &body.icon, &body.bg_hex, &body.fg_hex)?;

    let actor = session.user_id;
    let (network, members) = state
        .store
        .transact(move |tx| {
            let current = tx.get_network(body.network_id)?;
            authorizer::manage_network(actor, &current).check()?;

            let network = Network {
                name: body.name,
                icon: body.icon,
                bg_hex: body.bg_hex,
                fg_hex: body.fg_hex,
                is_public: body.is_public,
                ..current
            };
            tx.update_network(&network)?;
            let members = tx.active_member_ids(network.id)?;
            Ok((network, members))
        })
        .await?;

    state
        .fanout
        .to_network(network.id, &members, &networks_info(network.clone()))
        .await;
    Ok(ok())
}

pub(super) async fn transfer(
    state: &ServerState,
    session: &Session,
    body: TransferNetwork,
) -> Result<Payload, ServerError> {
    let actor = session.user_id;
    let (network, members) = state
        .store
        .transact(move |tx| {
            let current = tx.get_network(body.network_id)?;
            authorizer::manage_network(actor, &current).check()?;

            if body.user_id == actor {
                return Ok((current, Vec::new()));
            }
            let target = tx.get_member(current.id, body.user_id)?;
            if !target.is_some_and(|m| m.is_active_admin()) {
                return Err(ServerError::Conflict(
                    "ownership can only move to an admin".into(),
                ));
            }
            tx.set_network_owner(current.id, body.user_id)?;
            let network = tx.get_network(current.id)?;
            let members = tx.active_member_ids(network.id)?;
            Ok((network, members))
        })
        .await?;

    if !members.is_empty() {
        info!(
            network_id = %network.id,
            from = %actor,
            to = %network.owner_id,
            "Network transferred"
        );
        state
            .fanout
            .to_network(network.id, &members, &networks_info(network))
            .await;
    }
    Ok(ok())
}

pub(super) async fn delete(
    state: &ServerState,
    session: &Session,
    body: DeleteNetwork,
) -> Result<Payload, ServerError> {
    let actor = session.user_id;
    let network_id = body.network_id;
    let members = state
        .store
        .transact(move |tx| {
            let network = tx.get_network(network_id)?;
            authorizer::manage_network(actor, &network).check()?;
            let members = tx.active_member_ids(network_id)?;
            tx.delete_network(network_id)?;
            Ok(members)
        })
        .await?;

    info!(%network_id, owner = %actor, members = members.len(), "Network deleted");

    for member in &members {
        state.registry.unsubscribe_user(*member, network_id);
    }
    state
        .fanout
        .to_users(
            &members,
            &NetworksInfo {
                removed: vec![network_id],
                ..Default::default()
            }
            .into(),
        )
        .await;
    Ok(ok())
}
