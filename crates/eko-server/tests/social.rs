mod common;

use common::{network_with_member, TestServer};
use eko_shared::protocol::{
    BlockUser, DeleteUser, GetBlockedUsers, GetTrustedUsers, GetUserData, SetUserData, TrustUser,
};
use eko_shared::{ErrorCode, Id, Identity, Payload, TrustEntry, TrustStatus};

fn trust(user_id: Id, trust: bool) -> TrustUser {
    TrustUser { user_id, trust }
}

fn block(user_id: Id, block: bool) -> BlockUser {
    BlockUser { user_id, block }
}

async fn trusted(client: &mut common::TestClient) -> Vec<TrustEntry> {
    match client.query(GetTrustedUsers {}).await {
        Payload::TrustInfo(info) => info.entries,
        other => panic!("expected trust list, got {other:?}"),
    }
}

async fn blocked(client: &mut common::TestClient) -> Vec<Id> {
    match client.query(GetBlockedUsers {}).await {
        Payload::BlocksInfo(info) => info.blocked,
        other => panic!("expected block list, got {other:?}"),
    }
}

#[tokio::test]
async fn test_trust_is_idempotent() {
    let server = TestServer::new();
    let mut alice = server.connect(&Identity::generate()).await;
    let bob = server.connect(&Identity::generate()).await;

    alice.expect_ok(trust(bob.id(), true)).await;
    alice.expect_ok(trust(bob.id(), true)).await;

    let entries = trusted(&mut alice).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].user_id, bob.id());
    assert_eq!(entries[0].trusted_key, bob.user.public_key);
    assert_eq!(entries[0].status, TrustStatus::Trusted);

    // Acknowledged without a push.
    alice.assert_quiet().await;
}

#[tokio::test]
async fn test_self_trust_and_block_are_rejected() {
    let server = TestServer::new();
    let mut alice = server.connect(&Identity::generate()).await;
    let me = alice.id();

    alice.expect_code(trust(me, true), ErrorCode::Validation).await;
    alice.expect_code(block(me, true), ErrorCode::Validation).await;
    alice
        .expect_code(trust(Id(424_242), true), ErrorCode::NotFound)
        .await;
}

#[tokio::test]
async fn test_block_removes_trust_both_ways() {
    let server = TestServer::new();
    let mut alice = server.connect(&Identity::generate()).await;
    let mut bob = server.connect(&Identity::generate()).await;
    let alice_id = alice.id();
    let bob_id = bob.id();

    alice.expect_ok(trust(bob_id, true)).await;
    bob.expect_ok(trust(alice_id, true)).await;

    alice.expect_ok(block(bob_id, true)).await;
    assert!(trusted(&mut alice).await.is_empty());
    assert!(trusted(&mut bob).await.is_empty());
    assert_eq!(blocked(&mut alice).await, vec![bob_id]);

    alice.expect_code(trust(bob_id, true), ErrorCode::Conflict).await;
    bob.expect_code(trust(alice_id, true), ErrorCode::Conflict).await;

    // Blocking twice is a no-op; unblocking lifts the conflict.
    alice.expect_ok(block(bob_id, true)).await;
    alice.expect_ok(block(bob_id, false)).await;
    assert!(blocked(&mut alice).await.is_empty());
    alice.expect_ok(trust(bob_id, true)).await;
}

#[tokio::test]
async fn test_profile_update_reaches_co_members() {
    let server = TestServer::new();
    let (mut owner, mut member, _, _) = network_with_member(&server).await;
    let member_id = member.id();

    member
        .expect_ok(SetUserData {
            name: Some("Marlowe".into()),
            description: Some("here for the chat".into()),
            ..Default::default()
        })
        .await;

    let own = match member.next_push().await {
        Payload::UserProfileInfo(info) => info.users,
        other => panic!("expected profile, got {other:?}"),
    };
    let seen = match owner.next_push().await {
        Payload::UserProfileInfo(info) => info.users,
        other => panic!("expected profile, got {other:?}"),
    };
    assert_eq!(own, seen);
    assert_eq!(seen[0].id, member_id);
    assert_eq!(seen[0].name, "Marlowe");

    match owner.query(GetUserData { user_ids: vec![member_id] }).await {
        Payload::UserProfileInfo(info) => assert_eq!(info.users, seen),
        other => panic!("expected profile, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_profile_is_rejected() {
    let server = TestServer::new();
    let mut alice = server.connect(&Identity::generate()).await;
    alice
        .expect_code(
            SetUserData {
                name: Some(String::new()),
                ..Default::default()
            },
            ErrorCode::Validation,
        )
        .await;
    alice.assert_quiet().await;
}

#[tokio::test]
async fn test_profile_batch_is_capped() {
    let server = TestServer::new();
    let mut alice = server.connect(&Identity::generate()).await;
    let user_ids = (1..=101).map(Id).collect();
    alice
        .expect_code(GetUserData { user_ids }, ErrorCode::Validation)
        .await;
}

#[tokio::test]
async fn test_owner_cannot_delete_account() {
    let server = TestServer::new();
    let mut owner = server.connect(&Identity::generate()).await;
    owner.create_network("den", true).await;

    owner.expect_code(DeleteUser {}, ErrorCode::Conflict).await;
}

#[tokio::test]
async fn test_delete_account_closes_every_session() {
    let server = TestServer::new();
    let mut owner = server.connect(&Identity::generate()).await;
    let (network, _) = owner.create_network("den", true).await;

    let identity = Identity::generate();
    let mut desktop = server.connect(&identity).await;
    let mut phone = server.connect(&identity).await;
    let user_id = desktop.id();
    assert_eq!(phone.id(), user_id);
    assert_eq!(server.state.registry.sessions_of(user_id).len(), 2);

    desktop.join(network.id).await;
    owner.next_members().await;
    owner.next_networks().await;

    desktop.expect_ok(DeleteUser {}).await;
    desktop.assert_closed().await;
    phone.assert_closed().await;

    let left = owner.next_members().await;
    assert_eq!(left.network_id, network.id);
    assert_eq!(left.removed, vec![user_id]);

    match owner.query(GetUserData { user_ids: vec![user_id] }).await {
        Payload::UserProfileInfo(info) => assert!(info.users[0].is_deleted),
        other => panic!("expected profile, got {other:?}"),
    }
    assert!(server.state.registry.sessions_of(user_id).is_empty());
}
