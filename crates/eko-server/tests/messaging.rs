mod common;

use common::{network_with_member, TestServer};
use eko_shared::protocol::{
    BlockUser, DeleteMessage, EditMessage, RequestMessages, SendMessage, SetNetworkUser,
    SetUserData, TrustUser,
};
use eko_shared::{Destination, ErrorCode, Id, Identity, Payload, Ping};

fn say(destination: Destination, content: &str) -> SendMessage {
    SendMessage {
        destination,
        content: content.into(),
    }
}

async fn history(
    client: &mut common::TestClient,
    destination: Destination,
    before: Option<Id>,
    limit: Option<u16>,
) -> Vec<eko_shared::Message> {
    match client
        .query(RequestMessages {
            destination,
            before,
            limit,
        })
        .await
    {
        Payload::MessagesInfo(info) => info.messages,
        other => panic!("expected history, got {other:?}"),
    }
}

#[tokio::test]
async fn test_history_pages_backwards() {
    let server = TestServer::new();
    let (mut owner, _member, _, main) = network_with_member(&server).await;
    let channel = Destination::Channel(main.id);

    for text in ["one", "two", "three"] {
        owner.expect_ok(say(channel, text)).await;
    }
    owner.clear_pushes();

    let newest = history(&mut owner, channel, None, Some(2)).await;
    let contents: Vec<&str> = newest.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["two", "three"]);
    assert!(newest[0].id < newest[1].id);

    let older = history(&mut owner, channel, Some(newest[0].id), Some(2)).await;
    assert_eq!(older.len(), 1);
    assert_eq!(older[0].content, "one");
}

#[tokio::test]
async fn test_user_mention_is_recorded() {
    let server = TestServer::new();
    let (mut owner, mut member, _, main) = network_with_member(&server).await;
    let target = member.id();

    owner
        .expect_ok(say(
            Destination::Channel(main.id),
            &format!("hey @{target}, and @nobody"),
        ))
        .await;
    let message = member.next_messages().await.messages.remove(0);
    assert_eq!(message.ping, Some(Ping::User(target)));
}

#[tokio::test]
async fn test_muted_member_cannot_send() {
    let server = TestServer::new();
    let (mut owner, mut member, network, main) = network_with_member(&server).await;
    let member_id = member.id();

    owner
        .expect_ok(SetNetworkUser {
            network_id: network.id,
            user_id: member_id,
            muted: Some(true),
            ..Default::default()
        })
        .await;
    member.clear_pushes();

    member
        .expect_code(
            say(Destination::Channel(main.id), "can you hear me"),
            ErrorCode::Unauthorized,
        )
        .await;
}

#[tokio::test]
async fn test_edit_is_sender_only() {
    let server = TestServer::new();
    let (mut owner, mut member, _, main) = network_with_member(&server).await;

    owner
        .expect_ok(say(Destination::Channel(main.id), "frist"))
        .await;
    let original = member.next_messages().await.messages.remove(0);
    owner.clear_pushes();

    member
        .expect_code(
            EditMessage {
                message_id: original.id,
                content: "hijacked".into(),
            },
            ErrorCode::Unauthorized,
        )
        .await;

    owner
        .expect_ok(EditMessage {
            message_id: original.id,
            content: "first".into(),
        })
        .await;
    let edited = member.next_messages().await.messages.remove(0);
    assert_eq!(edited.id, original.id);
    assert_eq!(edited.content, "first");
    assert!(edited.edited);
}

#[tokio::test]
async fn test_delete_twice_pushes_once() {
    let server = TestServer::new();
    let (mut owner, mut member, _, main) = network_with_member(&server).await;

    owner
        .expect_ok(say(Destination::Channel(main.id), "oops"))
        .await;
    let message = member.next_messages().await.messages.remove(0);
    owner.clear_pushes();

    owner
        .expect_ok(DeleteMessage {
            message_id: message.id,
        })
        .await;
    let tombstone = member.next_messages().await.messages.remove(0);
    assert!(tombstone.deleted);
    assert!(tombstone.content.is_empty());
    owner.clear_pushes();

    owner
        .expect_ok(DeleteMessage {
            message_id: message.id,
        })
        .await;
    owner.assert_quiet().await;
    member.assert_quiet().await;

    owner
        .expect_code(
            EditMessage {
                message_id: message.id,
                content: "back".into(),
            },
            ErrorCode::Unauthorized,
        )
        .await;

    // Tombstones stay in history.
    let page = history(&mut member, Destination::Channel(main.id), None, None).await;
    assert_eq!(page, vec![tombstone]);
}

#[tokio::test]
async fn test_admin_can_delete_member_message() {
    let server = TestServer::new();
    let (mut owner, mut member, _, main) = network_with_member(&server).await;

    member
        .expect_ok(say(Destination::Channel(main.id), "spam"))
        .await;
    let message = owner.next_messages().await.messages.remove(0);
    member.clear_pushes();

    owner
        .expect_ok(DeleteMessage {
            message_id: message.id,
        })
        .await;
    assert!(member.next_messages().await.messages[0].deleted);
}

#[tokio::test]
async fn test_dm_to_self_is_rejected() {
    let server = TestServer::new();
    let mut alice = server.connect(&Identity::generate()).await;
    let me = alice.id();
    alice
        .expect_code(say(Destination::Dm(me), "note to self"), ErrorCode::Validation)
        .await;
}

#[tokio::test]
async fn test_dm_reaches_every_session() {
    let server = TestServer::new();
    let identity = Identity::generate();
    let mut alice = server.connect(&identity).await;
    let mut alice_phone = server.connect(&identity).await;
    let mut bob = server.connect(&Identity::generate()).await;

    let alice_id = alice.id();
    bob.expect_ok(say(Destination::Dm(alice_id), "hi alice"))
        .await;

    let on_desktop = alice.next_messages().await.messages.remove(0);
    let on_phone = alice_phone.next_messages().await.messages.remove(0);
    assert_eq!(on_desktop, on_phone);
    assert_eq!(on_desktop.destination, Destination::Dm(alice_id));

    let page = history(&mut alice, Destination::Dm(bob.id()), None, None).await;
    assert_eq!(page, vec![on_desktop]);
}

#[tokio::test]
async fn test_private_dms_need_an_open_signal() {
    let server = TestServer::new();
    let mut alice = server.connect(&Identity::generate()).await;
    let mut bob = server.connect(&Identity::generate()).await;
    let alice_id = alice.id();
    let bob_id = bob.id();

    alice
        .expect_ok(SetUserData {
            is_public_dm: Some(false),
            ..Default::default()
        })
        .await;
    alice.clear_pushes();

    bob.expect_code(say(Destination::Dm(alice_id), "hello?"), ErrorCode::Unauthorized)
        .await;

    alice
        .expect_ok(TrustUser {
            user_id: bob_id,
            trust: true,
        })
        .await;
    bob.expect_ok(say(Destination::Dm(alice_id), "hello!"))
        .await;
    assert_eq!(alice.next_messages().await.messages[0].content, "hello!");

    // The conversation now exists, so it stays open without the trust.
    alice
        .expect_ok(TrustUser {
            user_id: bob_id,
            trust: false,
        })
        .await;
    bob.clear_pushes();
    bob.expect_ok(say(Destination::Dm(alice_id), "still here"))
        .await;
    assert_eq!(alice.next_messages().await.messages[0].content, "still here");

    alice
        .expect_ok(BlockUser {
            user_id: bob_id,
            block: true,
        })
        .await;
    bob.clear_pushes();
    bob.expect_code(say(Destination::Dm(alice_id), "let me in"), ErrorCode::Unauthorized)
        .await;
    alice
        .expect_code(say(Destination::Dm(bob_id), "bye"), ErrorCode::Unauthorized)
        .await;
}

#[tokio::test]
async fn test_blocker_gets_no_channel_pushes_from_blocked() {
    let server = TestServer::new();
    let (mut owner, mut member, _, main) = network_with_member(&server).await;
    let channel = Destination::Channel(main.id);
    let owner_id = owner.id();

    member
        .expect_ok(BlockUser {
            user_id: owner_id,
            block: true,
        })
        .await;

    owner.expect_ok(say(channel, "can anyone hear me")).await;
    assert_eq!(owner.next_messages().await.messages[0].content, "can anyone hear me");
    member.assert_quiet().await;
    assert!(history(&mut member, channel, None, None).await.is_empty());

    member
        .expect_ok(BlockUser {
            user_id: owner_id,
            block: false,
        })
        .await;
    owner.expect_ok(say(channel, "hello again")).await;
    assert_eq!(member.next_messages().await.messages[0].content, "hello again");
}

#[tokio::test]
async fn test_concurrent_senders_see_increasing_ids() {
    const PER_SENDER: usize = 25;

    let server = TestServer::new();
    let (mut owner, mut member, network, main) = network_with_member(&server).await;
    let mut observer = server.connect(&Identity::generate()).await;
    observer.join(network.id).await;
    let channel = Destination::Channel(main.id);

    tokio::join!(
        async {
            for i in 0..PER_SENDER {
                owner.send(say(channel, &format!("owner {i}"))).await;
            }
        },
        async {
            for i in 0..PER_SENDER {
                member.send(say(channel, &format!("member {i}"))).await;
            }
        },
    );

    let mut ids = Vec::with_capacity(2 * PER_SENDER);
    while ids.len() < 2 * PER_SENDER {
        match observer.recv().await {
            Payload::MessagesInfo(info) => ids.extend(info.messages.iter().map(|m| m.id)),
            other => panic!("expected messages, got {other:?}"),
        }
    }
    assert!(
        ids.windows(2).all(|w| w[0] < w[1]),
        "ids arrived out of order: {ids:?}"
    );

    // Same order for a sender's own view, between its replies.
    let mut seen = Vec::new();
    while seen.len() < 2 * PER_SENDER {
        if let Payload::MessagesInfo(info) = owner.next_push().await {
            seen.extend(info.messages.iter().map(|m| m.id));
        }
    }
    assert_eq!(seen, ids);
}
