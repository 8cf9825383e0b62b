// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests: history load followed by live delivery.
//!
//! Each test runs a real relay on an ephemeral port and drives
//! [`ConversationScope`] through the WebSocket connector and the HTTP
//! history loader.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use carechat::channel::ChannelState;
use carechat::channel::ws::WsConnector;
use carechat::history::HttpHistoryLoader;
use carechat::scope::{ConversationScope, ScopeConfig, ScopeStatus, ScopeUpdate};
use carechat::session::{AuthToken, Session};
use carechat_proto::conversation::ConversationKey;
use carechat_proto::message::{MessageId, MessageRecord, Origin};
use carechat_proto::participant::{Participant, ParticipantId, RawParticipant, Role};
use carechat_relay::assistant::{Assistant, AssistantConfig};
use carechat_relay::auth::{Account, Directory};
use carechat_relay::relay::{self, RelayState};
use carechat_relay::store::ConversationStore;
use chrono::{DateTime, Utc};

type Scope = ConversationScope<WsConnector, HttpHistoryLoader>;

fn account(token: &str, id: &str, role: Role) -> Account {
    Account {
        token: token.to_string(),
        id: id.to_string(),
        role,
        name: id.to_uppercase(),
    }
}

fn directory() -> Directory {
    Directory::new([
        account("tok-u1", "u1", Role::Client),
        account("tok-c1", "c1", Role::Counselor),
    ])
}

async fn start_relay(state: RelayState) -> (SocketAddr, Arc<RelayState>) {
    let state = Arc::new(state);
    let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("relay should start");
    (addr, state)
}

fn participant(id: &str, role: Role) -> Participant {
    Participant::new(id, role, id.to_uppercase())
}

async fn open_scope(addr: SocketAddr, token: &str, owner: Participant) -> Scope {
    let session = Session::new(AuthToken::new(token), owner);
    let loader = HttpHistoryLoader::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap();
    let connector = WsConnector::new(format!("ws://{addr}/ws"));
    let mut scope = ConversationScope::new(session, connector, Arc::new(loader), ScopeConfig::default());
    scope.connect().await.expect("connect should succeed");
    scope
}

/// Pulls updates until `pred` matches, failing after five seconds.
async fn wait_for(scope: &mut Scope, pred: impl Fn(&ScopeUpdate) -> bool) -> ScopeUpdate {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let update = scope.next_update().await;
            if pred(&update) {
                return update;
            }
        }
    })
    .await
    .expect("timed out waiting for scope update")
}

async fn select_and_load(scope: &mut Scope, partner: &Participant) -> usize {
    scope.select_partner(&partner.to_raw()).unwrap();
    match wait_for(scope, |u| {
        matches!(u, ScopeUpdate::HistoryLoaded { .. } | ScopeUpdate::HistoryFailed(_))
    })
    .await
    {
        ScopeUpdate::HistoryLoaded { len } => len,
        other => panic!("history failed: {other:?}"),
    }
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn stored(sender: &Participant, receiver: &Participant, body: &str, secs: i64) -> MessageRecord {
    MessageRecord {
        id: Some(MessageId::generate()),
        sender: sender.to_raw(),
        receiver: receiver.to_raw(),
        message: body.to_string(),
        timestamp: at(secs),
    }
}

fn bodies(scope: &Scope) -> Vec<&str> {
    scope.messages().iter().map(|m| m.body.as_str()).collect()
}

#[tokio::test]
async fn history_is_loaded_in_chronological_order() {
    let (addr, state) = start_relay(RelayState::new(directory())).await;
    let u1 = participant("u1", Role::Client);
    let c1 = participant("c1", Role::Counselor);
    let key = ConversationKey::between(&u1, &c1);
    state.store.append(key.clone(), stored(&c1, &u1, "second", 20)).await;
    state.store.append(key.clone(), stored(&u1, &c1, "first", 10)).await;

    let mut scope = open_scope(addr, "tok-u1", u1).await;
    assert_eq!(select_and_load(&mut scope, &c1).await, 2);

    assert_eq!(bodies(&scope), ["first", "second"]);
    assert_eq!(scope.status(), &ScopeStatus::Ready);
    assert!(scope.messages().iter().all(|m| m.origin == Origin::Historical));
    assert_eq!(scope.channel_state(), ChannelState::Subscribed(key));
}

#[tokio::test]
async fn live_messages_reach_both_members_after_history() {
    let (addr, state) = start_relay(RelayState::new(directory())).await;
    let u1 = participant("u1", Role::Client);
    let c1 = participant("c1", Role::Counselor);
    state
        .store
        .append(ConversationKey::between(&u1, &c1), stored(&u1, &c1, "earlier", 0))
        .await;

    let mut client = open_scope(addr, "tok-u1", u1.clone()).await;
    let mut counselor = open_scope(addr, "tok-c1", c1.clone()).await;
    select_and_load(&mut client, &c1).await;
    select_and_load(&mut counselor, &u1).await;

    client.send("how are you?").await.unwrap();

    wait_for(&mut client, |u| matches!(u, ScopeUpdate::Appended { .. })).await;
    wait_for(&mut counselor, |u| matches!(u, ScopeUpdate::Appended { .. })).await;

    assert_eq!(bodies(&client), ["earlier", "how are you?"]);
    assert_eq!(bodies(&counselor), ["earlier", "how are you?"]);

    let live = client.messages().last().unwrap();
    assert_eq!(live.origin, Origin::Live);
    assert_eq!(live.sender.id, ParticipantId::new("u1"));
    assert!(live.id.is_some());
}

#[tokio::test]
async fn a_later_session_sees_live_messages_as_history() {
    let (addr, _state) = start_relay(RelayState::new(directory())).await;
    let u1 = participant("u1", Role::Client);
    let c1 = participant("c1", Role::Counselor);

    let mut client = open_scope(addr, "tok-u1", u1.clone()).await;
    select_and_load(&mut client, &c1).await;
    client.send("one").await.unwrap();
    wait_for(&mut client, |u| matches!(u, ScopeUpdate::Appended { .. })).await;
    client.send("two").await.unwrap();
    wait_for(&mut client, |u| matches!(u, ScopeUpdate::Appended { .. })).await;
    let live_ids: Vec<_> = client.messages().iter().map(|m| m.id.clone()).collect();
    client.end_session().await;

    let mut counselor = open_scope(addr, "tok-c1", c1).await;
    assert_eq!(select_and_load(&mut counselor, &u1).await, 2);
    assert_eq!(bodies(&counselor), ["one", "two"]);
    let history_ids: Vec<_> = counselor.messages().iter().map(|m| m.id.clone()).collect();
    assert_eq!(live_ids, history_ids);
}

#[tokio::test]
async fn legacy_partner_identifier_opens_the_same_conversation() {
    let (addr, state) = start_relay(RelayState::new(directory())).await;
    let u1 = participant("u1", Role::Client);
    let c1 = participant("c1", Role::Counselor);
    state
        .store
        .append(ConversationKey::between(&u1, &c1), stored(&c1, &u1, "welcome", 0))
        .await;

    let mut scope = open_scope(addr, "tok-u1", u1).await;
    let legacy = RawParticipant {
        id: None,
        legacy_id: Some("c1".to_string()),
        role: Role::Counselor,
        name: None,
    };
    scope.select_partner(&legacy).unwrap();
    let update = wait_for(&mut scope, |u| matches!(u, ScopeUpdate::HistoryLoaded { .. })).await;

    assert_eq!(update, ScopeUpdate::HistoryLoaded { len: 1 });
    assert_eq!(scope.partner().unwrap().id, ParticipantId::new("c1"));
}

#[tokio::test]
async fn assistant_reply_is_delivered_live() {
    let assistant = Assistant::new(AssistantConfig {
        rules: vec![carechat_relay::assistant::Rule {
            keyword: "sleep".to_string(),
            reply: "Try a regular bedtime.".to_string(),
        }],
        ..AssistantConfig::default()
    });
    let state = RelayState::with_config(directory(), ConversationStore::new(), Some(assistant), 1024);
    let (addr, _state) = start_relay(state).await;

    let u1 = participant("u1", Role::Client);
    let bot = Participant::new("assistant", Role::Assistant, "Assistant");
    let mut scope = open_scope(addr, "tok-u1", u1).await;
    assert_eq!(select_and_load(&mut scope, &bot).await, 0);

    scope.send("I can't sleep").await.unwrap();
    wait_for(&mut scope, |u| *u == ScopeUpdate::Appended { len: 2 }).await;

    assert_eq!(bodies(&scope), ["I can't sleep", "Try a regular bedtime."]);
    assert_eq!(scope.messages()[1].sender.role, Role::Assistant);
}
