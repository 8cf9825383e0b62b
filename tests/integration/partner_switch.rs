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

//! Integration tests: switching the active partner against a real relay.
//!
//! A switch must never show history or live messages that belong to the
//! previous partner, no matter how the relay's responses interleave.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use carechat::channel::ChannelState;
use carechat::channel::ws::WsConnector;
use carechat::history::HttpHistoryLoader;
use carechat::scope::{ConversationScope, ScopeConfig, ScopeStatus, ScopeUpdate};
use carechat::session::{AuthToken, Session};
use carechat_proto::conversation::ConversationKey;
use carechat_proto::message::{MessageId, MessageRecord};
use carechat_proto::participant::{Participant, RawParticipant, Role};
use carechat_relay::auth::{Account, Directory};
use carechat_relay::relay::{self, RelayState};
use chrono::DateTime;

type Scope = ConversationScope<WsConnector, HttpHistoryLoader>;

fn participant(id: &str, role: Role) -> Participant {
    Participant::new(id, role, id.to_uppercase())
}

async fn start_relay() -> (SocketAddr, Arc<RelayState>) {
    let accounts = [
        ("tok-u1", "u1", Role::Client),
        ("tok-c1", "c1", Role::Counselor),
        ("tok-c2", "c2", Role::Counselor),
    ]
    .map(|(token, id, role)| Account {
        token: token.to_string(),
        id: id.to_string(),
        role,
        name: id.to_uppercase(),
    });
    let state = Arc::new(RelayState::new(Directory::new(accounts)));
    let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("relay should start");
    (addr, state)
}

async fn open_scope(addr: SocketAddr, token: &str, owner: Participant) -> Scope {
    let session = Session::new(AuthToken::new(token), owner);
    let loader = HttpHistoryLoader::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap();
    let connector = WsConnector::new(format!("ws://{addr}/ws"));
    let mut scope = ConversationScope::new(session, connector, Arc::new(loader), ScopeConfig::default());
    scope.connect().await.expect("connect should succeed");
    scope
}

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

async fn loaded(scope: &mut Scope) {
    wait_for(scope, |u| matches!(u, ScopeUpdate::HistoryLoaded { .. })).await;
}

async fn seed(state: &RelayState, from: &Participant, to: &Participant, body: &str, secs: i64) {
    let record = MessageRecord {
        id: Some(MessageId::generate()),
        sender: from.to_raw(),
        receiver: to.to_raw(),
        message: body.to_string(),
        timestamp: DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap(),
    };
    state
        .store
        .append(ConversationKey::between(from, to), record)
        .await;
}

fn bodies(scope: &Scope) -> Vec<&str> {
    scope.messages().iter().map(|m| m.body.as_str()).collect()
}

#[tokio::test]
async fn switch_replaces_history() {
    let (addr, state) = start_relay().await;
    let u1 = participant("u1", Role::Client);
    let c1 = participant("c1", Role::Counselor);
    let c2 = participant("c2", Role::Counselor);
    seed(&state, &c1, &u1, "from c1", 0).await;
    seed(&state, &c2, &u1, "from c2", 0).await;

    let mut scope = open_scope(addr, "tok-u1", u1.clone()).await;
    scope.select_partner(&c1.to_raw()).unwrap();
    loaded(&mut scope).await;
    assert_eq!(bodies(&scope), ["from c1"]);

    scope.select_partner(&c2.to_raw()).unwrap();
    assert_eq!(scope.status(), &ScopeStatus::Loading);
    assert!(scope.messages().is_empty());
    loaded(&mut scope).await;

    assert_eq!(bodies(&scope), ["from c2"]);
    assert_eq!(
        scope.channel_state(),
        ChannelState::Subscribed(ConversationKey::between(&u1, &c2))
    );
}

#[tokio::test]
async fn rapid_switch_shows_only_the_last_partner() {
    let (addr, state) = start_relay().await;
    let u1 = participant("u1", Role::Client);
    let c1 = participant("c1", Role::Counselor);
    let c2 = participant("c2", Role::Counselor);
    for i in 0..50 {
        seed(&state, &c1, &u1, &format!("c1 #{i}"), i).await;
    }
    seed(&state, &c2, &u1, "from c2", 0).await;

    let mut scope = open_scope(addr, "tok-u1", u1.clone()).await;
    let first = scope.select_partner(&c1.to_raw()).unwrap();
    let second = scope.select_partner(&c2.to_raw()).unwrap();
    assert!(second > first);

    loaded(&mut scope).await;
    assert_eq!(scope.generation(), second);
    assert_eq!(bodies(&scope), ["from c2"]);

    let key = ConversationKey::between(&u1, &c2);
    assert_eq!(scope.conversation(), Some(&key));
    assert!(scope.messages().iter().all(|m| m.belongs_to(&key)));
}

#[tokio::test]
async fn previous_partner_messages_are_not_shown_after_switch() {
    let (addr, _state) = start_relay().await;
    let u1 = participant("u1", Role::Client);
    let c1 = participant("c1", Role::Counselor);
    let c2 = participant("c2", Role::Counselor);

    let mut client = open_scope(addr, "tok-u1", u1.clone()).await;
    let mut first = open_scope(addr, "tok-c1", c1.clone()).await;
    let mut second = open_scope(addr, "tok-c2", c2.clone()).await;
    for (scope, partner) in [(&mut first, &u1), (&mut second, &u1)] {
        scope.select_partner(&partner.to_raw()).unwrap();
        loaded(scope).await;
    }

    client.select_partner(&c1.to_raw()).unwrap();
    loaded(&mut client).await;
    client.select_partner(&c2.to_raw()).unwrap();
    loaded(&mut client).await;

    first.send("late from c1").await.unwrap();
    wait_for(&mut first, |u| matches!(u, ScopeUpdate::Appended { .. })).await;
    second.send("hello from c2").await.unwrap();

    wait_for(&mut client, |u| matches!(u, ScopeUpdate::Appended { .. })).await;
    assert_eq!(bodies(&client), ["hello from c2"]);

    // Switching back picks the message up from history.
    client.select_partner(&c1.to_raw()).unwrap();
    loaded(&mut client).await;
    assert_eq!(bodies(&client), ["late from c1"]);
}

#[tokio::test]
async fn reselecting_the_same_partner_reloads() {
    let (addr, state) = start_relay().await;
    let u1 = participant("u1", Role::Client);
    let c1 = participant("c1", Role::Counselor);
    seed(&state, &c1, &u1, "hello", 0).await;

    let mut scope = open_scope(addr, "tok-u1", u1.clone()).await;
    scope.select_partner(&c1.to_raw()).unwrap();
    loaded(&mut scope).await;

    seed(&state, &u1, &c1, "added elsewhere", 1).await;
    let generation = scope.select_partner(&c1.to_raw()).unwrap();
    loaded(&mut scope).await;

    assert_eq!(scope.generation(), generation);
    assert_eq!(bodies(&scope), ["hello", "added elsewhere"]);
}

#[tokio::test]
async fn unidentifiable_partner_keeps_current_conversation() {
    let (addr, state) = start_relay().await;
    let u1 = participant("u1", Role::Client);
    let c1 = participant("c1", Role::Counselor);
    seed(&state, &c1, &u1, "hello", 0).await;

    let mut scope = open_scope(addr, "tok-u1", u1).await;
    let generation = scope.select_partner(&c1.to_raw()).unwrap();
    loaded(&mut scope).await;

    let nobody = RawParticipant {
        id: None,
        legacy_id: Some("  ".to_string()),
        role: Role::Counselor,
        name: Some("Ghost".to_string()),
    };
    assert!(scope.select_partner(&nobody).is_err());

    assert_eq!(scope.generation(), generation);
    assert_eq!(scope.partner().map(|p| p.id.as_str()), Some("c1"));
    assert_eq!(bodies(&scope), ["hello"]);
}
