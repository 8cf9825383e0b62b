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

//! Integration tests: live channel authentication, faults and recovery.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use carechat::channel::ws::WsConnector;
use carechat::channel::{ChannelError, ChannelState};
use carechat::history::{HistoryError, HttpHistoryLoader};
use carechat::scope::{ConversationScope, ScopeConfig, ScopeError, ScopeStatus, ScopeUpdate};
use carechat::session::{AuthToken, Session};
use carechat_proto::participant::{Participant, Role};
use carechat_relay::auth::{Account, Directory};
use carechat_relay::relay::{self, RelayState};

type Scope = ConversationScope<WsConnector, HttpHistoryLoader>;

fn participant(id: &str, role: Role) -> Participant {
    Participant::new(id, role, id.to_uppercase())
}

async fn start_relay() -> (SocketAddr, Arc<RelayState>) {
    let accounts = [
        ("tok-u1", "u1", Role::Client),
        ("tok-c1", "c1", Role::Counselor),
        ("tok-a1", "a1", Role::AdminObserver),
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

fn scope(addr: SocketAddr, token: &str, owner: Participant) -> Scope {
    let session = Session::new(AuthToken::new(token), owner);
    let loader = HttpHistoryLoader::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap();
    let connector = WsConnector::new(format!("ws://{addr}/ws"));
    ConversationScope::new(session, connector, Arc::new(loader), ScopeConfig::default())
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

#[tokio::test]
async fn unknown_token_is_unauthorized_everywhere() {
    let (addr, _state) = start_relay().await;
    let mut scope = scope(addr, "stolen", participant("u1", Role::Client));

    let err = scope.connect().await.unwrap_err();
    assert!(matches!(err, ScopeError::Channel(ChannelError::Unauthorized(_))));
    assert_eq!(scope.status(), &ScopeStatus::Unauthorized);
    assert_eq!(scope.channel_state(), ChannelState::Disconnected);

    scope
        .select_partner(&participant("c1", Role::Counselor).to_raw())
        .unwrap();
    let update = wait_for(&mut scope, |u| matches!(u, ScopeUpdate::HistoryFailed(_))).await;
    assert_eq!(update, ScopeUpdate::HistoryFailed(HistoryError::Unauthorized));
    assert_eq!(scope.status(), &ScopeStatus::Unauthorized);
    assert!(scope.messages().is_empty());
}

#[tokio::test]
async fn connect_is_idempotent() {
    let (addr, state) = start_relay().await;
    let u1 = participant("u1", Role::Client);
    let mut scope = scope(addr, "tok-u1", u1.clone());

    scope.connect().await.unwrap();
    scope.connect().await.unwrap();
    assert_eq!(scope.channel_state(), ChannelState::Connected);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.connection_count(&u1.id).await, 1);
}

#[tokio::test]
async fn send_requires_partner_and_permission() {
    let (addr, _state) = start_relay().await;

    let mut client = scope(addr, "tok-u1", participant("u1", Role::Client));
    client.connect().await.unwrap();
    assert_eq!(client.send("hi").await, Err(ScopeError::NoPartner));

    let mut observer = scope(addr, "tok-a1", participant("a1", Role::AdminObserver));
    observer.connect().await.unwrap();
    observer
        .select_partner(&participant("u1", Role::Client).to_raw())
        .unwrap();
    assert_eq!(
        observer.send("hi").await,
        Err(ScopeError::SendNotPermitted(Role::AdminObserver))
    );
}

#[tokio::test]
async fn send_without_connection_fails_but_history_loads() {
    let (addr, _state) = start_relay().await;
    let mut scope = scope(addr, "tok-u1", participant("u1", Role::Client));

    scope
        .select_partner(&participant("c1", Role::Counselor).to_raw())
        .unwrap();
    assert_eq!(scope.channel_fault(), Some(&ChannelError::Disconnected));
    loaded(&mut scope).await;
    assert_eq!(scope.status(), &ScopeStatus::Ready);

    assert_eq!(
        scope.send("hello").await,
        Err(ScopeError::Channel(ChannelError::Disconnected))
    );
}

#[tokio::test]
async fn relay_rejection_is_reported_without_dropping_the_channel() {
    let (addr, _state) = start_relay().await;
    let mut scope = scope(addr, "tok-u1", participant("u1", Role::Client));
    scope.connect().await.unwrap();

    // Role does not match the relay's directory entry for c1.
    scope
        .select_partner(&participant("c1", Role::Client).to_raw())
        .unwrap();
    loaded(&mut scope).await;
    scope.send("hello").await.unwrap();

    let update = wait_for(&mut scope, |u| {
        matches!(u, ScopeUpdate::SendRejected(_) | ScopeUpdate::ChannelFault(_))
    })
    .await;
    let ScopeUpdate::SendRejected(reason) = update else {
        panic!("expected a rejected send, got {update:?}");
    };
    assert!(reason.contains("c1"));
    assert!(scope.channel_fault().is_none());
    assert_eq!(scope.status(), &ScopeStatus::Ready);
    assert!(matches!(scope.channel_state(), ChannelState::Subscribed(_)));
}

#[tokio::test]
async fn relay_disconnect_then_reconnect_resumes_live_updates() {
    let (addr, state) = start_relay().await;
    let u1 = participant("u1", Role::Client);
    let c1 = participant("c1", Role::Counselor);

    let mut client = scope(addr, "tok-u1", u1.clone());
    client.connect().await.unwrap();
    client.select_partner(&c1.to_raw()).unwrap();
    loaded(&mut client).await;

    state.close_all_connections().await;
    let update = wait_for(&mut client, |u| matches!(u, ScopeUpdate::ChannelFault(_))).await;
    let ScopeUpdate::ChannelFault(fault) = update else {
        unreachable!()
    };
    assert!(fault.is_connection_lost());
    assert!(client.channel_fault().is_some());

    let before = client.generation();
    let generation = client.reconnect().await.unwrap();
    assert!(generation.is_some_and(|g| g > before));
    assert!(client.channel_fault().is_none());
    loaded(&mut client).await;

    let mut counselor = scope(addr, "tok-c1", c1);
    counselor.connect().await.unwrap();
    counselor.select_partner(&u1.to_raw()).unwrap();
    loaded(&mut counselor).await;
    counselor.send("are you back?").await.unwrap();

    wait_for(&mut client, |u| matches!(u, ScopeUpdate::Appended { .. })).await;
    assert_eq!(client.messages().last().unwrap().body, "are you back?");
}

#[tokio::test]
async fn ending_the_session_releases_the_connection() {
    let (addr, state) = start_relay().await;
    let u1 = participant("u1", Role::Client);
    let mut scope = scope(addr, "tok-u1", u1.clone());
    scope.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.connection_count(&u1.id).await, 1);

    scope.end_session().await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while state.connection_count(&u1.id).await > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("relay should drop the connection");
}
