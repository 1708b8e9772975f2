//! Integration tests for end-to-end room collaboration.
//!
//! These tests start a real relay (WebSocket + lobby API) and connect real
//! sessions, verifying the full sync pipeline.

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use vizroom_collab::lobby::{JoinLobbyPayload, RoomLifecycleClient};
use vizroom_collab::protocol::{
    encode_event, Decoded, Frame, JoinRoom, ObjectGrabbed, ParticipantInfo, RoomEvent, SelfConnected,
};
use vizroom_collab::server::{ServerConfig, SyncServer};
use vizroom_collab::session::{CollabSession, SessionConfig, SessionNotice};
use vizroom_collab::transport::{Transport, TransportConfig, TransportError, TransportEvent};
use vizroom_collab::ConnectionStatus;
use vizroom_core::{
    Color, EntityReference, EntityType, LandscapeRef, Pose, Scene, SerializedApp, SerializedRoom, Transform, Vec3,
};

struct TestRelay {
    ws_url: String,
    http_url: String,
}

/// Find two distinct free ports for testing.
async fn free_ports() -> (u16, u16) {
    let a = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let b = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    (a.local_addr().unwrap().port(), b.local_addr().unwrap().port())
}

/// Start a relay on free ports.
async fn start_test_server() -> TestRelay {
    let (ws_port, http_port) = free_ports().await;
    let config = ServerConfig {
        ws_bind_addr: format!("127.0.0.1:{ws_port}"),
        http_bind_addr: format!("127.0.0.1:{http_port}"),
        max_participants_per_room: 10,
        broadcast_capacity: 64,
        ..ServerConfig::default()
    };
    let server = SyncServer::new(config);
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    TestRelay {
        ws_url: format!("ws://127.0.0.1:{ws_port}"),
        http_url: format!("http://127.0.0.1:{http_port}"),
    }
}

fn seeded_room() -> SerializedRoom {
    let mut room = SerializedRoom::empty(LandscapeRef::new("landscape-1", 1_700_000_000_000));
    room.open_apps
        .push(SerializedApp::new("shop", &Transform::at(Vec3::new(0.0, 0.0, -2.0))));
    room
}

async fn create_room(relay: &TestRelay) -> String {
    let lobby = RoomLifecycleClient::new(&relay.http_url, None);
    lobby.create_room(None, &seeded_room()).await.unwrap().room_id
}

async fn ticket(relay: &TestRelay, room_id: &str, name: &str) -> String {
    let lobby = RoomLifecycleClient::new(&relay.http_url, None);
    let payload = JoinLobbyPayload {
        user_name: name.into(),
        device_id: "desktop".into(),
        camera: Pose::default(),
    };
    lobby.join_lobby(room_id, &payload).await.unwrap().ticket_id
}

/// Apply inbound events until one produces a notice.
async fn next_notice(session: &mut CollabSession, events: &mut mpsc::Receiver<TransportEvent>) -> SessionNotice {
    timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if let Some(notice) = session.handle(event).await {
                return notice;
            }
        }
    })
    .await
    .expect("no notice within timeout")
}

/// Apply inbound events until `done` holds.
async fn pump_until(
    session: &mut CollabSession,
    events: &mut mpsc::Receiver<TransportEvent>,
    done: impl Fn(&CollabSession) -> bool,
) {
    timeout(Duration::from_secs(2), async {
        while !done(session) {
            let event = events.recv().await.expect("event channel closed");
            session.handle(event).await;
        }
    })
    .await
    .expect("condition not reached within timeout");
}

/// Connect and consume the handshake (`self_connected` + `initial_landscape`).
async fn join(relay: &TestRelay, room_id: &str, name: &str) -> (CollabSession, mpsc::Receiver<TransportEvent>) {
    let ticket_id = ticket(relay, room_id, name).await;
    let mut session = CollabSession::new(Scene::new(), SessionConfig::default());
    let mut events = session.connect(&relay.ws_url, &ticket_id).await.unwrap();

    match next_notice(&mut session, &mut events).await {
        SessionNotice::Connected { .. } => {}
        other => panic!("Expected Connected, got {other:?}"),
    }
    match next_notice(&mut session, &mut events).await {
        SessionNotice::RoomRestored(_) => {}
        other => panic!("Expected RoomRestored, got {other:?}"),
    }
    (session, events)
}

#[tokio::test]
async fn test_server_accepts_connections() {
    let relay = start_test_server().await;
    let result = tokio_tungstenite::connect_async(&relay.ws_url).await;
    assert!(result.is_ok(), "Should connect to server");
}

#[tokio::test]
async fn test_client_connects_and_receives_state() {
    let relay = start_test_server().await;
    let room_id = create_room(&relay).await;
    let (session, _events) = join(&relay, &room_id, "Alice").await;

    assert_eq!(session.transport().status().await, ConnectionStatus::Online);
    assert!(session.presence().is_online());
    assert!(session.scene().is_app_open("shop"));
    assert_eq!(session.scene().landscape_ref().landscape_token, "landscape-1");
    let world = session.scene().app_world_transform("shop").unwrap();
    assert!(world.approx_eq(&Transform::at(Vec3::new(0.0, 0.0, -2.0))));
}

#[tokio::test]
async fn test_two_clients_see_each_other() {
    let relay = start_test_server().await;
    let room_id = create_room(&relay).await;
    let (mut alice, mut alice_events) = join(&relay, &room_id, "Alice").await;
    let (mut bob, _bob_events) = join(&relay, &room_id, "Bob").await;

    let bob_id = bob.local_id();
    match next_notice(&mut alice, &mut alice_events).await {
        SessionNotice::UserJoined(id) => assert_eq!(id, bob_id),
        other => panic!("Expected UserJoined, got {other:?}"),
    }

    // Bob learned about Alice from the roster
    let alice_id = alice.local_id();
    assert!(bob.presence().get(alice_id).is_some());
    assert_ne!(
        alice.presence().get(bob_id).unwrap().color,
        alice.presence().local().unwrap().color
    );

    bob.disconnect().await;
    match next_notice(&mut alice, &mut alice_events).await {
        SessionNotice::UserLeft(id) => assert_eq!(id, bob_id),
        other => panic!("Expected UserLeft, got {other:?}"),
    }
    assert!(alice.presence().get(bob_id).is_none());
}

#[tokio::test]
async fn test_highlight_propagates() {
    let relay = start_test_server().await;
    let room_id = create_room(&relay).await;
    let (mut alice, _alice_events) = join(&relay, &room_id, "Alice").await;
    let (mut bob, mut bob_events) = join(&relay, &room_id, "Bob").await;

    let entity = EntityReference::in_app("shop", EntityType::Clazz, "Cart");
    assert_eq!(alice.toggle_highlight(&entity).await.unwrap(), Some(true));

    pump_until(&mut bob, &mut bob_events, |s| s.scene().is_highlighted(&entity)).await;
}

#[tokio::test]
async fn test_grab_is_exclusive() {
    let relay = start_test_server().await;
    let room_id = create_room(&relay).await;
    let (mut alice, _alice_events) = join(&relay, &room_id, "Alice").await;
    let (mut bob, _bob_events) = join(&relay, &room_id, "Bob").await;

    assert!(alice.grab("shop").await.unwrap());
    assert!(alice.ownership().holds("shop"));
    assert!(!bob.grab("shop").await.unwrap());
    assert!(!bob.ownership().holds("shop"));

    alice.release("shop").await.unwrap();
    let mut granted = false;
    for _ in 0..20 {
        if bob.grab("shop").await.unwrap() {
            granted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(granted, "Bob should get the object after Alice released it");
}

#[tokio::test]
async fn test_simultaneous_grabs_grant_exactly_one() {
    let relay = start_test_server().await;
    let room_id = create_room(&relay).await;
    let (mut alice, _alice_events) = join(&relay, &room_id, "Alice").await;
    let (mut bob, _bob_events) = join(&relay, &room_id, "Bob").await;

    let (alice_got, bob_got) = tokio::join!(alice.grab("shop"), bob.grab("shop"));
    let (alice_got, bob_got) = (alice_got.unwrap(), bob_got.unwrap());
    assert!(alice_got ^ bob_got, "alice={alice_got} bob={bob_got}");
    assert_eq!(alice.ownership().holds("shop"), alice_got);
    assert_eq!(bob.ownership().holds("shop"), bob_got);
}

#[tokio::test]
async fn test_grab_resolves_while_events_are_undrained() {
    let relay = start_test_server().await;
    let room_id = create_room(&relay).await;
    let (mut alice, mut alice_events) = join(&relay, &room_id, "Alice").await;
    let (bob, _bob_events) = join(&relay, &room_id, "Bob").await;

    // Far more traffic than Alice's event channel holds
    for i in 0..1500u32 {
        bob.ping((i % 2) as u8, true).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let granted = timeout(Duration::from_secs(3), alice.grab("shop"))
        .await
        .expect("grab must resolve with a full event channel")
        .unwrap();
    assert!(granted);

    // Events still flow once drained
    let ping = timeout(Duration::from_secs(2), async {
        loop {
            if let SessionNotice::Ping { user_id, .. } = next_notice(&mut alice, &mut alice_events).await {
                return user_id;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(ping, bob.local_id());
}

#[tokio::test]
async fn test_moved_object_reaches_other_client() {
    let relay = start_test_server().await;
    let room_id = create_room(&relay).await;
    let (mut alice, _alice_events) = join(&relay, &room_id, "Alice").await;
    let (mut bob, mut bob_events) = join(&relay, &room_id, "Bob").await;

    assert!(alice.grab("shop").await.unwrap());
    let target = Transform::at(Vec3::new(3.0, 1.0, -5.0));
    alice.move_object("shop", &target).await.unwrap();

    pump_until(&mut bob, &mut bob_events, |s| {
        s.scene()
            .app_world_transform("shop")
            .is_some_and(|t| t.approx_eq(&target))
    })
    .await;
}

#[tokio::test]
async fn test_detached_menu_gets_relay_id() {
    let relay = start_test_server().await;
    let room_id = create_room(&relay).await;
    let (mut alice, _alice_events) = join(&relay, &room_id, "Alice").await;
    let (mut bob, mut bob_events) = join(&relay, &room_id, "Bob").await;

    let menu_id = alice
        .detach_menu("Cart", EntityType::Clazz, &Transform::at(Vec3::new(0.0, 1.5, -1.0)))
        .await
        .unwrap()
        .expect("anchor resolves");
    assert!(alice.scene().menu(&menu_id).is_some());

    let alice_id = alice.local_id();
    pump_until(&mut bob, &mut bob_events, |s| s.scene().menu(&menu_id).is_some()).await;
    assert_eq!(bob.scene().menu(&menu_id).unwrap().owner_user_id, Some(alice_id));

    assert!(alice.close_menu(&menu_id).await.unwrap());
    pump_until(&mut bob, &mut bob_events, |s| s.scene().menu(&menu_id).is_none()).await;
}

#[tokio::test]
async fn test_late_joiner_receives_room_state() {
    let relay = start_test_server().await;
    let room_id = create_room(&relay).await;
    let (mut alice, _alice_events) = join(&relay, &room_id, "Alice").await;

    alice
        .open_app("payments", &Transform::at(Vec3::new(4.0, 0.0, -2.0)))
        .await
        .unwrap();
    let entity = EntityReference::in_app("payments", EntityType::Component, "billing");
    alice.toggle_highlight(&entity).await.unwrap();
    // A respondable round trip orders everything sent before it
    assert!(alice.grab("payments").await.unwrap());

    let (carol, _carol_events) = join(&relay, &room_id, "Carol").await;
    assert!(carol.scene().is_app_open("shop"));
    assert!(carol.scene().is_app_open("payments"));
    assert!(carol.scene().is_highlighted(&entity));
    assert!(carol.presence().get(alice.local_id()).is_some());
}

#[tokio::test]
async fn test_pings_never_echo_to_sender() {
    let relay = start_test_server().await;
    let room_id = create_room(&relay).await;
    let (mut alice, mut alice_events) = join(&relay, &room_id, "Alice").await;
    let (bob, _bob_events) = join(&relay, &room_id, "Bob").await;

    alice.ping(0, true).await.unwrap();
    bob.ping(1, true).await.unwrap();

    let bob_id = bob.local_id();
    let ping = timeout(Duration::from_secs(2), async {
        loop {
            if let SessionNotice::Ping { user_id, controller_id, .. } =
                next_notice(&mut alice, &mut alice_events).await
            {
                return (user_id, controller_id);
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(ping, (bob_id, 1));
}

#[tokio::test]
async fn test_spectating_is_visible_to_target() {
    let relay = start_test_server().await;
    let room_id = create_room(&relay).await;
    let (mut alice, mut alice_events) = join(&relay, &room_id, "Alice").await;
    let (mut bob, _bob_events) = join(&relay, &room_id, "Bob").await;

    let (alice_id, bob_id) = (alice.local_id(), bob.local_id());
    bob.start_spectating(Some(alice_id)).await.unwrap();
    assert!(bob.spectate().is_active());

    pump_until(&mut alice, &mut alice_events, |s| {
        s.presence().spectators_of(alice_id) == vec![bob_id]
    })
    .await;
}

#[tokio::test]
async fn test_invalid_ticket_rejected() {
    let relay = start_test_server().await;
    create_room(&relay).await;

    let mut session = CollabSession::new(Scene::new(), SessionConfig::default());
    let mut events = session.connect(&relay.ws_url, "not-a-ticket").await.unwrap();
    match next_notice(&mut session, &mut events).await {
        SessionNotice::Disconnected { reason } => assert!(reason.contains("ticket"), "reason: {reason}"),
        other => panic!("Expected Disconnected, got {other:?}"),
    }
    assert_eq!(session.transport().status().await, ConnectionStatus::Offline);
}

#[tokio::test]
async fn test_offline_session_uses_fallbacks() {
    let mut session = CollabSession::new(Scene::new(), SessionConfig::default());
    session
        .open_app("shop", &Transform::IDENTITY)
        .await
        .unwrap();

    assert!(session.grab("shop").await.unwrap());
    let menu = session
        .detach_menu("Cart", EntityType::Clazz, &Transform::IDENTITY)
        .await
        .unwrap();
    assert!(menu.is_some());
    assert!(session.close_app("shop").await.unwrap());
    assert!(!session.scene().is_app_open("shop"));
    assert_eq!(session.transport().pending_requests().await, 0);
}

/// Next binary frame from a raw socket.
async fn next_frame<S>(rx: &mut S) -> Frame
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = timeout(Duration::from_secs(2), rx.next()).await.unwrap().unwrap().unwrap();
        if let Message::Binary(data) = msg {
            return Frame::decode(&data).unwrap();
        }
    }
}

#[tokio::test]
async fn test_unknown_event_is_ignored_by_relay() {
    let relay = start_test_server().await;
    let room_id = create_room(&relay).await;
    let ticket_id = ticket(&relay, &room_id, "Raw").await;

    let (ws, _) = tokio_tungstenite::connect_async(&relay.ws_url).await.unwrap();
    let (mut tx, mut rx) = ws.split();
    let join = encode_event(&RoomEvent::Join(JoinRoom { ticket_id }), None, None).unwrap();
    tx.send(Message::Binary(join.into())).await.unwrap();

    assert_eq!(next_frame(&mut rx).await.event, "self_connected");
    assert_eq!(next_frame(&mut rx).await.event, "initial_landscape");

    let future_event = Frame {
        event: "hologram_update".into(),
        nonce: None,
        user_id: None,
        compressed: false,
        body: vec![1, 2, 3],
    };
    tx.send(Message::Binary(future_event.encode().unwrap().into())).await.unwrap();

    // The connection survives and still answers requests
    let grab = encode_event(
        &RoomEvent::ObjectGrabbed(ObjectGrabbed { object_id: "shop".into() }),
        Some(42),
        Some(Uuid::nil()),
    )
    .unwrap();
    tx.send(Message::Binary(grab.into())).await.unwrap();
    let reply = next_frame(&mut rx).await;
    assert_eq!(reply.nonce, Some(42));
    assert!(matches!(
        reply.decoded().unwrap(),
        Decoded::Known(RoomEvent::ObjectGrabbedResponse(r)) if r.is_success
    ));
}

#[tokio::test]
async fn test_unanswered_request_times_out() {
    // Relay stand-in: acknowledges the join, then never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut tx, mut rx) = ws.split();
        next_frame(&mut rx).await;
        let own = ParticipantInfo {
            id: Uuid::new_v4(),
            name: "silent".into(),
            color: Color::from_index(0),
            camera: Pose::default(),
        };
        let ack = encode_event(&RoomEvent::SelfConnected(SelfConnected { own, users: vec![] }), None, None).unwrap();
        tx.send(Message::Binary(ack.into())).await.unwrap();
        while rx.next().await.is_some() {}
    });

    let mut transport = Transport::new(TransportConfig {
        response_timeout: Some(Duration::from_millis(100)),
        ..TransportConfig::default()
    });
    let join = JoinRoom { ticket_id: "t".into() };
    let mut events = transport.connect(&format!("ws://127.0.0.1:{port}"), join).await.unwrap();
    timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
    assert!(transport.is_online().await);

    let grab = RoomEvent::ObjectGrabbed(ObjectGrabbed { object_id: "shop".into() });
    let result = transport
        .send_respondable(grab, |_| Some(true), true)
        .await;
    assert!(matches!(result, Err(TransportError::Timeout(_))));
    assert_eq!(transport.pending_requests().await, 0);
}
