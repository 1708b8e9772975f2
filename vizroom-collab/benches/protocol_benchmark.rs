use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use uuid::Uuid;

use vizroom_collab::protocol::{encode_event, Frame, HighlightingUpdate, ObjectMoved, RoomEvent, UserPositions};
use vizroom_collab::room::{RoomSettings, RoomState};
use vizroom_collab::registry::LobbyTicket;
use vizroom_collab::serializer::{restore_room, serialize_room};
use vizroom_collab::BroadcastGroup;
use vizroom_core::{
    Color, EntityReference, EntityType, HighlightRecord, LandscapeRef, Pose, Scene, SerializedRoom, Transform, Vec3,
};

/// A scene with `apps` open applications, each with a few open components
/// and one highlight.
fn populated_scene(apps: usize) -> Scene {
    let mut scene = Scene::new();
    scene.set_landscape_ref(LandscapeRef::new("bench", 0));
    let user = Uuid::new_v4();
    for i in 0..apps {
        let id = format!("app-{i}");
        scene
            .open_app(&id, &Transform::at(Vec3::new(i as f32, 0.0, -2.0)))
            .unwrap();
        for c in 0..8 {
            scene.set_component_open(&id, &format!("{id}.c{c}"), true, false).unwrap();
        }
        let entity = EntityReference::in_app(&id, EntityType::Clazz, format!("{id}.Main"));
        scene.highlight(HighlightRecord::new(&entity, user, Color::from_index(0)), false);
    }
    scene
}

fn bench_pose_encode(c: &mut Criterion) {
    let event = RoomEvent::UserPositions(UserPositions {
        camera: Pose::at(Vec3::new(1.0, 1.7, 2.0)),
        controllers: [Some(Pose::default()), None],
    });
    let user = Uuid::new_v4();

    c.bench_function("user_positions_encode", |b| {
        b.iter(|| black_box(encode_event(black_box(&event), None, Some(user)).unwrap()))
    });
}

fn bench_pose_decode(c: &mut Criterion) {
    let event = RoomEvent::ObjectMoved(ObjectMoved::new("app-0", &Transform::at(Vec3::new(1.0, 0.0, 0.0))));
    let encoded = encode_event(&event, None, Some(Uuid::new_v4())).unwrap();

    c.bench_function("object_moved_decode", |b| {
        b.iter(|| black_box(Frame::decode(black_box(&encoded)).unwrap().decoded().unwrap()))
    });
}

fn bench_snapshot_frame(c: &mut Criterion) {
    let room = serialize_room(&populated_scene(50));
    let event = RoomEvent::SyncRoomState(room);
    let encoded = encode_event(&event, None, None).unwrap();

    c.bench_function("sync_room_state_encode_50_apps", |b| {
        b.iter(|| black_box(encode_event(black_box(&event), None, None).unwrap()))
    });
    c.bench_function("sync_room_state_decode_50_apps", |b| {
        b.iter(|| black_box(Frame::decode(black_box(&encoded)).unwrap().decoded().unwrap()))
    });
}

fn bench_serialize_restore(c: &mut Criterion) {
    let scene = populated_scene(50);
    let snapshot: SerializedRoom = serialize_room(&scene);

    c.bench_function("serialize_room_50_apps", |b| {
        b.iter(|| black_box(serialize_room(black_box(&scene))))
    });
    c.bench_function("restore_room_50_apps", |b| {
        b.iter(|| {
            let mut target = Scene::new();
            black_box(restore_room(&mut target, black_box(&snapshot)))
        })
    });
}

fn bench_room_apply(c: &mut Criterion) {
    let mut state = RoomState::new("bench", &serialize_room(&populated_scene(10)), RoomSettings::default());
    let ticket = LobbyTicket {
        ticket_id: "t".into(),
        room_id: "bench".into(),
        user_name: "bench".into(),
        device_id: "desktop".into(),
        camera: Pose::default(),
        valid_until: i64::MAX,
    };
    let user = state.admit(&ticket).unwrap().ack.own.id;
    let update = HighlightingUpdate {
        app_id: Some("app-3".into()),
        entity_type: EntityType::Clazz,
        entity_id: "app-3.Main".into(),
        is_highlighted: true,
    };

    c.bench_function("room_apply_highlighting_update", |b| {
        b.iter(|| black_box(state.apply(user, RoomEvent::HighlightingUpdate(update.clone()))))
    });
}

fn bench_broadcast_fanout(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let group = BroadcastGroup::new(1024);
    let receivers: Vec<_> = rt.block_on(async {
        let mut rxs = Vec::new();
        for _ in 0..100 {
            rxs.push(group.add_peer(Uuid::new_v4()).await);
        }
        rxs
    });
    let frame = encode_event(&RoomEvent::AllHighlightsReset, None, None).unwrap();

    c.bench_function("broadcast_100_peers", |b| {
        b.iter(|| black_box(group.broadcast(None, frame.clone())))
    });
    drop(receivers);
}

criterion_group!(
    benches,
    bench_pose_encode,
    bench_pose_decode,
    bench_snapshot_frame,
    bench_serialize_restore,
    bench_room_apply,
    bench_broadcast_fanout,
);
criterion_main!(benches);
