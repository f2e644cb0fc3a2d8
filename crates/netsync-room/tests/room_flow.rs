//! Server rooms and client room views talking through real messages.

use netsync_protocol::{
    EnterRoomResultCode, IncomingMessage, OutgoingMessage, PlayerId, RoomOptions,
};
use netsync_room::{LocalRoom, RoomDirectory, RoomEvent};
use netsync_session::{NetworkPlayer, PlayerRegistry, write_hail};
use netsync_transport::ConnectionId;

const KEY: &str = "arena.1.0";
const SLOTS_KEY: u8 = 4;

fn connect(registry: &mut PlayerRegistry, n: u64, nickname: &str) -> ConnectionId {
    let mut local = NetworkPlayer::local();
    local.set_nickname(nickname).unwrap();
    let conn = ConnectionId::new(n);
    registry
        .connect(conn, &mut IncomingMessage::from(write_hail(KEY, &local)))
        .unwrap();
    conn
}

fn initial_slots(slots: i32) -> IncomingMessage {
    let table = netsync_properties::PropertyTable::new(false);
    table.set(SLOTS_KEY, slots).unwrap();
    let mut out = OutgoingMessage::data();
    table.write_delta(&mut out);
    IncomingMessage::from(out)
}

#[test]
fn test_create_scenario_stores_initial_properties() {
    let mut registry = PlayerRegistry::new(KEY);
    let host = connect(&mut registry, 1, "host");
    let mut directory = RoomDirectory::new();

    let outcome = directory
        .create(
            &RoomOptions::named("room-1"),
            &mut initial_slots(4),
            registry.get_mut(host).unwrap(),
        )
        .unwrap();

    assert_eq!(outcome.code, EnterRoomResultCode::Succeed);
    let room = directory.get("room-1").unwrap();
    assert_eq!(room.properties().get::<i32>(SLOTS_KEY).unwrap(), 4);
    assert!(!room.need_sync());
}

#[test]
fn test_join_data_and_player_list_sync_keep_views_consistent() {
    let mut registry = PlayerRegistry::new(KEY);
    let host = connect(&mut registry, 1, "host");
    let guest = connect(&mut registry, 2, "guest");
    let late = connect(&mut registry, 3, "late");
    let mut directory = RoomDirectory::new();
    let options = RoomOptions::named("room-1");

    directory
        .create(&options, &mut initial_slots(2), registry.get_mut(host).unwrap())
        .unwrap();
    let mut host_view = LocalRoom::from_options(&options);
    host_view.properties().set(SLOTS_KEY, 2i32).unwrap();

    // guest joins: guest gets join data, host gets a player-list sync
    directory.join("room-1", registry.get_mut(guest).unwrap()).unwrap();
    let guest_id = registry.get(guest).unwrap().id().unwrap();
    let mut join = OutgoingMessage::data();
    directory
        .get("room-1")
        .unwrap()
        .write_join_data(&mut join, guest_id, &registry)
        .unwrap();
    let mut guest_view =
        LocalRoom::from_join_data(&options, &mut IncomingMessage::from(join)).unwrap();

    let mut sync = OutgoingMessage::data();
    directory
        .get_mut("room-1")
        .unwrap()
        .write_player_list_sync(&mut sync, &registry)
        .unwrap();
    let events = host_view
        .read_player_list_sync(&mut IncomingMessage::from(sync))
        .unwrap();

    assert_eq!(events, vec![RoomEvent::PlayerJoined(guest_id)]);
    assert_eq!(guest_view.local_player_id(), PlayerId(1));
    assert_eq!(guest_view.remote_player(PlayerId(0)).unwrap().nickname(), "host");
    assert_eq!(guest_view.properties().get::<i32>(SLOTS_KEY).unwrap(), 2);
    assert_eq!(host_view.remote_player(guest_id).unwrap().nickname(), "guest");

    // host leaves: guest becomes master
    let outcome = directory.leave(registry.get_mut(host).unwrap()).unwrap();
    assert!(!outcome.destroyed);
    let mut sync = OutgoingMessage::data();
    directory
        .get_mut("room-1")
        .unwrap()
        .write_player_list_sync(&mut sync, &registry)
        .unwrap();
    let events = guest_view
        .read_player_list_sync(&mut IncomingMessage::from(sync))
        .unwrap();
    assert_eq!(
        events,
        vec![
            RoomEvent::PlayerLeft(PlayerId(0)),
            RoomEvent::MasterClientChanged(PlayerId(1))
        ]
    );
    assert_eq!(
        directory.get("room-1").unwrap().master_client_id(),
        Some(PlayerId(1))
    );

    // a late joiner receives the current roster only
    directory.join("room-1", registry.get_mut(late).unwrap()).unwrap();
    let late_id = registry.get(late).unwrap().id().unwrap();
    assert_eq!(late_id, PlayerId(2));
    let mut join = OutgoingMessage::data();
    directory
        .get("room-1")
        .unwrap()
        .write_join_data(&mut join, late_id, &registry)
        .unwrap();
    let late_view = LocalRoom::from_join_data(&options, &mut IncomingMessage::from(join)).unwrap();
    assert_eq!(late_view.player_count(), 2);
    assert_eq!(late_view.master_client_id(), PlayerId(1));
}

#[test]
fn test_room_field_changes_reach_members() {
    let mut registry = PlayerRegistry::new(KEY);
    let host = connect(&mut registry, 1, "host");
    let mut directory = RoomDirectory::new();
    let options = RoomOptions::named("room-1");
    directory
        .create(&options, &mut initial_slots(0), registry.get_mut(host).unwrap())
        .unwrap();
    let mut view = LocalRoom::from_options(&options);

    let room = directory.get_mut("room-1").unwrap();
    room.set_max_players(6);
    room.properties().set(9, "night".to_string()).unwrap();
    assert!(room.need_sync());

    let mut out = OutgoingMessage::data();
    room.write_sync(&mut out, false);
    view.read_fields(&mut IncomingMessage::from(out)).unwrap();

    assert_eq!(view.max_players(), 6);
    assert_eq!(view.properties().get::<String>(9).unwrap(), "night");
    assert!(!directory.get("room-1").unwrap().need_sync());
}
