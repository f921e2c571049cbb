//! Travel statistics gathered from stream data.
//!
//! Every tracked stream remembers the last position it reported. Movement
//! between two reports counts as walking, driving, sailing or flying
//! depending on the stream, unless the step is longer than
//! [`MAX_STEP_METERS`], which happens on teleports and respawns. Players who
//! leave are folded into the [`GlobalStats`] of the session.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use rorbridge_net::messages::Vector3;
use rorbridge_net::{Slot, Stream, StreamId, StreamPayload, StreamType};
use tokio::time::Instant;

/// Longest step between two position reports that counts as travel, in meters.
pub const MAX_STEP_METERS: f32 = 10.0;

/// Vehicle category, taken from the extension of the actor file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorKind {
    Truck,
    Car,
    Load,
    Airplane,
    Boat,
    Trailer,
    Train,
    Fixed,
    Unknown,
}

impl ActorKind {
    /// `agoras.truck` is a truck, `wing.airplane` an airplane.
    pub fn from_filename(name: &str) -> Self {
        let extension = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("truck") => Self::Truck,
            Some("car") => Self::Car,
            Some("load") => Self::Load,
            Some("airplane") => Self::Airplane,
            Some("boat") => Self::Boat,
            Some("trailer") => Self::Trailer,
            Some("train") => Self::Train,
            Some("fixed") => Self::Fixed,
            _ => Self::Unknown,
        }
    }

    fn travel(self) -> Option<Travel> {
        match self {
            Self::Truck | Self::Car | Self::Train => Some(Travel::Driven),
            Self::Boat => Some(Travel::Sailed),
            Self::Airplane => Some(Travel::Flown),
            Self::Load | Self::Trailer | Self::Fixed | Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Travel {
    Driven,
    Sailed,
    Walked,
    Flown,
}

/// Meters travelled, by mode.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DistanceStats {
    pub driven: f64,
    pub sailed: f64,
    pub walked: f64,
    pub flown: f64,
}

impl DistanceStats {
    pub fn total(&self) -> f64 {
        self.driven + self.sailed + self.walked + self.flown
    }

    pub fn add(&mut self, other: &DistanceStats) {
        self.driven += other.driven;
        self.sailed += other.sailed;
        self.walked += other.walked;
        self.flown += other.flown;
    }

    fn record(&mut self, travel: Travel, meters: f64) {
        match travel {
            Travel::Driven => self.driven += meters,
            Travel::Sailed => self.sailed += meters,
            Travel::Walked => self.walked += meters,
            Travel::Flown => self.flown += meters,
        }
    }
}

fn meters(value: f64) -> String {
    if value < 1000.0 {
        format!("{value:.0} m")
    } else {
        format!("{:.1} km", value / 1000.0)
    }
}

/// `1.2 km driven, 56 m walked`; modes never used are left out.
impl fmt::Display for DistanceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = [
            (self.driven, "driven"),
            (self.sailed, "sailed"),
            (self.walked, "walked"),
            (self.flown, "flown"),
        ]
        .into_iter()
        .filter(|(value, _)| *value > 0.0)
        .map(|(value, mode)| format!("{} {mode}", meters(value)))
        .collect();
        if parts.is_empty() {
            f.write_str("nothing travelled")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

/// `45 s`, `12 min` or `2 h 5 min`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        0..60 => format!("{secs} s"),
        60..3600 => format!("{} min", secs / 60),
        _ => format!("{} h {} min", secs / 3600, secs % 3600 / 60),
    }
}

/// Positions inside one meter of the origin mean the sender has no fix yet.
fn is_unplaced(position: &Vector3) -> bool {
    position.x.abs() < 1.0 && position.y.abs() < 1.0 && position.z.abs() < 1.0
}

#[derive(Debug, Clone)]
struct TrackedStream {
    kind: StreamType,
    actor: Option<ActorKind>,
    name: String,
    position: Option<Vector3>,
}

impl TrackedStream {
    fn new(stream: &Stream) -> Self {
        Self {
            kind: stream.kind,
            actor: (stream.kind == StreamType::Actor).then(|| ActorKind::from_filename(&stream.name)),
            name: stream.name.clone(),
            position: None,
        }
    }

    fn travel(&self) -> Option<Travel> {
        match self.kind {
            StreamType::Character => Some(Travel::Walked),
            StreamType::Actor => self.actor.and_then(ActorKind::travel),
            StreamType::Ai | StreamType::Chat => None,
        }
    }
}

/// What is known about one player's movements.
#[derive(Debug, Clone)]
pub struct PlayerStats {
    slot: Slot,
    /// When the player was first seen.
    pub online_since: Instant,
    /// Distance covered so far.
    pub distance: DistanceStats,
    streams: BTreeMap<StreamId, TrackedStream>,
    character_stream: Option<StreamId>,
    current: Option<(Slot, StreamId)>,
}

impl PlayerStats {
    fn new(slot: Slot, now: Instant) -> Self {
        Self {
            slot,
            online_since: now,
            distance: DistanceStats::default(),
            streams: BTreeMap::new(),
            character_stream: None,
            current: None,
        }
    }

    /// The stream the player is controlling, as (owner, stream id).
    pub fn current_stream(&self) -> Option<(Slot, StreamId)> {
        self.current
    }

    fn add_stream(&mut self, stream: &Stream) {
        let tracked = TrackedStream::new(stream);
        if tracked.kind == StreamType::Character && self.character_stream.is_none() {
            self.character_stream = Some(stream.id);
            if self.current.is_none() {
                self.current = Some((self.slot, stream.id));
            }
        }
        self.streams.insert(stream.id, tracked);
    }

    fn remove_stream(&mut self, id: StreamId) {
        self.streams.remove(&id);
        if self.character_stream == Some(id) {
            self.character_stream = None;
        }
        if self.current == Some((self.slot, id)) {
            self.current = self.character_stream.map(|character| (self.slot, character));
        }
    }

    fn set_position(&mut self, id: StreamId, position: Vector3) {
        let Some(stream) = self.streams.get_mut(&id) else {
            return;
        };
        let Some(previous) = stream.position.replace(position) else {
            return;
        };
        if is_unplaced(&previous) || is_unplaced(&position) {
            return;
        }
        let step = previous.distance(&position);
        if step < MAX_STEP_METERS
            && let Some(travel) = stream.travel()
        {
            self.distance.record(travel, f64::from(step));
        }
    }

    fn set_current(&mut self, owner: Slot, id: StreamId) {
        self.current = Some((owner, id));
        // The character reappears somewhere else when it gets out again.
        if let Some(character) = self.character_stream
            && (owner, id) != (self.slot, character)
            && let Some(stream) = self.streams.get_mut(&character)
        {
            stream.position = None;
        }
    }
}

/// Totals across everyone seen since the bridge started.
#[derive(Debug, Clone, Default)]
pub struct GlobalStats {
    /// Every distinct name that joined.
    pub usernames: BTreeSet<String>,
    /// Joins counted, including repeated joins of the same name.
    pub user_count: u32,
    /// Distance of players who left.
    pub distance: DistanceStats,
    /// How long each player who left was online.
    pub connection_times: Vec<Duration>,
}

impl GlobalStats {
    pub fn average_connection_time(&self) -> Option<Duration> {
        let count = u32::try_from(self.connection_times.len()).ok().filter(|n| *n > 0)?;
        Some(self.connection_times.iter().sum::<Duration>() / count)
    }
}

/// Tracks [`PlayerStats`] for everyone on the server.
#[derive(Debug, Default)]
pub struct StatsTracker {
    players: HashMap<Slot, PlayerStats>,
    global: GlobalStats,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `slot`. Repeated calls for a tracked slot do nothing.
    pub fn join(&mut self, slot: Slot, username: &str, now: Instant) {
        if self.players.contains_key(&slot) {
            return;
        }
        self.players.insert(slot, PlayerStats::new(slot, now));
        self.global.usernames.insert(username.to_string());
        self.global.user_count += 1;
    }

    /// Stop tracking `slot`, folding its totals into the global ones.
    pub fn leave(&mut self, slot: Slot, now: Instant) -> Option<PlayerStats> {
        let stats = self.players.remove(&slot)?;
        self.global.distance.add(&stats.distance);
        self.global
            .connection_times
            .push(now.saturating_duration_since(stats.online_since));
        Some(stats)
    }

    pub fn stream_registered(&mut self, stream: &Stream) {
        match self.players.get_mut(&stream.owner) {
            Some(player) => player.add_stream(stream),
            None => tracing::debug!(owner = stream.owner, id = stream.id, "stream of an untracked player"),
        }
    }

    pub fn stream_unregistered(&mut self, stream: &Stream) {
        if let Some(player) = self.players.get_mut(&stream.owner) {
            player.remove_stream(stream.id);
        }
    }

    /// Apply one STREAM_DATA record from `slot`.
    pub fn stream_data(&mut self, slot: Slot, stream_id: StreamId, payload: &StreamPayload) {
        let Some(player) = self.players.get_mut(&slot) else {
            return;
        };
        match payload {
            StreamPayload::CharacterPosition { position, .. } => player.set_position(stream_id, *position),
            StreamPayload::Vehicle(state) => player.set_position(stream_id, state.position),
            StreamPayload::CharacterAttach {
                source_id,
                stream_id: vehicle,
                ..
            } => match (Slot::try_from(*source_id), StreamId::try_from(*vehicle)) {
                (Ok(owner), Ok(vehicle)) => player.set_current(owner, vehicle),
                _ => tracing::debug!(slot, source_id, vehicle, "attach to an invalid stream"),
            },
            StreamPayload::CharacterDetach => {
                if let Some(character) = player.character_stream {
                    player.set_current(slot, character);
                }
            }
            StreamPayload::Raw(_) => {}
        }
    }

    pub fn player(&self, slot: Slot) -> Option<&PlayerStats> {
        self.players.get(&slot)
    }

    /// File name of the vehicle `slot` is in, if any.
    pub fn vehicle_of(&self, slot: Slot) -> Option<&str> {
        let (owner, id) = self.players.get(&slot)?.current?;
        let stream = self.players.get(&owner)?.streams.get(&id)?;
        (stream.kind == StreamType::Actor).then_some(stream.name.as_str())
    }

    pub fn global(&self) -> &GlobalStats {
        &self.global
    }

    /// Distance of everyone seen, online or gone.
    pub fn total_distance(&self) -> DistanceStats {
        let mut total = self.global.distance;
        for player in self.players.values() {
            total.add(&player.distance);
        }
        total
    }

    /// Forget everyone online. Global totals are kept.
    pub fn clear_players(&mut self) {
        self.players.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rorbridge_net::messages::StreamRegisterData;
    use rorbridge_net::registry::StreamStatus;

    fn stream(owner: Slot, id: StreamId, kind: StreamType, name: &str) -> Stream {
        Stream {
            id,
            kind,
            owner,
            status: StreamStatus::Registered,
            name: name.to_string(),
            data: StreamRegisterData::Generic {
                reg_data: String::new(),
            },
        }
    }

    fn walk(x: f32) -> StreamPayload {
        walk_to(Vector3 { x, y: 5.0, z: 100.0 })
    }

    fn walk_to(position: Vector3) -> StreamPayload {
        StreamPayload::CharacterPosition {
            position,
            rotation: 0.0,
            animation_time: 0.0,
            animation_mode: "Walk".to_string(),
        }
    }

    fn tracker_with_alice(now: Instant) -> StatsTracker {
        let mut tracker = StatsTracker::new();
        tracker.join(3, "Alice", now);
        tracker.stream_registered(&stream(3, 10, StreamType::Character, "default"));
        tracker
    }

    #[test]
    fn test_actor_kind_from_filename() {
        assert_eq!(ActorKind::from_filename("agoras.truck"), ActorKind::Truck);
        assert_eq!(ActorKind::from_filename("Wing.AIRPLANE"), ActorKind::Airplane);
        assert_eq!(ActorKind::from_filename("ferry.boat"), ActorKind::Boat);
        assert_eq!(ActorKind::from_filename("no_extension"), ActorKind::Unknown);
    }

    #[test]
    fn test_walking_adds_up_and_jumps_are_ignored() {
        let t0 = Instant::now();
        let mut tracker = tracker_with_alice(t0);
        for x in [100.0, 103.0, 107.0, 500.0, 502.0] {
            tracker.stream_data(3, 10, &walk(x));
        }
        let distance = tracker.player(3).map(|p| p.distance).unwrap_or_default();
        assert_eq!(distance.walked, 9.0);
        assert_eq!(distance.total(), 9.0);
    }

    #[test]
    fn test_unplaced_positions_do_not_count() {
        let t0 = Instant::now();
        let mut tracker = tracker_with_alice(t0);
        tracker.stream_data(3, 10, &walk_to(Vector3::default()));
        tracker.stream_data(3, 10, &walk(5.0));
        tracker.stream_data(3, 10, &walk(8.0));
        assert_eq!(tracker.player(3).map(|p| p.distance.walked), Some(3.0));
    }

    #[test]
    fn test_attach_switches_current_vehicle() {
        let t0 = Instant::now();
        let mut tracker = tracker_with_alice(t0);
        tracker.join(4, "Bert", t0);
        tracker.stream_registered(&stream(4, 11, StreamType::Actor, "agoras.truck"));
        assert_eq!(tracker.vehicle_of(3), None);

        tracker.stream_data(
            3,
            10,
            &StreamPayload::CharacterAttach {
                source_id: 4,
                stream_id: 11,
                position: 1,
            },
        );
        assert_eq!(tracker.player(3).and_then(PlayerStats::current_stream), Some((4, 11)));
        assert_eq!(tracker.vehicle_of(3), Some("agoras.truck"));

        tracker.stream_data(3, 10, &StreamPayload::CharacterDetach);
        assert_eq!(tracker.vehicle_of(3), None);
    }

    #[test]
    fn test_leave_folds_into_global() {
        let t0 = Instant::now();
        let mut tracker = tracker_with_alice(t0);
        tracker.join(3, "Alice", t0);
        tracker.stream_data(3, 10, &walk(100.0));
        tracker.stream_data(3, 10, &walk(104.0));

        let left = tracker.leave(3, t0 + Duration::from_secs(90));
        assert_eq!(left.map(|p| p.distance.walked), Some(4.0));
        assert!(tracker.player(3).is_none());

        tracker.join(4, "Bert", t0);
        tracker.stream_registered(&stream(4, 10, StreamType::Character, "default"));
        tracker.stream_data(4, 10, &walk(200.0));
        tracker.stream_data(4, 10, &walk(201.0));
        assert_eq!(tracker.total_distance().walked, 5.0);

        let global = tracker.global();
        assert_eq!(global.user_count, 2);
        assert_eq!(global.distance.walked, 4.0);
        assert_eq!(global.average_connection_time(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_distance_and_duration_text() {
        let distance = DistanceStats {
            driven: 1234.0,
            walked: 56.0,
            ..Default::default()
        };
        assert_eq!(distance.to_string(), "1.2 km driven, 56 m walked");
        assert_eq!(DistanceStats::default().to_string(), "nothing travelled");
        assert_eq!(format_duration(Duration::from_secs(45)), "45 s");
        assert_eq!(format_duration(Duration::from_secs(750)), "12 min");
        assert_eq!(format_duration(Duration::from_secs(7500)), "2 h 5 min");
    }
}
