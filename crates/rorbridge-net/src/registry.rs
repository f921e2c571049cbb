//! Players on the server and the data streams they own.
//!
//! Players are keyed by their slot (the `source` field of their frames).
//! Streams are keyed by `(owner slot, stream id)`. The registry is mutated
//! only from the session loop and performs no locking.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;

use crate::messages::{AuthStatus, StreamRegister, StreamRegisterData, StreamType, UserInfo};

/// Slot of a connected player; the `source` field of its frames.
pub type Slot = u32;

/// Stream id chosen by the stream owner.
pub type StreamId = u32;

/// First stream id handed out to local streams. Lower ids are reserved.
pub const FIRST_LOCAL_STREAM_ID: StreamId = 10;

/// Registry errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No player occupies the slot.
    #[error("no player in slot {0}")]
    UnknownPlayer(Slot),
    /// The stream is already registered.
    #[error("stream {id} of slot {owner} is already registered")]
    DuplicateStream {
        /// Owner slot.
        owner: Slot,
        /// Stream id.
        id: StreamId,
    },
    /// The stream was unregistered earlier in this connection epoch.
    #[error("stream {id} of slot {owner} was retired")]
    RetiredStream {
        /// Owner slot.
        owner: Slot,
        /// Stream id.
        id: StreamId,
    },
    /// The stream does not exist.
    #[error("stream {id} of slot {owner} is not registered")]
    UnknownStream {
        /// Owner slot.
        owner: Slot,
        /// Stream id.
        id: StreamId,
    },
}

/// Lifecycle of a stream entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Live.
    Registered,
    /// Unregistered or owner left.
    Deleted,
}

/// What to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Stream kind.
    pub kind: StreamType,
    /// Stream name; the actor file name for actor streams.
    pub name: String,
    /// Id chosen by a remote owner. `None` allocates a local id.
    pub requested_id: Option<StreamId>,
    /// Type-specific registration data.
    pub data: StreamRegisterData,
}

impl StreamDescriptor {
    /// A local stream of the given kind with empty registration data.
    pub fn local(kind: StreamType, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            requested_id: None,
            data: StreamRegisterData::Generic {
                reg_data: String::new(),
            },
        }
    }

    /// The bot's chat stream.
    pub fn chat() -> Self {
        Self {
            requested_id: None,
            ..Self::from_register(&StreamRegister::chat())
        }
    }

    /// The bot's character stream.
    pub fn character() -> Self {
        Self {
            requested_id: None,
            ..Self::from_register(&StreamRegister::character())
        }
    }

    /// Describe a stream announced by a STREAM_REGISTER frame.
    pub fn from_register(register: &StreamRegister) -> Self {
        Self {
            kind: register.stream_type,
            name: register.name.clone(),
            requested_id: Some(register.origin_stream_id as StreamId),
            data: register.data.clone(),
        }
    }
}

/// A registered stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    /// Stream id, unique per owner within a connection epoch.
    pub id: StreamId,
    /// Stream kind.
    pub kind: StreamType,
    /// Owner slot.
    pub owner: Slot,
    /// Lifecycle.
    pub status: StreamStatus,
    /// Stream name.
    pub name: String,
    /// Type-specific registration data.
    pub data: StreamRegisterData,
}

impl Stream {
    /// The STREAM_REGISTER record announcing this stream.
    pub fn to_register(&self) -> StreamRegister {
        let data = match &self.data {
            StreamRegisterData::Actor {
                buffer_size,
                skin,
                section_config,
                ..
            } => StreamRegisterData::Actor {
                buffer_size: *buffer_size,
                timestamp: -1,
                skin: skin.clone(),
                section_config: section_config.clone(),
            },
            generic => generic.clone(),
        };
        StreamRegister {
            stream_type: self.kind,
            status: 0,
            origin_source_id: self.owner as i32,
            origin_stream_id: self.id as i32,
            name: self.name.clone(),
            data,
        }
    }

    /// Descriptor that registers an equivalent local stream.
    pub fn descriptor(&self) -> StreamDescriptor {
        StreamDescriptor {
            kind: self.kind,
            name: self.name.clone(),
            requested_id: None,
            data: self.data.clone(),
        }
    }
}

/// A player connected to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    /// Slot (frame source), unique while connected.
    pub slot: Slot,
    /// Slot number reported by the server.
    pub slot_num: i32,
    /// Display name.
    pub username: String,
    /// Client GUID.
    pub client_guid: String,
    /// Authentication flags.
    pub auth: AuthStatus,
    /// Colour index.
    pub colour: i32,
    /// Language tag.
    pub language: String,
    /// Client version.
    pub client_version: String,
    /// When the player was added to the registry.
    pub joined_at: Instant,
    /// Streams owned by the player.
    pub streams: BTreeSet<StreamId>,
}

impl Player {
    /// Build a player from a user info record.
    pub fn from_user_info(info: &UserInfo, joined_at: Instant) -> Self {
        Self {
            slot: info.unique_id,
            slot_num: info.slot_num,
            username: info.username.clone(),
            client_guid: info.client_guid.clone(),
            auth: info.auth_status,
            colour: info.color_num,
            language: info.language.clone(),
            client_version: info.client_version.clone(),
            joined_at,
            streams: BTreeSet::new(),
        }
    }

    /// Whether the player holds an authenticated role.
    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    fn apply(&mut self, info: &UserInfo) {
        self.slot_num = info.slot_num;
        self.username.clone_from(&info.username);
        self.client_guid.clone_from(&info.client_guid);
        self.auth = info.auth_status;
        self.colour = info.color_num;
        self.language.clone_from(&info.language);
        self.client_version.clone_from(&info.client_version);
    }
}

/// Players and streams of one connection epoch.
#[derive(Debug)]
pub struct StreamRegistry {
    players: HashMap<Slot, Player>,
    streams: HashMap<(Slot, StreamId), Stream>,
    retired: HashSet<(Slot, StreamId)>,
    next_local_id: StreamId,
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            players: HashMap::new(),
            streams: HashMap::new(),
            retired: HashSet::new(),
            next_local_id: FIRST_LOCAL_STREAM_ID,
        }
    }

    /// Start a new connection epoch, forgetting all players and streams.
    pub fn reset(&mut self) {
        self.players.clear();
        self.streams.clear();
        self.retired.clear();
        self.next_local_id = FIRST_LOCAL_STREAM_ID;
    }

    /// Add a player. A player already in the slot is removed first, along
    /// with its streams.
    pub fn add_player(&mut self, info: &UserInfo, now: Instant) -> &Player {
        let slot = info.unique_id;
        if self.players.contains_key(&slot) {
            tracing::debug!(slot, "slot reused without a leave, dropping previous player");
            self.remove_player(slot);
        }
        self.players
            .entry(slot)
            .or_insert_with(|| Player::from_user_info(info, now))
    }

    /// Update the details of a known player.
    pub fn update_player(&mut self, info: &UserInfo) -> Result<&Player, RegistryError> {
        let player = self
            .players
            .get_mut(&info.unique_id)
            .ok_or(RegistryError::UnknownPlayer(info.unique_id))?;
        player.apply(info);
        Ok(player)
    }

    /// Remove a player and every stream it owns.
    pub fn remove_player(&mut self, slot: Slot) -> Option<Player> {
        let player = self.players.remove(&slot)?;
        for id in &player.streams {
            self.streams.remove(&(slot, *id));
            self.retired.insert((slot, *id));
        }
        Some(player)
    }

    /// Look up a player.
    pub fn player(&self, slot: Slot) -> Option<&Player> {
        self.players.get(&slot)
    }

    /// All players, ordered by slot.
    pub fn players(&self) -> Vec<&Player> {
        let mut players: Vec<&Player> = self.players.values().collect();
        players.sort_by_key(|p| p.slot);
        players
    }

    /// Register a stream owned by `owner` and return its id.
    pub fn register(
        &mut self,
        owner: Slot,
        descriptor: StreamDescriptor,
    ) -> Result<StreamId, RegistryError> {
        if !self.players.contains_key(&owner) {
            return Err(RegistryError::UnknownPlayer(owner));
        }

        let id = match descriptor.requested_id {
            Some(id) => {
                if self.retired.contains(&(owner, id)) {
                    return Err(RegistryError::RetiredStream { owner, id });
                }
                if self.streams.contains_key(&(owner, id)) {
                    return Err(RegistryError::DuplicateStream { owner, id });
                }
                id
            }
            None => self.allocate_local_id(owner),
        };

        self.streams.insert(
            (owner, id),
            Stream {
                id,
                kind: descriptor.kind,
                owner,
                status: StreamStatus::Registered,
                name: descriptor.name,
                data: descriptor.data,
            },
        );
        if let Some(player) = self.players.get_mut(&owner) {
            player.streams.insert(id);
        }
        Ok(id)
    }

    fn allocate_local_id(&mut self, owner: Slot) -> StreamId {
        loop {
            let id = self.next_local_id;
            self.next_local_id += 1;
            let key = (owner, id);
            if !self.streams.contains_key(&key) && !self.retired.contains(&key) {
                return id;
            }
        }
    }

    /// Unregister a stream. The `(owner, id)` pair is retired until [`reset`](Self::reset).
    pub fn unregister(&mut self, owner: Slot, id: StreamId) -> Result<Stream, RegistryError> {
        let mut stream = self
            .streams
            .remove(&(owner, id))
            .ok_or(RegistryError::UnknownStream { owner, id })?;
        self.retired.insert((owner, id));
        if let Some(player) = self.players.get_mut(&owner) {
            player.streams.remove(&id);
        }
        stream.status = StreamStatus::Deleted;
        Ok(stream)
    }

    /// Ids of the streams owned by `slot`.
    pub fn streams_for(&self, slot: Slot) -> BTreeSet<StreamId> {
        self.players
            .get(&slot)
            .map(|p| p.streams.clone())
            .unwrap_or_default()
    }

    /// Look up a stream.
    pub fn stream(&self, owner: Slot, id: StreamId) -> Option<&Stream> {
        self.streams.get(&(owner, id))
    }
}
