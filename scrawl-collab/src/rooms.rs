//! Board rooms: membership, history, and ordered fan-out.
//!
//! Each active board is a [`BoardRoom`]: the member set and the board's
//! [`BoardHistory`] behind one mutex, plus a tokio broadcast channel for
//! fan-out. Every state change is published into the channel while the
//! mutex is still held, which serializes concurrent publishes to the same
//! board — every member observes the same per-board event order. Boards
//! have independent mutexes and channels, so operations on different
//! boards never block each other.
//!
//! Joining snapshots the history and subscribes to the channel under the
//! same lock: a joiner either sees a stroke in its snapshot or receives it
//! live, never both and never neither.
//!
//! Receivers get an [`Envelope`] carrying the originating connection id;
//! each connection's pump drops envelopes it originated itself.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use uuid::Uuid;

use scrawl_core::{BoardHistory, StaleEpoch, StrokeInput, StrokeRecord};

/// A state change fanned out to the members of one board.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    Stroke(StrokeRecord),
    Cleared { epoch: u64 },
    MemberJoined { connection_id: Uuid },
    MemberLeft { connection_id: Uuid },
}

/// Fan-out envelope: the event plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub board_id: String,
    /// Connection that caused the event; receivers skip their own.
    pub origin: Uuid,
    pub event: BoardEvent,
}

/// Appending a stroke failed.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendError {
    /// The connection is not a member of the board.
    NotAMember,
    /// The stroke was submitted against a superseded epoch.
    Stale(StaleEpoch),
}

impl std::fmt::Display for AppendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAMember => write!(f, "connection is not a member of this board"),
            Self::Stale(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AppendError {}

impl From<StaleEpoch> for AppendError {
    fn from(e: StaleEpoch) -> Self {
        Self::Stale(e)
    }
}

/// Joining a board failed.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinError {
    /// The board is at its member capacity.
    BoardFull { board_id: String, capacity: usize },
}

impl std::fmt::Display for JoinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BoardFull { board_id, capacity } => {
                write!(f, "board {board_id} is full ({capacity} members)")
            }
        }
    }
}

impl std::error::Error for JoinError {}

/// Everything a gateway needs after a successful join: the snapshot to
/// replay, the live-event receiver subscribed atomically with it, and a
/// handle to the room for subsequent appends and clears.
pub struct JoinedBoard {
    pub board_id: String,
    pub epoch: u64,
    pub strokes: Vec<StrokeRecord>,
    pub members: Vec<Uuid>,
    pub room: Arc<BoardRoom>,
    pub events: broadcast::Receiver<Arc<Envelope>>,
}

impl std::fmt::Debug for JoinedBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinedBoard")
            .field("board_id", &self.board_id)
            .field("epoch", &self.epoch)
            .field("strokes", &self.strokes.len())
            .field("members", &self.members)
            .finish_non_exhaustive()
    }
}

struct BoardState {
    members: HashSet<Uuid>,
    history: BoardHistory,
    /// Set when the registry evicts the room; a closed room accepts no
    /// new members and callers must re-resolve through the registry.
    closed: bool,
}

enum RoomJoinOutcome {
    Joined {
        epoch: u64,
        strokes: Vec<StrokeRecord>,
        members: Vec<Uuid>,
        events: broadcast::Receiver<Arc<Envelope>>,
    },
    Full,
    Closed,
}

/// One board's members, history, and event channel.
pub struct BoardRoom {
    board_id: String,
    state: Mutex<BoardState>,
    events: broadcast::Sender<Arc<Envelope>>,
}

impl BoardRoom {
    fn new(board_id: String, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            board_id,
            state: Mutex::new(BoardState {
                members: HashSet::new(),
                history: BoardHistory::new(),
                closed: false,
            }),
            events,
        }
    }

    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    /// Send while the caller still holds the state lock, so publishes to
    /// this board hit the channel in the same order the state changed.
    fn publish(&self, origin: Uuid, event: BoardEvent) {
        let envelope = Arc::new(Envelope {
            board_id: self.board_id.clone(),
            origin,
            event,
        });
        // No receivers is fine; the sender just reports 0 deliveries.
        let _ = self.events.send(envelope);
    }

    async fn join(&self, connection_id: Uuid, max_members: usize) -> RoomJoinOutcome {
        let mut state = self.state.lock().await;
        if state.closed {
            return RoomJoinOutcome::Closed;
        }

        let already_member = state.members.contains(&connection_id);
        if !already_member && state.members.len() >= max_members {
            return RoomJoinOutcome::Full;
        }

        state.members.insert(connection_id);
        let (epoch, strokes) = state.history.snapshot();
        let members = state.members.iter().copied().collect();

        if !already_member {
            self.publish(connection_id, BoardEvent::MemberJoined { connection_id });
        }
        // Subscribing under the lock, after our own join notification,
        // makes the snapshot handoff exact: the receiver sees everything
        // published from here on and nothing before.
        let events = self.events.subscribe();

        RoomJoinOutcome::Joined {
            epoch,
            strokes,
            members,
            events,
        }
    }

    /// Removes the member. Returns true when the room emptied and was
    /// closed (caller evicts it from the registry).
    async fn leave(&self, connection_id: Uuid, close_if_empty: bool) -> bool {
        let mut state = self.state.lock().await;
        if !state.members.remove(&connection_id) {
            return false;
        }
        self.publish(connection_id, BoardEvent::MemberLeft { connection_id });
        if state.members.is_empty() && close_if_empty && !state.closed {
            state.closed = true;
            return true;
        }
        false
    }

    /// Appends a stroke authored by `origin` against `epoch` and fans the
    /// accepted record out to the other members.
    pub async fn append_stroke(
        &self,
        origin: Uuid,
        epoch: u64,
        input: StrokeInput,
    ) -> Result<StrokeRecord, AppendError> {
        let mut state = self.state.lock().await;
        if !state.members.contains(&origin) {
            return Err(AppendError::NotAMember);
        }
        let record = state.history.append(epoch, origin, input)?;
        self.publish(origin, BoardEvent::Stroke(record.clone()));
        Ok(record)
    }

    /// Clears the board on behalf of `origin` and fans out the new epoch.
    /// Returns `None` when `origin` is not a member.
    pub async fn clear(&self, origin: Uuid) -> Option<u64> {
        let mut state = self.state.lock().await;
        if !state.members.contains(&origin) {
            return None;
        }
        let epoch = state.history.clear();
        self.publish(origin, BoardEvent::Cleared { epoch });
        Some(epoch)
    }

    /// Current epoch and stroke history.
    pub async fn snapshot(&self) -> (u64, Vec<StrokeRecord>) {
        self.state.lock().await.history.snapshot()
    }

    pub async fn members(&self) -> Vec<Uuid> {
        self.state.lock().await.members.iter().copied().collect()
    }

    pub async fn member_count(&self) -> usize {
        self.state.lock().await.members.len()
    }
}

/// Room registry configuration.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Broadcast channel capacity per board (messages buffered per
    /// receiver before lagging receivers start dropping).
    pub broadcast_capacity: usize,
    /// Maximum members per board; joins beyond it are refused.
    pub max_members_per_board: usize,
    /// Drop a board's in-memory state when its last member leaves.
    pub evict_empty_boards: bool,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
            max_members_per_board: 100,
            evict_empty_boards: true,
        }
    }
}

/// Registry of active boards and which board each connection is in.
///
/// A connection is a member of at most one board; joining a new board
/// leaves the previous one first. Board entries are created lazily on
/// first join and (by policy) evicted when their last member leaves.
pub struct RoomRegistry {
    boards: RwLock<HashMap<String, Arc<BoardRoom>>>,
    /// connection id → board it is currently in
    memberships: RwLock<HashMap<Uuid, String>>,
    config: RoomConfig,
}

impl RoomRegistry {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            boards: RwLock::new(HashMap::new()),
            memberships: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Admits `connection_id` to `board_id`, leaving any prior board.
    ///
    /// Idempotent: re-joining the current board returns a fresh snapshot
    /// and receiver without a membership change or notification.
    pub async fn join(
        &self,
        connection_id: Uuid,
        board_id: &str,
    ) -> Result<JoinedBoard, JoinError> {
        let prior = self.memberships.read().await.get(&connection_id).cloned();
        if let Some(prior_board) = prior {
            if prior_board != board_id {
                self.leave(connection_id).await;
            }
        }

        loop {
            let room = self.get_or_create(board_id).await;
            match room.join(connection_id, self.config.max_members_per_board).await {
                RoomJoinOutcome::Joined {
                    epoch,
                    strokes,
                    members,
                    events,
                } => {
                    self.memberships
                        .write()
                        .await
                        .insert(connection_id, board_id.to_string());
                    return Ok(JoinedBoard {
                        board_id: board_id.to_string(),
                        epoch,
                        strokes,
                        members,
                        room,
                        events,
                    });
                }
                RoomJoinOutcome::Full => {
                    return Err(JoinError::BoardFull {
                        board_id: board_id.to_string(),
                        capacity: self.config.max_members_per_board,
                    });
                }
                RoomJoinOutcome::Closed => {
                    // Lost a race with eviction of the same board id.
                    // Drop the dead entry and resolve again.
                    self.evict(board_id, &room).await;
                }
            }
        }
    }

    /// Removes the connection from its board, if any. Safe to call from
    /// any teardown path, including racing a disconnect.
    pub async fn leave(&self, connection_id: Uuid) {
        let board_id = match self.memberships.write().await.remove(&connection_id) {
            Some(b) => b,
            None => return,
        };
        let room = self.boards.read().await.get(&board_id).cloned();
        if let Some(room) = room {
            if room.leave(connection_id, self.config.evict_empty_boards).await {
                self.evict(&board_id, &room).await;
                log::info!("board {board_id} evicted (empty)");
            }
        }
    }

    /// Current member set of a board; empty for unknown boards.
    pub async fn members_of(&self, board_id: &str) -> Vec<Uuid> {
        let room = self.boards.read().await.get(board_id).cloned();
        match room {
            Some(room) => room.members().await,
            None => Vec::new(),
        }
    }

    /// Number of active boards.
    pub async fn board_count(&self) -> usize {
        self.boards.read().await.len()
    }

    /// Active board ids.
    pub async fn active_boards(&self) -> Vec<String> {
        self.boards.read().await.keys().cloned().collect()
    }

    async fn get_or_create(&self, board_id: &str) -> Arc<BoardRoom> {
        // Fast path: read lock
        {
            let boards = self.boards.read().await;
            if let Some(room) = boards.get(board_id) {
                return room.clone();
            }
        }

        // Slow path: write lock to create
        let mut boards = self.boards.write().await;
        // Double-check after acquiring write lock
        if let Some(room) = boards.get(board_id) {
            return room.clone();
        }

        let room = Arc::new(BoardRoom::new(
            board_id.to_string(),
            self.config.broadcast_capacity,
        ));
        boards.insert(board_id.to_string(), room.clone());
        log::debug!("board {board_id} created");
        room
    }

    /// Removes the entry for `board_id` only if it still maps to `room`,
    /// so a replacement created after a close is never torn down.
    async fn evict(&self, board_id: &str, room: &Arc<BoardRoom>) {
        let mut boards = self.boards.write().await;
        if let Some(current) = boards.get(board_id) {
            if Arc::ptr_eq(current, room) {
                boards.remove(board_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrawl_core::Point;

    fn stroke() -> StrokeInput {
        StrokeInput {
            path: vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)],
            color: [0.0, 0.0, 0.0, 1.0],
            width: 1.0,
        }
    }

    fn registry() -> RoomRegistry {
        RoomRegistry::new(RoomConfig::default())
    }

    #[tokio::test]
    async fn test_join_creates_board_lazily() {
        let registry = registry();
        assert_eq!(registry.board_count().await, 0);

        let conn = Uuid::new_v4();
        let joined = registry.join(conn, "1").await.unwrap();

        assert_eq!(joined.board_id, "1");
        assert_eq!(joined.epoch, 0);
        assert!(joined.strokes.is_empty());
        assert_eq!(joined.members, vec![conn]);
        assert_eq!(registry.board_count().await, 1);
    }

    #[tokio::test]
    async fn test_rejoin_same_board_is_idempotent() {
        let registry = registry();
        let conn = Uuid::new_v4();

        registry.join(conn, "1").await.unwrap();
        let again = registry.join(conn, "1").await.unwrap();

        assert_eq!(again.members, vec![conn]);
        assert_eq!(registry.members_of("1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_join_moves_connection_between_boards() {
        let registry = registry();
        let conn = Uuid::new_v4();
        let other = Uuid::new_v4();

        registry.join(other, "1").await.unwrap();
        registry.join(conn, "1").await.unwrap();
        registry.join(conn, "2").await.unwrap();

        assert_eq!(registry.members_of("1").await, vec![other]);
        assert_eq!(registry.members_of("2").await, vec![conn]);
    }

    #[tokio::test]
    async fn test_leave_unknown_connection_is_noop() {
        let registry = registry();
        registry.leave(Uuid::new_v4()).await;
        assert_eq!(registry.board_count().await, 0);
    }

    #[tokio::test]
    async fn test_empty_board_evicted_by_policy() {
        let registry = registry();
        let conn = Uuid::new_v4();

        registry.join(conn, "1").await.unwrap();
        registry.leave(conn).await;

        assert_eq!(registry.board_count().await, 0);
    }

    #[tokio::test]
    async fn test_empty_board_kept_when_eviction_disabled() {
        let registry = RoomRegistry::new(RoomConfig {
            evict_empty_boards: false,
            ..RoomConfig::default()
        });
        let conn = Uuid::new_v4();

        let joined = registry.join(conn, "1").await.unwrap();
        joined
            .room
            .append_stroke(conn, 0, stroke())
            .await
            .unwrap();
        registry.leave(conn).await;

        assert_eq!(registry.board_count().await, 1);

        // History survives for the next joiner.
        let back = registry.join(conn, "1").await.unwrap();
        assert_eq!(back.strokes.len(), 1);
    }

    #[tokio::test]
    async fn test_board_full_refused() {
        let registry = RoomRegistry::new(RoomConfig {
            max_members_per_board: 1,
            ..RoomConfig::default()
        });

        registry.join(Uuid::new_v4(), "1").await.unwrap();
        let err = registry.join(Uuid::new_v4(), "1").await.unwrap_err();
        assert!(matches!(err, JoinError::BoardFull { .. }));

        // A re-join of an existing member is not a capacity violation.
        let member = registry.members_of("1").await[0];
        assert!(registry.join(member, "1").await.is_ok());
    }

    #[tokio::test]
    async fn test_append_fans_out_in_order() {
        let registry = registry();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let a = registry.join(alice, "1").await.unwrap();
        let mut b = registry.join(bob, "1").await.unwrap();

        for _ in 0..5 {
            a.room.append_stroke(alice, 0, stroke()).await.unwrap();
        }

        let mut seqs = Vec::new();
        for _ in 0..5 {
            let envelope = b.events.recv().await.unwrap();
            match &envelope.event {
                BoardEvent::Stroke(record) => {
                    assert_eq!(envelope.origin, alice);
                    seqs.push(record.seq);
                }
                other => panic!("expected stroke, got {other:?}"),
            }
        }
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_snapshot_excludes_later_strokes() {
        let registry = registry();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let a = registry.join(alice, "1").await.unwrap();
        a.room.append_stroke(alice, 0, stroke()).await.unwrap();

        let mut b = registry.join(bob, "1").await.unwrap();
        assert_eq!(b.strokes.len(), 1);

        a.room.append_stroke(alice, 0, stroke()).await.unwrap();

        // The second stroke arrives live, not in the snapshot.
        let envelope = b.events.recv().await.unwrap();
        match &envelope.event {
            BoardEvent::Stroke(record) => assert_eq!(record.seq, 1),
            other => panic!("expected live stroke, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_late_joiner_sees_no_prior_events() {
        let registry = registry();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let a = registry.join(alice, "1").await.unwrap();
        a.room.append_stroke(alice, 0, stroke()).await.unwrap();

        let mut b = registry.join(bob, "1").await.unwrap();
        a.room.append_stroke(alice, 0, stroke()).await.unwrap();

        // First envelope for the late joiner is the post-join stroke.
        let envelope = b.events.recv().await.unwrap();
        match &envelope.event {
            BoardEvent::Stroke(record) => assert_eq!(record.seq, 1),
            other => panic!("expected stroke, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stale_append_rejected_and_not_fanned_out() {
        let registry = registry();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let a = registry.join(alice, "1").await.unwrap();
        let mut b = registry.join(bob, "1").await.unwrap();

        a.room.clear(alice).await.unwrap();
        let err = a.room.append_stroke(alice, 0, stroke()).await.unwrap_err();
        assert!(matches!(err, AppendError::Stale(_)));

        // Bob sees only the clear.
        let envelope = b.events.recv().await.unwrap();
        assert_eq!(envelope.event, BoardEvent::Cleared { epoch: 1 });
        assert!(b.events.try_recv().is_err());

        let (epoch, strokes) = a.room.snapshot().await;
        assert_eq!(epoch, 1);
        assert!(strokes.is_empty());
    }

    #[tokio::test]
    async fn test_non_member_append_rejected() {
        let registry = registry();
        let alice = Uuid::new_v4();
        let stranger = Uuid::new_v4();

        let a = registry.join(alice, "1").await.unwrap();
        let err = a
            .room
            .append_stroke(stranger, 0, stroke())
            .await
            .unwrap_err();
        assert_eq!(err, AppendError::NotAMember);
        assert!(a.room.snapshot().await.1.is_empty());
    }

    #[tokio::test]
    async fn test_boards_are_isolated() {
        let registry = registry();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let a = registry.join(alice, "1").await.unwrap();
        let mut b = registry.join(bob, "2").await.unwrap();

        a.room.append_stroke(alice, 0, stroke()).await.unwrap();

        assert!(b.events.try_recv().is_err(), "board 2 saw board 1 traffic");
    }

    #[tokio::test]
    async fn test_clear_by_non_member_is_refused() {
        let registry = registry();
        let alice = Uuid::new_v4();

        let a = registry.join(alice, "1").await.unwrap();
        assert_eq!(a.room.clear(Uuid::new_v4()).await, None);
        assert_eq!(a.room.snapshot().await.0, 0);
    }

    #[tokio::test]
    async fn test_publish_after_member_left_does_not_panic() {
        let registry = registry();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let a = registry.join(alice, "1").await.unwrap();
        registry.join(bob, "1").await.unwrap();
        registry.leave(bob).await;

        assert_eq!(registry.members_of("1").await.len(), 1);
        a.room.append_stroke(alice, 0, stroke()).await.unwrap();
    }

    #[tokio::test]
    async fn test_eviction_races_join_without_orphaning() {
        let registry = Arc::new(registry());
        let board = "contested";

        // Hammer join/leave from many tasks; every join must land in the
        // registry's current room for the id, never an evicted one.
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let conn = Uuid::new_v4();
                    let joined = registry.join(conn, board).await.unwrap();
                    assert!(joined.members.contains(&conn));
                    registry.leave(conn).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(registry.members_of(board).await.is_empty());
    }
}
