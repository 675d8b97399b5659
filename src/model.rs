use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Identity handed to us by the authentication layer. Opaque to the engine.
pub type ActorId = String;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Fallible constructor for untrusted input.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Roles and stages ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Requester,
    Faculty,
    Hod,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Requester => write!(f, "requester"),
            Role::Faculty => write!(f, "faculty"),
            Role::Hod => write!(f, "head of department"),
            Role::Admin => write!(f, "administrator"),
        }
    }
}

/// One of the three sequential approval stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Faculty,
    Hod,
    Admin,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Faculty, Stage::Hod, Stage::Admin];

    pub fn index(self) -> usize {
        match self {
            Stage::Faculty => 0,
            Stage::Hod => 1,
            Stage::Admin => 2,
        }
    }

    /// Role tier that owns this stage.
    pub fn role(self) -> Role {
        match self {
            Stage::Faculty => Role::Faculty,
            Stage::Hod => Role::Hod,
            Stage::Admin => Role::Admin,
        }
    }

    /// Stage owned by `role`, if the role is an approver tier.
    pub fn for_role(role: Role) -> Option<Stage> {
        match role {
            Role::Requester => None,
            Role::Faculty => Some(Stage::Faculty),
            Role::Hod => Some(Stage::Hod),
            Role::Admin => Some(Stage::Admin),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    PendingFaculty,
    PendingHod,
    PendingAdmin,
    Confirmed,
    Rejected,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Confirmed | Status::Rejected)
    }

    /// Anything not rejected still holds its slot.
    pub fn is_active(self) -> bool {
        self != Status::Rejected
    }

    pub fn stage(self) -> Option<Stage> {
        match self {
            Status::PendingFaculty => Some(Stage::Faculty),
            Status::PendingHod => Some(Stage::Hod),
            Status::PendingAdmin => Some(Stage::Admin),
            Status::Confirmed | Status::Rejected => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::PendingFaculty => write!(f, "PENDING_FACULTY"),
            Status::PendingHod => write!(f, "PENDING_HOD"),
            Status::PendingAdmin => write!(f, "PENDING_ADMIN"),
            Status::Confirmed => write!(f, "CONFIRMED"),
            Status::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Caller identity with its resolved role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<ActorId>, role: Role) -> Self {
        Self { id: id.into(), role }
    }
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hall {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub location: String,
    pub amenities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub hall_id: Ulid,
    pub requester_id: ActorId,
    pub title: String,
    pub description: String,
    pub span: Span,
    pub status: Status,
    /// Approving actor per stage, indexed by `Stage::index`.
    pub approvals: [Option<ActorId>; 3],
    pub rejected_by: Option<ActorId>,
    pub rejection_reason: Option<String>,
    pub created_at: Ms,
}

impl Booking {
    pub fn approver(&self, stage: Stage) -> Option<&str> {
        self.approvals[stage.index()].as_deref()
    }

    /// True if `actor_id` approved any stage or rejected the booking.
    pub fn acted_on_by(&self, actor_id: &str) -> bool {
        self.approvals.iter().flatten().any(|a| a == actor_id)
            || self.rejected_by.as_deref() == Some(actor_id)
    }
}

/// What an interval on a hall represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalKind {
    /// Still moving through the approval chain.
    Pending,
    Confirmed,
}

/// One active booking's footprint on a hall's timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub id: Ulid,
    pub span: Span,
    pub kind: IntervalKind,
}

#[derive(Debug, Clone)]
pub struct HallState {
    pub hall: Hall,
    /// Every booking ever made for this hall, terminal ones included.
    pub bookings: BTreeMap<Ulid, Booking>,
    /// Active bookings only, sorted by `span.start`.
    pub intervals: Vec<Interval>,
}

impl HallState {
    pub fn new(hall: Hall) -> Self {
        Self {
            hall,
            bookings: BTreeMap::new(),
            intervals: Vec::new(),
        }
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    pub fn remove_interval(&mut self, id: Ulid) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| i.id == id)?;
        Some(self.intervals.remove(pos))
    }

    pub fn set_interval_kind(&mut self, id: Ulid, kind: IntervalKind) {
        if let Some(interval) = self.intervals.iter_mut().find(|i| i.id == id) {
            interval.kind = kind;
        }
    }

    /// Return only intervals whose span overlaps the query window.
    /// Uses binary search to skip intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        let query_start = query.start;
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query_start)
    }
}

/// The event types: flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    HallRegistered {
        id: Ulid,
        name: String,
        capacity: u32,
        location: String,
        amenities: Vec<String>,
    },
    BookingSubmitted {
        id: Ulid,
        hall_id: Ulid,
        requester_id: ActorId,
        title: String,
        description: String,
        span: Span,
        created_at: Ms,
    },
    BookingAmended {
        id: Ulid,
        hall_id: Ulid,
        title: String,
        description: String,
    },
    BookingApproved {
        id: Ulid,
        hall_id: Ulid,
        stage: Stage,
        actor_id: ActorId,
        status: Status,
    },
    BookingRejected {
        id: Ulid,
        hall_id: Ulid,
        stage: Stage,
        actor_id: ActorId,
        reason: String,
    },
}

impl Event {
    pub fn hall_id(&self) -> Ulid {
        match self {
            Event::HallRegistered { id, .. } => *id,
            Event::BookingSubmitted { hall_id, .. }
            | Event::BookingAmended { hall_id, .. }
            | Event::BookingApproved { hall_id, .. }
            | Event::BookingRejected { hall_id, .. } => *hall_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// A slot taken on a hall's timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub booking_id: Ulid,
    pub hall_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub status: Status,
}
