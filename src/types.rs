//! Common types used throughout the dungeon finder

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of an individual participant (a character)
pub type ActorId = u64;

/// Identifier of a party, also used as its persistence key
pub type PartyId = u64;

/// Identifier of an activity definition
pub type ActivityId = u32;

/// Identifier of a proposal
pub type ProposalId = u32;

/// Queue partition identifier
pub type PartitionId = u8;

/// Something that occupies a single slot in a queue: a solo participant or
/// a whole pre-formed party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CandidateId {
    Actor(ActorId),
    Party(PartyId),
}

impl CandidateId {
    pub fn is_party(&self) -> bool {
        matches!(self, CandidateId::Party(_))
    }

    pub fn party(&self) -> Option<PartyId> {
        match self {
            CandidateId::Party(id) => Some(*id),
            CandidateId::Actor(_) => None,
        }
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateId::Actor(id) => write!(f, "actor:{}", id),
            CandidateId::Party(id) => write!(f, "party:{}", id),
        }
    }
}

/// Team a participant belongs to; selects the queue partition unless
/// cross-team queueing is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Team {
    #[default]
    Alliance,
    Horde,
}

impl Team {
    pub fn partition(&self) -> PartitionId {
        match self {
            Team::Alliance => 0,
            Team::Horde => 1,
        }
    }
}

bitflags! {
    /// Role flags selected by a participant. `LEADER` only marks the
    /// preferred party leader and is never a role by itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
    pub struct RoleFlags: u8 {
        const LEADER = 0x01;
        const TANK = 0x02;
        const HEALER = 0x04;
        const DAMAGE = 0x08;
    }
}

impl RoleFlags {
    /// The three assignable roles
    pub const ASSIGNABLE: RoleFlags = RoleFlags::TANK
        .union(RoleFlags::HEALER)
        .union(RoleFlags::DAMAGE);

    /// True when at least one assignable role is selected
    pub fn has_assignable_role(&self) -> bool {
        self.intersects(Self::ASSIGNABLE)
    }

    pub fn is_leader(&self) -> bool {
        self.contains(RoleFlags::LEADER)
    }

    /// The single role selected, if exactly one assignable role is set
    pub fn single_role(&self) -> Option<Role> {
        let roles = *self & Self::ASSIGNABLE;
        if roles == RoleFlags::TANK {
            Some(Role::Tank)
        } else if roles == RoleFlags::HEALER {
            Some(Role::Healer)
        } else if roles == RoleFlags::DAMAGE {
            Some(Role::Damage)
        } else {
            None
        }
    }
}

impl Serialize for RoleFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RoleFlags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        Ok(Self::from_bits_truncate(bits))
    }
}

/// A single assigned role inside a formed party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Tank,
    Healer,
    Damage,
}

impl Role {
    /// Roles in the order they are tried during assignment and listed in a
    /// formed party
    pub const ALL: [Role; 3] = [Role::Tank, Role::Healer, Role::Damage];

    pub fn flag(&self) -> RoleFlags {
        match self {
            Role::Tank => RoleFlags::TANK,
            Role::Healer => RoleFlags::HEALER,
            Role::Damage => RoleFlags::DAMAGE,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Tank => write!(f, "tank"),
            Role::Healer => write!(f, "healer"),
            Role::Damage => write!(f, "damage"),
        }
    }
}

/// Role flags per member of a candidate or candidate set
pub type RoleMap = BTreeMap<ActorId, RoleFlags>;

/// Lifecycle state of a participant or party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LifecycleState {
    #[default]
    Idle,
    RoleCheck,
    Queued,
    Proposal,
    InActivity,
    ActivityFinished,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::RoleCheck => "role_check",
            LifecycleState::Queued => "queued",
            LifecycleState::Proposal => "proposal",
            LifecycleState::InActivity => "in_activity",
            LifecycleState::ActivityFinished => "activity_finished",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of a join request. Everything except `Ok` is a rejection that
/// left all state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinResultCode {
    Ok,
    NoPermission,
    NoRoleSelected,
    NotPartyLeader,
    AlreadyInProgress,
    UsingBattlegroundSystem,
    Deserter,
    PartyDeserter,
    RandomCooldown,
    PartyRandomCooldown,
    TooManyMembers,
    MembersDisconnected,
    NotMeetRequirements,
    PartyNotMeetRequirements,
    MixedActivityCategories,
    InvalidActivity,
    RoleCheckFailed,
    InternalError,
}

impl JoinResultCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, JoinResultCode::Ok)
    }

    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinResultCode::Ok => "ok",
            JoinResultCode::NoPermission => "no_permission",
            JoinResultCode::NoRoleSelected => "no_role_selected",
            JoinResultCode::NotPartyLeader => "not_party_leader",
            JoinResultCode::AlreadyInProgress => "already_in_progress",
            JoinResultCode::UsingBattlegroundSystem => "using_battleground_system",
            JoinResultCode::Deserter => "deserter",
            JoinResultCode::PartyDeserter => "party_deserter",
            JoinResultCode::RandomCooldown => "random_cooldown",
            JoinResultCode::PartyRandomCooldown => "party_random_cooldown",
            JoinResultCode::TooManyMembers => "too_many_members",
            JoinResultCode::MembersDisconnected => "members_disconnected",
            JoinResultCode::NotMeetRequirements => "not_meet_requirements",
            JoinResultCode::PartyNotMeetRequirements => "party_not_meet_requirements",
            JoinResultCode::MixedActivityCategories => "mixed_activity_categories",
            JoinResultCode::InvalidActivity => "invalid_activity",
            JoinResultCode::RoleCheckFailed => "role_check_failed",
            JoinResultCode::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for JoinResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of a status update sent to a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateKind {
    JoinQueue,
    AddedToQueue,
    RemovedFromQueue,
    RoleCheckAborted,
    RoleCheckFailed,
    ProposalBegin,
    ProposalFailed,
    ProposalDeclined,
    GroupFound,
    LeftParty,
}

/// Why an activity is locked for a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockReason {
    InsufficientExpansion,
    TooLowLevel,
    TooHighLevel,
    TooLowGearScore,
    TooHighGearScore,
    RaidLocked,
    AttunementMissing,
    QuestIncomplete,
    MissingItem,
    NotInSeason,
}

/// Composite activity key: activity id in the low 24 bits, category in the
/// high byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivityKey(pub u32);

impl ActivityKey {
    const ID_MASK: u32 = 0x00FF_FFFF;

    pub fn new(activity_id: ActivityId, category: u8) -> Self {
        Self((activity_id & Self::ID_MASK) | ((category as u32) << 24))
    }

    pub fn activity_id(&self) -> ActivityId {
        self.0 & Self::ID_MASK
    }

    pub fn category(&self) -> u8 {
        (self.0 >> 24) as u8
    }
}

/// Activities locked per member, reported with a rejected join
pub type LockMap = BTreeMap<ActorId, BTreeMap<ActivityKey, LockReason>>;
