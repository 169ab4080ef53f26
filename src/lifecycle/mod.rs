//! Time-boxed group decisions: proposals, role checks and vote-kicks

pub mod boot_vote;
pub mod proposal;
pub mod role_check;

pub use boot_vote::{BootOutcome, BootVote, BootVoteBook, BootVoteStart};
pub use proposal::{Answer, Proposal, ProposalBook, ProposalMember, ProposalOutcome, ProposalState};
pub use role_check::{RoleCheck, RoleCheckBook, RoleCheckState};
