//! Single-writer task around `MatchmakingService`
//!
//! Every command goes through one mailbox and the clock ticks on the same
//! task, so the service never needs a lock. Callers talk to it through a
//! cloneable `ServiceHandle`.

use super::matchmaking::{MatchmakingService, MatchmakingStats};
use super::observer::{MemberRemoval, PartyLifecycleObserver};
use super::tick::TeleportOutcome;
use crate::error::MatchmakingError;
use crate::lifecycle::BootVoteStart;
use crate::types::{ActivityId, ActorId, JoinResultCode, PartyId, ProposalId, RoleFlags, Team};
use crate::Result;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Commands accepted by the service task
#[derive(Debug)]
pub enum Command {
    JoinQueue {
        actor: ActorId,
        roles: RoleFlags,
        activities: BTreeSet<ActivityId>,
        reply: oneshot::Sender<JoinResultCode>,
    },
    LeaveQueue {
        actor: ActorId,
        disconnected: bool,
    },
    RoleVote {
        party: PartyId,
        actor: ActorId,
        roles: RoleFlags,
    },
    ProposalAnswer {
        proposal: ProposalId,
        actor: ActorId,
        accept: bool,
    },
    InitiateBootVote {
        party: PartyId,
        kicker: ActorId,
        victim: ActorId,
        reason: String,
        reply: oneshot::Sender<BootVoteStart>,
    },
    BootVoteAnswer {
        party: PartyId,
        actor: ActorId,
        agree: bool,
    },
    MemberAdded {
        party: PartyId,
        actor: ActorId,
    },
    MemberRemoved {
        party: PartyId,
        actor: ActorId,
        removal: MemberRemoval,
    },
    LeaderChanged {
        party: PartyId,
        leader: ActorId,
    },
    Disbanded {
        party: PartyId,
    },
    FinishActivity {
        party: PartyId,
        activity: ActivityId,
    },
    RestoreParty {
        party: PartyId,
        reply: oneshot::Sender<Result<bool>>,
    },
    Login {
        actor: ActorId,
        team: Team,
    },
    Logout {
        actor: ActorId,
    },
    Teleport {
        actor: ActorId,
        out: bool,
        reply: oneshot::Sender<TeleportOutcome>,
    },
    Stats {
        reply: oneshot::Sender<MatchmakingStats>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::JoinQueue { .. } => "join_queue",
            Command::LeaveQueue { .. } => "leave_queue",
            Command::RoleVote { .. } => "role_vote",
            Command::ProposalAnswer { .. } => "proposal_answer",
            Command::InitiateBootVote { .. } => "initiate_boot_vote",
            Command::BootVoteAnswer { .. } => "boot_vote_answer",
            Command::MemberAdded { .. } => "member_added",
            Command::MemberRemoved { .. } => "member_removed",
            Command::LeaderChanged { .. } => "leader_changed",
            Command::Disbanded { .. } => "disbanded",
            Command::FinishActivity { .. } => "finish_activity",
            Command::RestoreParty { .. } => "restore_party",
            Command::Login { .. } => "login",
            Command::Logout { .. } => "logout",
            Command::Teleport { .. } => "teleport",
            Command::Stats { .. } => "stats",
        }
    }

    fn apply(self, service: &mut MatchmakingService) {
        // A dropped reply receiver only means the caller stopped waiting
        match self {
            Command::JoinQueue {
                actor,
                roles,
                activities,
                reply,
            } => {
                let _ = reply.send(service.join_queue(actor, roles, activities));
            }
            Command::LeaveQueue {
                actor,
                disconnected,
            } => service.leave_queue(actor, disconnected),
            Command::RoleVote { party, actor, roles } => {
                service.submit_role_vote(party, actor, roles)
            }
            Command::ProposalAnswer {
                proposal,
                actor,
                accept,
            } => service.respond_proposal(proposal, actor, accept),
            Command::InitiateBootVote {
                party,
                kicker,
                victim,
                reason,
                reply,
            } => {
                let _ = reply.send(service.initiate_boot_vote(party, kicker, victim, reason));
            }
            Command::BootVoteAnswer {
                party,
                actor,
                agree,
            } => service.respond_boot_vote(party, actor, agree),
            Command::MemberAdded { party, actor } => service.on_member_added(party, actor),
            Command::MemberRemoved {
                party,
                actor,
                removal,
            } => service.on_member_removed(party, actor, removal),
            Command::LeaderChanged { party, leader } => service.on_leader_changed(party, leader),
            Command::Disbanded { party } => service.on_disbanded(party),
            Command::FinishActivity { party, activity } => {
                service.finish_activity(party, activity)
            }
            Command::RestoreParty { party, reply } => {
                let _ = reply.send(service.restore_party(party));
            }
            Command::Login { actor, team } => service.on_actor_login(actor, team),
            Command::Logout { actor } => service.on_actor_logout(actor),
            Command::Teleport { actor, out, reply } => {
                let _ = reply.send(service.request_teleport(actor, out));
            }
            Command::Stats { reply } => {
                let _ = reply.send(service.stats());
            }
        }
    }
}

/// Cloneable handle to the service task
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    sender: mpsc::UnboundedSender<Command>,
}

impl ServiceHandle {
    pub fn send(&self, command: Command) -> Result<()> {
        self.sender.send(command).map_err(|e| {
            MatchmakingError::ServiceUnavailable {
                message: format!("service task stopped, dropped {}", e.0.name()),
            }
            .into()
        })
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply))?;
        response.await.map_err(|_| {
            MatchmakingError::ServiceUnavailable {
                message: "service task dropped the reply".to_string(),
            }
            .into()
        })
    }

    pub async fn join_queue(
        &self,
        actor: ActorId,
        roles: RoleFlags,
        activities: BTreeSet<ActivityId>,
    ) -> Result<JoinResultCode> {
        self.request(|reply| Command::JoinQueue {
            actor,
            roles,
            activities,
            reply,
        })
        .await
    }

    pub fn leave_queue(&self, actor: ActorId, disconnected: bool) -> Result<()> {
        self.send(Command::LeaveQueue {
            actor,
            disconnected,
        })
    }

    pub fn submit_role_vote(&self, party: PartyId, actor: ActorId, roles: RoleFlags) -> Result<()> {
        self.send(Command::RoleVote { party, actor, roles })
    }

    pub fn respond_proposal(&self, proposal: ProposalId, actor: ActorId, accept: bool) -> Result<()> {
        self.send(Command::ProposalAnswer {
            proposal,
            actor,
            accept,
        })
    }

    pub async fn initiate_boot_vote(
        &self,
        party: PartyId,
        kicker: ActorId,
        victim: ActorId,
        reason: String,
    ) -> Result<BootVoteStart> {
        self.request(|reply| Command::InitiateBootVote {
            party,
            kicker,
            victim,
            reason,
            reply,
        })
        .await
    }

    pub fn respond_boot_vote(&self, party: PartyId, actor: ActorId, agree: bool) -> Result<()> {
        self.send(Command::BootVoteAnswer {
            party,
            actor,
            agree,
        })
    }

    pub fn member_added(&self, party: PartyId, actor: ActorId) -> Result<()> {
        self.send(Command::MemberAdded { party, actor })
    }

    pub fn member_removed(
        &self,
        party: PartyId,
        actor: ActorId,
        removal: MemberRemoval,
    ) -> Result<()> {
        self.send(Command::MemberRemoved {
            party,
            actor,
            removal,
        })
    }

    pub fn leader_changed(&self, party: PartyId, leader: ActorId) -> Result<()> {
        self.send(Command::LeaderChanged { party, leader })
    }

    pub fn disbanded(&self, party: PartyId) -> Result<()> {
        self.send(Command::Disbanded { party })
    }

    pub fn finish_activity(&self, party: PartyId, activity: ActivityId) -> Result<()> {
        self.send(Command::FinishActivity { party, activity })
    }

    pub fn login(&self, actor: ActorId, team: Team) -> Result<()> {
        self.send(Command::Login { actor, team })
    }

    pub fn logout(&self, actor: ActorId) -> Result<()> {
        self.send(Command::Logout { actor })
    }

    pub async fn restore_party(&self, party: PartyId) -> Result<bool> {
        self.request(|reply| Command::RestoreParty { party, reply })
            .await?
    }

    pub async fn request_teleport(&self, actor: ActorId, out: bool) -> Result<TeleportOutcome> {
        self.request(|reply| Command::Teleport { actor, out, reply })
            .await
    }

    pub async fn stats(&self) -> Result<MatchmakingStats> {
        self.request(|reply| Command::Stats { reply }).await
    }
}

/// Move the service onto its own task, ticking every `tick_interval`.
/// The task ends once every handle is dropped.
pub fn spawn_service(
    mut service: MatchmakingService,
    tick_interval: Duration,
) -> (ServiceHandle, JoinHandle<()>) {
    let (sender, mut mailbox) = mpsc::unbounded_channel::<Command>();
    let metrics = service.metrics.clone();

    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_tick = Instant::now();
        info!("Matchmaking service task started ({:?} ticks)", tick_interval);

        loop {
            tokio::select! {
                command = mailbox.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    let name = command.name();
                    let started = Instant::now();
                    debug!("Applying command {}", name);
                    command.apply(&mut service);
                    if let Some(metrics) = &metrics {
                        metrics.record_command(name, started.elapsed());
                    }
                }
                _ = interval.tick() => {
                    let now = Instant::now();
                    service.tick(now.duration_since(last_tick));
                    last_tick = now;
                }
            }
        }

        let stats = service.stats();
        if stats.total_queued() > 0 {
            warn!(
                "Service task stopping with {} candidates still queued",
                stats.total_queued()
            );
        }
        info!("Matchmaking service task stopped: {:?}", stats);
    });

    (ServiceHandle { sender }, task)
}
