//! Singing roles
//!
//! The legal role changes form a fixed table. Every pair not in the table is
//! refused before any side effect runs.

mod machine;

pub use machine::*;

/// Singing role of the local participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    #[default]
    Audience,
    SoloSinger,
    CoSinger,
    LeadSinger,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Audience, Role::SoloSinger, Role::CoSinger, Role::LeadSinger];

    /// Solo and lead singers own the authoritative player
    pub const fn is_main_singer(self) -> bool {
        matches!(self, Role::SoloSinger | Role::LeadSinger)
    }

    /// Roles that hold a chorus channel membership
    pub const fn is_chorus_member(self) -> bool {
        matches!(self, Role::LeadSinger | Role::CoSinger)
    }
}

/// A legal role change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// Audience -> SoloSinger
    PublishSolo,
    /// Audience -> LeadSinger
    PublishAndJoinChorus,
    /// Audience -> CoSinger
    JoinChorusAsCoSinger,
    /// SoloSinger -> Audience
    StopSolo,
    /// SoloSinger -> LeadSinger
    JoinChorusAsLead,
    /// CoSinger -> Audience
    LeaveChorusAsCoSinger,
    /// LeadSinger -> SoloSinger
    LeaveChorusAsLead,
    /// LeadSinger -> Audience
    StopLead,
}

impl Transition {
    /// Look up the transition from `from` to `to`
    pub const fn plan(from: Role, to: Role) -> Option<Transition> {
        match (from, to) {
            (Role::Audience, Role::SoloSinger) => Some(Transition::PublishSolo),
            (Role::Audience, Role::LeadSinger) => Some(Transition::PublishAndJoinChorus),
            (Role::Audience, Role::CoSinger) => Some(Transition::JoinChorusAsCoSinger),
            (Role::SoloSinger, Role::Audience) => Some(Transition::StopSolo),
            (Role::SoloSinger, Role::LeadSinger) => Some(Transition::JoinChorusAsLead),
            (Role::CoSinger, Role::Audience) => Some(Transition::LeaveChorusAsCoSinger),
            (Role::LeadSinger, Role::SoloSinger) => Some(Transition::LeaveChorusAsLead),
            (Role::LeadSinger, Role::Audience) => Some(Transition::StopLead),
            _ => None,
        }
    }

    pub const fn source(self) -> Role {
        match self {
            Transition::PublishSolo | Transition::PublishAndJoinChorus | Transition::JoinChorusAsCoSinger => {
                Role::Audience
            }
            Transition::StopSolo | Transition::JoinChorusAsLead => Role::SoloSinger,
            Transition::LeaveChorusAsCoSinger => Role::CoSinger,
            Transition::LeaveChorusAsLead | Transition::StopLead => Role::LeadSinger,
        }
    }

    pub const fn target(self) -> Role {
        match self {
            Transition::PublishSolo | Transition::LeaveChorusAsLead => Role::SoloSinger,
            Transition::PublishAndJoinChorus | Transition::JoinChorusAsLead => Role::LeadSinger,
            Transition::JoinChorusAsCoSinger => Role::CoSinger,
            Transition::StopSolo | Transition::LeaveChorusAsCoSinger | Transition::StopLead => Role::Audience,
        }
    }

    /// Whether this transition has to join the chorus channel
    pub const fn joins_chorus(self) -> bool {
        matches!(
            self,
            Transition::PublishAndJoinChorus | Transition::JoinChorusAsCoSinger | Transition::JoinChorusAsLead
        )
    }
}
