use crate::types::{ValidatorEvent, ValidatorStatus};

/// Next status for `status` receiving `event`, or `None` when the pair is not
/// part of the transition table. `Banned` accepts nothing.
pub fn next_status(status: ValidatorStatus, event: ValidatorEvent) -> Option<ValidatorStatus> {
    use ValidatorEvent::*;
    use ValidatorStatus::*;

    match (status, event) {
        (Active, ProposalOk) => Some(Active),
        (Active, ProposalMissed) => Some(YellowCard),
        (YellowCard, ProposalOk) => Some(Active),
        (YellowCard, ProposalMissed) => Some(RedCard),
        (RedCard, ProposalOk) => Some(YellowCard),
        (RedCard, ProposalMissed) => Some(RedCard),

        (Active | YellowCard | RedCard, ProposalWrongFee) => Some(Banned),
        (Active | YellowCard | RedCard, Unsubscribe) => Some(NotSubscribed),

        (NotSubscribed | Untracked, ManualSubscription | AutoSubscription) => Some(Active),

        _ => None,
    }
}
