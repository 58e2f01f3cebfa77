//! Validity tokens attached to cached profiles.
//!
//! A token first classifies itself ([`Validity::state`]). Only when it cannot
//! decide on its own (`Unknown`) is it compared with a token freshly obtained
//! from storage ([`Validity::compare`]).

use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidityState {
    Valid,
    Invalid,
    Unknown,
}

impl ValidityState {
    fn from_bool(valid: bool) -> Self {
        if valid {
            ValidityState::Valid
        } else {
            ValidityState::Invalid
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validity {
    /// Never goes stale.
    Always,
    /// Stale as soon as it is checked.
    Never,
    /// Last modification time of the backing document.
    Modified(SystemTime),
    /// Monotonic revision counter of the backing document.
    Revision(u64),
    /// The document did not exist when the token was taken.
    Absent,
    /// One token per member document, in a fixed order.
    Aggregate(Vec<Validity>),
}

impl Validity {
    /// Collapse per-tier tokens: a single token stays as is.
    pub fn combine(mut tokens: Vec<Validity>) -> Validity {
        if tokens.len() == 1 {
            return tokens.remove(0);
        }
        Validity::Aggregate(tokens)
    }

    pub fn state(&self) -> ValidityState {
        match self {
            Validity::Always => ValidityState::Valid,
            Validity::Never => ValidityState::Invalid,
            Validity::Modified(_) | Validity::Revision(_) | Validity::Absent => {
                ValidityState::Unknown
            }
            Validity::Aggregate(members) => {
                let mut state = ValidityState::Valid;
                for member in members {
                    match member.state() {
                        ValidityState::Invalid => return ValidityState::Invalid,
                        ValidityState::Unknown => state = ValidityState::Unknown,
                        ValidityState::Valid => {}
                    }
                }
                state
            }
        }
    }

    /// Decide against a fresh token. Tokens of different kinds never match.
    pub fn compare(&self, fresh: &Validity) -> ValidityState {
        match (self, fresh) {
            (Validity::Always, _) => ValidityState::Valid,
            (Validity::Never, _) => ValidityState::Invalid,
            (Validity::Modified(old), Validity::Modified(new)) => {
                ValidityState::from_bool(old == new)
            }
            (Validity::Revision(old), Validity::Revision(new)) => {
                ValidityState::from_bool(old == new)
            }
            (Validity::Absent, Validity::Absent) => ValidityState::Valid,
            (Validity::Aggregate(old), Validity::Aggregate(new)) => ValidityState::from_bool(
                old.len() == new.len()
                    && old
                        .iter()
                        .zip(new)
                        .all(|(old, new)| old.is_valid_against(new)),
            ),
            _ => ValidityState::Invalid,
        }
    }

    /// Full three-state resolution: classify first, compare only if unknown.
    pub fn is_valid_against(&self, fresh: &Validity) -> bool {
        match self.state() {
            ValidityState::Valid => true,
            ValidityState::Invalid => false,
            ValidityState::Unknown => self.compare(fresh) == ValidityState::Valid,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn self_deciding_tokens() {
        assert_eq!(Validity::Always.state(), ValidityState::Valid);
        assert_eq!(Validity::Never.state(), ValidityState::Invalid);
        assert_eq!(Validity::Revision(3).state(), ValidityState::Unknown);
        assert!(Validity::Always.is_valid_against(&Validity::Revision(9)));
        assert!(!Validity::Never.is_valid_against(&Validity::Never));
    }

    #[test]
    fn timestamps_compare_by_equality() {
        let then = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let later = then + Duration::from_secs(1);

        assert!(Validity::Modified(then).is_valid_against(&Validity::Modified(then)));
        assert!(!Validity::Modified(then).is_valid_against(&Validity::Modified(later)));
        assert!(!Validity::Modified(then).is_valid_against(&Validity::Revision(1)));
    }

    #[test]
    fn aggregate_needs_every_member() {
        let cached = Validity::Aggregate(vec![
            Validity::Revision(1),
            Validity::Absent,
            Validity::Revision(4),
        ]);

        let same = cached.clone();
        assert!(cached.is_valid_against(&same));

        let role_appeared = Validity::Aggregate(vec![
            Validity::Revision(1),
            Validity::Revision(1),
            Validity::Revision(4),
        ]);
        assert!(!cached.is_valid_against(&role_appeared));

        let shorter = Validity::Aggregate(vec![Validity::Revision(1)]);
        assert!(!cached.is_valid_against(&shorter));
    }

    #[test]
    fn aggregate_state_is_worst_member() {
        let with_never = Validity::Aggregate(vec![Validity::Always, Validity::Never]);
        assert_eq!(with_never.state(), ValidityState::Invalid);

        let all_always = Validity::Aggregate(vec![Validity::Always, Validity::Always]);
        assert_eq!(all_always.state(), ValidityState::Valid);
    }

    #[test]
    fn combine_unwraps_single_token() {
        assert_eq!(
            Validity::combine(vec![Validity::Revision(2)]),
            Validity::Revision(2)
        );
        assert!(matches!(
            Validity::combine(vec![Validity::Absent, Validity::Absent]),
            Validity::Aggregate(_)
        ));
    }
}
