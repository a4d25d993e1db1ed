//! Snowball decision cells.
//!
//! A cell holds a preference and a snowflake confidence counter. Each
//! finished poll either moves the preference to a challenger that gathered
//! `alpha_preference` votes and outvoted it, or leaves it in place; the
//! counter then grows if the (possibly new) preference gathered
//! `alpha_confidence` votes and resets otherwise. `beta` consecutive
//! confident polls finalize the cell.

use std::fmt;

use snow_ids::Id;
use snow_utils::Bag;

use crate::{ConsensusError, Parameters, Result};

/// The snowflake counter shared by every cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confidence {
    alpha_confidence: u64,
    beta: usize,
    confidence: usize,
    finalized: bool,
}

impl Confidence {
    pub fn new(params: &Parameters) -> Self {
        Self {
            alpha_confidence: params.alpha_confidence as u64,
            beta: params.beta,
            confidence: 0,
            finalized: false,
        }
    }

    /// Applies a poll in which the current preference received `votes`.
    fn record(&mut self, votes: u64) {
        if votes >= self.alpha_confidence {
            self.confidence += 1;
            self.finalized = self.confidence >= self.beta;
        } else {
            self.confidence = 0;
        }
    }

    fn reset(&mut self) {
        self.confidence = 0;
    }

    pub fn confidence(&self) -> usize {
        self.confidence
    }

    pub fn finalized(&self) -> bool {
        self.finalized
    }

    fn check_mutable(&self) -> Result<()> {
        if self.finalized {
            return Err(ConsensusError::AlreadyFinalized);
        }
        Ok(())
    }
}

/// A cell deciding between choice `0` and choice `1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    alpha_preference: u64,
    preference: usize,
    confidence: Confidence,
}

impl Binary {
    /// Creates a cell preferring `initial_preference`; any nonzero value means `1`.
    pub fn new(params: &Parameters, initial_preference: usize) -> Self {
        Self {
            alpha_preference: params.alpha_preference as u64,
            preference: usize::from(initial_preference != 0),
            confidence: Confidence::new(params),
        }
    }

    /// Applies a finished poll; `votes[c]` is the weight voting for choice `c`.
    pub fn record_poll(&mut self, votes: [u64; 2]) -> Result<()> {
        self.confidence.check_mutable()?;

        let other = 1 - self.preference;
        if votes[other] >= self.alpha_preference && votes[other] > votes[self.preference] {
            self.preference = other;
            self.confidence.reset();
        }
        self.confidence.record(votes[self.preference]);
        Ok(())
    }

    /// Applies a poll that produced no usable tally.
    pub fn record_unsuccessful_poll(&mut self) -> Result<()> {
        self.confidence.check_mutable()?;
        self.confidence.reset();
        Ok(())
    }

    pub fn preference(&self) -> usize {
        self.preference
    }

    pub fn confidence(&self) -> usize {
        self.confidence.confidence()
    }

    pub fn finalized(&self) -> bool {
        self.confidence.finalized()
    }
}

impl fmt::Display for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SB(Preference = {}, Confidence = {}, Finalized = {})",
            self.preference,
            self.confidence(),
            self.finalized()
        )
    }
}

/// A cell deciding among any number of choices named by [`Id`].
///
/// Used for the children of a block and for the members of a conflict set.
/// With two choices it behaves exactly like [`Binary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nnary {
    alpha_preference: u64,
    choices: Vec<Id>,
    preference: Id,
    confidence: Confidence,
}

impl Nnary {
    pub fn new(params: &Parameters, initial_preference: Id) -> Self {
        Self {
            alpha_preference: params.alpha_preference as u64,
            choices: vec![initial_preference],
            preference: initial_preference,
            confidence: Confidence::new(params),
        }
    }

    /// Adds a competing choice. Adding a known choice is a no-op.
    pub fn add(&mut self, choice: Id) -> Result<()> {
        self.confidence.check_mutable()?;
        if !self.choices.contains(&choice) {
            self.choices.push(choice);
        }
        Ok(())
    }

    /// Applies a finished poll. Votes for unknown choices are ignored.
    pub fn record_poll(&mut self, votes: &Bag<Id>) -> Result<()> {
        self.confidence.check_mutable()?;

        let preferred_votes = votes.count(&self.preference);
        let challenger = self
            .choices
            .iter()
            .filter(|choice| **choice != self.preference)
            .map(|choice| (votes.count(choice), *choice))
            .max();
        if let Some((challenger_votes, challenger)) = challenger {
            if challenger_votes >= self.alpha_preference && challenger_votes > preferred_votes {
                self.preference = challenger;
                self.confidence.reset();
            }
        }
        self.confidence.record(votes.count(&self.preference));
        Ok(())
    }

    pub fn record_unsuccessful_poll(&mut self) -> Result<()> {
        self.confidence.check_mutable()?;
        self.confidence.reset();
        Ok(())
    }

    pub fn preference(&self) -> Id {
        self.preference
    }

    pub fn choices(&self) -> &[Id] {
        &self.choices
    }

    pub fn confidence(&self) -> usize {
        self.confidence.confidence()
    }

    pub fn finalized(&self) -> bool {
        self.confidence.finalized()
    }
}

impl fmt::Display for Nnary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SB(Preference = {}, Choices = {}, Confidence = {}, Finalized = {})",
            self.preference,
            self.choices.len(),
            self.confidence(),
            self.finalized()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_id(byte: u8) -> Id {
        Id::from_bytes([byte; 32])
    }

    fn params() -> Parameters {
        Parameters::new(5, 4, 4, 3).unwrap()
    }

    #[test]
    fn test_binary_finalizes_after_beta_confident_polls() {
        let mut sb = Binary::new(&params(), 0);
        for expected in 1..=3 {
            sb.record_poll([4, 1]).unwrap();
            assert_eq!(sb.confidence(), expected);
        }
        assert!(sb.finalized());
        assert_eq!(sb.preference(), 0);
    }

    #[test]
    fn test_binary_oscillation_never_finalizes() {
        let mut sb = Binary::new(&params(), 0);

        sb.record_poll([4, 1]).unwrap();
        assert_eq!((sb.preference(), sb.confidence()), (0, 1));

        sb.record_poll([1, 4]).unwrap();
        assert_eq!((sb.preference(), sb.confidence()), (1, 1));

        sb.record_poll([4, 1]).unwrap();
        assert_eq!((sb.preference(), sb.confidence()), (0, 1));
        assert!(!sb.finalized());
    }

    #[test]
    fn test_binary_weak_quorum_resets() {
        let mut sb = Binary::new(&params(), 0);
        sb.record_poll([4, 0]).unwrap();
        sb.record_poll([3, 2]).unwrap();
        assert_eq!(sb.confidence(), 0);
        assert_eq!(sb.preference(), 0);
    }

    #[test]
    fn test_binary_preference_without_confidence() {
        let params = Parameters::new(5, 3, 4, 2).unwrap();
        let mut sb = Binary::new(&params, 0);
        sb.record_poll([0, 3]).unwrap();
        assert_eq!(sb.preference(), 1);
        assert_eq!(sb.confidence(), 0);
    }

    #[test]
    fn test_binary_tie_keeps_preference() {
        let params = Parameters::new(8, 5, 5, 2).unwrap();
        let mut sb = Binary::new(&params, 1);
        sb.record_poll([5, 5]).unwrap();
        assert_eq!(sb.preference(), 1);
        assert_eq!(sb.confidence(), 1);
    }

    #[test]
    fn test_binary_finalized_is_terminal() {
        let mut sb = Binary::new(&params(), 1);
        for _ in 0..3 {
            sb.record_poll([0, 5]).unwrap();
        }
        assert!(sb.finalized());
        assert_eq!(sb.record_poll([5, 0]), Err(ConsensusError::AlreadyFinalized));
        assert_eq!(
            sb.record_unsuccessful_poll(),
            Err(ConsensusError::AlreadyFinalized)
        );
        assert_eq!(sb.preference(), 1);
    }

    #[test]
    fn test_binary_unsuccessful_poll_resets() {
        let mut sb = Binary::new(&params(), 0);
        sb.record_poll([4, 1]).unwrap();
        sb.record_poll([4, 1]).unwrap();
        sb.record_unsuccessful_poll().unwrap();
        assert_eq!(sb.confidence(), 0);
        sb.record_poll([4, 1]).unwrap();
        assert!(!sb.finalized());
    }

    #[test]
    fn test_nnary_matches_binary() {
        let (zero, one) = (make_id(0), make_id(1));
        let polls: [[u64; 2]; 5] = [[4, 1], [1, 4], [0, 5], [2, 3], [0, 4]];

        let mut binary = Binary::new(&params(), 0);
        let mut nnary = Nnary::new(&params(), zero);
        nnary.add(one).unwrap();

        for votes in polls {
            let mut bag = Bag::new();
            bag.add_count(zero, votes[0]);
            bag.add_count(one, votes[1]);
            binary.record_poll(votes).unwrap();
            nnary.record_poll(&bag).unwrap();

            let expected = if binary.preference() == 0 { zero } else { one };
            assert_eq!(nnary.preference(), expected);
            assert_eq!(nnary.confidence(), binary.confidence());
            assert_eq!(nnary.finalized(), binary.finalized());
        }
    }

    #[test]
    fn test_nnary_ignores_unknown_choices() {
        let mut sb = Nnary::new(&params(), make_id(1));
        sb.add(make_id(2)).unwrap();

        let mut bag = Bag::new();
        bag.add_count(make_id(9), 5);
        sb.record_poll(&bag).unwrap();
        assert_eq!(sb.preference(), make_id(1));
        assert_eq!(sb.confidence(), 0);
    }

    #[test]
    fn test_nnary_add_after_finalized() {
        let mut sb = Nnary::new(&params(), make_id(1));
        let bag = Bag::of(vec![make_id(1); 5]);
        for _ in 0..3 {
            sb.record_poll(&bag).unwrap();
        }
        assert!(sb.finalized());
        assert_eq!(sb.add(make_id(2)), Err(ConsensusError::AlreadyFinalized));
        assert_eq!(sb.choices(), &[make_id(1)]);
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        /// A finished poll over choices 0..3, or `None` for an unsuccessful one.
        fn polls() -> impl Strategy<Value = Vec<Option<[u64; 3]>>> {
            proptest::collection::vec(proptest::option::weighted(0.9, [0u64..6, 0u64..6, 0u64..6]), 0..40)
        }

        proptest! {
            #[test]
            fn nnary_finalized_preference_is_stable(polls in polls()) {
                let mut sb = Nnary::new(&params(), make_id(0));
                sb.add(make_id(1)).unwrap();
                sb.add(make_id(2)).unwrap();

                let mut decided: Option<Id> = None;
                for poll in polls {
                    let outcome = match poll {
                        Some(counts) => {
                            let mut votes = Bag::new();
                            for (choice, count) in counts.into_iter().enumerate() {
                                votes.add_count(make_id(choice as u8), count);
                            }
                            sb.record_poll(&votes)
                        }
                        None => sb.record_unsuccessful_poll(),
                    };
                    match decided {
                        Some(preference) => {
                            prop_assert_eq!(outcome, Err(ConsensusError::AlreadyFinalized));
                            prop_assert_eq!(sb.preference(), preference);
                            prop_assert!(sb.finalized());
                        }
                        None => {
                            prop_assert_eq!(outcome, Ok(()));
                            if sb.finalized() {
                                decided = Some(sb.preference());
                            }
                        }
                    }
                }
                if decided.is_some() {
                    prop_assert_eq!(sb.add(make_id(3)), Err(ConsensusError::AlreadyFinalized));
                }
            }

            #[test]
            fn binary_finalized_preference_is_stable(
                initial in 0usize..2,
                polls in proptest::collection::vec([0u64..6, 0u64..6], 0..40),
            ) {
                let mut sb = Binary::new(&params(), initial);
                let mut decided: Option<usize> = None;
                for votes in polls {
                    let outcome = sb.record_poll(votes);
                    match decided {
                        Some(preference) => {
                            prop_assert_eq!(outcome, Err(ConsensusError::AlreadyFinalized));
                            prop_assert_eq!(sb.preference(), preference);
                        }
                        None if sb.finalized() => decided = Some(sb.preference()),
                        None => prop_assert_eq!(outcome, Ok(())),
                    }
                }
            }
        }
    }
}
