//! Committees of parties and threshold computation

use crate::curve::{Curve, party_index};
use crate::types::PartyId;
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;

/// Smallest committee that can run a threshold protocol
pub const MIN_PARTIES: usize = 2;

/// Signing threshold for a committee of `n` parties: `ceil((n + 1) / 2) - 1`.
///
/// Any `threshold + 1` parties can sign. Negative counts are rejected.
pub fn get_threshold(n: i64) -> Result<usize> {
    if n < 0 {
        return Err(Error::InvalidInput("invalid input".into()));
    }
    Ok(threshold_of(n as usize))
}

fn threshold_of(n: usize) -> usize {
    (n + 2) / 2 - 1
}

/// Report whether `item` is one of the comma-separated entries of `list`
pub fn contains(list: &str, item: &str) -> bool {
    list.split(',').map(str::trim).any(|entry| entry == item)
}

/// Ordered set of party keys.
///
/// Ordering is lexicographic on the keys, independent of how the request
/// listed them, so every peer iterates the committee the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committee {
    parties: Vec<PartyId>,
}

impl Committee {
    /// Parse a comma-separated committee, ignoring blank entries
    pub fn parse(csv: &str) -> Result<Self> {
        Self::from_parties(
            csv.split(',')
                .map(str::trim)
                .filter(|party| !party.is_empty())
                .map(str::to_string),
        )
    }

    /// Build a committee, rejecting duplicates and committees that are too small
    pub fn from_parties<I>(parties: I) -> Result<Self>
    where
        I: IntoIterator<Item = PartyId>,
    {
        let mut set = BTreeSet::new();
        for party in parties {
            if party.is_empty() {
                return Err(Error::InvalidInput("empty party key".into()));
            }
            if !set.insert(party.clone()) {
                return Err(Error::InvalidInput(format!("duplicate party {}", party)));
            }
        }
        if set.len() < MIN_PARTIES {
            return Err(Error::InvalidInput(format!(
                "committee needs at least {} parties, got {}",
                MIN_PARTIES,
                set.len()
            )));
        }
        Ok(Self {
            parties: set.into_iter().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }

    pub fn parties(&self) -> &[PartyId] {
        &self.parties
    }

    pub fn contains(&self, party: &str) -> bool {
        self.parties.binary_search_by(|p| p.as_str().cmp(party)).is_ok()
    }

    /// Fail unless `party` is a member
    pub fn require_member(&self, party: &str) -> Result<()> {
        if self.contains(party) {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "{} is not in committee {}",
                party, self
            )))
        }
    }

    /// Every member except `party`, in committee order
    pub fn others(&self, party: &str) -> Vec<PartyId> {
        self.parties
            .iter()
            .filter(|p| p.as_str() != party)
            .cloned()
            .collect()
    }

    /// Check every member of `self` is also in `other`
    pub fn is_subset_of(&self, other: &[PartyId]) -> bool {
        self.parties.iter().all(|p| other.contains(p))
    }

    /// Members of either committee, in committee order
    pub fn union(&self, other: &Committee) -> Vec<PartyId> {
        let set: BTreeSet<_> = self.parties.iter().chain(other.parties.iter()).cloned().collect();
        set.into_iter().collect()
    }

    /// Threshold for a keygen over this committee
    pub fn threshold(&self) -> usize {
        threshold_of(self.parties.len())
    }

    /// Evaluation points for every member, rejecting zero or colliding points
    pub fn evaluation_points<C: Curve>(&self) -> Result<Vec<C::Scalar>> {
        let points: Vec<C::Scalar> = self.parties.iter().map(|p| party_index::<C>(p)).collect();
        for (i, x) in points.iter().enumerate() {
            if *x == C::zero() || points[..i].contains(x) {
                return Err(Error::InvalidInput(format!(
                    "party {} has an unusable evaluation point",
                    self.parties[i]
                )));
            }
        }
        Ok(points)
    }
}

impl fmt::Display for Committee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parties.join(","))
    }
}
