//! Key resharing between committees
//!
//! Moves a threshold key from an old committee to a new one (which may
//! overlap it, grow, shrink or change threshold) while the public key stays
//! fixed. Every participating old member deals its Lagrange-weighted share
//! `w_i = lambda_i * x_i` with a fresh polynomial of the new degree; each
//! new member sums the evaluations it receives. Since `sum w_i` is the
//! original secret, the new shares interpolate to the same key.

use super::{
    KeyShare, ReshareAckMessage, ReshareRound1Message, ReshareRound2Message, ReshareShareMessage,
    proof_context,
};
use crate::committee::Committee;
use crate::curve::{Curve, decode_points, encode_points, party_index};
use crate::mpc::Relay;
use crate::proofs::{hash_commitment, random_blind, verify_commitment};
use crate::vss::{Polynomial, evaluate_commitments, lagrange_coefficient, verify_share};
use crate::{Error, PartyId, Result, SessionId};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

const COMMITMENT_DOMAIN: &str = "reshare-commitment";

/// Inputs shared by every party of one reshare session
#[derive(Debug, Clone)]
pub struct ReshareParams {
    pub session_id: SessionId,
    pub party: PartyId,
    /// Current holders taking part; at least `threshold + 1` of them
    pub old_committee: Committee,
    /// Members receiving fresh shares
    pub new_committee: Committee,
}

impl ReshareParams {
    pub fn is_old_member(&self) -> bool {
        self.old_committee.contains(&self.party)
    }

    pub fn is_new_member(&self) -> bool {
        self.new_committee.contains(&self.party)
    }

    /// Threshold of the resulting key
    pub fn new_threshold(&self) -> usize {
        self.new_committee.threshold()
    }
}

/// Dealer state an old member carries between rounds
struct Dealing<C: Curve> {
    polynomial: Polynomial<C>,
    commitments: Vec<Vec<u8>>,
    blind: Vec<u8>,
}

/// Run one party's side of a reshare.
///
/// Old members must pass their current share. Returns the new share for new
/// members and `None` for parties that only leave the committee.
#[instrument(
    skip(params, public_key, old_share, relay),
    fields(party = %params.party, session = %params.session_id, curve = C::NAME)
)]
pub async fn run_reshare<C: Curve, R: Relay>(
    params: &ReshareParams,
    public_key: &C::Point,
    old_share: Option<&KeyShare<C>>,
    relay: &R,
) -> Result<Option<KeyShare<C>>> {
    let old_committee = &params.old_committee;
    let new_committee = &params.new_committee;
    let me = params.party.as_str();

    if !params.is_old_member() && !params.is_new_member() {
        return Err(Error::InvalidInput(format!(
            "{} is in neither the old nor the new committee",
            me
        )));
    }

    let old_share = match (params.is_old_member(), old_share) {
        (true, Some(share)) => Some(validate_old_share(params, public_key, share)?),
        (true, None) => {
            return Err(Error::InvalidInput(format!(
                "{} is an old member but has no share to deal",
                me
            )));
        }
        (false, _) => None,
    };

    let new_threshold = params.new_threshold();
    let old_points = old_committee.evaluation_points::<C>()?;
    let new_points = new_committee.evaluation_points::<C>()?;
    let old_others = old_committee.others(me);
    let new_others = new_committee.others(me);

    info!(
        old_parties = old_committee.len(),
        new_parties = new_committee.len(),
        new_threshold,
        old_member = params.is_old_member(),
        new_member = params.is_new_member(),
        "Starting key reshare"
    );

    // ============ Round 1: Dealer Commitment ============
    debug!("Reshare Round 1: Committing to dealer polynomials");

    let dealing = match old_share {
        Some(share) => {
            let lambda = lagrange_coefficient::<C>(&party_index::<C>(me), &old_points)?;
            let polynomial =
                Polynomial::<C>::with_constant(lambda * share.secret_share, new_threshold);
            let commitments = encode_points::<C>(&polynomial.commitments());
            let blind = random_blind();
            let context = proof_context(&params.session_id, me);

            relay
                .broadcast(
                    1,
                    &ReshareRound1Message {
                        party: me.to_string(),
                        commitment: hash_commitment(
                            COMMITMENT_DOMAIN,
                            &context,
                            &commitments,
                            &blind,
                        )
                        .to_vec(),
                    },
                )
                .await?;

            Some(Dealing {
                polynomial,
                commitments,
                blind,
            })
        }
        None => None,
    };

    let round1: Vec<ReshareRound1Message> = relay.collect_broadcasts(1, &old_others).await?;

    // ============ Round 2: Decommitment and Sub-shares ============
    debug!("Reshare Round 2: Opening commitments and dealing sub-shares");

    if let Some(dealing) = &dealing {
        relay
            .broadcast(
                2,
                &ReshareRound2Message {
                    party: me.to_string(),
                    commitments: dealing.commitments.clone(),
                    blind: dealing.blind.clone(),
                },
            )
            .await?;

        for (member, x) in new_committee.parties().iter().zip(&new_points) {
            if member == me {
                continue;
            }
            relay
                .send_direct(
                    2,
                    member,
                    &ReshareShareMessage {
                        from: me.to_string(),
                        to: member.clone(),
                        share: C::scalar_to_bytes(&dealing.polynomial.evaluate(x)),
                    },
                )
                .await?;
        }
    }

    let round2: Vec<ReshareRound2Message> = relay.collect_broadcasts(2, &old_others).await?;

    // Dealer commitments in old committee order
    let mut dealer_commitments: Vec<(PartyId, Vec<C::Point>)> = Vec::with_capacity(old_committee.len());
    for ((sender, opening), reveal) in old_others.iter().zip(&round1).zip(&round2) {
        if opening.party != *sender || reveal.party != *sender {
            return Err(Error::ProtocolViolation(format!(
                "message from {} claims another sender",
                sender
            )));
        }
        if reveal.commitments.len() != new_threshold + 1 {
            return Err(Error::ProtocolViolation(format!(
                "{} dealt a polynomial with {} commitments, expected {}",
                sender,
                reveal.commitments.len(),
                new_threshold + 1
            )));
        }
        verify_commitment(
            COMMITMENT_DOMAIN,
            &proof_context(&params.session_id, sender),
            &reveal.commitments,
            &reveal.blind,
            &opening.commitment,
        )?;
        let points = decode_points::<C>(&reveal.commitments)
            .map_err(|e| Error::ProtocolViolation(format!("commitments from {}: {}", sender, e)))?;
        dealer_commitments.push((sender.clone(), points));
    }
    if let Some(dealing) = &dealing {
        dealer_commitments.push((me.to_string(), dealing.polynomial.commitments()));
    }
    dealer_commitments.sort_by(|a, b| a.0.cmp(&b.0));

    // Old members know every dealer's public share and can pin each constant term
    if let Some(share) = old_share {
        for (dealer, commitments) in &dealer_commitments {
            let lambda = lagrange_coefficient::<C>(&party_index::<C>(dealer), &old_points)?;
            if commitments[0] != C::mul(&share.public_share(dealer)?, &lambda) {
                return Err(Error::VerificationFailed(format!(
                    "{} dealt a value other than its weighted share",
                    dealer
                )));
            }
        }
    }

    let dealt_key = dealer_commitments
        .iter()
        .fold(C::identity(), |acc, (_, commitments)| acc + commitments[0]);
    if dealt_key != *public_key {
        return Err(Error::VerificationFailed(
            "dealt shares do not reconstruct the public key".into(),
        ));
    }

    let public_shares: BTreeMap<PartyId, C::Point> = new_committee
        .parties()
        .iter()
        .zip(&new_points)
        .map(|(member, x)| {
            let point = dealer_commitments
                .iter()
                .fold(C::identity(), |acc, (_, commitments)| {
                    acc + evaluate_commitments::<C>(commitments, x)
                });
            (member.clone(), point)
        })
        .collect();

    // ============ Round 3: Combination and Acknowledgement ============
    debug!("Reshare Round 3: Combining sub-shares and confirming public shares");

    let new_share = if params.is_new_member() {
        let dealers: Vec<PartyId> = old_others.clone();
        let sub_shares: Vec<ReshareShareMessage> = relay.collect_direct(2, &dealers).await?;

        let my_x = party_index::<C>(me);
        let mut secret_share = match &dealing {
            Some(dealing) => dealing.polynomial.evaluate(&my_x),
            None => C::zero(),
        };

        for (sender, message) in dealers.iter().zip(&sub_shares) {
            if message.from != *sender || message.to != me {
                return Err(Error::ProtocolViolation(format!(
                    "misaddressed sub-share from {}",
                    sender
                )));
            }
            let share = C::scalar_from_bytes(&message.share)
                .map_err(|e| Error::ProtocolViolation(format!("sub-share from {}: {}", sender, e)))?;
            let commitments = dealer_commitments
                .iter()
                .find(|(dealer, _)| dealer == sender)
                .map(|(_, commitments)| commitments)
                .ok_or_else(|| Error::Internal(format!("no commitments for {}", sender)))?;
            if !verify_share::<C>(&share, &my_x, commitments) {
                return Err(Error::VerificationFailed(format!(
                    "Sub-share from party {} does not match commitment",
                    sender
                )));
            }
            secret_share = secret_share + share;
        }

        let key_share = KeyShare {
            party: me.to_string(),
            threshold: new_threshold,
            committee: new_committee.parties().to_vec(),
            secret_share,
            public_key: *public_key,
            public_shares: public_shares.clone(),
        };
        key_share.verify_consistency()?;

        relay
            .broadcast(
                3,
                &ReshareAckMessage {
                    party: me.to_string(),
                    public_share: C::point_to_bytes(&key_share.public_share(me)?),
                },
            )
            .await?;
        Some(key_share)
    } else {
        None
    };

    let acks: Vec<ReshareAckMessage> = relay.collect_broadcasts(3, &new_others).await?;
    for (sender, ack) in new_others.iter().zip(&acks) {
        let claimed = C::point_from_bytes(&ack.public_share)
            .map_err(|e| Error::ProtocolViolation(format!("ack from {}: {}", sender, e)))?;
        let expected = public_shares
            .get(sender)
            .ok_or_else(|| Error::Internal(format!("no public share for {}", sender)))?;
        if ack.party != *sender || claimed != *expected {
            warn!(peer = %sender, "Reshare acknowledgement does not match");
            return Err(Error::VerificationFailed(format!(
                "{} acknowledged a different public share",
                sender
            )));
        }
    }

    info!(
        new_member = new_share.is_some(),
        "Reshare completed successfully"
    );
    Ok(new_share)
}

fn validate_old_share<'a, C: Curve>(
    params: &ReshareParams,
    public_key: &C::Point,
    share: &'a KeyShare<C>,
) -> Result<&'a KeyShare<C>> {
    if share.public_key != *public_key {
        return Err(Error::InvalidInput(
            "old share belongs to a different public key".into(),
        ));
    }
    if !params.old_committee.is_subset_of(&share.committee) {
        return Err(Error::InvalidInput(format!(
            "old parties {} are not all holders of this key",
            params.old_committee
        )));
    }
    if params.old_committee.len() <= share.threshold {
        return Err(Error::ThresholdNotMet {
            required: share.threshold + 1,
            actual: params.old_committee.len(),
        });
    }
    Ok(share)
}
