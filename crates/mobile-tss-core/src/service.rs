//! Request/response facade over the protocol engine
//!
//! A [`TssService`] owns one party's view of every session it takes part in.
//! Each keygen, keysign or reshare call registers a session, wires a
//! [`QueueRelay`] between the host [`Messenger`] and the protocol task, runs
//! the protocol to completion and persists the resulting state through the
//! host [`LocalStateAccessor`]. Inbound bodies reach the running session
//! through [`TssService::apply_data`].

use crate::committee::Committee;
use crate::config::ServiceConfig;
use crate::curve::{Curve, Ed25519, Secp256k1};
use crate::derivation::{derive_child_key, get_derive_path_bytes, parse_chain_code};
use crate::keygen::{KeyShare, KeygenParams, ReshareParams, run_dkg, run_reshare};
use crate::messenger::Messenger;
use crate::mpc::QueueRelay;
use crate::paillier::PaillierKeyPair;
use crate::session::{
    KeyAccess, SessionInfo, SessionKind, SessionRegistry, SessionStats, SessionStatus, session_id,
};
use crate::sign::{SignParams, run_ecdsa_signing, run_eddsa_signing};
use crate::storage::LocalStateAccessor;
use crate::types::{
    EcdsaLocalData, KeygenRequest, KeygenResponse, KeysignRequest, KeysignResponse, LocalState,
    MessageFromTss, ReshareRequest, ReshareResponse, TssScheme,
};
use crate::{Error, PartyId, Result, SessionId};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use k256::Scalar;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Threshold signing service for one local party
pub struct TssService {
    messenger: Arc<dyn Messenger>,
    state_accessor: Arc<dyn LocalStateAccessor>,
    config: ServiceConfig,
    registry: Arc<SessionRegistry>,
    /// Paillier key generated ahead of the next ECDSA keygen or reshare
    pre_params: Mutex<Option<PaillierKeyPair>>,
}

/// Everything a reshare call agrees on before the protocol starts
struct ResharePlan {
    params: ReshareParams,
    previous: Option<LocalState>,
    new_prefix: String,
}

impl TssService {
    /// Build a service with default settings.
    ///
    /// With `create_pre_params` the ECDSA Paillier key is generated before
    /// this returns, which can take several seconds.
    pub fn new(
        messenger: Arc<dyn Messenger>,
        state_accessor: Arc<dyn LocalStateAccessor>,
        create_pre_params: bool,
    ) -> Result<Self> {
        Self::with_config(
            messenger,
            state_accessor,
            ServiceConfig::default().with_pre_params(create_pre_params),
        )
    }

    pub fn with_config(
        messenger: Arc<dyn Messenger>,
        state_accessor: Arc<dyn LocalStateAccessor>,
        config: ServiceConfig,
    ) -> Result<Self> {
        config.validate()?;

        let pre_params = if config.create_pre_params {
            info!(bits = config.paillier_prime_bits, "Generating ECDSA pre-parameters");
            Some(PaillierKeyPair::generate(config.paillier_prime_bits)?)
        } else {
            None
        };

        Ok(Self {
            messenger,
            state_accessor,
            registry: SessionRegistry::new(config.max_pending_messages),
            config,
            pre_params: Mutex::new(pre_params),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn session_status(&self, id: &str) -> Option<SessionStatus> {
        self.registry.status(id)
    }

    pub fn session_info(&self, id: &str) -> Option<SessionInfo> {
        self.registry.info(id)
    }

    pub fn stats(&self) -> SessionStats {
        self.registry.stats()
    }

    /// Whether a pre-generated Paillier key is waiting to be used
    pub async fn has_pre_params(&self) -> bool {
        self.pre_params.lock().await.is_some()
    }

    /// Feed one body received from the host transport.
    ///
    /// The body is routed to its session, or buffered until that session
    /// starts. Messages addressed to another party are ignored. Only bodies
    /// that cannot be decoded are errors.
    pub fn apply_data(&self, body: &str) -> Result<()> {
        let message = MessageFromTss::decode_body(body)?;
        let wire = message.wire()?;
        debug!(
            session = %wire.session,
            round = wire.round,
            from = %message.from,
            "Applying inbound message"
        );
        self.registry.route(&wire.session, message);
        Ok(())
    }

    // ============ Keygen ============

    #[instrument(skip(self, request), fields(party = %request.local_party_id))]
    pub async fn keygen_ecdsa(&self, request: &KeygenRequest) -> Result<KeygenResponse> {
        let committee = keygen_committee(request)?;
        parse_chain_code(&request.chain_code_hex)?;

        let paillier = self.take_pre_params().await?;
        let id = session_id(
            SessionKind::Keygen,
            TssScheme::Ecdsa,
            &[&committee.to_string(), &request.chain_code_hex],
        );
        let params = KeygenParams {
            session_id: id.clone(),
            party: request.local_party_id.clone(),
            committee: committee.clone(),
        };
        let info = SessionInfo::new(
            id,
            SessionKind::Keygen,
            TssScheme::Ecdsa,
            request.local_party_id.clone(),
        );

        let peers = committee.others(&params.party);

        let pub_key = self
            .run_session(info, KeyAccess::Shared, peers, |relay| async move {
                let share = run_dkg::<Secp256k1, _>(&params, &relay).await?;
                let state = LocalState {
                    pub_key: share.public_key_hex(),
                    ecdsa_local_data: Some(EcdsaLocalData {
                        share: share.to_data(),
                        paillier_key: paillier,
                    }),
                    eddsa_local_data: None,
                    keygen_committee_keys: committee.parties().to_vec(),
                    local_party_key: params.party.clone(),
                    chain_code_hex: request.chain_code_hex.to_lowercase(),
                    reshare_prefix: String::new(),
                };
                self.save_state(&state).await?;
                Ok(state.pub_key.clone())
            })
            .await?;

        info!(pub_key = %pub_key, "ECDSA keygen completed");
        Ok(KeygenResponse { pub_key })
    }

    #[instrument(skip(self, request), fields(party = %request.local_party_id))]
    pub async fn keygen_eddsa(&self, request: &KeygenRequest) -> Result<KeygenResponse> {
        let committee = keygen_committee(request)?;
        if !request.chain_code_hex.is_empty() {
            parse_chain_code(&request.chain_code_hex)?;
        }

        let id = session_id(
            SessionKind::Keygen,
            TssScheme::Eddsa,
            &[&committee.to_string(), &request.chain_code_hex],
        );
        let params = KeygenParams {
            session_id: id.clone(),
            party: request.local_party_id.clone(),
            committee: committee.clone(),
        };
        let info = SessionInfo::new(
            id,
            SessionKind::Keygen,
            TssScheme::Eddsa,
            request.local_party_id.clone(),
        );

        let peers = committee.others(&params.party);

        let pub_key = self
            .run_session(info, KeyAccess::Shared, peers, |relay| async move {
                let share = run_dkg::<Ed25519, _>(&params, &relay).await?;
                let state = LocalState {
                    pub_key: share.public_key_hex(),
                    ecdsa_local_data: None,
                    eddsa_local_data: Some(share.to_data()),
                    keygen_committee_keys: committee.parties().to_vec(),
                    local_party_key: params.party.clone(),
                    chain_code_hex: request.chain_code_hex.to_lowercase(),
                    reshare_prefix: String::new(),
                };
                self.save_state(&state).await?;
                Ok(state.pub_key.clone())
            })
            .await?;

        info!(pub_key = %pub_key, "EdDSA keygen completed");
        Ok(KeygenResponse { pub_key })
    }

    // ============ Keysign ============

    #[instrument(skip(self, request), fields(party = %request.local_party_key, pub_key = %request.pub_key))]
    pub async fn keysign_ecdsa(&self, request: &KeysignRequest) -> Result<KeysignResponse> {
        let state = self.load_state(&request.pub_key).await?;
        require_local_party(&state, &request.local_party_key)?;
        let data = state.ecdsa_local_data.as_ref().ok_or_else(|| {
            Error::InvalidInput(format!("{} is not an ECDSA key", request.pub_key))
        })?;
        let share =
            KeyShare::<Secp256k1>::from_data(&state.local_party_key, &state.pub_key, &data.share)?;

        let path = get_derive_path_bytes(&request.derive_path)?;
        let tweak = if path.is_empty() {
            Scalar::ZERO
        } else {
            let chain_code = parse_chain_code(&state.chain_code_hex)?;
            derive_child_key(&share.public_key, &chain_code, &path)?.delta
        };

        let (params, info) = sign_session(TssScheme::Ecdsa, request, &state.pub_key)?;
        let peers = params.signers.others(&params.party);
        let signature = self
            .run_session(info, KeyAccess::Shared, peers, |relay| async move {
                run_ecdsa_signing(&params, &share, &data.paillier_key, &tweak, &relay).await
            })
            .await?;

        info!("ECDSA keysign completed");
        Ok(signature.to_response(&request.message_to_sign))
    }

    #[instrument(skip(self, request), fields(party = %request.local_party_key, pub_key = %request.pub_key))]
    pub async fn keysign_eddsa(&self, request: &KeysignRequest) -> Result<KeysignResponse> {
        if !get_derive_path_bytes(&request.derive_path)?.is_empty() {
            return Err(Error::InvalidInput(
                "derivation is not supported for EdDSA keys".into(),
            ));
        }

        let state = self.load_state(&request.pub_key).await?;
        require_local_party(&state, &request.local_party_key)?;
        let data = state.eddsa_local_data.as_ref().ok_or_else(|| {
            Error::InvalidInput(format!("{} is not an EdDSA key", request.pub_key))
        })?;
        let share = KeyShare::<Ed25519>::from_data(&state.local_party_key, &state.pub_key, data)?;

        let (params, info) = sign_session(TssScheme::Eddsa, request, &state.pub_key)?;
        let peers = params.signers.others(&params.party);
        let signature = self
            .run_session(info, KeyAccess::Shared, peers, |relay| async move {
                run_eddsa_signing(&params, &share, &relay).await
            })
            .await?;

        info!("EdDSA keysign completed");
        Ok(signature.to_response(&request.message_to_sign))
    }

    // ============ Reshare ============

    #[instrument(skip(self, request), fields(party = %request.local_party_id, pub_key = %request.pub_key))]
    pub async fn reshare_ecdsa(&self, request: &ReshareRequest) -> Result<ReshareResponse> {
        parse_chain_code(&request.chain_code_hex)?;
        let plan = self.plan_reshare(TssScheme::Ecdsa, request).await?;

        let previous = match &plan.previous {
            Some(state) => state.ecdsa_local_data.as_ref(),
            None => None,
        };
        let old_share = match (plan.params.is_old_member(), previous) {
            (true, Some(data)) => Some(KeyShare::<Secp256k1>::from_data(
                &plan.params.party,
                &request.pub_key,
                &data.share,
            )?),
            (true, None) => {
                return Err(Error::InvalidInput(format!(
                    "{} is not an ECDSA key",
                    request.pub_key
                )));
            }
            (false, _) => None,
        };

        // New members keep their Paillier key across reshares
        let paillier = match (plan.params.is_new_member(), previous) {
            (true, Some(data)) => Some(data.paillier_key.clone()),
            (true, None) => Some(self.take_pre_params().await?),
            (false, _) => None,
        };

        let public_key = decode_public_key::<Secp256k1>(&request.pub_key)?;
        let info = reshare_info(TssScheme::Ecdsa, &plan, &request.pub_key);
        let peers = reshare_peers(&plan.params);
        let new_prefix = plan.new_prefix.clone();
        let params = plan.params;

        self.run_session(info, KeyAccess::Exclusive, peers, |relay| async move {
            let share =
                run_reshare::<Secp256k1, _>(&params, &public_key, old_share.as_ref(), &relay)
                    .await?;
            if let (Some(share), Some(paillier)) = (share, paillier) {
                let state = LocalState {
                    pub_key: share.public_key_hex(),
                    ecdsa_local_data: Some(EcdsaLocalData {
                        share: share.to_data(),
                        paillier_key: paillier,
                    }),
                    eddsa_local_data: None,
                    keygen_committee_keys: params.new_committee.parties().to_vec(),
                    local_party_key: params.party.clone(),
                    chain_code_hex: request.chain_code_hex.to_lowercase(),
                    reshare_prefix: new_prefix.clone(),
                };
                self.save_state(&state).await?;
            }
            Ok(())
        })
        .await?;

        info!(reshare_prefix = %plan.new_prefix, "ECDSA reshare completed");
        Ok(ReshareResponse {
            pub_key: request.pub_key.to_lowercase(),
            reshare_prefix: plan.new_prefix,
        })
    }

    #[instrument(skip(self, request), fields(party = %request.local_party_id, pub_key = %request.pub_key))]
    pub async fn reshare_eddsa(&self, request: &ReshareRequest) -> Result<ReshareResponse> {
        if !request.chain_code_hex.is_empty() {
            parse_chain_code(&request.chain_code_hex)?;
        }
        let plan = self.plan_reshare(TssScheme::Eddsa, request).await?;

        let previous = match &plan.previous {
            Some(state) => state.eddsa_local_data.as_ref(),
            None => None,
        };
        let old_share = match (plan.params.is_old_member(), previous) {
            (true, Some(data)) => Some(KeyShare::<Ed25519>::from_data(
                &plan.params.party,
                &request.pub_key,
                data,
            )?),
            (true, None) => {
                return Err(Error::InvalidInput(format!(
                    "{} is not an EdDSA key",
                    request.pub_key
                )));
            }
            (false, _) => None,
        };

        let public_key = decode_public_key::<Ed25519>(&request.pub_key)?;
        let info = reshare_info(TssScheme::Eddsa, &plan, &request.pub_key);
        let peers = reshare_peers(&plan.params);
        let new_prefix = plan.new_prefix.clone();
        let params = plan.params;

        self.run_session(info, KeyAccess::Exclusive, peers, |relay| async move {
            let share =
                run_reshare::<Ed25519, _>(&params, &public_key, old_share.as_ref(), &relay).await?;
            if let Some(share) = share {
                let state = LocalState {
                    pub_key: share.public_key_hex(),
                    ecdsa_local_data: None,
                    eddsa_local_data: Some(share.to_data()),
                    keygen_committee_keys: params.new_committee.parties().to_vec(),
                    local_party_key: params.party.clone(),
                    chain_code_hex: request.chain_code_hex.to_lowercase(),
                    reshare_prefix: new_prefix.clone(),
                };
                self.save_state(&state).await?;
            }
            Ok(())
        })
        .await?;

        info!(reshare_prefix = %plan.new_prefix, "EdDSA reshare completed");
        Ok(ReshareResponse {
            pub_key: request.pub_key.to_lowercase(),
            reshare_prefix: plan.new_prefix,
        })
    }

    /// Validate a reshare request against the local state and fix the
    /// session every participant will derive from it
    async fn plan_reshare(&self, scheme: TssScheme, request: &ReshareRequest) -> Result<ResharePlan> {
        if request.pub_key.is_empty() {
            return Err(Error::InvalidInput("empty pub key".into()));
        }
        let old_committee = Committee::parse(&request.old_parties)?;
        let new_committee = Committee::parse(&request.new_parties)?;
        let me = request.local_party_id.as_str();

        let previous = match self.state_accessor.get_local_state(&request.pub_key).await {
            Ok(json) => Some(LocalState::from_json(&json)?),
            // A joining member has no prior key material
            Err(Error::StateNotFound(_)) => None,
            Err(e) => return Err(e),
        };

        if let Some(state) = &previous {
            require_local_party(state, me)?;
        }
        if old_committee.contains(me) {
            let state = previous.as_ref().ok_or_else(|| {
                Error::StateNotFound(format!(
                    "{} is an old member without state for {}",
                    me, request.pub_key
                ))
            })?;
            if state.reshare_prefix != request.reshare_prefix {
                return Err(Error::InvalidInput(format!(
                    "reshare prefix {:?} does not match stored prefix {:?}",
                    request.reshare_prefix, state.reshare_prefix
                )));
            }
        }

        let new_prefix =
            LocalState::next_reshare_prefix(&request.reshare_prefix, &request.new_reshare_prefix)?;
        let id = session_id(
            SessionKind::Reshare,
            scheme,
            &[
                &request.pub_key.to_lowercase(),
                &old_committee.to_string(),
                &new_committee.to_string(),
                &request.chain_code_hex.to_lowercase(),
                &request.reshare_prefix,
                &new_prefix,
            ],
        );

        let params = ReshareParams {
            session_id: id,
            party: me.to_string(),
            old_committee,
            new_committee,
        };
        if !params.is_old_member() && !params.is_new_member() {
            return Err(Error::InvalidInput(format!(
                "{} is in neither the old nor the new committee",
                me
            )));
        }

        Ok(ResharePlan {
            params,
            previous,
            new_prefix,
        })
    }

    // ============ Internals ============

    /// Register a session, run `protocol` over its relay and record the
    /// outcome. The key lock is released whichever way the protocol ends.
    async fn run_session<T, F, Fut>(
        &self,
        info: SessionInfo,
        access: KeyAccess,
        peers: Vec<PartyId>,
        protocol: F,
    ) -> Result<T>
    where
        F: FnOnce(QueueRelay) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let id: SessionId = info.id.clone();
        let party = info.party.clone();
        let (guard, rx) = self.registry.register(info, access)?;

        let relay = QueueRelay::new(
            id,
            party,
            peers,
            Arc::clone(&self.messenger),
            rx,
            self.config.round_timeout,
        );

        match protocol(relay).await {
            Ok(value) => {
                guard.complete();
                Ok(value)
            }
            Err(e) => {
                warn!(session = %guard.id(), error = %e, "Protocol failed");
                guard.fail(&e);
                Err(e)
            }
        }
    }

    /// Hand out the pre-generated Paillier key, or generate a fresh one off
    /// the async runtime
    async fn take_pre_params(&self) -> Result<PaillierKeyPair> {
        if let Some(key) = self.pre_params.lock().await.take() {
            debug!("Using pre-generated Paillier key");
            return Ok(key);
        }

        let bits = self.config.paillier_prime_bits;
        debug!(bits, "Generating Paillier key");
        tokio::task::spawn_blocking(move || PaillierKeyPair::generate(bits))
            .await
            .map_err(|e| Error::Internal(format!("Paillier key generation aborted: {}", e)))?
    }

    async fn load_state(&self, pub_key: &str) -> Result<LocalState> {
        if pub_key.is_empty() {
            return Err(Error::InvalidInput("empty pub key".into()));
        }
        let json = self.state_accessor.get_local_state(pub_key).await?;
        let state = LocalState::from_json(&json)?;
        if !state.pub_key.eq_ignore_ascii_case(pub_key) {
            return Err(Error::StateCorrupt(format!(
                "state stored for {} belongs to {}",
                pub_key, state.pub_key
            )));
        }
        Ok(state)
    }

    async fn save_state(&self, state: &LocalState) -> Result<()> {
        self.state_accessor
            .save_local_state(&state.pub_key, &state.to_json()?)
            .await?;
        debug!(pub_key = %state.pub_key, "Local state saved");
        Ok(())
    }
}

fn keygen_committee(request: &KeygenRequest) -> Result<Committee> {
    let committee = Committee::parse(&request.all_parties)?;
    committee.require_member(&request.local_party_id)?;
    Ok(committee)
}

fn require_local_party(state: &LocalState, party: &str) -> Result<()> {
    if state.local_party_key != party {
        return Err(Error::InvalidInput(format!(
            "state for {} belongs to {}, not {}",
            state.pub_key, state.local_party_key, party
        )));
    }
    Ok(())
}

fn decode_public_key<C: Curve>(pub_key: &str) -> Result<C::Point> {
    C::point_from_bytes(&hex::decode(pub_key)?)
        .map_err(|e| Error::InvalidInput(format!("invalid {} pub key: {}", C::NAME, e)))
}

fn sign_session(
    scheme: TssScheme,
    request: &KeysignRequest,
    pub_key: &str,
) -> Result<(SignParams, SessionInfo)> {
    let message = STANDARD
        .decode(request.message_to_sign.trim())
        .map_err(|e| Error::InvalidInput(format!("message_to_sign is not base64: {}", e)))?;
    let signers = Committee::parse(&request.keysign_committee_keys)?;

    let id = session_id(
        SessionKind::Keysign,
        scheme,
        &[
            pub_key,
            &signers.to_string(),
            &request.message_to_sign,
            &request.derive_path,
        ],
    );
    let params = SignParams {
        session_id: id.clone(),
        party: request.local_party_key.clone(),
        signers,
        message,
    };
    let info = SessionInfo::new(id, SessionKind::Keysign, scheme, request.local_party_key.clone())
        .with_pub_key(pub_key);
    Ok((params, info))
}

fn reshare_info(scheme: TssScheme, plan: &ResharePlan, pub_key: &str) -> SessionInfo {
    SessionInfo::new(
        plan.params.session_id.clone(),
        SessionKind::Reshare,
        scheme,
        plan.params.party.clone(),
    )
    .with_pub_key(pub_key.to_lowercase())
}

fn reshare_peers(params: &ReshareParams) -> Vec<PartyId> {
    params
        .old_committee
        .union(&params.new_committee)
        .into_iter()
        .filter(|party| *party != params.party)
        .collect()
}
