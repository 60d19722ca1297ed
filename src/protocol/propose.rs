use super::{Prepared, ProtocolError, Roles};
use crate::{
    abiencode::types::Hash,
    apps::AppRegistry,
    channel::{checked_total, AppInstance, ChannelError, OutcomeType, StateChannel, Transition},
    messages::ProposeParams,
};

/// Validates a proposal and builds the app instance it would create. The
/// initiator of the run is the proposer.
pub(super) fn prepare(
    registry: &AppRegistry,
    channel: StateChannel,
    params: &ProposeParams,
    roles: &Roles<'_>,
) -> Result<Prepared, ProtocolError> {
    let [initiator, responder] = roles.indices(&channel)?;
    let definition = registry.get(&params.app_definition).ok_or_else(|| {
        ProtocolError::InvalidParameters(format!(
            "app definition {} is not registered",
            params.app_definition
        ))
    })?;
    if params.default_timeout == 0 {
        return Err(ProtocolError::InvalidParameters(
            "default timeout must be positive".into(),
        ));
    }

    // Rejects non-canonical bytes as well.
    definition.decode_state(&params.initial_state)?;

    let participants = [
        channel.participants[initiator].clone(),
        channel.participants[responder].clone(),
    ];
    let outcome = definition.compute_outcome(
        &params.initial_state,
        [participants[0].signer, participants[1].signer],
    )?;
    let payout = checked_total(params.asset, outcome)?;
    let deposits = checked_total(
        params.asset,
        [params.initiator_deposit, params.responder_deposit],
    )?;
    if payout > deposits {
        return Err(ProtocolError::InvalidParameters(format!(
            "initial state pays out {} but only {} is deposited",
            payout, deposits
        )));
    }

    let app_seq_no = channel.next_app_seq_no();
    if let Some(requested) = params.app_seq_no {
        if requested != app_seq_no {
            return Err(ChannelError::AppSeqNoMismatch {
                expected: app_seq_no,
                got: requested,
            }
            .into());
        }
    }
    let identity_hash = AppInstance::compute_identity_hash(
        channel.id,
        params.app_definition,
        &params.initial_state,
        app_seq_no,
    )?;
    let app = AppInstance {
        identity_hash,
        channel_id: channel.id,
        app_seq_no,
        participants,
        app_definition: params.app_definition,
        latest_state: params.initial_state.clone(),
        latest_version_number: 0,
        latest_action: None,
        default_timeout: params.default_timeout,
        state_timeout: params.state_timeout,
        outcome_type: OutcomeType::SingleAssetTwoPartyCoinTransfer,
        state_encoding: definition.kind.state_encoding().to_owned(),
        action_encoding: definition.kind.action_encoding().map(str::to_owned),
        asset: params.asset,
        initiator_deposit: params.initiator_deposit,
        responder_deposit: params.responder_deposit,
        latest_signatures: None,
    };

    let transition = Transition::Propose(app);
    channel.apply(&transition)?;
    Ok(Prepared {
        channel,
        transition,
        commitment: None,
        app_identity_hash: Some(identity_hash),
    })
}

/// The identity hash of a pending proposal matching `params` exactly, if this
/// side stored it already.
pub(super) fn stored_proposal(channel: &StateChannel, params: &ProposeParams) -> Option<Hash> {
    let hash = AppInstance::compute_identity_hash(
        channel.id,
        params.app_definition,
        &params.initial_state,
        params.app_seq_no?,
    )
    .ok()?;
    let stored = channel.proposal(&hash)?;
    let same = stored.asset == params.asset
        && stored.deposits() == [params.initiator_deposit, params.responder_deposit]
        && stored.default_timeout == params.default_timeout
        && stored.state_timeout == params.state_timeout;
    same.then_some(hash)
}
