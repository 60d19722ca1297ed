use super::{Prepared, ProtocolError, Roles};
use crate::{
    channel::{channel_id, Participant, StateChannel, Transition},
    commitment,
    messages::{ProtocolName, SetupParams},
};

/// The new channel, `[initiator, responder]`, with its setup commitment.
pub(super) fn prepare(params: &SetupParams, roles: &Roles<'_>) -> Result<Prepared, ProtocolError> {
    // Amounts are mapped between app and channel order by signer address.
    if params.initiator_signer == params.responder_signer {
        return Err(ProtocolError::InvalidParameters(format!(
            "both participants sign with {}",
            params.initiator_signer
        )));
    }
    let id = channel_id(roles.initiator, roles.responder, params.salt)?;
    let participants = [
        Participant {
            identifier: roles.initiator.to_owned(),
            signer: params.initiator_signer,
        },
        Participant {
            identifier: roles.responder.to_owned(),
            signer: params.responder_signer,
        },
    ];
    let channel = StateChannel::new(id, participants, params.deposits.clone())?;
    roles.indices(&channel)?;

    let transition = Transition::Setup;
    let commitment = commitment::build(ProtocolName::Setup, &channel, &transition)?;
    Ok(Prepared {
        channel,
        transition,
        commitment: Some(commitment),
        app_identity_hash: None,
    })
}
