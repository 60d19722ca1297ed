use super::{Prepared, ProtocolError, Roles};
use crate::{
    channel::{FreeBalanceDelta, StateChannel, Transition},
    commitment,
    messages::{InstallParams, ProtocolName},
};

/// Moves a proposal into the installed apps, locking its deposits.
pub(super) fn prepare(
    channel: StateChannel,
    params: &InstallParams,
    roles: &Roles<'_>,
) -> Result<Prepared, ProtocolError> {
    roles.indices(&channel)?;
    let app = channel
        .proposal(&params.app_identity_hash)
        .ok_or(ProtocolError::AppNotFound(params.app_identity_hash))?
        .clone();
    let delta = FreeBalanceDelta::debit(app.asset, channel.to_channel_order(&app, app.deposits()));

    let transition = Transition::Install { app, delta };
    let commitment = commitment::build(ProtocolName::Install, &channel, &transition)?;
    Ok(Prepared {
        channel,
        transition,
        commitment: Some(commitment),
        app_identity_hash: Some(params.app_identity_hash),
    })
}
