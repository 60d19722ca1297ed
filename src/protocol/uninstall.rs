use super::{Prepared, ProtocolError, Roles};
use crate::{
    apps::AppRegistry,
    channel::{checked_total, FreeBalanceDelta, StateChannel, Transition},
    commitment,
    messages::{ProtocolName, UninstallParams},
};

/// Removes an installed app, crediting the outcome of its latest state back to
/// the free balance.
pub(super) fn prepare(
    registry: &AppRegistry,
    channel: StateChannel,
    params: &UninstallParams,
    roles: &Roles<'_>,
) -> Result<Prepared, ProtocolError> {
    roles.indices(&channel)?;
    let app = channel
        .app(&params.app_identity_hash)
        .ok_or(ProtocolError::AppNotFound(params.app_identity_hash))?;
    let definition = registry.get(&app.app_definition).ok_or_else(|| {
        ProtocolError::InvalidParameters(format!(
            "app definition {} is not registered",
            app.app_definition
        ))
    })?;

    let outcome = definition.compute_outcome(
        &app.latest_state,
        [app.participants[0].signer, app.participants[1].signer],
    )?;
    if checked_total(app.asset, outcome)? > app.locked_total()? {
        return Err(ProtocolError::InvalidParameters(
            "outcome exceeds the collateral locked by the app".into(),
        ));
    }
    let delta = FreeBalanceDelta::credit(app.asset, channel.to_channel_order(app, outcome));

    let transition = Transition::Uninstall {
        app_identity_hash: params.app_identity_hash,
        delta,
    };
    let commitment = commitment::build(ProtocolName::Uninstall, &channel, &transition)?;
    Ok(Prepared {
        channel,
        transition,
        commitment: Some(commitment),
        app_identity_hash: Some(params.app_identity_hash),
    })
}
