use super::{Prepared, ProtocolError, Roles};
use crate::{
    apps::AppRegistry,
    channel::{StateChannel, Transition},
    commitment,
    messages::{ProtocolName, TakeActionParams},
};

pub(super) fn prepare(
    registry: &AppRegistry,
    channel: StateChannel,
    params: &TakeActionParams,
    roles: &Roles<'_>,
) -> Result<Prepared, ProtocolError> {
    roles.indices(&channel)?;
    let app = channel
        .app(&params.app_identity_hash)
        .ok_or(ProtocolError::AppNotFound(params.app_identity_hash))?;
    if app.latest_version_number != params.expected_version {
        return Err(ProtocolError::StaleVersion {
            expected: params.expected_version,
            current: app.latest_version_number,
        });
    }
    let definition = registry.get(&app.app_definition).ok_or_else(|| {
        ProtocolError::InvalidParameters(format!(
            "app definition {} is not registered",
            app.app_definition
        ))
    })?;

    let next_state = definition.apply_action(&app.latest_state, &params.action)?;
    let transition = Transition::SetState(app.with_next_state(next_state, params.action.clone()));
    let commitment = commitment::build(ProtocolName::TakeAction, &channel, &transition)?;
    Ok(Prepared {
        channel,
        transition,
        commitment: Some(commitment),
        app_identity_hash: Some(params.app_identity_hash),
    })
}
