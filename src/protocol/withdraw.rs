use super::{Prepared, ProtocolError, Roles};
use crate::{
    abiencode::types::U256,
    channel::{FreeBalanceDelta, StateChannel, Transition, Withdrawal, WithdrawalRecord},
    commitment,
    messages::{ProtocolName, WithdrawParams},
};

/// Takes `amount` out of the initiator's free balance towards `recipient`.
pub(super) fn prepare(
    channel: StateChannel,
    params: &WithdrawParams,
    roles: &Roles<'_>,
) -> Result<Prepared, ProtocolError> {
    let [initiator, _] = roles.indices(&channel)?;
    if params.amount == U256::zero() {
        return Err(ProtocolError::InvalidParameters(
            "withdrawal amount must be positive".into(),
        ));
    }
    let available = channel.free_balance.balance(params.asset, initiator);
    if params.amount > available {
        return Err(ProtocolError::InvalidParameters(format!(
            "cannot withdraw {} of {}, only {} available",
            params.amount, params.asset, available
        )));
    }

    let mut debits = [U256::zero(); 2];
    debits[initiator] = params.amount;
    let record = WithdrawalRecord {
        withdrawal: Withdrawal {
            participant: initiator,
            asset: params.asset,
            amount: params.amount,
            recipient: params.recipient,
            nonce: channel.withdrawals.len() as u64,
        },
        signatures: None,
    };
    let transition = Transition::Withdraw {
        record,
        delta: FreeBalanceDelta::debit(params.asset, debits),
    };
    let commitment = commitment::build(ProtocolName::Withdraw, &channel, &transition)?;
    Ok(Prepared {
        channel,
        transition,
        commitment: Some(commitment),
        app_identity_hash: None,
    })
}
