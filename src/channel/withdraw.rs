use crate::{
    chain::ChainCall,
    codec::{SignedPayload, Withdraw1, Withdraw2},
    packed::types::Signature,
};

use super::LedgerError;

/// Our half of a withdraw, sent to the partner for co-signing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WithdrawRequest {
    pub payload: Withdraw1,
    pub signature: Signature,
    /// Last block at which the partner may co-sign.
    pub deadline: u64,
}

/// A withdraw request we sent and wait on.
pub type PendingWithdraw = WithdrawRequest;

/// Both halves of a withdraw. The contract only accepts it with both
/// signatures, so it can only become a [ChainCall] once both are present and
/// valid.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WithdrawAuthorization {
    pub payload: Withdraw2,
    /// Signature of `participant1` over the [Withdraw1] half.
    pub signature1: Option<Signature>,
    /// Signature of `participant2` over the full [Withdraw2].
    pub signature2: Option<Signature>,
}

impl WithdrawAuthorization {
    pub fn from_request(request: &WithdrawRequest) -> Self {
        Self {
            payload: request.payload.with_partner_withdraw(0u64.into()),
            signature1: Some(request.signature),
            signature2: None,
        }
    }

    pub fn into_chain_call(self) -> Result<ChainCall, LedgerError> {
        let signature1 = self
            .signature1
            .ok_or(LedgerError::MissingSignature("participant1"))?;
        let signature2 = self
            .signature2
            .ok_or(LedgerError::MissingSignature("participant2"))?;

        self.payload
            .first_half()
            .ensure_signed_by(signature1, self.payload.participant1)?;
        self.payload
            .ensure_signed_by(signature2, self.payload.participant2)?;

        Ok(ChainCall::Withdraw {
            payload: self.payload,
            signature1,
            signature2,
        })
    }
}
