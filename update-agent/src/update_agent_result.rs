use std::process::{ExitCode, Termination};

/// Exit codes returned by the update agent. Being up to date is a success.
#[repr(u8)]
pub(crate) enum UpdateAgentResult {
    Success = 0,
    Failure = 1,
}

impl Termination for UpdateAgentResult {
    fn report(self) -> ExitCode {
        ExitCode::from(self as u8)
    }
}

impl From<eyre::Report> for UpdateAgentResult {
    fn from(_: eyre::Report) -> Self {
        UpdateAgentResult::Failure
    }
}
