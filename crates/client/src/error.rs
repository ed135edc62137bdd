use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("an assignment is already being submitted")]
    SubmissionInFlight,

    #[error("no assignment is being submitted")]
    NothingInFlight,

    #[error("conflicts are awaiting a decision, retry with force or dismiss them first")]
    ConflictPromptOpen,

    #[error("the last submission did not end in conflicts")]
    NoConflictToOverride,
}
