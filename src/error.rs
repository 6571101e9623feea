use thiserror::Error;

/// Fatal outcomes of a patch run. Verification mismatches are not errors;
/// they drive the resolver and only surface as `NoMatch` once the search
/// space is exhausted.
#[derive(Debug, Error)]
pub(crate) enum PatchError {
    #[error("line {line}: {message}")]
    Validate { line: usize, message: String },
    #[error("could not find a match for patch: {element}: {reason}")]
    NoMatch { element: String, reason: String },
    #[error("applier disagrees with verifier in {class}.{method}: {detail}")]
    InternalConsistency {
        class: String,
        method: String,
        detail: String,
    },
    #[error("ancestor {ancestor} of {class} cannot be resolved")]
    UnresolvedAncestor { class: String, ancestor: String },
}

impl PatchError {
    pub(crate) fn validate(line: usize, message: impl Into<String>) -> Self {
        PatchError::Validate {
            line,
            message: message.into(),
        }
    }
}
