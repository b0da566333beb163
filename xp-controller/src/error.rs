//! The control-loop error taxonomy (§7): every reconcile returns one of
//! these, which callers turn into a requeue policy and a `ReconcileError`
//! condition without aborting sibling work.

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("kube API error: {0}")]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Compose(#[from] xp_composition::ComposeError),
    #[error(transparent)]
    Selector(#[from] xp_selectors::SelectorError),
    #[error(transparent)]
    FieldPath(#[from] xp_types::fieldpath::FieldPathError),
    #[error(transparent)]
    Schema(#[from] xp_schema::RenderError),
    #[error("no Composition is compatible with this composite's type")]
    NoCompatibleComposition,
    #[error("composite is missing required field {0:?}")]
    MissingField(String),
    #[error("composite status not yet reflecting schema Establishment")]
    NotEstablished,
}

pub type Result<T> = std::result::Result<T, ControllerError>;
