use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cannot serialize native callback '{name}'; wrap it in an Action")]
    Unserializable { name: String },

    #[error("Object not deserializable (cannot find type '{tag}')")]
    UnknownType { tag: String },

    #[error("Missing __type__ tag while restoring {context}")]
    MissingTypeTag { context: String },

    #[error("Type tag mismatch: expected '{expected}', found '{found}'")]
    TypeMismatch { expected: String, found: String },

    #[error("Expected a JSON object for {context}")]
    NotAnObject { context: String },

    #[error("Cannot resolve target '{path}'")]
    UnresolvedTarget { path: String },

    #[error("Target '{path}' has no method '{method}'")]
    UnresolvedMethod { path: String, method: String },

    #[error("Bad argument {index} for '{method}': expected {expected}")]
    BadArgument {
        method: String,
        index: usize,
        expected: &'static str,
    },

    #[error("Cannot explicitly assign derived flag '{name}'")]
    DerivedFlagAssignment { name: String },

    #[error("Unsupported derived flag operation: '{op}'")]
    UnknownOperator { op: String },

    #[error("Deriving flag '{name}' from {operands:?} would create a cycle")]
    DerivationCycle { name: String, operands: Vec<String> },

    #[error("No pending update to commit")]
    NoPendingUpdate,

    #[error("Variable '{name}' not found")]
    UnknownVariable { name: String },

    #[error("Item '{name}' not found")]
    UnknownItem { name: String },

    #[error("Item '{name}' is busy and cannot be called re-entrantly")]
    ItemBusy { name: String },

    #[error("Rate handler '{path}' returned {found}, not a number")]
    NotANumber { path: String, found: String },

    #[error("Item type '{kind}' not found")]
    UnknownItemType { kind: String },

    #[error("Tab '{name}' not found")]
    UnknownTab { name: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
