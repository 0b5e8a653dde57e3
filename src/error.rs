//! Error types with fix suggestions
//!
//! Every failure the patch engine or run driver can report lives in
//! [`PatchError`]. Variants carry enough context (key, JSON pointer, node id)
//! to find the problem in the terrain file without a debugger.
//!
//! Some variants are fatal for a run (the document is never handed to the
//! build tool), others are collected in the run's report and patching
//! continues. See [`PatchError::is_recoverable`].

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum PatchError {
    // ─────────────────────────────────────────────────────────────
    // Keyed replacement (TP-010 to TP-012)
    // ─────────────────────────────────────────────────────────────
    #[error("TP-010: No replacement values supplied for key '{key}'")]
    EmptyReplacement { key: String },

    #[error("TP-011: Type mismatch for key '{key}' at {path}: found {actual}, expected {expected}")]
    TypeMismatch {
        key: String,
        path: String,
        expected: String,
        actual: String,
    },

    #[error("TP-012: Number of new values ({values}) does not match the number of occurrences ({occurrences}) of key '{key}'")]
    CountMismatch {
        key: String,
        occurrences: usize,
        values: usize,
    },

    // ─────────────────────────────────────────────────────────────
    // Variables (TP-020 to TP-021)
    // ─────────────────────────────────────────────────────────────
    #[error("TP-020: Invalid variable assignment '{assignment}' (expected name=expr)")]
    InvalidAssignment { assignment: String },

    #[error("TP-021: Error evaluating variable '{name}' = '{expression}': {details}")]
    VariableEvaluation {
        name: String,
        expression: String,
        details: String,
    },

    // ─────────────────────────────────────────────────────────────
    // Bindings (TP-030 to TP-032)
    // ─────────────────────────────────────────────────────────────
    #[error("TP-030: Invalid binding record at {path}: {details}")]
    InvalidBinding { path: String, details: String },

    #[error("TP-031: Node {node_id} not found in any Nodes collection (binding {variable} -> {property})")]
    NodeNotFound {
        node_id: i64,
        property: String,
        variable: String,
    },

    #[error("TP-032: Node id {node_id} matches {matches} nodes")]
    AmbiguousNode { node_id: i64, matches: usize },

    // ─────────────────────────────────────────────────────────────
    // CLI and configuration (TP-040 to TP-041)
    // ─────────────────────────────────────────────────────────────
    #[error("TP-040: Invalid arguments: {reason}")]
    InvalidArgs { reason: String },

    #[error("TP-041: Configuration error: {reason}")]
    Config { reason: String },

    // ─────────────────────────────────────────────────────────────
    // Build tool (TP-050 to TP-052)
    // ─────────────────────────────────────────────────────────────
    #[error("TP-050: Failed to launch {tool}: {details}")]
    ToolLaunch { tool: String, details: String },

    #[error("TP-051: {tool} exited before finishing the build (exit code: {})", fmt_code(.code))]
    ToolFailed { tool: String, code: Option<i32> },

    #[error("TP-052: Gave up waiting for {marker} after {waited_secs}s")]
    MarkerTimeout { marker: String, waited_secs: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn fmt_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "none".to_string(),
    }
}

impl PatchError {
    /// Recoverable errors are logged and recorded; the run carries on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PatchError::InvalidAssignment { .. }
                | PatchError::VariableEvaluation { .. }
                | PatchError::InvalidBinding { .. }
                | PatchError::NodeNotFound { .. }
                | PatchError::AmbiguousNode { .. }
        )
    }
}

impl FixSuggestion for PatchError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            PatchError::EmptyReplacement { .. } => Some("Pass at least one replacement value"),
            PatchError::TypeMismatch { .. } => {
                Some("Check the terrain file: the key holds a different JSON type than the new value")
            }
            PatchError::CountMismatch { .. } => {
                Some("Pass a single value to broadcast, or exactly one value per occurrence")
            }
            PatchError::InvalidAssignment { .. } => Some("Use --var name=value or --var 'name=lambda: expr'"),
            PatchError::VariableEvaluation { .. } => {
                Some("Use an integer literal or a lambda built from numbers and random.* functions")
            }
            PatchError::InvalidBinding { .. } => {
                Some("Each binding needs integer Node plus string Property and Variable fields")
            }
            PatchError::NodeNotFound { .. } => Some("Re-save the terrain in Gaea so bindings match existing nodes"),
            PatchError::AmbiguousNode { .. } => Some("Node ids must be unique across all Nodes collections"),
            PatchError::InvalidArgs { .. } => Some("Run with --help to see the expected arguments"),
            PatchError::Config { .. } => Some("Check terrapatch.toml syntax and field names"),
            PatchError::ToolLaunch { .. } => {
                Some("Check the Swarm path (--swarm-exe or TERRAPATCH_SWARM_EXE)")
            }
            PatchError::ToolFailed { .. } => Some("Open the terrain in Gaea and check the build log"),
            PatchError::MarkerTimeout { .. } => Some("Increase --timeout or check that the build writes a report"),
            PatchError::Io(_) => Some("Check file path and permissions"),
            PatchError::Json(_) => Some("Check that the terrain file is valid JSON"),
        }
    }
}
