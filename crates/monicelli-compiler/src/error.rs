//! Errors reported while compiling a module.

use monicelli_ast::Location;

/// Compilation errors.
///
/// Everything except [`InternalVerificationFailure`](CompileError::InternalVerificationFailure)
/// and [`Io`](CompileError::Io) is caused by the input program.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("function '{name}' not found")]
    UndefinedFunction { name: String, loc: Location },
    #[error("variable '{name}' not found")]
    UndefinedVariable { name: String, loc: Location },
    #[error("variable '{name}' is already declared")]
    Redeclaration { name: String, loc: Location },
    #[error("a Void value cannot be used here")]
    VoidValueUsed { loc: Location },
    #[error("type mismatch: {detail}")]
    TypeMismatch { detail: String, loc: Location },
    #[error("function '{name}' takes {expected} arguments, {got} given")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
        loc: Location,
    },
    #[error("function '{name}' is declared more than once")]
    DuplicateFunction { name: String, loc: Location },
    #[error("'{name}' is not a valid artifact name")]
    InvalidIdentifier { name: String },
    #[error("generated code failed verification, this is a compiler bug: {detail}")]
    InternalVerificationFailure { detail: String },
    #[error("cannot write artifact: {0}")]
    Io(String),
}

impl CompileError {
    /// Where in the source the error was detected, if anywhere.
    pub fn location(&self) -> Option<&Location> {
        match self {
            CompileError::UndefinedFunction { loc, .. }
            | CompileError::UndefinedVariable { loc, .. }
            | CompileError::Redeclaration { loc, .. }
            | CompileError::VoidValueUsed { loc }
            | CompileError::TypeMismatch { loc, .. }
            | CompileError::ArityMismatch { loc, .. }
            | CompileError::DuplicateFunction { loc, .. } => Some(loc),
            CompileError::InvalidIdentifier { .. }
            | CompileError::InternalVerificationFailure { .. }
            | CompileError::Io(_) => None,
        }
    }

    /// Whether the error points at the compiler rather than the program.
    pub fn is_internal(&self) -> bool {
        matches!(self, CompileError::InternalVerificationFailure { .. })
    }

    pub(crate) fn type_mismatch(detail: impl Into<String>, loc: &Location) -> Self {
        CompileError::TypeMismatch {
            detail: detail.into(),
            loc: loc.clone(),
        }
    }

    pub(crate) fn void_used(loc: &Location) -> Self {
        CompileError::VoidValueUsed { loc: loc.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_and_internal() {
        let loc = Location::new("a.mc", 3, 1);
        let err = CompileError::UndefinedVariable {
            name: "x".into(),
            loc: loc.clone(),
        };
        assert_eq!(err.location(), Some(&loc));
        assert!(!err.is_internal());
        assert_eq!(err.to_string(), "variable 'x' not found");

        let err = CompileError::InternalVerificationFailure { detail: "boom".into() };
        assert!(err.is_internal());
        assert_eq!(err.location(), None);
    }
}
