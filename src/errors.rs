use thiserror::Error;

/// Source line attribution for diagnostics. Line 0 means "no source".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Source {
    pub line: u32,
}

impl Source {
    pub fn none() -> Self {
        Source { line: 0 }
    }

    pub fn at(line: u32) -> Self {
        Source { line }
    }

    pub fn is_valid(&self) -> bool {
        self.line != 0
    }
}

/// The closed set of diagnostics the core can raise.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiagId {
    #[error("expression too complex")]
    TooComplexExpression,

    #[error("jump target expression too complex")]
    TooComplexJump,

    #[error("invalid jump target")]
    InvalidJumpTarget,

    #[error("circular reference detected in EQU expansion")]
    EquCircularReference,

    #[error("circular reference detected in size dependencies")]
    OptimizerCircularReference,

    #[error("secondary expansion of an external or complex value")]
    OptimizerSecondaryExpansion,

    #[error("symbol '{0}' redefined")]
    SymbolRedefined(String),

    #[error("expression in relocation contains a floating point value")]
    RelocContainsFloat,

    #[error("expression in relocation too complex")]
    RelocTooComplex,

    #[error("division by zero")]
    DivisionByZero,

    #[error("value does not fit in signed {0} bit field")]
    SignedOverflow(u32),

    #[error("value does not fit in {0} bit field")]
    UnsignedOverflow(u32),

    #[error("floating point overflow")]
    FloatOverflow,

    #[error("floating point underflow")]
    FloatUnderflow,

    #[error("misaligned value, truncating to boundary of {0} bits")]
    Truncated(u32),

    #[error("uninitialized space declared in initialized section: zeroing")]
    UninitContents,

    #[error("symbol '{0}' both defined and declared extern")]
    ExternDefined(String),

    #[error("cannot read file '{0}'")]
    FileRead(String),

    #[error("org target is before the current offset")]
    OrgBackwards,

    #[error("previous definition is here")]
    PreviousDefinition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl DiagId {
    pub fn severity(&self) -> Severity {
        match self {
            DiagId::SignedOverflow(_)
            | DiagId::UnsignedOverflow(_)
            | DiagId::FloatOverflow
            | DiagId::FloatUnderflow
            | DiagId::Truncated(_)
            | DiagId::UninitContents
            | DiagId::ExternDefined(_) => Severity::Warning,
            DiagId::PreviousDefinition => Severity::Note,
            _ => Severity::Error,
        }
    }
}

/// A single reported diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub source: Source,
    pub id: DiagId,
}

/// Accumulates diagnostics across pipeline phases.
///
/// Phases report and keep going; the orchestrator polls
/// `has_error_occurred` between phases and short-circuits.
#[derive(Debug, Default)]
pub struct Diagnostics {
    reported: Vec<Diagnostic>,
    num_errors: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn report(&mut self, source: Source, id: DiagId) {
        if id.severity() == Severity::Error {
            self.num_errors += 1;
        }
        self.reported.push(Diagnostic { source, id });
    }

    pub fn has_error_occurred(&self) -> bool {
        self.num_errors > 0
    }

    pub fn all(&self) -> &[Diagnostic] {
        &self.reported
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.reported
            .iter()
            .filter(|d| d.id.severity() == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.reported
            .iter()
            .filter(|d| d.id.severity() == Severity::Warning)
    }

    /// Converts the accumulated state into a result keyed on the first
    /// error reported. Warnings alone do not fail assembly.
    pub fn into_result(self) -> Result<Vec<Diagnostic>, AssemblyError> {
        if self.num_errors == 0 {
            return Ok(self.reported);
        }
        let first = self
            .reported
            .into_iter()
            .find(|d| d.id.severity() == Severity::Error)
            .expect("error count nonzero but no error diagnostic");
        if first.source.is_valid() {
            Err(AssemblyError::SemanticError {
                line: first.source.line as usize,
                reason: first.id.to_string(),
            })
        } else {
            Err(AssemblyError::SemanticErrorNoLine {
                reason: first.id.to_string(),
            })
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum AssemblyError {
    #[error("Semantic Error on line {line}: {reason}")]
    SemanticError { line: usize, reason: String },

    #[error("Semantic Error: {reason}")]
    SemanticErrorNoLine { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_accumulation() {
        let mut diags = Diagnostics::new();
        assert!(!diags.has_error_occurred());

        diags.report(Source::at(3), DiagId::Truncated(2));
        assert!(!diags.has_error_occurred());

        diags.report(Source::at(7), DiagId::TooComplexExpression);
        assert!(diags.has_error_occurred());
        assert_eq!(diags.errors().count(), 1);
        assert_eq!(diags.warnings().count(), 1);
    }

    #[test]
    fn test_into_result_reports_first_error() {
        let mut diags = Diagnostics::new();
        diags.report(Source::at(2), DiagId::EquCircularReference);
        diags.report(Source::at(4), DiagId::TooComplexExpression);

        let err = diags.into_result().unwrap_err();
        assert_eq!(
            err,
            AssemblyError::SemanticError {
                line: 2,
                reason: "circular reference detected in EQU expansion".to_string(),
            }
        );
    }

    #[test]
    fn test_warnings_only_is_ok() {
        let mut diags = Diagnostics::new();
        diags.report(Source::at(1), DiagId::UnsignedOverflow(16));
        let reported = diags.into_result().unwrap();
        assert_eq!(reported.len(), 1);
    }
}
