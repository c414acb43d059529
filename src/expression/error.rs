//! Error types for expression parsing and evaluation.

use thiserror::Error;

/// Everything the parser can reject, without position information.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseErrorKind {
    #[error("Syntax error")]
    SyntaxError,
    #[error("Syntax error '{0}'")]
    InvalidCharacter(char),
    #[error("Unterminated string literal")]
    UnterminatedString,
    #[error("Character literal must contain exactly one character")]
    InvalidCharacterLiteral,
    #[error("Digit expected")]
    DigitExpected,
    #[error("Invalid integer literal '{0}'")]
    InvalidIntegerLiteral(String),
    #[error("Invalid real literal '{0}'")]
    InvalidRealLiteral(String),
    #[error("Unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("No 'it' is in scope")]
    NoItInScope,
    #[error("No 'parent' is in scope")]
    NoParentInScope,
    #[error("No 'root' is in scope")]
    NoRootInScope,
    #[error("The identifier '{0}' was defined more than once")]
    DuplicateIdentifier(String),
    #[error("Expression expected")]
    ExpressionExpected,
    #[error("Expression of type '{0}' expected")]
    ExpressionTypeExpected(String),
    #[error("{0} expected")]
    Expected(String),
    #[error("Operator '{op}' incompatible with operand types '{left}' and '{right}'")]
    IncompatibleOperands {
        op: String,
        left: String,
        right: String,
    },
    #[error("Operator '{op}' incompatible with operand type '{ty}'")]
    IncompatibleOperand { op: String, ty: String },
    #[error("A value of type '{from}' cannot be converted to type '{to}'")]
    CannotConvertValue { from: String, to: String },
    #[error("Type '{0}' has no nullable form")]
    NoNullableForm(String),
    #[error("No matching constructor in type '{0}'")]
    NoMatchingConstructor(String),
    #[error("Ambiguous invocation of '{0}' constructor")]
    AmbiguousConstructor(String),
    #[error("No applicable method '{method}' exists in type '{ty}'")]
    NoApplicableMethod { method: String, ty: String },
    #[error("Ambiguous invocation of method '{method}' in type '{ty}'")]
    AmbiguousMethod { method: String, ty: String },
    #[error("No applicable indexer exists in type '{0}'")]
    NoApplicableIndexer(String),
    #[error("Ambiguous invocation of indexer in type '{0}'")]
    AmbiguousIndexer(String),
    #[error("No applicable aggregate method '{0}' exists")]
    NoApplicableAggregate(String),
    #[error("No property or field '{name}' exists in type '{ty}'")]
    UnknownPropertyOrField { name: String, ty: String },
    #[error("Methods on type '{0}' are not accessible")]
    MethodsInaccessible(String),
    #[error("The first expression must be of type 'Boolean'")]
    FirstExprMustBeBool,
    #[error("Both of the types '{a}' and '{b}' convert to the other")]
    BothTypesConvert { a: String, b: String },
    #[error("Neither of the types '{a}' and '{b}' converts to the other")]
    NeitherTypeConverts { a: String, b: String },
    #[error("Argument list incompatible with lambda expression")]
    ArgsIncompatibleWithLambda,
}

/// A parse failure: what went wrong and the character index of the token
/// that caused it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} (at index {position})")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub position: usize,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, position: usize) -> Self {
        ParseError { kind, position }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Failures raised while executing a compiled tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Value '{value}' does not fit in type '{target}'")]
    ConvertOverflow { value: String, target: String },
    #[error("Arithmetic overflow in '{0}'")]
    ArithmeticOverflow(String),
    #[error("Null reference")]
    NullReference,
    #[error("Index {index} out of range for sequence of length {len}")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("Parameter '{0}' is not bound")]
    UnboundParameter(String),
    #[error("Cannot cast value of type '{from}' to type '{to}'")]
    InvalidCast { from: String, to: String },
    #[error("Sequence contains no elements")]
    EmptySequence,
    #[error("Sequence contains more than one element")]
    MoreThanOneElement,
    #[error("'{0}' is not a valid Guid")]
    InvalidGuid(String),
    #[error("Invalid operand in '{0}'")]
    InvalidOperand(String),
}

pub type EvalResult<T> = Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::new(ParseErrorKind::UnknownIdentifier("Foo".into()), 7);
        assert_eq!(err.to_string(), "Unknown identifier 'Foo' (at index 7)");

        let err = ParseError::new(ParseErrorKind::Expected("')' or ','".into()), 12);
        assert_eq!(err.to_string(), "')' or ',' expected (at index 12)");

        let err = ParseError::new(
            ParseErrorKind::IncompatibleOperands {
                op: "*".into(),
                left: "Single".into(),
                right: "Decimal".into(),
            },
            3,
        );
        assert_eq!(
            err.to_string(),
            "Operator '*' incompatible with operand types 'Single' and 'Decimal' (at index 3)"
        );
    }

    #[test]
    fn test_eval_error_display() {
        assert_eq!(EvalError::DivisionByZero.to_string(), "Division by zero");
        assert_eq!(
            EvalError::ConvertOverflow {
                value: "300".into(),
                target: "Byte".into()
            }
            .to_string(),
            "Value '300' does not fit in type 'Byte'"
        );
    }
}
