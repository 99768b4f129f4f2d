use common::ObjectRef;

/// Everything that can interrupt the execution of a bytecode.
///
/// All variants except [`Failure::Fatal`] are language level failures: the
/// driver materializes them as exception objects and searches the handler
/// tables for them. `Fatal` is an internal error and is never catchable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Failure {
    #[error("null reference")]
    NullReference,
    #[error("index {index} out of bounds for length {length}")]
    IndexOutOfBounds { index: i32, length: i32 },
    #[error("array store type mismatch")]
    ArrayStoreTypeMismatch,
    #[error("class cast failure")]
    ClassCast,
    #[error("/ by zero")]
    Arithmetic,
    #[error("linkage failure: {0}")]
    Linkage(String),
    #[error("illegal monitor state")]
    IllegalMonitorState,
    #[error("abstract method {0}")]
    AbstractMethod(String),
    #[error("incompatible class change: {0}")]
    IncompatibleClassChange(String),
    #[error("stack overflow")]
    StackOverflow,
    #[error("negative array size {0}")]
    NegativeArraySize(i32),
    #[error("out of memory")]
    OutOfMemory,
    #[error("exception {0:?} thrown")]
    Thrown(ObjectRef),
    #[error("internal error: {0}")]
    Fatal(String),
}

impl Failure {
    /// Name of the class an exception object for this failure is an instance of
    pub fn exception_class(&self) -> Option<&'static str> {
        Some(match self {
            Failure::NullReference => "java/lang/NullPointerException",
            Failure::IndexOutOfBounds { .. } => "java/lang/ArrayIndexOutOfBoundsException",
            Failure::ArrayStoreTypeMismatch => "java/lang/ArrayStoreException",
            Failure::ClassCast => "java/lang/ClassCastException",
            Failure::Arithmetic => "java/lang/ArithmeticException",
            Failure::Linkage(_) => "java/lang/LinkageError",
            Failure::IllegalMonitorState => "java/lang/IllegalMonitorStateException",
            Failure::AbstractMethod(_) => "java/lang/AbstractMethodError",
            Failure::IncompatibleClassChange(_) => "java/lang/IncompatibleClassChangeError",
            Failure::StackOverflow => "java/lang/StackOverflowError",
            Failure::NegativeArraySize(_) => "java/lang/NegativeArraySizeException",
            Failure::OutOfMemory => "java/lang/OutOfMemoryError",
            Failure::Thrown(_) | Failure::Fatal(_) => return None,
        })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Failure::Fatal(_))
    }
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        Failure::Fatal(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn anyhow_errors_are_fatal() {
        let failure: Failure = anyhow!("premature end of code at 7").into();
        assert_eq!(failure, Failure::Fatal("premature end of code at 7".to_string()));
        assert!(failure.is_fatal());
        assert_eq!(failure.exception_class(), None);
    }

    #[test]
    fn exception_classes() {
        assert_eq!(
            Failure::IndexOutOfBounds { index: 3, length: 3 }.exception_class(),
            Some("java/lang/ArrayIndexOutOfBoundsException")
        );
        assert_eq!(Failure::Thrown(ObjectRef::from(8)).exception_class(), None);
        assert_eq!(
            Failure::IndexOutOfBounds { index: -1, length: 0 }.to_string(),
            "index -1 out of bounds for length 0"
        );
    }
}
