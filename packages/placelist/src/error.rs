use thiserror::Error;

/// Errors that can occur when processing place-list, proc-list or hardware
/// subset strings.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The caller provided a string that did not match the expected grammar.
    #[error("invalid syntax: '{invalid_value}' is invalid: {problem}")]
    InvalidSyntax {
        /// The specific value that was invalid. This may either be the entire
        /// input string or a specific part of it, depending on the problem.
        invalid_value: String,

        /// A human-readable description of the problem.
        problem: String,
    },

    /// A strided range would expand to an absurd number of items.
    ///
    /// The expansion bound is fixed at 65536 items per range.
    #[error("range '{invalid_value}' expands to more than {limit} items")]
    RangeTooLong {
        /// The offending range, as written.
        invalid_value: String,

        /// The maximum number of items a single range may expand to.
        limit: u32,
    },
}

impl Error {
    pub(crate) fn new(invalid_value: String, problem: String) -> Self {
        Self::InvalidSyntax {
            invalid_value,
            problem,
        }
    }

    pub(crate) fn caused_by(
        invalid_value: String,
        problem: String,
        inner: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidSyntax {
            invalid_value,
            problem: format!("{problem}: {inner}"),
        }
    }
}

/// A specialized `Result` type for place-list operations, returning the
/// crate's [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn invalid_syntax_is_error() {
        let error = Error::new("abc".to_string(), "not a number".to_string());

        let result: Result<()> = Err(error);
        assert!(result.is_err());
    }

    #[test]
    fn caused_by_includes_inner_message() {
        let inner = "99999999999999999999".parse::<u32>().unwrap_err();
        let error = Error::caused_by("x".to_string(), "bad".to_string(), inner);

        let message = format!("{error}");
        assert!(message.contains("bad: "));
    }
}
