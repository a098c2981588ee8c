//! Value-kind tags for native handles.

use std::fmt;

/// What a native handle refers to.
///
/// The discriminants are the native layer's type codes; negative codes are
/// error results that still occupy a handle so the host can read them.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Execution was terminated on request.
    ExecutionTerminated = -4,
    /// A script raised an error while executing.
    ExecutionError = -3,
    /// A script failed to compile.
    CompilerError = -2,
    /// An internal engine error occurred outside script execution.
    InternalError = -1,
    /// The kind has not been determined yet.
    Uninitialized = 0,
    /// The `undefined` value.
    Undefined = 1,
    /// A compiled script.
    Script = 2,
    /// The `null` value.
    Null = 3,
    /// A primitive boolean.
    Bool = 4,
    /// A boxed boolean object.
    BoolObject = 5,
    /// A 32-bit integer.
    Int32 = 6,
    /// A 64-bit float.
    Number = 7,
    /// A boxed number object.
    NumberObject = 8,
    /// A primitive string.
    String = 9,
    /// A boxed string object.
    StringObject = 10,
    /// A plain object.
    Object = 11,
    /// A function object.
    Function = 12,
    /// A date object.
    Date = 13,
    /// An array.
    Array = 14,
    /// A regular expression object.
    RegExp = 15,
}

impl ValueKind {
    /// Decode a native type code. Unknown codes return `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -4 => Self::ExecutionTerminated,
            -3 => Self::ExecutionError,
            -2 => Self::CompilerError,
            -1 => Self::InternalError,
            0 => Self::Uninitialized,
            1 => Self::Undefined,
            2 => Self::Script,
            3 => Self::Null,
            4 => Self::Bool,
            5 => Self::BoolObject,
            6 => Self::Int32,
            7 => Self::Number,
            8 => Self::NumberObject,
            9 => Self::String,
            10 => Self::StringObject,
            11 => Self::Object,
            12 => Self::Function,
            13 => Self::Date,
            14 => Self::Array,
            15 => Self::RegExp,
            _ => return None,
        })
    }

    /// The native type code.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Whether the value is an object reference that a host wrapper may be
    /// connected to.
    pub fn is_object_type(self) -> bool {
        matches!(
            self,
            Self::BoolObject
                | Self::NumberObject
                | Self::StringObject
                | Self::Object
                | Self::Function
                | Self::Date
                | Self::Array
                | Self::RegExp
        )
    }

    /// Whether the handle carries an error result rather than a value.
    pub fn is_error(self) -> bool {
        self.code() < 0
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ExecutionTerminated => "execution-terminated",
            Self::ExecutionError => "execution-error",
            Self::CompilerError => "compiler-error",
            Self::InternalError => "internal-error",
            Self::Uninitialized => "uninitialized",
            Self::Undefined => "undefined",
            Self::Script => "script",
            Self::Null => "null",
            Self::Bool => "bool",
            Self::BoolObject => "bool-object",
            Self::Int32 => "int32",
            Self::Number => "number",
            Self::NumberObject => "number-object",
            Self::String => "string",
            Self::StringObject => "string-object",
            Self::Object => "object",
            Self::Function => "function",
            Self::Date => "date",
            Self::Array => "array",
            Self::RegExp => "regexp",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ValueKind::ExecutionTerminated.code(), -4);
        assert_eq!(ValueKind::Uninitialized.code(), 0);
        assert_eq!(ValueKind::Object.code(), 11);
        assert_eq!(ValueKind::RegExp.code(), 15);
    }

    #[test]
    fn every_code_decodes_to_itself() {
        for code in -4..=15 {
            let kind = ValueKind::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert_eq!(ValueKind::from_code(16), None);
        assert_eq!(ValueKind::from_code(-5), None);
    }

    #[test]
    fn object_kinds() {
        assert!(ValueKind::Object.is_object_type());
        assert!(ValueKind::Function.is_object_type());
        assert!(ValueKind::StringObject.is_object_type());
        assert!(!ValueKind::String.is_object_type());
        assert!(!ValueKind::Script.is_object_type());
        assert!(!ValueKind::Undefined.is_object_type());
    }

    #[test]
    fn error_kinds_are_negative() {
        assert!(ValueKind::CompilerError.is_error());
        assert!(!ValueKind::Null.is_error());
    }
}
