//! Strict parser for JVM type descriptors.
//!
//! One descriptor character selects one decode/encode strategy:
//!
//! | char | kind      |
//! |------|-----------|
//! | `Z`  | boolean   |
//! | `B`  | byte      |
//! | `C`  | char      |
//! | `S`  | short     |
//! | `I`  | int       |
//! | `J`  | long      |
//! | `F`  | float     |
//! | `D`  | double    |
//! | `L…;`| object, or string for `Ljava/lang/String;` |
//! | `[…` | array (always crosses as a handle) |
//! | `V`  | void, return position only |

use std::fmt;

use crate::error::SignatureError;

const STRING_CLASS: &str = "java/lang/String";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    /// `java/lang/String`, copied by value across the boundary.
    String,
    Object,
    Array,
    Void,
}

impl ValueKind {
    fn from_primitive(c: u8) -> Option<Self> {
        Some(match c {
            b'Z' => ValueKind::Boolean,
            b'B' => ValueKind::Byte,
            b'C' => ValueKind::Char,
            b'S' => ValueKind::Short,
            b'I' => ValueKind::Int,
            b'J' => ValueKind::Long,
            b'F' => ValueKind::Float,
            b'D' => ValueKind::Double,
            b'V' => ValueKind::Void,
            _ => return None,
        })
    }

    /// Kinds that travel as a host reference (handle or string copy).
    pub fn is_reference(self) -> bool {
        matches!(self, ValueKind::String | ValueKind::Object | ValueKind::Array)
    }

    /// Whether a host value of kind `declared` can be read back through an ABI
    /// entry point typed as `self`.
    ///
    /// Narrow integers widen into `Int`, any reference can be taken as an
    /// object handle, and `Void` discards whatever was returned.
    pub fn accepts(self, declared: ValueKind) -> bool {
        match self {
            ValueKind::Void => true,
            ValueKind::Int => matches!(
                declared,
                ValueKind::Byte | ValueKind::Char | ValueKind::Short | ValueKind::Int
            ),
            ValueKind::Object => declared.is_reference(),
            other => other == declared,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Boolean => "boolean",
            ValueKind::Byte => "byte",
            ValueKind::Char => "char",
            ValueKind::Short => "short",
            ValueKind::Int => "int",
            ValueKind::Long => "long",
            ValueKind::Float => "float",
            ValueKind::Double => "double",
            ValueKind::String => "string",
            ValueKind::Object => "object",
            ValueKind::Array => "array",
            ValueKind::Void => "void",
        };
        f.write_str(name)
    }
}

/// Parsed `(params)ret` method descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodSignature {
    params: Vec<ValueKind>,
    ret: ValueKind,
}

impl MethodSignature {
    pub fn parse(sig: &str) -> Result<Self, SignatureError> {
        let bytes = sig.as_bytes();
        if bytes.is_empty() {
            return Err(SignatureError::Empty);
        }
        if bytes[0] != b'(' {
            return Err(SignatureError::MissingOpenParen);
        }

        let mut params = Vec::new();
        let mut pos = 1;
        loop {
            match bytes.get(pos) {
                None => return Err(SignatureError::UnterminatedParams),
                Some(b')') => {
                    pos += 1;
                    break;
                }
                Some(_) => {
                    let (kind, next) = parse_type(bytes, pos)?;
                    if kind == ValueKind::Void {
                        return Err(SignatureError::VoidParameter(pos));
                    }
                    params.push(kind);
                    pos = next;
                }
            }
        }

        if pos >= bytes.len() {
            return Err(SignatureError::MissingReturn);
        }
        let (ret, end) = parse_type(bytes, pos)?;
        if end != bytes.len() {
            return Err(SignatureError::Trailing(end));
        }
        Ok(Self { params, ret })
    }

    pub fn params(&self) -> &[ValueKind] {
        &self.params
    }

    pub fn ret(&self) -> ValueKind {
        self.ret
    }
}

/// Parse a single field descriptor such as `I` or `Ljava/lang/String;`.
pub fn parse_field(desc: &str) -> Result<ValueKind, SignatureError> {
    let bytes = desc.as_bytes();
    if bytes.is_empty() {
        return Err(SignatureError::Empty);
    }
    let (kind, end) = parse_type(bytes, 0)?;
    if kind == ValueKind::Void {
        return Err(SignatureError::VoidParameter(0));
    }
    if end != bytes.len() {
        return Err(SignatureError::Trailing(end));
    }
    Ok(kind)
}

/// Parse one type starting at `pos`, returning it and the next position.
fn parse_type(bytes: &[u8], pos: usize) -> Result<(ValueKind, usize), SignatureError> {
    let Some(&c) = bytes.get(pos) else {
        return Err(SignatureError::MissingReturn);
    };
    match c {
        b'L' => {
            let start = pos + 1;
            let len = bytes[start..]
                .iter()
                .position(|&b| b == b';')
                .ok_or(SignatureError::UnterminatedClass(pos))?;
            if len == 0 {
                return Err(SignatureError::UnexpectedChar {
                    found: ';',
                    position: start,
                });
            }
            let class = &bytes[start..start + len];
            let kind = if class == STRING_CLASS.as_bytes() {
                ValueKind::String
            } else {
                ValueKind::Object
            };
            Ok((kind, start + len + 1))
        }
        b'[' => {
            let (element, next) = parse_type(bytes, pos + 1)?;
            if element == ValueKind::Void {
                return Err(SignatureError::VoidParameter(pos + 1));
            }
            Ok((ValueKind::Array, next))
        }
        _ => ValueKind::from_primitive(c)
            .map(|kind| (kind, pos + 1))
            .ok_or(SignatureError::UnexpectedChar {
                found: c as char,
                position: pos,
            }),
    }
}
