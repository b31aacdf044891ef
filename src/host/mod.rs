//! The host object model seen through a narrow reflective interface.
//!
//! The dynamic call layer only ever talks to a [`HostRuntime`]: it resolves
//! types and members, constructs objects, and invokes or accesses members
//! with already decoded [`HostValue`]s. Everything JVM specific lives in
//! [`jni`].

pub mod jni;

#[cfg(test)]
pub mod fake;

use crate::dynamic::{MemberKind, ValueKind};
use crate::error::HostError;

pub use self::jni::{JniHost, JniMember};

/// A decoded argument or result in host terms.
///
/// `O` is the host's pinned reference type. Strings are owned copies; the
/// host converts them to and from its native string objects.
#[derive(Clone, Debug, PartialEq)]
pub enum HostValue<O> {
    Void,
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(Option<String>),
    Object(Option<O>),
}

impl<O> HostValue<O> {
    /// The zero value for `kind`: `0`, `0.0`, `false` or null.
    pub fn zero(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Boolean => HostValue::Boolean(false),
            ValueKind::Byte => HostValue::Byte(0),
            ValueKind::Char => HostValue::Char(0),
            ValueKind::Short => HostValue::Short(0),
            ValueKind::Int => HostValue::Int(0),
            ValueKind::Long => HostValue::Long(0),
            ValueKind::Float => HostValue::Float(0.0),
            ValueKind::Double => HostValue::Double(0.0),
            ValueKind::String => HostValue::String(None),
            ValueKind::Object | ValueKind::Array => HostValue::Object(None),
            ValueKind::Void => HostValue::Void,
        }
    }
}

/// The target of an invocation or field access.
pub enum Receiver<'a, O, C> {
    Instance(&'a O),
    Static(&'a C),
}

/// Reflective capabilities the dynamic call layer needs from the host.
///
/// Every method must clear any in-flight host exception before returning; an
/// exception is reported as [`HostError::Exception`], never propagated.
pub trait HostRuntime: Send + Sync {
    /// A pinned object reference. Dropping it un-pins the object.
    type Object: Clone + Send + Sync + 'static;
    /// A pinned type reference.
    type Class: Clone + Send + Sync + 'static;
    /// A resolved method, constructor, or field token.
    type Member: Copy + Send + Sync + 'static;

    fn resolve_type(&self, name: &str) -> Result<Self::Class, HostError>;

    /// Resolve a member of `class`, which was resolved from `class_name`.
    fn resolve_member(
        &self,
        class: &Self::Class,
        class_name: &str,
        name: &str,
        signature: &str,
        kind: MemberKind,
    ) -> Result<Self::Member, HostError>;

    /// Construct an object; the result is already pinned.
    fn construct(
        &self,
        class: &Self::Class,
        ctor: Self::Member,
        args: &[HostValue<Self::Object>],
    ) -> Result<Option<Self::Object>, HostError>;

    /// Invoke a method. Reference results come back pinned.
    fn invoke(
        &self,
        receiver: Receiver<'_, Self::Object, Self::Class>,
        method: Self::Member,
        ret: ValueKind,
        args: &[HostValue<Self::Object>],
    ) -> Result<HostValue<Self::Object>, HostError>;

    fn get_field(
        &self,
        receiver: Receiver<'_, Self::Object, Self::Class>,
        field: Self::Member,
        kind: ValueKind,
    ) -> Result<HostValue<Self::Object>, HostError>;

    fn set_field(
        &self,
        receiver: Receiver<'_, Self::Object, Self::Class>,
        field: Self::Member,
        value: HostValue<Self::Object>,
    ) -> Result<(), HostError>;
}
