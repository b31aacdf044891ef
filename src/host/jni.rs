//! [`HostRuntime`] over a JVM, via the `jni` crate.
//!
//! Types are pinned as global references to their `Class` objects; members are
//! the raw method and field IDs, which stay valid while the class is pinned.
//! Every call into the JVM is followed by an exception check; a pending
//! exception is described to stderr, cleared, and reported as
//! [`HostError::Exception`].

use std::sync::OnceLock;

use jni::objects::{GlobalRef, JClass, JFieldID, JMethodID, JObject, JStaticFieldID, JStaticMethodID, JString, JValue, JValueOwned};
use jni::signature::{JavaType, Primitive, ReturnType};
use jni::sys::jvalue;
use jni::{JNIEnv, JavaVM};
use tracing::{debug, warn};

use super::{HostRuntime, HostValue, Receiver};
use crate::dynamic::{MemberKind, ValueKind};
use crate::error::HostError;

/// A resolved JNI member ID.
#[derive(Clone, Copy)]
pub enum JniMember {
    Method(JMethodID),
    StaticMethod(JStaticMethodID),
    Field(JFieldID),
    StaticField(JStaticFieldID),
}

pub struct JniHost {
    vm: OnceLock<JavaVM>,
}

impl JniHost {
    pub const fn new() -> Self {
        Self { vm: OnceLock::new() }
    }

    /// Record the process JVM. Only the first call has any effect.
    pub fn attach_vm(&self, vm: JavaVM) -> bool {
        let stored = self.vm.set(vm).is_ok();
        if stored {
            debug!("JVM captured");
        }
        stored
    }

    /// Environment for the current thread, attaching it as a daemon if needed.
    pub fn env(&self) -> Result<JNIEnv<'_>, HostError> {
        let vm = self.vm.get().ok_or(HostError::Unavailable)?;
        Ok(vm.attach_current_thread_permanently()?)
    }
}

impl Default for JniHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a JNI result, clearing any exception it left pending.
fn settle<T>(env: &mut JNIEnv<'_>, what: &str, result: jni::errors::Result<T>) -> Result<T, HostError> {
    if env.exception_check().unwrap_or(false) {
        let _ = env.exception_describe();
        let _ = env.exception_clear();
        return Err(HostError::Exception(what.to_owned()));
    }
    Ok(result?)
}

/// Promote a local reference to a global one and drop the local.
fn pin(env: &mut JNIEnv<'_>, local: JObject<'_>) -> Result<Option<GlobalRef>, HostError> {
    if local.is_null() {
        return Ok(None);
    }
    let global = env
        .new_global_ref(&local)
        .map_err(|e| HostError::PinFailed(e.to_string()));
    let _ = env.delete_local_ref(local);
    global.map(Some)
}

/// A failed ID lookup (`NoSuchMethodError`, `NoSuchFieldError`) names the
/// member and its owner; other failures pass through.
fn lookup_failure(err: HostError, class_name: &str, name: &str, signature: &str, kind: MemberKind) -> HostError {
    match err {
        HostError::Exception(_) | HostError::Interface(_) => HostError::MemberNotFound {
            class: class_name.replace('.', "/"),
            name: name.to_owned(),
            signature: signature.to_owned(),
            kind,
        },
        other => other,
    }
}

fn return_type(kind: ValueKind) -> ReturnType {
    match kind {
        ValueKind::Boolean => ReturnType::Primitive(Primitive::Boolean),
        ValueKind::Byte => ReturnType::Primitive(Primitive::Byte),
        ValueKind::Char => ReturnType::Primitive(Primitive::Char),
        ValueKind::Short => ReturnType::Primitive(Primitive::Short),
        ValueKind::Int => ReturnType::Primitive(Primitive::Int),
        ValueKind::Long => ReturnType::Primitive(Primitive::Long),
        ValueKind::Float => ReturnType::Primitive(Primitive::Float),
        ValueKind::Double => ReturnType::Primitive(Primitive::Double),
        ValueKind::Void => ReturnType::Primitive(Primitive::Void),
        ValueKind::String | ValueKind::Object => ReturnType::Object,
        ValueKind::Array => ReturnType::Array,
    }
}

fn java_type(kind: ValueKind) -> JavaType {
    match return_type(kind) {
        ReturnType::Primitive(p) => JavaType::Primitive(p),
        ReturnType::Object => JavaType::Object(String::from("java/lang/Object")),
        ReturnType::Array => JavaType::Array(Box::new(JavaType::Object(String::from("java/lang/Object")))),
    }
}

/// Lower decoded arguments to raw `jvalue`s.
///
/// Strings become fresh local `JString`s; they are returned alongside so the
/// caller can delete them once the call completes.
fn lower_args<'local>(
    env: &mut JNIEnv<'local>,
    args: &[HostValue<GlobalRef>],
) -> Result<(Vec<jvalue>, Vec<JObject<'local>>), HostError> {
    let mut values = Vec::with_capacity(args.len());
    let mut locals = Vec::new();
    for arg in args {
        let value = match arg {
            HostValue::Boolean(b) => jvalue { z: *b as u8 },
            HostValue::Byte(n) => jvalue { b: *n },
            HostValue::Char(c) => jvalue { c: *c },
            HostValue::Short(n) => jvalue { s: *n },
            HostValue::Int(n) => jvalue { i: *n },
            HostValue::Long(n) => jvalue { j: *n },
            HostValue::Float(n) => jvalue { f: *n },
            HostValue::Double(n) => jvalue { d: *n },
            HostValue::Object(Some(object)) => jvalue { l: object.as_obj().as_raw() },
            HostValue::String(Some(s)) => {
                let local: JObject<'local> = env.new_string(s.as_str())?.into();
                let raw = local.as_raw();
                locals.push(local);
                jvalue { l: raw }
            }
            HostValue::Object(None) | HostValue::String(None) | HostValue::Void => jvalue {
                l: std::ptr::null_mut(),
            },
        };
        values.push(value);
    }
    Ok((values, locals))
}

fn release_locals(env: &mut JNIEnv<'_>, locals: Vec<JObject<'_>>) {
    for local in locals {
        let _ = env.delete_local_ref(local);
    }
}

/// Lift a call result into a [`HostValue`], pinning references.
fn lift(env: &mut JNIEnv<'_>, kind: ValueKind, value: JValueOwned<'_>) -> Result<HostValue<GlobalRef>, HostError> {
    Ok(match kind {
        ValueKind::Void => HostValue::Void,
        ValueKind::Boolean => HostValue::Boolean(value.z()?),
        ValueKind::Byte => HostValue::Byte(value.b()?),
        ValueKind::Char => HostValue::Char(value.c()?),
        ValueKind::Short => HostValue::Short(value.s()?),
        ValueKind::Int => HostValue::Int(value.i()?),
        ValueKind::Long => HostValue::Long(value.j()?),
        ValueKind::Float => HostValue::Float(value.f()?),
        ValueKind::Double => HostValue::Double(value.d()?),
        ValueKind::Object | ValueKind::Array => HostValue::Object(pin(env, value.l()?)?),
        ValueKind::String => {
            let local = value.l()?;
            if local.is_null() {
                HostValue::String(None)
            } else {
                let js = JString::from(local);
                let text: Result<String, _> = env.get_string(&js).map(String::from);
                let _ = env.delete_local_ref(js);
                HostValue::String(Some(text?))
            }
        }
    })
}

impl HostRuntime for JniHost {
    type Object = GlobalRef;
    type Class = GlobalRef;
    type Member = JniMember;

    fn resolve_type(&self, name: &str) -> Result<Self::Class, HostError> {
        let mut env = self.env()?;
        let internal = name.replace('.', "/");
        let found = env.find_class(internal.as_str());
        let local = match settle(&mut env, "find_class", found) {
            Ok(local) => local,
            Err(HostError::Exception(_)) => return Err(HostError::TypeNotFound(internal)),
            Err(err) => return Err(err),
        };
        pin(&mut env, local.into())?.ok_or(HostError::TypeNotFound(internal))
    }

    fn resolve_member(
        &self,
        class: &Self::Class,
        class_name: &str,
        name: &str,
        signature: &str,
        kind: MemberKind,
    ) -> Result<Self::Member, HostError> {
        let mut env = self.env()?;
        let jclass = <&JClass>::from(class.as_obj());
        let result = match kind {
            MemberKind::Constructor => env.get_method_id(jclass, "<init>", signature).map(JniMember::Method),
            MemberKind::Method => env.get_method_id(jclass, name, signature).map(JniMember::Method),
            MemberKind::StaticMethod => env
                .get_static_method_id(jclass, name, signature)
                .map(JniMember::StaticMethod),
            MemberKind::Field => env.get_field_id(jclass, name, signature).map(JniMember::Field),
            MemberKind::StaticField => env
                .get_static_field_id(jclass, name, signature)
                .map(JniMember::StaticField),
        };
        settle(&mut env, "member lookup", result).map_err(|err| lookup_failure(err, class_name, name, signature, kind))
    }

    fn construct(
        &self,
        class: &Self::Class,
        ctor: Self::Member,
        args: &[HostValue<Self::Object>],
    ) -> Result<Option<Self::Object>, HostError> {
        let JniMember::Method(ctor) = ctor else {
            return Err(HostError::MemberKindMismatch(MemberKind::Constructor));
        };
        let mut env = self.env()?;
        let (values, locals) = lower_args(&mut env, args)?;
        let jclass = <&JClass>::from(class.as_obj());
        // SAFETY: `ctor` was resolved on this class with the signature the
        // arguments were decoded from.
        let created = unsafe { env.new_object_unchecked(jclass, ctor, &values) };
        let created = settle(&mut env, "constructor", created);
        release_locals(&mut env, locals);
        pin(&mut env, created?)
    }

    fn invoke(
        &self,
        receiver: Receiver<'_, Self::Object, Self::Class>,
        method: Self::Member,
        ret: ValueKind,
        args: &[HostValue<Self::Object>],
    ) -> Result<HostValue<Self::Object>, HostError> {
        let mut env = self.env()?;
        let (values, locals) = lower_args(&mut env, args)?;
        // SAFETY: method IDs come from the cache keyed by the same signature
        // that produced `values` and `ret`.
        let result = match (receiver, method) {
            (Receiver::Instance(object), JniMember::Method(id)) => unsafe {
                env.call_method_unchecked(object.as_obj(), id, return_type(ret), &values)
            },
            (Receiver::Static(class), JniMember::StaticMethod(id)) => unsafe {
                env.call_static_method_unchecked(<&JClass>::from(class.as_obj()), id, return_type(ret), &values)
            },
            _ => {
                release_locals(&mut env, locals);
                return Err(HostError::MemberKindMismatch(MemberKind::Method));
            }
        };
        let result = settle(&mut env, "method call", result);
        release_locals(&mut env, locals);
        lift(&mut env, ret, result?)
    }

    fn get_field(
        &self,
        receiver: Receiver<'_, Self::Object, Self::Class>,
        field: Self::Member,
        kind: ValueKind,
    ) -> Result<HostValue<Self::Object>, HostError> {
        let mut env = self.env()?;
        // SAFETY: field IDs are only ever paired with the descriptor they
        // were resolved with.
        let result = match (receiver, field) {
            (Receiver::Instance(object), JniMember::Field(id)) => unsafe {
                env.get_field_unchecked(object.as_obj(), id, return_type(kind))
            },
            (Receiver::Static(class), JniMember::StaticField(id)) => unsafe {
                env.get_static_field_unchecked(<&JClass>::from(class.as_obj()), id, java_type(kind))
            },
            _ => return Err(HostError::MemberKindMismatch(MemberKind::Field)),
        };
        let result = settle(&mut env, "field read", result)?;
        lift(&mut env, kind, result)
    }

    fn set_field(
        &self,
        receiver: Receiver<'_, Self::Object, Self::Class>,
        field: Self::Member,
        value: HostValue<Self::Object>,
    ) -> Result<(), HostError> {
        let mut env = self.env()?;
        let string = match &value {
            HostValue::String(Some(s)) => Some(env.new_string(s.as_str())?),
            _ => None,
        };
        let null = JObject::null();
        let arg = match &value {
            HostValue::Boolean(b) => JValue::Bool(*b as u8),
            HostValue::Byte(n) => JValue::Byte(*n),
            HostValue::Char(c) => JValue::Char(*c),
            HostValue::Short(n) => JValue::Short(*n),
            HostValue::Int(n) => JValue::Int(*n),
            HostValue::Long(n) => JValue::Long(*n),
            HostValue::Float(n) => JValue::Float(*n),
            HostValue::Double(n) => JValue::Double(*n),
            HostValue::Object(Some(object)) => JValue::Object(object.as_obj()),
            HostValue::String(_) => JValue::Object(string.as_deref().unwrap_or(&null)),
            HostValue::Object(None) | HostValue::Void => JValue::Object(&null),
        };
        // SAFETY: as for `get_field`.
        let result = match (receiver, field) {
            (Receiver::Instance(object), JniMember::Field(id)) => unsafe {
                env.set_field_unchecked(object.as_obj(), id, arg)
            },
            (Receiver::Static(class), JniMember::StaticField(id)) => {
                env.set_static_field(<&JClass>::from(class.as_obj()), id, arg)
            }
            _ => {
                if let Some(string) = string {
                    let _ = env.delete_local_ref(string);
                }
                return Err(HostError::MemberKindMismatch(MemberKind::Field));
            }
        };
        let result = settle(&mut env, "field write", result);
        if let Some(string) = string {
            let _ = env.delete_local_ref(string);
        }
        if let Err(HostError::Interface(message)) = &result {
            warn!(%message, "field write rejected");
        }
        result
    }
}
