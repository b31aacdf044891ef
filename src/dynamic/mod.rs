//! Signature-driven dynamic calls into the host.
//!
//! Each operation takes a type name, member name and JVM descriptor, decodes
//! the flat argument buffer according to the descriptor, resolves the target
//! through the [`MemberCache`], and encodes the result back into one word.
//! Every failure path logs and yields [`Word::ZERO`], the zero value of
//! every kind.

mod cache;
mod signature;

pub use cache::{MemberCache, MemberKind};
pub use signature::{MethodSignature, ValueKind, parse_field};

use tracing::warn;

use crate::error::CallError;
use crate::handles::HandleRegistry;
use crate::host::{HostRuntime, HostValue, Receiver};
use crate::runtime::abi::{self, Handle, Word};

const CONSTRUCTOR_NAME: &str = "<init>";

/// A borrowed view over the pieces a dynamic call needs.
pub struct Dynamic<'a, H: HostRuntime> {
    host: &'a H,
    members: &'a MemberCache<H::Class, H::Member>,
    handles: &'a HandleRegistry<H::Object>,
}

enum Target {
    Instance(Handle),
    Static,
}

impl<'a, H: HostRuntime> Dynamic<'a, H> {
    pub fn new(
        host: &'a H,
        members: &'a MemberCache<H::Class, H::Member>,
        handles: &'a HandleRegistry<H::Object>,
    ) -> Self {
        Self { host, members, handles }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Construct `class` with a `(…)V` constructor and return a handle to it.
    pub fn create_object(&self, class: &str, signature: &str, args: &[Word]) -> Handle {
        let result = self.construct(class, signature, args);
        match result {
            Ok(handle) => handle,
            Err(err) => {
                warn!(class, signature, %err, "create_object failed");
                Handle::NULL
            }
        }
    }

    pub fn call_method(
        &self,
        receiver: Handle,
        class: &str,
        name: &str,
        signature: &str,
        ret: ValueKind,
        args: &[Word],
    ) -> Word {
        let result = self.call(Target::Instance(receiver), class, name, signature, ret, args);
        self.settle(result, "call_method", class, name)
    }

    pub fn call_static_method(&self, class: &str, name: &str, signature: &str, ret: ValueKind, args: &[Word]) -> Word {
        let result = self.call(Target::Static, class, name, signature, ret, args);
        self.settle(result, "call_static_method", class, name)
    }

    pub fn get_field(&self, receiver: Handle, class: &str, name: &str, descriptor: &str, kind: ValueKind) -> Word {
        let result = self.read(Target::Instance(receiver), class, name, descriptor, kind);
        self.settle(result, "get_field", class, name)
    }

    pub fn get_static_field(&self, class: &str, name: &str, descriptor: &str, kind: ValueKind) -> Word {
        let result = self.read(Target::Static, class, name, descriptor, kind);
        self.settle(result, "get_static_field", class, name)
    }

    pub fn set_field(&self, receiver: Handle, class: &str, name: &str, descriptor: &str, kind: ValueKind, value: Word) {
        let result = self.write(Target::Instance(receiver), class, name, descriptor, kind, value);
        self.settle(result.map(|()| Word::ZERO), "set_field", class, name);
    }

    pub fn set_static_field(&self, class: &str, name: &str, descriptor: &str, kind: ValueKind, value: Word) {
        let result = self.write(Target::Static, class, name, descriptor, kind, value);
        self.settle(result.map(|()| Word::ZERO), "set_static_field", class, name);
    }

    /// Resolve a type and one of its members into the cache now, from the
    /// calling thread.
    ///
    /// Hosts whose type lookup depends on the calling thread (the JVM picks
    /// the class loader of the calling native frame) need this for members
    /// that are later invoked from foreign threads.
    pub fn preload(&self, class_name: &str, name: &str, signature: &str, kind: MemberKind) -> Result<(), CallError> {
        match kind {
            MemberKind::Field | MemberKind::StaticField => {
                parse_field(signature)?;
            }
            _ => {
                MethodSignature::parse(signature)?;
            }
        }
        let class = self.class(class_name)?;
        self.member(&class, class_name, name, signature, kind)?;
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn settle(&self, result: Result<Word, CallError>, op: &'static str, class: &str, member: &str) -> Word {
        result.unwrap_or_else(|err| {
            warn!(op, class, member, %err, "dynamic call returned zero value");
            Word::ZERO
        })
    }

    fn construct(&self, class_name: &str, signature: &str, args: &[Word]) -> Result<Handle, CallError> {
        let sig = MethodSignature::parse(signature)?;
        if sig.ret() != ValueKind::Void {
            return Err(CallError::ConstructorReturn(sig.ret()));
        }
        let class = self.class(class_name)?;
        let ctor = self.member(&class, class_name, CONSTRUCTOR_NAME, signature, MemberKind::Constructor)?;
        let values = self.decode_args(sig.params(), args);
        let object = self.host.construct(&class, ctor, &values)?;
        Ok(self.handles.store(object))
    }

    fn call(
        &self,
        target: Target,
        class_name: &str,
        name: &str,
        signature: &str,
        requested: ValueKind,
        args: &[Word],
    ) -> Result<Word, CallError> {
        let sig = MethodSignature::parse(signature)?;
        let call_kind = host_kind(requested, sig.ret())?;
        let class = self.class(class_name)?;
        let values;
        let result = match target {
            Target::Instance(handle) => {
                let object = self.receiver(handle)?;
                let method = self.member(&class, class_name, name, signature, MemberKind::Method)?;
                values = self.decode_args(sig.params(), args);
                self.host.invoke(Receiver::Instance(&object), method, call_kind, &values)?
            }
            Target::Static => {
                let method = self.member(&class, class_name, name, signature, MemberKind::StaticMethod)?;
                values = self.decode_args(sig.params(), args);
                self.host.invoke(Receiver::Static(&class), method, call_kind, &values)?
            }
        };
        Ok(self.encode(requested, result))
    }

    fn read(
        &self,
        target: Target,
        class_name: &str,
        name: &str,
        descriptor: &str,
        requested: ValueKind,
    ) -> Result<Word, CallError> {
        let declared = parse_field(descriptor)?;
        let read_kind = host_kind(requested, declared)?;
        let class = self.class(class_name)?;
        let value = match target {
            Target::Instance(handle) => {
                let object = self.receiver(handle)?;
                let field = self.member(&class, class_name, name, descriptor, MemberKind::Field)?;
                self.host.get_field(Receiver::Instance(&object), field, read_kind)?
            }
            Target::Static => {
                let field = self.member(&class, class_name, name, descriptor, MemberKind::StaticField)?;
                self.host.get_field(Receiver::Static(&class), field, read_kind)?
            }
        };
        Ok(self.encode(requested, value))
    }

    fn write(
        &self,
        target: Target,
        class_name: &str,
        name: &str,
        descriptor: &str,
        requested: ValueKind,
        word: Word,
    ) -> Result<(), CallError> {
        let declared = parse_field(descriptor)?;
        if requested == ValueKind::Void || !requested.accepts(declared) {
            return Err(CallError::ReturnMismatch { requested, declared });
        }
        let class = self.class(class_name)?;
        let value = self.decode(declared, word);
        match target {
            Target::Instance(handle) => {
                let object = self.receiver(handle)?;
                let field = self.member(&class, class_name, name, descriptor, MemberKind::Field)?;
                self.host.set_field(Receiver::Instance(&object), field, value)?;
            }
            Target::Static => {
                let field = self.member(&class, class_name, name, descriptor, MemberKind::StaticField)?;
                self.host.set_field(Receiver::Static(&class), field, value)?;
            }
        }
        Ok(())
    }

    fn class(&self, name: &str) -> Result<H::Class, CallError> {
        Ok(self.members.type_or_resolve(name, || self.host.resolve_type(name))?)
    }

    fn member(
        &self,
        class: &H::Class,
        class_name: &str,
        name: &str,
        signature: &str,
        kind: MemberKind,
    ) -> Result<H::Member, CallError> {
        Ok(self.members.member_or_resolve(class_name, name, signature, kind, || {
            self.host.resolve_member(class, class_name, name, signature, kind)
        })?)
    }

    fn receiver(&self, handle: Handle) -> Result<H::Object, CallError> {
        self.handles.get(handle).ok_or(CallError::NullReceiver(handle.to_raw()))
    }

    /// Decode the first `min(params, args)` words and log any mismatch.
    ///
    /// Surplus words are ignored. Parameters past the end of a short buffer
    /// are passed as their zero value, so the host always sees a complete
    /// argument list.
    fn decode_args(&self, params: &[ValueKind], args: &[Word]) -> Vec<HostValue<H::Object>> {
        if params.len() != args.len() {
            warn!(
                expected = params.len(),
                supplied = args.len(),
                "argument count does not match signature"
            );
        }
        params
            .iter()
            .enumerate()
            .map(|(i, &kind)| match args.get(i) {
                Some(&word) => self.decode(kind, word),
                None => HostValue::zero(kind),
            })
            .collect()
    }

    fn decode(&self, kind: ValueKind, word: Word) -> HostValue<H::Object> {
        match kind {
            ValueKind::Boolean => HostValue::Boolean(word.as_bool()),
            ValueKind::Byte => HostValue::Byte(word.as_i8()),
            ValueKind::Char => HostValue::Char(word.as_u16()),
            ValueKind::Short => HostValue::Short(word.as_i16()),
            ValueKind::Int => HostValue::Int(word.as_i32()),
            ValueKind::Long => HostValue::Long(word.as_i64()),
            ValueKind::Float => HostValue::Float(word.as_f32()),
            ValueKind::Double => HostValue::Double(word.as_f64()),
            // The caller keeps the buffer alive for the duration of the call;
            // it is copied here and never retained.
            ValueKind::String => HostValue::String(unsafe { abi::read_c_string(word.as_ptr()) }),
            ValueKind::Object | ValueKind::Array => HostValue::Object(self.handles.get(word.as_handle())),
            ValueKind::Void => HostValue::Void,
        }
    }

    fn encode(&self, requested: ValueKind, value: HostValue<H::Object>) -> Word {
        if requested == ValueKind::Void {
            return Word::ZERO;
        }
        match value {
            HostValue::Void => Word::ZERO,
            HostValue::Boolean(b) => Word::from_bool(b),
            HostValue::Byte(n) => Word::from_i32(n as i32),
            HostValue::Char(c) => Word::from_i32(c as i32),
            HostValue::Short(n) => Word::from_i32(n as i32),
            HostValue::Int(n) => Word::from_i32(n),
            HostValue::Long(n) => Word::from_i64(n),
            HostValue::Float(n) => Word::from_f32(n),
            HostValue::Double(n) => Word::from_f64(n),
            HostValue::String(Some(s)) => Word::from_ptr(abi::alloc_c_string(&s)),
            HostValue::String(None) => Word::ZERO,
            HostValue::Object(object) => Word::from_handle(self.handles.store(object)),
        }
    }
}

/// The kind the host should produce for a `requested` ABI result when the
/// signature declares `declared`.
fn host_kind(requested: ValueKind, declared: ValueKind) -> Result<ValueKind, CallError> {
    if !requested.accepts(declared) {
        return Err(CallError::ReturnMismatch { requested, declared });
    }
    Ok(match requested {
        // A string taken as an object handle stays a host object.
        ValueKind::Object if declared == ValueKind::String => ValueKind::Object,
        _ => declared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostError;
    use crate::host::fake::{FakeHost, FakeObject};
    use std::sync::Arc;

    struct Fixture {
        host: FakeHost,
        members: MemberCache<<FakeHost as HostRuntime>::Class, <FakeHost as HostRuntime>::Member>,
        handles: HandleRegistry<Arc<FakeObject>>,
    }

    impl Fixture {
        fn new() -> Self {
            let host = FakeHost::new();
            host.add_constructor("demo/Point", "(ID)V", |this, args| {
                this.set("x", args[0].clone());
                this.set("y", args[1].clone());
                Ok(())
            });
            host.add_field("demo/Point", "x");
            host.add_field("demo/Point", "y");
            host.add_field("demo/Point", "label");
            host.add_method("demo/Point", "scaled", "(F)D", |this, args| {
                let (HostValue::Double(y), HostValue::Float(f)) = (this.unwrap().get("y"), &args[0]) else {
                    return Err("bad state".into());
                };
                Ok(HostValue::Double(y * *f as f64))
            });
            host.add_method("demo/Point", "describe", "(Ljava/lang/String;)Ljava/lang/String;", |this, args| {
                let HostValue::String(Some(prefix)) = &args[0] else {
                    return Ok(HostValue::String(None));
                };
                Ok(HostValue::String(Some(format!("{prefix}{:?}", this.unwrap().get("x")))))
            });
            host.add_method("demo/Point", "explode", "()I", |_, _| Err("java.lang.IllegalStateException".into()));
            host.add_static_method("demo/Point", "origin", "()Ldemo/Point;", |_, _| Ok(HostValue::Object(None)));
            host.add_static_field("demo/Point", "COUNT", HostValue::Int(3));
            Self {
                host,
                members: MemberCache::new(),
                handles: HandleRegistry::new(),
            }
        }

        fn dynamic(&self) -> Dynamic<'_, FakeHost> {
            Dynamic::new(&self.host, &self.members, &self.handles)
        }
    }

    #[test]
    fn test_constructor_fields() {
        let fx = Fixture::new();
        let dynamic = fx.dynamic();
        let handle = dynamic.create_object("demo/Point", "(ID)V", &[Word::from_i32(7), Word::from_f64(3.14)]);
        assert!(!handle.is_null());
        let point = fx.handles.get(handle).unwrap();
        assert_eq!(point.get("x"), HostValue::Int(7));
        assert_eq!(point.get("y"), HostValue::Double(3.14));

        assert_eq!(dynamic.get_field(handle, "demo/Point", "x", "I", ValueKind::Int).as_i32(), 7);
        assert_eq!(dynamic.get_field(handle, "demo/Point", "y", "D", ValueKind::Double).as_f64(), 3.14);
    }

    #[test]
    fn test_float_argument_uses_lower_bits() {
        let fx = Fixture::new();
        let dynamic = fx.dynamic();
        let handle = dynamic.create_object("demo/Point", "(ID)V", &[Word::from_i32(1), Word::from_f64(2.0)]);
        // Garbage in the upper half must not leak into the float.
        let arg = Word::from_bits(Word::from_f32(1.5).to_bits() | 0x7777_0000_0000_0000u64 as i64);
        let out = dynamic.call_method(handle, "demo/Point", "scaled", "(F)D", ValueKind::Double, &[arg]);
        assert_eq!(out.as_f64(), 3.0);
    }

    #[test]
    fn test_string_in_and_out() {
        let fx = Fixture::new();
        let dynamic = fx.dynamic();
        let handle = dynamic.create_object("demo/Point", "(ID)V", &[Word::from_i32(9), Word::from_f64(0.0)]);
        let prefix = abi::alloc_c_string("x=");
        let out = dynamic.call_method(
            handle,
            "demo/Point",
            "describe",
            "(Ljava/lang/String;)Ljava/lang/String;",
            ValueKind::String,
            &[Word::from_ptr(prefix)],
        );
        unsafe { abi::free_c_string(prefix) };
        let text = unsafe { abi::read_c_string(out.as_ptr()) };
        assert_eq!(text.as_deref(), Some("x=Int(9)"));
        unsafe { abi::free_c_string(out.as_ptr() as *mut _) };
    }

    #[test]
    fn test_string_field_round_trip() {
        let fx = Fixture::new();
        let dynamic = fx.dynamic();
        let handle = dynamic.create_object("demo/Point", "(ID)V", &[Word::from_i32(0), Word::from_f64(0.0)]);
        let label = abi::alloc_c_string("spawn");
        dynamic.set_field(handle, "demo/Point", "label", "Ljava/lang/String;", ValueKind::String, Word::from_ptr(label));
        unsafe { abi::free_c_string(label) };
        let out = dynamic.get_field(handle, "demo/Point", "label", "Ljava/lang/String;", ValueKind::String);
        assert_eq!(unsafe { abi::read_c_string(out.as_ptr()) }.as_deref(), Some("spawn"));
        unsafe { abi::free_c_string(out.as_ptr() as *mut _) };
    }

    #[test]
    fn test_cache_idempotence() {
        let fx = Fixture::new();
        let dynamic = fx.dynamic();
        let handle = dynamic.create_object("demo/Point", "(ID)V", &[Word::from_i32(4), Word::from_f64(0.5)]);
        let cold = dynamic.get_field(handle, "demo/Point", "x", "I", ValueKind::Int);
        let lookups = fx.host.lookups();
        let resolutions = fx.members.resolutions();
        for _ in 0..10 {
            let warm = dynamic.get_field(handle, "demo/Point", "x", "I", ValueKind::Int);
            assert_eq!(warm, cold);
        }
        assert_eq!(fx.host.lookups(), lookups);
        assert_eq!(fx.members.resolutions(), resolutions);
    }

    #[test]
    fn test_exception_yields_zero() {
        let fx = Fixture::new();
        let dynamic = fx.dynamic();
        let handle = dynamic.create_object("demo/Point", "(ID)V", &[Word::from_i32(4), Word::from_f64(0.5)]);
        let out = dynamic.call_method(handle, "demo/Point", "explode", "()I", ValueKind::Int, &[]);
        assert_eq!(out, Word::ZERO);
        assert_eq!(fx.host.exceptions_cleared(), 1);
    }

    #[test]
    fn test_pin_failure_yields_null_handle() {
        let fx = Fixture::new();
        let dynamic = fx.dynamic();
        fx.host.fail_pins(true);
        assert!(dynamic.create_object("demo/Point", "(ID)V", &[Word::from_i32(1), Word::from_f64(1.0)]).is_null());
        assert_eq!(fx.handles.count(), 0);

        fx.host.fail_pins(false);
        assert!(!dynamic.create_object("demo/Point", "(ID)V", &[Word::from_i32(1), Word::from_f64(1.0)]).is_null());
        assert_eq!(fx.handles.count(), 1);
    }

    #[test]
    fn test_missing_type_member_and_receiver() {
        let fx = Fixture::new();
        let dynamic = fx.dynamic();
        assert!(dynamic.create_object("demo/Nope", "()V", &[]).is_null());
        let handle = dynamic.create_object("demo/Point", "(ID)V", &[Word::from_i32(1), Word::from_f64(1.0)]);
        assert_eq!(dynamic.call_method(handle, "demo/Point", "nope", "()I", ValueKind::Int, &[]), Word::ZERO);
        assert_eq!(dynamic.get_field(Handle::NULL, "demo/Point", "x", "I", ValueKind::Int), Word::ZERO);
        assert_eq!(
            dynamic.get_field(Handle::from_raw(12345), "demo/Point", "x", "I", ValueKind::Int),
            Word::ZERO
        );
    }

    #[test]
    fn test_short_argument_buffer_pads_with_zero() {
        let fx = Fixture::new();
        let dynamic = fx.dynamic();
        let handle = dynamic.create_object("demo/Point", "(ID)V", &[Word::from_i32(1)]);
        let point = fx.handles.get(handle).unwrap();
        assert_eq!(point.get("x"), HostValue::Int(1));
        assert_eq!(point.get("y"), HostValue::Double(0.0));

        let empty = dynamic.create_object("demo/Point", "(ID)V", &[]);
        assert_eq!(fx.handles.get(empty).unwrap().get("x"), HostValue::Int(0));
    }

    #[test]
    fn test_surplus_arguments_ignored() {
        let fx = Fixture::new();
        let dynamic = fx.dynamic();
        let handle = dynamic.create_object(
            "demo/Point",
            "(ID)V",
            &[Word::from_i32(2), Word::from_f64(2.5), Word::from_i32(99)],
        );
        assert_eq!(fx.handles.get(handle).unwrap().get("x"), HostValue::Int(2));
    }

    #[test]
    fn test_return_kind_mismatch() {
        let fx = Fixture::new();
        let dynamic = fx.dynamic();
        let handle = dynamic.create_object("demo/Point", "(ID)V", &[Word::from_i32(2), Word::from_f64(2.5)]);
        let lookups = fx.host.lookups();
        let out = dynamic.call_method(handle, "demo/Point", "scaled", "(F)D", ValueKind::Long, &[Word::from_f32(1.0)]);
        assert_eq!(out, Word::ZERO);
        assert_eq!(fx.host.lookups(), lookups);
    }

    #[test]
    fn test_static_members() {
        let fx = Fixture::new();
        let dynamic = fx.dynamic();
        assert_eq!(dynamic.get_static_field("demo/Point", "COUNT", "I", ValueKind::Int).as_i32(), 3);
        dynamic.set_static_field("demo/Point", "COUNT", "I", ValueKind::Int, Word::from_i32(11));
        assert_eq!(dynamic.get_static_field("demo/Point", "COUNT", "I", ValueKind::Int).as_i32(), 11);

        let before = fx.handles.count();
        let origin = dynamic.call_static_method("demo/Point", "origin", "()Ldemo/Point;", ValueKind::Object, &[]);
        assert!(origin.as_handle().is_null());
        assert_eq!(fx.handles.count(), before);
    }

    #[test]
    fn test_object_argument_by_handle() {
        let fx = Fixture::new();
        fx.host.add_method("demo/Point", "sameAs", "(Ldemo/Point;)Z", |this, args| {
            let HostValue::Object(Some(other)) = &args[0] else {
                return Ok(HostValue::Boolean(false));
            };
            Ok(HostValue::Boolean(Arc::ptr_eq(this.unwrap(), other)))
        });
        let dynamic = fx.dynamic();
        let a = dynamic.create_object("demo/Point", "(ID)V", &[Word::from_i32(1), Word::from_f64(1.0)]);
        let b = dynamic.create_object("demo/Point", "(ID)V", &[Word::from_i32(1), Word::from_f64(1.0)]);
        let sig = "(Ldemo/Point;)Z";
        assert!(dynamic.call_method(a, "demo/Point", "sameAs", sig, ValueKind::Boolean, &[Word::from_handle(a)]).as_bool());
        assert!(!dynamic.call_method(a, "demo/Point", "sameAs", sig, ValueKind::Boolean, &[Word::from_handle(b)]).as_bool());
        assert!(!dynamic.call_method(a, "demo/Point", "sameAs", sig, ValueKind::Boolean, &[Word::ZERO]).as_bool());
    }

    #[test]
    fn test_preload_warms_cache() {
        let fx = Fixture::new();
        let dynamic = fx.dynamic();
        dynamic.preload("demo/Point", "COUNT", "I", MemberKind::StaticField).unwrap();
        let lookups = fx.host.lookups();
        assert_eq!(dynamic.get_static_field("demo/Point", "COUNT", "I", ValueKind::Int).as_i32(), 3);
        assert_eq!(fx.host.lookups(), lookups);

        let missing = dynamic.preload("demo/Point", "gone", "()V", MemberKind::StaticMethod);
        assert!(matches!(
            missing,
            Err(CallError::Host(HostError::MemberNotFound { ref class, .. })) if class == "demo/Point"
        ));
        assert!(matches!(
            dynamic.preload("demo/Point", "COUNT", "Q", MemberKind::StaticField),
            Err(CallError::Signature(_))
        ));
    }
}
