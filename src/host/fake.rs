//! In-memory host object model for tests.
//!
//! Classes are declared member by member; objects are bags of named fields.
//! Method and constructor bodies are closures, and a body returning `Err`
//! behaves like a thrown host exception.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{HostRuntime, HostValue, Receiver};
use crate::dynamic::{MemberKind, ValueKind};
use crate::error::HostError;

pub type FakeValue = HostValue<Arc<FakeObject>>;
pub type MethodBody = Arc<dyn Fn(Option<&Arc<FakeObject>>, &[FakeValue]) -> Result<FakeValue, String> + Send + Sync>;
pub type CtorBody = Arc<dyn Fn(&FakeObject, &[FakeValue]) -> Result<(), String> + Send + Sync>;

pub struct FakeObject {
    class: String,
    fields: Mutex<HashMap<String, FakeValue>>,
}

impl FakeObject {
    fn new(class: &str) -> Self {
        Self {
            class: class.to_owned(),
            fields: Mutex::new(HashMap::new()),
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Current value of `name`, or `Void` if it was never set.
    pub fn get(&self, name: &str) -> FakeValue {
        self.fields().get(name).cloned().unwrap_or(HostValue::Void)
    }

    pub fn set(&self, name: &str, value: FakeValue) {
        self.fields().insert(name.to_owned(), value);
    }

    fn fields(&self) -> MutexGuard<'_, HashMap<String, FakeValue>> {
        self.fields.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for FakeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FakeObject({}@{:p})", self.class, self)
    }
}

impl PartialEq for FakeObject {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FakeMember(usize);

enum MemberDef {
    Constructor(CtorBody),
    Method { body: MethodBody, is_static: bool },
    Field { name: String },
    StaticField { class: String, name: String },
}

#[derive(Default)]
struct FakeClass {
    constructors: HashMap<String, usize>,
    methods: HashMap<(String, String, bool), usize>,
    fields: HashMap<(String, bool), usize>,
}

#[derive(Default)]
struct State {
    classes: HashMap<String, FakeClass>,
    members: Vec<MemberDef>,
    statics: HashMap<(String, String), FakeValue>,
}

#[derive(Default)]
pub struct FakeHost {
    state: Mutex<State>,
    lookups: AtomicUsize,
    exceptions_cleared: AtomicUsize,
    fail_pins: AtomicBool,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Declaration
    // =========================================================================

    pub fn add_constructor(
        &self,
        class: &str,
        signature: &str,
        body: impl Fn(&FakeObject, &[FakeValue]) -> Result<(), String> + Send + Sync + 'static,
    ) {
        let mut state = self.state();
        let index = state.push(MemberDef::Constructor(Arc::new(body)));
        state.class(class).constructors.insert(signature.to_owned(), index);
    }

    pub fn add_method(
        &self,
        class: &str,
        name: &str,
        signature: &str,
        body: impl Fn(Option<&Arc<FakeObject>>, &[FakeValue]) -> Result<FakeValue, String> + Send + Sync + 'static,
    ) {
        self.insert_method(class, name, signature, false, Arc::new(body));
    }

    pub fn add_static_method(
        &self,
        class: &str,
        name: &str,
        signature: &str,
        body: impl Fn(Option<&Arc<FakeObject>>, &[FakeValue]) -> Result<FakeValue, String> + Send + Sync + 'static,
    ) {
        self.insert_method(class, name, signature, true, Arc::new(body));
    }

    pub fn add_field(&self, class: &str, name: &str) {
        let mut state = self.state();
        let index = state.push(MemberDef::Field { name: name.to_owned() });
        state.class(class).fields.insert((name.to_owned(), false), index);
    }

    pub fn add_static_field(&self, class: &str, name: &str, initial: FakeValue) {
        let mut state = self.state();
        let index = state.push(MemberDef::StaticField {
            class: class.to_owned(),
            name: name.to_owned(),
        });
        state.class(class).fields.insert((name.to_owned(), true), index);
        state.statics.insert((class.to_owned(), name.to_owned()), initial);
    }

    fn insert_method(&self, class: &str, name: &str, signature: &str, is_static: bool, body: MethodBody) {
        let mut state = self.state();
        let index = state.push(MemberDef::Method { body, is_static });
        state
            .class(class)
            .methods
            .insert((name.to_owned(), signature.to_owned(), is_static), index);
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Type and member lookups served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn exceptions_cleared(&self) -> usize {
        self.exceptions_cleared.load(Ordering::SeqCst)
    }

    /// Make every subsequent pin fail, as if the reference table were full.
    pub fn fail_pins(&self, fail: bool) {
        self.fail_pins.store(fail, Ordering::SeqCst);
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pin(&self, object: Arc<FakeObject>) -> Result<Arc<FakeObject>, HostError> {
        if self.fail_pins.load(Ordering::SeqCst) {
            return Err(HostError::PinFailed("reference table full".into()));
        }
        Ok(object)
    }

    fn thrown(&self, what: String) -> HostError {
        self.exceptions_cleared.fetch_add(1, Ordering::SeqCst);
        HostError::Exception(what)
    }

    fn method_body(&self, member: FakeMember) -> Result<(MethodBody, bool), HostError> {
        match self.state().members.get(member.0) {
            Some(MemberDef::Method { body, is_static }) => Ok((body.clone(), *is_static)),
            _ => Err(HostError::MemberKindMismatch(MemberKind::Method)),
        }
    }
}

impl State {
    fn push(&mut self, def: MemberDef) -> usize {
        self.members.push(def);
        self.members.len() - 1
    }

    fn class(&mut self, name: &str) -> &mut FakeClass {
        self.classes.entry(name.to_owned()).or_default()
    }
}

impl HostRuntime for FakeHost {
    type Object = Arc<FakeObject>;
    type Class = Arc<str>;
    type Member = FakeMember;

    fn resolve_type(&self, name: &str) -> Result<Self::Class, HostError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.state().classes.contains_key(name) {
            Ok(Arc::from(name))
        } else {
            Err(HostError::TypeNotFound(name.to_owned()))
        }
    }

    fn resolve_member(
        &self,
        class: &Self::Class,
        class_name: &str,
        name: &str,
        signature: &str,
        kind: MemberKind,
    ) -> Result<Self::Member, HostError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        let found = state.classes.get(&**class).and_then(|c| match kind {
            MemberKind::Constructor => c.constructors.get(signature),
            MemberKind::Method | MemberKind::StaticMethod => {
                c.methods.get(&(name.to_owned(), signature.to_owned(), kind.is_static()))
            }
            MemberKind::Field | MemberKind::StaticField => c.fields.get(&(name.to_owned(), kind.is_static())),
        });
        found.map(|&index| FakeMember(index)).ok_or_else(|| HostError::MemberNotFound {
            class: class_name.to_owned(),
            name: name.to_owned(),
            signature: signature.to_owned(),
            kind,
        })
    }

    fn construct(
        &self,
        class: &Self::Class,
        ctor: Self::Member,
        args: &[FakeValue],
    ) -> Result<Option<Self::Object>, HostError> {
        let body = match self.state().members.get(ctor.0) {
            Some(MemberDef::Constructor(body)) => body.clone(),
            _ => return Err(HostError::MemberKindMismatch(MemberKind::Constructor)),
        };
        let object = Arc::new(FakeObject::new(class));
        body(&object, args).map_err(|e| self.thrown(format!("new {class}: {e}")))?;
        self.pin(object).map(Some)
    }

    fn invoke(
        &self,
        receiver: Receiver<'_, Self::Object, Self::Class>,
        method: Self::Member,
        ret: ValueKind,
        args: &[FakeValue],
    ) -> Result<FakeValue, HostError> {
        let (body, is_static) = self.method_body(method)?;
        let this = match (receiver, is_static) {
            (Receiver::Instance(object), false) => Some(object),
            (Receiver::Static(_), true) => None,
            _ => return Err(HostError::MemberKindMismatch(MemberKind::Method)),
        };
        let value = body(this, args).map_err(|e| self.thrown(e))?;
        match (ret, value) {
            (ValueKind::Void, _) => Ok(HostValue::Void),
            (_, HostValue::Object(Some(object))) => self.pin(object).map(|o| HostValue::Object(Some(o))),
            (_, value) => Ok(value),
        }
    }

    fn get_field(
        &self,
        receiver: Receiver<'_, Self::Object, Self::Class>,
        field: Self::Member,
        kind: ValueKind,
    ) -> Result<FakeValue, HostError> {
        let state = self.state();
        let value = match (state.members.get(field.0), receiver) {
            (Some(MemberDef::Field { name }), Receiver::Instance(object)) => object.get(name),
            (Some(MemberDef::StaticField { class, name }), Receiver::Static(_)) => state
                .statics
                .get(&(class.clone(), name.clone()))
                .cloned()
                .unwrap_or(HostValue::Void),
            _ => return Err(HostError::MemberKindMismatch(MemberKind::Field)),
        };
        Ok(match value {
            HostValue::Void => HostValue::zero(kind),
            value => value,
        })
    }

    fn set_field(
        &self,
        receiver: Receiver<'_, Self::Object, Self::Class>,
        field: Self::Member,
        value: FakeValue,
    ) -> Result<(), HostError> {
        let mut state = self.state();
        let key = match (state.members.get(field.0), receiver) {
            (Some(MemberDef::Field { name }), Receiver::Instance(object)) => {
                object.set(name, value);
                return Ok(());
            }
            (Some(MemberDef::StaticField { class, name }), Receiver::Static(_)) => (class.clone(), name.clone()),
            _ => return Err(HostError::MemberKindMismatch(MemberKind::Field)),
        };
        state.statics.insert(key, value);
        Ok(())
    }
}
