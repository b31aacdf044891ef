//! Event exports, generated from the event table.
//!
//! For every event kind this emits:
//! - `register_*_handler(fn)`: called by program code to install (or, with
//!   null, clear) its handler
//! - `dispatch_*(args…)`: C entry used by native hosts
//! - `Java_com_redstone_DartBridge_*`: the JNI entry for the Java mod

use super::global::bridge;
use crate::events::{Event, for_each_event, kinds};

#[cfg(feature = "jni_exports")]
use jni::{
    JNIEnv,
    objects::JClass,
    sys::{JNI_FALSE, JNI_TRUE, jboolean, jdouble, jfloat, jint, jlong},
};

/// A JNI parameter type and its Rust counterpart.
#[cfg(feature = "jni_exports")]
trait JniArg {
    type Raw;
    fn from_raw(raw: Self::Raw) -> Self;
}

/// A JNI return type and its Rust counterpart.
#[cfg(feature = "jni_exports")]
trait JniRet {
    type Raw;
    fn into_raw(self) -> Self::Raw;
}

#[cfg(feature = "jni_exports")]
macro_rules! jni_identity {
    ($($ty:ty => $raw:ty),*) => {$(
        impl JniArg for $ty {
            type Raw = $raw;
            #[inline]
            fn from_raw(raw: $raw) -> Self {
                raw
            }
        }
    )*};
}

#[cfg(feature = "jni_exports")]
jni_identity!(i32 => jint, i64 => jlong, f32 => jfloat, f64 => jdouble);

#[cfg(feature = "jni_exports")]
impl JniArg for bool {
    type Raw = jboolean;
    #[inline]
    fn from_raw(raw: jboolean) -> Self {
        raw != JNI_FALSE
    }
}

#[cfg(feature = "jni_exports")]
impl JniRet for () {
    type Raw = ();
    #[inline]
    fn into_raw(self) {}
}

#[cfg(feature = "jni_exports")]
impl JniRet for i32 {
    type Raw = jint;
    #[inline]
    fn into_raw(self) -> jint {
        self
    }
}

#[cfg(feature = "jni_exports")]
impl JniRet for bool {
    type Raw = jboolean;
    #[inline]
    fn into_raw(self) -> jboolean {
        if self { JNI_TRUE } else { JNI_FALSE }
    }
}

macro_rules! define_event_exports {
    ($(
        $kind:ident, $slot:ident, $register:ident, $dispatch:ident, $jni:ident:
            fn($($arg:ident: $ty:ty),*) -> $out:ty = $default:expr;
    )*) => {$(
        #[unsafe(no_mangle)]
        pub extern "C" fn $register(handler: Option<<kinds::$kind as Event>::Foreign>) {
            bridge().callbacks().set_foreign::<kinds::$kind>(handler);
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn $dispatch($($arg: $ty),*) -> $out {
            bridge().dispatch::<kinds::$kind>(($($arg,)*))
        }

        #[cfg(feature = "jni_exports")]
        #[unsafe(no_mangle)]
        pub extern "system" fn $jni<'local>(
            _env: JNIEnv<'local>,
            _class: JClass<'local>,
            $($arg: <$ty as JniArg>::Raw,)*
        ) -> <$out as JniRet>::Raw {
            <$out as JniRet>::into_raw($dispatch($(<$ty as JniArg>::from_raw($arg)),*))
        }
    )*};
}

for_each_event!(define_event_exports);
