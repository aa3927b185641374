use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one memoized function.
///
/// Assigned once when the function is wrapped, so two memoized functions never
/// share entries even if they are called with identical arguments.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FuncId(u64);

impl FuncId {
    /// Allocate a fresh, process-wide unique identity.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// The key under which a memoized call is stored in a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    func: FuncId,
    args: Box<[ArgKey]>,
}

impl CacheKey {
    /// The function this key belongs to.
    pub fn func(&self) -> FuncId {
        self.func
    }

    /// The number of arguments the call was made with.
    pub fn arity(&self) -> usize {
        self.args.len()
    }
}

/// Derive the key of a call to `func` with the given arguments.
pub fn derive_key<A: Args + ?Sized>(func: FuncId, args: &A) -> CacheKey {
    CacheKey { func, args: args.keys().into_boxed_slice() }
}

/// The key of a single positional argument.
///
/// Primitives are keyed by value and shared allocations by address. There is
/// no structural comparison of anything else.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum ArgKey {
    Unit,
    None,
    Some(Box<ArgKey>),
    Bool(bool),
    Int(i128),
    Uint(u128),
    Float(u64),
    Char(char),
    Str(Arc<str>),
    Ref(Identity),
}

impl Debug for ArgKey {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Unit => f.pad("()"),
            Self::None => f.pad("None"),
            Self::Some(v) => f.debug_tuple("Some").field(v).finish(),
            Self::Bool(v) => v.fmt(f),
            Self::Int(v) => v.fmt(f),
            Self::Uint(v) => v.fmt(f),
            Self::Float(bits) => f64::from_bits(*bits).fmt(f),
            Self::Char(v) => v.fmt(f),
            Self::Str(v) => v.fmt(f),
            Self::Ref(v) => v.fmt(f),
        }
    }
}

/// The identity of a shared allocation.
///
/// Holds on to the allocation so that its address cannot be reused by another
/// value while the key is alive.
#[derive(Clone)]
pub struct Identity {
    addr: usize,
    _keep: Arc<dyn Any + Send + Sync>,
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl Debug for Identity {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "&{:#x}", self.addr)
    }
}

/// A value that can be passed to a memoized function.
///
/// Implemented by value for primitives, strings and options thereof, and by
/// identity for `Arc<T>`. Other types need to be wrapped in an `Arc`: two
/// separately built but equal values are then treated as different arguments.
pub trait Arg {
    /// The key of this argument.
    fn key(&self) -> ArgKey;
}

impl<T: Arg + ?Sized> Arg for &T {
    fn key(&self) -> ArgKey {
        T::key(self)
    }
}

impl<T: Arg + ?Sized> Arg for &mut T {
    fn key(&self) -> ArgKey {
        T::key(self)
    }
}

impl<T: Any + Send + Sync + ?Sized> Arg for Arc<T> {
    fn key(&self) -> ArgKey {
        ArgKey::Ref(Identity {
            addr: Arc::as_ptr(self).cast::<()>() as usize,
            _keep: Arc::new(Arc::clone(self)),
        })
    }
}

impl<T: Arg> Arg for Option<T> {
    fn key(&self) -> ArgKey {
        match self {
            Some(value) => ArgKey::Some(Box::new(value.key())),
            None => ArgKey::None,
        }
    }
}

impl Arg for () {
    fn key(&self) -> ArgKey {
        ArgKey::Unit
    }
}

impl Arg for bool {
    fn key(&self) -> ArgKey {
        ArgKey::Bool(*self)
    }
}

impl Arg for char {
    fn key(&self) -> ArgKey {
        ArgKey::Char(*self)
    }
}

impl Arg for str {
    fn key(&self) -> ArgKey {
        ArgKey::Str(self.into())
    }
}

impl Arg for String {
    fn key(&self) -> ArgKey {
        ArgKey::Str(self.as_str().into())
    }
}

impl Arg for f64 {
    fn key(&self) -> ArgKey {
        // NaN equals NaN and both zeros are the same argument.
        let bits = if self.is_nan() {
            f64::NAN.to_bits()
        } else if *self == 0.0 {
            0
        } else {
            self.to_bits()
        };
        ArgKey::Float(bits)
    }
}

impl Arg for f32 {
    fn key(&self) -> ArgKey {
        f64::from(*self).key()
    }
}

macro_rules! int_arg {
    ($variant:ident: $wide:ty => $($ty:ty),*) => {
        $(impl Arg for $ty {
            fn key(&self) -> ArgKey {
                ArgKey::$variant(*self as $wide)
            }
        })*
    };
}

int_arg! { Int: i128 => i8, i16, i32, i64, i128, isize }
int_arg! { Uint: u128 => u8, u16, u32, u64, u128, usize }

/// The positional argument list of a memoized call.
///
/// Implemented for tuples up to length twelve.
pub trait Args {
    /// The keys of all arguments, in order.
    fn keys(&self) -> Vec<ArgKey>;
}

macro_rules! args_key {
    ($($param:tt $idx:tt),*) => {
        impl<$($param: Arg),*> Args for ($($param,)*) {
            fn keys(&self) -> Vec<ArgKey> {
                vec![$(self.$idx.key()),*]
            }
        }
    };
}

args_key! {}
args_key! { A 0 }
args_key! { A 0, B 1 }
args_key! { A 0, B 1, C 2 }
args_key! { A 0, B 1, C 2, D 3 }
args_key! { A 0, B 1, C 2, D 3, E 4 }
args_key! { A 0, B 1, C 2, D 3, E 4, F 5 }
args_key! { A 0, B 1, C 2, D 3, E 4, F 5, G 6 }
args_key! { A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7 }
args_key! { A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8 }
args_key! { A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9 }
args_key! { A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9, K 10 }
args_key! { A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9, K 10, L 11 }
