//! Callable functions and the typed host/guest call boundary
//!
//! A [`Func`] is either a guest function defined by an instance or a host
//! function. Host functions come in two shapes: untyped closures over
//! `&[Value]`, and ordinary Rust closures whose signature is derived from
//! their argument and return types through [`WasmTy`] and [`WasmTypeList`].

use std::fmt;
use std::marker::PhantomData;

use super::executor;
use super::instance::Instance;
use super::store::{Store, Stored};
use super::trap::{Trap, TrapCode};
use super::value::Value;
use crate::error::{Error, TypeError};
use crate::parser::module::{FunctionType, ValueType};

type HostClosure = Box<dyn FnMut(&[Value]) -> Result<Vec<Value>, Trap> + Send>;

/// The code behind a host function.
pub enum HostCallable {
    Fn(fn(&[Value]) -> Result<Vec<Value>, Trap>),
    /// A closure that owns its captured environment.
    Closure(HostClosure),
}

impl HostCallable {
    pub(crate) fn call(&mut self, args: &[Value]) -> Result<Vec<Value>, Trap> {
        match self {
            HostCallable::Fn(f) => f(args),
            HostCallable::Closure(f) => f(args),
        }
    }
}

impl fmt::Debug for HostCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostCallable::Fn(_) => f.write_str("HostCallable::Fn"),
            HostCallable::Closure(_) => f.write_str("HostCallable::Closure"),
        }
    }
}

/// A host function not yet bound to a store.
///
/// Supplied as an import, it is moved into the instance it binds to and
/// released with it.
#[derive(Debug)]
pub struct HostFunc {
    pub(crate) ty: FunctionType,
    pub(crate) callable: HostCallable,
}

impl HostFunc {
    pub fn new<F>(ty: FunctionType, f: F) -> HostFunc
    where
        F: FnMut(&[Value]) -> Result<Vec<Value>, Trap> + Send + 'static,
    {
        HostFunc {
            ty,
            callable: HostCallable::Closure(Box::new(f)),
        }
    }

    pub fn from_fn(ty: FunctionType, f: fn(&[Value]) -> Result<Vec<Value>, Trap>) -> HostFunc {
        HostFunc {
            ty,
            callable: HostCallable::Fn(f),
        }
    }

    /// Wrap a Rust closure, deriving the signature from its types.
    ///
    /// ```
    /// use wasm_embed::{HostFunc, ValueType};
    ///
    /// let add = HostFunc::wrap(|a: i32, b: i32| a.wrapping_add(b));
    /// assert_eq!(add.ty().parameters, vec![ValueType::I32, ValueType::I32]);
    /// assert_eq!(add.ty().return_types, vec![ValueType::I32]);
    /// ```
    pub fn wrap<Params, Results>(f: impl IntoHostFunc<Params, Results>) -> HostFunc {
        f.into_host_func()
    }

    pub fn ty(&self) -> &FunctionType {
        &self.ty
    }
}

pub(crate) enum FuncKind {
    Wasm { instance: Instance, func_index: u32 },
    Host(HostCallable),
}

pub(crate) struct FuncEntity {
    pub(crate) ty: FunctionType,
    pub(crate) kind: FuncKind,
    /// The instance that defined or adopted the function.
    pub(crate) owner: Option<Instance>,
}

/// A handle to a function in a [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Func(pub(crate) Stored<FuncEntity>);

impl Func {
    /// Create a standalone host function from an untyped closure.
    pub fn new<F>(store: &mut Store, ty: FunctionType, f: F) -> Func
    where
        F: FnMut(&[Value]) -> Result<Vec<Value>, Trap> + Send + 'static,
    {
        Func::from_host(store, HostFunc::new(ty, f))
    }

    /// Create a standalone host function from a typed closure.
    pub fn wrap<Params, Results>(store: &mut Store, f: impl IntoHostFunc<Params, Results>) -> Func {
        Func::from_host(store, f.into_host_func())
    }

    pub fn from_host(store: &mut Store, host: HostFunc) -> Func {
        Func(store.alloc(FuncEntity {
            ty: host.ty,
            kind: FuncKind::Host(host.callable),
            owner: None,
        }))
    }

    pub fn ty(&self, store: &Store) -> FunctionType {
        store[self.0].ty.clone()
    }

    /// Call with dynamically typed arguments.
    ///
    /// Argument count and kinds are checked before anything runs.
    pub fn call(&self, store: &mut Store, args: &[Value]) -> Result<Vec<Value>, Error> {
        let ty = &store[self.0].ty;
        if args.len() != ty.parameters.len() {
            return Err(TypeError::ArgumentCount {
                expected: ty.parameters.len(),
                actual: args.len(),
            }
            .into());
        }
        for (index, (arg, expected)) in args.iter().zip(&ty.parameters).enumerate() {
            if arg.ty() != *expected {
                return Err(TypeError::ArgumentType {
                    index,
                    expected: *expected,
                    actual: arg.ty(),
                }
                .into());
            }
        }
        Ok(executor::invoke(store, *self, args)?)
    }

    /// Bind a static signature, checked once here instead of on every call.
    pub fn typed<Params, Results>(&self, store: &Store) -> Result<TypedFunc<Params, Results>, TypeError>
    where
        Params: WasmTypeList,
        Results: WasmTypeList,
    {
        let expected = FunctionType::new(Params::types(), Results::types());
        let actual = &store[self.0].ty;
        if *actual != expected {
            return Err(TypeError::Signature {
                expected,
                actual: actual.clone(),
            });
        }
        Ok(TypedFunc {
            func: *self,
            _marker: PhantomData,
        })
    }
}

/// A [`Func`] whose signature was verified against `Params -> Results`.
pub struct TypedFunc<Params, Results> {
    func: Func,
    _marker: PhantomData<fn(Params) -> Results>,
}

impl<Params, Results> Clone for TypedFunc<Params, Results> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Params, Results> Copy for TypedFunc<Params, Results> {}

impl<Params, Results> TypedFunc<Params, Results>
where
    Params: WasmTypeList,
    Results: WasmTypeList,
{
    pub fn func(&self) -> Func {
        self.func
    }

    pub fn call(&self, store: &mut Store, params: Params) -> Result<Results, Trap> {
        let results = executor::invoke(store, self.func, &params.into_values())?;
        Results::from_values(&results).ok_or_else(|| TrapCode::HostSignatureMismatch.into())
    }
}

/// A Rust type with a direct WebAssembly value kind.
pub trait WasmTy: Sized + Send + 'static {
    const TYPE: ValueType;
    fn into_value(self) -> Value;
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! wasm_ty {
    ($($ty:ty => $variant:ident,)*) => {
        $(
            impl WasmTy for $ty {
                const TYPE: ValueType = ValueType::$variant;

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

wasm_ty! {
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
}

/// A parameter or result list: a single [`WasmTy`], `()`, or a tuple.
pub trait WasmTypeList: Sized {
    fn types() -> Vec<ValueType>;
    fn into_values(self) -> Vec<Value>;
    fn from_values(values: &[Value]) -> Option<Self>;
}

impl<T: WasmTy> WasmTypeList for T {
    fn types() -> Vec<ValueType> {
        vec![T::TYPE]
    }

    fn into_values(self) -> Vec<Value> {
        vec![self.into_value()]
    }

    fn from_values(values: &[Value]) -> Option<Self> {
        match values {
            [value] => T::from_value(*value),
            _ => None,
        }
    }
}

macro_rules! count {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + count!($($tail)*) };
}

macro_rules! type_list {
    ($($t:ident)*) => {
        #[allow(non_snake_case)]
        impl<$($t: WasmTy),*> WasmTypeList for ($($t,)*) {
            fn types() -> Vec<ValueType> {
                vec![$($t::TYPE),*]
            }

            fn into_values(self) -> Vec<Value> {
                let ($($t,)*) = self;
                vec![$($t.into_value()),*]
            }

            #[allow(unused_mut, unused_variables)]
            fn from_values(values: &[Value]) -> Option<Self> {
                if values.len() != count!($($t)*) {
                    return None;
                }
                let mut iter = values.iter().copied();
                Some(($($t::from_value(iter.next()?)?,)*))
            }
        }
    };
}

type_list!();
type_list!(A1 A2);
type_list!(A1 A2 A3);
type_list!(A1 A2 A3 A4);
type_list!(A1 A2 A3 A4 A5);
type_list!(A1 A2 A3 A4 A5 A6);

/// What a typed host closure may return.
pub trait HostReturn {
    fn types() -> Vec<ValueType>;
    fn into_results(self) -> Result<Vec<Value>, Trap>;
}

impl<T: WasmTypeList> HostReturn for T {
    fn types() -> Vec<ValueType> {
        T::types()
    }

    fn into_results(self) -> Result<Vec<Value>, Trap> {
        Ok(self.into_values())
    }
}

impl<T: WasmTypeList> HostReturn for Result<T, Trap> {
    fn types() -> Vec<ValueType> {
        T::types()
    }

    fn into_results(self) -> Result<Vec<Value>, Trap> {
        self.map(WasmTypeList::into_values)
    }
}

/// Closures convertible into a [`HostFunc`].
pub trait IntoHostFunc<Params, Results>: Send + 'static {
    fn into_host_func(self) -> HostFunc;
}

macro_rules! into_host_func {
    ($($t:ident)*) => {
        impl<F, $($t,)* R> IntoHostFunc<($($t,)*), R> for F
        where
            F: FnMut($($t),*) -> R + Send + 'static,
            $($t: WasmTy,)*
            R: HostReturn,
        {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn into_host_func(mut self) -> HostFunc {
                let ty = FunctionType::new(vec![$($t::TYPE),*], R::types());
                let callable = move |args: &[Value]| -> Result<Vec<Value>, Trap> {
                    let mut iter = args.iter().copied();
                    $(
                        let $t = iter
                            .next()
                            .and_then($t::from_value)
                            .ok_or_else(|| Trap::from(TrapCode::HostSignatureMismatch))?;
                    )*
                    self($($t),*).into_results()
                };
                HostFunc {
                    ty,
                    callable: HostCallable::Closure(Box::new(callable)),
                }
            }
        }
    };
}

into_host_func!();
into_host_func!(A1);
into_host_func!(A1 A2);
into_host_func!(A1 A2 A3);
into_host_func!(A1 A2 A3 A4);
into_host_func!(A1 A2 A3 A4 A5);
into_host_func!(A1 A2 A3 A4 A5 A6);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::engine::Engine;
    use rstest::rstest;

    #[test]
    fn test_wrap_derives_signature() {
        let unit = HostFunc::wrap(|| {});
        assert_eq!(unit.ty(), &FunctionType::new([], []));

        let pair = HostFunc::wrap(|x: i64| -> Result<(i64, f32), Trap> { Ok((x, 0.5)) });
        assert_eq!(
            pair.ty(),
            &FunctionType::new([ValueType::I64], [ValueType::I64, ValueType::F32])
        );
    }

    #[test]
    fn test_wrapped_closure_keeps_state() {
        let mut store = Store::new(&Engine::default());
        let mut total = 0;
        let accumulate = Func::wrap(&mut store, move |x: i32| {
            total += x;
            total
        });
        accumulate.call(&mut store, &[Value::I32(2)]).unwrap();
        let result = accumulate.call(&mut store, &[Value::I32(3)]).unwrap();
        assert_eq!(result, vec![Value::I32(5)]);
    }

    #[rstest]
    #[case(vec![], TypeError::ArgumentCount { expected: 2, actual: 0 })]
    #[case(
        vec![Value::I32(1), Value::F64(1.0)],
        TypeError::ArgumentType { index: 1, expected: ValueType::I32, actual: ValueType::F64 }
    )]
    fn test_call_checks_arguments(#[case] args: Vec<Value>, #[case] expected: TypeError) {
        let mut store = Store::new(&Engine::default());
        let add = Func::wrap(&mut store, |a: i32, b: i32| a + b);
        match add.call(&mut store, &args) {
            Err(Error::Type(err)) => assert_eq!(err, expected),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_typed_checks_signature_once() {
        let mut store = Store::new(&Engine::default());
        let add = Func::wrap(&mut store, |a: i32, b: i32| a + b);
        assert!(matches!(
            add.typed::<i32, i32>(&store),
            Err(TypeError::Signature { .. })
        ));
        let typed = add.typed::<(i32, i32), i32>(&store).unwrap();
        assert_eq!(typed.call(&mut store, (20, 22)).unwrap(), 42);
    }

    #[test]
    fn test_host_trap_and_bad_results() {
        let mut store = Store::new(&Engine::default());
        let abort = Func::wrap(&mut store, || -> Result<(), Trap> { Err(Trap::new("stop")) });
        let err = abort.call(&mut store, &[]).unwrap_err();
        let trap = err.as_trap().unwrap();
        assert_eq!(trap.message(), "stop");
        assert!(trap.trace().is_empty());

        let liar = Func::new(
            &mut store,
            FunctionType::new([], [ValueType::I32]),
            |_| Ok(vec![Value::F32(1.0)]),
        );
        let err = liar.call(&mut store, &[]).unwrap_err();
        assert_eq!(err.as_trap().unwrap().code(), Some(TrapCode::HostSignatureMismatch));
    }

    #[test]
    fn test_plain_fn_pointer() {
        fn answer(_: &[Value]) -> Result<Vec<Value>, Trap> {
            Ok(vec![Value::I64(42)])
        }
        let mut store = Store::new(&Engine::default());
        let func = Func::from_host(
            &mut store,
            HostFunc::from_fn(FunctionType::new([], [ValueType::I64]), answer),
        );
        assert_eq!(func.call(&mut store, &[]).unwrap(), vec![Value::I64(42)]);
    }
}
