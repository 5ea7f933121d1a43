mod common;

#[cfg(test)]
mod tests {
    use super::common::{call, instantiate, store};
    use std::sync::{Arc, Mutex};
    use wasm_embed::{Func, FunctionType, HostFunc, Imports, Trap, TrapCode, Value, ValueType};

    const CALLBACK: &str = r#"
        (module
          (import "env" "callback" (func $callback (param i32) (result i32 i32)))
          (func (export "run") (param i32) (result i32)
            (call $callback (local.get 0))
            (i32.sub)))
    "#;

    #[test]
    fn test_untyped_callback_with_captured_state() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let callback = HostFunc::new(
            FunctionType::new([ValueType::I32], [ValueType::I32, ValueType::I32]),
            move |args| {
                let x = args[0].as_i32().unwrap_or_default();
                captured.lock().unwrap().push(x);
                Ok(vec![Value::I32(x * 3), Value::I32(x)])
            },
        );

        let mut store = store();
        let mut imports = Imports::new();
        imports.define("env", "callback", callback);
        let instance = instantiate(&mut store, CALLBACK, imports);

        assert_eq!(call(&mut store, instance, "run", &[Value::I32(5)]).unwrap(), vec![Value::I32(10)]);
        assert_eq!(call(&mut store, instance, "run", &[Value::I32(7)]).unwrap(), vec![Value::I32(14)]);
        assert_eq!(*seen.lock().unwrap(), vec![5, 7]);
    }

    #[test]
    fn test_typed_callback_by_position() {
        let mut store = store();
        let imports: Imports = [HostFunc::wrap(|x: i32| (x + 1, 1))].into_iter().collect();
        let instance = instantiate(&mut store, CALLBACK, imports);

        let run = instance.exported_func(&store, "run").unwrap();
        let run = run.typed::<i32, i32>(&store).unwrap();
        assert_eq!(run.call(&mut store, 41).unwrap(), 41);
    }

    #[test]
    fn test_store_func_shared_between_instances() {
        let mut store = store();
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let callback = Func::wrap(&mut store, move |x: i32| {
            *counter.lock().unwrap() += 1;
            (x, 0)
        });

        let mut first = Imports::new();
        first.define("env", "callback", callback);
        let mut second = Imports::new();
        second.push(callback);
        let a = instantiate(&mut store, CALLBACK, first);
        let b = instantiate(&mut store, CALLBACK, second);

        call(&mut store, a, "run", &[Value::I32(1)]).unwrap();
        call(&mut store, b, "run", &[Value::I32(2)]).unwrap();
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn test_callback_abort_unwinds_guest() {
        let mut store = store();
        let mut imports = Imports::new();
        imports.define(
            "env",
            "callback",
            HostFunc::wrap(|_: i32| -> Result<(i32, i32), Trap> { Err(Trap::new("host says no")) }),
        );
        let instance = instantiate(&mut store, CALLBACK, imports);

        let err = call(&mut store, instance, "run", &[Value::I32(1)]).unwrap_err();
        let trap = err.as_trap().unwrap();
        assert_eq!(trap.message(), "host says no");
        assert_eq!(trap.code(), None);
        // the calling guest frame is the origin
        let origin = trap.origin().unwrap();
        assert_eq!(origin.instance(), instance);
        assert_eq!(origin.func_index(), 1);
        assert_eq!(trap.trace().len(), 1);
    }

    #[test]
    fn test_callback_with_wrong_results_traps() {
        let mut store = store();
        let mut imports = Imports::new();
        imports.define(
            "env",
            "callback",
            HostFunc::new(
                FunctionType::new([ValueType::I32], [ValueType::I32, ValueType::I32]),
                |_| Ok(vec![Value::I32(1)]),
            ),
        );
        let instance = instantiate(&mut store, CALLBACK, imports);

        let err = call(&mut store, instance, "run", &[Value::I32(1)]).unwrap_err();
        assert_eq!(
            err.as_trap().and_then(|trap| trap.code()),
            Some(TrapCode::HostSignatureMismatch)
        );
    }
}
