mod common;

#[cfg(test)]
mod tests {
    use super::common::wasm;
    use std::thread;
    use wasm_embed::{CompileError, Engine, EngineConfig, Imports, Store, Value};

    const ADD: &str = r#"
        (module
          (func (export "add") (param i64 i64) (result i64)
            (i64.add (local.get 0) (local.get 1))))
    "#;

    #[test]
    fn test_stores_on_threads_share_one_engine() {
        let engine = Engine::new(EngineConfig::default());
        let bytes = wasm(ADD);

        let handles: Vec<_> = (0..4i64)
            .map(|n| {
                let engine = engine.clone();
                let bytes = bytes.clone();
                thread::spawn(move || {
                    let mut store = Store::new(&engine);
                    let instance = store.instantiate_bytes(&bytes, Imports::new()).unwrap();
                    let add = instance.exported_func(&store, "add").unwrap();
                    let add = add.typed::<(i64, i64), i64>(&store).unwrap();
                    add.call(&mut store, (n, 100)).unwrap()
                })
            })
            .collect();

        let mut results: Vec<i64> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
        results.sort();
        assert_eq!(results, vec![100, 101, 102, 103]);
        assert_eq!(engine.cached_modules(), 1);
    }

    #[test]
    fn test_module_reused_across_instances() {
        let mut store = Store::new(Engine::shared());
        let module = store.compile(&wasm(ADD)).unwrap();
        assert_eq!(module.exports().len(), 1);
        assert!(module.imports().is_empty());

        let a = store.instantiate(&module, Imports::new()).unwrap();
        let b = store.instantiate(&module, Imports::new()).unwrap();
        assert_ne!(a, b);
        let add = b.exported_func(&store, "add").unwrap();
        assert_eq!(add.call(&mut store, &[Value::I64(2), Value::I64(3)]).unwrap(), vec![Value::I64(5)]);
    }

    #[test]
    fn test_compile_errors() {
        let store = Store::new(&Engine::default());
        assert!(matches!(store.compile(b"\0asm"), Err(CompileError::UnexpectedEof { .. })));
        assert!(matches!(
            store.compile(b"\0wsm\x01\0\0\0"),
            Err(CompileError::Malformed { offset: 0, .. })
        ));

        // a body that leaves the wrong type on the stack
        let invalid = wasm(r#"(module (func (result i32) i64.const 1))"#);
        assert!(matches!(store.compile(&invalid), Err(CompileError::Invalid { .. })));
    }

    #[test]
    #[should_panic(expected = "instantiated in store")]
    fn test_module_from_another_store_panics() {
        let engine = Engine::default();
        let first = Store::new(&engine);
        let mut second = Store::new(&engine);
        let module = first.compile(&wasm(ADD)).unwrap();
        let _ = second.instantiate(&module, Imports::new());
    }
}
