mod common;

#[cfg(test)]
mod tests {
    use super::common::{call, instantiate, store};
    use rstest::rstest;
    use wasm_embed::{Error, Global, Imports, LinkError, TypeError, Value, ValueType};

    const GLOBALS: &str = r#"
        (module
          (import "env" "counter" (global $counter (mut i32)))
          (import "env" "base" (global $base i64))
          (global $scale (export "scale") f32 (f32.const 2.5))
          (global $total (export "total") (mut i64) (global.get $base))
          (export "counter" (global $counter))
          (func (export "bump") (result i32)
            (global.set $counter (i32.add (global.get $counter) (i32.const 1)))
            (global.get $counter))
          (func (export "add_total") (param i64) (result i64)
            (global.set $total (i64.add (global.get $total) (local.get 0)))
            (global.get $total)))
    "#;

    fn imports(counter: Global) -> Imports {
        let mut imports = Imports::new();
        imports.define("env", "counter", counter).define("env", "base", 100i64);
        imports
    }

    #[test]
    fn test_imported_global_is_shared_with_host() {
        let mut store = store();
        let counter = store.make_global(Value::I32(41), true);
        let instance = instantiate(&mut store, GLOBALS, imports(counter));

        assert_eq!(call(&mut store, instance, "bump", &[]).unwrap(), vec![Value::I32(42)]);
        assert_eq!(counter.get(&store), Value::I32(42));

        counter.set(&mut store, Value::I32(0)).unwrap();
        assert_eq!(call(&mut store, instance, "bump", &[]).unwrap(), vec![Value::I32(1)]);

        // re-exported import is the same cell
        let exported = instance.exported_global(&store, "counter").unwrap();
        assert_eq!(exported, counter);
    }

    #[test]
    fn test_defined_globals() {
        let mut store = store();
        let counter = store.make_global(Value::I32(0), true);
        let instance = instantiate(&mut store, GLOBALS, imports(counter));

        let scale = instance.exported_global(&store, "scale").unwrap();
        assert_eq!(scale.get(&store), Value::F32(2.5));
        assert!(!scale.is_mutable(&store));
        assert!(matches!(
            scale.set(&mut store, Value::F32(1.0)),
            Err(Error::ImmutableGlobal(_))
        ));
        assert_eq!(scale.get(&store), Value::F32(2.5));

        let total = instance.exported_global(&store, "total").unwrap();
        assert_eq!(total.get(&store), Value::I64(100));
        call(&mut store, instance, "add_total", &[Value::I64(5)]).unwrap();
        assert_eq!(total.get(&store), Value::I64(105));
        total.set(&mut store, Value::I64(-1)).unwrap();
        assert_eq!(
            call(&mut store, instance, "add_total", &[Value::I64(1)]).unwrap(),
            vec![Value::I64(0)]
        );
    }

    #[rstest]
    #[case(Value::I32(i32::MIN))]
    #[case(Value::I32(-1))]
    #[case(Value::I32(i32::MAX))]
    fn test_mutable_write_then_read(#[case] value: Value) {
        let mut store = store();
        let global = Global::new(&mut store, Value::I32(0), true);
        global.set(&mut store, value).unwrap();
        assert_eq!(global.get(&store), value);
        assert!(matches!(
            global.set(&mut store, Value::F64(0.0)),
            Err(Error::Type(TypeError::Value { expected: ValueType::I32, .. }))
        ));
    }

    #[test]
    fn test_global_import_type_mismatch() {
        let mut store = store();
        let immutable = store.make_global(Value::I32(0), false);
        let err = store
            .instantiate_bytes(&super::common::wasm(GLOBALS), imports(immutable))
            .unwrap_err();
        match err {
            Error::Link(LinkError::SignatureMismatch { index, name, .. }) => {
                assert_eq!(index, 0);
                assert_eq!(name, "counter");
            }
            other => panic!("unexpected error: {other}"),
        }

        // a plain value only satisfies an immutable import
        let mut imports = Imports::new();
        imports.define("env", "counter", 1i32).define("env", "base", 0i64);
        let err = store
            .instantiate_bytes(&super::common::wasm(GLOBALS), imports)
            .unwrap_err();
        assert!(matches!(err, Error::Link(LinkError::SignatureMismatch { index: 0, .. })));
        assert_eq!(store.instance_count(), 0);
    }
}
