mod common;

#[cfg(test)]
mod tests {
    use super::common::{call, instantiate, store, wasm};
    use wasm_embed::{
        Error, ExternKind, HostFunc, Imports, LinkError, MemoryLimits, Namespace, NotFound, Value,
    };

    const IMPORTS: &str = r#"
        (module
          (import "env" "add" (func $add (param i32 i32) (result i32)))
          (import "env" "offset" (global $offset i32))
          (import "env" "memory" (memory 1 2))
          (func (export "run") (param i32) (result i32)
            (call $add (local.get 0) (global.get $offset)))
          (global (export "answer") i32 (i32.const 42)))
    "#;

    fn valid_imports(store: &mut wasm_embed::Store) -> Imports {
        let memory = store.make_memory(MemoryLimits::new(1, Some(2))).unwrap();
        let mut env = Namespace::new();
        env.define("add", HostFunc::wrap(|a: i32, b: i32| a + b))
            .define("offset", 10)
            .define("memory", memory);
        let mut imports = Imports::new();
        imports.namespace("env", env);
        imports
    }

    #[test]
    fn test_exports_follow_declaration_order() {
        let mut store = store();
        let imports = valid_imports(&mut store);
        let instance = instantiate(&mut store, IMPORTS, imports);

        let module = instance.module(&store).clone();
        let kinds: Vec<ExternKind> = module.exports().iter().map(|export| export.ty.kind()).collect();
        let exported: Vec<(String, ExternKind)> = instance
            .exports(&store)
            .map(|(name, external)| (name.to_string(), external.kind()))
            .collect();
        assert_eq!(exported.len(), kinds.len());
        assert_eq!(
            exported,
            vec![("run".to_string(), ExternKind::Func), ("answer".to_string(), ExternKind::Global)]
        );

        assert_eq!(call(&mut store, instance, "run", &[Value::I32(5)]).unwrap(), vec![Value::I32(15)]);

        // lookup by position
        assert!(instance.exported_func(&store, 0usize).is_ok());
        assert_eq!(instance.exported_global(&store, 1usize).unwrap().get(&store), Value::I32(42));
        assert_eq!(
            instance.exported_func(&store, 1usize).unwrap_err(),
            NotFound {
                kind: ExternKind::Func,
                key: "index 1".to_string()
            }
        );
        assert!(instance.exported_memory(&store, "memory").is_err());
    }

    #[test]
    fn test_missing_import() {
        let mut store = store();
        let mut imports = Imports::new();
        imports.define("env", "add", HostFunc::wrap(|a: i32, b: i32| a + b));
        let err = store.instantiate_bytes(&wasm(IMPORTS), imports).unwrap_err();
        match err {
            Error::Link(LinkError::MissingImport { index, module, name }) => {
                assert_eq!((index, module.as_str(), name.as_str()), (1, "env", "offset"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_kind_mismatch() {
        let mut store = store();
        let mut imports = valid_imports(&mut store);
        imports.define("env", "add", 5i32);
        let err = store.instantiate_bytes(&wasm(IMPORTS), imports).unwrap_err();
        assert!(matches!(
            err,
            Error::Link(LinkError::KindMismatch {
                index: 0,
                expected: ExternKind::Func,
                found: ExternKind::Global,
                ..
            })
        ));
    }

    #[test]
    fn test_function_signature_mismatch() {
        let mut store = store();
        let mut imports = valid_imports(&mut store);
        imports.define("env", "add", HostFunc::wrap(|a: i64, b: i64| a + b));
        let err = store.instantiate_bytes(&wasm(IMPORTS), imports).unwrap_err();
        match err {
            Error::Link(LinkError::SignatureMismatch { index, expected, found, .. }) => {
                assert_eq!(index, 0);
                assert_eq!(expected, "func (i32, i32) -> i32");
                assert_eq!(found, "(i64, i64) -> i64");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_memory_limits_mismatch() {
        let mut store = store();
        let mut imports = valid_imports(&mut store);
        let unbounded = store.make_memory(MemoryLimits::new(1, None)).unwrap();
        imports.define("env", "memory", unbounded);
        let err = store.instantiate_bytes(&wasm(IMPORTS), imports).unwrap_err();
        assert!(matches!(err, Error::Link(LinkError::SignatureMismatch { index: 2, .. })));
        assert_eq!(store.instance_count(), 0);
    }

    #[test]
    fn test_positional_fallback() {
        let mut store = store();
        let memory = store.make_memory(MemoryLimits::new(2, Some(2))).unwrap();
        let mut imports = Imports::new();
        imports
            .push(HostFunc::wrap(|a: i32, b: i32| a * b))
            .push(Value::I32(3))
            .push(memory);
        let instance = instantiate(&mut store, IMPORTS, imports);
        assert_eq!(call(&mut store, instance, "run", &[Value::I32(5)]).unwrap(), vec![Value::I32(15)]);
    }

    #[test]
    fn test_instance_exports_link_into_another_instance() {
        let mut store = store();
        let provider = instantiate(
            &mut store,
            r#"(module
                (global (export "g") (mut i32) (i32.const 1))
                (func (export "double") (param i32) (result i32) (i32.shl (local.get 0) (i32.const 1))))"#,
            Imports::new(),
        );
        let double = provider.exported_func(&store, "double").unwrap();
        let global = provider.exported_global(&store, "g").unwrap();

        let mut imports = Imports::new();
        imports.define("p", "double", double).define("p", "g", global);
        let consumer = instantiate(
            &mut store,
            r#"(module
                (import "p" "double" (func $double (param i32) (result i32)))
                (import "p" "g" (global $g (mut i32)))
                (func (export "step") (result i32)
                  (global.set $g (call $double (global.get $g)))
                  (global.get $g)))"#,
            imports,
        );

        call(&mut store, consumer, "step", &[]).unwrap();
        assert_eq!(call(&mut store, consumer, "step", &[]).unwrap(), vec![Value::I32(4)]);
        assert_eq!(global.get(&store), Value::I32(4));
    }
}
