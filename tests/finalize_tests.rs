mod common;

#[cfg(test)]
mod tests {
    use super::common::{instantiate, store, wasm};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use wasm_embed::{Engine, Error, Imports, Store};

    const EMPTY: &str = "(module (func (export \"f\")))";

    #[test]
    fn test_finalizers_run_once_per_instance_on_store_drop() {
        let finalized = Arc::new(AtomicUsize::new(0));
        {
            let mut store = store();
            let module = store.compile(&wasm(EMPTY)).unwrap();
            for _ in 0..5 {
                let instance = store.instantiate(&module, Imports::new()).unwrap();
                let counter = Arc::clone(&finalized);
                instance
                    .set_host_info(&mut store, (), move |()| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
            }
            assert_eq!(finalized.load(Ordering::SeqCst), 0);
        }
        assert_eq!(finalized.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_dispose_runs_finalizer_with_payload() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut store = store();
        let instance = instantiate(&mut store, EMPTY, Imports::new());

        let sink = Arc::clone(&received);
        instance
            .set_host_info(&mut store, String::from("payload"), move |payload: String| {
                sink.lock().unwrap().push(payload);
            })
            .unwrap();
        assert_eq!(
            instance.host_info::<String>(&store).map(String::as_str),
            Some("payload")
        );
        assert!(instance.host_info::<u32>(&store).is_none());

        store.dispose_instance(instance).unwrap();
        assert!(!instance.is_valid(&store));
        assert_eq!(*received.lock().unwrap(), vec!["payload".to_string()]);

        drop(store);
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_host_info_set_once() {
        let mut store = store();
        let instance = instantiate(&mut store, EMPTY, Imports::new());
        instance.set_host_info(&mut store, 1u8, |_| {}).unwrap();
        assert!(matches!(
            instance.set_host_info(&mut store, 2u8, |_| {}),
            Err(Error::HostInfoAlreadySet)
        ));
        assert_eq!(instance.host_info::<u8>(&store), Some(&1));
    }

    #[test]
    fn test_finalizers_run_in_creation_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut store = Store::new(&Engine::default());
        let instances: Vec<_> = (0..3)
            .map(|_| instantiate(&mut store, EMPTY, Imports::new()))
            .collect();
        // attach in reverse so ordering does not follow attachment
        for (index, instance) in instances.iter().enumerate().rev() {
            let log = Arc::clone(&order);
            instance
                .set_host_info(&mut store, index, move |index: usize| log.lock().unwrap().push(index))
                .unwrap();
        }
        drop(store);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_disposed_slots_are_reused_without_aliasing() {
        let mut store = store();
        let first = instantiate(&mut store, EMPTY, Imports::new());
        let func = first.exported_func(&store, "f").unwrap();
        store.dispose_instance(first).unwrap();

        let second = instantiate(&mut store, EMPTY, Imports::new());
        assert!(second.is_valid(&store));
        assert!(!first.is_valid(&store));
        assert_ne!(first, second);
        assert_ne!(second.exported_func(&store, "f").unwrap(), func);
    }

    #[test]
    #[should_panic(expected = "used after it was released")]
    fn test_stale_handle_panics() {
        let mut store = store();
        let instance = instantiate(&mut store, EMPTY, Imports::new());
        let func = instance.exported_func(&store, "f").unwrap();
        store.dispose_instance(instance).unwrap();
        let _ = func.ty(&store);
    }

    #[test]
    fn test_dispose_refused_while_imported() {
        let mut store = store();
        let exporter = instantiate(
            &mut store,
            r#"(module (func (export "f")) (memory (export "m") 1))"#,
            Imports::new(),
        );
        let func = exporter.exported_func(&store, "f").unwrap();
        let mut imports = Imports::new();
        imports.define("dep", "f", func);
        let importer = instantiate(
            &mut store,
            r#"(module (import "dep" "f" (func)) (func (export "g") (call 0)))"#,
            imports,
        );

        assert!(matches!(
            store.dispose_instance(exporter),
            Err(Error::InstanceInUse { importers: 1 })
        ));
        store.dispose_instance(importer).unwrap();
        store.dispose_instance(exporter).unwrap();
        assert_eq!(store.instance_count(), 0);
    }
}
