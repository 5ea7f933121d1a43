//! Common test utilities shared between integration tests

#![allow(dead_code)]

use wasm_embed::{Engine, EngineConfig, Imports, Instance, Store, Value};

/// Assemble WAT source, panicking with the assembler's message on failure.
pub fn wasm(source: &str) -> Vec<u8> {
    wat::parse_str(source).unwrap_or_else(|err| panic!("invalid test module: {err}"))
}

pub fn store() -> Store {
    Store::new(&Engine::default())
}

pub fn store_with(config: EngineConfig) -> Store {
    Store::new(&Engine::new(config))
}

fn leb(mut value: usize, bytes: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            bytes.push(byte);
            return;
        }
        bytes.push(byte | 0x80);
    }
}

/// A binary exporting `f`, whose body opens `depth` empty blocks. Encoded by
/// hand so the depth is not limited by the text assembler.
pub fn nested_blocks(depth: usize) -> Vec<u8> {
    let mut body = vec![0x00];
    for _ in 0..depth {
        body.extend([0x02, 0x40]);
    }
    body.extend(std::iter::repeat(0x0b).take(depth + 1));

    let mut code = vec![0x01];
    leb(body.len(), &mut code);
    code.extend(body);

    let mut bytes = vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];
    bytes.extend([0x01, 0x04, 0x01, 0x60, 0x00, 0x00]);
    bytes.extend([0x03, 0x02, 0x01, 0x00]);
    bytes.extend([0x07, 0x05, 0x01, 0x01, b'f', 0x00, 0x00]);
    bytes.push(0x0a);
    leb(code.len(), &mut bytes);
    bytes.extend(code);
    bytes
}

pub fn instantiate(store: &mut Store, source: &str, imports: Imports) -> Instance {
    store
        .instantiate_bytes(&wasm(source), imports)
        .unwrap_or_else(|err| panic!("instantiation failed: {err}"))
}

/// Call an export by name with untyped arguments.
pub fn call(store: &mut Store, instance: Instance, name: &str, args: &[Value]) -> wasm_embed::Result<Vec<Value>> {
    let func = instance.exported_func(store, name)?;
    func.call(store, args)
}
