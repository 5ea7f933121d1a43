//! The interpreter
//!
//! Function bodies are executed straight from their structured form. Each
//! block, loop and if recurses into its body and reports how it ended with a
//! [`BlockEnd`]; a branch unwinds the operand stack to the target label's
//! height when the label is reached. Guest calls recurse through
//! [`Executor::call`]. Every active call and every entered block, loop or if
//! counts against the engine's `max_call_depth`, which bounds native stack
//! use whatever the shape of the guest code.

use std::sync::Arc;

use tracing::trace;

use super::func::{Func, FuncKind};
use super::instance::{Instance, Links};
use super::memory::Memory;
use super::ops;
use super::stack::Stack;
use super::store::Store;
use super::trap::{Frame, Trap, TrapCode};
use super::value::Value;
use crate::parser::instruction::{BlockType, Instruction, InstructionKind};
use crate::parser::module::{Module as ParsedModule, ValueType};
use crate::parser::structured::{BlockEnd, StructuredInstruction};

/// Call `func` from the host with already type-checked arguments.
pub(crate) fn invoke(store: &mut Store, func: Func, args: &[Value]) -> Result<Vec<Value>, Trap> {
    trace!(func = ?func, args = args.len(), "invoking function");
    let arity = store[func.0].ty.return_types.len();
    let mut executor = Executor::new(store);
    executor.stack.push_all(args.iter().copied());
    executor.call(func)?;
    executor.stack.pop_n(arity)
}

/// A guest function activation.
#[derive(Debug, Clone, Copy)]
struct ActiveFrame {
    instance: Instance,
    func_index: u32,
    /// Start of the function's code entry.
    code_offset: usize,
    /// The instruction being executed.
    offset: usize,
}

/// What a plain instruction asks the enclosing block to do next.
enum Flow {
    Continue,
    Branch(u32),
    Return,
    Call(Func),
}

/// Per-activation state that stays fixed while a body runs.
struct Context<'f> {
    module: &'f ParsedModule,
    links: &'f Links,
}

impl Context<'_> {
    fn memory(&self) -> Result<Memory, Trap> {
        self.links
            .memory
            .ok_or_else(|| TrapCode::OutOfBoundsMemoryAccess.into())
    }

    fn func(&self, index: u32) -> Result<Func, Trap> {
        self.links
            .funcs
            .get(index as usize)
            .copied()
            .ok_or_else(|| Trap::new(format!("unknown function {index}")))
    }

    /// Number of (parameters, results) of a block.
    fn arity(&self, block_type: BlockType) -> (usize, usize) {
        match block_type {
            BlockType::Empty => (0, 0),
            BlockType::Value(_) => (0, 1),
            BlockType::FuncType(index) => self
                .module
                .types
                .get(index as usize)
                .map_or((0, 0), |ty| (ty.parameters.len(), ty.return_types.len())),
        }
    }
}

pub(crate) struct Executor<'s> {
    store: &'s mut Store,
    stack: Stack,
    frames: Vec<ActiveFrame>,
    /// Active guest calls plus entered blocks.
    depth: usize,
    max_call_depth: usize,
    max_value_stack: usize,
    budget: Option<u64>,
}

impl<'s> Executor<'s> {
    pub(crate) fn new(store: &'s mut Store) -> Self {
        let config = store.engine().config();
        let (max_call_depth, max_value_stack, budget) =
            (config.max_call_depth, config.max_value_stack, config.instruction_budget);
        Executor {
            store,
            stack: Stack::new(),
            frames: Vec::new(),
            depth: 0,
            max_call_depth,
            max_value_stack,
            budget,
        }
    }

    /// Call `func` with its arguments on top of the stack, leaving its
    /// results in their place.
    fn call(&mut self, func: Func) -> Result<(), Trap> {
        let target = match &self.store[func.0].kind {
            FuncKind::Wasm { instance, func_index } => Some((*instance, *func_index)),
            FuncKind::Host(_) => None,
        };
        match target {
            Some((instance, func_index)) => self.call_wasm(instance, func_index),
            None => self.call_host(func),
        }
    }

    fn call_host(&mut self, func: Func) -> Result<(), Trap> {
        let (param_count, result_types) = {
            let ty = &self.store[func.0].ty;
            (ty.parameters.len(), ty.return_types.clone())
        };
        let args = self.stack.pop_n(param_count)?;
        let results = match &mut self.store[func.0].kind {
            FuncKind::Host(callable) => callable.call(&args)?,
            FuncKind::Wasm { .. } => unreachable!("guest functions are dispatched by call"),
        };
        if !matches_types(&results, &result_types) {
            return Err(TrapCode::HostSignatureMismatch.into());
        }
        self.stack.push_all(results);
        Ok(())
    }

    /// Take one level of nesting, trapping once the limit is reached.
    fn enter(&mut self) -> Result<(), Trap> {
        if self.depth >= self.max_call_depth {
            return Err(TrapCode::StackExhausted.into());
        }
        self.depth += 1;
        Ok(())
    }

    fn call_wasm(&mut self, instance: Instance, func_index: u32) -> Result<(), Trap> {
        self.enter().map_err(|trap| self.with_trace(trap))?;
        let result = self.run_function(instance, func_index);
        self.depth -= 1;
        result
    }

    fn run_function(&mut self, instance: Instance, func_index: u32) -> Result<(), Trap> {
        let entity = &self.store[instance.0];
        let compiled = entity.module.compiled().clone();
        let links = Arc::clone(&entity.links);
        let module = &compiled.parsed;

        let defined = func_index - module.imported_function_count();
        let (Some(body), Some(ty)) = (module.code.get(defined as usize), module.function_type(func_index)) else {
            return Err(Trap::new(format!("unknown function {func_index}")));
        };

        let mut locals = self.stack.pop_n(ty.parameters.len())?;
        locals.extend(body.locals.iter().map(|local| Value::default_for(*local)));
        let height = self.stack.depth();

        self.frames.push(ActiveFrame {
            instance,
            func_index,
            code_offset: body.offset,
            offset: body.offset,
        });
        let context = Context {
            module,
            links: &links,
        };
        let result = self
            .execute_block(&context, &mut locals, &body.body)
            .and_then(|_| self.stack.unwind(height, ty.return_types.len()))
            .map_err(|trap| self.with_trace(trap));
        self.frames.pop();
        result
    }

    /// Attach the active guest frames to a trap that has none yet.
    fn with_trace(&self, mut trap: Trap) -> Trap {
        if trap.trace.is_empty() {
            trap.trace = self
                .frames
                .iter()
                .rev()
                .map(|frame| Frame {
                    instance: frame.instance,
                    func_index: frame.func_index,
                    func_offset: frame.offset - frame.code_offset,
                    module_offset: frame.offset,
                })
                .collect();
        }
        trap
    }

    /// Account for one instruction about to run at `offset`.
    fn step(&mut self, offset: usize) -> Result<(), Trap> {
        if let Some(frame) = self.frames.last_mut() {
            frame.offset = offset;
        }
        if let Some(budget) = self.budget.as_mut() {
            if *budget == 0 {
                return Err(TrapCode::BudgetExhausted.into());
            }
            *budget -= 1;
        }
        if self.stack.depth() > self.max_value_stack {
            return Err(TrapCode::StackExhausted.into());
        }
        Ok(())
    }

    fn execute_block(
        &mut self,
        context: &Context,
        locals: &mut [Value],
        body: &[StructuredInstruction],
    ) -> Result<BlockEnd, Trap> {
        for instruction in body {
            self.step(instruction.offset())?;
            let end = match instruction {
                StructuredInstruction::Plain(inst) => match self.execute_plain(context, locals, inst)? {
                    Flow::Continue => BlockEnd::Normal,
                    Flow::Branch(depth) => BlockEnd::Branch(depth),
                    Flow::Return => BlockEnd::Return,
                    Flow::Call(func) => {
                        self.call(func)?;
                        BlockEnd::Normal
                    }
                },
                StructuredInstruction::Block { block_type, body, .. } => {
                    self.run_block(context, locals, *block_type, body)?
                }
                StructuredInstruction::Loop { block_type, body, .. } => {
                    self.run_loop(context, locals, *block_type, body)?
                }
                StructuredInstruction::If {
                    block_type,
                    then_branch,
                    else_branch,
                    ..
                } => {
                    let condition = self.stack.pop_i32()?;
                    let branch = if condition != 0 {
                        Some(then_branch.as_slice())
                    } else {
                        else_branch.as_deref()
                    };
                    match branch {
                        Some(branch) => self.run_block(context, locals, *block_type, branch)?,
                        None => BlockEnd::Normal,
                    }
                }
            };
            if end != BlockEnd::Normal {
                return Ok(end);
            }
        }
        Ok(BlockEnd::Normal)
    }

    /// Run a block or if arm. A branch to it lands after its end.
    fn run_block(
        &mut self,
        context: &Context,
        locals: &mut [Value],
        block_type: BlockType,
        body: &[StructuredInstruction],
    ) -> Result<BlockEnd, Trap> {
        let (params, results) = context.arity(block_type);
        let height = self.stack.depth().saturating_sub(params);
        self.enter()?;
        let end = self.execute_block(context, locals, body);
        self.depth -= 1;
        match end? {
            BlockEnd::Branch(0) => {
                self.stack.unwind(height, results)?;
                Ok(BlockEnd::Normal)
            }
            BlockEnd::Branch(depth) => Ok(BlockEnd::Branch(depth - 1)),
            end => Ok(end),
        }
    }

    /// Run a loop. A branch to it restarts the body with the loop's
    /// parameters.
    fn run_loop(
        &mut self,
        context: &Context,
        locals: &mut [Value],
        block_type: BlockType,
        body: &[StructuredInstruction],
    ) -> Result<BlockEnd, Trap> {
        let (params, _) = context.arity(block_type);
        let height = self.stack.depth().saturating_sub(params);
        self.enter()?;
        let end = self.iterate(context, locals, body, height, params);
        self.depth -= 1;
        end
    }

    fn iterate(
        &mut self,
        context: &Context,
        locals: &mut [Value],
        body: &[StructuredInstruction],
        height: usize,
        params: usize,
    ) -> Result<BlockEnd, Trap> {
        loop {
            match self.execute_block(context, locals, body)? {
                BlockEnd::Branch(0) => self.stack.unwind(height, params)?,
                BlockEnd::Branch(depth) => return Ok(BlockEnd::Branch(depth - 1)),
                end => return Ok(end),
            }
        }
    }

    #[inline(never)]
    fn execute_plain(&mut self, context: &Context, locals: &mut [Value], inst: &Instruction) -> Result<Flow, Trap> {
        use InstructionKind::*;
        match &inst.kind {
            Unreachable => return Err(TrapCode::Unreachable.into()),
            Nop | Block { .. } | Loop { .. } | If { .. } | Else | End => {}
            Br { label_idx } => return Ok(Flow::Branch(*label_idx)),
            BrIf { label_idx } => {
                if self.stack.pop_i32()? != 0 {
                    return Ok(Flow::Branch(*label_idx));
                }
            }
            BrTable { labels, default } => {
                let index = self.stack.pop_i32()? as u32 as usize;
                return Ok(Flow::Branch(labels.get(index).copied().unwrap_or(*default)));
            }
            Return => return Ok(Flow::Return),
            Call { func_idx } => return Ok(Flow::Call(context.func(*func_idx)?)),
            CallIndirect { type_idx, .. } => {
                let index = self.stack.pop_i32()? as u32;
                return Ok(Flow::Call(self.resolve_indirect(context, *type_idx, index)?));
            }

            RefNull { .. } => self.stack.push(Value::ExternRef(None)),
            RefIsNull => {
                let is_null = matches!(self.stack.pop_typed(ValueType::ExternRef)?, Value::ExternRef(None));
                self.stack.push(Value::I32(is_null as i32));
            }

            Drop => {
                self.stack.pop()?;
            }
            Select | SelectTyped { .. } => {
                let condition = self.stack.pop_i32()?;
                let second = self.stack.pop()?;
                let first = self.stack.pop()?;
                self.stack.push(if condition != 0 { first } else { second });
            }

            LocalGet { local_idx } => {
                let value = *local(locals, *local_idx)?;
                self.stack.push(value);
            }
            LocalSet { local_idx } => {
                let value = self.stack.pop()?;
                *local(locals, *local_idx)? = value;
            }
            LocalTee { local_idx } => {
                let value = self.stack.peek().copied().ok_or_else(|| Trap::new("value stack underflow"))?;
                *local(locals, *local_idx)? = value;
            }
            GlobalGet { global_idx } => {
                let global = global(context, *global_idx)?;
                self.stack.push(self.store[global.0].value);
            }
            GlobalSet { global_idx } => {
                let global = global(context, *global_idx)?;
                let value = self.stack.pop()?;
                self.store[global.0].value = value;
            }

            Load { op, memarg } => {
                let memory = context.memory()?;
                ops::memory::load(&mut self.stack, &self.store[memory.0].memory, *op, *memarg)?;
            }
            InstructionKind::Store { op, memarg } => {
                let memory = context.memory()?;
                ops::memory::store(&mut self.stack, &mut self.store[memory.0].memory, *op, *memarg)?;
            }
            MemorySize => {
                let memory = context.memory()?;
                ops::memory::size(&mut self.stack, &self.store[memory.0].memory)?;
            }
            MemoryGrow => {
                let memory = context.memory()?;
                ops::memory::grow(&mut self.stack, &mut self.store[memory.0].memory)?;
            }

            I32Const { value } => self.stack.push(Value::I32(*value)),
            I64Const { value } => self.stack.push(Value::I64(*value)),
            F32Const { value } => self.stack.push(Value::F32(*value)),
            F64Const { value } => self.stack.push(Value::F64(*value)),
            Numeric(op) => ops::execute_numeric(&mut self.stack, *op)?,
        }
        Ok(Flow::Continue)
    }

    fn resolve_indirect(&self, context: &Context, type_idx: u32, index: u32) -> Result<Func, Trap> {
        let table = context
            .links
            .table
            .ok_or_else(|| Trap::from(TrapCode::OutOfBoundsTableAccess))?;
        let func = self.store[table.0].get(index)?;
        let expected = context.module.types.get(type_idx as usize);
        if expected != Some(&self.store[func.0].ty) {
            return Err(TrapCode::IndirectCallTypeMismatch.into());
        }
        Ok(func)
    }
}

fn local(locals: &mut [Value], index: u32) -> Result<&mut Value, Trap> {
    locals
        .get_mut(index as usize)
        .ok_or_else(|| Trap::new(format!("unknown local {index}")))
}

fn global(context: &Context, index: u32) -> Result<super::global::Global, Trap> {
    context
        .links
        .globals
        .get(index as usize)
        .copied()
        .ok_or_else(|| Trap::new(format!("unknown global {index}")))
}

fn matches_types(values: &[Value], types: &[ValueType]) -> bool {
    values.len() == types.len() && values.iter().zip(types).all(|(value, ty)| value.ty() == *ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::runtime::engine::Engine;
    use crate::runtime::imports::Imports;
    use rstest::rstest;

    fn instantiate(store: &mut Store, source: &str) -> Instance {
        let wasm = wat::parse_str(source).unwrap();
        store.instantiate_bytes(&wasm, Imports::new()).unwrap()
    }

    fn call(store: &mut Store, instance: Instance, name: &str, args: &[Value]) -> Result<Vec<Value>, Trap> {
        let func = instance.exported_func(store, name).unwrap();
        invoke(store, func, args)
    }

    const CONTROL: &str = r#"
        (module
          (func (export "classify") (param i32) (result i32)
            (block $default
              (block $two
                (block $one
                  (block $zero
                    (br_table $zero $one $two $default (local.get 0)))
                  (return (i32.const 100)))
                (return (i32.const 101)))
              (return (i32.const 102)))
            (i32.const -1))

          (func (export "sum_to") (param $n i32) (result i64)
            (local $acc i64)
            (block $done
              (loop $next
                (br_if $done (i32.eqz (local.get $n)))
                (local.set $acc (i64.add (local.get $acc) (i64.extend_i32_u (local.get $n))))
                (local.set $n (i32.sub (local.get $n) (i32.const 1)))
                (br $next)))
            (local.get $acc))

          (func (export "pick") (param i32) (result f64)
            (if (result f64) (local.get 0)
              (then (f64.const 1.5))
              (else (f64.const -2.5))))

          (func (export "countdown") (param i32) (result i32)
            (local.get 0)
            (loop (param i32) (result i32)
              (i32.sub (i32.const 1))
              (local.tee 0)
              (br_if 0 (local.get 0))))

          (func (export "fib") (param i32) (result i32)
            (if (result i32) (i32.lt_u (local.get 0) (i32.const 2))
              (then (local.get 0))
              (else
                (i32.add
                  (call 4 (i32.sub (local.get 0) (i32.const 1)))
                  (call 4 (i32.sub (local.get 0) (i32.const 2))))))))
    "#;

    #[rstest]
    #[case("classify", vec![Value::I32(0)], vec![Value::I32(100)])]
    #[case("classify", vec![Value::I32(2)], vec![Value::I32(102)])]
    #[case("classify", vec![Value::I32(-7)], vec![Value::I32(-1)])]
    #[case("sum_to", vec![Value::I32(100)], vec![Value::I64(5050)])]
    #[case("pick", vec![Value::I32(1)], vec![Value::F64(1.5)])]
    #[case("pick", vec![Value::I32(0)], vec![Value::F64(-2.5)])]
    #[case("countdown", vec![Value::I32(5)], vec![Value::I32(0)])]
    #[case("fib", vec![Value::I32(15)], vec![Value::I32(610)])]
    fn test_control_flow(#[case] name: &str, #[case] args: Vec<Value>, #[case] expected: Vec<Value>) {
        let mut store = Store::new(&Engine::default());
        let instance = instantiate(&mut store, CONTROL);
        assert_eq!(call(&mut store, instance, name, &args).unwrap(), expected);
    }

    #[test]
    fn test_branch_discards_operands_above_label() {
        let mut store = Store::new(&Engine::default());
        let instance = instantiate(
            &mut store,
            r#"(module
                (func (export "f") (result i32)
                  (i32.const 7)
                  (block (result i32)
                    (i32.const 1)
                    (i32.const 2)
                    (br 0 (i32.const 3)))
                  (i32.add)))"#,
        );
        assert_eq!(call(&mut store, instance, "f", &[]).unwrap(), vec![Value::I32(10)]);
    }

    #[test]
    fn test_call_indirect() {
        let mut store = Store::new(&Engine::default());
        let instance = instantiate(
            &mut store,
            r#"(module
                (type $unary (func (param i32) (result i32)))
                (table 3 funcref)
                (elem (i32.const 0) $double $nullary)
                (func $double (type $unary) (i32.mul (local.get 0) (i32.const 2)))
                (func $nullary (result i32) (i32.const 0))
                (func (export "dispatch") (param i32 i32) (result i32)
                  (call_indirect (type $unary) (local.get 1) (local.get 0))))"#,
        );

        let dispatch = |store: &mut Store, slot: i32| {
            call(store, instance, "dispatch", &[Value::I32(slot), Value::I32(21)])
        };
        assert_eq!(dispatch(&mut store, 0).unwrap(), vec![Value::I32(42)]);
        assert_eq!(
            dispatch(&mut store, 1).unwrap_err().code(),
            Some(TrapCode::IndirectCallTypeMismatch)
        );
        assert_eq!(
            dispatch(&mut store, 2).unwrap_err().code(),
            Some(TrapCode::UninitializedElement)
        );
        assert_eq!(
            dispatch(&mut store, 3).unwrap_err().code(),
            Some(TrapCode::OutOfBoundsTableAccess)
        );
    }

    #[test]
    fn test_references_and_select() {
        let mut store = Store::new(&Engine::default());
        let instance = instantiate(
            &mut store,
            r#"(module
                (func (export "is_null") (result i32) (ref.is_null (ref.null extern)))
                (func (export "max") (param i64 i64) (result i64)
                  (select (local.get 0) (local.get 1) (i64.gt_s (local.get 0) (local.get 1)))))"#,
        );
        assert_eq!(call(&mut store, instance, "is_null", &[]).unwrap(), vec![Value::I32(1)]);
        assert_eq!(
            call(&mut store, instance, "max", &[Value::I64(-3), Value::I64(9)]).unwrap(),
            vec![Value::I64(9)]
        );
    }

    #[test]
    fn test_call_depth_limit() {
        let engine = Engine::new(EngineConfig::new().with_max_call_depth(50));
        let mut store = Store::new(&engine);
        let instance = instantiate(&mut store, r#"(module (func $f (export "f") (call $f)))"#);
        let trap = call(&mut store, instance, "f", &[]).unwrap_err();
        assert_eq!(trap.code(), Some(TrapCode::StackExhausted));
        assert_eq!(trap.trace().len(), 50);
    }

    #[test]
    fn test_instruction_budget_is_per_call() {
        let engine = Engine::new(EngineConfig::new().with_instruction_budget(Some(1_000)));
        let mut store = Store::new(&engine);
        let instance = instantiate(
            &mut store,
            r#"(module
                (func (export "spin") (loop (br 0)))
                (func (export "short") (result i32) (i32.const 1)))"#,
        );
        let trap = call(&mut store, instance, "spin", &[]).unwrap_err();
        assert_eq!(trap.code(), Some(TrapCode::BudgetExhausted));
        assert_eq!(call(&mut store, instance, "short", &[]).unwrap(), vec![Value::I32(1)]);
    }

    #[test]
    fn test_trap_records_offsets() {
        let wasm = wat::parse_str(r#"(module (func (export "f") nop unreachable))"#).unwrap();
        let mut store = Store::new(&Engine::default());
        let instance = store.instantiate_bytes(&wasm, Imports::new()).unwrap();
        let trap = call(&mut store, instance, "f", &[]).unwrap_err();

        let origin = trap.origin().unwrap();
        assert_eq!(origin.instance(), instance);
        assert_eq!(origin.func_index(), 0);
        // code entry: locals count, nop, unreachable
        assert_eq!(origin.func_offset(), 2);
        assert_eq!(wasm[origin.module_offset()], 0x00);
        assert_eq!(wasm[origin.module_offset() - 1], 0x01);
    }
}
