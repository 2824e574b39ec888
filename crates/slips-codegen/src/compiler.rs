/// Cranelift code generation: parsed program → native code in a JIT module.
///
/// Every function literal is compiled into its own Cranelift function the
/// moment it is reached, with a signature picked by the type guesser. The
/// top-level expressions become the `main` entry function.
///
/// # Value representation
///
/// | Slips value | Cranelift | CL type |
/// |-------------|-----------|---------|
/// | int         | i64       | I64     |
/// | bool        | i8 (0/1)  | I8      |
/// | function    | *closure record | I64 (ptr) |
///
/// # Closure records
///
/// A function value points at `[code, capture0, capture1, ...]`, one 8-byte
/// word each; booleans are widened to a word. Every compiled function takes
/// its own record as a hidden first parameter and reads captures from it.
/// Records without captures are static module data. Records with captures
/// live in a stack slot of the frame that created them.
use std::collections::HashSet;
use std::rc::Rc;

use cranelift_codegen::ir::types;
use cranelift_codegen::ir::{
    AbiParam, Function, InstBuilder, MemFlags, Signature, StackSlot, StackSlotData,
    StackSlotKind, UserFuncName, Value,
};
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::JITModule;
use cranelift_module::{DataDescription, DataId, FuncId, Linkage, Module};
use log::{debug, trace};

use slips_lexer::Token;
use slips_parser::ast::{Expr, Literal, Params};
use slips_types::{guess_signature, FuncType, ReprType};

use crate::env::{Binding, Callee, EnvId, Environments, Kind};
use crate::error::CompileError;
use crate::jit::{self, JitProgram};
use crate::CompileOptions;

type CompileResult<T> = Result<T, CompileError>;

// ─── Cranelift type helpers ────────────────────────────────────────────

/// The pointer type on the target (always 64-bit for now).
const PTR: types::Type = types::I64;

/// Size of a stack-slot local and of a closure-record word.
const WORD: u32 = 8;

/// Operator of the indirect-call form `(call f args...)`.
pub const INDIRECT_CALL: &str = "call";

/// Name of the entry function and of the top-level scope.
const ENTRY: &str = "main";

/// Map a `ReprType` to the Cranelift type it occupies. `None` for `Void`.
fn cl_type(ty: &ReprType) -> Option<types::Type> {
    match ty {
        ReprType::Int | ReprType::Func(_) => Some(types::I64),
        ReprType::Bool => Some(types::I8),
        ReprType::Void => None,
    }
}

/// Byte offset of capture `index` inside a closure record.
fn capture_offset(index: usize) -> i32 {
    (WORD as usize * (index + 1)) as i32
}

fn slot_data(size: u32) -> StackSlotData {
    StackSlotData::new(StackSlotKind::ExplicitSlot, size, 3)
}

// ─── Compiled values ──────────────────────────────────────────────────

/// What compiling one expression produced.
#[derive(Debug, Clone)]
enum Emitted {
    Int(Value),
    Bool(Value),
    /// Pointer to a closure record.
    Func { record: Value, callee: Rc<Callee> },
    /// A value that lives in a stack slot and has not been loaded yet.
    Slot { slot: StackSlot, kind: Kind },
    /// No value (empty body, void call).
    Unit,
}

impl Emitted {
    fn from_kind(kind: &Kind, value: Value) -> Self {
        match kind {
            Kind::Int => Emitted::Int(value),
            Kind::Bool => Emitted::Bool(value),
            Kind::Func(callee) => Emitted::Func {
                record: value,
                callee: callee.clone(),
            },
        }
    }

    fn kind(&self) -> Option<Kind> {
        match self {
            Emitted::Int(_) => Some(Kind::Int),
            Emitted::Bool(_) => Some(Kind::Bool),
            Emitted::Func { callee, .. } => Some(Kind::Func(callee.clone())),
            Emitted::Slot { kind, .. } => Some(kind.clone()),
            Emitted::Unit => None,
        }
    }

    /// The SSA value, for anything already loaded.
    fn raw(&self) -> Option<Value> {
        match self {
            Emitted::Int(v) | Emitted::Bool(v) => Some(*v),
            Emitted::Func { record, .. } => Some(*record),
            Emitted::Slot { .. } | Emitted::Unit => None,
        }
    }

    fn describe(&self) -> String {
        match self.kind() {
            Some(kind) => kind.repr().to_string(),
            None => "nothing".to_string(),
        }
    }
}

// ─── Compiler state ───────────────────────────────────────────────────

/// Module-wide compilation state.
pub struct Compiler {
    module: JITModule,
    options: CompileOptions,
    envs: Environments,
}

impl Compiler {
    fn new(options: CompileOptions) -> CompileResult<Self> {
        let module = jit::host_module(&options)?;
        Ok(Compiler {
            module,
            options,
            envs: Environments::new(),
        })
    }

    /// Signature of a compiled function: the closure record, then the
    /// parameters, then the return value unless it is `Void`.
    fn closure_signature(&self, ty: &FuncType) -> Signature {
        let mut sig = self.module.make_signature();
        sig.params.push(AbiParam::new(PTR));
        for param in &ty.params {
            if let Some(ct) = cl_type(param) {
                sig.params.push(AbiParam::new(ct));
            }
        }
        if let Some(ct) = cl_type(&ty.ret) {
            sig.returns.push(AbiParam::new(ct));
        }
        sig
    }

    fn declare_closure(&mut self, symbol: &str, ty: &FuncType) -> CompileResult<FuncId> {
        let sig = self.closure_signature(ty);
        Ok(self.module.declare_function(symbol, Linkage::Local, &sig)?)
    }

    /// A one-word closure record in module data holding only the code
    /// pointer of `func_id`.
    fn static_record(&mut self, func_id: FuncId, symbol: &str) -> CompileResult<DataId> {
        let data_id =
            self.module
                .declare_data(&format!("{}.record", symbol), Linkage::Local, false, false)?;
        let mut desc = DataDescription::new();
        desc.define_zeroinit(WORD as usize);
        desc.set_align(u64::from(WORD));
        let func_ref = self.module.declare_func_in_data(func_id, &mut desc);
        desc.write_function_addr(0, func_ref);
        self.module.define_data(data_id, &desc)?;
        Ok(data_id)
    }
}

/// Verify, optionally dump, and define a finished function body.
fn define_function(compiler: &mut Compiler, func_id: FuncId, func: Function) -> CompileResult<()> {
    if compiler.options.dump_ir {
        debug!("{}", func.display());
    }
    let mut ctx = Context::for_function(func);
    compiler.module.define_function(func_id, &mut ctx)?;
    Ok(())
}

// ─── Function-level codegen context ───────────────────────────────────

/// Per-function compilation state.
struct FuncCtx<'a> {
    compiler: &'a mut Compiler,
    builder: FunctionBuilder<'a>,
    /// Scope of the function being built.
    env: EnvId,
    /// The function's own closure record (absent in `main`).
    record: Option<Value>,
    /// Formal parameters, in declaration order.
    params: Vec<Value>,
}

/// Compile a parsed program into a runnable JIT program.
pub fn compile(program: &[Expr], options: &CompileOptions) -> CompileResult<JitProgram> {
    let mut compiler = Compiler::new(options.clone())?;
    let (entry, yields_int) = compile_main(&mut compiler, program)?;
    compiler.module.finalize_definitions()?;
    let code = compiler.module.get_finalized_function(entry);
    debug!(
        "finalized {} top-level expression(s), yields_int={}",
        program.len(),
        yields_int
    );
    Ok(JitProgram::new(compiler.module, code, yields_int))
}

/// Compile the top-level expressions into `main() -> i64`. Also reports
/// whether the returned integer is the program's result.
fn compile_main(compiler: &mut Compiler, program: &[Expr]) -> CompileResult<(FuncId, bool)> {
    let mut sig = compiler.module.make_signature();
    sig.returns.push(AbiParam::new(types::I64));
    let func_id = compiler
        .module
        .declare_function(ENTRY, Linkage::Export, &sig)?;

    let mut func = Function::with_name_signature(UserFuncName::user(0, func_id.as_u32()), sig);
    let mut func_builder_ctx = FunctionBuilderContext::new();
    let mut builder = FunctionBuilder::new(&mut func, &mut func_builder_ctx);

    let entry_block = builder.create_block();
    builder.switch_to_block(entry_block);
    builder.seal_block(entry_block);

    let env = compiler.envs.root(ENTRY);
    let mut func_ctx = FuncCtx {
        compiler,
        builder,
        env,
        record: None,
        params: Vec::new(),
    };

    let (ret_val, yields_int) = match compile_body(&mut func_ctx, program)? {
        Emitted::Int(v) => (v, true),
        Emitted::Bool(v) => (func_ctx.builder.ins().uextend(types::I64, v), true),
        other => {
            debug!("program ends in {}, not an integer", other.describe());
            (func_ctx.builder.ins().iconst(types::I64, 0), false)
        }
    };
    func_ctx.builder.ins().return_(&[ret_val]);
    func_ctx.builder.finalize();

    compiler.envs.release(env);
    debug!("compiled `{}`", ENTRY);
    define_function(compiler, func_id, func)?;
    Ok((func_id, yields_int))
}

/// Build the Cranelift body of a function literal whose scope `env` already
/// holds its parameter and capture bindings.
fn compile_function_body(
    compiler: &mut Compiler,
    func_id: FuncId,
    env: EnvId,
    ty: &FuncType,
    body: &[Expr],
) -> CompileResult<()> {
    let sig = compiler
        .module
        .declarations()
        .get_function_decl(func_id)
        .signature
        .clone();

    let mut func = Function::with_name_signature(UserFuncName::user(0, func_id.as_u32()), sig);
    let mut func_builder_ctx = FunctionBuilderContext::new();
    let mut builder = FunctionBuilder::new(&mut func, &mut func_builder_ctx);

    let entry_block = builder.create_block();
    builder.append_block_params_for_function_params(entry_block);
    builder.switch_to_block(entry_block);
    builder.seal_block(entry_block);

    let (record, params) = match builder.block_params(entry_block) {
        [record, params @ ..] => (Some(*record), params.to_vec()),
        [] => (None, Vec::new()),
    };

    let mut func_ctx = FuncCtx {
        compiler,
        builder,
        env,
        record,
        params,
    };

    let last = compile_body(&mut func_ctx, body)?;
    if let Emitted::Func { callee, .. } = &last {
        if callee.frame_local {
            return Err(CompileError::Unsupported(format!(
                "`{}` returns a closure whose captures live in its own frame",
                func_ctx.frame_name()
            )));
        }
    }
    let ret_val = func_ctx.coerce(last, &ty.ret, "return value")?;
    func_ctx.builder.ins().return_(ret_val.as_slice());
    func_ctx.builder.finalize();

    debug!("compiled `{}`: {}", compiler.envs.frame_name(env), ty);
    define_function(compiler, func_id, func)
}

// ─── FuncCtx helpers ──────────────────────────────────────────────────

impl<'a> FuncCtx<'a> {
    fn frame_name(&self) -> String {
        self.compiler.envs.frame_name(self.env).to_string()
    }

    /// Resolve `name` to a binding of the current scope. Names bound further
    /// out were not captured by this function and cannot be reached.
    fn resolve(&self, name: &str) -> CompileResult<Binding> {
        match self.compiler.envs.lookup(self.env, name) {
            Some((0, binding)) => Ok(binding.clone()),
            Some((depth, _)) => Err(outer_capture(name, depth)),
            None => Err(CompileError::UndefinedVariable(name.to_string())),
        }
    }

    /// Emit the load of a bound value.
    fn load_binding(&mut self, binding: &Binding) -> CompileResult<(Value, Kind)> {
        match binding {
            Binding::Defined { slot, kind } => {
                let value = self.builder.ins().stack_load(kind.clif_type(), *slot, 0);
                Ok((value, kind.clone()))
            }
            Binding::Parameter { index } => match self.params.get(*index) {
                Some(value) => Ok((*value, Kind::Int)),
                None => Err(CompileError::Unsupported(format!(
                    "parameter {} is not available in `{}`",
                    index,
                    self.frame_name()
                ))),
            },
            Binding::Capture { index, kind } => {
                let Some(record) = self.record else {
                    return Err(CompileError::Unsupported(format!(
                        "`{}` has no closure record to capture from",
                        self.frame_name()
                    )));
                };
                let word =
                    self.builder
                        .ins()
                        .load(types::I64, MemFlags::trusted(), record, capture_offset(*index));
                let value = match kind {
                    Kind::Bool => self.builder.ins().ireduce(types::I8, word),
                    Kind::Int | Kind::Func(_) => word,
                };
                Ok((value, kind.clone()))
            }
        }
    }

    /// Load a slot-backed value; anything else is returned as is.
    fn rvalue(&mut self, emitted: Emitted) -> Emitted {
        match emitted {
            Emitted::Slot { slot, kind } => {
                let value = self.builder.ins().stack_load(kind.clif_type(), slot, 0);
                Emitted::from_kind(&kind, value)
            }
            other => other,
        }
    }

    /// Convert `emitted` to a value of type `target`. A bool widens to an
    /// int; an int never narrows to a bool. Functions must match exactly.
    /// `None` for `Void`.
    fn coerce(
        &mut self,
        emitted: Emitted,
        target: &ReprType,
        what: &str,
    ) -> CompileResult<Option<Value>> {
        match (self.rvalue(emitted), target) {
            (_, ReprType::Void) => Ok(None),
            (Emitted::Int(v), ReprType::Int) | (Emitted::Bool(v), ReprType::Bool) => Ok(Some(v)),
            (Emitted::Bool(v), ReprType::Int) => {
                Ok(Some(self.builder.ins().uextend(types::I64, v)))
            }
            (Emitted::Func { record, callee }, ReprType::Func(ft)) if callee.ty == *ft => {
                Ok(Some(record))
            }
            (other, target) => Err(CompileError::TypeMismatch(format!(
                "{} is {}, expected {}",
                what,
                other.describe(),
                target
            ))),
        }
    }

    /// A bound value widened to one closure-record word.
    fn widen(&mut self, value: Value, kind: &Kind) -> Value {
        match kind {
            Kind::Bool => self.builder.ins().uextend(types::I64, value),
            Kind::Int | Kind::Func(_) => value,
        }
    }

    /// Build a closure record for `func_id` in a stack slot of this frame,
    /// copying the current values of `captures` into it.
    fn closure_record(
        &mut self,
        func_id: FuncId,
        captures: &[(String, Binding)],
    ) -> CompileResult<Value> {
        let size = WORD * (captures.len() as u32 + 1);
        let slot = self.builder.create_sized_stack_slot(slot_data(size));
        let func_ref = self
            .compiler
            .module
            .declare_func_in_func(func_id, self.builder.func);
        let code = self.builder.ins().func_addr(PTR, func_ref);
        self.builder.ins().stack_store(code, slot, 0);
        for (index, (_, binding)) in captures.iter().enumerate() {
            let (value, kind) = self.load_binding(binding)?;
            let word = self.widen(value, &kind);
            self.builder
                .ins()
                .stack_store(word, slot, capture_offset(index));
        }
        Ok(self.builder.ins().stack_addr(PTR, slot, 0))
    }
}

fn outer_capture(name: &str, depth: usize) -> CompileError {
    CompileError::Unsupported(format!(
        "`{}` is bound {} scopes out; only names of the directly enclosing function can be captured",
        name, depth
    ))
}

// ─── Body / expression compilation ────────────────────────────────────

/// Compile a sequence of expressions; the last one's value is the result.
fn compile_body(ctx: &mut FuncCtx, body: &[Expr]) -> CompileResult<Emitted> {
    let mut last = Emitted::Unit;
    for expr in body {
        last = compile_expr(ctx, expr)?;
    }
    Ok(ctx.rvalue(last))
}

/// Compile an expression and load it if it is slot-backed.
fn compile_value(ctx: &mut FuncCtx, expr: &Expr) -> CompileResult<Emitted> {
    let emitted = compile_expr(ctx, expr)?;
    Ok(ctx.rvalue(emitted))
}

fn compile_expr(ctx: &mut FuncCtx, expr: &Expr) -> CompileResult<Emitted> {
    match expr {
        Expr::Literal(lit) => compile_literal(ctx, lit),
        Expr::Variable(name) => {
            let binding = ctx.resolve(name)?;
            let (value, kind) = ctx.load_binding(&binding)?;
            Ok(Emitted::from_kind(&kind, value))
        }
        Expr::Add(lhs, rhs) => compile_add(ctx, lhs, rhs),
        Expr::Call { op, args } => compile_call(ctx, op, args),
        Expr::Define { name, value } => compile_define(ctx, name, value),
        Expr::If {
            condition,
            consequence,
            alternative,
        } => compile_if(ctx, condition, consequence, alternative),
        Expr::Function { name, params, body } => compile_function(ctx, name, params, body),
        Expr::Params(params) => Err(CompileError::Unsupported(format!(
            "parameter list `{}` outside a function",
            params
        ))),
        Expr::Error(msg) => Err(CompileError::ErrorNode(msg.clone())),
    }
}

fn compile_literal(ctx: &mut FuncCtx, lit: &Literal) -> CompileResult<Emitted> {
    match lit {
        Literal::Int(n) => Ok(Emitted::Int(ctx.builder.ins().iconst(types::I64, *n))),
        Literal::Bool(b) => Ok(Emitted::Bool(
            ctx.builder.ins().iconst(types::I8, i64::from(*b)),
        )),
        Literal::Str(s) => Err(CompileError::Unsupported(format!(
            "string literal {:?}",
            s
        ))),
    }
}

fn compile_add(ctx: &mut FuncCtx, lhs: &Expr, rhs: &Expr) -> CompileResult<Emitted> {
    let lhs_val = compile_value(ctx, lhs)?;
    let rhs_val = compile_value(ctx, rhs)?;
    match (lhs_val, rhs_val) {
        (Emitted::Int(a), Emitted::Int(b)) => Ok(Emitted::Int(ctx.builder.ins().iadd(a, b))),
        (a, b) => Err(CompileError::TypeMismatch(format!(
            "`+` needs two ints, got {} and {}",
            a.describe(),
            b.describe()
        ))),
    }
}

fn compile_define(ctx: &mut FuncCtx, name: &str, value: &Expr) -> CompileResult<Emitted> {
    let emitted = compile_value(ctx, value)?;
    let (raw, kind) = match (emitted.raw(), emitted.kind()) {
        (Some(raw), Some(kind)) => (raw, kind),
        _ => {
            return Err(CompileError::Unsupported(format!(
                "`{}` cannot be bound to {}",
                name,
                emitted.describe()
            )))
        }
    };
    let slot = ctx.builder.create_sized_stack_slot(slot_data(WORD));
    ctx.builder.ins().stack_store(raw, slot, 0);
    trace!("{}: def {}: {}", ctx.frame_name(), name, kind.repr());
    ctx.compiler.envs.define(
        ctx.env,
        name,
        Binding::Defined {
            slot,
            kind: kind.clone(),
        },
    );
    Ok(Emitted::Slot { slot, kind })
}

// ─── If ───────────────────────────────────────────────────────────────

fn compile_if(
    ctx: &mut FuncCtx,
    condition: &Expr,
    consequence: &Expr,
    alternative: &Expr,
) -> CompileResult<Emitted> {
    let cond_val = match compile_value(ctx, condition)? {
        Emitted::Int(v) | Emitted::Bool(v) => v,
        other => {
            return Err(CompileError::TypeMismatch(format!(
                "`if` condition must be a bool or an int, got {}",
                other.describe()
            )))
        }
    };

    let then_block = ctx.builder.create_block();
    let else_block = ctx.builder.create_block();
    let merge_block = ctx.builder.create_block();

    ctx.builder
        .ins()
        .brif(cond_val, then_block, &[], else_block, &[]);

    // Then branch: its kind decides the merge block parameter.
    ctx.builder.switch_to_block(then_block);
    ctx.builder.seal_block(then_block);
    let then_val = compile_value(ctx, consequence)?;
    let merge_kind = then_val.kind();
    if let Some(kind) = &merge_kind {
        ctx.builder.append_block_param(merge_block, kind.clif_type());
    }
    let then_args: Vec<Value> = then_val.raw().into_iter().collect();
    ctx.builder.ins().jump(merge_block, &then_args);

    // Else branch, coerced to the consequence's kind.
    ctx.builder.switch_to_block(else_block);
    ctx.builder.seal_block(else_block);
    let else_val = compile_value(ctx, alternative)?;
    let merge_kind = merge_kind.map(|kind| join_kinds(kind, &else_val));
    let target = merge_kind.as_ref().map_or(ReprType::Void, Kind::repr);
    let else_args: Vec<Value> = ctx
        .coerce(else_val, &target, "`if` alternative")?
        .into_iter()
        .collect();
    ctx.builder.ins().jump(merge_block, &else_args);

    ctx.builder.switch_to_block(merge_block);
    ctx.builder.seal_block(merge_block);
    match (&merge_kind, ctx.builder.block_params(merge_block).first()) {
        (Some(kind), Some(value)) => Ok(Emitted::from_kind(kind, *value)),
        _ => Ok(Emitted::Unit),
    }
}

/// Kind of an `if` whose branches produced `then_kind` and `else_val`.
/// Two function values share a `FuncId` only if both branches agree on it.
fn join_kinds(then_kind: Kind, else_val: &Emitted) -> Kind {
    if let (Kind::Func(a), Emitted::Func { callee: b, .. }) = (&then_kind, else_val) {
        return Kind::Func(Rc::new(Callee {
            ty: a.ty.clone(),
            id: if a.id == b.id { a.id } else { None },
            frame_local: a.frame_local || b.frame_local,
        }));
    }
    then_kind
}

// ─── Function calls ───────────────────────────────────────────────────

fn compile_call(ctx: &mut FuncCtx, op: &Token, args: &[Expr]) -> CompileResult<Emitted> {
    let name = match op {
        Token::Ident(name) => name,
        Token::LParen => {
            return Err(CompileError::Unsupported(
                "calling an anonymous function directly; bind it with `def` first".to_string(),
            ))
        }
        other => {
            return Err(CompileError::Unsupported(format!(
                "`{}` cannot be called",
                other
            )))
        }
    };

    // Named call: the operator is bound to a function value.
    let found = ctx
        .compiler
        .envs
        .lookup(ctx.env, name)
        .map(|(depth, binding)| (depth, binding.clone()));
    if let Some((0, binding)) = &found {
        if let Kind::Func(callee) = binding.kind() {
            let (record, _) = ctx.load_binding(binding)?;
            return emit_call(ctx, name, record, &callee, args, true);
        }
    }

    if name == INDIRECT_CALL {
        return compile_indirect_call(ctx, args);
    }

    match found {
        Some((0, binding)) => Err(CompileError::TypeMismatch(format!(
            "`{}` is {}, not a function",
            name,
            binding.kind().repr()
        ))),
        Some((depth, _)) => Err(outer_capture(name, depth)),
        None => Err(CompileError::UndefinedVariable(name.clone())),
    }
}

/// `(call f args...)`: the first argument evaluates to the function value.
fn compile_indirect_call(ctx: &mut FuncCtx, args: &[Expr]) -> CompileResult<Emitted> {
    let Some((target, rest)) = args.split_first() else {
        return Err(CompileError::Unsupported(format!(
            "`{}` needs a function to call",
            INDIRECT_CALL
        )));
    };
    match compile_value(ctx, target)? {
        Emitted::Func { record, callee } => {
            emit_call(ctx, &target.to_string(), record, &callee, rest, false)
        }
        other => Err(CompileError::TypeMismatch(format!(
            "`{}` target `{}` is {}, not a function",
            INDIRECT_CALL,
            target,
            other.describe()
        ))),
    }
}

/// Compile `args` against `callee`'s signature and emit the call. A direct
/// call is emitted only when `direct` is set and the callee is known.
fn emit_call(
    ctx: &mut FuncCtx,
    target: &str,
    record: Value,
    callee: &Callee,
    args: &[Expr],
    direct: bool,
) -> CompileResult<Emitted> {
    if args.len() != callee.ty.arity() {
        return Err(CompileError::TypeMismatch(format!(
            "`{}` takes {} argument(s), got {}",
            target,
            callee.ty.arity(),
            args.len()
        )));
    }

    let mut call_args = vec![record];
    for (arg, ty) in args.iter().zip(&callee.ty.params) {
        let value = compile_value(ctx, arg)?;
        let what = format!("argument `{}` to `{}`", arg, target);
        call_args.extend(ctx.coerce(value, ty, &what)?);
    }

    let inst = match callee.id.filter(|_| direct) {
        Some(func_id) => {
            let func_ref = ctx
                .compiler
                .module
                .declare_func_in_func(func_id, ctx.builder.func);
            ctx.builder.ins().call(func_ref, &call_args)
        }
        None => {
            let sig = ctx.compiler.closure_signature(&callee.ty);
            let sig_ref = ctx.builder.import_signature(sig);
            let code = ctx
                .builder
                .ins()
                .load(PTR, MemFlags::trusted(), record, 0);
            ctx.builder.ins().call_indirect(sig_ref, code, &call_args)
        }
    };

    let result = ctx.builder.inst_results(inst).first().copied();
    match (Kind::from_repr(&callee.ty.ret), result) {
        (Some(kind), Some(value)) => Ok(Emitted::from_kind(&kind, value)),
        _ => Ok(Emitted::Unit),
    }
}

// ─── Function literals ────────────────────────────────────────────────

fn compile_function(
    ctx: &mut FuncCtx,
    name: &str,
    params: &Params,
    body: &[Expr],
) -> CompileResult<Emitted> {
    let parent = ctx.env;
    let count = ctx.compiler.envs.next_count();
    let symbol = format!("{}_{}", name, count);
    let env = ctx.compiler.envs.child(parent, &symbol);

    for (index, param) in params.names.iter().enumerate() {
        ctx.compiler
            .envs
            .define(env, param, Binding::Parameter { index });
    }
    let captures = collect_captures(&ctx.compiler.envs, parent, params, body)?;
    for (index, (capture, binding)) in captures.iter().enumerate() {
        trace!("{}: captures `{}` as #{}", symbol, capture, index);
        ctx.compiler.envs.define(
            env,
            capture,
            Binding::Capture {
                index,
                kind: binding.kind().captured(),
            },
        );
    }

    let ty = guess_signature(params, body, &ctx.compiler.envs.view(env))?;
    let func_id = ctx.compiler.declare_closure(&symbol, &ty)?;
    compile_function_body(ctx.compiler, func_id, env, &ty, body)?;
    ctx.compiler.envs.release(env);

    let record = if captures.is_empty() {
        let data_id = ctx.compiler.static_record(func_id, &symbol)?;
        let global = ctx
            .compiler
            .module
            .declare_data_in_func(data_id, ctx.builder.func);
        ctx.builder.ins().global_value(PTR, global)
    } else {
        ctx.closure_record(func_id, &captures)?
    };

    Ok(Emitted::Func {
        record,
        callee: Rc::new(Callee {
            ty,
            id: Some(func_id),
            frame_local: !captures.is_empty(),
        }),
    })
}

// ─── Free name analysis for closure captures ──────────────────────────

/// Maximum expression nesting depth inside one function body.
const MAX_FREE_NAME_DEPTH: usize = 1000;

/// Free names of a function body that are bound directly in `parent`, with
/// their bindings there, in first-use order.
fn collect_captures(
    envs: &Environments,
    parent: EnvId,
    params: &Params,
    body: &[Expr],
) -> CompileResult<Vec<(String, Binding)>> {
    Ok(free_names(params, body)?
        .into_iter()
        .filter_map(|name| match envs.lookup(parent, &name) {
            Some((0, binding)) => {
                let binding = binding.clone();
                Some((name, binding))
            }
            _ => None,
        })
        .collect())
}

/// Names a function body reads before binding them itself, in first-use
/// order. Nested function literals are separate scopes and are not entered.
fn free_names(params: &Params, body: &[Expr]) -> CompileResult<Vec<String>> {
    let mut locals: HashSet<String> = params.names.iter().cloned().collect();
    let mut free = Vec::new();
    for expr in body {
        collect_free_names(expr, &mut locals, &mut free, 0)?;
    }
    Ok(free)
}

fn collect_free_names(
    expr: &Expr,
    locals: &mut HashSet<String>,
    free: &mut Vec<String>,
    depth: usize,
) -> CompileResult<()> {
    if depth >= MAX_FREE_NAME_DEPTH {
        return Err(CompileError::Unsupported(format!(
            "function body nested deeper than {} levels",
            MAX_FREE_NAME_DEPTH
        )));
    }
    let d = depth + 1;
    match expr {
        Expr::Variable(name) => note_free(name, locals, free),
        Expr::Call { op, args } => {
            if let Token::Ident(name) = op {
                note_free(name, locals, free);
            }
            for arg in args {
                collect_free_names(arg, locals, free, d)?;
            }
        }
        Expr::Add(lhs, rhs) => {
            collect_free_names(lhs, locals, free, d)?;
            collect_free_names(rhs, locals, free, d)?;
        }
        Expr::Define { name, value } => {
            // The value may read the outer binding before the local exists.
            collect_free_names(value, locals, free, d)?;
            locals.insert(name.clone());
        }
        Expr::If {
            condition,
            consequence,
            alternative,
        } => {
            collect_free_names(condition, locals, free, d)?;
            collect_free_names(consequence, locals, free, d)?;
            collect_free_names(alternative, locals, free, d)?;
        }
        Expr::Function { .. } | Expr::Literal(_) | Expr::Params(_) | Expr::Error(_) => {}
    }
    Ok(())
}

fn note_free(name: &str, locals: &HashSet<String>, free: &mut Vec<String>) {
    if !locals.contains(name) && !free.iter().any(|f| f == name) {
        free.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params(names: &[&str]) -> Params {
        Params {
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    #[test]
    fn test_free_names_skip_params() {
        let body = vec![Expr::add(Expr::var("a"), Expr::var("x"))];
        assert_eq!(free_names(&params(&["a"]), &body).unwrap(), vec!["x".to_string()]);
    }

    #[test]
    fn test_free_names_include_call_operator() {
        let body = vec![Expr::call("f", vec![Expr::var("y"), Expr::var("f")])];
        assert_eq!(
            free_names(&params(&[]), &body).unwrap(),
            vec!["f".to_string(), "y".to_string()]
        );
    }

    #[test]
    fn test_free_names_stop_at_nested_function() {
        let inner = Expr::function("fn", &["b"], vec![Expr::add(Expr::var("b"), Expr::var("x"))]);
        let body = vec![Expr::define("g", inner), Expr::call("g", vec![Expr::var("a")])];
        assert_eq!(free_names(&params(&["a"]), &body).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_free_names_define_binds_after_value() {
        let body = vec![
            Expr::define("x", Expr::add(Expr::var("x"), Expr::int(1))),
            Expr::var("x"),
        ];
        assert_eq!(free_names(&params(&[]), &body).unwrap(), vec!["x".to_string()]);
    }

    #[test]
    fn test_free_names_through_if() {
        let body = vec![Expr::if_(Expr::var("c"), Expr::var("t"), Expr::var("c"))];
        assert_eq!(
            free_names(&params(&[]), &body).unwrap(),
            vec!["c".to_string(), "t".to_string()]
        );
    }

    #[test]
    fn test_free_names_reject_deep_nesting() {
        let mut expr = Expr::var("x");
        for _ in 0..MAX_FREE_NAME_DEPTH {
            expr = Expr::add(expr, Expr::int(1));
        }
        let result = free_names(&params(&[]), &[expr]);
        assert!(
            matches!(result, Err(CompileError::Unsupported(_))),
            "got {:?}",
            result
        );
    }

    #[test]
    fn test_free_names_at_depth_limit() {
        let mut expr = Expr::var("x");
        for _ in 0..MAX_FREE_NAME_DEPTH - 1 {
            expr = Expr::add(expr, Expr::int(1));
        }
        assert_eq!(free_names(&params(&[]), &[expr]).unwrap(), vec!["x".to_string()]);
    }

    #[test]
    fn test_capture_offsets() {
        assert_eq!(capture_offset(0), 8);
        assert_eq!(capture_offset(2), 24);
    }

    #[test]
    fn test_cl_types() {
        assert_eq!(cl_type(&ReprType::Int), Some(types::I64));
        assert_eq!(cl_type(&ReprType::Bool), Some(types::I8));
        assert_eq!(cl_type(&ReprType::Void), None);
    }
}
