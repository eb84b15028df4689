//! Program compilation and evaluation for TGC.
//!
//! This crate runs tensor programs end to end: it resolves the shape of
//! every instruction once at compile time, then evaluates the program as
//! many times as needed against concrete buffers.
//!
//! # Pipeline
//!
//! ```text
//! Program ──▶ compile ──▶ CompiledProgram ──▶ eval ──▶ outputs
//!               │                               │
//!               │ compute_shape + finalize      │ DynOutput::resolve + compute
//!               │ per instruction               │ per instruction
//! ```
//!
//! # Aliasing fallback
//!
//! A reshape of a non-standard input may fail with an aliasing failure.
//! Under [`AliasPolicy::Copy`] the compiler inserts a `contiguous`
//! instruction on the offending operand and resolves the reshape again;
//! under [`AliasPolicy::Reject`] the failure is a compile error.

#![warn(missing_docs)]

pub mod program;

pub use program::{InsId, Instruction, Program};

use std::fmt;
use std::sync::Arc;

use camino::Utf8PathBuf;
use rustc_hash::FxHashMap;
use tgc_ops::{Argument, Contiguous, DynOutput, Op, OpError, Operation};
use tgc_session::{AliasPolicy, Options, Session, SessionRef};
use tgc_shape::{Shape, StaticShape};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Errors that can occur during compilation or evaluation.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Session creation failed.
    #[error("failed to create session: {0}")]
    SessionError(#[from] tgc_session::SessionError),

    /// An operator rejected its inputs or attributes.
    #[error("instruction {index} ({op}): {source}")]
    Instruction {
        /// Position of the failing instruction.
        index: usize,
        /// The failing operator.
        op: String,
        /// The operator's error.
        #[source]
        source: OpError,
    },

    /// An instruction refers to itself or a later instruction.
    #[error("instruction {index} refers to {input}, which is not defined before it")]
    UnknownInstruction {
        /// Position of the referring instruction.
        index: usize,
        /// The unresolvable operand.
        input: InsId,
    },

    /// The program has no instructions.
    #[error("program has no instructions")]
    EmptyProgram,

    /// No argument was bound for a parameter.
    #[error("missing argument for parameter `{0}`")]
    MissingParameter(String),

    /// A bound argument does not fit its parameter's declared shape.
    #[error("argument for `{name}` has shape {actual}, expected {expected}")]
    ParameterShape {
        /// The parameter.
        name: String,
        /// Declared shape.
        expected: Shape,
        /// Shape of the bound argument.
        actual: StaticShape,
    },

    /// An operator produced a buffer that differs from its resolved shape.
    #[error("instruction {index} produced {actual}, expected {expected}")]
    OutputShape {
        /// Position of the instruction in the compiled program.
        index: usize,
        /// The shape resolved for this invocation.
        expected: StaticShape,
        /// Shape of the produced buffer.
        actual: StaticShape,
    },

    /// Program file could not be read.
    #[error("failed to read program file: {path}")]
    ProgramReadError {
        /// The path that could not be read.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Program (de)serialization failed.
    #[error("invalid program: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for compilation operations.
pub type CompileResult<T> = Result<T, CompileError>;

fn instruction_error(index: usize, op: &Op, source: OpError) -> CompileError {
    CompileError::Instruction {
        index,
        op: op.to_string(),
        source,
    }
}

/// An instruction together with its resolved shape.
#[derive(Clone, Debug)]
pub struct CompiledInstruction {
    /// The instruction, with operands renumbered for the compiled program.
    pub instruction: Instruction,
    /// Output shape decided at compile time.
    pub shape: Shape,
    /// Operand position whose storage the output reuses, if any.
    pub alias: Option<usize>,
}

/// A program whose instruction shapes are resolved and whose operators are
/// finalized.
#[derive(Clone, Debug)]
pub struct CompiledProgram {
    instructions: Vec<CompiledInstruction>,
    outputs: Vec<InsId>,
}

impl CompiledProgram {
    /// The compiled instructions, including inserted copies.
    #[must_use]
    pub fn instructions(&self) -> &[CompiledInstruction] {
        &self.instructions
    }

    /// The instructions returned by evaluation.
    #[must_use]
    pub fn outputs(&self) -> &[InsId] {
        &self.outputs
    }

    /// Number of compiled instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns true if there are no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Resolved shape of an instruction.
    #[must_use]
    pub fn shape(&self, id: InsId) -> Option<&Shape> {
        self.instructions.get(id.index()).map(|ins| &ins.shape)
    }

    /// Resolved shapes of the outputs.
    pub fn output_shapes(&self) -> impl Iterator<Item = &Shape> + '_ {
        self.outputs
            .iter()
            .map(|id| &self.instructions[id.index()].shape)
    }

    /// Number of `contiguous` copies in the program.
    #[must_use]
    pub fn copies(&self) -> usize {
        self.instructions
            .iter()
            .filter(|ins| {
                matches!(
                    ins.instruction,
                    Instruction::Apply {
                        op: Op::Contiguous,
                        ..
                    }
                )
            })
            .count()
    }
}

impl fmt::Display for CompiledProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, ins) in self.instructions.iter().enumerate() {
            write!(f, "{} = {} -> {}", InsId::new(i), ins.instruction, ins.shape)?;
            if let (Some(k), Instruction::Apply { inputs, .. }) = (ins.alias, &ins.instruction) {
                if let Some(source) = inputs.get(k) {
                    write!(f, " (alias {source})")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Callbacks for monitoring compilation progress.
pub trait CompileCallbacks: Send + Sync {
    /// Called when an instruction's output shape is resolved.
    fn on_shape_resolved(&self, _id: InsId, _shape: &Shape) {}

    /// Called when a `contiguous` copy is inserted.
    fn on_copy_inserted(&self, _id: InsId) {}

    /// Called when an error occurs.
    fn on_error(&self, _error: &CompileError) {}
}

/// Default no-op implementation of callbacks.
#[derive(Default)]
pub struct NoopCallbacks;

impl CompileCallbacks for NoopCallbacks {}

/// The main compiler driver.
pub struct Compiler {
    session: SessionRef,
    callbacks: Arc<dyn CompileCallbacks>,
}

impl Compiler {
    /// Create a new compiler with the given options.
    #[must_use]
    pub fn new(options: Options) -> Self {
        Self::with_session(tgc_session::create_session(options))
    }

    /// Create a new compiler with default options.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(Options::default())
    }

    /// Create a compiler sharing an existing session.
    #[must_use]
    pub fn with_session(session: SessionRef) -> Self {
        Self {
            session,
            callbacks: Arc::new(NoopCallbacks),
        }
    }

    /// Create a compiler from a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be read or parsed.
    pub fn from_config(path: &camino::Utf8Path) -> CompileResult<Self> {
        Ok(Self::with_session(Arc::new(Session::from_config(path)?)))
    }

    /// Set the compilation callbacks.
    #[must_use]
    pub fn with_callbacks(mut self, callbacks: impl CompileCallbacks + 'static) -> Self {
        self.callbacks = Arc::new(callbacks);
        self
    }

    /// Get a reference to the session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Resolves every instruction's shape and finalizes every operator.
    ///
    /// # Errors
    ///
    /// Returns the first operator error, wrapped with the failing
    /// instruction, or a structural error in the program.
    #[instrument(skip(self, program), fields(instructions = program.len()))]
    pub fn compile(&self, program: &Program) -> CompileResult<CompiledProgram> {
        let result = self.compile_program(program);
        if let Err(e) = &result {
            self.callbacks.on_error(e);
        }
        result
    }

    /// Compiles and evaluates in one step.
    ///
    /// # Errors
    ///
    /// See [`Compiler::compile`] and [`Compiler::eval`].
    pub fn run(
        &self,
        program: &Program,
        params: &FxHashMap<String, Argument>,
    ) -> CompileResult<Vec<Argument>> {
        let compiled = self.compile(program)?;
        self.eval(&compiled, params)
    }

    fn compile_program(&self, program: &Program) -> CompileResult<CompiledProgram> {
        if program.is_empty() {
            return Err(CompileError::EmptyProgram);
        }
        info!("starting shape resolution");

        let ctx = self.session.context();
        let mut compiled: Vec<CompiledInstruction> = Vec::with_capacity(program.len());
        // program position -> compiled position
        let mut remap: Vec<InsId> = Vec::with_capacity(program.len());

        for (index, instruction) in program.instructions().iter().enumerate() {
            let entry = match instruction {
                Instruction::Param { shape, .. } => CompiledInstruction {
                    instruction: instruction.clone(),
                    shape: shape.clone(),
                    alias: None,
                },
                Instruction::Apply { op, inputs } => {
                    let mut operands = inputs
                        .iter()
                        .map(|&input| lookup(&remap, index, input))
                        .collect::<CompileResult<Vec<_>>>()?;
                    let mut op = op.clone();
                    let shape = self.resolve(&mut compiled, &op, &mut operands, index)?;
                    let shapes = operand_shapes(&compiled, &operands);
                    op.finalize(ctx, &shape, &shapes)
                        .map_err(|source| instruction_error(index, &op, source))?;
                    let alias = op.output_alias(&shapes);
                    CompiledInstruction {
                        instruction: Instruction::Apply {
                            op,
                            inputs: operands,
                        },
                        shape,
                        alias,
                    }
                }
            };

            let id = InsId::new(compiled.len());
            if self.session.options.dump_shapes {
                info!(%id, instruction = %entry.instruction, shape = %entry.shape, "resolved");
            } else {
                debug!(%id, instruction = %entry.instruction, shape = %entry.shape, "resolved");
            }
            self.callbacks.on_shape_resolved(id, &entry.shape);
            remap.push(id);
            compiled.push(entry);
        }

        let outputs = if program.outputs().is_empty() {
            vec![InsId::new(compiled.len() - 1)]
        } else {
            program
                .outputs()
                .iter()
                .map(|&output| lookup(&remap, program.len(), output))
                .collect::<CompileResult<Vec<_>>>()?
        };

        info!(instructions = compiled.len(), "shape resolution complete");
        Ok(CompiledProgram {
            instructions: compiled,
            outputs,
        })
    }

    /// Resolves `op` against `operands`, inserting `contiguous` copies
    /// under [`AliasPolicy::Copy`] when the operands cannot be aliased.
    fn resolve(
        &self,
        compiled: &mut Vec<CompiledInstruction>,
        op: &Op,
        operands: &mut [InsId],
        index: usize,
    ) -> CompileResult<Shape> {
        let shapes = operand_shapes(compiled, operands);
        match op.compute_shape(&shapes) {
            Ok(shape) => Ok(shape),
            Err(err)
                if err.is_aliasing_failure()
                    && self.session.alias_policy() == AliasPolicy::Copy =>
            {
                warn!(index, op = %op, error = %err, "inserting contiguous copy");
                for operand in operands.iter_mut() {
                    let shape = &compiled[operand.index()].shape;
                    if shape.is_dynamic() || shape.is_standard() {
                        continue;
                    }
                    let copy_shape = Contiguous
                        .compute_shape(std::slice::from_ref(shape))
                        .map_err(|source| instruction_error(index, op, source))?;
                    let copy = InsId::new(compiled.len());
                    compiled.push(CompiledInstruction {
                        instruction: Instruction::Apply {
                            op: Op::Contiguous,
                            inputs: vec![*operand],
                        },
                        shape: copy_shape,
                        alias: None,
                    });
                    self.callbacks.on_copy_inserted(copy);
                    *operand = copy;
                }
                let shapes = operand_shapes(compiled, operands);
                op.compute_shape(&shapes)
                    .map_err(|source| instruction_error(index, op, source))
            }
            Err(source) => Err(instruction_error(index, op, source)),
        }
    }

    /// Evaluates a compiled program against bound parameters.
    ///
    /// Dynamic output shapes are finalized per instruction against the
    /// concrete operand shapes of this call.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter is unbound or mis-shaped, if an
    /// operator fails, or (with `validate_outputs`) if an operator's result
    /// differs from its resolved shape.
    #[instrument(skip(self, program, params), fields(instructions = program.len()))]
    pub fn eval(
        &self,
        program: &CompiledProgram,
        params: &FxHashMap<String, Argument>,
    ) -> CompileResult<Vec<Argument>> {
        let ctx = self.session.context();
        let mut values: Vec<Argument> = Vec::with_capacity(program.len());

        for (index, entry) in program.instructions().iter().enumerate() {
            let value = match &entry.instruction {
                Instruction::Param { name, shape } => {
                    let arg = params
                        .get(name)
                        .ok_or_else(|| CompileError::MissingParameter(name.clone()))?;
                    if !admits(shape, arg.shape()) {
                        return Err(CompileError::ParameterShape {
                            name: name.clone(),
                            expected: shape.clone(),
                            actual: arg.shape().clone(),
                        });
                    }
                    arg.clone()
                }
                Instruction::Apply { op, inputs } => {
                    let args: Vec<Argument> = inputs
                        .iter()
                        .map(|id| values[id.index()].clone())
                        .collect();
                    let output = DynOutput::resolve(op, &entry.shape, &args)
                        .map_err(|source| instruction_error(index, op, source))?;
                    let result = op
                        .compute(ctx, &output, &args)
                        .map_err(|source| instruction_error(index, op, source))?;
                    if self.session.options.validate_outputs
                        && result.shape() != output.computed_shape()
                    {
                        return Err(CompileError::OutputShape {
                            index,
                            expected: output.computed_shape().clone(),
                            actual: result.shape().clone(),
                        });
                    }
                    result
                }
            };
            values.push(value);
        }

        debug!(outputs = program.outputs().len(), "evaluation complete");
        Ok(program
            .outputs()
            .iter()
            .map(|id| values[id.index()].clone())
            .collect())
    }
}

fn lookup(remap: &[InsId], index: usize, input: InsId) -> CompileResult<InsId> {
    remap
        .get(input.index())
        .copied()
        .ok_or(CompileError::UnknownInstruction { index, input })
}

fn operand_shapes(compiled: &[CompiledInstruction], operands: &[InsId]) -> Vec<Shape> {
    operands
        .iter()
        .map(|id| compiled[id.index()].shape.clone())
        .collect()
}

/// Whether a concrete buffer may be bound where `declared` is expected.
///
/// Dynamic parameters carry no strides, so downstream shapes are computed
/// for a standard layout and only standard buffers are admitted.
fn admits(declared: &Shape, actual: &StaticShape) -> bool {
    match declared {
        Shape::Static(shape) => shape == actual,
        Shape::Dynamic(shape) => {
            shape.dtype() == actual.dtype()
                && shape.accepts(actual.lens())
                && actual.is_standard()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgc_ops::Reshape;
    use tgc_shape::{DType, DynamicDimension};

    #[test]
    fn test_forward_reference_rejected() {
        let mut program = Program::new();
        program.add_instruction(Reshape::new([-1]), &[InsId::new(0)]);
        let err = Compiler::with_defaults().compile(&program).unwrap_err();
        assert!(matches!(
            err,
            CompileError::UnknownInstruction { index: 0, .. }
        ));
    }

    #[test]
    fn test_empty_program() {
        let err = Compiler::with_defaults()
            .compile(&Program::new())
            .unwrap_err();
        assert!(matches!(err, CompileError::EmptyProgram));
    }

    #[test]
    fn test_admits() {
        let fixed = Shape::from_lens(DType::Float32, [2, 3]);
        assert!(admits(&fixed, &StaticShape::standard(DType::Float32, [2, 3])));
        assert!(!admits(&fixed, &StaticShape::standard(DType::Float32, [3, 2])));

        let ranged = Shape::from_dims(
            DType::Float32,
            [DynamicDimension::fixed(2), DynamicDimension::new(1, 4).unwrap()],
        );
        assert!(admits(&ranged, &StaticShape::standard(DType::Float32, [2, 4])));
        assert!(!admits(&ranged, &StaticShape::standard(DType::Float32, [2, 5])));
        assert!(!admits(&ranged, &StaticShape::standard(DType::Int32, [2, 4])));

        let column_major = StaticShape::with_strides(DType::Float32, [2, 4], [1, 2]).unwrap();
        assert!(!admits(&ranged, &column_major));
    }

    #[test]
    fn test_error_names_instruction() {
        let mut program = Program::new();
        let x = program.add_parameter("x", Shape::from_lens(DType::Float32, [2, 3]));
        program.add_instruction(Reshape::new([4, 2]), &[x]);
        let err = Compiler::with_defaults().compile(&program).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("instruction 1 (reshape[dims={4, 2}])"));
    }
}
