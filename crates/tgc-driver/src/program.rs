//! Tensor programs.
//!
//! A [`Program`] is a straight-line list of instructions. Each instruction
//! is either a named parameter with a declared shape or an operator applied
//! to earlier instructions. Instructions are referred to by [`InsId`], their
//! position in the list.

use std::fmt;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tgc_ops::Op;
use tgc_shape::Shape;

use crate::{CompileError, CompileResult};

/// Position of an instruction in its program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InsId(usize);

impl InsId {
    /// Creates an id from a raw index.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// The raw index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for InsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// One step of a program.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Instruction {
    /// An input bound by name at evaluation time.
    Param {
        /// Name used to bind the argument.
        name: String,
        /// Declared shape of the argument.
        shape: Shape,
    },
    /// An operator applied to earlier instructions.
    Apply {
        /// The operator.
        op: Op,
        /// Operand instructions, in operator input order.
        inputs: Vec<InsId>,
    },
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Param { name, .. } => write!(f, "param {name}"),
            Instruction::Apply { op, inputs } => {
                write!(f, "{op}(")?;
                for (i, input) in inputs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{input}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// A straight-line tensor program.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    instructions: Vec<Instruction>,
    /// Results returned by evaluation. Empty means the last instruction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    outputs: Vec<InsId>,
}

impl Program {
    /// Creates an empty program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a parameter.
    pub fn add_parameter(&mut self, name: impl Into<String>, shape: impl Into<Shape>) -> InsId {
        self.push(Instruction::Param {
            name: name.into(),
            shape: shape.into(),
        })
    }

    /// Appends an operator applied to `inputs`.
    pub fn add_instruction(&mut self, op: impl Into<Op>, inputs: &[InsId]) -> InsId {
        self.push(Instruction::Apply {
            op: op.into(),
            inputs: inputs.to_vec(),
        })
    }

    /// Declares the instructions whose results evaluation returns.
    pub fn set_outputs(&mut self, outputs: impl IntoIterator<Item = InsId>) {
        self.outputs = outputs.into_iter().collect();
    }

    /// The instructions, in order.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// The declared outputs.
    #[must_use]
    pub fn outputs(&self) -> &[InsId] {
        &self.outputs
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns true if the program has no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Parses a program from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::Serialization`] on malformed input.
    pub fn from_json(text: &str) -> CompileResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads a program from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: &Utf8Path) -> CompileResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| CompileError::ProgramReadError {
            path: path.to_owned(),
            source: e,
        })?;
        Self::from_json(&text)
    }

    /// Renders the program as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::Serialization`] if serialization fails.
    pub fn to_json(&self) -> CompileResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn push(&mut self, instruction: Instruction) -> InsId {
        let id = InsId::new(self.instructions.len());
        self.instructions.push(instruction);
        id
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, instruction) in self.instructions.iter().enumerate() {
            writeln!(f, "{} = {instruction}", InsId::new(i))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgc_ops::Reshape;
    use tgc_shape::DType;

    fn sample() -> Program {
        let mut program = Program::new();
        let x = program.add_parameter("x", Shape::from_lens(DType::Float32, [2, 3, 4]));
        let y = program.add_instruction(Reshape::new([0, -1]), &[x]);
        program.set_outputs([y]);
        program
    }

    #[test]
    fn test_ids_are_positions() {
        let program = sample();
        assert_eq!(program.len(), 2);
        assert_eq!(program.outputs(), &[InsId::new(1)]);
    }

    #[test]
    fn test_json_roundtrip() {
        let program = sample();
        let json = program.to_json().unwrap();
        assert!(json.contains(r#""kind": "apply""#));
        assert!(json.contains(r#""name": "reshape""#));
        assert_eq!(Program::from_json(&json).unwrap(), program);
    }

    #[test]
    fn test_malformed_json() {
        let err = Program::from_json(r#"{"instructions": [{"kind": "loop"}]}"#).unwrap_err();
        assert!(matches!(err, CompileError::Serialization(_)));
    }

    #[test]
    fn test_display() {
        let text = sample().to_string();
        assert!(text.contains("@0 = param x"));
        assert!(text.contains("@1 = reshape[dims={0, -1}](@0)"));
    }
}
