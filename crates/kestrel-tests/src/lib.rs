//! Reference interpreter for kestrel function units.
//!
//! Executes a unit before and after optimization so tests can compare what a
//! script would observe: the completion (return, throw, suspension), the
//! values involved, and the final state of globals and objects.
//!
//! The value model is deliberately small. Numbers, strings, booleans,
//! `undefined` and plain objects are supported; coercing an object to a
//! number throws a `TypeError` so that arithmetic can exercise handlers.
//! `call` is not supported and reports a host error.

use anyhow::{anyhow, bail, Result};
use kestrel::ir::{BinaryOp, BlockId, Constant, FunctionUnit, Instr, Reg, UnaryOp};
use std::collections::BTreeMap;

/// A script value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Bool(bool),
    Number(f64),
    Str(String),
    /// Index into [`Machine::objects`]
    Object(usize),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }

    fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
        }
    }

    fn to_number(&self) -> Result<f64, Value> {
        match self {
            Value::Undefined => Ok(f64::NAN),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Number(n) => Ok(*n),
            Value::Str(s) => {
                let s = s.trim();
                if s.is_empty() {
                    Ok(0.0)
                } else {
                    Ok(s.parse().unwrap_or(f64::NAN))
                }
            }
            Value::Object(_) => Err(type_error("cannot convert object to number")),
        }
    }

    fn to_int32(&self) -> Result<i32, Value> {
        let n = self.to_number()?;
        if !n.is_finite() {
            return Ok(0);
        }
        Ok(n.trunc().rem_euclid(4_294_967_296.0) as u32 as i32)
    }

    /// String form used by `+` and property keys.
    fn display(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.clone(),
            Value::Object(_) => "[object Object]".to_string(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let s = if n > 0.0 { "Infinity" } else { "-Infinity" };
        s.to_string()
    } else {
        n.to_string()
    }
}

fn type_error(msg: &str) -> Value {
    Value::Str(format!("TypeError: {msg}"))
}

/// Kind of suspension point a unit stopped at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendKind {
    Yield,
    Await,
}

/// Saved state of a suspended unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    registers: Vec<Value>,
    resume: BlockId,
    suspended_in: BlockId,
}

/// How a run of a unit ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Return(Value),
    Throw(Value),
    Suspended {
        kind: SuspendKind,
        value: Value,
        frame: Frame,
    },
}

/// Result of executing one instruction.
enum Step {
    Continue,
    Goto(BlockId),
    Throw(Value),
    Return(Value),
    Suspend(SuspendKind, Value, BlockId),
}

/// Interpreter state shared across runs: globals and the object heap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Machine {
    pub globals: BTreeMap<String, Value>,
    pub objects: Vec<BTreeMap<String, Value>>,
    steps: usize,
    max_steps: usize,
}

impl Machine {
    pub fn new() -> Self {
        Self {
            max_steps: 1_000_000,
            ..Default::default()
        }
    }

    /// Limits the number of executed instructions across all runs.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Starts `unit` with the given arguments.
    pub fn run(&mut self, unit: &FunctionUnit, args: &[Value]) -> Result<Outcome> {
        if args.len() != unit.arg_count as usize {
            bail!(
                "`{}` takes {} arguments, got {}",
                unit.name,
                unit.arg_count,
                args.len()
            );
        }
        let mut registers = vec![Value::Undefined; unit.register_count as usize];
        registers[..args.len()].clone_from_slice(args);
        self.execute(unit, registers, unit.entry, None)
    }

    /// Continues a suspended unit at its continuation.
    pub fn resume(&mut self, unit: &FunctionUnit, frame: Frame) -> Result<Outcome> {
        self.execute(unit, frame.registers, frame.resume, None)
    }

    /// Continues a suspended unit by raising `exception` at the suspension point.
    pub fn resume_throw(
        &mut self,
        unit: &FunctionUnit,
        frame: Frame,
        exception: Value,
    ) -> Result<Outcome> {
        let block = unit
            .block(frame.suspended_in)
            .ok_or_else(|| anyhow!("suspended in unknown {}", frame.suspended_in))?;
        match block.handler {
            Some(handler) => self.execute(unit, frame.registers, handler, Some(exception)),
            None => Ok(Outcome::Throw(exception)),
        }
    }

    fn execute(
        &mut self,
        unit: &FunctionUnit,
        mut registers: Vec<Value>,
        mut current: BlockId,
        mut exception: Option<Value>,
    ) -> Result<Outcome> {
        let block_map = unit.block_map();
        let mut stack: Vec<Value> = Vec::new();
        loop {
            let idx = *block_map
                .get(&current)
                .ok_or_else(|| anyhow!("jump to unknown {}", current))?;
            let block = &unit.blocks[idx];
            stack.clear();

            let mut next = None;
            for instr in &block.instructions {
                self.steps += 1;
                if self.steps > self.max_steps {
                    bail!("step limit of {} exceeded", self.max_steps);
                }
                match self.step(unit, instr, &mut registers, &mut stack, exception.as_ref())? {
                    Step::Continue => {}
                    Step::Goto(target) => {
                        next = Some(target);
                        break;
                    }
                    Step::Throw(value) => match block.handler {
                        Some(handler) => {
                            exception = Some(value);
                            next = Some(handler);
                            break;
                        }
                        None => return Ok(Outcome::Throw(value)),
                    },
                    Step::Return(value) => return Ok(Outcome::Return(value)),
                    Step::Suspend(kind, value, resume) => {
                        return Ok(Outcome::Suspended {
                            kind,
                            value,
                            frame: Frame {
                                registers,
                                resume,
                                suspended_in: block.id,
                            },
                        })
                    }
                }
            }
            current = next.ok_or_else(|| anyhow!("block `{}` has no terminator", block.name))?;
        }
    }

    fn step(
        &mut self,
        unit: &FunctionUnit,
        instr: &Instr,
        regs: &mut [Value],
        stack: &mut Vec<Value>,
        exception: Option<&Value>,
    ) -> Result<Step> {
        let value = match instr {
            Instr::LoadConst { dest, index } => {
                let v = match unit.constants.get(index.as_usize()) {
                    Some(Constant::Undefined) => Value::Undefined,
                    Some(Constant::Number(n)) => Value::Number(*n),
                    Some(Constant::String(s)) => Value::Str(s.clone()),
                    other => bail!("load_const of {:?}", other),
                };
                Some((*dest, v))
            }
            Instr::LoadInt { dest, value } => Some((*dest, Value::Number(f64::from(*value)))),
            Instr::LoadUndefined { dest } => Some((*dest, Value::Undefined)),
            Instr::Move { dest, src } => Some((*dest, read(regs, *src)?)),
            Instr::Push { src } => {
                stack.push(read(regs, *src)?);
                None
            }
            Instr::Pop { dest } => {
                let v = stack.pop().ok_or_else(|| anyhow!("operand stack underflow"))?;
                Some((*dest, v))
            }
            Instr::Binary { op, dest, lhs, rhs } => {
                match binary(*op, &read(regs, *lhs)?, &read(regs, *rhs)?) {
                    Ok(v) => Some((*dest, v)),
                    Err(thrown) => return Ok(Step::Throw(thrown)),
                }
            }
            Instr::Unary { op, dest, operand } => match unary(*op, &read(regs, *operand)?) {
                Ok(v) => Some((*dest, v)),
                Err(thrown) => return Ok(Step::Throw(thrown)),
            },
            Instr::GetProperty { dest, object, key } => {
                let Value::Object(obj) = read(regs, *object)? else {
                    return Ok(Step::Throw(type_error("cannot read property of non-object")));
                };
                let key = read(regs, *key)?.display();
                let v = self.object(obj)?.get(&key).cloned().unwrap_or(Value::Undefined);
                Some((*dest, v))
            }
            Instr::SetProperty { object, key, value } => {
                let Value::Object(obj) = read(regs, *object)? else {
                    return Ok(Step::Throw(type_error("cannot set property of non-object")));
                };
                let key = read(regs, *key)?.display();
                let value = read(regs, *value)?;
                self.objects
                    .get_mut(obj)
                    .ok_or_else(|| anyhow!("dangling object {obj}"))?
                    .insert(key, value);
                None
            }
            Instr::GetGlobal { dest, name } => {
                let name = global_name(unit, name.as_usize())?;
                match self.globals.get(name) {
                    Some(v) => Some((*dest, v.clone())),
                    None => {
                        return Ok(Step::Throw(Value::Str(format!(
                            "ReferenceError: {name} is not defined"
                        ))))
                    }
                }
            }
            Instr::SetGlobal { name, value } => {
                let name = global_name(unit, name.as_usize())?.to_string();
                let value = read(regs, *value)?;
                self.globals.insert(name, value);
                None
            }
            Instr::Call { .. } => bail!("call is not supported by the reference interpreter"),
            Instr::NewObject { dest } => {
                self.objects.push(BTreeMap::new());
                Some((*dest, Value::Object(self.objects.len() - 1)))
            }
            Instr::Exception { dest } => {
                Some((*dest, exception.cloned().unwrap_or(Value::Undefined)))
            }
            Instr::Jump { target } => return Ok(Step::Goto(*target)),
            Instr::JumpIf {
                condition,
                if_true,
                if_false,
            } => {
                let target = if read(regs, *condition)?.truthy() {
                    if_true
                } else {
                    if_false
                };
                return Ok(Step::Goto(*target));
            }
            Instr::JumpTable { index, table } => {
                let state = match read(regs, *index)? {
                    Value::Number(n) if n >= 0.0 && n.fract() == 0.0 => n as u32,
                    other => bail!("jump_table on non-state {:?}", other),
                };
                let table = unit.dispatch_table(*table)?;
                let target = table
                    .targets
                    .get(&state)
                    .ok_or_else(|| anyhow!("no dispatch entry for state {state}"))?;
                return Ok(Step::Goto(*target));
            }
            Instr::Return { value } => return Ok(Step::Return(read(regs, *value)?)),
            Instr::Throw { value } => return Ok(Step::Throw(read(regs, *value)?)),
            Instr::Yield { value, resume } => {
                return Ok(Step::Suspend(SuspendKind::Yield, read(regs, *value)?, *resume))
            }
            Instr::Await { value, resume } => {
                return Ok(Step::Suspend(SuspendKind::Await, read(regs, *value)?, *resume))
            }
        };

        if let Some((dest, v)) = value {
            let slot = regs
                .get_mut(dest.index())
                .ok_or_else(|| anyhow!("write to out-of-range {dest}"))?;
            *slot = v;
        }
        Ok(Step::Continue)
    }

    fn object(&self, obj: usize) -> Result<&BTreeMap<String, Value>> {
        self.objects
            .get(obj)
            .ok_or_else(|| anyhow!("dangling object {obj}"))
    }
}

fn read(regs: &[Value], r: Reg) -> Result<Value> {
    regs.get(r.index())
        .cloned()
        .ok_or_else(|| anyhow!("read of out-of-range {r}"))
}

fn global_name(unit: &FunctionUnit, idx: usize) -> Result<&str> {
    match unit.constants.get(idx) {
        Some(Constant::String(s)) => Ok(s),
        other => bail!("global name constant is {:?}", other),
    }
}

fn binary(op: BinaryOp, a: &Value, b: &Value) -> Result<Value, Value> {
    let num = |f: fn(f64, f64) -> f64| -> Result<Value, Value> {
        Ok(Value::Number(f(a.to_number()?, b.to_number()?)))
    };
    match op {
        BinaryOp::Add => match (a, b) {
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                Ok(Value::Str(format!("{}{}", a.display(), b.display())))
            }
            _ => num(|x, y| x + y),
        },
        BinaryOp::Sub => num(|x, y| x - y),
        BinaryOp::Mul => num(|x, y| x * y),
        BinaryOp::Div => num(|x, y| x / y),
        BinaryOp::Mod => num(|x, y| x % y),
        BinaryOp::LessThan => Ok(Value::Bool(a.to_number()? < b.to_number()?)),
        BinaryOp::GreaterThan => Ok(Value::Bool(a.to_number()? > b.to_number()?)),
        BinaryOp::LooseEquals => Ok(Value::Bool(match (a, b) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Object(x), Value::Object(y)) => x == y,
            (Value::Str(x), Value::Str(y)) => x == y,
            (Value::Undefined, _) | (_, Value::Undefined) => false,
            (Value::Object(_), _) | (_, Value::Object(_)) => false,
            _ => a.to_number()? == b.to_number()?,
        })),
        // Derived equality already treats NaN as unequal to itself.
        BinaryOp::StrictEquals => Ok(Value::Bool(a == b)),
        BinaryOp::StrictNotEquals => Ok(Value::Bool(a != b)),
        BinaryOp::BitAnd => Ok(Value::Number(f64::from(a.to_int32()? & b.to_int32()?))),
        BinaryOp::BitOr => Ok(Value::Number(f64::from(a.to_int32()? | b.to_int32()?))),
    }
}

fn unary(op: UnaryOp, v: &Value) -> Result<Value, Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!v.truthy())),
        UnaryOp::TypeOf => Ok(Value::Str(v.type_of().to_string())),
        UnaryOp::Negate => Ok(Value::Number(-v.to_number()?)),
        UnaryOp::ToNumber => Ok(Value::Number(v.to_number()?)),
    }
}

/// Runs `unit` to completion, resuming every suspension with no value.
///
/// Returns the yielded/awaited values in order followed by the final
/// completion.
pub fn drive(machine: &mut Machine, unit: &FunctionUnit, args: &[Value]) -> Result<(Vec<Value>, Outcome)> {
    let mut suspended = Vec::new();
    let mut outcome = machine.run(unit, args)?;
    while let Outcome::Suspended { value, frame, .. } = outcome {
        suspended.push(value);
        outcome = machine.resume(unit, frame)?;
    }
    Ok((suspended, outcome))
}

/// Everything a script could observe from one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub suspended: Vec<Value>,
    pub outcome: Outcome,
    pub globals: BTreeMap<String, Value>,
    pub objects: Vec<BTreeMap<String, Value>>,
}

/// Drives `unit` on a fresh machine seeded with `globals`.
pub fn observe(
    unit: &FunctionUnit,
    args: &[Value],
    globals: &[(&str, Value)],
) -> Result<Observation> {
    let mut machine = Machine::new();
    for (name, value) in globals {
        machine.globals.insert(name.to_string(), value.clone());
    }
    let (suspended, outcome) = drive(&mut machine, unit, args)?;
    Ok(Observation {
        suspended,
        outcome: strip_frame(outcome),
        globals: machine.globals,
        objects: machine.objects,
    })
}

/// Frames hold register files, which legitimately differ after allocation.
fn strip_frame(outcome: Outcome) -> Outcome {
    match outcome {
        Outcome::Suspended { kind, value, .. } => Outcome::Suspended {
            kind,
            value,
            frame: Frame {
                registers: Vec::new(),
                resume: BlockId(0),
                suspended_in: BlockId(0),
            },
        },
        other => other,
    }
}
