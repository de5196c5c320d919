use super::apint::IntValue;
use super::types::Type;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct GlobalId(pub u32);

impl BlockId {
    pub const ENTRY: BlockId = BlockId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A compilation unit: the functions of the program plus its globals.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Module {
    pub functions: Vec<Function>,
    pub globals: Vec<Global>,
}

impl Module {
    pub fn new() -> Module {
        Module { functions: Vec::new(), globals: Vec::new() }
    }

    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    pub fn global(&self, id: GlobalId) -> &Global {
        &self.globals[id.0 as usize]
    }

    pub fn add_global(&mut self, global: Global) -> GlobalId {
        self.globals.push(global);
        GlobalId(self.globals.len() as u32 - 1)
    }

    /// Add a constant NUL-terminated string global, returning its id.
    pub fn add_string_global(&mut self, name: &str, text: &str) -> GlobalId {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        let len = bytes.len() as u64;
        self.add_global(Global {
            name: name.to_string(),
            ty: Type::array_of(Type::I8, len),
            constant: true,
            init: Some(GlobalInit::Bytes(bytes)),
        })
    }
}

impl Default for Module {
    fn default() -> Self {
        Module::new()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    pub ty: Type,
    pub constant: bool,
    pub init: Option<GlobalInit>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum GlobalInit {
    /// Raw little-endian bytes; also used for string data.
    Bytes(Vec<u8>),
    Int(IntValue),
    Zero,
}

/// One SSA function: parameters, basic blocks and a value arena.
///
/// Every parameter, constant and instruction is a `ValueId` into the arena;
/// blocks hold the program order of their instructions.  Removed
/// instructions leave their arena slot behind, which keeps ids stable while
/// passes mutate the layout.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<ValueId>,
    pub ret_ty: Type,
    pub blocks: Vec<Block>,
    values: Vec<ValueDef>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    pub insts: Vec<ValueId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ValueDef {
    Param { index: u32, ty: Type, name: String },
    Const(Constant),
    Inst(Inst),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Constant {
    Int(IntValue),
    NullPtr,
    Undef(Type),
    /// The address of a global variable.
    Global(GlobalId),
    /// A function used as a value (thread and kernel registration).
    FuncRef(String),
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ICmpPred {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum CastOp {
    ZExt,
    SExt,
    Trunc,
    Bitcast,
    PtrToInt,
    IntToPtr,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Inst {
    Alloca { elem: Type, count: ValueId },
    Binary { op: BinOp, ty: Type, lhs: ValueId, rhs: ValueId },
    ICmp { pred: ICmpPred, lhs: ValueId, rhs: ValueId },
    Cast { op: CastOp, ty: Type, arg: ValueId },
    Gep { base: ValueId, pointee: Type, indices: Vec<ValueId> },
    Load { ty: Type, ptr: ValueId },
    Store { ptr: ValueId, value: ValueId },
    Phi { ty: Type, incomings: Vec<(BlockId, ValueId)> },
    Select { cond: ValueId, if_true: ValueId, if_false: ValueId },
    Call { callee: String, ty: Type, args: Vec<ValueId> },
    Br { dest: BlockId },
    CondBr { cond: ValueId, if_true: BlockId, if_false: BlockId },
    Switch { value: ValueId, default: BlockId, cases: Vec<(u64, BlockId)> },
    Ret { value: Option<ValueId> },
}

impl Inst {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Inst::Br { .. } | Inst::CondBr { .. } | Inst::Switch { .. } | Inst::Ret { .. }
        )
    }

    /// Successor blocks of a terminator, in edge order.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Inst::Br { dest } => vec![*dest],
            Inst::CondBr { if_true, if_false, .. } => vec![*if_true, *if_false],
            Inst::Switch { default, cases, .. } => {
                let mut out = vec![*default];
                out.extend(cases.iter().map(|(_, b)| *b));
                out
            }
            _ => Vec::new(),
        }
    }

    /// The value operands of the instruction, in a fixed order.
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Inst::Alloca { count, .. } => vec![*count],
            Inst::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            Inst::ICmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            Inst::Cast { arg, .. } => vec![*arg],
            Inst::Gep { base, indices, .. } => {
                let mut ops = vec![*base];
                ops.extend_from_slice(indices);
                ops
            }
            Inst::Load { ptr, .. } => vec![*ptr],
            Inst::Store { ptr, value } => vec![*ptr, *value],
            Inst::Phi { incomings, .. } => incomings.iter().map(|(_, v)| *v).collect(),
            Inst::Select { cond, if_true, if_false } => vec![*cond, *if_true, *if_false],
            Inst::Call { args, .. } => args.clone(),
            Inst::CondBr { cond, .. } => vec![*cond],
            Inst::Switch { value, .. } => vec![*value],
            Inst::Ret { value } => value.iter().copied().collect(),
            Inst::Br { .. } => Vec::new(),
        }
    }

    fn replace_operand(&mut self, old: ValueId, new: ValueId) {
        let rep = |v: &mut ValueId| {
            if *v == old {
                *v = new;
            }
        };
        match self {
            Inst::Alloca { count, .. } => rep(count),
            Inst::Binary { lhs, rhs, .. } => {
                rep(lhs);
                rep(rhs);
            }
            Inst::ICmp { lhs, rhs, .. } => {
                rep(lhs);
                rep(rhs);
            }
            Inst::Cast { arg, .. } => rep(arg),
            Inst::Gep { base, indices, .. } => {
                rep(base);
                indices.iter_mut().for_each(rep);
            }
            Inst::Load { ptr, .. } => rep(ptr),
            Inst::Store { ptr, value } => {
                rep(ptr);
                rep(value);
            }
            Inst::Phi { incomings, .. } => incomings.iter_mut().for_each(|(_, v)| rep(v)),
            Inst::Select { cond, if_true, if_false } => {
                rep(cond);
                rep(if_true);
                rep(if_false);
            }
            Inst::Call { args, .. } => args.iter_mut().for_each(rep),
            Inst::CondBr { cond, .. } => rep(cond),
            Inst::Switch { value, .. } => rep(value),
            Inst::Ret { value } => {
                if let Some(v) = value {
                    rep(v);
                }
            }
            Inst::Br { .. } => {}
        }
    }
}

impl Function {
    pub fn new(name: &str, params: &[(&str, Type)], ret_ty: Type) -> Function {
        let mut f = Function {
            name: name.to_string(),
            params: Vec::new(),
            ret_ty,
            blocks: Vec::new(),
            values: Vec::new(),
        };
        for (index, (pname, ty)) in params.iter().enumerate() {
            let id = f.add_value(ValueDef::Param {
                index: index as u32,
                ty: ty.clone(),
                name: pname.to_string(),
            });
            f.params.push(id);
        }
        f
    }

    pub fn add_value(&mut self, def: ValueDef) -> ValueId {
        self.values.push(def);
        ValueId(self.values.len() as u32 - 1)
    }

    pub fn value(&self, id: ValueId) -> &ValueDef {
        &self.values[id.index()]
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut ValueDef {
        &mut self.values[id.index()]
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn inst(&self, id: ValueId) -> Option<&Inst> {
        match self.value(id) {
            ValueDef::Inst(i) => Some(i),
            _ => None,
        }
    }

    pub fn inst_mut(&mut self, id: ValueId) -> Option<&mut Inst> {
        match self.value_mut(id) {
            ValueDef::Inst(i) => Some(i),
            _ => None,
        }
    }

    pub fn constant(&self, id: ValueId) -> Option<&Constant> {
        match self.value(id) {
            ValueDef::Const(c) => Some(c),
            _ => None,
        }
    }

    /// The constant integer value of `id`, if it is one.
    pub fn const_int(&self, id: ValueId) -> Option<IntValue> {
        match self.value(id) {
            ValueDef::Const(Constant::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn is_undef(&self, id: ValueId) -> bool {
        matches!(self.value(id), ValueDef::Const(Constant::Undef(_)))
    }

    pub fn add_block(&mut self, name: &str) -> BlockId {
        self.blocks.push(Block { name: name.to_string(), insts: Vec::new() });
        BlockId(self.blocks.len() as u32 - 1)
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn entry(&self) -> BlockId {
        BlockId::ENTRY
    }

    pub fn iconst(&mut self, bits: u32, value: u64) -> ValueId {
        self.add_value(ValueDef::Const(Constant::Int(IntValue::from_u64(bits, value))))
    }

    pub fn iconst_signed(&mut self, bits: u32, value: i64) -> ValueId {
        self.add_value(ValueDef::Const(Constant::Int(IntValue::from_i64(bits, value))))
    }

    pub fn undef(&mut self, ty: Type) -> ValueId {
        self.add_value(ValueDef::Const(Constant::Undef(ty)))
    }

    pub fn null_ptr(&mut self) -> ValueId {
        self.add_value(ValueDef::Const(Constant::NullPtr))
    }

    pub fn result_type(&self, id: ValueId) -> Type {
        match self.value(id) {
            ValueDef::Param { ty, .. } => ty.clone(),
            ValueDef::Const(c) => match c {
                Constant::Int(v) => Type::Int(v.bits()),
                Constant::NullPtr | Constant::Global(_) | Constant::FuncRef(_) => Type::Ptr,
                Constant::Undef(ty) => ty.clone(),
            },
            ValueDef::Inst(inst) => match inst {
                Inst::Alloca { .. } | Inst::Gep { .. } => Type::Ptr,
                Inst::Binary { ty, .. } | Inst::Cast { ty, .. } | Inst::Phi { ty, .. } => ty.clone(),
                Inst::ICmp { .. } => Type::I1,
                Inst::Load { ty, .. } => ty.clone(),
                Inst::Select { if_true, .. } => self.result_type(*if_true),
                Inst::Call { ty, .. } => ty.clone(),
                Inst::Store { .. }
                | Inst::Br { .. }
                | Inst::CondBr { .. }
                | Inst::Switch { .. }
                | Inst::Ret { .. } => Type::Void,
            },
        }
    }

    /// The callee symbol if `id` is a call instruction.
    pub fn call_target(&self, id: ValueId) -> Option<&str> {
        match self.inst(id)? {
            Inst::Call { callee, .. } => Some(callee),
            _ => None,
        }
    }

    pub fn call_args(&self, id: ValueId) -> Option<&[ValueId]> {
        match self.inst(id)? {
            Inst::Call { args, .. } => Some(args),
            _ => None,
        }
    }

    /// Locate an instruction in the block layout.
    pub fn position_of(&self, id: ValueId) -> Option<(BlockId, usize)> {
        for (bi, block) in self.blocks.iter().enumerate() {
            if let Some(pos) = block.insts.iter().position(|i| *i == id) {
                return Some((BlockId(bi as u32), pos));
            }
        }
        None
    }

    pub fn block_of(&self, id: ValueId) -> Option<BlockId> {
        self.position_of(id).map(|(b, _)| b)
    }

    pub fn append_inst(&mut self, block: BlockId, inst: Inst) -> ValueId {
        let id = self.add_value(ValueDef::Inst(inst));
        self.blocks[block.index()].insts.push(id);
        id
    }

    pub fn insert_inst(&mut self, block: BlockId, pos: usize, inst: Inst) -> ValueId {
        let id = self.add_value(ValueDef::Inst(inst));
        self.blocks[block.index()].insts.insert(pos, id);
        id
    }

    /// Insert a new instruction immediately before an existing one.
    pub fn insert_before(&mut self, anchor: ValueId, inst: Inst) -> ValueId {
        let (block, pos) = self
            .position_of(anchor)
            .unwrap_or_else(|| panic!("insert_before: {anchor:?} is not in any block"));
        self.insert_inst(block, pos, inst)
    }

    /// Insert a new instruction immediately after an existing one.
    pub fn insert_after(&mut self, anchor: ValueId, inst: Inst) -> ValueId {
        let (block, pos) = self
            .position_of(anchor)
            .unwrap_or_else(|| panic!("insert_after: {anchor:?} is not in any block"));
        self.insert_inst(block, pos + 1, inst)
    }

    /// Remove an instruction from the block layout.  The arena slot stays.
    pub fn remove_inst(&mut self, id: ValueId) {
        if let Some((block, pos)) = self.position_of(id) {
            self.blocks[block.index()].insts.remove(pos);
        }
    }

    /// First position in the entry block after the leading allocas.
    pub fn entry_insertion_point(&self) -> usize {
        let entry = &self.blocks[0];
        entry
            .insts
            .iter()
            .position(|i| !matches!(self.inst(*i), Some(Inst::Alloca { .. })))
            .unwrap_or(entry.insts.len())
    }

    pub fn terminator(&self, block: BlockId) -> Option<ValueId> {
        let insts = &self.blocks[block.index()].insts;
        let last = *insts.last()?;
        match self.inst(last) {
            Some(i) if i.is_terminator() => Some(last),
            _ => None,
        }
    }

    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) {
        for def in &mut self.values {
            if let ValueDef::Inst(inst) = def {
                inst.replace_operand(old, new);
            }
        }
    }

    /// Does any instruction still in the block layout use the value?
    /// Instructions that were removed from their block do not count.
    pub fn has_uses(&self, id: ValueId) -> bool {
        self.blocks.iter().any(|block| {
            block.insts.iter().any(|i| {
                matches!(self.inst(*i), Some(inst) if inst.operands().contains(&id))
            })
        })
    }

    /// A short printed form for diagnostics.
    pub fn display_value(&self, id: ValueId) -> String {
        match self.value(id) {
            ValueDef::Param { name, .. } => format!("%{name}"),
            ValueDef::Const(Constant::Int(v)) => format!("{v}"),
            ValueDef::Const(Constant::NullPtr) => "null".to_string(),
            ValueDef::Const(Constant::Undef(_)) => "undef".to_string(),
            ValueDef::Const(Constant::Global(g)) => format!("@global{}", g.0),
            ValueDef::Const(Constant::FuncRef(name)) => format!("@{name}"),
            ValueDef::Inst(Inst::Call { callee, .. }) => {
                format!("%{} = call {callee}(...)", id.0)
            }
            ValueDef::Inst(inst) => format!("%{} = {}", id.0, inst_mnemonic(inst)),
        }
    }
}

fn inst_mnemonic(inst: &Inst) -> &'static str {
    match inst {
        Inst::Alloca { .. } => "alloca",
        Inst::Binary { op, .. } => match op {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::UDiv => "udiv",
            BinOp::SDiv => "sdiv",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
            BinOp::LShr => "lshr",
            BinOp::AShr => "ashr",
        },
        Inst::ICmp { .. } => "icmp",
        Inst::Cast { .. } => "cast",
        Inst::Gep { .. } => "getelementptr",
        Inst::Load { .. } => "load",
        Inst::Store { .. } => "store",
        Inst::Phi { .. } => "phi",
        Inst::Select { .. } => "select",
        Inst::Call { .. } => "call",
        Inst::Br { .. } => "br",
        Inst::CondBr { .. } => "br",
        Inst::Switch { .. } => "switch",
        Inst::Ret { .. } => "ret",
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}
