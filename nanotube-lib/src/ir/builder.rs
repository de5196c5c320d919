use super::function::{BinOp, BlockId, CastOp, Constant, Function, ICmpPred, Inst, ValueDef, ValueId};
use super::types::Type;

/// Convenience layer for constructing functions block by block.  Used by
/// the front-end glue and extensively by tests.
pub struct FunctionBuilder {
    f: Function,
    current: Option<BlockId>,
}

impl FunctionBuilder {
    pub fn new(name: &str, params: &[(&str, Type)], ret_ty: Type) -> FunctionBuilder {
        FunctionBuilder { f: Function::new(name, params, ret_ty), current: None }
    }

    pub fn func(&mut self) -> &mut Function {
        &mut self.f
    }

    pub fn param(&self, index: usize) -> ValueId {
        self.f.params[index]
    }

    pub fn block(&mut self, name: &str) -> BlockId {
        self.f.add_block(name)
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    fn emit(&mut self, inst: Inst) -> ValueId {
        let block = self.current.expect("no current block");
        self.f.append_inst(block, inst)
    }

    pub fn iconst(&mut self, bits: u32, value: u64) -> ValueId {
        self.f.iconst(bits, value)
    }

    pub fn iconst_signed(&mut self, bits: u32, value: i64) -> ValueId {
        self.f.iconst_signed(bits, value)
    }

    pub fn undef(&mut self, ty: Type) -> ValueId {
        self.f.undef(ty)
    }

    pub fn null_ptr(&mut self) -> ValueId {
        self.f.null_ptr()
    }

    pub fn global_ref(&mut self, id: super::function::GlobalId) -> ValueId {
        self.f.add_value(ValueDef::Const(Constant::Global(id)))
    }

    pub fn func_ref(&mut self, name: &str) -> ValueId {
        self.f.add_value(ValueDef::Const(Constant::FuncRef(name.to_string())))
    }

    pub fn alloca(&mut self, elem: Type, count: ValueId) -> ValueId {
        self.emit(Inst::Alloca { elem, count })
    }

    /// An alloca of `len` bytes.
    pub fn alloca_bytes(&mut self, len: u64) -> ValueId {
        let n = self.iconst(32, len);
        self.alloca(Type::I8, n)
    }

    pub fn binary(&mut self, op: BinOp, ty: Type, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.emit(Inst::Binary { op, ty, lhs, rhs })
    }

    pub fn add(&mut self, ty: Type, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Add, ty, lhs, rhs)
    }

    pub fn icmp(&mut self, pred: ICmpPred, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.emit(Inst::ICmp { pred, lhs, rhs })
    }

    pub fn cast(&mut self, op: CastOp, ty: Type, arg: ValueId) -> ValueId {
        self.emit(Inst::Cast { op, ty, arg })
    }

    pub fn gep(&mut self, pointee: Type, base: ValueId, indices: &[ValueId]) -> ValueId {
        self.emit(Inst::Gep { base, pointee, indices: indices.to_vec() })
    }

    /// `base + offset` in bytes, expressed as a byte-typed GEP.
    pub fn gep_bytes(&mut self, base: ValueId, offset: i64) -> ValueId {
        let idx = self.iconst_signed(64, offset);
        self.gep(Type::I8, base, &[idx])
    }

    pub fn load(&mut self, ty: Type, ptr: ValueId) -> ValueId {
        self.emit(Inst::Load { ty, ptr })
    }

    pub fn store(&mut self, ptr: ValueId, value: ValueId) -> ValueId {
        self.emit(Inst::Store { ptr, value })
    }

    pub fn phi(&mut self, ty: Type, incomings: &[(BlockId, ValueId)]) -> ValueId {
        self.emit(Inst::Phi { ty, incomings: incomings.to_vec() })
    }

    pub fn select(&mut self, cond: ValueId, if_true: ValueId, if_false: ValueId) -> ValueId {
        self.emit(Inst::Select { cond, if_true, if_false })
    }

    pub fn call(&mut self, callee: &str, ty: Type, args: &[ValueId]) -> ValueId {
        self.emit(Inst::Call { callee: callee.to_string(), ty, args: args.to_vec() })
    }

    pub fn memcpy(&mut self, dest: ValueId, src: ValueId, len: ValueId) -> ValueId {
        self.call("llvm.memcpy.p0.p0.i64", Type::Void, &[dest, src, len])
    }

    pub fn memset(&mut self, dest: ValueId, value: ValueId, len: ValueId) -> ValueId {
        self.call("llvm.memset.p0.i64", Type::Void, &[dest, value, len])
    }

    pub fn br(&mut self, dest: BlockId) -> ValueId {
        self.emit(Inst::Br { dest })
    }

    pub fn cond_br(&mut self, cond: ValueId, if_true: BlockId, if_false: BlockId) -> ValueId {
        self.emit(Inst::CondBr { cond, if_true, if_false })
    }

    pub fn switch(&mut self, value: ValueId, default: BlockId, cases: &[(u64, BlockId)]) -> ValueId {
        self.emit(Inst::Switch { value, default, cases: cases.to_vec() })
    }

    pub fn ret(&mut self, value: Option<ValueId>) -> ValueId {
        self.emit(Inst::Ret { value })
    }

    pub fn finish(self) -> Function {
        self.f
    }
}
