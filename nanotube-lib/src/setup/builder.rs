use super::memory::{AllocSource, SetupMemory};
use super::topology::{
    ChannelExportType, ChannelInfo, ContextInfo, KernelInfo, MapInfo, MapType, Topology,
    CHANNEL_ATTR_SIDEBAND_BYTES, CHANNEL_ATTR_SIDEBAND_SIGNALS,
};
use super::value::SetupValue;
use super::SETUP_FUNCTION_NAME;
use crate::error::{CompileError, Result};
use crate::intrinsics::args::{
    AddPlainPacketKernelArgs, ChannelCreateArgs, ChannelExportArgs, ChannelFlags,
    ChannelSetAttrArgs, ContextAddChannelArgs, ContextAddMapArgs, MallocArgs, MapCreateArgs,
    ThreadCreateArgs,
};
use crate::intrinsics::{get_intrinsic, intrinsic_is_nop, intrinsic_to_string, Intrinsic};
use crate::ir::{
    BinOp, BlockId, CastOp, Constant, DataLayout, Function, GlobalId, GlobalInit, ICmpPred,
    IntValue, Inst, Module, Type, ValueDef, ValueId,
};
use ahash::{AHashMap, AHashSet};
use tracing::{debug, warn};

/// Observer invoked for each recognised setup event; used by the topology
/// printer and by tests.  All hooks default to doing nothing.
#[allow(unused_variables)]
pub trait SetupTracer {
    fn process_alloca(&mut self, insn: ValueId, num_elem: &SetupValue, alloc: u64) {}
    fn process_malloc(&mut self, insn: ValueId, size: &SetupValue, alloc: u64) {}
    fn process_memcpy(&mut self, insn: ValueId, dest: &SetupValue, src: &SetupValue, size: &SetupValue) {}
    fn process_memset(&mut self, insn: ValueId, dest: &SetupValue, value: &SetupValue, size: &SetupValue) {}
    fn process_store(&mut self, insn: ValueId, ptr: &SetupValue, value: &SetupValue) {}
    fn process_channel_create(&mut self, insn: ValueId, info: &ChannelInfo) {}
    fn process_channel_set_attr(&mut self, insn: ValueId, channel: u32, attr_id: u32, attr_val: i32) {}
    fn process_channel_export(&mut self, insn: ValueId, channel: u32, export_type: ChannelExportType, flags: ChannelFlags) {}
    fn process_context_create(&mut self, insn: ValueId, info: &ContextInfo) {}
    fn process_context_add_channel(&mut self, insn: ValueId, context: u32, channel_id: u32, channel: u32, flags: ChannelFlags) {}
    fn process_thread_create(&mut self, insn: ValueId, context: u32, info: &super::topology::ThreadInfo) {}
    fn process_map_create(&mut self, insn: ValueId, info: &MapInfo) {}
    fn process_context_add_map(&mut self, insn: ValueId, context: u32, map: u32) {}
    fn process_add_plain_kernel(&mut self, insn: ValueId, info: &KernelInfo) {}
}

struct NullTracer;
impl SetupTracer for NullTracer {}

/// The interpreted setup function: topology plus final memory image.
#[derive(Debug)]
pub struct SetupFunc {
    pub topology: Topology,
    pub memory: SetupMemory,
}

impl SetupFunc {
    /// Interpret `nanotube_setup` in `module`.  `strict` rejects calls
    /// that must not appear before tap lowering.
    pub fn interpret(module: &Module, strict: bool) -> Result<SetupFunc> {
        Self::interpret_traced(module, strict, &mut NullTracer)
    }

    pub fn interpret_traced(
        module: &Module,
        strict: bool,
        tracer: &mut dyn SetupTracer,
    ) -> Result<SetupFunc> {
        let func = module
            .function_by_name(SETUP_FUNCTION_NAME)
            .ok_or_else(|| CompileError::MissingFunction(SETUP_FUNCTION_NAME.to_string()))?;
        let mut interp = Interpreter {
            module,
            f: func,
            dl: DataLayout,
            strict,
            values: AHashMap::new(),
            global_allocs: AHashMap::new(),
            warned: AHashSet::new(),
            memory: SetupMemory::new(),
            topology: Topology::default(),
            prev_block: None,
        };
        interp.run(tracer)?;
        Ok(SetupFunc { topology: interp.topology, memory: interp.memory })
    }
}

struct Interpreter<'m> {
    module: &'m Module,
    f: &'m Function,
    dl: DataLayout,
    strict: bool,
    values: AHashMap<ValueId, SetupValue>,
    global_allocs: AHashMap<GlobalId, u64>,
    warned: AHashSet<Intrinsic>,
    memory: SetupMemory,
    topology: Topology,
    prev_block: Option<BlockId>,
}

impl<'m> Interpreter<'m> {
    fn run(&mut self, tracer: &mut dyn SetupTracer) -> Result<()> {
        let mut block = self.f.entry();
        let mut idx = 0usize;
        loop {
            let insts = &self.f.block(block).insts;
            let inst_id = *insts.get(idx).ok_or_else(|| {
                CompileError::setup(format!(
                    "block '{}' of the setup function has no terminator",
                    self.f.block(block).name
                ))
            })?;
            let inst = self
                .f
                .inst(inst_id)
                .ok_or_else(|| CompileError::setup("block contains a non-instruction"))?
                .clone();
            debug!(inst = %self.f.display_value(inst_id), "setup step");
            match inst {
                Inst::Ret { .. } => return Ok(()),
                Inst::Br { dest } => {
                    self.prev_block = Some(block);
                    block = dest;
                    idx = 0;
                    continue;
                }
                Inst::CondBr { cond, if_true, if_false } => {
                    let cond_val = self.eval(cond);
                    let taken = match cond_val.as_int() {
                        Some(v) => !v.is_zero(),
                        None => {
                            return Err(CompileError::setup(format!(
                                "could not evaluate branch condition {} of {}",
                                cond_val,
                                self.f.display_value(inst_id)
                            )))
                        }
                    };
                    self.prev_block = Some(block);
                    block = if taken { if_true } else { if_false };
                    idx = 0;
                    continue;
                }
                Inst::Alloca { ref elem, count } => self.process_alloca(inst_id, elem, count, tracer)?,
                Inst::Binary { op, lhs, rhs, ref ty } => {
                    self.process_binop(inst_id, op, lhs, rhs, ty)?
                }
                Inst::Cast { op, arg, ref ty } => self.process_cast(inst_id, op, arg, ty)?,
                Inst::ICmp { pred, lhs, rhs } => self.process_icmp(inst_id, pred, lhs, rhs),
                Inst::Gep { base, ref pointee, ref indices } => {
                    self.process_gep(inst_id, base, pointee, indices)?
                }
                Inst::Load { ref ty, ptr } => self.process_load(inst_id, ty, ptr)?,
                Inst::Phi { ref incomings, .. } => self.process_phi(inst_id, incomings)?,
                Inst::Select { cond, if_true, if_false } => {
                    self.process_select(inst_id, cond, if_true, if_false)?
                }
                Inst::Store { ptr, value } => self.process_store(inst_id, ptr, value, tracer)?,
                Inst::Call { .. } => self.process_call(inst_id, tracer)?,
                Inst::Switch { .. } => {
                    return Err(CompileError::setup(format!(
                        "cannot handle opcode 'switch' in the setup function: {}",
                        self.f.display_value(inst_id)
                    )))
                }
            }
            idx += 1;
        }
    }

    fn set_value(&mut self, inst: ValueId, value: SetupValue) {
        debug!(inst = %inst, %value, "setup value");
        self.values.insert(inst, value);
    }

    fn eval(&mut self, v: ValueId) -> SetupValue {
        match self.f.value(v) {
            ValueDef::Inst(_) => self.values.get(&v).copied().unwrap_or(SetupValue::Unknown),
            ValueDef::Param { .. } => SetupValue::Unknown,
            ValueDef::Const(c) => match c {
                Constant::Int(i) => SetupValue::Int(*i),
                Constant::NullPtr => SetupValue::Ptr(0),
                Constant::Undef(_) => SetupValue::Undefined,
                Constant::Global(g) => SetupValue::Ptr(self.global_base(*g)),
                Constant::FuncRef(_) => SetupValue::Unknown,
            },
        }
    }

    /// Allocation base for a global, created and initialised on first use.
    fn global_base(&mut self, g: GlobalId) -> u64 {
        if let Some(base) = self.global_allocs.get(&g) {
            return *base;
        }
        let global = self.module.global(g);
        let size = self.dl.store_size(&global.ty).max(1);
        let base = self.memory.alloc(size, AllocSource::Global(g));
        self.global_allocs.insert(g, base);
        match &global.init {
            Some(GlobalInit::Bytes(bytes)) => {
                for (i, byte) in bytes.iter().enumerate() {
                    self.memory.store(
                        base + i as u64,
                        1,
                        SetupValue::Int(IntValue::from_u64(8, *byte as u64)),
                    );
                }
            }
            Some(GlobalInit::Int(v)) => {
                let bytes = (v.bits() as u64 + 7) / 8;
                self.memory.store(base, bytes, SetupValue::Int(*v));
            }
            Some(GlobalInit::Zero) => self.memory.memset(base, size, 0),
            None => {}
        }
        base
    }

    fn process_alloca(
        &mut self,
        inst: ValueId,
        elem: &Type,
        count: ValueId,
        tracer: &mut dyn SetupTracer,
    ) -> Result<()> {
        let num_elem = self.eval(count);
        let n = num_elem.as_int().ok_or_else(|| {
            CompileError::setup(format!(
                "allocation has non-constant size: {}",
                self.f.display_value(inst)
            ))
        })?;
        let size = self.dl.alloc_size(elem) * n.as_u64();
        let base = self.memory.alloc(size, AllocSource::Inst(inst));
        debug!(size, base, "alloca");
        self.set_value(inst, SetupValue::Ptr(base));
        tracer.process_alloca(inst, &num_elem, base);
        Ok(())
    }

    fn process_binop(
        &mut self,
        inst: ValueId,
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
        ty: &Type,
    ) -> Result<()> {
        let a = self.eval(lhs);
        let b = self.eval(rhs);
        if !ty.is_integer() {
            self.set_value(inst, SetupValue::Unknown);
            return Ok(());
        }
        let (a, b) = match (a.as_int(), b.as_int()) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                self.set_value(inst, SetupValue::Unknown);
                return Ok(());
            }
        };
        let result = match op {
            BinOp::Add => a.add(&b),
            BinOp::And => a.and(&b),
            BinOp::AShr => a.ashr(&b),
            BinOp::LShr => a.lshr(&b),
            BinOp::Or => a.or(&b),
            BinOp::Shl => a.shl(&b),
            BinOp::Sub => a.sub(&b),
            BinOp::Mul | BinOp::UDiv | BinOp::SDiv | BinOp::Xor => {
                return Err(CompileError::setup(format!(
                    "cannot handle opcode '{op:?}' in the setup function: {}",
                    self.f.display_value(inst)
                )))
            }
        };
        self.set_value(inst, SetupValue::Int(result));
        Ok(())
    }

    fn process_cast(&mut self, inst: ValueId, op: CastOp, arg: ValueId, ty: &Type) -> Result<()> {
        let v = self.eval(arg);
        match op {
            CastOp::Bitcast => {
                self.set_value(inst, v);
                return Ok(());
            }
            CastOp::SExt | CastOp::ZExt | CastOp::Trunc => {}
            CastOp::PtrToInt | CastOp::IntToPtr => {
                return Err(CompileError::setup(format!(
                    "cannot handle opcode '{op:?}' in the setup function: {}",
                    self.f.display_value(inst)
                )))
            }
        }
        let (int, bits) = match (v.as_int(), ty.int_bits()) {
            (Some(i), Some(bits)) => (i, bits),
            _ => {
                self.set_value(inst, SetupValue::Unknown);
                return Ok(());
            }
        };
        let result = match op {
            CastOp::SExt => int.sext(bits),
            CastOp::ZExt => int.zext(bits),
            CastOp::Trunc => int.trunc(bits),
            _ => unreachable!(),
        };
        self.set_value(inst, SetupValue::Int(result));
        Ok(())
    }

    fn process_icmp(&mut self, inst: ValueId, pred: ICmpPred, lhs: ValueId, rhs: ValueId) {
        let (a, b) = match (self.eval(lhs).as_int(), self.eval(rhs).as_int()) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                self.set_value(inst, SetupValue::Unknown);
                return;
            }
        };
        let result = match pred {
            ICmpPred::Eq => a == b,
            ICmpPred::Ne => a != b,
            ICmpPred::Ult => a.ult(&b),
            ICmpPred::Ule => a.ule(&b),
            ICmpPred::Ugt => b.ult(&a),
            ICmpPred::Uge => b.ule(&a),
            ICmpPred::Slt => a.slt(&b),
            ICmpPred::Sle => a.sle(&b),
            ICmpPred::Sgt => b.slt(&a),
            ICmpPred::Sge => b.sle(&a),
        };
        self.set_value(inst, SetupValue::Int(IntValue::bool_value(result)));
    }

    fn process_gep(
        &mut self,
        inst: ValueId,
        base: ValueId,
        pointee: &Type,
        indices: &[ValueId],
    ) -> Result<()> {
        let base_val = self.eval(base);
        let mut ptr = base_val.as_ptr().ok_or_else(|| {
            CompileError::setup(format!(
                "cannot perform GEP on a non-pointer: {}",
                self.f.display_value(inst)
            ))
        })?;
        let mut ty = pointee.clone();
        for (i, idx) in indices.iter().enumerate() {
            let idx_val = self.eval(*idx).as_int().ok_or_else(|| {
                CompileError::setup(format!(
                    "GEP operand is not an integer in {}",
                    self.f.display_value(inst)
                ))
            })?;
            if i == 0 {
                ptr = ptr.wrapping_add(
                    (self.dl.alloc_size(&ty) as i64).wrapping_mul(idx_val.as_i64()) as u64,
                );
                continue;
            }
            match ty {
                Type::Struct { fields } => {
                    let layout = self.dl.struct_layout(&fields);
                    let field = idx_val.as_u64() as usize;
                    ptr += layout.offsets[field];
                    ty = fields[field].clone();
                }
                Type::Array { elem, .. } => {
                    ptr = ptr.wrapping_add(
                        (self.dl.alloc_size(&elem) as i64).wrapping_mul(idx_val.as_i64()) as u64,
                    );
                    ty = *elem;
                }
                _ => {
                    return Err(CompileError::setup(format!(
                        "GEP index into scalar type in {}",
                        self.f.display_value(inst)
                    )))
                }
            }
        }
        self.set_value(inst, SetupValue::Ptr(ptr));
        Ok(())
    }

    fn process_load(&mut self, inst: ValueId, ty: &Type, ptr: ValueId) -> Result<()> {
        let addr = self.eval(ptr).as_ptr().ok_or_else(|| {
            CompileError::setup(format!(
                "cannot handle load through non-pointer '{}'",
                self.f.display_value(ptr)
            ))
        })?;
        let result = match ty {
            Type::Int(bits) => {
                let size = (*bits as u64 + 7) / 8;
                match self.memory.try_load_int(addr, size) {
                    Some(raw) => SetupValue::Int(IntValue::new(*bits, raw)),
                    None => SetupValue::Unknown,
                }
            }
            Type::Ptr => self.memory.try_load_slot(addr),
            _ => SetupValue::Unknown,
        };
        self.set_value(inst, result);
        Ok(())
    }

    fn process_phi(&mut self, inst: ValueId, incomings: &[(BlockId, ValueId)]) -> Result<()> {
        let prev = self.prev_block.ok_or_else(|| {
            CompileError::setup("PHI node in the entry block of the setup function")
        })?;
        let incoming = incomings
            .iter()
            .find(|(b, _)| *b == prev)
            .map(|(_, v)| *v)
            .ok_or_else(|| {
                CompileError::setup(format!(
                    "PHI {} has no incoming value for the executed predecessor",
                    self.f.display_value(inst)
                ))
            })?;
        let value = self.eval(incoming);
        self.set_value(inst, value);
        Ok(())
    }

    fn process_select(
        &mut self,
        inst: ValueId,
        cond: ValueId,
        if_true: ValueId,
        if_false: ValueId,
    ) -> Result<()> {
        let c = self.eval(cond).as_int().ok_or_else(|| {
            CompileError::setup(format!(
                "cannot handle select on non-integer '{}'",
                self.f.display_value(cond)
            ))
        })?;
        let chosen = if c.is_zero() { if_false } else { if_true };
        let value = self.eval(chosen);
        self.set_value(inst, value);
        Ok(())
    }

    fn process_store(
        &mut self,
        inst: ValueId,
        ptr: ValueId,
        value: ValueId,
        tracer: &mut dyn SetupTracer,
    ) -> Result<()> {
        let ptr_val = self.eval(ptr);
        let data = self.eval(value);
        let addr = ptr_val.as_ptr().ok_or_else(|| {
            CompileError::setup(format!(
                "cannot handle store through non-pointer '{}'",
                self.f.display_value(ptr)
            ))
        })?;
        let size = self.dl.store_size(&self.f.result_type(value));
        self.memory.store(addr, size, data);
        tracer.process_store(inst, &ptr_val, &data);
        Ok(())
    }

    fn process_call(&mut self, inst: ValueId, tracer: &mut dyn SetupTracer) -> Result<()> {
        let iid = get_intrinsic(self.f, inst);
        match iid {
            Intrinsic::LlvmMemcpy => self.process_memcpy(inst, tracer),
            Intrinsic::LlvmMemset => self.process_memset(inst, tracer),
            Intrinsic::Malloc => self.process_malloc(inst, tracer),
            Intrinsic::ContextCreate => {
                let index = self.topology.contexts.len() as u32;
                self.topology.contexts.push(ContextInfo::new(index));
                tracer.process_context_create(inst, &self.topology.contexts[index as usize]);
                self.set_value(inst, SetupValue::Context(index));
                Ok(())
            }
            Intrinsic::ContextAddChannel => self.process_context_add_channel(inst, tracer),
            Intrinsic::ChannelCreate => self.process_channel_create(inst, tracer),
            Intrinsic::ChannelSetAttr => self.process_channel_set_attr(inst, tracer),
            Intrinsic::ChannelExport => self.process_channel_export(inst, tracer),
            Intrinsic::ThreadCreate => self.process_thread_create(inst, tracer),
            Intrinsic::AddPlainPacketKernel => self.process_add_plain_kernel(inst, tracer),
            Intrinsic::MapCreate => self.process_map_create(inst, tracer),
            Intrinsic::ContextAddMap => self.process_context_add_map(inst, tracer),
            Intrinsic::TapPacketResizeIngressStateInit
            | Intrinsic::TapPacketResizeEgressStateInit
            | Intrinsic::TapMapCreate
            | Intrinsic::TapMapAddClient
            | Intrinsic::TapMapBuild => {
                if self.strict {
                    return Err(CompileError::setup(format!(
                        "intrinsic \"{}\" is invalid in the strict setup function parser: {}",
                        intrinsic_to_string(iid),
                        self.f.display_value(inst)
                    )));
                }
                if self.warned.insert(iid) {
                    warn!(
                        intrinsic = intrinsic_to_string(iid),
                        "ignoring call in non-strict setup parsing"
                    );
                }
                Ok(())
            }
            Intrinsic::None => Err(CompileError::setup(format!(
                "invalid call to {} in setup function",
                self.f.display_value(inst)
            ))),
            other if intrinsic_is_nop(other) => Ok(()),
            other => Err(CompileError::setup(format!(
                "invalid intrinsic \"{}\" in setup function: {}",
                intrinsic_to_string(other),
                self.f.display_value(inst)
            ))),
        }
    }

    fn process_memcpy(&mut self, inst: ValueId, tracer: &mut dyn SetupTracer) -> Result<()> {
        let args = self.f.call_args(inst).expect("not a call").to_vec();
        let dest = self.eval(args[0]);
        let src = self.eval(args[1]);
        let size = self.eval(args[2]);
        let (d, s, n) = match (dest.as_ptr(), src.as_ptr(), size.as_int()) {
            (Some(d), Some(s), Some(n)) => (d, s, n),
            _ => {
                return Err(CompileError::setup(format!(
                    "invalid memcpy operands in {}",
                    self.f.display_value(inst)
                )))
            }
        };
        self.memory.memcpy(d, s, n.as_u64());
        tracer.process_memcpy(inst, &dest, &src, &size);
        Ok(())
    }

    fn process_memset(&mut self, inst: ValueId, tracer: &mut dyn SetupTracer) -> Result<()> {
        let args = self.f.call_args(inst).expect("not a call").to_vec();
        let dest = self.eval(args[0]);
        let value = self.eval(args[1]);
        let size = self.eval(args[2]);
        let (d, v, n) = match (dest.as_ptr(), value.as_int(), size.as_int()) {
            (Some(d), Some(v), Some(n)) => (d, v, n),
            _ => {
                return Err(CompileError::setup(format!(
                    "invalid memset operands in {}",
                    self.f.display_value(inst)
                )))
            }
        };
        self.memory.memset(d, n.as_u64(), v.as_u64() as u8);
        tracer.process_memset(inst, &dest, &value, &size);
        Ok(())
    }

    fn process_malloc(&mut self, inst: ValueId, tracer: &mut dyn SetupTracer) -> Result<()> {
        let args = MallocArgs::decode(self.f, inst)?;
        let size_val = self.eval(args.size);
        let size = size_val.as_int().ok_or_else(|| {
            CompileError::setup(format!(
                "size operand is not a constant int in {}",
                self.f.display_value(inst)
            ))
        })?;
        let base = self.memory.alloc(size.as_u64(), AllocSource::Inst(inst));
        tracer.process_malloc(inst, &size_val, base);
        self.set_value(inst, SetupValue::Ptr(base));
        Ok(())
    }

    fn process_channel_create(&mut self, inst: ValueId, tracer: &mut dyn SetupTracer) -> Result<()> {
        let args = ChannelCreateArgs::decode(self.module, self.f, inst)?;
        let elem_size = self.require_int(args.elem_size, inst)?;
        let num_elem = self.require_int(args.num_elem, inst)?;
        let index = self.topology.channels.len() as u32;
        self.topology.channels.push(ChannelInfo {
            index,
            name: args.name,
            elem_size: elem_size as u32,
            num_elem: num_elem as u32,
            sideband_size: 0,
            sideband_signals_size: 0,
            writer_context: None,
            writer_port: None,
            reader_context: None,
            reader_port: None,
            write_export_type: ChannelExportType::None,
            read_export_type: ChannelExportType::None,
            creator: Some(inst),
        });
        tracer.process_channel_create(inst, &self.topology.channels[index as usize]);
        self.set_value(inst, SetupValue::Channel(index));
        Ok(())
    }

    fn process_channel_set_attr(&mut self, inst: ValueId, tracer: &mut dyn SetupTracer) -> Result<()> {
        let args = ChannelSetAttrArgs::decode(self.f, inst)?;
        let channel = self.require_channel(args.channel, inst)?;
        let info = &mut self.topology.channels[channel as usize];
        match args.attr_id {
            CHANNEL_ATTR_SIDEBAND_BYTES => info.sideband_size = args.attr_val as u32,
            CHANNEL_ATTR_SIDEBAND_SIGNALS => info.sideband_signals_size = args.attr_val as u32,
            other => {
                return Err(CompileError::setup(format!(
                    "unknown channel attribute {other} in {}",
                    self.f.display_value(inst)
                )))
            }
        }
        tracer.process_channel_set_attr(inst, channel, args.attr_id, args.attr_val);
        Ok(())
    }

    fn process_channel_export(&mut self, inst: ValueId, tracer: &mut dyn SetupTracer) -> Result<()> {
        let args = ChannelExportArgs::decode(self.f, inst)?;
        let channel = self.require_channel(args.channel, inst)?;
        let export_type = ChannelExportType::from_raw(args.export_type).ok_or_else(|| {
            CompileError::setup(format!(
                "unknown channel export type {} in {}",
                args.export_type,
                self.f.display_value(inst)
            ))
        })?;
        let info = &mut self.topology.channels[channel as usize];
        if args.flags.contains(ChannelFlags::WRITE) {
            info.write_export_type = export_type;
        }
        if args.flags.contains(ChannelFlags::READ) {
            info.read_export_type = export_type;
        }
        tracer.process_channel_export(inst, channel, export_type, args.flags);
        Ok(())
    }

    fn process_context_add_channel(
        &mut self,
        inst: ValueId,
        tracer: &mut dyn SetupTracer,
    ) -> Result<()> {
        let args = ContextAddChannelArgs::decode(self.f, inst)?;
        let channel_id = self.require_int(args.channel_id, inst)? as u32;
        let context = self.eval(args.context).as_context().ok_or_else(|| {
            CompileError::setup(format!(
                "could not find context for nanotube_context_add_channel {}",
                self.f.display_value(inst)
            ))
        })?;
        let channel = self.require_channel(args.channel, inst)?;
        let is_read = match (args.flags.contains(ChannelFlags::READ),
                             args.flags.contains(ChannelFlags::WRITE)) {
            (true, false) => true,
            (false, true) => false,
            _ => {
                return Err(CompileError::setup(format!(
                    "exactly one of READ and WRITE must be set in {}",
                    self.f.display_value(inst)
                )))
            }
        };
        let port = self.topology.contexts[context as usize]
            .add_port(channel, channel_id, is_read)?;
        let info = &mut self.topology.channels[channel as usize];
        if is_read {
            info.set_reader(context, port)?;
        } else {
            info.set_writer(context, port)?;
        }
        tracer.process_context_add_channel(inst, context, channel_id, channel, args.flags);
        Ok(())
    }

    fn process_thread_create(&mut self, inst: ValueId, tracer: &mut dyn SetupTracer) -> Result<()> {
        let args = ThreadCreateArgs::decode(self.module, self.f, inst)?;
        let context = self.eval(args.context).as_context().ok_or_else(|| {
            CompileError::setup(format!("failed to find context for thread '{}'", args.name))
        })?;
        let thread_id = self.topology.threads.len() as u32;
        let cinfo = &mut self.topology.contexts[context as usize];
        if let Some(prev) = cinfo.thread_id {
            return Err(CompileError::ContextRebound {
                first: self.topology.threads[prev as usize].name.clone(),
                second: args.name,
            });
        }
        cinfo.thread_id = Some(thread_id);
        self.topology.threads.push(super::topology::ThreadInfo {
            index: thread_id,
            name: args.name,
            func: args.func,
            context_index: context,
            info_area_size: args.info_area_size,
            creator: Some(inst),
        });
        tracer.process_thread_create(inst, context, &self.topology.threads[thread_id as usize]);
        Ok(())
    }

    fn process_add_plain_kernel(&mut self, inst: ValueId, tracer: &mut dyn SetupTracer) -> Result<()> {
        let args = AddPlainPacketKernelArgs::decode(self.module, self.f, inst)?;
        let index = self.topology.kernels.len() as u32;
        self.topology.kernels.push(KernelInfo {
            index,
            name: args.name,
            func: args.func,
            bus_type: args.bus_type,
            is_capsule: args.is_capsule,
            creator: Some(inst),
        });
        tracer.process_add_plain_kernel(inst, &self.topology.kernels[index as usize]);
        Ok(())
    }

    fn process_map_create(&mut self, inst: ValueId, tracer: &mut dyn SetupTracer) -> Result<()> {
        let args = MapCreateArgs::decode(self.f, inst)?;
        let key_size = self.require_int(args.key_sz, inst)?;
        let value_size = self.require_int(args.value_sz, inst)?;
        let index = self.topology.maps.len() as u32;
        self.topology.maps.push(MapInfo {
            index,
            map_id: args.id,
            map_type: MapType::from_raw(args.map_type),
            key_size,
            value_size,
            context_index: None,
            creator: Some(inst),
        });
        tracer.process_map_create(inst, &self.topology.maps[index as usize]);
        self.set_value(inst, SetupValue::Map(index));
        Ok(())
    }

    fn process_context_add_map(&mut self, inst: ValueId, tracer: &mut dyn SetupTracer) -> Result<()> {
        let args = ContextAddMapArgs::decode(self.f, inst)?;
        let context = self.eval(args.context).as_context().ok_or_else(|| {
            CompileError::setup(format!(
                "could not find context for nanotube_context_add_map {}",
                self.f.display_value(inst)
            ))
        })?;
        let map = self.eval(args.map).as_map().ok_or_else(|| {
            CompileError::setup(format!(
                "could not find map for nanotube_context_add_map {}",
                self.f.display_value(inst)
            ))
        })?;
        let user_id = self.topology.maps[map as usize].map_id;
        self.topology.contexts[context as usize].add_map(user_id, map)?;
        self.topology.maps[map as usize].context_index = Some(context);
        tracer.process_context_add_map(inst, context, map);
        Ok(())
    }

    fn require_int(&mut self, v: ValueId, call: ValueId) -> Result<u64> {
        self.eval(v).as_int().map(|i| i.as_u64()).ok_or_else(|| {
            CompileError::setup(format!(
                "operand {} of {} is not a constant integer",
                self.f.display_value(v),
                self.f.display_value(call)
            ))
        })
    }

    fn require_channel(&mut self, v: ValueId, call: ValueId) -> Result<u32> {
        self.eval(v).as_channel().ok_or_else(|| {
            CompileError::setup(format!(
                "could not find channel for {}",
                self.f.display_value(call)
            ))
        })
    }
}
