//! Whole-pipeline scenario: a kernel that reads two bytes at offset 16
//! and writes them back at offset 0, compiled end to end.

use nanotube_lib::ir::{Function, FunctionBuilder, Inst, Module, Type, ValueId};
use nanotube_lib::{compile, CompileOptions};

fn calls(f: &Function, name: &str) -> Vec<ValueId> {
    f.blocks
        .iter()
        .flat_map(|b| b.insts.iter().copied())
        .filter(|i| f.call_target(*i) == Some(name))
        .collect()
}

fn build_module() -> Module {
    let mut module = Module::new();

    let mut k = FunctionBuilder::new(
        "reflect_head",
        &[("ctx", Type::Ptr), ("packet", Type::Ptr)],
        Type::I32,
    );
    let entry = k.block("entry");
    k.switch_to(entry);
    let packet = k.param(1);
    let src = k.gep_bytes(packet, 16);
    let v = k.load(Type::I16, src);
    k.store(packet, v);
    let pass = k.iconst(32, 0);
    k.ret(Some(pass));
    module.functions.push(k.finish());

    let name = module.add_string_global(".str.reflect", "reflect_head");
    let mut s = FunctionBuilder::new("nanotube_setup", &[], Type::Void);
    let entry = s.block("entry");
    s.switch_to(entry);
    let name_ptr = s.global_ref(name);
    let func = s.func_ref("reflect_head");
    let bus = s.iconst_signed(32, 1);
    let capsules = s.iconst(32, 0);
    s.call(
        "nanotube_add_plain_packet_kernel",
        Type::Void,
        &[name_ptr, func, bus, capsules],
    );
    s.ret(None);
    module.functions.push(s.finish());
    module
}

#[test]
fn single_read_single_write() {
    let mut module = build_module();
    let output = compile(&mut module, &CompileOptions::default()).unwrap();

    assert_eq!(output.setup.topology.kernels.len(), 1);
    let kernel = &output.setup.topology.kernels[0];
    assert_eq!(kernel.name, "reflect_head");
    assert_eq!(kernel.func, "reflect_head");
    assert_eq!(kernel.bus_type, 1);
    assert!(!kernel.is_capsule);

    let f = module.function_by_name("reflect_head").unwrap();
    let reads = calls(f, "nanotube_packet_read");
    assert_eq!(reads.len(), 1);
    let read_args = f.call_args(reads[0]).unwrap();
    assert_eq!(f.const_int(read_args[2]).unwrap().as_u64(), 16);
    assert_eq!(f.const_int(read_args[3]).unwrap().as_u64(), 2);

    let writes = calls(f, "nanotube_packet_write_masked");
    assert_eq!(writes.len(), 1);
    let write_args = f.call_args(writes[0]).unwrap();
    assert_eq!(f.const_int(write_args[3]).unwrap().as_u64(), 0);
    assert_eq!(f.const_int(write_args[4]).unwrap().as_u64(), 2);

    // The write mask is the minimal two-bit pattern.
    let mask_bytes: Vec<u64> = f
        .blocks
        .iter()
        .flat_map(|b| b.insts.iter())
        .filter_map(|i| match f.inst(*i) {
            Some(Inst::Store { value, .. }) => f.const_int(*value),
            _ => None,
        })
        .filter(|c| c.bits() == 8)
        .map(|c| c.as_u64())
        .collect();
    assert_eq!(mask_bytes, vec![0b11]);

    // Metrics are reported for the kernel.
    assert_eq!(output.kernel_metrics.len(), 1);
    assert!(output.kernel_metrics[0].1.total_weight > 0);
}

#[test]
fn module_round_trips_through_json() {
    let module = build_module();
    let json = serde_json::to_string(&module).unwrap();
    let back: Module = serde_json::from_str(&json).unwrap();
    let mut a = module;
    let mut b = back;
    let out_a = compile(&mut a, &CompileOptions::default()).unwrap();
    let out_b = compile(&mut b, &CompileOptions::default()).unwrap();
    assert_eq!(
        serde_json::to_string(&out_a.setup.topology).unwrap(),
        serde_json::to_string(&out_b.setup.topology).unwrap()
    );
    assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
}
