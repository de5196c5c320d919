//! Driver surface tests: output handling, overwrite protection and exit
//! codes.

use nanotube_lib::ir::{FunctionBuilder, Module, Type};
use std::fs;
use std::process::Command;

fn bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_nanotube"))
}

fn sample_module() -> Module {
    let mut module = Module::new();
    let mut k = FunctionBuilder::new(
        "echo",
        &[("ctx", Type::Ptr), ("packet", Type::Ptr)],
        Type::I32,
    );
    let entry = k.block("entry");
    k.switch_to(entry);
    let packet = k.param(1);
    let src = k.gep_bytes(packet, 4);
    let _ = k.load(Type::I8, src);
    let pass = k.iconst(32, 0);
    k.ret(Some(pass));
    module.functions.push(k.finish());

    let name = module.add_string_global(".str.echo", "echo");
    let mut s = FunctionBuilder::new("nanotube_setup", &[], Type::Void);
    let entry = s.block("entry");
    s.switch_to(entry);
    let name_ptr = s.global_ref(name);
    let func = s.func_ref("echo");
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
fn compiles_and_writes_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("echo.json");
    fs::write(&input, serde_json::to_string(&sample_module()).unwrap()).unwrap();
    let out = dir.path().join("out");

    let status = bin().arg(&input).arg("-o").arg(&out).status().unwrap();
    assert!(status.success());
    assert!(out.join("echo.out.json").exists());
    assert!(out.join("topology.json").exists());

    let topology = fs::read_to_string(out.join("topology.json")).unwrap();
    assert!(topology.contains("\"echo\""));
}

#[test]
fn refuses_to_clobber_without_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("echo.json");
    fs::write(&input, serde_json::to_string(&sample_module()).unwrap()).unwrap();
    let out = dir.path().join("out");
    fs::create_dir_all(&out).unwrap();

    let status = bin().arg(&input).arg("-o").arg(&out).status().unwrap();
    assert_eq!(status.code(), Some(1));

    let status = bin().arg(&input).arg("-o").arg(&out).arg("--overwrite").status().unwrap();
    assert!(status.success());
}

#[test]
fn diagnostic_failures_exit_nonzero_and_write_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("bad.json");
    // A module without a setup function cannot compile.
    let module = Module::new();
    fs::write(&input, serde_json::to_string(&module).unwrap()).unwrap();
    let out = dir.path().join("out");

    let status = bin().arg(&input).arg("-o").arg(&out).status().unwrap();
    assert_eq!(status.code(), Some(1));
    assert!(!out.exists());
}

#[test]
fn pass_selection_is_validated() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("echo.json");
    fs::write(&input, serde_json::to_string(&sample_module()).unwrap()).unwrap();
    let out = dir.path().join("out");

    let status = bin()
        .arg(&input)
        .arg("-o")
        .arg(&out)
        .arg("--passes")
        .arg("mem2req,bogus")
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));

    let status = bin()
        .arg(&input)
        .arg("-o")
        .arg(&out)
        .arg("--passes")
        .arg("converge,mem2req,optreq,hls")
        .status()
        .unwrap();
    assert!(status.success());
}
