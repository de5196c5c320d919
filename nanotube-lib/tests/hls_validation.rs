//! HLS validation scenarios: the try-read/wait/write protocol, loop
//! detection, and the strict-mode checks.

use nanotube_lib::error::CompileError;
use nanotube_lib::ir::{Function, FunctionBuilder, ICmpPred, Type, ValueId};
use nanotube_lib::passes::hls_validate::{self, HlsValidateOptions};

fn thread_builder(name: &str) -> FunctionBuilder {
    FunctionBuilder::new(name, &[("ctx", Type::Ptr), ("info", Type::Ptr)], Type::Void)
}

fn try_read(b: &mut FunctionBuilder, ctx: ValueId) -> ValueId {
    let id = b.iconst(32, 0);
    let buf = b.alloca_bytes(64);
    let size = b.iconst(64, 64);
    b.call("nanotube_channel_try_read", Type::I32, &[ctx, id, buf, size])
}

fn channel_write(b: &mut FunctionBuilder, ctx: ValueId, data: ValueId) {
    let id = b.iconst(32, 1);
    let size = b.iconst(64, 64);
    b.call("nanotube_channel_write", Type::Void, &[ctx, id, data, size]);
}

fn thread_wait(b: &mut FunctionBuilder, ctx: ValueId) {
    b.call("nanotube_thread_wait", Type::Void, &[ctx]);
}

/// try_read; on failure wait and return, on success write and return.
fn polling_thread(with_wait: bool) -> Function {
    let mut b = thread_builder("poll");
    let entry = b.block("entry");
    let got = b.block("got");
    let idle = b.block("idle");
    b.switch_to(entry);
    let ctx = b.param(0);
    let buf = b.alloca_bytes(64);
    let id = b.iconst(32, 0);
    let size = b.iconst(64, 64);
    let ok = b.call("nanotube_channel_try_read", Type::I32, &[ctx, id, buf, size]);
    let zero = b.iconst(32, 0);
    let failed = b.icmp(ICmpPred::Eq, ok, zero);
    b.cond_br(failed, idle, got);
    b.switch_to(got);
    channel_write(&mut b, ctx, buf);
    b.ret(None);
    b.switch_to(idle);
    if with_wait {
        thread_wait(&mut b, ctx);
    }
    b.ret(None);
    b.finish()
}

#[test]
fn polling_thread_is_accepted() {
    let f = polling_thread(true);
    hls_validate::run(&f, HlsValidateOptions::default()).unwrap();
}

#[test]
fn polling_thread_passes_strict_checks() {
    let f = polling_thread(true);
    let strict = HlsValidateOptions { check_can_return: true, check_read_fail: true };
    hls_validate::run(&f, strict).unwrap();
}

#[test]
fn missing_wait_is_reported_in_strict_mode() {
    let f = polling_thread(false);
    // Default mode tolerates the missing activity (the can_return check
    // is historically disabled).
    hls_validate::run(&f, HlsValidateOptions::default()).unwrap();
    let strict = HlsValidateOptions { check_can_return: true, check_read_fail: false };
    let err = hls_validate::run(&f, strict).unwrap_err();
    assert!(err.to_string().contains("without activity"));
}

#[test]
fn work_after_thread_wait_is_fatal() {
    let mut b = thread_builder("late_write");
    let entry = b.block("entry");
    b.switch_to(entry);
    let ctx = b.param(0);
    let buf = b.alloca_bytes(64);
    thread_wait(&mut b, ctx);
    channel_write(&mut b, ctx, buf);
    b.ret(None);
    let f = b.finish();
    let err = hls_validate::run(&f, HlsValidateOptions::default()).unwrap_err();
    assert!(err.to_string().contains("after call to nanotube_thread_wait"));
}

#[test]
fn double_thread_wait_is_fatal() {
    let mut b = thread_builder("double_wait");
    let entry = b.block("entry");
    b.switch_to(entry);
    let ctx = b.param(0);
    thread_wait(&mut b, ctx);
    thread_wait(&mut b, ctx);
    b.ret(None);
    let f = b.finish();
    let err = hls_validate::run(&f, HlsValidateOptions::default()).unwrap_err();
    assert!(err.to_string().contains("multiple calls"));
}

#[test]
fn wait_after_blocking_write_is_fatal() {
    let mut b = thread_builder("wait_after_write");
    let entry = b.block("entry");
    b.switch_to(entry);
    let ctx = b.param(0);
    let buf = b.alloca_bytes(64);
    channel_write(&mut b, ctx, buf);
    thread_wait(&mut b, ctx);
    b.ret(None);
    let f = b.finish();
    let err = hls_validate::run(&f, HlsValidateOptions::default()).unwrap_err();
    assert!(err.to_string().contains("blocking call"));
}

#[test]
fn loops_are_fatal() {
    let mut b = thread_builder("spin");
    let entry = b.block("entry");
    let body = b.block("body");
    let exit = b.block("exit");
    b.switch_to(entry);
    b.br(body);
    b.switch_to(body);
    let ctx = b.param(0);
    let ok = try_read(&mut b, ctx);
    let zero = b.iconst(32, 0);
    let failed = b.icmp(ICmpPred::Eq, ok, zero);
    b.cond_br(failed, body, exit);
    b.switch_to(exit);
    b.ret(None);
    let f = b.finish();
    let err = hls_validate::run(&f, HlsValidateOptions::default()).unwrap_err();
    assert!(matches!(err, CompileError::HlsValidation { .. }));
    assert!(err.to_string().contains("loop"));
}

#[test]
fn read_fail_edges_feed_the_wait_check() {
    // With the strict read-fail check on, a wait on the success edge is
    // rejected while one on the failure edge passes.
    let mut b = thread_builder("wrong_edge");
    let entry = b.block("entry");
    let got = b.block("got");
    let idle = b.block("idle");
    b.switch_to(entry);
    let ctx = b.param(0);
    let ok = try_read(&mut b, ctx);
    let zero = b.iconst(32, 0);
    let failed = b.icmp(ICmpPred::Eq, ok, zero);
    b.cond_br(failed, idle, got);
    b.switch_to(got);
    // Waiting after a successful read never saw a failure.
    thread_wait(&mut b, ctx);
    b.ret(None);
    b.switch_to(idle);
    thread_wait(&mut b, ctx);
    b.ret(None);
    let f = b.finish();
    let strict = HlsValidateOptions { check_can_return: false, check_read_fail: true };
    let err = hls_validate::run(&f, strict).unwrap_err();
    assert!(err.to_string().contains("read failure"));
    hls_validate::run(&f, HlsValidateOptions::default()).unwrap();
}
