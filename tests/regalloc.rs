//! Linear-scan allocation: register assignment, loop liveness and spilling.

use bumpalo::Bump;
use xjit::core::{
    ArchId, ArchRegistry, CompileContext, Const, CpuWidth, Expr, Func, Kind, LinearScan,
    Location, Op, Signature, Stmt,
};
use xjit::x64::{ALLOCATABLE, CALLEE_SAVED, RBX, RSP};

/// Function keeping `n` values live until a final sum is returned.
fn pressure(n: usize) -> Func {
    let mut f = Func::new("pressure", Signature::new(&[], &[Kind::Int64]));
    let regs: Vec<Expr> = (0..n).map(|_| Expr::Reg(f.new_reg(Kind::Int64))).collect();
    for (i, r) in regs.iter().enumerate() {
        let value = Const::int64(i as i64 + 1).into();
        f.add_expr(Expr::assign(r.clone(), value).unwrap()).unwrap();
    }
    let sum = regs
        .iter()
        .cloned()
        .reduce(|acc, r| Expr::binary(Op::Add, acc, r).unwrap())
        .unwrap();
    f.add_expr(Expr::ret(vec![sum]).unwrap()).unwrap();
    f
}

#[test]
fn test_registers_follow_arch_order() {
    let registry = ArchRegistry::with_builtin();
    let arch = registry.get(ArchId::AMD64).unwrap();
    let compiled = pressure(3).compile().unwrap();
    let arena = Bump::new();
    let alloc = LinearScan::for_arch(arch).unwrap().allocate(&compiled, &arena).unwrap();

    for (i, id) in (0x100..0x103).enumerate() {
        assert_eq!(alloc.get(id).unwrap(), Location::Reg(ALLOCATABLE[i]));
    }
    assert_eq!(alloc.frame_size(), 0);
}

#[test]
fn test_pressure_spills_to_stack() {
    let _ = env_logger::builder().is_test(true).try_init();

    let registry = ArchRegistry::with_builtin();
    let arch = registry.get(ArchId::AMD64).unwrap();
    let n = ALLOCATABLE.len() + 1;
    let compiled = pressure(n).compile().unwrap();
    let arena = Bump::new();
    let alloc = LinearScan::for_arch(arch).unwrap().allocate(&compiled, &arena).unwrap();

    let mut in_regs = Vec::new();
    let mut on_stack = Vec::new();
    for (id, loc) in alloc.iter() {
        match loc {
            Location::Reg(r) => {
                assert!(!in_regs.contains(&r), "{r} assigned twice");
                in_regs.push(r);
            }
            Location::Stack { base, offset } => {
                assert_eq!(base, RSP);
                assert_eq!(offset % 8, 0);
                on_stack.push(id);
            }
        }
    }
    assert_eq!(in_regs.len(), ALLOCATABLE.len());
    assert_eq!(on_stack.len(), 1);
    assert_eq!(alloc.frame_size(), 16);

    // the spilled value is reachable through a stack operand after lowering
    let ctx = CompileContext::new(CpuWidth::W64);
    let lowered = compiled.to_arch(&registry, &ctx, ArchId::AMD64, &alloc).unwrap();
    let asm = lowered.assemble(&registry).unwrap();
    let bytes = asm.bytes();
    // push rbx; push r12..r15; sub rsp,16
    let prologue = [
        0x53, 0x41, 0x54, 0x41, 0x55, 0x41, 0x56, 0x41, 0x57, 0x48, 0x83, 0xEC, 0x10,
    ];
    assert_eq!(&bytes[..prologue.len()], &prologue);
    // add rsp,16; pop r15..r12; pop rbx; ret
    let epilogue = [
        0x48, 0x83, 0xC4, 0x10, 0x41, 0x5F, 0x41, 0x5E, 0x41, 0x5D, 0x41, 0x5C, 0x5B, 0xC3,
    ];
    assert_eq!(&bytes[bytes.len() - epilogue.len()..], &epilogue);
}

/// `n` values computed before a call to `g` and summed after it.
fn around_call(n: usize) -> Func {
    let mut f = Func::new("around", Signature::new(&[], &[Kind::Int64]));
    let regs: Vec<Expr> = (0..n).map(|_| Expr::Reg(f.new_reg(Kind::Int64))).collect();
    for (i, r) in regs.iter().enumerate() {
        let value = Const::int64(i as i64 + 1).into();
        f.add_expr(Expr::assign(r.clone(), value).unwrap()).unwrap();
    }
    let g = f.named_label("g");
    f.add_expr(Expr::call(g, Some("g"), Signature::new(&[], &[]), vec![]).unwrap())
        .unwrap();
    let sum = regs
        .iter()
        .cloned()
        .reduce(|acc, r| Expr::binary(Op::Add, acc, r).unwrap())
        .unwrap();
    f.add_expr(Expr::ret(vec![sum]).unwrap()).unwrap();
    f
}

#[test]
fn test_value_live_across_call_is_preserved() {
    let _ = env_logger::builder().is_test(true).try_init();

    let registry = ArchRegistry::with_builtin();
    let arch = registry.get(ArchId::AMD64).unwrap();
    let compiled = around_call(1).compile().unwrap();
    let arena = Bump::new();
    let alloc = LinearScan::for_arch(arch).unwrap().allocate(&compiled, &arena).unwrap();
    assert_eq!(alloc.get(0x100).unwrap(), Location::Reg(RBX));

    // rbx belongs to the caller: saved on entry, restored before ret
    let ctx = CompileContext::new(CpuWidth::W64);
    let lowered = compiled.to_arch(&registry, &ctx, ArchId::AMD64, &alloc).unwrap();
    let code = lowered.code();
    assert_eq!(code[0].op(), Some(Op::Push));
    assert_eq!(code[code.len() - 2].op(), Some(Op::Pop));
    assert_eq!(code[code.len() - 1].op(), Some(Op::Ret));
    // one push and the return address leave rsp aligned
    assert_eq!(lowered.frame_size(), 0);
}

#[test]
fn test_values_across_call_never_use_caller_saved() {
    let registry = ArchRegistry::with_builtin();
    let arch = registry.get(ArchId::AMD64).unwrap();
    let n = CALLEE_SAVED.len() + 2;
    let compiled = around_call(n).compile().unwrap();
    let arena = Bump::new();
    let alloc = LinearScan::for_arch(arch).unwrap().allocate(&compiled, &arena).unwrap();

    let mut in_regs = 0;
    let mut on_stack = 0;
    for (_, loc) in alloc.iter() {
        match loc {
            Location::Reg(r) => {
                assert!(CALLEE_SAVED.contains(&r), "{r} is clobbered by the call");
                in_regs += 1;
            }
            Location::Stack { .. } => on_stack += 1,
        }
    }
    assert_eq!(in_regs, CALLEE_SAVED.len());
    assert_eq!(on_stack, 2);
}

#[test]
fn test_loop_keeps_values_live_across_back_edge() {
    let registry = ArchRegistry::with_builtin();
    let arch = registry.get(ArchId::AMD64).unwrap();

    let mut f = Func::new("loop", Signature::new(&[Kind::Int64], &[Kind::Int64]));
    let n = f.arg(0).unwrap();
    let acc = Expr::Reg(f.new_reg(Kind::Int64));
    let tmp = Expr::Reg(f.new_reg(Kind::Int64));
    f.add_expr(Expr::assign(acc.clone(), Const::int64(0).into()).unwrap())
        .unwrap();
    let body = Stmt::block(vec![
        Stmt::expr(Expr::assign(tmp.clone(), n.clone()).unwrap()),
        Stmt::expr(Expr::binary(Op::AddAssign, acc.clone(), tmp).unwrap()),
        Stmt::expr(Expr::unary(Op::Dec, n.clone()).unwrap()),
    ]);
    let cond = Expr::binary(Op::Gtr, n, Const::int64(0).into()).unwrap();
    f.add_stmt(Stmt::while_(cond, body).unwrap()).unwrap();
    f.add_expr(Expr::ret(vec![acc]).unwrap()).unwrap();

    let compiled = f.compile().unwrap();
    let arena = Bump::new();
    let alloc = LinearScan::for_arch(arch).unwrap().allocate(&compiled, &arena).unwrap();

    // n, acc and tmp are all live inside the loop and need distinct registers
    let locs: Vec<Location> = (0x100..0x103).map(|id| alloc.get(id).unwrap()).collect();
    assert_ne!(locs[0], locs[1]);
    assert_ne!(locs[0], locs[2]);
    assert_ne!(locs[1], locs[2]);
}

#[test]
fn test_missing_register_is_reported() {
    let registry = ArchRegistry::with_builtin();
    let compiled = pressure(2).compile().unwrap();
    let ctx = CompileContext::new(CpuWidth::W64);
    let empty = xjit::core::Allocation::new();
    let err = compiled.to_arch(&registry, &ctx, ArchId::AMD64, &empty).unwrap_err();
    assert!(matches!(err, xjit::CompileError::UnallocatedRegister { id: 0x100 }));
}
