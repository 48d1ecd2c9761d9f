//! End-to-end compilation to amd64 bytes, checked against iced-x86.

use iced_x86::code_asm::{qword_ptr, rax, rdi, rsi, CodeAssembler};
use iced_x86::{Code, Decoder, DecoderOptions, FlowControl, Instruction};
use xjit::core::{
    ArchId, ArchRegistry, Asm, CompileContext, CpuWidth, Expr, Func, Kind, Mem, Op, Signature,
    Stmt,
};
use xjit::Const;

fn compile(f: Func) -> Asm {
    let _ = env_logger::builder().is_test(true).try_init();
    let registry = ArchRegistry::with_builtin();
    let ctx = CompileContext::new(CpuWidth::W64);
    xjit::compile_function(&registry, &ctx, ArchId::AMD64, f).unwrap()
}

fn decode(code: &[u8]) -> Vec<Instruction> {
    let mut decoder = Decoder::with_ip(64, code, 0, DecoderOptions::NONE);
    let mut out = Vec::new();
    while decoder.can_decode() {
        out.push(decoder.decode());
    }
    out
}

/// Every instruction decodes and every branch lands on an instruction start.
fn check_well_formed(asm: &Asm) -> Vec<Instruction> {
    let insts = decode(asm.bytes());
    let starts: Vec<u64> = insts.iter().map(|i| i.ip()).collect();
    for inst in &insts {
        assert_ne!(inst.code(), Code::INVALID, "invalid at {:#x}", inst.ip());
        if matches!(
            inst.flow_control(),
            FlowControl::UnconditionalBranch | FlowControl::ConditionalBranch
        ) {
            let target = inst.near_branch_target();
            assert!(
                starts.contains(&target) || target == asm.len() as u64,
                "branch at {:#x} to {:#x} is not an instruction start",
                inst.ip(),
                target
            );
        }
    }
    insts
}

fn listing(asm: &Asm) -> String {
    asm.disassemble().join("\n")
}

fn two_int64s(name: &str, results: &[Kind]) -> Func {
    Func::new(name, Signature::new(&[Kind::Int64, Kind::Int64], results))
}

#[test]
fn test_add_matches_code_assembler() {
    let mut f = two_int64s("add", &[Kind::Int64]);
    let sum = Expr::binary(Op::Add, f.arg(0).unwrap(), f.arg(1).unwrap()).unwrap();
    f.add_expr(Expr::ret(vec![sum]).unwrap()).unwrap();
    let asm = compile(f);
    assert_eq!(asm.bytes(), &[0x48, 0x8D, 0x04, 0x3E, 0xC3]);

    let mut a = CodeAssembler::new(64).unwrap();
    a.lea(rax, qword_ptr(rsi + rdi)).unwrap();
    a.ret().unwrap();
    assert_eq!(asm.bytes(), a.assemble(0).unwrap().as_slice());
}

#[test]
fn test_array_sum_loop() {
    let sig = Signature::new(&[Kind::Ptr, Kind::Int64], &[Kind::Int64]);
    let mut f = Func::new("sum", sig);
    let (p, n) = (f.arg(0).unwrap(), f.arg(1).unwrap());
    let i = Expr::Reg(f.new_reg(Kind::Int64));
    let s = Expr::Reg(f.new_reg(Kind::Int64));

    let offset = Expr::binary(Op::Mul, i.clone(), Const::int64(4).into()).unwrap();
    let addr = Expr::binary(Op::Add, p, Expr::cast(Kind::Ptr, offset).unwrap()).unwrap();
    let elem = Mem::new(Kind::Int32, addr).unwrap();
    let elem = Expr::cast(Kind::Int64, elem.into()).unwrap();
    let body = Stmt::expr(Expr::binary(Op::AddAssign, s.clone(), elem).unwrap());
    let init = Stmt::expr(Expr::assign(i.clone(), Const::int64(0).into()).unwrap());
    let cond = Expr::binary(Op::Lss, i.clone(), n).unwrap();
    let post = Stmt::expr(Expr::unary(Op::Inc, i).unwrap());

    f.add_expr(Expr::assign(s.clone(), Const::int64(0).into()).unwrap())
        .unwrap();
    f.add_stmt(Stmt::for_(Some(init), Some(cond), Some(post), body).unwrap())
        .unwrap();
    f.add_expr(Expr::ret(vec![s]).unwrap()).unwrap();

    let asm = compile(f);
    let insts = check_well_formed(&asm);
    let text = listing(&asm);
    assert!(text.contains("movsxd"), "{text}");
    assert!(text.contains("jl"), "{text}");
    assert_eq!(insts.last().map(Instruction::code), Some(Code::Retnq));

    // the loop branch goes backwards
    let back = insts
        .iter()
        .find(|i| i.flow_control() == FlowControl::ConditionalBranch)
        .unwrap();
    assert!(back.near_branch_target() < back.ip());
}

#[test]
fn test_max_branches_forward() {
    let mut f = two_int64s("max", &[Kind::Int64]);
    let (a, b) = (f.arg(0).unwrap(), f.arg(1).unwrap());
    let less = Expr::binary(Op::Lss, a.clone(), b.clone()).unwrap();
    let then = Stmt::expr(Expr::ret(vec![b]).unwrap());
    f.add_stmt(Stmt::if_(less, then, None).unwrap()).unwrap();
    f.add_expr(Expr::ret(vec![a]).unwrap()).unwrap();

    let asm = compile(f);
    let insts = check_well_formed(&asm);
    assert!(listing(&asm).contains("jge"));
    let rets = insts.iter().filter(|i| i.code() == Code::Retnq).count();
    assert_eq!(rets, 2);
}

#[test]
fn test_divmod_returns_pair() {
    let mut f = two_int64s("divmod", &[Kind::Int64, Kind::Int64]);
    let (a, b) = (f.arg(0).unwrap(), f.arg(1).unwrap());
    let q = Expr::binary(Op::Quo, a.clone(), b.clone()).unwrap();
    let r = Expr::binary(Op::Rem, a, b).unwrap();
    f.add_expr(Expr::ret(vec![q, r]).unwrap()).unwrap();

    let asm = compile(f);
    check_well_formed(&asm);
    let text = listing(&asm);
    assert_eq!(text.matches("cqo").count(), 2, "{text}");
    assert_eq!(text.matches("idiv").count(), 2, "{text}");
}

#[test]
fn test_unsigned_compare_uses_unsigned_jump() {
    let sig = Signature::new(&[Kind::Uint32, Kind::Uint32], &[Kind::Uint32]);
    let mut f = Func::new("umin", sig);
    let (a, b) = (f.arg(0).unwrap(), f.arg(1).unwrap());
    let below = Expr::binary(Op::Lss, a.clone(), b.clone()).unwrap();
    let then = Stmt::expr(Expr::ret(vec![a]).unwrap());
    f.add_stmt(Stmt::if_(below, then, None).unwrap()).unwrap();
    f.add_expr(Expr::ret(vec![b]).unwrap()).unwrap();

    let asm = compile(f);
    check_well_formed(&asm);
    let text = listing(&asm);
    assert!(text.contains("jae"), "{text}");
    assert!(text.contains("cmp esi,edi"), "{text}");
}

#[test]
fn test_nested_products_fit_the_scratch_pool() {
    // (a0+a1)*(a2+a3) + (a4+a5)*(a6+a7) needs more temporaries than R10 and R11
    let sig = Signature::new(&[Kind::Int64; 8], &[Kind::Int64]);
    let mut f = Func::new("products", sig);
    let a: Vec<Expr> = (0..8).map(|i| f.arg(i).unwrap()).collect();
    let pair = |i: usize| Expr::binary(Op::Add, a[i].clone(), a[i + 1].clone()).unwrap();
    let left = Expr::binary(Op::Mul, pair(0), pair(2)).unwrap();
    let right = Expr::binary(Op::Mul, pair(4), pair(6)).unwrap();
    let sum = Expr::binary(Op::Add, left, right).unwrap();
    f.add_expr(Expr::ret(vec![sum]).unwrap()).unwrap();

    let asm = compile(f);
    let insts = check_well_formed(&asm);
    let text = listing(&asm);
    assert_eq!(text.matches("imul").count(), 2, "{text}");
    assert_eq!(insts.last().map(Instruction::code), Some(Code::Retnq));
    // the third temporary lives in the frame
    assert!(text.contains("[rsp]"), "{text}");
}
