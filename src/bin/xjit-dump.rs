//! Compile one of the built-in sample functions and print its listing.
//!
//! ```text
//! xjit-dump --sample sum --output sum.o
//! RUST_LOG=trace xjit-dump --sample divmod
//! ```

use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use xjit::core::{
    ArchId, ArchRegistry, CompileContext, CompileResult, Const, CpuWidth, Expr, Func, Kind,
    Mem, Op, Signature, Stmt,
};

#[derive(Parser)]
#[command(name = "xjit-dump", version, about = "Compile a sample function to amd64")]
struct Cli {
    /// Sample function to compile
    #[arg(short, long, value_enum, default_value = "add")]
    sample: Sample,
    /// Pointer width of the compilation (must match the target)
    #[arg(long, value_enum, default_value = "64")]
    width: Width,
    /// Write an ELF relocatable object with the function to this path
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Print the lowered expression sequence before the listing
    #[arg(long)]
    lowered: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Width {
    #[value(name = "32")]
    W32,
    #[value(name = "64")]
    W64,
}

impl From<Width> for CpuWidth {
    fn from(w: Width) -> Self {
        match w {
            Width::W32 => CpuWidth::W32,
            Width::W64 => CpuWidth::W64,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Sample {
    /// a + b
    Add,
    /// Sum of n int32 values at p
    Sum,
    /// Quotient and remainder
    Divmod,
    /// Larger of two signed values
    Max,
}

fn build(sample: Sample) -> CompileResult<Func> {
    let i64s = [Kind::Int64, Kind::Int64];
    Ok(match sample {
        Sample::Add => {
            let mut f = Func::new("add", Signature::new(&i64s, &[Kind::Int64]));
            let sum = Expr::binary(Op::Add, f.arg(0)?, f.arg(1)?)?;
            f.add_expr(Expr::ret(vec![sum])?)?;
            f
        }
        Sample::Sum => {
            let sig = Signature::new(&[Kind::Ptr, Kind::Int64], &[Kind::Int64]);
            let mut f = Func::new("sum", sig);
            let (p, n) = (f.arg(0)?, f.arg(1)?);
            let i = Expr::Reg(f.new_reg(Kind::Int64));
            let s = Expr::Reg(f.new_reg(Kind::Int64));

            let offset = Expr::binary(Op::Mul, i.clone(), Const::int64(4).into())?;
            let addr = Expr::binary(Op::Add, p, Expr::cast(Kind::Ptr, offset)?)?;
            let elem = Expr::cast(Kind::Int64, Mem::new(Kind::Int32, addr)?.into())?;
            let body = Stmt::expr(Expr::binary(Op::AddAssign, s.clone(), elem)?);

            f.add_expr(Expr::assign(s.clone(), Const::int64(0).into())?)?;
            f.add_stmt(Stmt::for_(
                Some(Stmt::expr(Expr::assign(i.clone(), Const::int64(0).into())?)),
                Some(Expr::binary(Op::Lss, i.clone(), n)?),
                Some(Stmt::expr(Expr::unary(Op::Inc, i)?)),
                body,
            )?)?;
            f.add_expr(Expr::ret(vec![s])?)?;
            f
        }
        Sample::Divmod => {
            let mut f = Func::new("divmod", Signature::new(&i64s, &i64s));
            let (a, b) = (f.arg(0)?, f.arg(1)?);
            let q = Expr::binary(Op::Quo, a.clone(), b.clone())?;
            let r = Expr::binary(Op::Rem, a, b)?;
            f.add_expr(Expr::ret(vec![q, r])?)?;
            f
        }
        Sample::Max => {
            let mut f = Func::new("max", Signature::new(&i64s, &[Kind::Int64]));
            let (a, b) = (f.arg(0)?, f.arg(1)?);
            let less = Expr::binary(Op::Lss, a.clone(), b.clone())?;
            f.add_stmt(Stmt::if_(
                less,
                Stmt::expr(Expr::ret(vec![b])?),
                None,
            )?)?;
            f.add_expr(Expr::ret(vec![a])?)?;
            f
        }
    })
}

fn run(cli: &Cli) -> CompileResult<()> {
    let registry = ArchRegistry::with_builtin();
    let ctx = CompileContext::new(cli.width.into());
    let func = build(cli.sample)?;
    let name = func.name().to_string();

    let lowered = xjit::lower_function(&registry, &ctx, ArchId::AMD64, func)?;
    if cli.lowered {
        print!("{lowered}");
    }
    let asm = lowered.assemble(&registry)?;

    println!("{} ({} bytes):", name, asm.len());
    for line in asm.disassemble() {
        println!("  {line}");
    }

    if let Some(path) = &cli.output {
        let obj = asm.to_object(&name)?;
        if let Err(e) = std::fs::write(path, obj) {
            eprintln!("Error: cannot write {}: {e}", path.display());
            process::exit(1);
        }
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_accepts_only_known_values() {
        let cli = Cli::try_parse_from(["xjit-dump"]).unwrap();
        assert_eq!(cli.width, Width::W64);
        let cli = Cli::try_parse_from(["xjit-dump", "--width", "32"]).unwrap();
        assert_eq!(cli.width, Width::W32);
        assert!(Cli::try_parse_from(["xjit-dump", "--width", "16"]).is_err());
        assert!(Cli::try_parse_from(["xjit-dump", "--width", "wide"]).is_err());
    }

    #[test]
    fn test_samples_compile() {
        let _ = env_logger::builder().is_test(true).try_init();
        let registry = ArchRegistry::with_builtin();
        let ctx = CompileContext::new(CpuWidth::W64);
        for sample in Sample::value_variants() {
            let func = build(*sample).unwrap();
            assert!(xjit::compile_function(&registry, &ctx, ArchId::AMD64, func).is_ok());
        }
    }
}
