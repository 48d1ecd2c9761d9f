//! Log records emitted along the compile pipeline.

use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};
use xjit::core::{ArchId, ArchRegistry, CompileContext, CpuWidth, Expr, Func, Kind, Op, Signature};

struct Capture(Mutex<Vec<(Level, String)>>);

impl Log for Capture {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if let Ok(mut lines) = self.0.lock() {
            lines.push((record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

static CAPTURE: Capture = Capture(Mutex::new(Vec::new()));

#[test]
fn test_assembly_is_logged_once() {
    log::set_logger(&CAPTURE).unwrap();
    log::set_max_level(LevelFilter::Debug);

    let registry = ArchRegistry::with_builtin();
    let ctx = CompileContext::new(CpuWidth::W64);
    let mut f = Func::new("add", Signature::new(&[Kind::Int64, Kind::Int64], &[Kind::Int64]));
    let sum = Expr::binary(Op::Add, f.arg(0).unwrap(), f.arg(1).unwrap()).unwrap();
    f.add_expr(Expr::ret(vec![sum]).unwrap()).unwrap();
    let asm = xjit::compile_function(&registry, &ctx, ArchId::AMD64, f).unwrap();

    let lines = CAPTURE.0.lock().unwrap();
    let assembled: Vec<&String> = lines
        .iter()
        .filter(|(level, msg)| *level == Level::Debug && msg.starts_with("assembled "))
        .map(|(_, msg)| msg)
        .collect();
    assert_eq!(assembled, [&format!("assembled add: {} bytes", asm.len())]);
}
