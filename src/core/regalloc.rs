// This module provides the register-allocation contract consumed by lowering and a linear
// scan allocator that produces it. An Allocation maps every soft register id to a hard
// register or to a stack slot addressed off a base register, and records the frame size
// the slots need; a lookup of an id the allocator never placed is an error. LinearScan
// numbers the flattened expressions (arguments are live at position 0, the body starts at
// 1), builds one live interval per soft register, widens intervals that overlap a backward
// jump until nothing changes (a value live anywhere in a loop stays live for the whole
// loop), then walks intervals by start point handing out the target's allocatable
// registers. An interval that spans an expression containing a call may only take a
// register the callee preserves. When none is free, the interval that ends last is sent
// to the stack. Interval scratch space lives in a bumpalo arena owned by the caller.

//! Register allocation.

use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use hashbrown::HashMap;

use super::arch::Arch;
use super::compiled::Compiled;
use super::error::{CompileError, CompileResult};
use super::expr::{Expr, HardReg, RegId};
use super::kind::Kind;
use super::op::Op;

/// Where a soft register lives after allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Reg(HardReg),
    Stack { base: HardReg, offset: i32 },
}

/// Soft register placements for one function.
#[derive(Debug, Clone, Default)]
pub struct Allocation {
    map: HashMap<u32, Location>,
    frame_size: u32,
}

impl Allocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, soft: u32, loc: Location) {
        self.map.insert(soft, loc);
    }

    pub fn get(&self, soft: u32) -> CompileResult<Location> {
        self.map
            .get(&soft)
            .copied()
            .ok_or(CompileError::UnallocatedRegister { id: soft })
    }

    /// Bytes of stack the spill slots need, a multiple of 16.
    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    pub fn set_frame_size(&mut self, size: u32) {
        self.frame_size = size;
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, Location)> + '_ {
        self.map.iter().map(|(id, loc)| (*id, *loc))
    }
}

#[derive(Debug, Clone, Copy)]
struct Interval {
    id: u32,
    kind: Kind,
    start: usize,
    end: usize,
}

/// Linear scan over the flattened sequence of one function.
pub struct LinearScan<'a> {
    regs: &'a [HardReg],
    preserved: &'a [HardReg],
    stack_pointer: HardReg,
}

impl<'a> LinearScan<'a> {
    pub fn new(regs: &'a [HardReg], stack_pointer: HardReg) -> Self {
        Self {
            regs,
            preserved: &[],
            stack_pointer,
        }
    }

    /// Registers that survive a call; values live across one are kept there.
    pub fn preserving(mut self, preserved: &'a [HardReg]) -> Self {
        self.preserved = preserved;
        self
    }

    pub fn for_arch(arch: &'a Arch) -> CompileResult<Self> {
        let sp = arch.stack_pointer.ok_or_else(|| {
            CompileError::unsupported(format!("register allocation for {}", arch.name))
        })?;
        Ok(Self::new(arch.allocatable, sp).preserving(arch.callee_saved))
    }

    pub fn allocate(&self, compiled: &Compiled, arena: &Bump) -> CompileResult<Allocation> {
        let mut intervals = self.intervals(compiled, arena);
        intervals.sort_by_key(|iv| (iv.start, iv.id));
        let calls = self.call_positions(compiled, arena);
        let crosses = |iv: &Interval| calls.iter().any(|&p| iv.start <= p && p <= iv.end);

        let mut alloc = Allocation::new();
        let mut active: BumpVec<(Interval, HardReg)> = BumpVec::new_in(arena);
        let mut free: BumpVec<HardReg> = BumpVec::from_iter_in(self.regs.iter().copied(), arena);
        let mut frame = 0u32;

        for iv in intervals.iter().copied() {
            let mut i = 0;
            while i < active.len() {
                if active[i].0.end < iv.start {
                    let (_, reg) = active.remove(i);
                    free.push(reg);
                } else {
                    i += 1;
                }
            }
            free.sort_by_key(|r| self.rank(*r));

            let across = crosses(&iv);
            let usable = |r: &HardReg| !across || self.preserved.contains(r);
            if let Some(pick) = free.iter().position(usable) {
                let reg = free.remove(pick);
                alloc.assign(iv.id, Location::Reg(reg));
                active.push((iv, reg));
                continue;
            }

            let victim = active
                .iter()
                .enumerate()
                .filter(|(_, (_, r))| usable(r))
                .max_by_key(|(_, (a, _))| (a.end, a.id))
                .map(|(i, (a, _))| (i, a.end));
            match victim {
                Some((i, end)) if end > iv.end => {
                    let (spilled, reg) = active.remove(i);
                    let slot = self.stack_slot(&mut frame, spilled.kind);
                    log::trace!("spill s{} to {:?}, s{} takes {}", spilled.id, slot, iv.id, reg);
                    alloc.assign(spilled.id, slot);
                    alloc.assign(iv.id, Location::Reg(reg));
                    active.push((iv, reg));
                }
                _ => {
                    let slot = self.stack_slot(&mut frame, iv.kind);
                    log::trace!("spill s{} to {:?}", iv.id, slot);
                    alloc.assign(iv.id, slot);
                }
            }
        }

        alloc.set_frame_size(frame.next_multiple_of(16));
        log::debug!(
            "allocated {}: {} registers, frame {} bytes",
            compiled.name(),
            alloc.len(),
            alloc.frame_size()
        );
        Ok(alloc)
    }

    fn rank(&self, reg: HardReg) -> usize {
        self.regs.iter().position(|r| *r == reg).unwrap_or(usize::MAX)
    }

    fn stack_slot(&self, frame: &mut u32, kind: Kind) -> Location {
        let offset = *frame;
        *frame += kind.size().max(1).next_multiple_of(8);
        Location::Stack {
            base: self.stack_pointer,
            offset: offset as i32,
        }
    }

    /// Positions of expressions that contain a call.
    fn call_positions<'b>(&self, compiled: &Compiled, arena: &'b Bump) -> BumpVec<'b, usize> {
        let mut out = BumpVec::new_in(arena);
        for (i, e) in compiled.code().iter().enumerate() {
            if e.contains_op(Op::Call) {
                out.push(i + 1);
            }
        }
        out
    }

    fn intervals<'b>(&self, compiled: &Compiled, arena: &'b Bump) -> BumpVec<'b, Interval> {
        let mut out: BumpVec<Interval> = BumpVec::new_in(arena);
        let mut index: HashMap<u32, usize> = HashMap::new();
        let mut touch = |id: u32, kind: Kind, pos: usize, out: &mut BumpVec<Interval>| {
            match index.get(&id) {
                Some(&i) => {
                    let iv = &mut out[i];
                    iv.start = iv.start.min(pos);
                    iv.end = iv.end.max(pos);
                }
                None => {
                    index.insert(id, out.len());
                    out.push(Interval {
                        id,
                        kind,
                        start: pos,
                        end: pos,
                    });
                }
            }
        };

        // Arguments are live from entry.
        for reg in compiled.func().regs().iter().take(compiled.func().signature().num_params()) {
            if let RegId::Soft(id) = reg.id() {
                touch(id, reg.kind(), 0, &mut out);
            }
        }

        let code = compiled.code();
        let mut label_pos: HashMap<u32, usize> = HashMap::new();
        for (pos, e) in code.iter().enumerate() {
            let pos = pos + 1;
            if let Expr::Label(l) = e {
                label_pos.insert(l.index(), pos);
            }
            e.for_each_reg(&mut |r| {
                if let RegId::Soft(id) = r.id() {
                    touch(id, r.kind(), pos, &mut out);
                }
            });
        }

        let mut back_edges: BumpVec<(usize, usize)> = BumpVec::new_in(arena);
        for (pos, e) in code.iter().enumerate() {
            let pos = pos + 1;
            let target = match e {
                Expr::Unary(u) if u.op() == Op::Jump => u.x().as_label(),
                Expr::Binary(b) if b.op() == Op::JumpIf => b.x().as_label(),
                _ => None,
            };
            if let Some(&at) = target.and_then(|l| label_pos.get(&l.index())) {
                if at <= pos {
                    back_edges.push((at, pos));
                }
            }
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &(top, bottom) in back_edges.iter() {
                for iv in out.iter_mut() {
                    let overlaps = iv.start <= bottom && iv.end >= top;
                    if overlaps && (iv.start > top || iv.end < bottom) {
                        iv.start = iv.start.min(top);
                        iv.end = iv.end.max(bottom);
                        changed = true;
                    }
                }
            }
        }
        out
    }
}
