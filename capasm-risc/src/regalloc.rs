//! Temporary-to-scratch-register assignment
//!
//! Legalization passes introduce [`Tmp`] placeholders; this module maps
//! them onto the small pool of scratch registers each backend reserves.
//! Ranges are instruction-granular: a temporary is live from the first
//! instruction that mentions it through the last one, and two temporaries
//! whose ranges overlap get distinct scratch registers. The pools are tiny
//! (two GPRs, one FPR on the capability target), so running out is an
//! internal pipeline error, not a user error.

use std::collections::{BTreeSet, HashMap};

use capasm_common::BackendError;
use capasm_ir::{Instruction, Operand, ScratchReg, Tmp, TmpClass};
use log::debug;

#[derive(Debug)]
struct LiveRange {
    tmp: Tmp,
    start: usize,
    end: usize,
}

fn collect_ranges(list: &[Instruction], class: TmpClass) -> Vec<LiveRange> {
    // First-use order, which is also start order.
    let mut ranges: Vec<LiveRange> = Vec::new();
    let mut index: HashMap<u32, usize> = HashMap::new();
    for (position, node) in list.iter().enumerate() {
        for operand in &node.operands {
            operand.for_each_tmp(&mut |tmp| {
                if tmp.class != class {
                    return;
                }
                match index.get(&tmp.id) {
                    Some(&slot) => ranges[slot].end = position,
                    None => {
                        index.insert(tmp.id, ranges.len());
                        ranges.push(LiveRange {
                            tmp,
                            start: position,
                            end: position,
                        });
                    }
                }
            });
        }
    }
    ranges
}

/// Replace every temporary of `class` with a scratch register from `pool`,
/// reusing registers across non-overlapping live ranges. Temporaries of
/// the other class are left untouched for a later invocation.
pub fn assign_registers_to_temporaries(
    list: &[Instruction],
    class: TmpClass,
    pool: &[ScratchReg],
) -> Result<Vec<Instruction>, BackendError> {
    let ranges = collect_ranges(list, class);
    if ranges.is_empty() {
        return Ok(list.to_vec());
    }
    debug!(
        "assigning {} {:?} temporaries onto {} scratch registers",
        ranges.len(),
        class,
        pool.len()
    );

    let mut free: BTreeSet<usize> = (0..pool.len()).collect();
    let mut active: Vec<(usize, usize)> = Vec::new(); // (end, pool index)
    let mut assignment: HashMap<u32, ScratchReg> = HashMap::new();

    for range in &ranges {
        active.retain(|&(end, pool_index)| {
            if end < range.start {
                free.insert(pool_index);
                false
            } else {
                true
            }
        });
        let Some(&pool_index) = free.iter().next() else {
            return Err(BackendError::OutOfScratchRegisters {
                tmp: range.tmp.id,
                location: list[range.start].origin.clone(),
            });
        };
        free.remove(&pool_index);
        active.push((range.end, pool_index));
        assignment.insert(range.tmp.id, pool[pool_index]);
    }

    let substitute = |tmp: Tmp| -> Option<Operand> {
        if tmp.class != class {
            return None;
        }
        assignment.get(&tmp.id).map(|&reg| Operand::Scratch(reg))
    };
    Ok(list
        .iter()
        .map(|node| {
            node.replacing_operands(
                node.operands
                    .iter()
                    .map(|operand| operand.map_tmps(&substitute))
                    .collect(),
            )
        })
        .collect())
}
