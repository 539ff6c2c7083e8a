//! Dead handler elimination.
//!
//! A block none of whose instructions can throw never transfers control to
//! its exception handler, so the association is dropped. The handler block
//! itself is left in place; if nothing else reaches it, block placement
//! removes it. The pass runs again after merging, because a merged block's
//! handler may have been kept alive only by a member that has since been
//! folded away.

use crate::ir::FunctionUnit;

/// Clears the handler of every block that cannot throw.
///
/// Returns the number of associations removed.
pub fn remove_handlers(unit: &mut FunctionUnit) -> usize {
    let mut removed = 0;
    for block in &mut unit.blocks {
        if block.handler.is_some() && !block.can_throw() {
            log::trace!(
                target: "handlers",
                "dropping handler of `{}`: no instruction can throw",
                block.name
            );
            block.handler = None;
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, Block, BlockId, Instr, Reg};

    fn catch_block(id: u32) -> Block {
        Block::new(
            BlockId(id),
            format!("catch{id}"),
            vec![Instr::Exception { dest: Reg(1) }, Instr::Return { value: Reg(1) }],
        )
    }

    fn unit(blocks: Vec<Block>) -> FunctionUnit {
        FunctionUnit::new("f", 1, 2, blocks)
    }

    #[test]
    fn non_throwing_block_loses_handler() {
        let mut u = unit(vec![
            Block::new(
                BlockId(0),
                "entry",
                vec![
                    Instr::Move {
                        dest: Reg(1),
                        src: Reg(0),
                    },
                    Instr::Return { value: Reg(1) },
                ],
            )
            .with_handler(BlockId(1)),
            catch_block(1),
        ]);
        assert_eq!(remove_handlers(&mut u), 1);
        assert_eq!(u.blocks[0].handler, None);
        // The handler block stays until block placement.
        assert_eq!(u.blocks.len(), 2);
    }

    #[test]
    fn throwing_block_keeps_handler() {
        let mut u = unit(vec![
            Block::new(
                BlockId(0),
                "entry",
                vec![
                    Instr::GetProperty {
                        dest: Reg(1),
                        object: Reg(0),
                        key: Reg(0),
                    },
                    Instr::Return { value: Reg(1) },
                ],
            )
            .with_handler(BlockId(1)),
            catch_block(1),
        ]);
        assert_eq!(remove_handlers(&mut u), 0);
        assert_eq!(u.blocks[0].handler, Some(BlockId(1)));
    }

    #[test]
    fn throw_terminator_keeps_handler() {
        let mut u = unit(vec![
            Block::new(BlockId(0), "entry", vec![Instr::Throw { value: Reg(0) }])
                .with_handler(BlockId(1)),
            catch_block(1),
        ]);
        assert_eq!(remove_handlers(&mut u), 0);
    }

    #[test]
    fn strict_comparison_does_not_need_handler() {
        let mut u = unit(vec![
            Block::new(
                BlockId(0),
                "entry",
                vec![
                    Instr::Binary {
                        op: BinaryOp::StrictEquals,
                        dest: Reg(1),
                        lhs: Reg(0),
                        rhs: Reg(0),
                    },
                    Instr::Return { value: Reg(1) },
                ],
            )
            .with_handler(BlockId(1)),
            catch_block(1),
        ]);
        assert_eq!(remove_handlers(&mut u), 1);
    }

    #[test]
    fn idempotent() {
        let mut u = unit(vec![
            Block::new(BlockId(0), "entry", vec![Instr::Return { value: Reg(0) }])
                .with_handler(BlockId(1)),
            catch_block(1),
        ]);
        assert_eq!(remove_handlers(&mut u), 1);
        assert_eq!(remove_handlers(&mut u), 0);
    }
}
