// branch.rs - structured control-flow recovery
//
// JVM branches are address-valued gotos; Wasm only has nested regions. This
// module collects every control transfer during the first bytecode pass and
// rebuilds them as a tree of block/loop/if regions. The translator then asks
// the tree at every code position which region markers to emit.
//
// The recovery leans on the shapes javac actually produces: an if/else is an
// `ifXX` whose target is preceded by the closing `goto` of the true arm, a
// loop is a backward `goto`, and a switch is a ladder of blocks sorted by
// case target. Anything that does not reduce to those shapes is rejected
// rather than mis-lowered.

use crate::error::{WasmError, WasmResult};
use crate::writer::{BlockData, BlockOp, ModuleWriter};

/// Byte size of a JVM `goto`/`ifXX` instruction.
const JUMP_SIZE: u32 = 3;

/// Control-transfer kinds recorded by the first pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    If,
    Goto,
}

#[derive(Debug)]
enum ParsedOp {
    If,
    Goto,
    /// Synthesized from a backward goto before the descent.
    Loop,
    Switch(SwitchData),
}

#[derive(Debug)]
struct SwitchData {
    /// Case keys, `None` for a table switch indexed `0..n`.
    keys: Option<Vec<i32>>,
    /// Absolute code positions of the case bodies.
    positions: Vec<u32>,
    default_position: u32,
    /// Scratch local holding the selector of a lookup switch.
    scratch: u32,
}

/// One branch-like instruction: kind, site, computed target, source line.
#[derive(Debug)]
struct ParsedBlock {
    op: ParsedOp,
    start: u32,
    end: u32,
    line: u32,
}

/// A node of the region tree. The interval limits the children; the open and
/// close operators are emitted when the code position reaches the interval
/// bounds.
#[derive(Debug)]
struct BranchNode {
    start: u32,
    end: u32,
    open: Option<BlockOp>,
    close: Option<BlockOp>,
    data: Option<BlockData>,
    children: Vec<BranchNode>,
}

impl BranchNode {
    fn new(start: u32, end: u32, open: Option<BlockOp>, close: Option<BlockOp>) -> BranchNode {
        BranchNode { start, end, open, close, data: None, children: Vec::new() }
    }

    fn with_data(
        start: u32,
        end: u32,
        open: Option<BlockOp>,
        close: Option<BlockOp>,
        data: Option<BlockData>,
    ) -> BranchNode {
        BranchNode { start, end, open, close, data, children: Vec::new() }
    }

    fn contains(&self, start: u32, end: u32) -> bool {
        self.start <= start && end <= self.end
    }

    /// Insert a child, keeping children ordered by start position. Existing
    /// children that fall inside the new interval move into it; a branch that
    /// moves inward gains one level of nesting, so its depth payload grows.
    fn insert(&mut self, mut node: BranchNode) {
        let mut i = 0;
        while i < self.children.len() {
            let child = &self.children[i];
            let same_span = child.start == node.start && child.end == node.end;
            if !same_span && node.contains(child.start, child.end) {
                let mut child = self.children.remove(i);
                if let Some(BlockData::Depth(depth)) = &mut child.data {
                    *depth += 1;
                }
                node.insert(child);
            } else {
                i += 1;
            }
        }
        let at = self
            .children
            .iter()
            .position(|child| child.start > node.start)
            .unwrap_or(self.children.len());
        self.children.insert(at, node);
    }

    fn handle(&self, position: u32, writer: &mut dyn ModuleWriter) -> WasmResult<()> {
        if position < self.start || position > self.end {
            return Ok(());
        }
        if position == self.start {
            if let Some(op) = self.open {
                writer.write_block_code(op, self.data.as_ref())?;
            }
        }
        for child in &self.children {
            child.handle(position, writer)?;
        }
        if position == self.end {
            if let Some(op) = self.close {
                writer.write_block_code(op, None)?;
            }
        }
        Ok(())
    }
}

/// Rebuilds structured regions from the branches of one method.
pub struct BranchManager {
    operations: Vec<ParsedBlock>,
    root: BranchNode,
}

impl BranchManager {
    pub fn new() -> BranchManager {
        BranchManager {
            operations: Vec::new(),
            root: BranchNode::new(0, u32::MAX, None, None),
        }
    }

    /// Drop all branch information for reuse on the next method.
    pub fn reset(&mut self) {
        self.operations.clear();
        self.root = BranchNode::new(0, u32::MAX, None, None);
    }

    /// Record an `ifXX` or `goto` found by the first pass. `offset` is the
    /// signed distance from `start` to the branch target.
    pub fn start_branch(&mut self, kind: JumpKind, start: u32, offset: i32, line: u32) {
        let op = match kind {
            JumpKind::If => ParsedOp::If,
            JumpKind::Goto => ParsedOp::Goto,
        };
        self.operations.push(ParsedBlock {
            op,
            start,
            end: (start as i64 + offset as i64) as u32,
            line,
        });
    }

    /// Record a `tableswitch`/`lookupswitch`. `keys == None` means a table
    /// switch indexed from zero; `scratch` is the local the lookup dispatch
    /// parks the selector in.
    pub fn start_switch(
        &mut self,
        start: u32,
        line: u32,
        keys: Option<Vec<i32>>,
        positions: Vec<u32>,
        default_position: u32,
        scratch: u32,
    ) {
        self.operations.push(ParsedBlock {
            op: ParsedOp::Switch(SwitchData { keys, positions, default_position, scratch }),
            start,
            end: default_position,
            line,
        });
    }

    /// Build the region tree from the recorded branches.
    pub fn calculate(&mut self) -> WasmResult<()> {
        self.root = BranchNode::new(0, u32::MAX, None, None);
        let mut operations = std::mem::take(&mut self.operations);
        convert_back_edges(&mut operations)?;
        process(&mut self.root, &mut operations)
    }

    /// Emit the region markers due at `position`. Called before translating
    /// the instruction at `position`, and once more past the last one.
    pub fn handle(&self, position: u32, writer: &mut dyn ModuleWriter) -> WasmResult<()> {
        self.root.handle(position, writer)
    }
}

impl Default for BranchManager {
    fn default() -> Self {
        BranchManager::new()
    }
}

/// Turn every backward goto into a loop region spanning from its target to
/// just past the goto itself. Backward conditional branches have no place in
/// the if/else probe below and are rejected.
fn convert_back_edges(operations: &mut Vec<ParsedBlock>) -> WasmResult<()> {
    for block in operations.iter_mut() {
        if block.end > block.start {
            continue;
        }
        match block.op {
            ParsedOp::Goto => {
                *block = ParsedBlock {
                    op: ParsedOp::Loop,
                    start: block.end,
                    end: block.start + JUMP_SIZE,
                    line: block.line,
                };
            }
            ParsedOp::If => {
                return Err(WasmError::new(
                    "backward conditional branch cannot be converted to structured control flow",
                    Some(block.line),
                ));
            }
            _ => {}
        }
    }
    // Loop regions move to their header position and enclose everything
    // there, so they sort first among equal starts; the sort is stable, so
    // other records sharing a start keep their bytecode order.
    operations.sort_by_key(|block| (block.start, !matches!(block.op, ParsedOp::Loop)));
    Ok(())
}

/// Consume the pending operations as children of `parent`.
fn process(parent: &mut BranchNode, operations: &mut Vec<ParsedBlock>) -> WasmResult<()> {
    while !operations.is_empty() {
        let block = operations.remove(0);
        process_single(parent, block, operations)?;
    }
    Ok(())
}

fn process_single(
    parent: &mut BranchNode,
    block: ParsedBlock,
    operations: &mut Vec<ParsedBlock>,
) -> WasmResult<()> {
    match block.op {
        ParsedOp::If => process_if(parent, block, operations),
        ParsedOp::Loop => process_loop(parent, block, operations),
        ParsedOp::Switch(_) => process_switch(parent, block, operations),
        ParsedOp::Goto => Err(WasmError::new(
            "goto does not close any structured block",
            Some(block.line),
        )),
    }
}

/// Rebuild an `if` region, probing for the goto that javac places at the end
/// of the true arm to skip the else arm.
fn process_if(
    parent: &mut BranchNode,
    block: ParsedBlock,
    operations: &mut Vec<ParsedBlock>,
) -> WasmResult<()> {
    let mut end = block.end.min(parent.end);
    let goto_position = end.saturating_sub(JUMP_SIZE);

    let mut branch = None;
    let mut i = 0;
    while i < operations.len() {
        let candidate = &operations[i];
        if candidate.start == goto_position && matches!(candidate.op, ParsedOp::Goto) {
            let goto_block = operations.remove(i);
            // The true arm: an IF region without its own end marker, closed
            // by the ELSE that follows.
            let mut if_node = BranchNode::new(block.start, block.end, Some(BlockOp::If), None);
            let mut inner: Vec<ParsedBlock> = operations.drain(..i).collect();
            process(&mut if_node, &mut inner)?;
            parent.insert(if_node);

            end = goto_block.end;
            branch = Some(BranchNode::new(block.end, end, Some(BlockOp::Else), Some(BlockOp::End)));
            break;
        }
        if candidate.start > goto_position {
            break;
        }
        i += 1;
    }

    let mut branch = match branch {
        Some(branch) => branch,
        None => BranchNode::new(block.start, end, Some(BlockOp::If), Some(BlockOp::End)),
    };

    let count = operations
        .iter()
        .position(|operation| operation.start >= end)
        .unwrap_or(operations.len());
    let mut inner: Vec<ParsedBlock> = operations.drain(..count).collect();
    process(&mut branch, &mut inner)?;
    parent.insert(branch);
    Ok(())
}

/// Rebuild a loop region synthesized from a backward goto. The branch back to
/// the header sits at the goto site, inside whatever regions the body built.
fn process_loop(
    parent: &mut BranchNode,
    block: ParsedBlock,
    operations: &mut Vec<ParsedBlock>,
) -> WasmResult<()> {
    let mut loop_node = BranchNode::new(block.start, block.end, Some(BlockOp::Loop), Some(BlockOp::End));

    let count = operations
        .iter()
        .position(|operation| operation.start >= block.end)
        .unwrap_or(operations.len());
    let mut inner: Vec<ParsedBlock> = operations.drain(..count).collect();
    process(&mut loop_node, &mut inner)?;

    insert_back_edge(&mut loop_node, block.end - JUMP_SIZE, 0);
    parent.insert(loop_node);
    Ok(())
}

fn insert_back_edge(node: &mut BranchNode, position: u32, depth: u32) {
    let inner = node
        .children
        .iter_mut()
        .position(|child| child.start < child.end && child.start <= position && position < child.end);
    match inner {
        Some(i) => insert_back_edge(&mut node.children[i], position, depth + 1),
        None => node.insert(BranchNode::with_data(
            position,
            position,
            Some(BlockOp::Br),
            None,
            Some(BlockData::Depth(depth)),
        )),
    }
}

struct SwitchCase {
    key: i64,
    position: u32,
    block: u32,
}

/// Rebuild a switch: one block per distinct case target, innermost first,
/// with the dispatch (br_table or compare ladder) at the bottom of the
/// innermost block and each case break converted to a br past the ladder.
fn process_switch(
    parent: &mut BranchNode,
    block: ParsedBlock,
    operations: &mut Vec<ParsedBlock>,
) -> WasmResult<()> {
    let (data, start, line) = match block {
        ParsedBlock { op: ParsedOp::Switch(data), start, line, .. } => (data, start, line),
        _ => unreachable!(),
    };
    let is_table = data.keys.is_none();

    let mut cases: Vec<SwitchCase> = data
        .positions
        .iter()
        .enumerate()
        .map(|(i, &position)| SwitchCase {
            key: match &data.keys {
                Some(keys) => keys[i] as i64,
                None => i as i64,
            },
            position,
            block: 0,
        })
        .collect();
    cases.push(SwitchCase { key: i64::MAX, position: data.default_position, block: 0 });

    // Assign block indices by target order; cases sharing a target (fall
    // through, or a case aliasing the default) share a block.
    cases.sort_by_key(|case| case.position);
    if cases.first().map(|case| case.position < start).unwrap_or(true) {
        return Err(WasmError::new(
            "switch case target precedes the switch dispatch",
            Some(line),
        ));
    }
    let mut block_count = 0u32;
    let mut last_position = None;
    let mut chain: Option<BranchNode> = None;
    for case in cases.iter_mut() {
        let current = case.position;
        if last_position != Some(current) {
            if chain.is_none() {
                // The dispatch node, emitted right before the innermost end.
                chain = Some(BranchNode::new(current, current, Some(BlockOp::BrTable), None));
            }
            last_position = Some(current);
            block_count += 1;
            let mut node = BranchNode::new(start, current, Some(BlockOp::Block), Some(BlockOp::End));
            if let Some(inner) = chain.take() {
                node.insert(inner);
            }
            chain = Some(node);
        }
        case.block = block_count - 1;
    }
    let mut chain = chain.expect("switch with no targets");
    let mut last_position = last_position.expect("switch with no targets");

    // Convert the break gotos at the end of the case bodies. Walking the
    // chain inward gives the label depth that exits to the switch end.
    {
        let mut branch = &mut chain;
        let mut depth = 0u32;
        loop {
            depth += 1;
            let node_end = match branch.children.first() {
                Some(child) => child.end,
                None => break,
            };
            let mut i = 0;
            while i < operations.len() {
                let candidate = &operations[i];
                if candidate.start < node_end {
                    i += 1;
                    continue;
                }
                if candidate.start >= last_position {
                    break;
                }
                if candidate.end >= last_position && matches!(candidate.op, ParsedOp::Goto) {
                    let goto_block = operations.remove(i);
                    last_position = goto_block.end;
                    branch.insert(BranchNode::with_data(
                        goto_block.start,
                        goto_block.start,
                        Some(BlockOp::Br),
                        None,
                        Some(BlockData::Depth(depth)),
                    ));
                } else {
                    i += 1;
                }
            }
            branch = branch.children.first_mut().expect("chain child checked above");
        }
    }

    // The block around the whole switch; breaks land on its end.
    let mut switch_node = BranchNode::new(start, last_position, Some(BlockOp::Block), Some(BlockOp::End));
    switch_node.insert(chain);

    // Back in key order, the block indices become the dispatch payload.
    cases.sort_by_key(|case| case.key);
    let payload = if is_table {
        BlockData::Table {
            scratch: data.scratch,
            targets: cases.iter().map(|case| case.block).collect(),
        }
    } else {
        let default = cases.last().map(|case| case.block).unwrap_or(0);
        BlockData::Lookup {
            scratch: data.scratch,
            cases: cases
                .iter()
                .take(cases.len() - 1)
                .map(|case| (case.key as i32, case.block))
                .collect(),
            default,
        }
    };
    set_dispatch_payload(&mut switch_node, payload, line)?;

    // Branches inside the case bodies nest into the deepest enclosing block.
    while let Some(first) = operations.first() {
        if first.start >= switch_node.end {
            break;
        }
        let inner = operations.remove(0);
        process_into(&mut switch_node, inner, operations)?;
    }

    parent.insert(switch_node);
    Ok(())
}

/// Store the dispatch payload on the BR_TABLE node at the bottom of the
/// switch chain.
fn set_dispatch_payload(node: &mut BranchNode, payload: BlockData, line: u32) -> WasmResult<()> {
    if node.open == Some(BlockOp::BrTable) {
        node.data = Some(payload);
        return Ok(());
    }
    match node.children.first_mut() {
        Some(child) => set_dispatch_payload(child, payload, line),
        None => Err(WasmError::new("switch chain without a dispatch node", Some(line))),
    }
}

/// Route a pending operation to the deepest node enclosing it, then process
/// it there.
fn process_into(
    node: &mut BranchNode,
    block: ParsedBlock,
    operations: &mut Vec<ParsedBlock>,
) -> WasmResult<()> {
    let inner = node
        .children
        .iter()
        .position(|child| child.start < child.end && child.contains(block.start, block.end));
    match inner {
        Some(i) => process_into(&mut node.children[i], block, operations),
        None => process_single(node, block, operations),
    }
}
