//! Control flow graph behaviour through the IR.

mod common;

use binir::{
    load, save, CodeBlock, Edge, EdgeLabel, EdgeType, IrError, ProxyBlock,
};
use common::text_program;

#[test]
fn duplicate_edges_collapse_but_labels_distinguish() {
    let mut program = text_program();
    let ir = &mut program.ir;
    let fallthrough = Some(EdgeLabel::unconditional(EdgeType::Fallthrough));
    let branch = Some(EdgeLabel::new(EdgeType::Branch, true, true));

    assert!(!ir.add_edge(program.block0, program.block1, fallthrough).unwrap());
    assert!(ir.add_edge(program.block0, program.block1, branch).unwrap());
    assert!(ir.add_edge(program.block0, program.block1, None).unwrap());

    assert_eq!(ir.cfg().edge_count(), 3);
    assert_eq!(
        ir.cfg().find_edges(&program.block0, &program.block1).count(),
        3
    );
    assert_eq!(ir.cfg().successors(&program.block0), vec![program.block1]);
    assert_eq!(ir.cfg().predecessors(&program.block1), vec![program.block0]);

    assert!(ir.remove_edge(&Edge::new(program.block0, program.block1, branch)));
    assert!(!ir.remove_edge(&Edge::new(program.block0, program.block1, branch)));
    assert_eq!(ir.cfg().edge_count(), 2);
}

#[test]
fn edges_require_live_cfg_nodes() {
    let mut program = text_program();
    let ir = &mut program.ir;
    let stray = uuid::Uuid::new_v4();
    assert_eq!(
        ir.add_edge(program.block0, stray, None),
        Err(IrError::UnknownNode(stray))
    );
    assert!(matches!(
        ir.add_edge(program.main, program.block0, None),
        Err(IrError::WrongNodeKind { .. })
    ));
}

#[test]
fn call_graph_through_proxy_roundtrips() {
    let mut program = text_program();
    let ir = &mut program.ir;
    let callee = ir
        .add_code_block(program.interval, 6, CodeBlock::new(2))
        .unwrap();
    let external = ir.add_proxy_block(program.module, ProxyBlock::new()).unwrap();

    ir.add_edge(
        program.block0,
        callee,
        Some(EdgeLabel::unconditional(EdgeType::Call)),
    )
    .unwrap();
    ir.add_edge(
        callee,
        program.block0,
        Some(EdgeLabel::new(EdgeType::Return, false, false)),
    )
    .unwrap();
    ir.add_edge(
        program.block1,
        external,
        Some(EdgeLabel::new(EdgeType::Call, false, false)),
    )
    .unwrap();

    let stats = ir.cfg().statistics();
    assert_eq!(stats.node_count, 4);
    assert_eq!(stats.edge_count, 4);
    assert!(stats.has_cycles);
    assert_eq!(stats.edge_type_counts.get(&EdgeType::Call), Some(&2));
    assert_eq!(ir.cfg().exit_nodes(), vec![external]);

    let loaded = load(&save(&program.ir).unwrap()).unwrap();
    assert_eq!(loaded.cfg(), program.ir.cfg());
    let incoming: Vec<_> = loaded.cfg().incoming_edges(&external).collect();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].label.map(|l| l.direct), Some(false));
}

#[test]
fn detaching_edges_unblocks_removal() {
    let mut program = text_program();
    let ir = &mut program.ir;
    assert_eq!(
        ir.remove_block(&program.block1).unwrap_err(),
        IrError::NodeHasEdges {
            id: program.block1,
            edges: 1
        }
    );
    assert_eq!(ir.remove_edges_of(&program.block1), 1);
    let block = ir.remove_block(&program.block1).unwrap();
    assert_eq!(block.offset(), 4);
    assert!(!ir.cfg().contains_node(&program.block1));
    assert!(ir.cfg().outgoing_edges(&program.block0).next().is_none());
}
