//! Common test utilities and helpers.
//!
//! Builders for small IRs shared by the integration tests.

#![allow(dead_code)]

use binir::{
    Addr, ByteInterval, CodeBlock, DataBlock, EdgeLabel, EdgeType, Ir, Module, Section,
    SectionFlags, Symbol,
};
use uuid::Uuid;

/// Identifiers of the nodes built by [`text_program`].
pub struct TextProgram {
    pub ir: Ir,
    pub module: Uuid,
    pub section: Uuid,
    pub interval: Uuid,
    pub block0: Uuid,
    pub block1: Uuid,
    pub main: Uuid,
}

/// One module with an executable "text" section holding an interval at
/// 0x1000 with two 4-byte code blocks, a fallthrough edge between them and
/// a `main` symbol on the first.
pub fn text_program() -> TextProgram {
    let mut ir = Ir::new();
    let module = ir.add_module(Module::new("hello")).unwrap();
    let section = ir
        .add_section(
            module,
            Section::new(
                "text",
                SectionFlags::READABLE | SectionFlags::EXECUTABLE | SectionFlags::LOADED,
            ),
        )
        .unwrap();
    let interval = ir
        .add_byte_interval(
            section,
            ByteInterval::from_bytes(vec![0x55, 0x48, 0x89, 0xe5, 0x5d, 0xc3, 0x90, 0x90])
                .with_address(Addr(0x1000)),
        )
        .unwrap();
    let block0 = ir.add_code_block(interval, 0, CodeBlock::new(4)).unwrap();
    let block1 = ir.add_code_block(interval, 4, CodeBlock::new(4)).unwrap();
    ir.add_edge(
        block0,
        block1,
        Some(EdgeLabel::unconditional(EdgeType::Fallthrough)),
    )
    .unwrap();
    let main = ir
        .add_symbol(module, Symbol::with_referent("main", block0))
        .unwrap();
    TextProgram {
        ir,
        module,
        section,
        interval,
        block0,
        block1,
        main,
    }
}

/// Add a loaded, writable ".data" section with one data block, returning
/// `(section, interval, block)`.
pub fn add_data_section(ir: &mut Ir, module: Uuid, address: u64) -> (Uuid, Uuid, Uuid) {
    let section = ir
        .add_section(
            module,
            Section::new(
                ".data",
                SectionFlags::READABLE | SectionFlags::WRITABLE | SectionFlags::LOADED,
            ),
        )
        .unwrap();
    let interval = ir
        .add_byte_interval(
            section,
            ByteInterval::from_bytes(vec![0; 16]).with_address(Addr(address)),
        )
        .unwrap();
    let block = ir.add_data_block(interval, 0, DataBlock::new(8)).unwrap();
    (section, interval, block)
}
