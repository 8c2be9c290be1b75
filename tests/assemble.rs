#![cfg(all(feature = "assemble", feature = "recompile"))]

mod common;

use classfile_codedom::assemble::{assemble, AssembleError, CodeAttribute, ConstantPool, PoolEntry};
use classfile_codedom::dom::factory::*;
use classfile_codedom::recompile::{generate, RecompileOptions};
use classfile_codedom::{MethodInfo, Stmt};
use pretty_assertions::assert_eq;

use common::{call, call_value, static_info};

fn compile(info: &MethodInfo, tree: &Stmt, pool: &mut ConstantPool) -> Result<CodeAttribute, AssembleError> {
    let body = generate(tree, info, None, &RecompileOptions::default()).unwrap();
    assemble(&body, pool)
}

#[test]
fn sum_of_parameters() {
    let info = static_info("sum", "(II)I");
    let tree = block(vec![ret_value(add(var("arg0"), var("arg1")))]);
    let code = compile(&info, &tree, &mut ConstantPool::new()).unwrap();
    assert_eq!(code.code, vec![0x1a, 0x1b, 0x60, 0xac]);
    assert_eq!(code.max_stack, 2);
    assert_eq!(code.max_locals, 2);
    assert!(code.exception_table.is_empty());
}

#[test]
fn calls_go_through_the_pool() {
    let info = static_info("touch", "()V");
    let mut pool = ConstantPool::new();
    let code = compile(&info, &block(vec![call("reset", "()V")]), &mut pool).unwrap();
    assert_eq!(code.code, vec![0xb8, 0, 6, 0xb1]);
    assert_eq!(code.max_stack, 0);
    assert!(matches!(pool.get(6), Some(PoolEntry::MethodRef { .. })));
}

#[test]
fn long_literals_pick_the_short_form_when_they_can() {
    let info = static_info("one", "()J");
    let code = compile(&info, &block(vec![ret_value(long(1))]), &mut ConstantPool::new()).unwrap();
    assert_eq!(code.code, vec![0x0a, 0xad]);
    assert_eq!(code.max_stack, 2);

    let mut pool = ConstantPool::new();
    let code = compile(&info, &block(vec![ret_value(long(5))]), &mut pool).unwrap();
    assert_eq!(code.code, vec![0x14, 0, 1, 0xad]);
    assert_eq!(pool.get(1), Some(&PoolEntry::Long(5)));
}

#[test]
fn protected_regions_become_exception_table_entries() {
    let tree = block(vec![try_catch(
        block(vec![ret_value(call_value("work", "()I"))]),
        vec![
            catch("java/lang/IllegalStateException", "e", block(vec![ret_value(int(-1))])),
            finally(block(vec![call("cleanup", "()V")])),
        ],
    )]);
    let mut pool = ConstantPool::new();
    let code = compile(&static_info("guarded", "()I"), &tree, &mut pool).unwrap();

    assert_eq!(code.max_stack, 1);
    assert_eq!(code.exception_table_length as usize, code.exception_table.len());
    let typed: Vec<_> = code.exception_table.iter().filter(|e| e.catch_type != 0).collect();
    assert_eq!(typed.len(), 1);
    assert!(code.exception_table.iter().any(|e| e.catch_type == 0));
    for entry in &code.exception_table {
        assert!(entry.start_pc < entry.end_pc);
        assert!(u32::from(entry.handler_pc) < code.code_length);
    }

    let bytes = code.to_bytes().unwrap();
    assert_eq!(CodeAttribute::from_bytes(&bytes).unwrap(), code);
}
