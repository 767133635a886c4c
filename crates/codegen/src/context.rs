//! Per-image compilation state.
//!
//! A [`CompilerContext`] owns everything that is local to one code image: the
//! assembly buffer, the static stack-height cursor, the symbol tables mapping
//! declarations to storage slots / stack offsets / entry labels, and the
//! queue of functions whose entry label has been referenced but whose body is
//! not yet emitted. The creation and runtime images of a contract each get
//! their own context with an independent mark universe.

use crate::error::{CodegenError, Result};
use alloy_primitives::U256;
use cinder_ast::{Callable, ContractId, VarId};
use evm_glue::{
    assembler::assemble_minimized,
    assembly::{Asm, MarkRef, RefType},
    opcodes::Opcode,
    utils::MarkTracker,
};
use std::collections::{BTreeSet, HashMap};

/// Jump label id, resolved to a byte offset when the image is assembled.
pub type MarkId = usize;

/// Handle to a code-data subroutine embedded at the end of the image; its
/// mark resolves to the subroutine's byte offset.
#[derive(Debug, Clone, Copy)]
pub struct SubroutineHandle {
    mark: MarkId,
}

pub struct CompilerContext {
    asm: Vec<Asm>,
    marks: MarkTracker,
    /// Static stack-height cursor. This is an analysis value, not runtime
    /// state: locals are located by subtracting their registration offset
    /// from it, so every appended item must keep it in sync.
    stack_height: isize,
    state_variables: HashMap<VarId, u64>,
    next_storage_slot: u64,
    /// Base stack offsets of the locals of the function currently being
    /// emitted; reset by [`CompilerContext::start_function`].
    local_variables: HashMap<VarId, isize>,
    entry_labels: HashMap<Callable, MarkId>,
    /// Callables whose entry label has been referenced but whose body has
    /// not been emitted yet. Ordered, so the drain order is deterministic.
    pending_functions: BTreeSet<Callable>,
    inheritance_hierarchy: Vec<ContractId>,
    compiled_contracts: HashMap<ContractId, Vec<u8>>,
    subroutines: Vec<(MarkId, Vec<u8>)>,
    program_size_mark: Option<MarkId>,
}

impl CompilerContext {
    pub fn new() -> Self {
        Self {
            asm: Vec::new(),
            marks: MarkTracker::default(),
            stack_height: 0,
            state_variables: HashMap::new(),
            next_storage_slot: 0,
            local_variables: HashMap::new(),
            entry_labels: HashMap::new(),
            pending_functions: BTreeSet::new(),
            inheritance_hierarchy: Vec::new(),
            compiled_contracts: HashMap::new(),
            subroutines: Vec::new(),
            program_size_mark: None,
        }
    }

    /// Appends one assembly item, advancing the stack-height cursor by the
    /// item's stack delta.
    pub fn append(&mut self, item: Asm) {
        self.stack_height += item_stack_delta(&item);
        self.asm.push(item);
    }

    pub fn append_op(&mut self, op: Opcode) {
        self.append(Asm::Op(op));
    }

    /// Pushes a constant using the smallest PUSH opcode (PUSH0/PUSH1-PUSH32).
    pub fn append_push(&mut self, value: U256) {
        if value.is_zero() {
            self.append_op(Opcode::PUSH0);
            return;
        }

        let trimmed = value.to_be_bytes_trimmed_vec();

        macro_rules! push_n {
            ($n:expr, $opcode:ident) => {{
                let mut arr = [0u8; $n];
                arr.copy_from_slice(&trimmed[..]);
                self.append_op(Opcode::$opcode(arr));
            }};
        }

        match trimmed.len() {
            1 => self.append_op(Opcode::PUSH1([trimmed[0]])),
            2 => push_n!(2, PUSH2),
            3 => push_n!(3, PUSH3),
            4 => push_n!(4, PUSH4),
            5 => push_n!(5, PUSH5),
            6 => push_n!(6, PUSH6),
            7 => push_n!(7, PUSH7),
            8 => push_n!(8, PUSH8),
            9..=32 => self.append_op(Opcode::PUSH32(value.to_be_bytes())),
            _ => unreachable!("U256 is max 32 bytes by definition"),
        }
    }

    /// Allocates a fresh forward-reference label.
    pub fn new_tag(&mut self) -> MarkId {
        self.marks.next_mark()
    }

    /// Defines a label at the current position as a valid jump target.
    pub fn append_tag(&mut self, tag: MarkId) {
        self.append(Asm::Mark(tag));
        self.append_op(Opcode::JUMPDEST);
    }

    /// Allocates a label and pushes a reference to it.
    pub fn push_new_tag(&mut self) -> MarkId {
        let tag = self.new_tag();
        self.append_tag_reference(tag);
        tag
    }

    fn append_tag_reference(&mut self, tag: MarkId) {
        self.append(Asm::Ref(MarkRef {
            ref_type: RefType::Direct(tag),
            is_pushed: true,
            set_size: None,
        }));
    }

    pub fn append_jump_to(&mut self, tag: MarkId) {
        self.append_tag_reference(tag);
        self.append_op(Opcode::JUMP);
    }

    /// Emits a jump to a freshly allocated label and returns it.
    pub fn append_jump_to_new(&mut self) -> MarkId {
        let tag = self.new_tag();
        self.append_jump_to(tag);
        tag
    }

    /// Emits a conditional jump consuming the condition on the stack top;
    /// returns the freshly allocated target label.
    pub fn append_conditional_jump(&mut self) -> MarkId {
        let tag = self.new_tag();
        self.append_conditional_jump_to(tag);
        tag
    }

    pub fn append_conditional_jump_to(&mut self, tag: MarkId) {
        self.append_tag_reference(tag);
        self.append_op(Opcode::JUMPI);
    }

    /// Entry label of a callable. The first reference allocates the label
    /// and adds the callable to the pending set.
    pub fn function_entry_label(&mut self, callable: Callable) -> MarkId {
        if let Some(&mark) = self.entry_labels.get(&callable) {
            mark
        } else {
            let mark = self.marks.next_mark();
            self.entry_labels.insert(callable, mark);
            self.pending_functions.insert(callable);
            mark
        }
    }

    /// Callables referenced so far whose body has not been emitted.
    pub fn functions_without_code(&self) -> Vec<Callable> {
        self.pending_functions.iter().copied().collect()
    }

    /// Starts emitting the body of a callable: defines its entry label,
    /// removes it from the pending set and resets the local-variable scope.
    pub fn start_function(&mut self, callable: Callable) {
        let label = self.function_entry_label(callable);
        self.pending_functions.remove(&callable);
        self.local_variables.clear();
        self.append_tag(label);
    }

    /// Assigns the next storage slot to a state variable.
    pub fn add_state_variable(&mut self, var: VarId) {
        let slot = self.next_storage_slot;
        self.next_storage_slot += 1;
        let previous = self.state_variables.insert(var, slot);
        assert!(previous.is_none(), "state variable registered twice");
    }

    pub fn storage_slot(&self, var: VarId) -> U256 {
        U256::from(*self.state_variables.get(&var).expect("unknown state variable"))
    }

    /// Registers a local variable whose value starts `offset_to_current`
    /// words below the current cursor.
    pub fn add_variable(&mut self, var: VarId, offset_to_current: usize) {
        self.local_variables.insert(var, self.stack_height - offset_to_current as isize);
    }

    /// Registers a local variable and reserves zero-initialized stack slots
    /// for it.
    pub fn add_and_initialize_variable(&mut self, var: VarId, size_on_stack: usize) {
        self.add_variable(var, 0);
        for _ in 0..size_on_stack {
            self.append_push(U256::ZERO);
        }
    }

    /// Absolute cursor position right below the variable's first word.
    pub fn base_stack_offset(&self, var: VarId) -> isize {
        *self.local_variables.get(&var).expect("unknown local variable")
    }

    /// Manually corrects the cursor after an opaque stack effect, e.g. a
    /// callee consuming its frame.
    pub fn adjust_stack_offset(&mut self, delta: isize) {
        self.stack_height += delta;
    }

    pub fn stack_height(&self) -> isize {
        self.stack_height
    }

    pub fn set_inheritance_hierarchy(&mut self, hierarchy: Vec<ContractId>) {
        self.inheritance_hierarchy = hierarchy;
    }

    /// Linearized base contracts, most-derived first.
    pub fn inheritance_hierarchy(&self) -> &[ContractId] {
        &self.inheritance_hierarchy
    }

    pub fn set_compiled_contracts(&mut self, contracts: HashMap<ContractId, Vec<u8>>) {
        self.compiled_contracts = contracts;
    }

    /// Creation bytecode of a sibling contract, for `new` expressions.
    pub fn compiled_contract(&self, contract: ContractId) -> &[u8] {
        self.compiled_contracts.get(&contract).expect("contract bytecode not available")
    }

    /// Embeds another image as code-data at the end of this one and pushes
    /// its size. The returned handle resolves to its byte offset.
    pub fn add_subroutine(&mut self, code: Vec<u8>) -> SubroutineHandle {
        let mark = self.marks.next_mark();
        self.append_push(U256::from(code.len()));
        self.subroutines.push((mark, code));
        SubroutineHandle { mark }
    }

    /// Pushes the byte offset a subroutine will be placed at.
    pub fn append_subroutine_offset(&mut self, subroutine: SubroutineHandle) {
        self.append_tag_reference(subroutine.mark);
    }

    /// Pushes the total size of the assembled image. Constructor arguments
    /// are appended to the deployed code right after this offset.
    pub fn append_program_size(&mut self) {
        let mark = match self.program_size_mark {
            Some(mark) => mark,
            None => {
                let mark = self.marks.next_mark();
                self.program_size_mark = Some(mark);
                mark
            }
        };
        self.append_tag_reference(mark);
    }

    /// Finalizes the image: appends the embedded subroutines, resolves all
    /// marks and assembles to bytes. Returns the finalized item stream
    /// alongside the bytecode.
    pub fn finish(mut self) -> Result<(Vec<Asm>, Vec<u8>)> {
        assert!(
            self.pending_functions.is_empty(),
            "pending functions at finalization: {:?}",
            self.pending_functions
        );
        for (mark, code) in self.subroutines.drain(..) {
            self.asm.push(Asm::Mark(mark));
            if !code.is_empty() {
                self.asm.push(Asm::Data(code));
            }
        }
        if let Some(mark) = self.program_size_mark {
            self.asm.push(Asm::Mark(mark));
        }
        let (_, bytecode) = assemble_minimized(&self.asm, true)
            .map_err(|e| CodegenError::Assembly(format!("{e:?}")))?;
        Ok((self.asm, bytecode))
    }
}

impl Default for CompilerContext {
    fn default() -> Self {
        Self::new()
    }
}

fn item_stack_delta(item: &Asm) -> isize {
    match item {
        Asm::Op(op) => opcode_stack_delta(op),
        Asm::Ref(mark_ref) => {
            if mark_ref.is_pushed {
                1
            } else {
                0
            }
        }
        Asm::Mark(_) | Asm::Data(_) => 0,
    }
}

/// Net stack effect of the opcodes the emitter produces.
#[allow(unreachable_patterns)]
fn opcode_stack_delta(op: &Opcode) -> isize {
    use Opcode::*;
    match op {
        STOP | JUMPDEST | INVALID => 0,
        ADD | MUL | SUB | DIV | SDIV | MOD | SMOD | EXP | SIGNEXTEND | LT | GT | SLT | SGT
        | EQ | AND | OR | XOR | BYTE | SHL | SHR | SAR | SHA3 => -1,
        ISZERO | NOT | BALANCE | CALLDATALOAD | EXTCODESIZE | EXTCODEHASH | BLOCKHASH | MLOAD
        | SLOAD | TLOAD | BLOBHASH => 0,
        ADDRESS | ORIGIN | CALLER | CALLVALUE | CALLDATASIZE | CODESIZE | GASPRICE
        | RETURNDATASIZE | COINBASE | TIMESTAMP | NUMBER | PREVRANDAO | GASLIMIT | CHAINID
        | SELFBALANCE | BASEFEE | BLOBBASEFEE | PC | MSIZE | GAS => 1,
        POP | JUMP | SELFDESTRUCT => -1,
        MSTORE | MSTORE8 | SSTORE | TSTORE | JUMPI | RETURN | REVERT | LOG0 => -2,
        ADDMOD | MULMOD => -2,
        CALLDATACOPY | CODECOPY | RETURNDATACOPY | MCOPY | LOG1 => -3,
        EXTCODECOPY | LOG2 => -4,
        LOG3 => -5,
        LOG4 => -6,
        CREATE => -2,
        CREATE2 => -3,
        CALL | CALLCODE => -6,
        DELEGATECALL | STATICCALL => -5,
        PUSH0 | PUSH1(_) | PUSH2(_) | PUSH3(_) | PUSH4(_) | PUSH5(_) | PUSH6(_) | PUSH7(_)
        | PUSH8(_) | PUSH9(_) | PUSH10(_) | PUSH11(_) | PUSH12(_) | PUSH13(_) | PUSH14(_)
        | PUSH15(_) | PUSH16(_) | PUSH17(_) | PUSH18(_) | PUSH19(_) | PUSH20(_) | PUSH21(_)
        | PUSH22(_) | PUSH23(_) | PUSH24(_) | PUSH25(_) | PUSH26(_) | PUSH27(_) | PUSH28(_)
        | PUSH29(_) | PUSH30(_) | PUSH31(_) | PUSH32(_) => 1,
        DUP1 | DUP2 | DUP3 | DUP4 | DUP5 | DUP6 | DUP7 | DUP8 | DUP9 | DUP10 | DUP11 | DUP12
        | DUP13 | DUP14 | DUP15 | DUP16 => 1,
        SWAP1 | SWAP2 | SWAP3 | SWAP4 | SWAP5 | SWAP6 | SWAP7 | SWAP8 | SWAP9 | SWAP10
        | SWAP11 | SWAP12 | SWAP13 | SWAP14 | SWAP15 | SWAP16 => 0,
        other => unreachable!("no stack delta recorded for {other:?}"),
    }
}

/// DUPn reaching `depth` items down the stack (1-based).
pub(crate) fn dup_instruction(depth: usize) -> Opcode {
    use Opcode::*;
    match depth {
        1 => DUP1,
        2 => DUP2,
        3 => DUP3,
        4 => DUP4,
        5 => DUP5,
        6 => DUP6,
        7 => DUP7,
        8 => DUP8,
        9 => DUP9,
        10 => DUP10,
        11 => DUP11,
        12 => DUP12,
        13 => DUP13,
        14 => DUP14,
        15 => DUP15,
        16 => DUP16,
        _ => panic!("stack too deep: DUP{depth}"),
    }
}

/// SWAPn exchanging the top with the item `distance` below it.
pub(crate) fn swap_instruction(distance: usize) -> Opcode {
    use Opcode::*;
    match distance {
        1 => SWAP1,
        2 => SWAP2,
        3 => SWAP3,
        4 => SWAP4,
        5 => SWAP5,
        6 => SWAP6,
        7 => SWAP7,
        8 => SWAP8,
        9 => SWAP9,
        10 => SWAP10,
        11 => SWAP11,
        12 => SWAP12,
        13 => SWAP13,
        14 => SWAP14,
        15 => SWAP15,
        16 => SWAP16,
        _ => panic!("stack too deep: SWAP{distance}"),
    }
}
