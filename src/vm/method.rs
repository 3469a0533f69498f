//! Method descriptors and the program that owns them.

use std::cell::OnceCell;
use std::fmt;

use super::bytecode::{Insn, InsnIter};
use super::value::Value;
use crate::jit::CodePtr;

/// Index of a method in its [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub usize);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Static information attached to a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallData {
    pub callee: MethodId,
    /// Number of arguments, receiver excluded.
    pub argc: usize,
}

/// One compilable unit.
#[derive(Debug)]
pub struct Method {
    name: String,
    num_locals: usize,
    iseq: Vec<u64>,
    call_data: Vec<CallData>,
    /// Written at most once, after the native code is in place.
    jit_entry: OnceCell<CodePtr>,
}

impl Method {
    pub fn new(
        name: impl Into<String>,
        num_locals: usize,
        iseq: Vec<u64>,
        call_data: Vec<CallData>,
    ) -> Self {
        Self {
            name: name.into(),
            num_locals,
            iseq,
            call_data,
            jit_entry: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of locals; all locals are parameters.
    pub fn num_locals(&self) -> usize {
        self.num_locals
    }

    pub fn iseq(&self) -> &[u64] {
        &self.iseq
    }

    pub fn call_data(&self, idx: usize) -> Option<&CallData> {
        self.call_data.get(idx)
    }

    pub fn insns(&self) -> InsnIter<'_> {
        InsnIter::new(&self.iseq)
    }

    pub fn jit_entry(&self) -> Option<CodePtr> {
        self.jit_entry.get().copied()
    }

    pub fn is_compiled(&self) -> bool {
        self.jit_entry.get().is_some()
    }

    /// Install a compiled entry point. The first entry installed wins and is
    /// returned; later entries are ignored.
    pub fn install_jit_entry(&self, entry: CodePtr) -> CodePtr {
        *self.jit_entry.get_or_init(|| entry)
    }
}

/// The method table.
#[derive(Debug, Default)]
pub struct Program {
    methods: Vec<Method>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, method: Method) -> MethodId {
        self.methods.push(method);
        MethodId(self.methods.len() - 1)
    }

    pub fn method(&self, id: MethodId) -> Option<&Method> {
        self.methods.get(id.0)
    }

    pub fn lookup(&self, name: &str) -> Option<MethodId> {
        self.methods
            .iter()
            .position(|m| m.name == name)
            .map(MethodId)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MethodId, &Method)> {
        self.methods.iter().enumerate().map(|(i, m)| (MethodId(i), m))
    }

    /// Human-readable bytecode listing of one method.
    pub fn listing(&self, id: MethodId) -> Option<String> {
        let method = self.method(id)?;
        let mut out = format!(
            "== {} (locals: {}, words: {})\n",
            method.name,
            method.num_locals,
            method.iseq.len()
        );
        for item in method.insns() {
            match item {
                Ok((pc, Insn::SendWithoutBlock { call_data })) => {
                    let target = method
                        .call_data(call_data)
                        .map(|cd| {
                            let name = self.method(cd.callee).map_or("?", |m| m.name());
                            format!("{}, argc:{}", name, cd.argc)
                        })
                        .unwrap_or_else(|| format!("<bad calldata {}>", call_data));
                    out.push_str(&format!("{:04} send_without_block <{}>\n", pc, target));
                }
                Ok((pc, insn)) => out.push_str(&format!("{:04} {}\n", pc, insn)),
                Err(e) => {
                    out.push_str(&format!("!! {}\n", e));
                    break;
                }
            }
        }
        Some(out)
    }
}

/// Incremental construction of a [`Method`].
#[derive(Debug, Clone)]
pub struct MethodBuilder {
    name: String,
    num_locals: usize,
    iseq: Vec<u64>,
    call_data: Vec<CallData>,
}

impl MethodBuilder {
    pub fn new(name: impl Into<String>, num_locals: usize) -> Self {
        Self {
            name: name.into(),
            num_locals,
            iseq: Vec::new(),
            call_data: Vec::new(),
        }
    }

    pub fn insn(&mut self, insn: Insn) -> &mut Self {
        insn.encode_into(&mut self.iseq);
        self
    }

    /// Append a raw word, bypassing the encoder.
    pub fn raw(&mut self, word: u64) -> &mut Self {
        self.iseq.push(word);
        self
    }

    pub fn nop(&mut self) -> &mut Self {
        self.insn(Insn::Nop)
    }

    pub fn getlocal(&mut self, idx: usize) -> &mut Self {
        self.insn(Insn::GetLocal { idx })
    }

    pub fn setlocal(&mut self, idx: usize) -> &mut Self {
        self.insn(Insn::SetLocal { idx })
    }

    pub fn putnil(&mut self) -> &mut Self {
        self.insn(Insn::PutNil)
    }

    pub fn putself(&mut self) -> &mut Self {
        self.insn(Insn::PutSelf)
    }

    pub fn putobject(&mut self, value: Value) -> &mut Self {
        self.insn(Insn::PutObject(value))
    }

    pub fn putobject_int_0(&mut self) -> &mut Self {
        self.insn(Insn::PutObjectInt0)
    }

    pub fn putobject_int_1(&mut self) -> &mut Self {
        self.insn(Insn::PutObjectInt1)
    }

    pub fn dup(&mut self) -> &mut Self {
        self.insn(Insn::Dup)
    }

    pub fn pop(&mut self) -> &mut Self {
        self.insn(Insn::Pop)
    }

    pub fn opt_plus(&mut self) -> &mut Self {
        self.insn(Insn::OptPlus)
    }

    pub fn opt_minus(&mut self) -> &mut Self {
        self.insn(Insn::OptMinus)
    }

    pub fn opt_mult(&mut self) -> &mut Self {
        self.insn(Insn::OptMult)
    }

    pub fn opt_lt(&mut self) -> &mut Self {
        self.insn(Insn::OptLt)
    }

    pub fn jump(&mut self, offset: i64) -> &mut Self {
        self.insn(Insn::Jump { offset })
    }

    pub fn branchif(&mut self, offset: i64) -> &mut Self {
        self.insn(Insn::BranchIf { offset })
    }

    /// Call `callee` with `argc` arguments; the receiver sits below them.
    pub fn send(&mut self, callee: MethodId, argc: usize) -> &mut Self {
        self.call_data.push(CallData { callee, argc });
        let call_data = self.call_data.len() - 1;
        self.insn(Insn::SendWithoutBlock { call_data })
    }

    pub fn leave(&mut self) -> &mut Self {
        self.insn(Insn::Leave)
    }

    pub fn build(&self) -> Method {
        Method::new(
            self.name.clone(),
            self.num_locals,
            self.iseq.clone(),
            self.call_data.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_encodes_call_data() {
        let mut program = Program::new();
        let callee = program.add(MethodBuilder::new("one", 0).putobject_int_1().leave().build());
        let caller = MethodBuilder::new("main", 0)
            .putself()
            .send(callee, 0)
            .leave()
            .build();

        assert_eq!(caller.iseq().len(), 1 + 2 + 1);
        assert_eq!(caller.call_data(0), Some(&CallData { callee, argc: 0 }));
        assert_eq!(caller.call_data(1), None);
    }

    #[test]
    fn test_lookup_by_name() {
        let mut program = Program::new();
        let a = program.add(MethodBuilder::new("a", 0).leave().build());
        let b = program.add(MethodBuilder::new("b", 1).leave().build());
        assert_eq!(program.lookup("a"), Some(a));
        assert_eq!(program.lookup("b"), Some(b));
        assert_eq!(program.lookup("c"), None);
        assert_eq!(program.len(), 2);
    }

    #[test]
    fn test_listing_resolves_callee_names() {
        let mut program = Program::new();
        let two = program.add(
            MethodBuilder::new("two", 0)
                .putobject(Value::fixnum(2))
                .leave()
                .build(),
        );
        let main = program.add(
            MethodBuilder::new("main", 0)
                .putself()
                .send(two, 0)
                .leave()
                .build(),
        );
        let listing = program.listing(main).unwrap();
        assert!(listing.contains("0000 putself"), "{}", listing);
        assert!(listing.contains("0001 send_without_block <two, argc:0>"), "{}", listing);
        assert!(listing.contains("0003 leave"), "{}", listing);
    }

    #[test]
    fn test_listing_reports_decode_errors() {
        let mut program = Program::new();
        let id = program.add(MethodBuilder::new("bad", 0).raw(0xDEAD).build());
        let listing = program.listing(id).unwrap();
        assert!(listing.contains("unknown opcode 0xdead"), "{}", listing);
    }
}
