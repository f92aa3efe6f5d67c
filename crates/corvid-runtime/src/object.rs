//! Heap object payloads and the `GcRef` handle used to refer to them.
//!
//! Every heap object lives in the `Heap` arena (see `gc.rs`) and is referred to
//! by index rather than by pointer, so the object graph — which is naturally
//! cyclic (class ↔ method ↔ closure ↔ upvalue ↔ instance) — never has to fight
//! the borrow checker. `GcRef<T>` is `Copy` and carries a phantom type purely
//! for call-site ergonomics; the underlying arena stores one untyped `Obj` enum
//! per slot and the `Heap` accessors assert the expected variant on access.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::bytecode::Chunk;
use crate::table::Table;
use crate::value::Value;

/// A typed handle into the heap arena. Cheap to copy, compares by slot identity.
pub struct GcRef<T> {
    index: u32,
    marker: PhantomData<fn() -> T>,
}

impl<T> GcRef<T> {
    pub(crate) fn new(index: u32) -> Self {
        GcRef { index, marker: PhantomData }
    }

    pub(crate) fn slot(self) -> u32 {
        self.index
    }

    /// Erase the static type, yielding the untyped handle `Value::Obj` stores.
    pub fn erase(self) -> GcRef<Obj> {
        GcRef::new(self.index)
    }

    /// Reinterpret as a handle to a different payload type. Only meaningful when
    /// the caller already knows (from context) what variant lives at this slot;
    /// `Heap`'s typed accessors are the only code that relies on this being correct.
    pub(crate) fn cast<U>(self) -> GcRef<U> {
        GcRef::new(self.index)
    }

    pub fn same_slot(self, other: Self) -> bool {
        self.index == other.index
    }
}

impl<T> Clone for GcRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for GcRef<T> {}
impl<T> PartialEq for GcRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}
impl<T> Eq for GcRef<T> {}
impl<T> Hash for GcRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}
impl<T> fmt::Debug for GcRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcRef({})", self.index)
    }
}

/// FNV-1a, 32-bit. Used for both string hashing and table probing.
pub fn fnv1a_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Immutable, interned byte string. At most one `ObjString` exists per distinct
/// byte content for the life of the VM (see `Heap::intern`).
#[derive(Debug)]
pub struct ObjString {
    pub bytes: Box<[u8]>,
    pub hash: u32,
}

impl ObjString {
    /// Lossy UTF-8 view for printing; the language itself is byte-agnostic.
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Script,
    Function,
    Method,
}

#[derive(Debug)]
pub struct ObjFunction {
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    pub name: Option<GcRef<ObjString>>,
}

impl ObjFunction {
    pub fn new() -> Self {
        ObjFunction { arity: 0, upvalue_count: 0, chunk: Chunk::new(), name: None }
    }
}

impl Default for ObjFunction {
    fn default() -> Self {
        Self::new()
    }
}

/// Natives get a fallible calling convention: `Ok` pushes a value, `Err` becomes
/// a runtime error through the same reporting path as any other.
pub type NativeFn = fn(argc: u8, args: &[Value]) -> Result<Value, String>;

pub struct ObjNative {
    pub name: GcRef<ObjString>,
    pub function: NativeFn,
}

impl fmt::Debug for ObjNative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjNative").field("name", &self.name).finish()
    }
}

/// Open while its target stack slot is live; closed once the slot dies, at which
/// point `location` is conceptually `&self.closed` (modeled here as owning the
/// value directly rather than via a raw pointer back into itself).
#[derive(Debug)]
pub enum ObjUpvalue {
    Open(usize),
    Closed(Value),
}

#[derive(Debug)]
pub struct ObjClosure {
    pub function: GcRef<ObjFunction>,
    pub upvalues: Vec<GcRef<ObjUpvalue>>,
}

#[derive(Debug)]
pub struct ObjClass {
    pub name: GcRef<ObjString>,
    pub methods: Table,
}

impl ObjClass {
    pub fn new(name: GcRef<ObjString>) -> Self {
        ObjClass { name, methods: Table::new() }
    }
}

#[derive(Debug)]
pub struct ObjInstance {
    pub class: GcRef<ObjClass>,
    pub fields: Table,
}

impl ObjInstance {
    pub fn new(class: GcRef<ObjClass>) -> Self {
        ObjInstance { class, fields: Table::new() }
    }
}

#[derive(Debug)]
pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: GcRef<ObjClosure>,
}

/// The untyped payload every `GcRef` ultimately indexes. `Heap`'s typed accessors
/// (`heap.string(r)`, `heap.closure(r)`, ...) are the only place that unwraps this.
#[derive(Debug)]
pub enum Obj {
    String(ObjString),
    Function(ObjFunction),
    Native(ObjNative),
    Upvalue(ObjUpvalue),
    Closure(ObjClosure),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
}

impl Obj {
    pub fn type_name(&self) -> &'static str {
        match self {
            Obj::String(_) => "string",
            Obj::Function(_) => "function",
            Obj::Native(_) => "native function",
            Obj::Upvalue(_) => "upvalue",
            Obj::Closure(_) => "closure",
            Obj::Class(_) => "class",
            Obj::Instance(_) => "instance",
            Obj::BoundMethod(_) => "bound method",
        }
    }
}
