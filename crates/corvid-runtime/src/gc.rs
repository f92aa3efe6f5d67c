//! The heap: an arena of `Obj` slots plus an incremental mark-sweep collector.
//!
//! Rather than an intrusive linked list of raw `Obj*` pointers, objects live in
//! a `Vec<Option<Slot>>` and are addressed by `GcRef<T>` (a `u32` index with a
//! phantom type). That sidesteps the ownership-checker fight an intrusive list
//! of mutable aliases would pick with Rust, at the cost of one `unwrap`-style
//! assert per heap access — see DESIGN.md.
//!
//! Collection itself is still classic tri-color mark-sweep: callers hand in a
//! closure that marks their own roots, `collect_garbage` drains the resulting
//! gray worklist to black, purges the string interner of unmarked keys, then
//! sweeps every unmarked slot.

use crate::object::{
    fnv1a_hash, GcRef, Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjFunction, ObjInstance,
    ObjNative, ObjString, ObjUpvalue,
};
use crate::table::Table;
use crate::value::Value;

struct Slot {
    obj: Obj,
    marked: bool,
}

/// Grow threshold multiplier applied to `bytes_allocated` after every sweep.
const GC_GROWTH_FACTOR: usize = 2;
/// Floor for `next_gc` so a nearly-empty heap doesn't collect on every allocation.
const GC_MIN_THRESHOLD: usize = 1024;

pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    /// The string interner: a set of unique `ObjString`s, represented as a table
    /// mapping each interned string to `Value::Nil`.
    pub strings: Table,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            bytes_allocated: 0,
            next_gc: GC_MIN_THRESHOLD,
            strings: Table::new(),
        }
    }

    pub fn should_collect(&self, stress: bool) -> bool {
        stress || self.bytes_allocated > self.next_gc
    }

    fn alloc(&mut self, obj: Obj) -> GcRef<Obj> {
        self.bytes_allocated += Self::size_of(&obj);
        let index = if let Some(i) = self.free.pop() {
            self.slots[i as usize] = Some(Slot { obj, marked: false });
            i
        } else {
            let i = self.slots.len() as u32;
            self.slots.push(Some(Slot { obj, marked: false }));
            i
        };
        GcRef::new(index)
    }

    pub fn alloc_string(&mut self, s: ObjString) -> GcRef<ObjString> {
        self.alloc(Obj::String(s)).cast()
    }
    pub fn alloc_function(&mut self, f: ObjFunction) -> GcRef<ObjFunction> {
        self.alloc(Obj::Function(f)).cast()
    }
    pub fn alloc_native(&mut self, n: ObjNative) -> GcRef<ObjNative> {
        self.alloc(Obj::Native(n)).cast()
    }
    pub fn alloc_upvalue(&mut self, u: ObjUpvalue) -> GcRef<ObjUpvalue> {
        self.alloc(Obj::Upvalue(u)).cast()
    }
    pub fn alloc_closure(&mut self, c: ObjClosure) -> GcRef<ObjClosure> {
        self.alloc(Obj::Closure(c)).cast()
    }
    pub fn alloc_class(&mut self, c: ObjClass) -> GcRef<ObjClass> {
        self.alloc(Obj::Class(c)).cast()
    }
    pub fn alloc_instance(&mut self, i: ObjInstance) -> GcRef<ObjInstance> {
        self.alloc(Obj::Instance(i)).cast()
    }
    pub fn alloc_bound_method(&mut self, b: ObjBoundMethod) -> GcRef<ObjBoundMethod> {
        self.alloc(Obj::BoundMethod(b)).cast()
    }

    fn slot(&self, r: GcRef<Obj>) -> &Slot {
        self.slots[r.slot() as usize].as_ref().expect("dangling GcRef")
    }
    fn slot_mut(&mut self, r: GcRef<Obj>) -> &mut Slot {
        self.slots[r.slot() as usize].as_mut().expect("dangling GcRef")
    }

    pub fn obj(&self, r: GcRef<Obj>) -> &Obj {
        &self.slot(r).obj
    }

    pub fn string(&self, r: GcRef<ObjString>) -> &ObjString {
        match &self.slot(r.erase()).obj {
            Obj::String(s) => s,
            other => unreachable!("GcRef<ObjString> pointed at {}", other.type_name()),
        }
    }
    pub fn function(&self, r: GcRef<ObjFunction>) -> &ObjFunction {
        match &self.slot(r.erase()).obj {
            Obj::Function(f) => f,
            other => unreachable!("GcRef<ObjFunction> pointed at {}", other.type_name()),
        }
    }
    pub fn function_mut(&mut self, r: GcRef<ObjFunction>) -> &mut ObjFunction {
        match &mut self.slot_mut(r.erase()).obj {
            Obj::Function(f) => f,
            _ => unreachable!(),
        }
    }
    pub fn native(&self, r: GcRef<ObjNative>) -> &ObjNative {
        match &self.slot(r.erase()).obj {
            Obj::Native(n) => n,
            _ => unreachable!(),
        }
    }
    pub fn upvalue(&self, r: GcRef<ObjUpvalue>) -> &ObjUpvalue {
        match &self.slot(r.erase()).obj {
            Obj::Upvalue(u) => u,
            _ => unreachable!(),
        }
    }
    pub fn upvalue_mut(&mut self, r: GcRef<ObjUpvalue>) -> &mut ObjUpvalue {
        match &mut self.slot_mut(r.erase()).obj {
            Obj::Upvalue(u) => u,
            _ => unreachable!(),
        }
    }
    pub fn closure(&self, r: GcRef<ObjClosure>) -> &ObjClosure {
        match &self.slot(r.erase()).obj {
            Obj::Closure(c) => c,
            _ => unreachable!(),
        }
    }
    pub fn class(&self, r: GcRef<ObjClass>) -> &ObjClass {
        match &self.slot(r.erase()).obj {
            Obj::Class(c) => c,
            _ => unreachable!(),
        }
    }
    pub fn class_mut(&mut self, r: GcRef<ObjClass>) -> &mut ObjClass {
        match &mut self.slot_mut(r.erase()).obj {
            Obj::Class(c) => c,
            _ => unreachable!(),
        }
    }
    pub fn instance(&self, r: GcRef<ObjInstance>) -> &ObjInstance {
        match &self.slot(r.erase()).obj {
            Obj::Instance(i) => i,
            _ => unreachable!(),
        }
    }
    pub fn instance_mut(&mut self, r: GcRef<ObjInstance>) -> &mut ObjInstance {
        match &mut self.slot_mut(r.erase()).obj {
            Obj::Instance(i) => i,
            _ => unreachable!(),
        }
    }
    pub fn bound_method(&self, r: GcRef<ObjBoundMethod>) -> &ObjBoundMethod {
        match &self.slot(r.erase()).obj {
            Obj::BoundMethod(b) => b,
            _ => unreachable!(),
        }
    }

    pub fn is_marked(&self, r: GcRef<Obj>) -> bool {
        self.slot(r).marked
    }

    /// Interns `bytes`, allocating a new `ObjString` only if this exact content
    /// hasn't been seen before — at most one `ObjString` exists per distinct
    /// byte content for the life of the heap.
    pub fn intern(&mut self, bytes: Vec<u8>) -> GcRef<ObjString> {
        let hash = fnv1a_hash(&bytes);
        if let Some(existing) = self.strings.find_string(self, &bytes, hash) {
            return existing;
        }
        let obj = ObjString { bytes: bytes.into_boxed_slice(), hash };
        let r = self.alloc_string(obj);
        self.strings.set(r, hash, Value::Nil);
        r
    }

    pub fn format_value(&self, value: Value) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(n),
            Value::Obj(r) => self.format_obj(r),
        }
    }

    fn format_obj(&self, r: GcRef<Obj>) -> String {
        match self.obj(r) {
            Obj::String(s) => s.as_str().into_owned(),
            Obj::Function(f) => match f.name {
                Some(name) => format!("<fn {}>", self.string(name).as_str()),
                None => "<script>".to_string(),
            },
            Obj::Native(n) => format!("<native fn {}>", self.string(n.name).as_str()),
            Obj::Upvalue(_) => "<upvalue>".to_string(),
            Obj::Closure(c) => self.format_obj(c.function.erase()),
            Obj::Class(c) => self.string(c.name).as_str().into_owned(),
            Obj::Instance(i) => {
                let class = self.class(i.class);
                format!("{} instance", self.string(class.name).as_str())
            }
            Obj::BoundMethod(b) => {
                let closure = self.closure(b.method);
                self.format_obj(closure.function.erase())
            }
        }
    }

    /// Approximate footprint used to decide when to collect. Doesn't need to be
    /// exact, only monotonic in the object's real size.
    fn size_of(obj: &Obj) -> usize {
        match obj {
            Obj::String(s) => std::mem::size_of::<ObjString>() + s.bytes.len(),
            Obj::Function(f) => {
                std::mem::size_of::<ObjFunction>()
                    + f.chunk.code.len()
                    + f.chunk.constants.len() * std::mem::size_of::<Value>()
            }
            Obj::Native(_) => std::mem::size_of::<ObjNative>(),
            Obj::Upvalue(_) => std::mem::size_of::<ObjUpvalue>(),
            Obj::Closure(c) => std::mem::size_of::<ObjClosure>() + c.upvalues.len() * 4,
            Obj::Class(_) => std::mem::size_of::<ObjClass>(),
            Obj::Instance(_) => std::mem::size_of::<ObjInstance>(),
            Obj::BoundMethod(_) => std::mem::size_of::<ObjBoundMethod>(),
        }
    }

    pub fn mark_value(&mut self, value: Value, gray: &mut Vec<GcRef<Obj>>) {
        if let Value::Obj(r) = value {
            self.mark_object(r, gray);
        }
    }

    pub fn mark_object(&mut self, r: GcRef<Obj>, gray: &mut Vec<GcRef<Obj>>) {
        let slot = self.slot_mut(r);
        if !slot.marked {
            slot.marked = true;
            gray.push(r);
        }
    }

    fn blacken(&mut self, r: GcRef<Obj>, gray: &mut Vec<GcRef<Obj>>) {
        enum Child {
            Val(Value),
            Obj(GcRef<Obj>),
        }
        let mut children: Vec<Child> = Vec::new();
        match self.obj(r) {
            Obj::String(_) | Obj::Native(_) => {}
            Obj::Function(f) => {
                if let Some(name) = f.name {
                    children.push(Child::Obj(name.erase()));
                }
                for c in &f.chunk.constants {
                    children.push(Child::Val(*c));
                }
            }
            Obj::Upvalue(ObjUpvalue::Closed(v)) => children.push(Child::Val(*v)),
            Obj::Upvalue(ObjUpvalue::Open(_)) => {}
            Obj::Closure(c) => {
                children.push(Child::Obj(c.function.erase()));
                for u in &c.upvalues {
                    children.push(Child::Obj(u.erase()));
                }
            }
            Obj::Class(c) => {
                children.push(Child::Obj(c.name.erase()));
                for (k, v) in c.methods.iter() {
                    children.push(Child::Obj(k.erase()));
                    children.push(Child::Val(v));
                }
            }
            Obj::Instance(i) => {
                children.push(Child::Obj(i.class.erase()));
                for (k, v) in i.fields.iter() {
                    children.push(Child::Obj(k.erase()));
                    children.push(Child::Val(v));
                }
            }
            Obj::BoundMethod(b) => {
                children.push(Child::Val(b.receiver));
                children.push(Child::Obj(b.method.erase()));
            }
        }
        for child in children {
            match child {
                Child::Val(v) => self.mark_value(v, gray),
                Child::Obj(o) => self.mark_object(o, gray),
            }
        }
    }

    /// Runs one full mark-sweep cycle. `mark_roots` is handed a live `&mut Heap`
    /// and the gray worklist so it can mark whatever the caller considers a root
    /// (value stack, call frames, open upvalues, globals, `init_string`, the
    /// active compiler chain) before tracing begins.
    pub fn collect_garbage(&mut self, mark_roots: impl FnOnce(&mut Heap, &mut Vec<GcRef<Obj>>)) {
        let mut gray = Vec::new();
        mark_roots(self, &mut gray);
        while let Some(r) = gray.pop() {
            self.blacken(r, &mut gray);
        }

        // Purge interner entries for strings nothing else kept alive, before they
        // become dangling references once their slot is freed below.
        let mut strings = std::mem::take(&mut self.strings);
        strings.remove_unmarked(self);
        self.strings = strings;

        for slot in self.slots.iter_mut() {
            match slot {
                Some(s) if s.marked => s.marked = false,
                Some(_) => *slot = None,
                None => {}
            }
        }
        self.free = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| i as u32)
            .collect();

        self.bytes_allocated = self.slots.iter().flatten().map(|s| Self::size_of(&s.obj)).sum();
        self.next_gc = (self.bytes_allocated * GC_GROWTH_FACTOR).max(GC_MIN_THRESHOLD);
    }

    /// Number of live (unfreed) heap slots — used by tests to assert a cycle
    /// actually reclaimed unreachable objects.
    #[cfg(test)]
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

fn format_number(n: f64) -> String {
    if n.is_infinite() {
        return if n > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedupes_equal_bytes() {
        let mut heap = Heap::new();
        let a = heap.intern(b"hello".to_vec());
        let b = heap.intern(b"hello".to_vec());
        assert!(a.same_slot(b));
    }

    #[test]
    fn unreachable_strings_are_swept() {
        let mut heap = Heap::new();
        let _kept = heap.intern(b"kept".to_vec());
        let _dropped = heap.intern(b"dropped".to_vec());
        let kept_ref = heap.intern(b"kept".to_vec());
        heap.collect_garbage(|heap, gray| heap.mark_object(kept_ref.erase(), gray));
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn formats_integral_floats_without_a_decimal_point() {
        let heap = Heap::new();
        insta::assert_snapshot!(heap.format_value(Value::Number(1_000_000.0)), @"1000000");
    }

    #[test]
    fn formats_fractional_floats_with_their_digits() {
        let heap = Heap::new();
        insta::assert_snapshot!(heap.format_value(Value::Number(3.25)), @"3.25");
    }

    #[test]
    fn formats_non_finite_floats_lowercase() {
        let heap = Heap::new();
        insta::assert_snapshot!(heap.format_value(Value::Number(f64::INFINITY)), @"inf");
        insta::assert_snapshot!(heap.format_value(Value::Number(f64::NAN)), @"nan");
    }
}
