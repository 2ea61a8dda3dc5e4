//! The uniform object header and the object/class/method model built on it.

use crate::rc::RcWord;
use crate::types::TypeId;
use crate::value::Value;
use ember_bytecode::Code;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// GC doubly-linked-list linkage, present only on tracked objects.
///
/// The `visited`/`finalized` bits live in a separate byte rather than
/// stolen from the `next`/`prev` pointers' low bits — see [`GcLink::flags`]
/// — which keeps pointer arithmetic honest: the flags still share the
/// header's cache line, without the tag-masking every pointer read would
/// otherwise need.
#[derive(Debug)]
pub struct GcLink {
    pub(crate) next: *mut ObjectHeader,
    pub(crate) prev: *mut ObjectHeader,
    flags: AtomicU8,
}

const VISITED_BIT: u8 = 1 << 0;
const FINALIZED_BIT: u8 = 1 << 1;

impl GcLink {
    fn new() -> Self {
        Self {
            next: std::ptr::null_mut(),
            prev: std::ptr::null_mut(),
            flags: AtomicU8::new(0),
        }
    }

    /// Has this object been visited in the current collection pass?
    pub fn is_visited(&self) -> bool {
        self.flags.load(Ordering::Acquire) & VISITED_BIT != 0
    }

    /// Mark this object as visited.
    pub fn set_visited(&self, visited: bool) {
        self.update_bit(VISITED_BIT, visited);
    }

    /// Has this object's finalizer already run?
    pub fn is_finalized(&self) -> bool {
        self.flags.load(Ordering::Acquire) & FINALIZED_BIT != 0
    }

    /// Mark this object as finalized (idempotent: finalizers run at most once).
    pub fn set_finalized(&self, finalized: bool) {
        self.update_bit(FINALIZED_BIT, finalized);
    }

    fn update_bit(&self, bit: u8, set: bool) {
        loop {
            let cur = self.flags.load(Ordering::Acquire);
            let new = if set { cur | bit } else { cur & !bit };
            if new == cur
                || self
                    .flags
                    .compare_exchange_weak(cur, new, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                return;
            }
        }
    }
}

/// The header prefixing every heap-allocated runtime value.
///
/// Carries the three things every runtime value needs: a type descriptor
/// id, a reference-count word, and optional GC linkage.
pub struct ObjectHeader {
    /// Identifies this object's type descriptor in the [`crate::types::TypeRegistry`].
    pub type_id: TypeId,
    /// Strong/weak reference count word.
    pub rc: RcWord,
    /// Present only when this object is GC-tracked (opt-in at allocation).
    ///
    /// The recursive shared lock guarding a container's fields is not
    /// stored here: monitors are keyed by the object's address in the
    /// interpreter's lock table and materialised on first `SYNC`.
    pub gc: Option<GcLink>,
}

impl ObjectHeader {
    /// A fresh, non-tracked header for an ordinary (acyclic-shaped) object.
    pub fn new(type_id: TypeId) -> Self {
        Self {
            type_id,
            rc: RcWord::new(),
            gc: None,
        }
    }

    /// A fresh header opted into GC tracking at allocation time.
    pub fn new_tracked(type_id: TypeId) -> Self {
        let header = Self {
            type_id,
            rc: RcWord::new(),
            gc: Some(GcLink::new()),
        };
        header.rc.set_gc_tracked(true);
        header
    }

    /// The immortal header used for compile-time singletons (Nil, True,
    /// False) and interned constants: all RC traffic on it is a no-op.
    pub fn immortal(type_id: TypeId) -> Self {
        Self {
            type_id,
            rc: RcWord::immortal(),
            gc: None,
        }
    }

    /// Is this object opted into cycle-tracing?
    pub fn is_tracked(&self) -> bool {
        self.gc.is_some()
    }
}

/// A plain instance: a class id plus its field slots.
///
/// Field storage is a flat `Vec<Value>` indexed by the class's layout:
/// fields are positional, named lookup happens once at compile time via
/// the class's field-name table.
pub struct Object {
    pub header: ObjectHeader,
    pub class_id: usize,
    pub fields: Vec<Value>,
}

impl Object {
    /// Create a new, non-tracked object instance with `field_count` nil slots.
    pub fn new(type_id: TypeId, class_id: usize, field_count: usize) -> Self {
        Self {
            header: ObjectHeader::new(type_id),
            class_id,
            fields: vec![Value::null(); field_count],
        }
    }

    /// Create a GC-tracked object instance (for classes whose fields may
    /// participate in reference cycles).
    pub fn new_tracked(type_id: TypeId, class_id: usize, field_count: usize) -> Self {
        Self {
            header: ObjectHeader::new_tracked(type_id),
            class_id,
            fields: vec![Value::null(); field_count],
        }
    }

    /// Read a field by positional index.
    pub fn get_field(&self, index: usize) -> Option<&Value> {
        self.fields.get(index)
    }

    /// Write a field by positional index; returns `false` if out of range.
    pub fn set_field(&mut self, index: usize, value: Value) -> bool {
        if index < self.fields.len() {
            self.fields[index] = value;
            true
        } else {
            false
        }
    }
}

/// Class definition metadata: field layout and method dispatch table.
#[derive(Debug, Clone)]
pub struct Class {
    /// Class name.
    pub name: String,
    /// Number of instance fields.
    pub field_count: usize,
    /// Method dispatch table.
    pub vtable: VTable,
}

/// A class's method dispatch table, indexed by method slot.
#[derive(Debug, Clone, Default)]
pub struct VTable {
    /// Function ids of each method, in declaration order.
    pub methods: Vec<usize>,
}

impl VTable {
    /// An empty vtable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a method, returning its slot.
    pub fn add_method(&mut self, function_id: usize) -> usize {
        self.methods.push(function_id);
        self.methods.len() - 1
    }
}

/// A heap-allocated, variable-sized `list` value.
///
/// Laid out with `header` as the first field so a `*const ObjectHeader`
/// obtained from the collector's generation lists can be reinterpreted
/// directly as `*const ListObject` (and vice versa via [`Value::from_ptr`]).
#[repr(C)]
pub struct ListObject {
    pub header: ObjectHeader,
    pub items: Vec<Value>,
}

impl ListObject {
    /// A GC-tracked list (lists may hold references to other tracked values).
    pub fn new_tracked(type_id: TypeId, items: Vec<Value>) -> Box<Self> {
        Box::new(Self {
            header: ObjectHeader::new_tracked(type_id),
            items,
        })
    }
}

/// A heap-allocated, fixed-size `tuple` value. Same layout rationale as
/// [`ListObject`].
#[repr(C)]
pub struct TupleObject {
    pub header: ObjectHeader,
    pub items: Vec<Value>,
}

impl TupleObject {
    /// A GC-tracked tuple.
    pub fn new_tracked(type_id: TypeId, items: Vec<Value>) -> Box<Self> {
        Box::new(Self {
            header: ObjectHeader::new_tracked(type_id),
            items,
        })
    }
}

/// A heap-allocated `dict`, backed by an insertion-ordered association list
/// (ember dicts are small in practice; a hash index is not worth the extra
/// indirection for this implementation).
#[repr(C)]
pub struct DictObject {
    pub header: ObjectHeader,
    pub entries: Vec<(Value, Value)>,
}

impl DictObject {
    /// A GC-tracked dict.
    pub fn new_tracked(type_id: TypeId) -> Box<Self> {
        Box::new(Self {
            header: ObjectHeader::new_tracked(type_id),
            entries: Vec::new(),
        })
    }

    /// Find the slot for `key` by structural `Value` equality.
    pub fn find(&self, key: Value) -> Option<usize> {
        self.entries.iter().position(|(k, _)| *k == key)
    }

    /// Insert or overwrite `key`.
    pub fn insert(&mut self, key: Value, value: Value) {
        match self.find(key) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((key, value)),
        }
    }
}

/// A closure (or plain top-level function, which is a closure with no
/// captures): the compiled code it runs plus the values captured from
/// enclosing scopes at creation time (`MKFN`).
#[repr(C)]
pub struct Closure {
    pub header: ObjectHeader,
    pub code: Arc<Code>,
    pub captured: Vec<Value>,
}

impl Closure {
    /// A GC-tracked closure.
    pub fn new_tracked(type_id: TypeId, code: Arc<Code>, captured: Vec<Value>) -> Box<Self> {
        Box::new(Self {
            header: ObjectHeader::new_tracked(type_id),
            code,
            captured,
        })
    }
}

/// A method bound to a receiver (`MKBND`), produced by `LDMETH`.
#[repr(C)]
pub struct BoundMethod {
    pub header: ObjectHeader,
    pub instance: Value,
    pub code: Arc<Code>,
}

impl BoundMethod {
    /// A GC-tracked bound method.
    pub fn new_tracked(type_id: TypeId, instance: Value, code: Arc<Code>) -> Box<Self> {
        Box::new(Self {
            header: ObjectHeader::new_tracked(type_id),
            instance,
            code,
        })
    }
}

/// A heap-allocated `str` value. Interned string literals and any string
/// produced at runtime (concatenation, `Str()` conversion, panic messages)
/// share this representation.
#[repr(C)]
pub struct StringObject {
    pub header: ObjectHeader,
    pub data: String,
}

impl StringObject {
    /// A GC-tracked string. Strings hold no references to other tracked
    /// objects, so tracking only matters for heap accounting, not tracing.
    pub fn new_tracked(type_id: TypeId, data: String) -> Box<Self> {
        Box::new(Self {
            header: ObjectHeader::new_tracked(type_id),
            data,
        })
    }
}

/// A future produced by `SPW`, fulfilled once the spawned fiber completes.
///
/// `AWAIT` polls `result`; a `None` means the spawned fiber hasn't finished
/// yet, at which point the awaiting fiber suspends and retries the same
/// instruction once rescheduled.
#[repr(C)]
pub struct FutureObject {
    pub header: ObjectHeader,
    pub result: Option<Value>,
    /// True when `result` is a rejection: the spawned fiber panicked, and
    /// the stored value is the panic payload to re-raise in the awaiter.
    pub failed: bool,
}

impl FutureObject {
    /// A GC-tracked, not-yet-fulfilled future.
    pub fn new_tracked(type_id: TypeId) -> Box<Self> {
        Box::new(Self {
            header: ObjectHeader::new_tracked(type_id),
            result: None,
            failed: false,
        })
    }
}

/// Enumerate a [`FutureObject`]'s fulfilled value, if any, for the tracing
/// collector.
pub fn trace_future(object: *const ObjectHeader, visit: &mut dyn FnMut(Value)) {
    let future = object as *const FutureObject;
    if let Some(value) = unsafe { (*future).result } {
        visit(value);
    }
}

/// An iterator over a list, tuple, or dict (`LDITER`/`NXT`).
#[repr(C)]
pub struct IteratorObject {
    pub header: ObjectHeader,
    pub source: Value,
    pub index: usize,
}

impl IteratorObject {
    /// A GC-tracked iterator over `source`.
    pub fn new_tracked(type_id: TypeId, source: Value) -> Box<Self> {
        Box::new(Self {
            header: ObjectHeader::new_tracked(type_id),
            source,
            index: 0,
        })
    }
}

/// Enumerate a [`ListObject`]'s elements for the tracing collector.
pub fn trace_list(object: *const ObjectHeader, visit: &mut dyn FnMut(Value)) {
    let list = object as *const ListObject;
    for &item in unsafe { &(*list).items } {
        visit(item);
    }
}

/// Enumerate a [`TupleObject`]'s elements for the tracing collector.
pub fn trace_tuple(object: *const ObjectHeader, visit: &mut dyn FnMut(Value)) {
    let tuple = object as *const TupleObject;
    for &item in unsafe { &(*tuple).items } {
        visit(item);
    }
}

/// Enumerate a [`DictObject`]'s keys and values for the tracing collector.
pub fn trace_dict(object: *const ObjectHeader, visit: &mut dyn FnMut(Value)) {
    let dict = object as *const DictObject;
    for (key, value) in unsafe { &(*dict).entries } {
        visit(*key);
        visit(*value);
    }
}

/// Enumerate a [`Closure`]'s captured values for the tracing collector.
pub fn trace_closure(object: *const ObjectHeader, visit: &mut dyn FnMut(Value)) {
    let closure = object as *const Closure;
    for &value in unsafe { &(*closure).captured } {
        visit(value);
    }
}

/// Enumerate a [`BoundMethod`]'s receiver for the tracing collector.
pub fn trace_bound_method(object: *const ObjectHeader, visit: &mut dyn FnMut(Value)) {
    let bound = object as *const BoundMethod;
    visit(unsafe { (*bound).instance });
}

/// Enumerate an [`IteratorObject`]'s source for the tracing collector.
pub fn trace_iterator(object: *const ObjectHeader, visit: &mut dyn FnMut(Value)) {
    let iter = object as *const IteratorObject;
    visit(unsafe { (*iter).source });
}

/// Enumerate an [`Object`]'s fields for the tracing collector.
pub fn trace_object_fields(object: *const ObjectHeader, visit: &mut dyn FnMut(Value)) {
    let obj = object as *const Object;
    for &field in unsafe { &(*obj).fields } {
        visit(field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_creation_fills_fields_with_nil() {
        let obj = Object::new(TypeId(0), 0, 2);
        assert_eq!(obj.fields.len(), 2);
        assert!(obj.fields[0].is_null());
    }

    #[test]
    fn object_field_get_set_round_trips() {
        let mut obj = Object::new(TypeId(0), 0, 2);
        let value = Value::i32(42);
        assert!(obj.set_field(0, value));
        assert_eq!(*obj.get_field(0).unwrap(), value);
    }

    #[test]
    fn tracked_object_starts_unvisited_and_unfinalized() {
        let obj = Object::new_tracked(TypeId(0), 0, 1);
        assert!(obj.header.is_tracked());
        let link = obj.header.gc.as_ref().unwrap();
        assert!(!link.is_visited());
        assert!(!link.is_finalized());
        link.set_visited(true);
        assert!(link.is_visited());
    }

    #[test]
    fn immortal_header_reports_strong_count_as_alive() {
        let header = ObjectHeader::immortal(TypeId(0));
        assert!(header.rc.is_immortal());
    }

    #[test]
    fn trace_list_visits_every_element() {
        let list = ListObject::new_tracked(TypeId(0), vec![Value::i32(1), Value::i32(2)]);
        let raw = Box::into_raw(list);
        let mut seen = Vec::new();
        trace_list(raw as *const ObjectHeader, &mut |v| seen.push(v));
        assert_eq!(seen, vec![Value::i32(1), Value::i32(2)]);
        unsafe { drop(Box::from_raw(raw)) };
    }

    #[test]
    fn dict_insert_overwrites_existing_key() {
        let mut dict = DictObject::new_tracked(TypeId(0));
        dict.insert(Value::i32(1), Value::i32(10));
        dict.insert(Value::i32(1), Value::i32(20));
        assert_eq!(dict.entries.len(), 1);
        assert_eq!(dict.entries[0].1, Value::i32(20));
    }

    #[test]
    fn trace_closure_visits_captured_values() {
        let code = Arc::new(ember_bytecode::CodeBuilder::new().freeze());
        let closure = Closure::new_tracked(TypeId(0), code, vec![Value::bool(true)]);
        let raw = Box::into_raw(closure);
        let mut seen = Vec::new();
        trace_closure(raw as *const ObjectHeader, &mut |v| seen.push(v));
        assert_eq!(seen, vec![Value::bool(true)]);
        unsafe { drop(Box::from_raw(raw)) };
    }
}
