//! Mark-and-sweep collector
//!
//! Stop-the-world, two phases:
//! 1. Mark: traverse from the root set (value stack, frame function
//!    handles, globals, registered native objects) and set mark bits,
//!    following property maps, array elements, prototype links, and
//!    closure upvalues.
//! 2. Sweep: release unmarked slots to the free list and clear the mark
//!    bits of the survivors. The frozen flag is untouched.

use super::heap::{Heap, HeapKind};
use crate::runtime::function::FunctionKind;
use crate::value::{Handle, Value};
use tracing::debug;

/// Outcome of one collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    pub live_before: usize,
    pub live_after: usize,
    pub freed: usize,
}

/// Run a full collection over `heap` with the given roots.
pub fn collect<I>(heap: &mut Heap, roots: I) -> GcStats
where
    I: IntoIterator<Item = Value>,
{
    let live_before = heap.live_count();

    // Mark phase: iterative worklist, no recursion into deep object graphs.
    let mut worklist: Vec<Handle> = roots
        .into_iter()
        .filter_map(|v| v.as_handle())
        .collect();

    while let Some(h) = worklist.pop() {
        let obj = heap.get_mut(h);
        if obj.marked {
            continue;
        }
        obj.marked = true;

        let push = |worklist: &mut Vec<Handle>, v: Value| {
            if let Some(child) = v.as_handle() {
                worklist.push(child);
            }
        };

        match &heap.get(h).kind {
            HeapKind::Str(_) => {}
            HeapKind::Object(o) => {
                push(&mut worklist, o.proto);
                for v in o.props.values() {
                    push(&mut worklist, v);
                }
            }
            HeapKind::Array(a) => {
                push(&mut worklist, a.proto);
                for &v in &a.elems {
                    push(&mut worklist, v);
                }
                for v in a.props.values() {
                    push(&mut worklist, v);
                }
            }
            HeapKind::Function(f) => {
                push(&mut worklist, f.proto);
                for v in f.props.values() {
                    push(&mut worklist, v);
                }
                if let FunctionKind::Script { upvalues, .. } = &f.kind {
                    for &v in upvalues {
                        push(&mut worklist, v);
                    }
                }
            }
        }
    }

    // Sweep phase.
    let mut freed = 0;
    for index in 0..heap.slot_count() {
        match heap.slot_mut(index) {
            Some(obj) if obj.marked => obj.marked = false,
            Some(_) => {
                heap.release(index);
                freed += 1;
            }
            None => {}
        }
    }

    let stats = GcStats {
        live_before,
        live_after: heap.live_count(),
        freed,
    };
    debug!(
        live_before = stats.live_before,
        live_after = stats.live_after,
        freed = stats.freed,
        "gc collection finished"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::heap::HeapConfig;
    use crate::runtime::object::ScriptObject;
    use crate::runtime::property::KeySym;

    fn heap() -> Heap {
        Heap::new(HeapConfig::default())
    }

    #[test]
    fn test_unreachable_objects_are_freed() {
        let mut heap = heap();
        let live = heap.alloc(HeapKind::Str("live".into())).unwrap();
        let _dead = heap.alloc(HeapKind::Str("dead".into())).unwrap();

        let stats = collect(&mut heap, [Value::Ref(live)]);
        assert_eq!(stats.freed, 1);
        assert_eq!(heap.live_count(), 1);
        assert_eq!(heap.as_str(live), Some("live"));
    }

    #[test]
    fn test_marking_follows_properties_and_protos() {
        let mut heap = heap();
        let inner = heap.alloc(HeapKind::Str("inner".into())).unwrap();
        let proto = heap
            .alloc(HeapKind::Object(ScriptObject::new(Value::null())))
            .unwrap();

        let mut obj = ScriptObject::new(Value::Ref(proto));
        obj.props.set(KeySym(0), Value::Ref(inner));
        let root = heap.alloc(HeapKind::Object(obj)).unwrap();

        let stats = collect(&mut heap, [Value::Ref(root)]);
        assert_eq!(stats.freed, 0);
        assert_eq!(heap.live_count(), 3);
    }

    #[test]
    fn test_second_collection_frees_nothing() {
        let mut heap = heap();
        let root = heap.alloc(HeapKind::Str("root".into())).unwrap();
        for _ in 0..10 {
            heap.alloc(HeapKind::Str("garbage".into())).unwrap();
        }

        let first = collect(&mut heap, [Value::Ref(root)]);
        assert_eq!(first.freed, 10);
        let second = collect(&mut heap, [Value::Ref(root)]);
        assert_eq!(second.freed, 0);
    }

    #[test]
    fn test_cycles_are_collected() {
        let mut heap = heap();
        let a = heap
            .alloc(HeapKind::Object(ScriptObject::new(Value::null())))
            .unwrap();
        let b = heap
            .alloc(HeapKind::Object(ScriptObject::new(Value::Ref(a))))
            .unwrap();
        heap.as_object_mut(a).unwrap().proto = Value::Ref(b);

        let stats = collect(&mut heap, []);
        assert_eq!(stats.freed, 2);
        assert_eq!(heap.live_count(), 0);
    }
}
