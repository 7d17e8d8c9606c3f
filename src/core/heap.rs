//! Object store
//!
//! Objects live in generation-tagged slots. Script code holds them through
//! [`ObjectRef`], a refcounted token: the strong count of the token is the
//! object's refcount. When the last token drops, its [`ObjectId`] is pushed on
//! a FIFO release queue that the VM drains at instruction boundaries, running
//! the destructor once and then freeing the slot.
//!
//! A token can be re-created from an id while the slot is alive (destructor
//! calls, the cycle collector, shutdown). The store keeps a `Weak` to the
//! current token so there is never more than one.

use crate::compiler::chunk::ClosureData;
use crate::core::value::{Symbol, Val};
use crate::runtime::context::ClassDef;
use crate::vm::frame::GeneratorData;
use indexmap::IndexMap;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    pub index: u32,
    pub generation: u32,
}

impl ObjectId {
    /// The number scripts see through `spl_object_id()` and `var_dump`.
    pub fn handle(self) -> u32 {
        self.index + 1
    }
}

type ReleaseQueue = Rc<RefCell<VecDeque<ObjectId>>>;

pub struct ObjectToken {
    id: ObjectId,
    data: Rc<RefCell<ObjectData>>,
    release: ReleaseQueue,
}

impl Drop for ObjectToken {
    fn drop(&mut self) {
        if let Ok(mut queue) = self.release.try_borrow_mut() {
            queue.push_back(self.id);
        }
    }
}

/// Strong handle to an object.
#[derive(Clone)]
pub struct ObjectRef(Rc<ObjectToken>);

impl ObjectRef {
    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    pub fn data(&self) -> &Rc<RefCell<ObjectData>> {
        &self.0.data
    }

    pub fn borrow(&self) -> Ref<'_, ObjectData> {
        self.0.data.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, ObjectData> {
        self.0.data.borrow_mut()
    }

    pub fn try_borrow_mut(&self) -> Option<RefMut<'_, ObjectData>> {
        self.0.data.try_borrow_mut().ok()
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn class(&self) -> Rc<ClassDef> {
        self.0.data.borrow().class.clone()
    }

    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

/// Engine-side state attached to builtin classes.
#[derive(Default, Clone)]
pub enum ObjectInternal {
    #[default]
    None,
    Closure(Rc<ClosureData>),
    Generator(Rc<RefCell<GeneratorData>>),
}

pub struct ObjectData {
    pub class: Rc<ClassDef>,
    pub properties: IndexMap<Symbol, Val>,
    pub internal: ObjectInternal,
}

impl ObjectData {
    pub fn new(class: Rc<ClassDef>) -> Self {
        Self {
            class,
            properties: IndexMap::new(),
            internal: ObjectInternal::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestructorState {
    NotCalled,
    Running,
    Done,
}

struct SlotEntry {
    data: Rc<RefCell<ObjectData>>,
    token: Weak<ObjectToken>,
    destructor: DestructorState,
    created: u64,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<SlotEntry>,
}

pub struct ObjectStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    release: ReleaseQueue,
    next_seq: u64,
    live: usize,
    pub allocated_since_collect: usize,
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            release: Rc::new(RefCell::new(VecDeque::new())),
            next_seq: 0,
            live: 0,
            allocated_since_collect: 0,
        }
    }

    pub fn alloc(&mut self, data: ObjectData) -> ObjectRef {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = ObjectId {
            index,
            generation: slot.generation,
        };
        let data = Rc::new(RefCell::new(data));
        let token = Rc::new(ObjectToken {
            id,
            data: data.clone(),
            release: self.release.clone(),
        });
        slot.entry = Some(SlotEntry {
            data,
            token: Rc::downgrade(&token),
            destructor: DestructorState::NotCalled,
            created: self.next_seq,
        });
        self.next_seq += 1;
        self.live += 1;
        self.allocated_since_collect += 1;
        ObjectRef(token)
    }

    fn entry(&self, id: ObjectId) -> Option<&SlotEntry> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn entry_mut(&mut self, id: ObjectId) -> Option<&mut SlotEntry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.entry(id).is_some()
    }

    /// Whether some strong handle to the object is still alive.
    pub fn is_referenced(&self, id: ObjectId) -> bool {
        self.entry(id)
            .map(|e| e.token.strong_count() > 0)
            .unwrap_or(false)
    }

    /// A strong handle for a live slot, reusing the existing token if any.
    pub fn handle(&mut self, id: ObjectId) -> Option<ObjectRef> {
        let release = self.release.clone();
        let entry = self.entry_mut(id)?;
        if let Some(token) = entry.token.upgrade() {
            return Some(ObjectRef(token));
        }
        let token = Rc::new(ObjectToken {
            id,
            data: entry.data.clone(),
            release,
        });
        entry.token = Rc::downgrade(&token);
        Some(ObjectRef(token))
    }

    pub fn data(&self, id: ObjectId) -> Option<Rc<RefCell<ObjectData>>> {
        self.entry(id).map(|e| e.data.clone())
    }

    pub fn destructor_state(&self, id: ObjectId) -> Option<DestructorState> {
        self.entry(id).map(|e| e.destructor)
    }

    pub fn set_destructor_state(&mut self, id: ObjectId, state: DestructorState) {
        if let Some(entry) = self.entry_mut(id) {
            entry.destructor = state;
        }
    }

    pub fn pop_released(&self) -> Option<ObjectId> {
        self.release.borrow_mut().pop_front()
    }

    pub fn has_released(&self) -> bool {
        !self.release.borrow().is_empty()
    }

    /// Vacate the slot. The returned data must be dropped by the caller,
    /// which may release further objects.
    pub fn free(&mut self, id: ObjectId) -> Option<Rc<RefCell<ObjectData>>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(entry.data)
    }

    /// Ids of all live objects, oldest first.
    pub fn live_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<(u64, ObjectId)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.entry.as_ref().map(|e| {
                    (
                        e.created,
                        ObjectId {
                            index: index as u32,
                            generation: slot.generation,
                        },
                    )
                })
            })
            .collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::context::ClassDef;

    fn store_with_class() -> (ObjectStore, Rc<ClassDef>) {
        (ObjectStore::new(), Rc::new(ClassDef::empty(Symbol(0))))
    }

    #[test]
    fn last_handle_drop_queues_release() {
        let (mut store, class) = store_with_class();
        let obj = store.alloc(ObjectData::new(class));
        let id = obj.id();
        let alias = obj.clone();
        drop(obj);
        assert!(!store.has_released());
        drop(alias);
        assert_eq!(store.pop_released(), Some(id));
        assert!(store.contains(id));
        assert!(!store.is_referenced(id));
    }

    #[test]
    fn revived_handle_is_unique() {
        let (mut store, class) = store_with_class();
        let obj = store.alloc(ObjectData::new(class));
        let id = obj.id();
        let again = store.handle(id).expect("live slot");
        assert!(obj.ptr_eq(&again));
    }

    #[test]
    fn freed_slot_rejects_stale_id() {
        let (mut store, class) = store_with_class();
        let obj = store.alloc(ObjectData::new(class.clone()));
        let id = obj.id();
        drop(obj);
        store.pop_released();
        assert!(store.free(id).is_some());
        assert!(store.handle(id).is_none());
        let next = store.alloc(ObjectData::new(class));
        assert_eq!(next.id().index, id.index);
        assert_ne!(next.id().generation, id.generation);
    }

    #[test]
    fn live_ids_follow_creation_order() {
        let (mut store, class) = store_with_class();
        let a = store.alloc(ObjectData::new(class.clone()));
        let b = store.alloc(ObjectData::new(class.clone()));
        let a_id = a.id();
        drop(a);
        store.pop_released();
        store.free(a_id);
        let c = store.alloc(ObjectData::new(class));
        assert_eq!(store.live_ids(), vec![b.id(), c.id()]);
    }
}
