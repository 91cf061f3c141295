use std::sync::Mutex;

use common::TensorHandle;
use tensor::Tensor;

/// Bounded, indexed ring of tensor snapshots (spec section 3/4.6 step 5).
/// Decouples client-facing input/output tensors from whatever buffers a
/// backend internally owns: `alloc` takes a brief lock to claim a slot and
/// hand back a stable `TensorHandle`; `get` takes the same lock only long
/// enough to clone the `Arc`-backed `Tensor`s out, so the bytes themselves
/// are read lock-free from then on. Capacity wraps -- the oldest handle is
/// silently overwritten once the ring is full, matching the finished-jobs
/// ring's overwrite policy (spec section 5). Each slot holds a full tensor
/// *list* rather than a single tensor, since a model's pure-input or
/// externally-visible-output set is rarely just one tensor (spec section 8
/// scenario 1 alone needs two).
pub struct TensorRingBuffer {
    slots: Mutex<Vec<Option<Vec<Tensor>>>>,
    next: Mutex<usize>,
    capacity: usize,
}

impl TensorRingBuffer {
    pub fn new(capacity: usize) -> TensorRingBuffer {
        let capacity = capacity.max(1);
        TensorRingBuffer {
            slots: Mutex::new(vec![None; capacity]),
            next: Mutex::new(0),
            capacity,
        }
    }

    pub fn alloc(&self, tensors: Vec<Tensor>) -> TensorHandle {
        let index = {
            let mut next = self.next.lock().expect("ring buffer index mutex poisoned");
            let index = *next;
            *next = (index + 1) % self.capacity;
            index
        };
        self.slots.lock().expect("ring buffer slots mutex poisoned")[index] = Some(tensors);
        TensorHandle(index)
    }

    pub fn get(&self, handle: TensorHandle) -> Option<Vec<Tensor>> {
        self.slots.lock().expect("ring buffer slots mutex poisoned")[handle.0].clone()
    }

    /// Overwrites an already-allocated slot in place, for output handoff
    /// where the caller holds a `TensorHandle` from before the tensors it
    /// names were computed.
    pub fn set(&self, handle: TensorHandle, tensors: Vec<Tensor>) {
        self.slots.lock().expect("ring buffer slots mutex poisoned")[handle.0] = Some(tensors);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
