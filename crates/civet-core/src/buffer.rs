use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};
use crate::shape::Shape;

// Buffer — Named storage with a paired gradient array
//
// A Buffer is the edge of the layer graph: every value flowing between
// layers, and every learnable parameter, lives in one. It holds two
// equally-shaped f32 arrays:
//
//   data — the forward-pass value
//   grad — the gradient accumulated by backward passes
//
// MEMORY MODEL:
//
//   Buffer is a cheap handle around Arc<BufferInner>. Cloning a Buffer
//   clones the Arc, not the arrays, so the graph, layers, and any outside
//   observer can all hold the same storage. The arrays stay alive and
//   readable for as long as any handle exists, including after the owning
//   graph has been dropped.
//
//   The shape and both arrays sit behind RwLocks. Execution is strictly
//   sequential (one forward or backward call at a time), so the locks never
//   contend in practice; they exist so that handles can be shared freely
//   and reads can overlap. The invariant data.len == grad.len ==
//   shape.elem_count() holds after construction and across every reshape.

/// Inner storage of a buffer, shared via Arc.
struct BufferInner {
    /// The buffer's unique name within its graph.
    name: String,
    /// Current shape; a reshape updates this together with both arrays.
    shape: RwLock<Shape>,
    /// Forward-pass values.
    data: RwLock<Vec<f32>>,
    /// Accumulated gradients, always the same length as `data`.
    grad: RwLock<Vec<f32>>,
}

/// Named numeric storage holding a value array and its gradient companion.
///
/// Handles are reference-counted: clone freely, drop the graph, keep
/// reading. Both arrays are zero-initialized at construction.
pub struct Buffer {
    inner: Arc<BufferInner>,
}

// Manual Clone: Arc::clone is cheap (just increment refcount).
impl Clone for Buffer {
    fn clone(&self) -> Self {
        Buffer {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Buffer(name={:?}, shape={})", self.inner.name, self.shape())
    }
}

impl Buffer {
    /// Create a zero-initialized buffer with the given name and shape.
    pub fn new(name: impl Into<String>, shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let n = shape.elem_count();
        Buffer {
            inner: Arc::new(BufferInner {
                name: name.into(),
                shape: RwLock::new(shape),
                data: RwLock::new(vec![0.0; n]),
                grad: RwLock::new(vec![0.0; n]),
            }),
        }
    }

    // Accessors

    /// The buffer's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The current shape (cloned out from behind the lock).
    pub fn shape(&self) -> Shape {
        self.inner.shape.read().expect("shape lock poisoned").clone()
    }

    /// Total number of elements.
    pub fn elem_count(&self) -> usize {
        self.shape().elem_count()
    }

    /// Whether two handles point at the same storage.
    pub fn ptr_eq(a: &Buffer, b: &Buffer) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    // Array access
    //
    // Guards borrow the lock; the engine runs layers sequentially, so a
    // layer may hold a read guard on its inputs and a write guard on its
    // outputs at the same time. In-place layers (output aliases input,
    // detected via Buffer::ptr_eq) must take a single write guard instead.

    /// Read access to the value array.
    pub fn data(&self) -> RwLockReadGuard<'_, Vec<f32>> {
        self.inner.data.read().expect("data lock poisoned")
    }

    /// Write access to the value array.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Vec<f32>> {
        self.inner.data.write().expect("data lock poisoned")
    }

    /// Read access to the gradient array.
    pub fn grad(&self) -> RwLockReadGuard<'_, Vec<f32>> {
        self.inner.grad.read().expect("grad lock poisoned")
    }

    /// Write access to the gradient array.
    pub fn grad_mut(&self) -> RwLockWriteGuard<'_, Vec<f32>> {
        self.inner.grad.write().expect("grad lock poisoned")
    }

    /// Copy the value array out.
    pub fn data_vec(&self) -> Vec<f32> {
        self.data().clone()
    }

    /// Copy the gradient array out.
    pub fn grad_vec(&self) -> Vec<f32> {
        self.grad().clone()
    }

    // Mutation

    /// Overwrite the value array from a flat slice of matching length.
    pub fn set_data(&self, values: &[f32]) -> Result<()> {
        let mut data = self.data_mut();
        if values.len() != data.len() {
            return Err(Error::ElementCountMismatch {
                shape: self.shape(),
                expected: data.len(),
                got: values.len(),
            });
        }
        data.copy_from_slice(values);
        Ok(())
    }

    /// Overwrite the gradient array from a flat slice of matching length.
    pub fn set_grad(&self, values: &[f32]) -> Result<()> {
        let mut grad = self.grad_mut();
        if values.len() != grad.len() {
            return Err(Error::ElementCountMismatch {
                shape: self.shape(),
                expected: grad.len(),
                got: values.len(),
            });
        }
        grad.copy_from_slice(values);
        Ok(())
    }

    /// Set every value element to `v`.
    pub fn fill_data(&self, v: f32) {
        self.data_mut().iter_mut().for_each(|x| *x = v);
    }

    /// Set every gradient element to `v`.
    pub fn fill_grad(&self, v: f32) {
        self.grad_mut().iter_mut().for_each(|x| *x = v);
    }

    /// Zero the value array.
    pub fn zero_data(&self) {
        self.fill_data(0.0);
    }

    /// Zero the gradient array.
    pub fn zero_grad(&self) {
        self.fill_grad(0.0);
    }

    /// Change the shape, resizing both arrays to the new element count.
    ///
    /// A reshape to the current shape is a no-op and preserves all
    /// contents. Growth zero-fills the new tail elements; shrinking
    /// truncates. The leading elements survive either way, matching how a
    /// batch-size change keeps previously computed values where possible.
    pub fn reshape(&self, shape: impl Into<Shape>) {
        let shape = shape.into();
        let mut cur = self.inner.shape.write().expect("shape lock poisoned");
        if *cur == shape {
            return;
        }
        let n = shape.elem_count();
        self.inner
            .data
            .write()
            .expect("data lock poisoned")
            .resize(n, 0.0);
        self.inner
            .grad
            .write()
            .expect("grad lock poisoned")
            .resize(n, 0.0);
        *cur = shape;
    }
}

// BufferTable — Name-keyed buffer registry in declaration order
//
// The graph builder declares one buffer per name here; execution resolves
// names to indices once and then works purely on indices. The table keeps
// insertion order, which is the graph's declaration order.

/// Ordered registry of buffers with O(1) name lookup.
#[derive(Default)]
pub struct BufferTable {
    entries: Vec<Buffer>,
    index: HashMap<String, usize>,
}

impl BufferTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer under `name`, or return the existing one.
    ///
    /// Fails with `ShapeMismatch` if a buffer of that name already exists
    /// with a different shape.
    pub fn declare(&mut self, name: &str, shape: &Shape) -> Result<Buffer> {
        if let Some(&i) = self.index.get(name) {
            let existing = &self.entries[i];
            let have = existing.shape();
            if have != *shape {
                return Err(Error::ShapeMismatch {
                    expected: have,
                    got: shape.clone(),
                });
            }
            return Ok(existing.clone());
        }
        let buf = Buffer::new(name, shape.clone());
        self.index.insert(name.to_string(), self.entries.len());
        self.entries.push(buf.clone());
        Ok(buf)
    }

    /// Look up a buffer handle by name.
    pub fn get(&self, name: &str) -> Result<Buffer> {
        self.index_of(name).map(|i| self.entries[i].clone())
    }

    /// Resolve a name to its table index.
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.index.get(name).copied().ok_or(Error::UnknownBuffer {
            name: name.to_string(),
        })
    }

    /// Whether a buffer of this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Buffer at a table index.
    pub fn at(&self, i: usize) -> &Buffer {
        &self.entries[i]
    }

    /// All buffers in declaration order.
    pub fn buffers(&self) -> &[Buffer] {
        &self.entries
    }

    /// Buffer names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|b| b.name())
    }

    /// Number of buffers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
