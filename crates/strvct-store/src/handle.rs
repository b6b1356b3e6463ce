use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use strvct_types::Pid;

use crate::storable::Storable;

struct Inner {
    pid: OnceLock<Pid>,
    object: RwLock<Box<dyn Storable>>,
}

/// Shared, lockable handle to a live storable object.
///
/// The pid lives on the handle rather than inside the object, so building a
/// reference token never needs to lock the object it points at. A pid is
/// assigned at most once.
#[derive(Clone)]
pub struct ObjectRef(Arc<Inner>);

impl ObjectRef {
    pub fn new(object: impl Storable) -> Self {
        Self::from_box(Box::new(object))
    }

    pub fn from_box(object: Box<dyn Storable>) -> Self {
        Self(Arc::new(Inner {
            pid: OnceLock::new(),
            object: RwLock::new(object),
        }))
    }

    /// The assigned pid, if the object has been registered or loaded.
    pub fn pid(&self) -> Option<&Pid> {
        self.0.pid.get()
    }

    /// Assign the pid. Returns the pid the handle ends up with.
    pub(crate) fn assign_pid(&self, pid: Pid) -> Pid {
        self.0.pid.get_or_init(|| pid).clone()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Box<dyn Storable>> {
        self.0.object.read().expect("lock poisoned")
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Box<dyn Storable>> {
        self.0.object.write().expect("lock poisoned")
    }

    /// Run `f` against the object if it is a `T`.
    pub fn with<T: Storable, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.read();
        guard.as_any().downcast_ref::<T>().map(f)
    }

    /// Run `f` against the object mutably if it is a `T`.
    pub fn with_mut<T: Storable, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.write();
        guard.as_any_mut().downcast_mut::<T>().map(f)
    }

    pub fn is<T: Storable>(&self) -> bool {
        self.read().as_any().is::<T>()
    }

    pub fn type_name(&self) -> &'static str {
        self.read().type_name()
    }

    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Arc::downgrade(&self.0))
    }

    /// Whether both handles point at the same object.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl std::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRef").field("pid", &self.pid()).finish()
    }
}

/// Non-owning handle, used for back-references such as a node's parent.
#[derive(Clone, Default)]
pub struct WeakObjectRef(Weak<Inner>);

impl WeakObjectRef {
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }

    pub fn is_live(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl std::fmt::Debug for WeakObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakObjectRef")
            .field("live", &self.is_live())
            .finish()
    }
}
