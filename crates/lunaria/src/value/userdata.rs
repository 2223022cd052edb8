// Embedder-owned opaque values with an optional metatable.

use std::any::Any;
use std::cell::RefCell;

use super::TableRef;

pub struct UserData {
    data: RefCell<Box<dyn Any>>,
    metatable: RefCell<Option<TableRef>>,
}

impl UserData {
    pub fn new<T: Any>(data: T) -> UserData {
        UserData {
            data: RefCell::new(Box::new(data)),
            metatable: RefCell::new(None),
        }
    }

    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable.borrow().clone()
    }

    pub fn set_metatable(&self, mt: Option<TableRef>) {
        *self.metatable.borrow_mut() = mt;
    }

    pub fn with<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.data.borrow().downcast_ref::<T>().map(f)
    }

    pub fn with_mut<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.data.borrow_mut().downcast_mut::<T>().map(f)
    }
}
