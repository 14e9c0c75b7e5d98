// src/db.rs
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use crate::error::{MinnowError, MinnowResult};
use crate::sync::Semaphore;

/// Bounded pool of pre-built resources with scoped acquisition.
///
/// `acquire` blocks until a resource is free; the guard hands it back (and
/// posts the semaphore) on drop, so release happens on every exit path
/// including early returns from processing errors. One pool is constructed
/// at startup and shared by handle.
pub struct ResourcePool<T> {
    resources: Mutex<Vec<T>>,
    available: Semaphore,
    capacity: usize,
}

impl<T> ResourcePool<T> {
    pub fn new(resources: Vec<T>) -> MinnowResult<Self> {
        if resources.is_empty() {
            return Err(MinnowError::Config(
                "resource pool must hold at least one resource".into(),
            ));
        }
        let capacity = resources.len();
        Ok(Self {
            resources: Mutex::new(resources),
            available: Semaphore::new(capacity),
            capacity,
        })
    }

    pub fn acquire(&self) -> PooledResource<'_, T> {
        self.available.wait();
        let item = self
            .resources
            .lock()
            .unwrap()
            .pop()
            .expect("semaphore admitted more holders than resources");
        PooledResource {
            pool: self,
            item: Some(item),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn idle(&self) -> usize {
        self.resources.lock().unwrap().len()
    }
}

pub struct PooledResource<'a, T> {
    pool: &'a ResourcePool<T>,
    item: Option<T>,
}

impl<T> Deref for PooledResource<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("resource taken")
    }
}

impl<T> DerefMut for PooledResource<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("resource taken")
    }
}

impl<T> Drop for PooledResource<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.resources.lock().unwrap().push(item);
            self.pool.available.post();
        }
    }
}

/// Session handle pooled for the CGI handlers. The relational client it
/// fronts is an external collaborator; the handle carries identity plus a
/// per-session query counter.
pub struct DbConn {
    id: usize,
    queries: u64,
}

impl DbConn {
    pub fn new(id: usize) -> Self {
        Self { id, queries: 0 }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn record_query(&mut self) {
        self.queries += 1;
    }

    pub fn queries(&self) -> u64 {
        self.queries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn rejects_empty_pool() {
        assert!(ResourcePool::<DbConn>::new(Vec::new()).is_err());
    }

    #[test]
    fn guard_returns_resource_on_drop() {
        let pool = ResourcePool::new(vec![DbConn::new(0), DbConn::new(1)]).unwrap();
        assert_eq!(pool.idle(), 2);
        {
            let _a = pool.acquire();
            let _b = pool.acquire();
            assert_eq!(pool.idle(), 0);
        }
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn guard_releases_on_early_return() {
        fn failing_use(pool: &ResourcePool<DbConn>) -> Result<(), ()> {
            let mut conn = pool.acquire();
            conn.record_query();
            Err(())
        }
        let pool = ResourcePool::new(vec![DbConn::new(0)]).unwrap();
        assert!(failing_use(&pool).is_err());
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn acquire_blocks_until_release() {
        let pool = Arc::new(ResourcePool::new(vec![DbConn::new(0)]).unwrap());
        let first = pool.acquire();
        let pool2 = pool.clone();
        let waiter = thread::spawn(move || {
            let conn = pool2.acquire();
            conn.id()
        });
        thread::sleep(Duration::from_millis(20));
        drop(first);
        assert_eq!(waiter.join().unwrap(), 0);
    }
}
