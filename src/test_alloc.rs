use std::{
    alloc::{GlobalAlloc, System},
    cell::RefCell,
    thread,
};

#[global_allocator]
static GLOBAL: TestAlloc = TestAlloc { inner: System };

thread_local!(static ALLOWED: RefCell<bool> = RefCell::new(true));

macro_rules! no_heap {
    {$body:block} => {{
        let _g = crate::test_alloc::HeapGuard::new(false);
        let _r = $body;
        drop(_g);
        _r
    }}
}

macro_rules! allow_heap {
    {$body:block} => {{
        let _g = crate::test_alloc::HeapGuard::new(true);
        let _r = $body;
        drop(_g);
        _r
    }}
}

pub fn is_allowed() -> bool {
    ALLOWED.with(|a| *a.borrow())
}
pub fn set_allowed(allowed: bool) {
    ALLOWED.with(|a| *a.borrow_mut() = allowed);
}

/// Forwards to the system allocator, panicking on any (de)allocation made
/// while the current thread is inside a `no_heap!` region.
pub struct TestAlloc {
    inner: System,
}
impl TestAlloc {
    fn check(&self, msg: &str) {
        ALLOWED.with(|a| {
            let allowed = *a.borrow();
            if !allowed && !thread::panicking() {
                set_allowed(true);
                panic!("{}", msg);
            }
        });
    }
}
unsafe impl GlobalAlloc for TestAlloc {
    unsafe fn alloc(&self, layout: std::alloc::Layout) -> *mut u8 {
        self.check("Attempted to allocate heap memory on disallowed thread");
        self.inner.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: std::alloc::Layout) {
        self.check("Attempted to deallocate heap memory on disallowed thread");
        self.inner.dealloc(ptr, layout)
    }
}

pub struct HeapGuard(bool);
impl HeapGuard {
    pub fn new(allowed: bool) -> Self {
        let before = is_allowed();
        set_allowed(allowed);
        Self(before)
    }
}
impl Drop for HeapGuard {
    fn drop(&mut self) {
        set_allowed(self.0);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    #[test]
    fn alloc_dealloc_allowed() {
        let b = Box::new(5);
        drop(b);
    }

    #[test]
    #[should_panic]
    fn alloc_disallowed() {
        let b = no_heap! {{Box::new(5)}};
        drop(b);
    }

    #[test]
    #[should_panic]
    fn dealloc_disallowed() {
        let b = Box::new(5);
        no_heap! {{drop(b);}}
    }

    #[test]
    fn move_to_thread() {
        let mut b = Box::new(5);

        let t = thread::spawn(move || {
            no_heap! {{
                *b += 1;
                b
            }}
        });

        let b = t.join().unwrap();
        assert_eq!(*b, 6);
        drop(b);
    }

    #[test]
    fn allow_inside() {
        let mut b = Box::new(5);
        no_heap! {{
            *b += 1;
            allow_heap! {{
                b = Box::new(2);
            }}
            *b += 1;
        }}
        assert_eq!(*b, 3)
    }
}
