//! # Atomic Handle Cell
//!
//! [`AtomicObject`] packs a handle and a four-state lock machine into one
//! atomic word: the high bits hold the control-block pointer (or zero), the
//! two low bits hold the state tag. Control-block alignment is statically
//! asserted to leave those bits free.
//!
//! | Tag  | State     | Meaning                                             |
//! |------|-----------|-----------------------------------------------------|
//! | `00` | FREE      | no lock, no waiter                                  |
//! | `01` | LOCKED    | mutex held                                          |
//! | `10` | WAITING   | mutex held, at least one thread parked on the word  |
//! | `11` | CONDITION | mutex released during a condition wait              |
//!
//! Packing everything into one word means no side allocation per cell, one
//! platform park/unpark queue serves both mutex contention and condition
//! wakes, and readers block only on writers (a `load` never forces other
//! readers to queue behind a shared lock).
//!
//! Two primitives build the whole surface: `lock_and_load` (spin/park until
//! the tag can move to LOCKED, returning the bare pointer) and
//! `store_and_unlock` (swap in a bare pointer and wake parked threads if
//! the displaced tag said any existed). `load`/`store`/`swap`/CAS are
//! lock-bracketed compositions of the two; [`AtomicObject::lock`] exposes
//! the same machinery as a mutex + condition variable over the cell.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::trace;
use parking_lot_core::{DEFAULT_UNPARK_TOKEN, FilterOp, ParkToken};

use crate::object::Object;

const TAG_MASK: usize = 0b11;
const FREE: usize = 0b00;
const LOCKED: usize = 0b01;
const WAITING: usize = 0b10;
const CONDITION: usize = 0b11;

// Both mutex waiters and condition waiters park on the cell address; the
// park token tells the notify path which kind it is waking.
const MUTEX_TOKEN: ParkToken = ParkToken(1);
const COND_TOKEN: ParkToken = ParkToken(2);

/// An atomic cell holding one [`Object`] handle, doubling as a mutex and
/// condition variable over the same word.
///
/// ```
/// use std::sync::atomic::Ordering;
/// use anyarc::{AtomicObject, Object};
///
/// let cell = AtomicObject::new(Object::new(1_i32));
/// let seen = cell.load(Ordering::Acquire);
/// assert_eq!(seen.downcast_ref::<i32>(), Some(&1));
///
/// let old = cell.swap(Object::new(2_i32), Ordering::AcqRel);
/// assert_eq!(old, seen);
/// ```
pub struct AtomicObject {
    word: AtomicUsize,
}

impl AtomicObject {
    /// A cell holding the empty handle.
    pub const fn null() -> Self {
        AtomicObject {
            word: AtomicUsize::new(0),
        }
    }

    /// A cell holding `object`.
    pub fn new(object: Object) -> Self {
        AtomicObject {
            word: AtomicUsize::new(object.into_word()),
        }
    }

    fn key(&self) -> usize {
        &self.word as *const AtomicUsize as usize
    }

    fn park_on(&self, expect: usize, token: ParkToken) {
        // Futex discipline: sleep only while the word still reads `expect`;
        // the validation closure closes the race with a concurrent unlock.
        unsafe {
            parking_lot_core::park(
                self.key(),
                || self.word.load(Ordering::Relaxed) == expect,
                || {},
                |_, _| {},
                token,
                None,
            );
        }
    }

    fn wake_all(&self) {
        unsafe {
            parking_lot_core::unpark_all(self.key(), DEFAULT_UNPARK_TOKEN);
        }
    }

    /// Wake condition waiters only, skipping threads parked for the mutex.
    fn wake_cond(&self, all: bool) {
        let mut woken = false;
        unsafe {
            parking_lot_core::unpark_filter(
                self.key(),
                |token| {
                    if token == COND_TOKEN && (all || !woken) {
                        woken = true;
                        FilterOp::Unpark
                    } else {
                        FilterOp::Skip
                    }
                },
                |_| DEFAULT_UNPARK_TOKEN,
            );
        }
    }

    /// Acquire the tag lock and return the bare pointer bits. The word is
    /// left `bare | LOCKED`.
    fn lock_and_load(&self) -> usize {
        let mut v = self.word.load(Ordering::Relaxed);
        loop {
            match v & TAG_MASK {
                LOCKED => {
                    // Publish that someone is parked, then park.
                    let target = (v & !TAG_MASK) | WAITING;
                    match self.word.compare_exchange_weak(
                        v,
                        target,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            trace!("atomic cell contended; parking");
                            self.park_on(target, MUTEX_TOKEN);
                            v = self.word.load(Ordering::Relaxed);
                        }
                        Err(cur) => v = cur,
                    }
                }
                WAITING => {
                    self.park_on(v, MUTEX_TOKEN);
                    v = self.word.load(Ordering::Relaxed);
                }
                // FREE and CONDITION are both acquirable: a condition waiter
                // has released the mutex and sleeps until notified.
                _ => {
                    let bare = v & !TAG_MASK;
                    match self.word.compare_exchange_weak(
                        v,
                        bare | LOCKED,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => return bare,
                        Err(cur) => v = cur,
                    }
                }
            }
        }
    }

    /// Store a bare pointer, clearing the tag, and wake parked threads if
    /// the displaced tag said any existed.
    fn store_and_unlock(&self, bare: usize, order: Ordering) {
        debug_assert_eq!(bare & TAG_MASK, 0);
        let prev = self.word.swap(bare, order);
        if prev & TAG_MASK == WAITING {
            self.wake_all();
        }
    }

    // ========================================================================
    // Atomic handle operations
    // ========================================================================

    /// Read the current handle (strong increment on the way out).
    pub fn load(&self, order: Ordering) -> Object {
        let bare = self.lock_and_load();
        let object = unsafe { Object::clone_word(bare) };
        self.store_and_unlock(bare, order);
        object
    }

    /// Replace the current handle, dropping the old one.
    pub fn store(&self, object: Object, order: Ordering) {
        drop(self.swap(object, order));
    }

    /// Replace the current handle, returning the old one.
    pub fn swap(&self, object: Object, order: Ordering) -> Object {
        let bare = self.lock_and_load();
        let old = unsafe { Object::from_word(bare) };
        self.store_and_unlock(object.into_word(), order);
        old
    }

    /// Compare by control-block identity and swap on match.
    ///
    /// On match, stores a share of `desired` (the displaced handle is
    /// released) and returns `true`. On mismatch, loads the observed handle
    /// into `expected` (strong increment), leaves the cell unchanged, and
    /// returns `false`.
    pub fn compare_exchange(
        &self,
        expected: &mut Object,
        desired: &Object,
        success: Ordering,
        failure: Ordering,
    ) -> bool {
        let bare = self.lock_and_load();
        if bare == expected.as_word() {
            let old = unsafe { Object::from_word(bare) };
            self.store_and_unlock(desired.clone().into_word(), success);
            drop(old);
            true
        } else {
            let observed = unsafe { Object::clone_word(bare) };
            self.store_and_unlock(bare, failure);
            *expected = observed;
            false
        }
    }

    /// Identical to [`AtomicObject::compare_exchange`]; the lock-based cell
    /// never fails spuriously, so the weak form exists for API parity.
    pub fn compare_exchange_weak(
        &self,
        expected: &mut Object,
        desired: &Object,
        success: Ordering,
        failure: Ordering,
    ) -> bool {
        self.compare_exchange(expected, desired, success, failure)
    }

    // ========================================================================
    // Mutex + condition variable
    // ========================================================================

    /// Acquire the cell's lock, parking while contended.
    pub fn lock(&self) -> CellGuard<'_> {
        CellGuard {
            cell: self,
            bare: self.lock_and_load(),
        }
    }

    /// Acquire the cell's lock only if immediately available.
    pub fn try_lock(&self) -> Option<CellGuard<'_>> {
        let mut v = self.word.load(Ordering::Relaxed);
        loop {
            if matches!(v & TAG_MASK, LOCKED | WAITING) {
                return None;
            }
            let bare = v & !TAG_MASK;
            match self
                .word
                .compare_exchange_weak(v, bare | LOCKED, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return Some(CellGuard { cell: self, bare }),
                Err(cur) => v = cur,
            }
        }
    }
}

impl Default for AtomicObject {
    fn default() -> Self {
        AtomicObject::null()
    }
}

impl From<Object> for AtomicObject {
    fn from(object: Object) -> Self {
        AtomicObject::new(object)
    }
}

impl Drop for AtomicObject {
    fn drop(&mut self) {
        let v = *self.word.get_mut();
        debug_assert_eq!(
            v & TAG_MASK,
            FREE,
            "atomic cell dropped while locked or awaited"
        );
        drop(unsafe { Object::from_word(v & !TAG_MASK) });
    }
}

impl fmt::Debug for AtomicObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.word.load(Ordering::Relaxed);
        f.debug_struct("AtomicObject")
            .field("tag", &(v & TAG_MASK))
            .field("ptr", &format_args!("{:#x}", v & !TAG_MASK))
            .finish()
    }
}

// ============================================================================
// CellGuard
// ============================================================================

/// RAII lock over an [`AtomicObject`]; unlocking on drop restores whatever
/// handle the guard currently carries.
///
/// While a guard is live the cell's value can only change through it, so
/// [`CellGuard::object`] / [`CellGuard::replace`] observe and edit a stable
/// snapshot. The guard also carries the condition-variable surface:
/// [`CellGuard::wait`] releases the lock, parks, and reacquires; the notify
/// calls require the lock simply by living here.
pub struct CellGuard<'a> {
    cell: &'a AtomicObject,
    bare: usize,
}

impl CellGuard<'_> {
    /// The handle currently stored in the cell (strong increment).
    pub fn object(&self) -> Object {
        unsafe { Object::clone_word(self.bare) }
    }

    /// Whether the cell currently holds the empty handle.
    pub fn is_null(&self) -> bool {
        self.bare == 0
    }

    /// Swap in `object`, returning the displaced handle.
    pub fn replace(&mut self, object: Object) -> Object {
        let old = unsafe { Object::from_word(self.bare) };
        self.bare = object.into_word();
        old
    }

    /// Swap in `object`, dropping the displaced handle.
    pub fn set(&mut self, object: Object) {
        drop(self.replace(object));
    }

    /// Release the lock, park until notified (or a displaced-waiter wake),
    /// then reacquire. The stored handle may have changed across the wait;
    /// callers re-test their predicate, or use [`CellGuard::wait_until`].
    pub fn wait(&mut self) {
        let cond = self.bare | CONDITION;
        let prev = self.cell.word.swap(cond, Ordering::Release);
        if prev & TAG_MASK == WAITING {
            // Threads parked for the mutex must retry now that it is free.
            self.cell.wake_all();
        }
        self.cell.park_on(cond, COND_TOKEN);
        self.bare = self.cell.lock_and_load();
    }

    /// Wait until `pred` holds, re-testing after every wake.
    pub fn wait_until(&mut self, mut pred: impl FnMut() -> bool) {
        while !pred() {
            self.wait();
        }
    }

    /// Wake one thread parked in [`CellGuard::wait`] on this cell.
    pub fn notify_one(&self) {
        self.cell.wake_cond(false);
    }

    /// Wake every thread parked in [`CellGuard::wait`] on this cell.
    pub fn notify_all(&self) {
        self.cell.wake_cond(true);
    }
}

impl Drop for CellGuard<'_> {
    fn drop(&mut self) {
        self.cell.store_and_unlock(self.bare, Ordering::Release);
    }
}

impl fmt::Debug for CellGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellGuard")
            .field("ptr", &format_args!("{:#x}", self.bare))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_null_cell() {
        let cell = AtomicObject::null();
        assert!(cell.load(Ordering::Acquire).is_null());
    }

    #[test]
    fn test_load_shares() {
        let o = Object::new(3_i32);
        let cell = AtomicObject::new(o.clone());
        let seen = cell.load(Ordering::Acquire);
        assert_eq!(seen, o);
        assert_eq!(o.strong_count(), 3); // o, cell, seen
        drop(cell);
        assert_eq!(o.strong_count(), 2);
    }

    #[test]
    fn test_swap_transfers_ownership() {
        let a = Object::new(1_u8);
        let b = Object::new(2_u8);
        let cell = AtomicObject::new(a.clone());

        let old = cell.swap(b.clone(), Ordering::AcqRel);
        assert_eq!(old, a);
        assert_eq!(a.strong_count(), 2); // a, old
        assert_eq!(b.strong_count(), 2); // b, cell
    }

    #[test]
    fn test_store_releases_old() {
        let a = Object::new(1_u8);
        let cell = AtomicObject::new(a.clone());
        cell.store(Object::null(), Ordering::Release);
        assert_eq!(a.strong_count(), 1);
        assert!(cell.load(Ordering::Acquire).is_null());
    }

    #[test]
    fn test_compare_exchange_match() {
        let a = Object::new(1_u8);
        let b = Object::new(2_u8);
        let cell = AtomicObject::new(a.clone());

        let mut expected = a.clone();
        assert!(cell.compare_exchange(&mut expected, &b, Ordering::AcqRel, Ordering::Acquire));
        assert_eq!(cell.load(Ordering::Acquire), b);
        // The cell released its share of `a`.
        assert_eq!(a.strong_count(), 2); // a, expected
    }

    #[test]
    fn test_compare_exchange_mismatch_loads_observed() {
        let a = Object::new(1_u8);
        let b = Object::new(2_u8);
        let cell = AtomicObject::new(a.clone());

        let mut expected = Object::null();
        assert!(!cell.compare_exchange(&mut expected, &b, Ordering::AcqRel, Ordering::Acquire));
        assert_eq!(expected, a); // observed value, count raised
        assert_eq!(a.strong_count(), 3); // a, cell, expected
        assert_eq!(b.strong_count(), 1); // untouched
        assert_eq!(cell.load(Ordering::Acquire), a); // cell unchanged
    }

    #[test]
    fn test_try_lock_exclusion() {
        let cell = AtomicObject::null();
        let g = cell.lock();
        assert!(cell.try_lock().is_none());
        drop(g);
        assert!(cell.try_lock().is_some());
    }

    #[test]
    fn test_guard_replace() {
        let a = Object::new(10_i32);
        let cell = AtomicObject::new(a.clone());
        {
            let mut g = cell.lock();
            assert_eq!(g.object(), a);
            let old = g.replace(Object::new(20_i32));
            assert_eq!(old, a);
        }
        assert_eq!(
            cell.load(Ordering::Acquire).downcast_ref::<i32>(),
            Some(&20)
        );
    }

    #[test]
    fn test_lock_preserves_value_across_contention() {
        let cell = Arc::new(AtomicObject::new(Object::new(0_u32)));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let cell = Arc::clone(&cell);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let mut g = cell.lock();
                    let n = *g.object().downcast_ref::<u32>().unwrap();
                    g.set(Object::new(n + 1));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let done = cell.load(Ordering::Acquire);
        assert_eq!(done.downcast_ref::<u32>(), Some(&400));
    }

    #[test]
    fn test_condition_wait_notify() {
        let cell = Arc::new(AtomicObject::null());
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let waiter = {
            let cell = Arc::clone(&cell);
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                let mut g = cell.lock();
                g.wait_until(|| flag.load(Ordering::SeqCst));
                assert!(flag.load(Ordering::SeqCst));
            })
        };

        thread::sleep(Duration::from_millis(50));
        {
            let g = cell.lock();
            flag.store(true, Ordering::SeqCst);
            g.notify_one();
        }
        waiter.join().unwrap();
    }
}
