use std::sync::{Condvar, Mutex, PoisonError};

/// Counting semaphore bounding how many encoder processes run at once.
pub struct Semaphore {
    permits: Mutex<usize>,
    condvar: Condvar,
}

/// Returns its permit to the semaphore when dropped.
#[must_use = "dropping the permit releases it immediately"]
pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl Semaphore {
    #[inline]
    pub fn new(initial_permits: usize) -> Self {
        Semaphore {
            permits: Mutex::new(initial_permits),
            condvar: Condvar::new(),
        }
    }

    /// Block until a permit is available and take it.
    #[inline]
    pub fn acquire(&self) -> SemaphorePermit<'_> {
        let mut permits = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        while *permits == 0 {
            permits = self.condvar.wait(permits).unwrap_or_else(PoisonError::into_inner);
        }
        *permits -= 1;

        SemaphorePermit {
            semaphore: self,
        }
    }

    #[inline]
    pub fn available(&self) -> usize {
        *self.permits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self) {
        let mut permits = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        *permits += 1;
        drop(permits);
        self.condvar.notify_one();
    }
}

impl Drop for SemaphorePermit<'_> {
    #[inline]
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn permits_are_returned_on_drop() {
        let semaphore = Semaphore::new(2);
        let first = semaphore.acquire();
        let second = semaphore.acquire();
        assert_eq!(semaphore.available(), 0);
        drop(first);
        assert_eq!(semaphore.available(), 1);
        drop(second);
        assert_eq!(semaphore.available(), 2);
    }

    #[test]
    fn never_exceeds_permit_count() {
        let semaphore = Arc::new(Semaphore::new(3));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        thread::scope(|s| {
            for _ in 0..12 {
                let semaphore = Arc::clone(&semaphore);
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                s.spawn(move || {
                    let _permit = semaphore.acquire();
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    running.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(semaphore.available(), 3);
    }
}
