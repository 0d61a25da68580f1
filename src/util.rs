//! Helper functions

use cookie_factory::{gen, SerializeFn};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn serialize<F>(serializer: F) -> Vec<u8>
where
    F: SerializeFn<Vec<u8>>,
{
    match gen(serializer, Vec::new()) {
        Ok((buf, _)) => buf,
        Err(e) => panic!("Couldn't serialize: {:?}", e),
    }
}

/// Like [`serialize`], but writing into a caller-provided (usually pooled)
/// buffer.
pub fn serialize_into<F>(buf: Vec<u8>, serializer: F) -> Vec<u8>
where
    F: SerializeFn<Vec<u8>>,
{
    match gen(serializer, buf) {
        Ok((buf, _)) => buf,
        Err(e) => panic!("Couldn't serialize: {:?}", e),
    }
}

/// Whole seconds since the Unix epoch, the tick unit of the tunnel lifecycle.
pub fn seconds_since_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::new(0, 0))
        .as_secs()
}

/// A seed for non-cryptographic RNGs, taken from the clock.
pub fn clock_seed() -> u64 {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::new(0, 0));
    d.as_secs()
        .wrapping_mul(1_000_000_000)
        .wrapping_add(u64::from(d.subsec_nanos()))
}

/// A freelist of reusable byte buffers.
///
/// Buffers handed out by [`acquire`] are cleared and hold at least
/// `buffer_size` bytes of capacity. Callers that still own their buffer when
/// done return it with [`release`]; buffers that were moved into a message
/// are simply not returned. [`clean_up`] drops the idle buffers so a burst
/// of traffic does not pin its high-water mark in memory.
///
/// [`acquire`]: MemoryPool::acquire
/// [`release`]: MemoryPool::release
/// [`clean_up`]: MemoryPool::clean_up
pub struct MemoryPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
}

impl MemoryPool {
    pub fn new(buffer_size: usize) -> Self {
        MemoryPool {
            buffers: Mutex::new(Vec::new()),
            buffer_size,
        }
    }

    pub fn acquire(&self) -> Vec<u8> {
        match self.buffers.lock().unwrap().pop() {
            Some(buf) => buf,
            None => Vec::with_capacity(self.buffer_size),
        }
    }

    pub fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        self.buffers.lock().unwrap().push(buf);
    }

    pub fn clean_up(&self) {
        let mut buffers = self.buffers.lock().unwrap();
        buffers.clear();
        buffers.shrink_to_fit();
    }

    pub fn num_idle(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryPool;

    #[test]
    fn memory_pool_reuses_released_buffers() {
        let pool = MemoryPool::new(64);
        let mut buf = pool.acquire();
        buf.extend_from_slice(&[1, 2, 3]);
        pool.release(buf);
        assert_eq!(pool.num_idle(), 1);

        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 3);
        assert_eq!(pool.num_idle(), 0);
    }

    #[test]
    fn memory_pool_clean_up_drops_idle_buffers() {
        let pool = MemoryPool::new(64);
        for _ in 0..4 {
            pool.release(pool.acquire());
        }
        assert_eq!(pool.num_idle(), 4);
        pool.clean_up();
        assert_eq!(pool.num_idle(), 0);
    }
}
