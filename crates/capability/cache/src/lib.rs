//! 容量受限的键值缓存，按最近访问淘汰。

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

/// 缓存构造错误。
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("invalid capacity: {0} (must be >= 1)")]
    InvalidCapacity(usize),
}

/// 缓存条目：值与最近访问序号。
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    last_accessed: u64,
}

struct CacheState<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    counter: u64,
}

impl<K, V> CacheState<K, V>
where
    K: Eq + Hash + Clone,
{
    fn tick(&mut self) -> u64 {
        self.counter = self.counter.saturating_add(1);
        self.counter
    }

    fn evict_oldest(&mut self) -> Option<K> {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone())?;
        self.entries.remove(&oldest);
        Some(oldest)
    }
}

/// 固定容量缓存。
///
/// 访问序号使用单调递增计数而非墙钟时间，连续操作之间不会出现并列。
/// 每个公开操作都在同一把互斥锁内完成读-改-写。
pub struct BoundedCache<K, V> {
    capacity: usize,
    state: Mutex<CacheState<K, V>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        if capacity == 0 {
            return Err(CacheError::InvalidCapacity(capacity));
        }
        Ok(Self {
            capacity,
            state: Mutex::new(CacheState {
                entries: HashMap::with_capacity(capacity),
                counter: 0,
            }),
        })
    }

    /// 判断键是否存在；命中时刷新其访问序号。
    pub fn contains(&self, key: &K) -> bool {
        let mut state = self.lock();
        let tick = state.tick();
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_accessed = tick;
                true
            }
            None => false,
        }
    }

    /// 读取值；命中时刷新其访问序号。
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.lock();
        let tick = state.tick();
        let entry = state.entries.get_mut(key)?;
        entry.last_accessed = tick;
        Some(entry.value.clone())
    }

    /// 插入或覆盖。新键且已满时先淘汰访问序号最小的一项，返回被淘汰的键。
    pub fn update(&self, key: K, value: V) -> Option<K> {
        let mut state = self.lock();
        let evicted = if !state.entries.contains_key(&key) && state.entries.len() >= self.capacity
        {
            state.evict_oldest()
        } else {
            None
        };
        let tick = state.tick();
        state.entries.insert(
            key,
            CacheEntry {
                value,
                last_accessed: tick,
            },
        );
        evicted
    }

    pub fn size(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    // 锁中毒时沿用内部状态：所有写操作在持锁期间不会 panic。
    fn lock(&self) -> MutexGuard<'_, CacheState<K, V>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
