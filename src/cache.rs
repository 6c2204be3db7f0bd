//! 带 TTL 的关联缓存
//!
//! 三个缓存互相独立，各自是一个 DashMap（分片锁），不会因为一次 SSRC 查找
//! 阻塞另一个缓存上的 IP+端口查找。过期在读取时惰性判断，另外可以由
//! 维护线程调用 `purge_expired` 批量清理。

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::CacheError;

/// SDP 缓存：媒体 IP+端口 -> Call-ID
pub const SDP_TTL: Duration = Duration::from_secs(120);
/// RTCP 缓存：SSRC -> Call-ID，覆盖整通电话
pub const RTCP_TTL: Duration = Duration::from_secs(43200);
/// NG 缓存：cookie -> Call-ID
pub const SIP_TTL: Duration = Duration::from_secs(10);

/// key 最大长度
pub const MAX_KEY_LEN: usize = 65535;
/// value 最大长度
pub const MAX_VALUE_LEN: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// 单个 TTL 缓存
#[derive(Debug, Default)]
pub struct TtlCache {
    entries: DashMap<Vec<u8>, CacheEntry>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入，覆盖已有值并重新计算过期时间
    pub fn set(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }
        if key.len() > MAX_KEY_LEN {
            return Err(CacheError::KeyTooLarge(key.len()));
        }
        if value.len() > MAX_VALUE_LEN {
            return Err(CacheError::ValueTooLarge(value.len()));
        }

        self.entries.insert(
            key.to_vec(),
            CacheEntry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    /// 读取，已过期的条目视为不存在并顺手删除
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    /// 删除全部已过期条目，返回删除数量
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 关联引擎共享的三个缓存
#[derive(Debug, Default)]
pub struct CorrelationCaches {
    pub sdp: TtlCache,
    pub rtcp: TtlCache,
    pub sip: TtlCache,
}

impl CorrelationCaches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn purge_expired(&self) -> usize {
        self.sdp.purge_expired() + self.rtcp.purge_expired() + self.sip.purge_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_set_and_get() {
        let cache = TtlCache::new();
        cache.set(b"1234", b"abc", RTCP_TTL).unwrap();
        assert_eq!(cache.get(b"1234"), Some(b"abc".to_vec()));
        assert_eq!(cache.get(b"5678"), None);
    }

    #[test]
    fn test_overwrite() {
        let cache = TtlCache::new();
        cache.set(b"k", b"old", SDP_TTL).unwrap();
        cache.set(b"k", b"new", SDP_TTL).unwrap();
        assert_eq!(cache.get(b"k"), Some(b"new".to_vec()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_miss() {
        let cache = TtlCache::new();
        cache.set(b"k", b"v", Duration::from_millis(20)).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(cache.get(b"k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let cache = TtlCache::new();
        cache.set(b"short", b"v", Duration::from_millis(10)).unwrap();
        cache.set(b"long", b"v", SDP_TTL).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.get(b"long"), Some(b"v".to_vec()));
    }

    #[test]
    fn test_rejects_bad_entries() {
        let cache = TtlCache::new();
        assert_eq!(cache.set(b"", b"v", SIP_TTL), Err(CacheError::EmptyKey));
        let big = vec![0u8; MAX_VALUE_LEN + 1];
        assert_eq!(cache.set(b"k", &big, SIP_TTL), Err(CacheError::ValueTooLarge(big.len())));
    }

    #[test]
    fn test_namespaces_are_independent() {
        let caches = CorrelationCaches::new();
        caches.sdp.set(b"key", b"sdp", SDP_TTL).unwrap();
        assert_eq!(caches.rtcp.get(b"key"), None);
        assert_eq!(caches.sip.get(b"key"), None);
    }

    #[test]
    fn test_concurrent_access() {
        let caches = Arc::new(CorrelationCaches::new());
        let handles: Vec<_> = (0..4u8)
            .map(|worker| {
                let caches = Arc::clone(&caches);
                thread::spawn(move || {
                    for i in 0..100u8 {
                        let key = [worker, i];
                        caches.rtcp.set(&key, b"call", RTCP_TTL).unwrap();
                        assert_eq!(caches.rtcp.get(&key), Some(b"call".to_vec()));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(caches.rtcp.len(), 400);
    }
}
