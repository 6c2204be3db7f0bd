//! IPv4 分片重组
//!
//! 按 (源地址, 目的地址, 协议, identification) 缓存分片，全部到齐后拼出完整报文。
//! 不同元组之间互不阻塞：DashMap 只在查找/插入元组时短暂持有分片锁，
//! 合并分片时只锁该元组自己的 Mutex。

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::debug;
use parking_lot::Mutex;

use crate::error::DefragError;
use crate::layers::Ipv4Frame;

/// IPv4 报文最大长度
pub const IPV4_MAXIMUM_SIZE: usize = 65535;
/// 非末尾分片的最小负载长度
pub const IPV4_MINIMUM_FRAGMENT_SIZE: usize = 8;
/// 单个元组允许缓存的最大分片数
pub const IPV4_MAXIMUM_FRAGMENT_LIST_LEN: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentKey {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub identification: u16,
}

impl FragmentKey {
    fn of(frame: &Ipv4Frame) -> Self {
        Self {
            src: frame.src,
            dst: frame.dst,
            protocol: frame.protocol,
            identification: frame.identification,
        }
    }
}

#[derive(Debug)]
struct FragmentList {
    /// offset -> 负载，offset 相同的重复分片只保留第一个
    fragments: BTreeMap<usize, Vec<u8>>,
    /// 首分片（offset 0），重组后沿用它的头部字段
    first: Option<Ipv4Frame>,
    /// 末尾分片给出的总负载长度
    end: Option<usize>,
    last_seen: Instant,
}

impl FragmentList {
    fn new(now: Instant) -> Self {
        Self {
            fragments: BTreeMap::new(),
            first: None,
            end: None,
            last_seen: now,
        }
    }

    fn insert(&mut self, frame: Ipv4Frame, now: Instant) -> Result<(), DefragError> {
        let offset = frame.fragment_offset;
        let end = offset + frame.payload.len();
        self.last_seen = now;

        if !frame.more_fragments {
            match self.end {
                Some(expected) if expected != end => {
                    return Err(DefragError::InconsistentEnd { expected, got: end });
                }
                _ => self.end = Some(end),
            }
        }

        if self.fragments.contains_key(&offset) {
            debug!("重复分片 offset={}，忽略", offset);
            return Ok(());
        }
        if self.fragments.len() >= IPV4_MAXIMUM_FRAGMENT_LIST_LEN {
            return Err(DefragError::TooManyFragments(IPV4_MAXIMUM_FRAGMENT_LIST_LEN));
        }

        let mut frame = frame;
        let payload = std::mem::take(&mut frame.payload);
        if offset == 0 {
            self.first = Some(frame);
        }
        self.fragments.insert(offset, payload);
        Ok(())
    }

    /// 所有分片覆盖 [0, end) 时返回拼接后的负载，重叠部分以先到的为准
    fn assemble(&self) -> Option<Vec<u8>> {
        let end = self.end?;
        self.first.as_ref()?;

        let mut payload = Vec::with_capacity(end);
        for (&offset, data) in &self.fragments {
            let cursor = payload.len();
            if offset > cursor {
                return None;
            }
            let fragment_end = offset + data.len();
            if fragment_end > cursor {
                payload.extend_from_slice(&data[cursor - offset..]);
            }
        }

        if payload.len() < end {
            return None;
        }
        payload.truncate(end);
        Some(payload)
    }
}

/// IPv4 分片重组器，可在多个 worker 之间共享
pub struct Ipv4Defragmenter {
    lists: DashMap<FragmentKey, Arc<Mutex<FragmentList>>>,
    timeout: Duration,
}

impl Ipv4Defragmenter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            lists: DashMap::new(),
            timeout,
        }
    }

    /// 处理一个 IPv4 报文。
    ///
    /// - 不是分片（或设置了 DF）：原样返回 `Ok(Some(frame))`
    /// - 分片尚未到齐：`Ok(None)`
    /// - 到齐：返回重组后的报文，`total_len` 已修正
    pub fn defrag(&self, frame: Ipv4Frame) -> Result<Option<Ipv4Frame>, DefragError> {
        self.defrag_at(frame, Instant::now())
    }

    fn defrag_at(&self, frame: Ipv4Frame, now: Instant) -> Result<Option<Ipv4Frame>, DefragError> {
        if frame.dont_fragment || !frame.is_fragment() {
            return Ok(Some(frame));
        }

        let len = frame.payload.len();
        if frame.fragment_offset + len > IPV4_MAXIMUM_SIZE {
            return Err(DefragError::TooBig {
                offset: frame.fragment_offset,
                len,
            });
        }
        if frame.more_fragments && len < IPV4_MINIMUM_FRAGMENT_SIZE {
            return Err(DefragError::TooSmall(len));
        }

        let key = FragmentKey::of(&frame);
        let list = self
            .lists
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(FragmentList::new(now))))
            .clone();

        let mut guard = list.lock();
        if now.duration_since(guard.last_seen) > self.timeout {
            debug!("分片元组 {:?} 已超时，重新开始", key);
            *guard = FragmentList::new(now);
        }

        let inserted = guard.insert(frame, now);
        if let Err(e) = inserted {
            drop(guard);
            self.lists.remove(&key);
            return Err(e);
        }

        let Some(payload) = guard.assemble() else {
            return Ok(None);
        };
        let Some(mut reassembled) = guard.first.take() else {
            return Ok(None);
        };
        drop(guard);
        self.lists.remove_if(&key, |_, current| Arc::ptr_eq(current, &list));

        let total_len = reassembled.header_len + payload.len();
        if total_len > IPV4_MAXIMUM_SIZE {
            return Err(DefragError::TooBig {
                offset: 0,
                len: total_len,
            });
        }
        reassembled.more_fragments = false;
        reassembled.fragment_offset = 0;
        reassembled.total_len = total_len as u16;
        reassembled.payload = payload;
        debug!("重组完成 {:?}，总长度 {}", key, total_len);
        Ok(Some(reassembled))
    }

    /// 丢弃在 `deadline` 之前就不再活跃的元组，返回丢弃数量
    pub fn discard_older_than(&self, deadline: Instant) -> usize {
        let before = self.lists.len();
        self.lists.retain(|_, list| list.lock().last_seen >= deadline);
        before.saturating_sub(self.lists.len())
    }

    /// 丢弃超过配置超时时间的元组
    pub fn discard_expired(&self) -> usize {
        match Instant::now().checked_sub(self.timeout) {
            Some(deadline) => self.discard_older_than(deadline),
            None => 0,
        }
    }

    /// 正在等待分片的元组数
    pub fn pending(&self) -> usize {
        self.lists.len()
    }
}

impl Default for Ipv4Defragmenter {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}
