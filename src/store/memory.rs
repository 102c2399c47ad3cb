use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use async_trait::async_trait;
use tokio::sync::RwLock;
use crate::errors::{AppError, Result};
use super::KvStore;

/// Plain value with an optional expiry (seconds since the epoch).
#[derive(Debug, Clone)]
struct ValueEntry {
    data: Vec<u8>,
    expires_at: Option<u64>,
}

impl ValueEntry {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            data,
            expires_at: ttl.map(|ttl| now_secs() + ttl.as_secs()),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |at| now_secs() >= at)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug, Clone)]
enum Slot {
    Value(ValueEntry),
    List(VecDeque<Vec<u8>>),
    Hash(HashMap<String, i64>),
    Set(BTreeSet<String>),
}

impl Slot {
    fn kind(&self) -> &'static str {
        match self {
            Slot::Value(_) => "string",
            Slot::List(_) => "list",
            Slot::Hash(_) => "hash",
            Slot::Set(_) => "set",
        }
    }
}

fn wrong_type(key: &str, expected: &str, slot: &Slot) -> AppError {
    AppError::Store(format!("WRONGTYPE key {} holds a {}, expected {}", key, slot.kind(), expected))
}

/// In-process store with the same semantics as the Redis-backed one. Expired
/// values are dropped lazily on read.
#[derive(Clone, Default)]
pub struct MemoryStore {
    slots: Arc<RwLock<HashMap<String, Slot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn clear_expired(&self) {
        let mut slots = self.slots.write().await;
        slots.retain(|_, slot| !matches!(slot, Slot::Value(v) if v.is_expired()));
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        {
            let slots = self.slots.read().await;
            match slots.get(key) {
                None => return Ok(None),
                Some(Slot::Value(entry)) if !entry.is_expired() => return Ok(Some(entry.data.clone())),
                Some(Slot::Value(_)) => {}
                Some(other) => return Err(wrong_type(key, "string", other)),
            }
        }

        // expired
        let mut slots = self.slots.write().await;
        if matches!(slots.get(key), Some(Slot::Value(v)) if v.is_expired()) {
            slots.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut slots = self.slots.write().await;
        slots.insert(key.to_string(), Slot::Value(ValueEntry::new(value, None)));
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut slots = self.slots.write().await;
        slots.insert(key.to_string(), Slot::Value(ValueEntry::new(value, Some(ttl))));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.slots.write().await.remove(key);
        Ok(())
    }

    async fn rpush(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut slots = self.slots.write().await;
        match slots.entry(key.to_string()).or_insert_with(|| Slot::List(VecDeque::new())) {
            Slot::List(list) => {
                list.push_back(value);
                Ok(())
            }
            other => Err(wrong_type(key, "list", other)),
        }
    }

    async fn lpush(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut slots = self.slots.write().await;
        match slots.entry(key.to_string()).or_insert_with(|| Slot::List(VecDeque::new())) {
            Slot::List(list) => {
                list.push_front(value);
                Ok(())
            }
            other => Err(wrong_type(key, "list", other)),
        }
    }

    async fn lpop(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut slots = self.slots.write().await;
        let (popped, now_empty) = match slots.get_mut(key) {
            None => return Ok(None),
            Some(Slot::List(list)) => {
                let popped = list.pop_front();
                (popped, list.is_empty())
            }
            Some(other) => return Err(wrong_type(key, "list", other)),
        };
        if now_empty {
            slots.remove(key);
        }
        Ok(popped)
    }

    async fn lrange_all(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        let slots = self.slots.read().await;
        match slots.get(key) {
            None => Ok(Vec::new()),
            Some(Slot::List(list)) => Ok(list.iter().cloned().collect()),
            Some(other) => Err(wrong_type(key, "list", other)),
        }
    }

    async fn replace_list(&self, key: &str, values: Vec<Vec<u8>>) -> Result<()> {
        let mut slots = self.slots.write().await;
        if values.is_empty() {
            slots.remove(key);
        } else {
            slots.insert(key.to_string(), Slot::List(values.into_iter().collect()));
        }
        Ok(())
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut slots = self.slots.write().await;
        match slots.entry(key.to_string()).or_insert_with(|| Slot::Hash(HashMap::new())) {
            Slot::Hash(hash) => {
                let count = hash.entry(field.to_string()).or_insert(0);
                *count += delta;
                Ok(*count)
            }
            other => Err(wrong_type(key, "hash", other)),
        }
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, i64>> {
        let slots = self.slots.read().await;
        match slots.get(key) {
            None => Ok(HashMap::new()),
            Some(Slot::Hash(hash)) => Ok(hash.clone()),
            Some(other) => Err(wrong_type(key, "hash", other)),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut slots = self.slots.write().await;
        match slots.entry(key.to_string()).or_insert_with(|| Slot::Set(BTreeSet::new())) {
            Slot::Set(set) => {
                set.insert(member.to_string());
                Ok(())
            }
            other => Err(wrong_type(key, "set", other)),
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let slots = self.slots.read().await;
        match slots.get(key) {
            None => Ok(Vec::new()),
            Some(Slot::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(other) => Err(wrong_type(key, "set", other)),
        }
    }
}
