//! # Batch Cache Operations
//!
//! 缓存读写的 trait 边界，批量执行器只依赖这里的接口。
//!
//! ## 特性
//!
//! - 单键操作 (`CacheOps`)
//! - 批量操作 (`BatchCacheOps`: mget / mset / mdel)
//! - 对象安全，可以 `Arc<dyn BatchCacheOps>` 形式传递
//!
//! ## 性能优势
//!
//! - 批量操作只获取一次锁
//! - 结果与逐个调用单键操作一致

use std::time::Duration;

use async_trait::async_trait;

use super::store::CacheStore;
use crate::error::Result;

/// 单键缓存操作
#[async_trait]
pub trait CacheOps: Send + Sync {
    /// 获取缓存值，未命中返回 `Ok(None)`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// 设置缓存值
    ///
    /// # 参数
    /// - `key`: 缓存键
    /// - `value`: 缓存值
    /// - `ttl`: 可选的 TTL，None 时使用默认 TTL
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// 删除缓存条目
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// 批量缓存操作扩展 trait
#[async_trait]
pub trait BatchCacheOps: CacheOps {
    /// 批量获取缓存值
    ///
    /// # 返回
    /// - `Vec<Option<Vec<u8>>>`: 与输入键一一对应
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    /// 批量设置缓存值
    async fn mset(&self, items: Vec<(String, Vec<u8>)>, ttl: Option<Duration>) -> Result<()>;

    /// 批量删除，返回实际删除数量
    async fn mdel(&self, keys: &[String]) -> Result<usize>;
}

#[async_trait]
impl CacheOps for CacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        CacheStore::get(self, key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        CacheStore::set(self, key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        CacheStore::delete(self, key).await
    }
}

#[async_trait]
impl BatchCacheOps for CacheStore {
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        CacheStore::mget(self, keys).await
    }

    async fn mset(&self, items: Vec<(String, Vec<u8>)>, ttl: Option<Duration>) -> Result<()> {
        CacheStore::mset(self, items, ttl).await
    }

    async fn mdel(&self, keys: &[String]) -> Result<usize> {
        CacheStore::mdel(self, keys).await
    }
}
