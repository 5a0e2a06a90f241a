pub mod cache;
pub mod database;
pub mod redis;

pub use cache::{CacheClient, DispatchMode, Invalidator};
pub use database::{ListFilter, MemoryStore, MongoDb, ObjectStore, PrincipalStore};
pub use self::redis::{CacheStore, MemoryCache, RedisCache};
