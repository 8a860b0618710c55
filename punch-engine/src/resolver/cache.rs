//! Caching layer for course lookups.
//!
//! Courses change rarely during a race but are needed for every readout,
//! so they are memoised with a TTL. Run and start-list lookups always go
//! to the directory: cards get re-assigned while the race is running.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache as MokaCache;

use crate::domain::{CardId, CompetitorRef, CourseDefinition, CourseId, RunId, StageId, StartInfo};

use super::{DirectoryError, RunDirectory};

/// Configuration for the course cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL for cached entries.
    pub ttl: Duration,

    /// Maximum number of cached courses.
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_capacity: 500,
        }
    }
}

/// Directory wrapper that caches courses.
pub struct CachedDirectory<D> {
    inner: D,
    courses: MokaCache<CourseId, Arc<CourseDefinition>>,
}

impl<D: RunDirectory> CachedDirectory<D> {
    pub fn new(inner: D, config: &CacheConfig) -> Self {
        let courses = MokaCache::builder()
            .time_to_live(config.ttl)
            .max_capacity(config.max_capacity)
            .build();
        Self { inner, courses }
    }

    /// Get cache statistics (for monitoring).
    pub fn entry_count(&self) -> u64 {
        self.courses.entry_count()
    }

    /// Drop every cached course, e.g. after the course setter edits one.
    pub fn invalidate_all(&self) {
        self.courses.invalidate_all();
    }
}

#[async_trait]
impl<D: RunDirectory> RunDirectory for CachedDirectory<D> {
    async fn runs_for_card(
        &self,
        card: CardId,
        stage: StageId,
    ) -> Result<Vec<CompetitorRef>, DirectoryError> {
        self.inner.runs_for_card(card, stage).await
    }

    async fn run(&self, id: RunId) -> Result<CompetitorRef, DirectoryError> {
        self.inner.run(id).await
    }

    async fn course(&self, id: CourseId) -> Result<Arc<CourseDefinition>, DirectoryError> {
        if let Some(cached) = self.courses.get(&id).await {
            return Ok(cached);
        }
        let course = self.inner.course(id).await?;
        self.courses.insert(id, course.clone()).await;
        Ok(course)
    }

    async fn start_info(&self, run: RunId) -> Result<StartInfo, DirectoryError> {
        self.inner.start_info(run).await
    }
}
