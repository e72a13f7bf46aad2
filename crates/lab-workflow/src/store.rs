//! 持久化协作接口
//!
//! 标本与质控的存储特征、参考统计来源，以及基于内存的实现。
//! 保存操作携带期望版本号，版本不一致时返回并发修改错误。

use lab_core::{
    AnalyteStats, ControlResult, LabError, LifecycleState, QualityControlDefinition, Result,
    Specimen,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

/// 标本存储
#[async_trait::async_trait]
pub trait SpecimenStore {
    async fn load(&self, specimen_number: &str) -> Result<Option<Specimen>>;

    /// 插入新标本，编号已存在时失败
    async fn insert(&self, specimen: Specimen) -> Result<()>;

    /// 保存修改后的标本，存储中的版本必须等于 `expected_version`，成功后版本加一
    async fn save(&self, specimen: Specimen, expected_version: u64) -> Result<Specimen>;

    /// 统计共享编号前缀的标本数量
    async fn count_with_prefix(&self, prefix: &str) -> Result<u64>;

    async fn list_by_status(&self, status: LifecycleState) -> Result<Vec<Specimen>>;

    async fn list_by_visit(&self, visit_id: u64) -> Result<Vec<Specimen>>;
}

/// 质控存储
#[async_trait::async_trait]
pub trait QcStore {
    async fn load_definition(&self, id: Uuid) -> Result<Option<QualityControlDefinition>>;

    async fn insert_definition(&self, definition: QualityControlDefinition) -> Result<()>;

    async fn save_definition(
        &self,
        definition: QualityControlDefinition,
        expected_version: u64,
    ) -> Result<QualityControlDefinition>;

    /// 追加质控结果并保存推进后的定义，两者同时生效或都不生效
    ///
    /// 存储中的定义版本必须等于 `expected_version`，成功后版本加一
    async fn record_run(
        &self,
        definition: QualityControlDefinition,
        expected_version: u64,
        result: ControlResult,
    ) -> Result<QualityControlDefinition>;

    /// 某个定义的质控结果，按时间先后排列；`limit` 只保留最后若干条
    async fn results(&self, definition_id: Uuid, limit: Option<usize>) -> Result<Vec<ControlResult>>;

    async fn list_definitions(&self) -> Result<Vec<QualityControlDefinition>>;
}

/// 测试定义的分析物参考统计
#[async_trait::async_trait]
pub trait ReferenceStatsSource {
    async fn analyte_stats(&self, test_definition_id: &str) -> Result<HashMap<String, AnalyteStats>>;
}

type LockTable = HashMap<String, Arc<Mutex<()>>>;

/// 按实体键分配的互斥锁
///
/// 同一标本或同一质控定义的写操作在这里串行化，不同实体互不阻塞。
/// 最后一个持有者释放后条目即被移除。
#[derive(Debug, Default)]
pub struct EntityLocks {
    locks: Arc<StdMutex<LockTable>>,
}

/// 实体锁守卫，释放时清理无人引用的锁
#[derive(Debug)]
pub struct EntityGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: Arc<StdMutex<LockTable>>,
}

fn lock_table(locks: &StdMutex<LockTable>) -> MutexGuard<'_, LockTable> {
    // 表内只有 Arc，中毒后数据仍然一致
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取实体锁，返回的守卫释放前其他写入方等待
    pub async fn acquire(&self, key: &str) -> EntityGuard {
        let lock = lock_table(&self.locks)
            .entry(key.to_string())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;

        EntityGuard {
            guard: Some(guard),
            key: key.to_string(),
            locks: self.locks.clone(),
        }
    }

    /// 当前被持有或等待中的实体数量
    pub fn len(&self) -> usize {
        lock_table(&self.locks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        // 等待者在表锁内克隆 Arc，计数为 1 说明只剩表本身引用
        let mut locks = lock_table(&self.locks);
        if locks.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.key);
        }
    }
}

/// 内存标本存储
#[derive(Debug, Default)]
pub struct InMemorySpecimenStore {
    specimens: RwLock<HashMap<String, Specimen>>,
}

impl InMemorySpecimenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by_number(mut specimens: Vec<Specimen>) -> Vec<Specimen> {
    specimens.sort_by(|a, b| a.specimen_number.cmp(&b.specimen_number));
    specimens
}

#[async_trait::async_trait]
impl SpecimenStore for InMemorySpecimenStore {
    async fn load(&self, specimen_number: &str) -> Result<Option<Specimen>> {
        Ok(self.specimens.read().await.get(specimen_number).cloned())
    }

    async fn insert(&self, specimen: Specimen) -> Result<()> {
        let mut specimens = self.specimens.write().await;
        if specimens.contains_key(&specimen.specimen_number) {
            return Err(LabError::Storage(format!(
                "Specimen {} already exists",
                specimen.specimen_number
            )));
        }
        specimens.insert(specimen.specimen_number.clone(), specimen);
        Ok(())
    }

    async fn save(&self, mut specimen: Specimen, expected_version: u64) -> Result<Specimen> {
        let mut specimens = self.specimens.write().await;
        let stored = specimens
            .get(&specimen.specimen_number)
            .ok_or_else(|| LabError::NotFound(format!("Specimen {}", specimen.specimen_number)))?;

        if stored.version != expected_version {
            return Err(LabError::ConcurrentModification {
                entity: format!("specimen {}", specimen.specimen_number),
                expected: expected_version,
                actual: stored.version,
            });
        }

        specimen.version = expected_version + 1;
        specimens.insert(specimen.specimen_number.clone(), specimen.clone());
        Ok(specimen)
    }

    async fn count_with_prefix(&self, prefix: &str) -> Result<u64> {
        let specimens = self.specimens.read().await;
        Ok(specimens.keys().filter(|number| number.starts_with(prefix)).count() as u64)
    }

    async fn list_by_status(&self, status: LifecycleState) -> Result<Vec<Specimen>> {
        let specimens = self.specimens.read().await;
        Ok(sorted_by_number(
            specimens.values().filter(|s| s.status == status).cloned().collect(),
        ))
    }

    async fn list_by_visit(&self, visit_id: u64) -> Result<Vec<Specimen>> {
        let specimens = self.specimens.read().await;
        Ok(sorted_by_number(
            specimens.values().filter(|s| s.visit_id == visit_id).cloned().collect(),
        ))
    }
}

/// 内存质控存储
#[derive(Debug, Default)]
pub struct InMemoryQcStore {
    definitions: RwLock<HashMap<Uuid, QualityControlDefinition>>,
    results: RwLock<HashMap<Uuid, Vec<ControlResult>>>,
}

impl InMemoryQcStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl QcStore for InMemoryQcStore {
    async fn load_definition(&self, id: Uuid) -> Result<Option<QualityControlDefinition>> {
        Ok(self.definitions.read().await.get(&id).cloned())
    }

    async fn insert_definition(&self, definition: QualityControlDefinition) -> Result<()> {
        let mut definitions = self.definitions.write().await;
        if definitions.contains_key(&definition.id) {
            return Err(LabError::Storage(format!(
                "Quality control definition {} already exists",
                definition.id
            )));
        }
        definitions.insert(definition.id, definition);
        Ok(())
    }

    async fn save_definition(
        &self,
        definition: QualityControlDefinition,
        expected_version: u64,
    ) -> Result<QualityControlDefinition> {
        let mut definitions = self.definitions.write().await;
        commit_definition(&mut definitions, definition, expected_version)
    }

    async fn record_run(
        &self,
        definition: QualityControlDefinition,
        expected_version: u64,
        result: ControlResult,
    ) -> Result<QualityControlDefinition> {
        if result.definition_id != definition.id {
            return Err(LabError::Validation(format!(
                "Result {} does not belong to quality control definition {}",
                result.id, definition.id
            )));
        }

        // 固定加锁顺序：先定义后结果
        let mut definitions = self.definitions.write().await;
        let mut results = self.results.write().await;
        let saved = commit_definition(&mut definitions, definition, expected_version)?;
        results.entry(saved.id).or_default().push(result);
        Ok(saved)
    }

    async fn results(&self, definition_id: Uuid, limit: Option<usize>) -> Result<Vec<ControlResult>> {
        let results = self.results.read().await;
        let series = results.get(&definition_id).map(Vec::as_slice).unwrap_or_default();
        let skip = limit.map(|n| series.len().saturating_sub(n)).unwrap_or(0);
        Ok(series[skip..].to_vec())
    }

    async fn list_definitions(&self) -> Result<Vec<QualityControlDefinition>> {
        let mut definitions: Vec<QualityControlDefinition> =
            self.definitions.read().await.values().cloned().collect();
        definitions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(definitions)
    }
}

fn commit_definition(
    definitions: &mut HashMap<Uuid, QualityControlDefinition>,
    mut definition: QualityControlDefinition,
    expected_version: u64,
) -> Result<QualityControlDefinition> {
    let stored = definitions.get(&definition.id).ok_or_else(|| {
        LabError::NotFound(format!("Quality control definition {}", definition.id))
    })?;

    if stored.version != expected_version {
        return Err(LabError::ConcurrentModification {
            entity: format!("quality control {}", definition.id),
            expected: expected_version,
            actual: stored.version,
        });
    }

    definition.version = expected_version + 1;
    definitions.insert(definition.id, definition.clone());
    Ok(definition)
}

/// 内存参考统计
#[derive(Debug, Default)]
pub struct InMemoryReferenceStats {
    stats: RwLock<HashMap<String, HashMap<String, AnalyteStats>>>,
}

impl InMemoryReferenceStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以现有统计表初始化
    pub fn with_stats(stats: HashMap<String, HashMap<String, AnalyteStats>>) -> Self {
        Self {
            stats: RwLock::new(stats),
        }
    }

    /// 设置某个测试定义下分析物的均值与标准差
    pub async fn set(&self, test_definition_id: &str, analyte: &str, stats: AnalyteStats) {
        tracing::debug!("Reference stats set for {}/{}", test_definition_id, analyte);
        self.stats
            .write()
            .await
            .entry(test_definition_id.to_string())
            .or_default()
            .insert(analyte.to_string(), stats);
    }
}

#[async_trait::async_trait]
impl ReferenceStatsSource for InMemoryReferenceStats {
    async fn analyte_stats(&self, test_definition_id: &str) -> Result<HashMap<String, AnalyteStats>> {
        Ok(self
            .stats
            .read()
            .await
            .get(test_definition_id)
            .cloned()
            .unwrap_or_default())
    }
}
