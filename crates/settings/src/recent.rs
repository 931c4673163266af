use std::collections::VecDeque;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Maximum number of projects remembered in the recent list.
pub const MAX_RECENT_PROJECTS: usize = 10;

/// 管理最近開啟專案的清單（最新在前、不重複）。 / Bounded, most-recent-first list of opened projects without duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentProjects {
    capacity: usize,
    entries: VecDeque<PathBuf>,
}

impl Default for RecentProjects {
    fn default() -> Self {
        Self::new(MAX_RECENT_PROJECTS)
    }
}

impl RecentProjects {
    /// 建立指定容量的清單。 / Creates an empty list with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// 依序列化資料還原清單，移除重複並套用容量。 / Rebuilds the list from persisted entries, dropping duplicates and overflow.
    pub fn with_entries(capacity: usize, entries: Vec<PathBuf>) -> Self {
        let mut recent = Self::new(capacity);
        for entry in entries {
            if recent.entries.len() == recent.capacity {
                break;
            }
            if !recent.entries.contains(&entry) {
                recent.entries.push_back(entry);
            }
        }
        recent
    }

    /// 取得最大容量。 / Returns the maximum number of tracked projects.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 加入或提升專案至清單頂端。 / Inserts or promotes a project to the front.
    pub fn add(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        self.entries.retain(|existing| existing != &path);
        self.entries.push_front(path);
        self.entries.truncate(self.capacity);
    }

    /// 移除已不存在於磁碟上的專案。 / Drops projects whose directory no longer exists.
    pub fn retain_existing(&mut self) -> usize {
        let initial_len = self.entries.len();
        self.entries.retain(|existing| existing.is_dir());
        initial_len - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn to_vec(&self) -> Vec<PathBuf> {
        self.entries.iter().cloned().collect()
    }
}

impl Serialize for RecentProjects {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter())
    }
}

impl<'de> Deserialize<'de> for RecentProjects {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<PathBuf>::deserialize(deserializer)?;
        Ok(Self::with_entries(MAX_RECENT_PROJECTS, entries))
    }
}
