//! Report store boundary.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::export::model::{Report, ReportId};

/// Read access to persisted reports.
///
/// A missing id is `Ok(None)`, not an error; `Err` is reserved for the
/// store itself being unavailable.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn resolve_by_id(&self, id: ReportId) -> Result<Option<Report>>;

    /// Ids of every report `owner_id` may export, ascending.
    async fn accessible_ids(&self, owner_id: &str) -> Result<Vec<ReportId>>;
}

/// Store backed by a concurrent map. Used by the server binary and tests.
#[derive(Debug, Default)]
pub struct InMemoryReportStore {
    reports: DashMap<ReportId, Report>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, report: Report) {
        self.reports.insert(report.id, report);
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

impl FromIterator<Report> for InMemoryReportStore {
    fn from_iter<I: IntoIterator<Item = Report>>(iter: I) -> Self {
        let store = Self::new();
        for report in iter {
            store.insert(report);
        }
        store
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn resolve_by_id(&self, id: ReportId) -> Result<Option<Report>> {
        Ok(self.reports.get(&id).map(|entry| entry.value().clone()))
    }

    async fn accessible_ids(&self, owner_id: &str) -> Result<Vec<ReportId>> {
        let mut ids: Vec<ReportId> = self
            .reports
            .iter()
            .filter(|entry| entry.value().owner_id == owner_id)
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn report(id: ReportId, owner: &str) -> Report {
        Report {
            id,
            folio: format!("INC-{id:06}"),
            title: "Streetlight out".to_string(),
            description: "No light on the corner".to_string(),
            status: "open".to_string(),
            category: "lighting".to_string(),
            location: None,
            owner_id: owner.to_string(),
            created_at: Utc::now(),
            history: vec![],
        }
    }

    #[tokio::test]
    async fn test_resolve_missing_is_none() {
        let store: InMemoryReportStore = vec![report(1, "ana")].into_iter().collect();

        assert!(store.resolve_by_id(1).await.unwrap().is_some());
        assert!(store.resolve_by_id(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_accessible_ids_filters_by_owner() {
        let store: InMemoryReportStore = vec![report(3, "ana"), report(1, "ana"), report(2, "luis")]
            .into_iter()
            .collect();

        assert_eq!(store.accessible_ids("ana").await.unwrap(), vec![1, 3]);
        assert!(store.accessible_ids("nadie").await.unwrap().is_empty());
    }
}
