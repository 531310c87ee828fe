use crate::api::{SessionDirectory, SessionSummary};
use crate::identity::SessionId;

/// In-memory list of known sessions, refreshed after any transcript
/// mutation. Purely a read projection; the core never mutates summaries.
pub struct SessionCatalog {
    sessions: Vec<SessionSummary>,
}

impl SessionCatalog {
    pub fn new() -> Self {
        Self {
            sessions: Vec::new(),
        }
    }

    pub fn sessions(&self) -> &[SessionSummary] {
        &self.sessions
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.iter().any(|s| &s.session_id == id)
    }

    /// Re-reads the session list. A fetch failure degrades to an empty
    /// catalog and never blocks the caller.
    pub async fn refresh<D>(&mut self, directory: &D)
    where
        D: SessionDirectory + ?Sized,
    {
        match directory.list().await {
            Ok(sessions) => self.sessions = sessions,
            Err(e) => {
                tracing::warn!("failed to refresh the session catalog: {e:#}");
                self.sessions.clear();
            }
        }
    }
}

impl Default for SessionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockSessionDirectory;

    fn summary(id: &str) -> SessionSummary {
        SessionSummary {
            session_id: SessionId::from(id),
            timestamp: Some("2025-11-02 18:30".to_string()),
            last_message_preview: Some("Qu'est-ce que la zakat...".to_string()),
        }
    }

    #[tokio::test]
    async fn refresh_replaces_the_catalog() {
        let mut directory = MockSessionDirectory::new();
        directory
            .expect_list()
            .returning(|| Ok(vec![summary("a"), summary("b")]));

        let mut catalog = SessionCatalog::new();
        catalog.refresh(&directory).await;
        assert_eq!(catalog.sessions().len(), 2);
        assert!(catalog.contains(&SessionId::from("a")));
        assert!(!catalog.contains(&SessionId::from("c")));
    }

    #[tokio::test]
    async fn a_fetch_failure_degrades_to_an_empty_catalog() {
        let mut directory = MockSessionDirectory::new();
        directory
            .expect_list()
            .times(1)
            .returning(|| Ok(vec![summary("a")]));
        directory
            .expect_list()
            .returning(|| Err(anyhow::anyhow!("backend unreachable")));

        let mut catalog = SessionCatalog::new();
        catalog.refresh(&directory).await;
        assert_eq!(catalog.sessions().len(), 1);
        catalog.refresh(&directory).await;
        assert!(catalog.sessions().is_empty());
    }
}
