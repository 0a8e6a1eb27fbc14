//! Adapter from the databox gateway client to the fetcher trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use databox::{
    DataboxClient, DataboxCredentials, DataboxDownload, DataboxEntry, DataboxError, DataboxSession,
};

use super::traits::BaseDocumentFetcher;

/// Wrapper around [`DataboxClient`] that implements [`BaseDocumentFetcher`].
pub struct DataboxFetcher(pub DataboxClient);

impl DataboxFetcher {
    pub fn new(client: DataboxClient) -> Self {
        Self(client)
    }
}

#[async_trait]
impl BaseDocumentFetcher for DataboxFetcher {
    async fn open_session(
        &self,
        credentials: &DataboxCredentials,
    ) -> Result<DataboxSession, DataboxError> {
        self.0.open_session(credentials).await
    }

    async fn list_new_since(
        &self,
        session: &DataboxSession,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DataboxEntry>, DataboxError> {
        self.0.list_entries(session, from, to).await
    }

    async fn download(
        &self,
        session: &DataboxSession,
        external_id: &str,
    ) -> Result<DataboxDownload, DataboxError> {
        self.0.download(session, external_id).await
    }

    async fn close_session(&self, session: &DataboxSession) -> Result<(), DataboxError> {
        self.0.close_session(session).await
    }
}
