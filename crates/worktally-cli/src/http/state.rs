use std::sync::Arc;

use worktally_core::{AdoSettings, Config, RemoteRecordClient, TrackingDb};

use super::errors::HttpError;

#[derive(Clone)]
pub struct HttpState {
    pub config: Arc<Config>,
    pub store: Arc<TrackingDb>,
    remote: Option<Arc<dyn RemoteRecordClient>>,
}

impl HttpState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<TrackingDb>,
        remote: Option<Arc<dyn RemoteRecordClient>>,
    ) -> Self {
        Self {
            config,
            store,
            remote,
        }
    }

    /// The remote client, or a 500 naming the missing setting.
    pub fn remote(&self) -> Result<Arc<dyn RemoteRecordClient>, HttpError> {
        match &self.remote {
            Some(remote) => Ok(Arc::clone(remote)),
            None => {
                let message = match AdoSettings::from_config(&self.config) {
                    Err(e) => e.to_string(),
                    Ok(_) => "remote client is not available".to_string(),
                };
                Err(HttpError::configuration(message))
            }
        }
    }
}
