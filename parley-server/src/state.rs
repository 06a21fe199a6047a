//! Shared application state for the parley server

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parley_core::ConnectionManager;

use crate::phone::{AllowList, DEFAULT_ADDRESS_DOMAIN};

/// Shared application state accessible by all handlers
#[derive(Clone)]
pub struct AppState {
    /// Lifecycle manager for the messaging session
    pub manager: ConnectionManager,
    /// Key every `/send` request must present
    pub api_key: Arc<str>,
    /// Phone numbers `/send` may deliver to
    pub allowed_phones: Arc<AllowList>,
    /// Domain appended to normalized phone numbers to form a destination address
    pub address_domain: Arc<str>,
    /// When the server started
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create state for `manager`, guarded by `api_key` and the `allowed_phones` list
    pub fn new<I, S>(manager: ConnectionManager, api_key: impl Into<Arc<str>>, allowed_phones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            manager,
            api_key: api_key.into(),
            allowed_phones: Arc::new(AllowList::new(allowed_phones)),
            address_domain: DEFAULT_ADDRESS_DOMAIN.into(),
            started_at: Utc::now(),
        }
    }

    /// Use a different address domain
    #[must_use]
    pub fn with_address_domain(mut self, domain: impl Into<Arc<str>>) -> Self {
        self.address_domain = domain.into();
        self
    }

    /// Returns how long the server has been running
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
