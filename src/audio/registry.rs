use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::info;

use super::tenant::{Services, TenantHandle, TenantState};

/// One control task per guild, created on first use.
pub struct TenantRegistry {
    services: Arc<Services>,
    tenants: DashMap<GuildId, TenantHandle>,
}

impl TenantRegistry {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            tenants: DashMap::new(),
        }
    }

    /// Returns the guild's handle, spawning its control task if needed.
    pub fn get_or_create(&self, guild: GuildId) -> TenantHandle {
        let mut slot = self.tenants.entry(guild).or_insert_with(|| {
            info!("🆕 New music session for guild {}", guild);
            TenantState::spawn(guild, self.services.clone())
        });

        // A task that shut down is replaced on the next request.
        if slot.is_closed() {
            *slot = TenantState::spawn(guild, self.services.clone());
        }
        slot.clone()
    }

    pub fn get(&self, guild: GuildId) -> Option<TenantHandle> {
        self.tenants.get(&guild).map(|handle| handle.clone())
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    /// Stops every guild and waits for all control tasks to finish.
    pub async fn shutdown(&self) {
        let handles: Vec<TenantHandle> = self.tenants.iter().map(|t| t.value().clone()).collect();
        self.tenants.clear();

        info!("🛑 Shutting down {} music sessions", handles.len());
        futures::future::join_all(handles.iter().map(|handle| handle.shutdown())).await;
    }
}
