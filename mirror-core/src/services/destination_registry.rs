//! CRUD over delivery destinations. Pure reference data; the diff lifecycle
//! consults it to decide delivery completeness.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::models::destination::{
    CreateDestination, Destination, UpdateDestination, DEFAULT_DESTINATION_ID,
};
use crate::store::{EntityKind, EntityStore};

#[derive(Clone)]
pub struct DestinationRegistry {
    store: Arc<EntityStore>,
}

impl DestinationRegistry {
    pub fn new(store: Arc<EntityStore>) -> Self {
        Self { store }
    }

    /// Seed the well-known default destination if it is missing. Idempotent;
    /// run at startup.
    pub async fn ensure_default(&self) -> Result<()> {
        if self
            .get(DEFAULT_DESTINATION_ID)
            .await?
            .is_none()
        {
            let dest = Destination {
                id: DEFAULT_DESTINATION_ID.to_string(),
                name: "Default network".to_string(),
                description: "Preconfigured delivery destination".to_string(),
                color: None,
            };
            self.store
                .write(EntityKind::Destination, &dest.id, &dest)
                .await?;
            tracing::info!("seeded default destination");
        }
        Ok(())
    }

    pub async fn create(&self, req: CreateDestination) -> Result<Destination> {
        let id = req.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.get(&id).await?.is_some() {
            return Err(CoreError::DestinationExists(id));
        }
        let dest = Destination {
            id,
            name: req.name,
            description: req.description,
            color: req.color,
        };
        self.store
            .write(EntityKind::Destination, &dest.id, &dest)
            .await?;
        tracing::info!(destination_id = %dest.id, "created destination");
        Ok(dest)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Destination>> {
        self.store.read(EntityKind::Destination, id).await
    }

    pub async fn list(&self) -> Result<Vec<Destination>> {
        let mut all: Vec<Destination> = self.store.list_all(EntityKind::Destination).await?;
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    pub async fn update(&self, id: &str, req: UpdateDestination) -> Result<Destination> {
        let mut dest = self
            .get(id)
            .await?
            .ok_or_else(|| CoreError::UnknownDestination(id.to_string()))?;
        if let Some(name) = req.name {
            dest.name = name;
        }
        if let Some(description) = req.description {
            dest.description = description;
        }
        if let Some(color) = req.color {
            dest.color = Some(color);
        }
        self.store
            .write(EntityKind::Destination, id, &dest)
            .await?;
        Ok(dest)
    }

    /// Removing a destination never rewrites history: past diffs keep their
    /// `transfers` entries, the destination just stops counting toward
    /// completeness.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if id == DEFAULT_DESTINATION_ID {
            return Err(CoreError::DefaultDestinationProtected);
        }
        self.store.delete(EntityKind::Destination, id).await?;
        tracing::info!(destination_id = %id, "deleted destination");
        Ok(())
    }
}
