use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use vigil_model::Server;

#[async_trait]
pub trait ServerRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<Server>>;
    async fn list_enabled(&self) -> Result<Vec<Server>>;
    async fn get(&self, id: Uuid) -> Result<Option<Server>>;
    async fn create(&self, server: &Server) -> Result<()>;
    async fn update(&self, server: &Server) -> Result<()>;
    /// Cascades to the server's history and library cache.
    async fn delete(&self, id: Uuid) -> Result<()>;
}
