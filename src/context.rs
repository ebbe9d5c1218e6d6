use crate::database::Database;
use anyhow::{anyhow, Result};

#[derive(Clone)]
pub struct AppContext {
    database_url: Option<String>,
}

impl AppContext {
    pub fn initialize(database_url: Option<String>) -> Self {
        Self { database_url }
    }

    pub async fn database(&self) -> Result<Database> {
        let Some(database_url) = self.database_url.as_deref() else {
            return Err(anyhow!(
                "DATABASE_URL must be set to run database-backed backtest commands."
            ));
        };
        Database::new(database_url).await
    }
}
