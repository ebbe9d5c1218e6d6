use crate::backtester;
use crate::context::AppContext;
use anyhow::Result;

pub async fn run(app: &AppContext, task_id: i64) -> Result<()> {
    let mut db = app.database().await?;
    backtester::run_task(&mut db, task_id).await
}
